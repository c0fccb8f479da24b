// quire_server/src/web/handlers/subscriptions.rs
use super::{header_value, idempotency_key, IDEMPOTENCY_KEY_HEADER};
use crate::errors::Result;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use quire::CreateSubscription;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
  pub customer_id: Uuid,
}

#[instrument(name = "handler::create_subscription", skip_all)]
pub async fn create_subscription_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  body: web::Json<CreateSubscription>,
) -> Result<HttpResponse> {
  let mut request = body.into_inner();
  request.idempotency_key = idempotency_key(&req, request.idempotency_key.take());

  let view = state.platform.subscriptions().create(request).await?;
  let response = if view.existing {
    HttpResponse::Ok().json(view)
  } else {
    HttpResponse::Created().json(view)
  };
  Ok(response)
}

pub async fn list_subscriptions_handler(
  state: web::Data<AppState>,
  query: web::Query<ListQuery>,
) -> Result<HttpResponse> {
  let subscriptions = state.platform.subscriptions().list(query.customer_id).await?;
  Ok(HttpResponse::Ok().json(subscriptions))
}

pub async fn get_subscription_handler(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
  let view = state.platform.subscriptions().status(path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(name = "handler::renew_subscription", skip(req, state), fields(subscription_id = %path))]
pub async fn renew_subscription_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  path: web::Path<Uuid>,
) -> Result<HttpResponse> {
  let key = header_value(&req, IDEMPOTENCY_KEY_HEADER);
  let view = state
    .platform
    .subscriptions()
    .renew(path.into_inner(), key.as_deref())
    .await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(name = "handler::cancel_subscription", skip(req, state), fields(subscription_id = %path))]
pub async fn cancel_subscription_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  path: web::Path<Uuid>,
) -> Result<HttpResponse> {
  let key = header_value(&req, IDEMPOTENCY_KEY_HEADER);
  let view = state
    .platform
    .subscriptions()
    .cancel(path.into_inner(), key.as_deref())
    .await?;
  Ok(HttpResponse::Ok().json(view))
}
