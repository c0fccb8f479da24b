// quire_server/src/web/handlers/orders.rs
use super::idempotency_key;
use crate::errors::Result;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use quire::{CreateOrderRequest, UpdateOrderStatus};
use tracing::instrument;
use uuid::Uuid;

#[instrument(name = "handler::create_order", skip_all)]
pub async fn create_order_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse> {
  let mut request = body.into_inner();
  request.idempotency_key = idempotency_key(&req, request.idempotency_key.take());

  let receipt = state.platform.checkout(request).await?;
  let response = if receipt.existing {
    HttpResponse::Ok().json(receipt)
  } else {
    HttpResponse::Created().json(receipt)
  };
  Ok(response)
}

pub async fn get_order_handler(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
  let order = state.platform.orders().get_order(path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(order))
}

pub async fn order_tracking_handler(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
  let tracking = state.platform.orders().tracking(path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(tracking))
}

#[instrument(name = "handler::update_order_status", skip(state, body), fields(order_id = %path))]
pub async fn update_order_status_handler(
  state: web::Data<AppState>,
  path: web::Path<Uuid>,
  body: web::Json<UpdateOrderStatus>,
) -> Result<HttpResponse> {
  let order = state
    .platform
    .orders()
    .update_status(path.into_inner(), body.into_inner())
    .await?;
  Ok(HttpResponse::Ok().json(order))
}
