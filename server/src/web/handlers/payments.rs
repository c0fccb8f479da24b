// quire_server/src/web/handlers/payments.rs
use super::{header_value, idempotency_key, SIGNATURE_HEADER};
use crate::errors::{AppError, Result};
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use quire::InitializePayment;
use tracing::instrument;

#[instrument(name = "handler::initialize_payment", skip_all)]
pub async fn initialize_payment_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  body: web::Json<InitializePayment>,
) -> Result<HttpResponse> {
  let mut request = body.into_inner();
  request.idempotency_key = idempotency_key(&req, request.idempotency_key.take());

  let session = state.platform.payments().initialize_payment(request).await?;
  let response = if session.existing {
    HttpResponse::Ok().json(session)
  } else {
    HttpResponse::Created().json(session)
  };
  Ok(response)
}

/// Provider notification. The body is verified byte for byte, so it is taken
/// raw rather than through the JSON extractor.
#[instrument(name = "handler::payment_callback", skip_all)]
pub async fn payment_callback_handler(
  req: HttpRequest,
  state: web::Data<AppState>,
  body: web::Bytes,
) -> Result<HttpResponse> {
  let signature = header_value(&req, SIGNATURE_HEADER)
    .ok_or_else(|| AppError::Auth(format!("missing {} header", SIGNATURE_HEADER)))?;

  let reconciliation = state.platform.payment_callback(&body, &signature).await?;
  Ok(HttpResponse::Ok().json(reconciliation))
}

pub async fn get_payment_handler(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
  let payment = state.platform.payments().get_payment(&path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(payment))
}
