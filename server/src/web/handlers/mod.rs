// quire_server/src/web/handlers/mod.rs
pub mod maintenance;
pub mod orders;
pub mod payments;
pub mod subscriptions;

use actix_web::HttpRequest;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Reads a non-empty header value.
pub(crate) fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
  req
    .headers()
    .get(name)
    .and_then(|value| value.to_str().ok())
    .map(str::trim)
    .filter(|value| !value.is_empty())
    .map(str::to_string)
}

/// The `Idempotency-Key` header wins over a key sent in the body.
pub(crate) fn idempotency_key(req: &HttpRequest, body_key: Option<String>) -> Option<String> {
  header_value(req, IDEMPOTENCY_KEY_HEADER).or(body_key)
}
