// quire_server/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use quire::{ErrorKind, QuireError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("{source}")]
  Engine {
    #[from]
    source: QuireError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<QuireError>() {
      Ok(source) => AppError::Engine { source },
      Err(err) => AppError::Internal(err.to_string()),
    }
  }
}

impl AppError {
  /// Machine-readable code returned in the `error` field.
  pub fn code(&self) -> &'static str {
    match self {
      AppError::Validation(_) => "validation",
      AppError::Auth(_) => "invalid_signature",
      AppError::Engine { source } => source.kind().as_str(),
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Migrate(_) | AppError::Internal(_) => "internal",
    }
  }
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::Validation | ErrorKind::InvalidQuantity => StatusCode::BAD_REQUEST,
    ErrorKind::ItemNotFound | ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::InsufficientStock | ErrorKind::IllegalTransition | ErrorKind::IdempotencyConflict => {
      StatusCode::CONFLICT
    }
    ErrorKind::TotalMismatch => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorKind::InvalidSignature => StatusCode::UNAUTHORIZED,
    ErrorKind::Provider => StatusCode::BAD_GATEWAY,
    ErrorKind::Storage | ErrorKind::Configuration | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Engine { source } => status_for(source.kind()),
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Migrate(_) | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
      // Storage and internal details stay in the log.
      return HttpResponse::build(status).json(json!({
        "error": self.code(),
        "message": "An internal error occurred",
      }));
    }
    tracing::warn!(application_error = %self, status = status.as_u16(), "Responding with error");
    let mut body = json!({ "error": self.code(), "message": self.to_string() });
    if let AppError::Engine {
      source: QuireError::InsufficientStock {
        item_id,
        requested,
        available,
      },
    } = self
    {
      body["details"] = json!({ "item_id": item_id, "requested": requested, "available": available });
    }
    HttpResponse::build(status).json(body)
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal::Decimal;

  #[test]
  fn engine_errors_map_to_http_statuses() {
    let cases = [
      (QuireError::Validation("bad".into()), StatusCode::BAD_REQUEST),
      (QuireError::ItemNotFound { item_id: 1 }, StatusCode::NOT_FOUND),
      (
        QuireError::InsufficientStock {
          item_id: 1,
          requested: 2,
          available: 1,
        },
        StatusCode::CONFLICT,
      ),
      (
        QuireError::TotalMismatch {
          client: Decimal::ONE,
          server: Decimal::TWO,
        },
        StatusCode::UNPROCESSABLE_ENTITY,
      ),
      (QuireError::InvalidSignature, StatusCode::UNAUTHORIZED),
      (QuireError::Provider("down".into()), StatusCode::BAD_GATEWAY),
      (QuireError::storage(anyhow::anyhow!("db gone")), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (error, status) in cases {
      assert_eq!(AppError::from(error).status_code(), status);
    }
  }

  #[test]
  fn anyhow_wrapping_an_engine_error_keeps_its_kind() {
    let wrapped = anyhow::Error::new(QuireError::IdempotencyInProgress { key: "k".into() });
    let error = AppError::from(wrapped);
    assert_eq!(error.code(), "idempotency_conflict");
    assert_eq!(error.status_code(), StatusCode::CONFLICT);
  }
}
