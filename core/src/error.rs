// quire/src/error.rs
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable classification of a [`QuireError`], exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  InvalidQuantity,
  ItemNotFound,
  NotFound,
  InsufficientStock,
  TotalMismatch,
  IllegalTransition,
  IdempotencyConflict,
  InvalidSignature,
  Provider,
  Storage,
  Configuration,
  Internal,
}

impl ErrorKind {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Validation => "validation",
      Self::InvalidQuantity => "invalid_quantity",
      Self::ItemNotFound => "item_not_found",
      Self::NotFound => "not_found",
      Self::InsufficientStock => "insufficient_stock",
      Self::TotalMismatch => "total_mismatch",
      Self::IllegalTransition => "illegal_transition",
      Self::IdempotencyConflict => "idempotency_conflict",
      Self::InvalidSignature => "invalid_signature",
      Self::Provider => "provider",
      Self::Storage => "storage",
      Self::Configuration => "configuration",
      Self::Internal => "internal",
    }
  }

  /// Validation and conflict kinds are safe to show to callers verbatim.
  pub const fn is_client_facing(&self) -> bool {
    !matches!(self, Self::Storage | Self::Configuration | Self::Internal)
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum QuireError {
  #[error("Validation failed: {0}")]
  Validation(String),

  #[error("Invalid quantity {quantity} for item {item_id}: quantities must be positive")]
  InvalidQuantity { item_id: i64, quantity: i32 },

  #[error("Catalog item {item_id} not found")]
  ItemNotFound { item_id: i64 },

  #[error("{entity} '{id}' not found")]
  NotFound { entity: &'static str, id: String },

  #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
  InsufficientStock { item_id: i64, requested: i32, available: i32 },

  #[error("Total mismatch: client submitted {client}, server computed {server}")]
  TotalMismatch { client: Decimal, server: Decimal },

  #[error("Illegal {entity} transition from '{from}' to '{to}'")]
  IllegalTransition { entity: &'static str, from: String, to: String },

  #[error("Idempotency key '{key}' is still being processed by another request")]
  IdempotencyInProgress { key: String },

  /// A unique constraint rejected a concurrent claim of the same key. Callers
  /// fall back to fetching the winner's outcome.
  #[error("Idempotency key '{key}' was claimed by a concurrent request")]
  DuplicateIdempotencyKey { key: String },

  #[error("Webhook signature verification failed")]
  InvalidSignature,

  #[error("Payment provider error: {0}")]
  Provider(String),

  #[error("Storage error: {source}")]
  Storage {
    #[source]
    source: anyhow::Error,
  },

  #[error("Configuration error for step '{step_name}': {message}")]
  Pipeline { step_name: String, message: String },

  #[error("Internal error: {0}")]
  Internal(String),
}

impl QuireError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
      Self::ItemNotFound { .. } => ErrorKind::ItemNotFound,
      Self::NotFound { .. } => ErrorKind::NotFound,
      Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
      Self::TotalMismatch { .. } => ErrorKind::TotalMismatch,
      Self::IllegalTransition { .. } => ErrorKind::IllegalTransition,
      Self::IdempotencyInProgress { .. } | Self::DuplicateIdempotencyKey { .. } => ErrorKind::IdempotencyConflict,
      Self::InvalidSignature => ErrorKind::InvalidSignature,
      Self::Provider(_) => ErrorKind::Provider,
      Self::Storage { .. } => ErrorKind::Storage,
      Self::Pipeline { .. } => ErrorKind::Configuration,
      Self::Internal(_) => ErrorKind::Internal,
    }
  }

  pub fn storage(err: impl Into<anyhow::Error>) -> Self {
    Self::Storage { source: err.into() }
  }

  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    Self::NotFound {
      entity,
      id: id.to_string(),
    }
  }
}

impl From<validator::ValidationErrors> for QuireError {
  fn from(errors: validator::ValidationErrors) -> Self {
    QuireError::Validation(errors.to_string())
  }
}

pub type Result<T, E = QuireError> = std::result::Result<T, E>;
