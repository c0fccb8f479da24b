// quire/src/model/records.rs

//! Bookkeeping rows that guard side effects: idempotency claims and queued
//! compensations.

use crate::model::status::{CompensationStatus, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Operation family an idempotency key belongs to. The same client key may be
/// reused across scopes without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyScope {
  Order,
  Payment,
  SubscriptionCreate,
  SubscriptionRenew,
  SubscriptionCancel,
}

impl IdempotencyScope {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Order => "order",
      Self::Payment => "payment",
      Self::SubscriptionCreate => "subscription_create",
      Self::SubscriptionRenew => "subscription_renew",
      Self::SubscriptionCancel => "subscription_cancel",
    }
  }
}

impl std::fmt::Display for IdempotencyScope {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
  pub scope: IdempotencyScope,
  pub key: String,
  pub resource_id: Option<String>,
  /// `None` while the guarded operation is still in flight.
  pub response: Option<JsonValue>,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Result of trying to claim a key inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyClaim {
  /// The key was free and is now held by this unit of work.
  Claimed,
  /// Another request claimed the key first.
  Existing(IdempotencyRecord),
}

/// A compensation that could not be applied inline and waits for a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationTask {
  pub id: Uuid,
  pub order_id: Option<Uuid>,
  pub transaction_id: String,
  pub target_status: PaymentStatus,
  pub provider_transaction_id: Option<String>,
  pub reason: String,
  pub attempts: i32,
  pub status: CompensationStatus,
  pub last_error: Option<String>,
  pub next_attempt_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
