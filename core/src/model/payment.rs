// quire/src/model/payment.rs

use crate::model::status::PaymentStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  /// Our own unique reference, echoed back by the provider in callbacks.
  pub transaction_id: String,
  pub idempotency_key: Option<String>,
  pub order_id: Uuid,
  pub method: String,
  pub amount: Decimal,
  pub currency: String,
  pub status: PaymentStatus,
  pub provider_transaction_id: Option<String>,
  pub provider_response: Option<JsonValue>,
  pub webhook_verified: bool,
  pub webhook_signature: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Payment {
  pub fn new(
    order_id: Uuid,
    method: impl Into<String>,
    amount: Decimal,
    currency: impl Into<String>,
    idempotency_key: Option<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      transaction_id: Self::new_transaction_id(),
      idempotency_key,
      order_id,
      method: method.into(),
      amount,
      currency: currency.into(),
      status: PaymentStatus::Pending,
      provider_transaction_id: None,
      provider_response: None,
      webhook_verified: false,
      webhook_signature: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4().simple().to_string().to_uppercase())
  }
}
