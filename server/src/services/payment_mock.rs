// quire_server/src/services/payment_mock.rs

//! A stand-in payment provider for local runs and tests.
//!
//! Order charges come back `pending` with client instructions and settle
//! through a signed callback. Subscription charges settle synchronously.
//! Any amount whose cents end in `123` (e.g. 1.23, 11.23) is declined.

use async_trait::async_trait;
use quire::{ChargeReference, ChargeRequest, HmacSignatureVerifier, Initiation, InitiationStatus, PaymentProvider};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MockPaymentProvider {
  verifier: HmacSignatureVerifier,
  latency: Duration,
}

impl MockPaymentProvider {
  pub fn new(webhook_secret: &str) -> Self {
    Self {
      verifier: HmacSignatureVerifier::new(webhook_secret),
      latency: Duration::from_millis(50),
    }
  }

  #[cfg(test)]
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Signs a callback body the way the provider would.
  #[cfg(test)]
  pub fn sign(&self, payload: &[u8]) -> String {
    self.verifier.sign(payload)
  }
}

fn declined(amount: Decimal) -> bool {
  (amount * Decimal::ONE_HUNDRED)
    .trunc()
    .to_i64()
    .is_some_and(|cents| cents % 1000 == 123)
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
  fn name(&self) -> &str {
    "mock"
  }

  #[instrument(name = "MockPaymentProvider::initiate", skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
  async fn initiate(&self, request: &ChargeRequest) -> anyhow::Result<Initiation> {
    if request.amount <= Decimal::ZERO {
      anyhow::bail!("Amount must be greater than zero");
    }
    tokio::time::sleep(self.latency).await;

    let provider_ref = format!("mock_pi_{}", Uuid::new_v4());
    if declined(request.amount) {
      info!(%provider_ref, "Mock charge declined");
      return Ok(Initiation {
        provider_ref: provider_ref.clone(),
        instructions: None,
        status: InitiationStatus::Failed,
        failure_reason: Some("card_declined".to_string()),
        raw: json!({ "id": provider_ref, "status": "failed", "decline_code": "card_declined" }),
      });
    }

    let initiation = match &request.reference {
      ChargeReference::Order { transaction_id, .. } => {
        let client_secret = format!("{}_secret_{}", provider_ref, Uuid::new_v4().simple());
        Initiation {
          provider_ref: provider_ref.clone(),
          instructions: Some(json!({
            "client_secret": client_secret,
            "redirect_url": format!("https://pay.mock.test/checkout/{}", transaction_id),
          })),
          status: InitiationStatus::Pending,
          failure_reason: None,
          raw: json!({ "id": provider_ref, "status": "requires_action", "method": request.method }),
        }
      }
      ChargeReference::Subscription { .. } => Initiation {
        provider_ref: provider_ref.clone(),
        instructions: None,
        status: InitiationStatus::Completed,
        failure_reason: None,
        raw: json!({ "id": provider_ref, "status": "succeeded", "method": request.method }),
      },
    };
    info!(%provider_ref, status = ?initiation.status, "Mock charge initiated");
    Ok(initiation)
  }

  fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
    self.verifier.verify(payload, signature)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn request(reference: ChargeReference, amount: Decimal) -> ChargeRequest {
    ChargeRequest {
      reference,
      method: "card".to_string(),
      amount,
      currency: "USD".to_string(),
      idempotency_key: "k-1".to_string(),
    }
  }

  fn provider() -> MockPaymentProvider {
    MockPaymentProvider::new("secret").with_latency(Duration::ZERO)
  }

  #[tokio::test]
  async fn order_charges_wait_for_a_callback() {
    let reference = ChargeReference::Order {
      order_id: Uuid::new_v4(),
      transaction_id: "txn-1".to_string(),
    };
    let initiation = provider().initiate(&request(reference, Decimal::new(2650, 2))).await.unwrap();
    assert_eq!(initiation.status, InitiationStatus::Pending);
    assert!(initiation.instructions.unwrap()["client_secret"].is_string());
  }

  #[tokio::test]
  async fn subscription_charges_settle_immediately_unless_declined() {
    let reference = ChargeReference::Subscription {
      subscription_id: Uuid::new_v4(),
      period_start: Utc::now(),
    };
    let ok = provider().initiate(&request(reference.clone(), Decimal::new(999, 2))).await.unwrap();
    assert_eq!(ok.status, InitiationStatus::Completed);

    let declined = provider().initiate(&request(reference, Decimal::new(1123, 2))).await.unwrap();
    assert_eq!(declined.status, InitiationStatus::Failed);
    assert_eq!(declined.failure_reason.as_deref(), Some("card_declined"));
  }

  #[tokio::test]
  async fn zero_amount_is_an_error() {
    let reference = ChargeReference::Subscription {
      subscription_id: Uuid::new_v4(),
      period_start: Utc::now(),
    };
    assert!(provider().initiate(&request(reference, Decimal::ZERO)).await.is_err());
  }

  #[test]
  fn signatures_round_trip_through_the_verifier() {
    let provider = provider();
    let signature = provider.sign(b"{}");
    assert!(provider.verify_signature(b"{}", &signature));
    assert!(!provider.verify_signature(b"{ }", &signature));
  }
}
