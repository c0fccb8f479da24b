// quire/src/provider.rs

//! Collaborators the engine calls out to: the payment provider and the
//! customer notifier. Both are opaque; the engine only relies on the shapes
//! defined here.

use crate::model::{Order, Payment, PaymentStatus};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// What a charge pays for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargeReference {
  Order { order_id: Uuid, transaction_id: String },
  Subscription { subscription_id: Uuid, period_start: chrono::DateTime<chrono::Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
  pub reference: ChargeReference,
  pub method: String,
  pub amount: Decimal,
  pub currency: String,
  /// Forwarded so providers that support it can deduplicate on their side.
  pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiationStatus {
  /// The provider will report the outcome through a callback.
  Pending,
  Completed,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiation {
  pub provider_ref: String,
  /// Whatever the client needs to finish paying (redirect URL, bank details).
  pub instructions: Option<JsonValue>,
  pub status: InitiationStatus,
  pub failure_reason: Option<String>,
  pub raw: JsonValue,
}

/// A provider callback, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
  pub transaction_id: String,
  pub status: PaymentStatus,
  #[serde(default)]
  pub provider_transaction_id: Option<String>,
  #[serde(default)]
  pub failure_reason: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
  fn name(&self) -> &str;

  async fn initiate(&self, request: &ChargeRequest) -> anyhow::Result<Initiation>;

  fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

  fn parse_callback(&self, payload: &[u8]) -> anyhow::Result<CallbackEvent> {
    Ok(serde_json::from_slice(payload)?)
  }
}

/// Outbound customer messages. Failures are logged by the caller and never
/// affect the operation that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send_order_confirmation(&self, order: &Order) -> anyhow::Result<()>;

  async fn send_payment_status(&self, _order_id: Uuid, _payment: &Payment) -> anyhow::Result<()> {
    Ok(())
  }
}

/// HMAC-SHA256 over the raw payload, hex encoded.
#[derive(Clone)]
pub struct HmacSignatureVerifier {
  secret: Vec<u8>,
}

impl std::fmt::Debug for HmacSignatureVerifier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HmacSignatureVerifier").field("secret", &"<redacted>").finish()
  }
}

impl HmacSignatureVerifier {
  pub fn new(secret: impl AsRef<[u8]>) -> Self {
    Self {
      secret: secret.as_ref().to_vec(),
    }
  }

  fn mac(&self) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(&self.secret).ok()
  }

  pub fn sign(&self, payload: &[u8]) -> String {
    match self.mac() {
      Some(mut mac) => {
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
      }
      None => String::new(),
    }
  }

  /// Constant-time comparison of `signature` against the payload's MAC.
  pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
      return false;
    };
    let Some(mut mac) = self.mac() else {
      return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signature_round_trip_and_tamper_detection() {
    let verifier = HmacSignatureVerifier::new("whsec_test");
    let payload = br#"{"transaction_id":"TXN-1","status":"completed"}"#;
    let signature = verifier.sign(payload);

    assert_eq!(signature.len(), 64);
    assert!(verifier.verify(payload, &signature));
    assert!(!verifier.verify(b"{}", &signature));
    assert!(!verifier.verify(payload, "not-hex"));
    assert!(!HmacSignatureVerifier::new("other").verify(payload, &signature));
  }

  #[test]
  fn callback_payload_parses_with_optional_fields_missing() {
    struct Dummy;
    #[async_trait]
    impl PaymentProvider for Dummy {
      fn name(&self) -> &str {
        "dummy"
      }
      async fn initiate(&self, _request: &ChargeRequest) -> anyhow::Result<Initiation> {
        anyhow::bail!("unused")
      }
      fn verify_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        true
      }
    }

    let event = Dummy
      .parse_callback(br#"{"transaction_id":"TXN-9","status":"failed"}"#)
      .unwrap();
    assert_eq!(event.status, PaymentStatus::Failed);
    assert!(event.provider_transaction_id.is_none());
    assert!(Dummy.parse_callback(b"garbage").is_err());
  }
}
