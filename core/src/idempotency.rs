// quire/src/idempotency.rs

//! Idempotency registry: maps a client key to the stored outcome of the first
//! request that carried it.

use crate::error::{QuireError, Result};
use crate::model::{IdempotencyScope, KeyClaim};
use crate::store::UnitOfWork;
use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

const MAX_KEY_LEN: usize = 128;

/// Outcome of [`begin_or_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
  /// The key is now held by the caller's unit of work.
  Proceed,
  /// A previous request already completed under this key.
  Existing(T),
}

/// Claims `key` or returns the response stored by the request that owns it.
///
/// A key claimed but never completed (its owner is still running, or crashed
/// after committing a claim) reports [`QuireError::IdempotencyInProgress`].
#[instrument(name = "Idempotency::begin_or_fetch", skip(uow), err)]
pub async fn begin_or_fetch<T: DeserializeOwned>(
  uow: &mut dyn UnitOfWork,
  scope: IdempotencyScope,
  key: &str,
) -> Result<Lookup<T>> {
  match uow.claim_idempotency_key(scope, key).await? {
    KeyClaim::Claimed => Ok(Lookup::Proceed),
    KeyClaim::Existing(record) => {
      let response = record.response.ok_or_else(|| QuireError::IdempotencyInProgress {
        key: key.to_string(),
      })?;
      let stored = serde_json::from_value(response)
        .map_err(|e| QuireError::Internal(format!("stored response for key '{}' is unreadable: {}", key, e)))?;
      tracing::info!("Idempotency key already completed, returning stored response");
      Ok(Lookup::Existing(stored))
    }
  }
}

/// Records the outcome under `key`. Must run in the same unit of work as the
/// side effects it describes.
#[instrument(name = "Idempotency::complete", skip(uow, response), err)]
pub async fn complete<T: Serialize>(
  uow: &mut dyn UnitOfWork,
  scope: IdempotencyScope,
  key: &str,
  resource_id: &str,
  response: &T,
) -> Result<()> {
  let value = serde_json::to_value(response)
    .map_err(|e| QuireError::Internal(format!("cannot serialize response for key '{}': {}", key, e)))?;
  uow.complete_idempotency_key(scope, key, resource_id, &value).await
}

/// Forgets a claim so a client retry runs the operation again.
#[instrument(name = "Idempotency::release", skip(uow), err)]
pub async fn release(uow: &mut dyn UnitOfWork, scope: IdempotencyScope, key: &str) -> Result<()> {
  uow.release_idempotency_key(scope, key).await
}

/// Key for callers that did not send one: `{prefix}-{unix_millis}-{random}`.
pub fn synthesize_key(prefix: &str) -> String {
  let suffix: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
  format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// Trims a client key and rejects empty or oversized ones.
pub fn normalize_key(raw: &str) -> Result<String> {
  let key = raw.trim();
  if key.is_empty() {
    return Err(QuireError::Validation("Idempotency key must not be empty".to_string()));
  }
  if key.len() > MAX_KEY_LEN {
    return Err(QuireError::Validation(format!(
      "Idempotency key must be at most {} characters",
      MAX_KEY_LEN
    )));
  }
  Ok(key.to_string())
}

/// Uses the client key when present, otherwise synthesizes one.
pub fn key_or_synthesize(client_key: Option<&str>, prefix: &str) -> Result<String> {
  match client_key {
    Some(raw) => normalize_key(raw),
    None => Ok(synthesize_key(prefix)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn synthesized_keys_are_prefix_millis_and_six_digits() {
    let before = Utc::now().timestamp_millis();
    let key = synthesize_key("order");
    let after = Utc::now().timestamp_millis();

    let parts: Vec<&str> = key.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "order");
    let millis: i64 = parts[1].parse().unwrap();
    assert!((before..=after).contains(&millis));
    assert_eq!(parts[2].len(), 6);
    let suffix: u32 = parts[2].parse().unwrap();
    assert!((100_000..1_000_000).contains(&suffix));
  }

  #[test]
  fn client_keys_are_trimmed_and_bounded() {
    assert_eq!(normalize_key("  abc ").unwrap(), "abc");
    assert!(normalize_key("   ").is_err());
    assert!(normalize_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
  }
}
