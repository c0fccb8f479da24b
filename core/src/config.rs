// quire/src/config.rs

use crate::pricing::{ShippingPolicy, TaxPolicy, MONEY_TOLERANCE};
use chrono::Duration;
use rust_decimal::Decimal;

/// Business rules the engine runs with. The server builds one from its
/// environment; tests usually start from `EngineConfig::default()`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// ISO-4217 code every catalog price is stored in.
  pub currency: String,
  /// Largest accepted gap between a client-submitted and a computed total.
  pub total_tolerance: Decimal,
  pub shipping: ShippingPolicy,
  pub tax: TaxPolicy,
  /// How far ahead of `end_date` the renewal sweep starts charging.
  pub renewal_lookahead: Duration,
  /// How long a `pending_renewal` subscription may stay past its end date
  /// before it is suspended.
  pub renewal_grace: Duration,
  /// How long an unsettled renewal charge keeps other sweeps off its period.
  pub renewal_lease: Duration,
  pub max_compensation_attempts: i32,
  pub compensation_base_backoff: Duration,
  pub compensation_max_backoff: Duration,
  /// Lease taken on a queued compensation while a worker retries it.
  pub compensation_lease: Duration,
  pub compensation_batch_size: i64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      currency: "USD".to_string(),
      total_tolerance: MONEY_TOLERANCE,
      shipping: ShippingPolicy::ClientFlat,
      tax: TaxPolicy::ClientFlat,
      renewal_lookahead: Duration::days(3),
      renewal_grace: Duration::days(7),
      renewal_lease: Duration::minutes(15),
      max_compensation_attempts: 5,
      compensation_base_backoff: Duration::seconds(30),
      compensation_max_backoff: Duration::hours(1),
      compensation_lease: Duration::minutes(5),
      compensation_batch_size: 50,
    }
  }
}

impl EngineConfig {
  /// Delay before retry number `attempts` of a queued compensation.
  pub fn compensation_backoff(&self, attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 16) as u32;
    let delay = self.compensation_base_backoff * 2_i32.pow(exponent);
    delay.min(self.compensation_max_backoff)
  }
}
