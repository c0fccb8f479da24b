// quire/src/model/subscription.rs

use crate::model::status::{ChargeStatus, SubscriptionStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Automatic renewal attempts allowed per billing period before a
/// subscription drops to `pending_renewal`.
pub const MAX_RENEWAL_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
  pub id: Uuid,
  pub customer_id: Uuid,
  pub package_id: i64,
  pub status: SubscriptionStatus,
  pub start_date: DateTime<Utc>,
  pub end_date: DateTime<Utc>,
  pub next_billing_date: DateTime<Utc>,
  pub auto_renew: bool,
  pub payment_method: String,
  pub amount: Decimal,
  pub currency: String,
  pub billing_period_days: i32,
  pub renewal_attempts: i32,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub last_failure_reason: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Subscription {
  pub fn billing_period(&self) -> Duration {
    Duration::days(i64::from(self.billing_period_days))
  }

  /// Whether the automatic sweep should try to charge this subscription.
  pub fn is_due_for_renewal(&self, cutoff: DateTime<Utc>) -> bool {
    self.auto_renew
      && self.status == SubscriptionStatus::Active
      && self.end_date <= cutoff
      && self.renewal_attempts < MAX_RENEWAL_ATTEMPTS
  }

  /// Moves the paid-through window forward by one period starting at `from`.
  pub fn extend_from(&mut self, from: DateTime<Utc>) {
    self.end_date = from + self.billing_period();
    self.next_billing_date = self.end_date;
    self.renewal_attempts = 0;
    self.last_failure_reason = None;
  }
}

/// One charge attempt for one billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayment {
  pub id: Uuid,
  pub subscription_id: Uuid,
  pub idempotency_key: String,
  pub period_start: DateTime<Utc>,
  pub period_end: DateTime<Utc>,
  pub amount: Decimal,
  pub currency: String,
  pub status: ChargeStatus,
  pub provider_ref: Option<String>,
  pub failure_reason: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl SubscriptionPayment {
  pub fn pending(
    subscription: &Subscription,
    idempotency_key: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      subscription_id: subscription.id,
      idempotency_key,
      period_start,
      period_end,
      amount: subscription.amount,
      currency: subscription.currency.clone(),
      status: ChargeStatus::Pending,
      provider_ref: None,
      failure_reason: None,
      created_at: Utc::now(),
    }
  }

  pub fn settle_completed(&mut self, provider_ref: String) {
    self.status = ChargeStatus::Completed;
    self.provider_ref = Some(provider_ref);
  }

  /// The provider took the money but the period can no longer be granted.
  /// Recorded as completed with the refund reason alongside.
  pub fn settle_refund_required(&mut self, provider_ref: String, reason: String) {
    self.settle_completed(provider_ref);
    self.failure_reason = Some(reason);
  }

  pub fn refund_required(&self) -> bool {
    self.status == ChargeStatus::Completed && self.failure_reason.is_some()
  }

  pub fn settle_failed(&mut self, reason: String) {
    self.status = ChargeStatus::Failed;
    self.failure_reason = Some(reason);
  }
}
