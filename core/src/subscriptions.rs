// quire/src/subscriptions.rs

//! Subscription lifecycle: creation, manual renew and cancel, and the
//! scheduled renewal sweep with its bounded retry counter.

use crate::charges::ChargeInitiator;
use crate::config::EngineConfig;
use crate::error::{QuireError, Result};
use crate::idempotency::{self, Lookup};
use crate::model::{
  ChargeStatus, IdempotencyScope, Package, StatusMachine, Subscription, SubscriptionPayment, SubscriptionStatus,
  MAX_RENEWAL_ATTEMPTS,
};
use crate::provider::{ChargeReference, ChargeRequest, Initiation, InitiationStatus};
use crate::store::{Store, UnitOfWork};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const CANCELLED_BEFORE_SETTLEMENT: &str = "refund required: subscription was cancelled before the charge settled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscription {
  pub customer_id: Uuid,
  pub package_id: i64,
  pub payment_method: String,
  #[serde(default = "default_auto_renew")]
  pub auto_renew: bool,
  #[serde(default)]
  pub idempotency_key: Option<String>,
}

fn default_auto_renew() -> bool {
  true
}

/// A subscription with its charge history, oldest charge first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionView {
  pub subscription: Subscription,
  pub payments: Vec<SubscriptionPayment>,
  #[serde(default)]
  pub existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalAttempt {
  Renewed,
  /// The charge failed; `exhausted` is set when this was the last allowed try.
  Failed { exhausted: bool },
  /// No longer due once locked, or another sweep is already charging the period.
  Skipped,
  /// Charged, but the subscription was cancelled before the charge settled.
  RefundRequired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
  pub due: usize,
  pub renewed: usize,
  pub failed: usize,
  pub moved_to_pending_renewal: usize,
  pub suspended: usize,
  pub expired: usize,
  pub refunds_required: usize,
  pub errors: usize,
}

#[derive(Clone)]
pub struct SubscriptionService {
  store: Arc<dyn Store>,
  charges: ChargeInitiator,
  config: Arc<EngineConfig>,
}

fn charge_failure(initiation: &Initiation) -> Option<String> {
  (initiation.status == InitiationStatus::Failed).then(|| {
    initiation
      .failure_reason
      .clone()
      .unwrap_or_else(|| "charge declined by provider".to_string())
  })
}

impl SubscriptionService {
  pub fn new(store: Arc<dyn Store>, charges: ChargeInitiator, config: Arc<EngineConfig>) -> Self {
    Self { store, charges, config }
  }

  fn charge_request(&self, subscription: &Subscription, period_start: DateTime<Utc>, key: &str) -> ChargeRequest {
    ChargeRequest {
      reference: ChargeReference::Subscription {
        subscription_id: subscription.id,
        period_start,
      },
      method: subscription.payment_method.clone(),
      amount: subscription.amount,
      currency: subscription.currency.clone(),
      idempotency_key: key.to_string(),
    }
  }

  /// Charges the first period and persists an `active` subscription.
  #[instrument(name = "SubscriptionService::create", skip(self, request), fields(customer_id = %request.customer_id, package_id = request.package_id), err)]
  pub async fn create(&self, request: CreateSubscription) -> Result<SubscriptionView> {
    if request.payment_method.trim().is_empty() {
      return Err(QuireError::Validation("Payment method is required".to_string()));
    }
    let key = idempotency::key_or_synthesize(request.idempotency_key.as_deref(), "subscription")?;

    let package: Package = {
      let mut uow = self.store.begin().await?;
      if let Lookup::Existing(mut view) =
        idempotency::begin_or_fetch::<SubscriptionView>(uow.as_mut(), IdempotencyScope::SubscriptionCreate, &key)
          .await?
      {
        view.existing = true;
        return Ok(view);
      }
      let package = uow
        .find_package(request.package_id)
        .await?
        .filter(|p| p.active)
        .ok_or(QuireError::ItemNotFound {
          item_id: request.package_id,
        })?;
      if package.billing_period_days <= 0 || package.price <= Decimal::ZERO {
        return Err(QuireError::Validation(format!(
          "Package {} cannot be subscribed to",
          package.id
        )));
      }
      // The claim is committed so a concurrent duplicate sees it in flight
      // while the provider is being called.
      uow.commit().await?;
      package
    };

    let now = Utc::now();
    let mut subscription = Subscription {
      id: Uuid::new_v4(),
      customer_id: request.customer_id,
      package_id: package.id,
      status: SubscriptionStatus::Active,
      start_date: now,
      end_date: now,
      next_billing_date: now,
      auto_renew: request.auto_renew,
      payment_method: request.payment_method.trim().to_string(),
      amount: package.price,
      currency: self.config.currency.clone(),
      billing_period_days: package.billing_period_days,
      renewal_attempts: 0,
      last_attempt_at: Some(now),
      last_failure_reason: None,
      created_at: now,
      updated_at: now,
    };
    subscription.extend_from(now);
    let mut charge = SubscriptionPayment::pending(&subscription, key.clone(), now, subscription.end_date);

    let outcome = self
      .charges
      .charge(&self.charge_request(&subscription, now, &key))
      .await
      .and_then(|initiation| match charge_failure(&initiation) {
        Some(reason) => Err(QuireError::Provider(reason)),
        None => Ok(initiation),
      });

    let mut uow = self.store.begin().await?;
    let initiation = match outcome {
      Ok(initiation) => initiation,
      Err(e) => {
        idempotency::release(uow.as_mut(), IdempotencyScope::SubscriptionCreate, &key).await?;
        uow.commit().await?;
        return Err(e);
      }
    };

    charge.settle_completed(initiation.provider_ref);
    uow.insert_subscription(&subscription).await?;
    uow.insert_subscription_payment(&charge).await?;
    let view = SubscriptionView {
      subscription,
      payments: vec![charge],
      existing: false,
    };
    idempotency::complete(
      uow.as_mut(),
      IdempotencyScope::SubscriptionCreate,
      &key,
      &view.subscription.id.to_string(),
      &view,
    )
    .await?;
    uow.commit().await?;

    tracing::info!(subscription_id = %view.subscription.id, end_date = %view.subscription.end_date, "Subscription created");
    Ok(view)
  }

  /// Manual renewal. Pays one more period starting at the later of the
  /// current end date and now, and reactivates the subscription.
  #[instrument(name = "SubscriptionService::renew", skip(self, idempotency_key), err)]
  pub async fn renew(&self, subscription_id: Uuid, idempotency_key: Option<&str>) -> Result<SubscriptionView> {
    let key = idempotency::key_or_synthesize(idempotency_key, "renew")?;
    let now = Utc::now();

    let (subscription, mut charge) = {
      let mut uow = self.store.begin().await?;
      if let Lookup::Existing(mut view) =
        idempotency::begin_or_fetch::<SubscriptionView>(uow.as_mut(), IdempotencyScope::SubscriptionRenew, &key)
          .await?
      {
        view.existing = true;
        return Ok(view);
      }
      let mut subscription = uow
        .lock_subscription(subscription_id)
        .await?
        .ok_or_else(|| QuireError::not_found("subscription", subscription_id))?;
      if subscription.status == SubscriptionStatus::Cancelled {
        return Err(QuireError::IllegalTransition {
          entity: SubscriptionStatus::ENTITY,
          from: subscription.status.to_string(),
          to: SubscriptionStatus::Active.to_string(),
        });
      }

      let period_start = subscription.end_date.max(now);
      // A released key may be retried, so the charge row gets its own suffix.
      let charge = SubscriptionPayment::pending(
        &subscription,
        format!("manual:{}:{}", key, now.timestamp_millis()),
        period_start,
        period_start + subscription.billing_period(),
      );
      subscription.last_attempt_at = Some(now);
      subscription.updated_at = now;
      uow.update_subscription(&subscription).await?;
      uow.insert_subscription_payment(&charge).await?;
      uow.commit().await?;
      (subscription, charge)
    };

    let outcome = self
      .charges
      .charge(&self.charge_request(&subscription, charge.period_start, &key))
      .await
      .and_then(|initiation| match charge_failure(&initiation) {
        Some(reason) => Err(QuireError::Provider(reason)),
        None => Ok(initiation),
      });

    let mut uow = self.store.begin().await?;
    let mut locked = uow
      .lock_subscription(subscription_id)
      .await?
      .ok_or_else(|| QuireError::not_found("subscription", subscription_id))?;
    locked.updated_at = Utc::now();

    match outcome {
      Ok(initiation) if locked.status == SubscriptionStatus::Cancelled => {
        charge.settle_refund_required(initiation.provider_ref, CANCELLED_BEFORE_SETTLEMENT.to_string());
        tracing::error!(
          charge_id = %charge.id,
          amount = %charge.amount,
          "Manual renewal charged after the subscription was cancelled; refund required"
        );
        uow.update_subscription_payment(&charge).await?;
        idempotency::release(uow.as_mut(), IdempotencyScope::SubscriptionRenew, &key).await?;
        uow.commit().await?;
        Err(QuireError::IllegalTransition {
          entity: SubscriptionStatus::ENTITY,
          from: locked.status.to_string(),
          to: SubscriptionStatus::Active.to_string(),
        })
      }
      Ok(initiation) => {
        charge.settle_completed(initiation.provider_ref);
        locked.extend_from(charge.period_start);
        if locked.status != SubscriptionStatus::Active {
          locked.status = locked.status.transition(SubscriptionStatus::Active)?;
        }
        uow.update_subscription_payment(&charge).await?;
        uow.update_subscription(&locked).await?;
        let view = SubscriptionView {
          payments: uow.subscription_payments(subscription_id).await?,
          subscription: locked,
          existing: false,
        };
        idempotency::complete(
          uow.as_mut(),
          IdempotencyScope::SubscriptionRenew,
          &key,
          &subscription_id.to_string(),
          &view,
        )
        .await?;
        uow.commit().await?;
        tracing::info!(end_date = %view.subscription.end_date, "Subscription renewed manually");
        Ok(view)
      }
      Err(e) => {
        charge.settle_failed(e.to_string());
        locked.last_failure_reason = Some(e.to_string());
        uow.update_subscription_payment(&charge).await?;
        uow.update_subscription(&locked).await?;
        idempotency::release(uow.as_mut(), IdempotencyScope::SubscriptionRenew, &key).await?;
        uow.commit().await?;
        Err(e)
      }
    }
  }

  /// Cancels the subscription and turns auto-renew off. Cancelling an already
  /// cancelled subscription returns it unchanged.
  #[instrument(name = "SubscriptionService::cancel", skip(self, idempotency_key), err)]
  pub async fn cancel(&self, subscription_id: Uuid, idempotency_key: Option<&str>) -> Result<SubscriptionView> {
    let key = idempotency::key_or_synthesize(idempotency_key, "cancel")?;
    let mut uow = self.store.begin().await?;
    if let Lookup::Existing(mut view) =
      idempotency::begin_or_fetch::<SubscriptionView>(uow.as_mut(), IdempotencyScope::SubscriptionCancel, &key).await?
    {
      view.existing = true;
      return Ok(view);
    }
    let mut subscription = uow
      .lock_subscription(subscription_id)
      .await?
      .ok_or_else(|| QuireError::not_found("subscription", subscription_id))?;

    let existing = subscription.status == SubscriptionStatus::Cancelled;
    if !existing {
      subscription.status = subscription.status.transition(SubscriptionStatus::Cancelled)?;
      subscription.auto_renew = false;
      subscription.updated_at = Utc::now();
      uow.update_subscription(&subscription).await?;
    }
    let view = SubscriptionView {
      payments: uow.subscription_payments(subscription_id).await?,
      subscription,
      existing,
    };
    idempotency::complete(
      uow.as_mut(),
      IdempotencyScope::SubscriptionCancel,
      &key,
      &subscription_id.to_string(),
      &view,
    )
    .await?;
    uow.commit().await?;
    tracing::info!(already_cancelled = existing, "Subscription cancelled");
    Ok(view)
  }

  pub async fn list(&self, customer_id: Uuid) -> Result<Vec<Subscription>> {
    let mut uow = self.store.begin().await?;
    uow.subscriptions_for_customer(customer_id).await
  }

  pub async fn status(&self, subscription_id: Uuid) -> Result<SubscriptionView> {
    let mut uow = self.store.begin().await?;
    let subscription = uow
      .find_subscription(subscription_id)
      .await?
      .ok_or_else(|| QuireError::not_found("subscription", subscription_id))?;
    Ok(SubscriptionView {
      payments: uow.subscription_payments(subscription_id).await?,
      subscription,
      existing: false,
    })
  }

  /// One pass of the scheduled job. Each subscription is handled in its own
  /// units of work; an error on one is logged and the sweep moves on.
  #[instrument(name = "SubscriptionService::run_renewal_sweep", skip(self), err)]
  pub async fn run_renewal_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
    let (due, overdue, lapsed) = {
      let mut uow = self.store.begin().await?;
      let due = uow
        .due_subscription_ids(now + self.config.renewal_lookahead, MAX_RENEWAL_ATTEMPTS)
        .await?;
      let overdue = uow
        .subscription_ids_ended_before(SubscriptionStatus::PendingRenewal, now - self.config.renewal_grace)
        .await?;
      let lapsed = uow
        .subscription_ids_ended_before(SubscriptionStatus::Active, now)
        .await?;
      (due, overdue, lapsed)
    };

    let mut report = SweepReport {
      due: due.len(),
      ..SweepReport::default()
    };

    for id in due {
      match self.attempt_renewal(id, now).await {
        Ok(RenewalAttempt::Renewed) => report.renewed += 1,
        Ok(RenewalAttempt::Failed { exhausted }) => {
          report.failed += 1;
          if exhausted {
            report.moved_to_pending_renewal += 1;
          }
        }
        Ok(RenewalAttempt::RefundRequired) => report.refunds_required += 1,
        Ok(RenewalAttempt::Skipped) => {}
        Err(e) => {
          report.errors += 1;
          tracing::error!(subscription_id = %id, error = %e, "Renewal attempt errored");
        }
      }
    }

    for id in overdue {
      match self.suspend_if_overdue(id, now).await {
        Ok(true) => report.suspended += 1,
        Ok(false) => {}
        Err(e) => {
          report.errors += 1;
          tracing::error!(subscription_id = %id, error = %e, "Suspension failed");
        }
      }
    }

    for id in lapsed {
      match self.expire_if_lapsed(id, now).await {
        Ok(true) => report.expired += 1,
        Ok(false) => {}
        Err(e) => {
          report.errors += 1;
          tracing::error!(subscription_id = %id, error = %e, "Expiry failed");
        }
      }
    }

    tracing::info!(?report, "Renewal sweep finished");
    Ok(report)
  }

  /// One automatic renewal attempt: count it, charge outside any unit of
  /// work, then settle.
  #[instrument(name = "SubscriptionService::attempt_renewal", skip(self), err)]
  pub async fn attempt_renewal(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<RenewalAttempt> {
    let (subscription, mut charge) = {
      let mut uow = self.store.begin().await?;
      let Some(mut subscription) = uow.lock_subscription(subscription_id).await? else {
        return Ok(RenewalAttempt::Skipped);
      };
      if !subscription.is_due_for_renewal(now + self.config.renewal_lookahead) {
        return Ok(RenewalAttempt::Skipped);
      }
      if self.period_in_flight(uow.as_mut(), &subscription, now).await? {
        tracing::info!(%subscription_id, "Renewal charge for this period already in flight, skipping");
        return Ok(RenewalAttempt::Skipped);
      }
      subscription.renewal_attempts += 1;
      subscription.last_attempt_at = Some(now);
      subscription.updated_at = now;

      let period_start = subscription.end_date;
      let key = format!(
        "renewal:{}:{}:{}",
        subscription.id,
        period_start.date_naive(),
        subscription.renewal_attempts
      );
      let charge = SubscriptionPayment::pending(
        &subscription,
        key,
        period_start,
        period_start + subscription.billing_period(),
      );
      uow.update_subscription(&subscription).await?;
      uow.insert_subscription_payment(&charge).await?;
      uow.commit().await?;
      (subscription, charge)
    };

    let outcome = self
      .charges
      .charge(&self.charge_request(&subscription, charge.period_start, &charge.idempotency_key))
      .await
      .and_then(|initiation| match charge_failure(&initiation) {
        Some(reason) => Err(QuireError::Provider(reason)),
        None => Ok(initiation),
      });

    let mut uow = self.store.begin().await?;
    let mut locked = uow
      .lock_subscription(subscription_id)
      .await?
      .ok_or_else(|| QuireError::not_found("subscription", subscription_id))?;
    locked.updated_at = Utc::now();

    let attempt = match outcome {
      Ok(initiation) if locked.status == SubscriptionStatus::Cancelled => {
        charge.settle_refund_required(initiation.provider_ref, CANCELLED_BEFORE_SETTLEMENT.to_string());
        tracing::error!(
          charge_id = %charge.id,
          amount = %charge.amount,
          "Renewal charged after the subscription was cancelled; refund required"
        );
        RenewalAttempt::RefundRequired
      }
      Ok(initiation) => {
        charge.settle_completed(initiation.provider_ref);
        locked.extend_from(charge.period_start);
        tracing::info!(end_date = %locked.end_date, "Subscription renewed");
        RenewalAttempt::Renewed
      }
      Err(e) => {
        charge.settle_failed(e.to_string());
        locked.last_failure_reason = Some(e.to_string());
        let exhausted = locked.renewal_attempts >= MAX_RENEWAL_ATTEMPTS;
        if exhausted && locked.status.can_transition_to(SubscriptionStatus::PendingRenewal) {
          locked.status = SubscriptionStatus::PendingRenewal;
        }
        tracing::warn!(
          attempts = locked.renewal_attempts,
          exhausted,
          error = %e,
          "Renewal charge failed"
        );
        RenewalAttempt::Failed { exhausted }
      }
    };
    uow.update_subscription_payment(&charge).await?;
    uow.update_subscription(&locked).await?;
    uow.commit().await?;
    Ok(attempt)
  }

  /// True when another attempt holds an unsettled charge for the period
  /// starting at `end_date` and its lease has not run out. Unsettled charges
  /// whose lease expired are marked failed so the period can be retried.
  async fn period_in_flight(
    &self,
    uow: &mut dyn UnitOfWork,
    subscription: &Subscription,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let lease_held = subscription
      .last_attempt_at
      .is_some_and(|at| at > now - self.config.renewal_lease);
    let unsettled = uow
      .subscription_payments(subscription.id)
      .await?
      .into_iter()
      .filter(|charge| charge.status == ChargeStatus::Pending && charge.period_start >= subscription.end_date);
    let mut in_flight = false;
    for mut charge in unsettled {
      if lease_held {
        in_flight = true;
        continue;
      }
      tracing::warn!(charge_id = %charge.id, key = %charge.idempotency_key, "Abandoning renewal charge left unsettled past its lease");
      charge.settle_failed("abandoned: not settled within the renewal lease".to_string());
      uow.update_subscription_payment(&charge).await?;
    }
    Ok(in_flight)
  }

  async fn suspend_if_overdue(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let mut uow = self.store.begin().await?;
    let Some(mut subscription) = uow.lock_subscription(subscription_id).await? else {
      return Ok(false);
    };
    if subscription.status != SubscriptionStatus::PendingRenewal
      || subscription.end_date >= now - self.config.renewal_grace
    {
      return Ok(false);
    }
    subscription.status = subscription.status.transition(SubscriptionStatus::Suspended)?;
    subscription.updated_at = now;
    uow.update_subscription(&subscription).await?;
    uow.commit().await?;
    tracing::info!(%subscription_id, "Subscription suspended after grace period");
    Ok(true)
  }

  async fn expire_if_lapsed(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let mut uow = self.store.begin().await?;
    let Some(mut subscription) = uow.lock_subscription(subscription_id).await? else {
      return Ok(false);
    };
    if subscription.status != SubscriptionStatus::Active || subscription.auto_renew || subscription.end_date >= now {
      return Ok(false);
    }
    subscription.status = subscription.status.transition(SubscriptionStatus::Expired)?;
    subscription.updated_at = now;
    uow.update_subscription(&subscription).await?;
    uow.commit().await?;
    tracing::info!(%subscription_id, "Subscription expired");
    Ok(true)
  }
}
