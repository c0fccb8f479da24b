// quire/src/payments.rs

//! Payment reconciliation engine. Creates payments, applies provider callbacks
//! and keeps the owning order (and its stock reservation) in step.

use crate::charges::ChargeInitiator;
use crate::compensation;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, QuireError, Result};
use crate::idempotency::{self, Lookup};
use crate::inventory;
use crate::model::{
  CompensationStatus, CompensationTask, IdempotencyScope, Order, OrderPaymentStatus, OrderStatus, OrderStatusEvent,
  Payment, PaymentStatus, StatusMachine,
};
use crate::provider::{CallbackEvent, ChargeReference, ChargeRequest, Initiation, InitiationStatus};
use crate::store::{Store, UnitOfWork};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const PROVIDER_ACTOR: &str = "payment_provider";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializePayment {
  pub order_id: Uuid,
  pub method: String,
  pub amount: Decimal,
  pub currency: String,
  #[serde(default)]
  pub idempotency_key: Option<String>,
}

/// Response of a payment initiation; stored under its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
  pub transaction_id: String,
  pub order_id: Uuid,
  pub status: PaymentStatus,
  pub amount: Decimal,
  pub currency: String,
  pub provider_transaction_id: Option<String>,
  pub instructions: Option<JsonValue>,
  pub idempotency_key: String,
  #[serde(default)]
  pub existing: bool,
}

/// Proof attached to a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackEvidence {
  pub raw: Option<JsonValue>,
  pub signature: Option<String>,
  pub verified: bool,
}

impl CallbackEvidence {
  pub fn verified(raw: Option<JsonValue>, signature: impl Into<String>) -> Self {
    Self {
      raw,
      signature: Some(signature.into()),
      verified: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
  /// The payment moved to the reported status.
  Applied,
  /// The payment already had the reported status.
  Replayed,
  /// The transition is not allowed from the current status; acknowledged and dropped.
  Ignored,
  /// Applying failed and the event was queued for a retry.
  Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
  pub outcome: ReconcileOutcome,
  pub transaction_id: String,
  pub order_id: Option<Uuid>,
  pub previous_status: Option<PaymentStatus>,
  pub payment_status: PaymentStatus,
  pub order_status: Option<OrderStatus>,
  pub stock_released: bool,
  /// Money was captured for an order that had already been cancelled. The
  /// payment is recorded as completed and the order is left alone.
  #[serde(default)]
  pub refund_required: bool,
  #[serde(skip)]
  pub payment: Option<Payment>,
}

#[derive(Clone)]
pub struct PaymentEngine {
  store: Arc<dyn Store>,
  charges: ChargeInitiator,
  config: Arc<EngineConfig>,
}

impl PaymentEngine {
  pub fn new(store: Arc<dyn Store>, charges: ChargeInitiator, config: Arc<EngineConfig>) -> Self {
    Self { store, charges, config }
  }

  /// Creates a pending payment, asks the provider to start it and records the
  /// provider reference. The provider is called between two units of work so
  /// no row lock is held across the network call.
  #[instrument(name = "PaymentEngine::initialize_payment", skip(self, request), fields(order_id = %request.order_id), err)]
  pub async fn initialize_payment(&self, request: InitializePayment) -> Result<PaymentSession> {
    if request.amount <= Decimal::ZERO {
      return Err(QuireError::Validation("Payment amount must be positive".to_string()));
    }
    if request.method.trim().is_empty() {
      return Err(QuireError::Validation("Payment method is required".to_string()));
    }
    let key = idempotency::key_or_synthesize(request.idempotency_key.as_deref(), "payment")?;

    let payment = {
      let mut uow = self.store.begin().await?;
      if let Lookup::Existing(mut session) =
        idempotency::begin_or_fetch::<PaymentSession>(uow.as_mut(), IdempotencyScope::Payment, &key).await?
      {
        session.existing = true;
        return Ok(session);
      }

      let order = uow
        .lock_order(request.order_id)
        .await?
        .ok_or_else(|| QuireError::not_found("order", request.order_id))?;
      self.check_payable(uow.as_mut(), &order, &request).await?;

      let payment = Payment::new(
        order.id,
        request.method.trim(),
        request.amount,
        order.currency.clone(),
        Some(key.clone()),
      );
      uow.insert_payment(&payment).await?;
      uow.commit().await?;
      payment
    };
    tracing::info!(transaction_id = %payment.transaction_id, "Pending payment recorded");

    let charge = ChargeRequest {
      reference: ChargeReference::Order {
        order_id: payment.order_id,
        transaction_id: payment.transaction_id.clone(),
      },
      method: payment.method.clone(),
      amount: payment.amount,
      currency: payment.currency.clone(),
      idempotency_key: key.clone(),
    };

    match self.charges.charge(&charge).await {
      Ok(initiation) => self.record_initiation(&payment, &key, initiation).await,
      Err(e) => {
        self.record_initiation_failure(&payment, &key, &e).await?;
        Err(e)
      }
    }
  }

  async fn check_payable(&self, uow: &mut dyn UnitOfWork, order: &Order, request: &InitializePayment) -> Result<()> {
    if order.status != OrderStatus::Pending || order.payment_status != OrderPaymentStatus::Pending {
      return Err(QuireError::IllegalTransition {
        entity: "order",
        from: format!("{}/{}", order.status, order.payment_status),
        to: OrderStatus::Paid.to_string(),
      });
    }
    if !request.currency.eq_ignore_ascii_case(&order.currency) {
      return Err(QuireError::Validation(format!(
        "Payment currency {} does not match order currency {}",
        request.currency, order.currency
      )));
    }
    if (request.amount - order.total).abs() > self.config.total_tolerance {
      return Err(QuireError::TotalMismatch {
        client: request.amount,
        server: order.total,
      });
    }
    let open = uow
      .payments_for_order(order.id)
      .await?
      .into_iter()
      .find(|p| {
        matches!(
          p.status,
          PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Completed
        )
      });
    if let Some(open) = open {
      return Err(QuireError::IllegalTransition {
        entity: "payment",
        from: open.status.to_string(),
        to: PaymentStatus::Pending.to_string(),
      });
    }
    Ok(())
  }

  async fn record_initiation(&self, payment: &Payment, key: &str, initiation: Initiation) -> Result<PaymentSession> {
    let target = match initiation.status {
      InitiationStatus::Pending => PaymentStatus::Processing,
      InitiationStatus::Completed => PaymentStatus::Completed,
      InitiationStatus::Failed => PaymentStatus::Failed,
    };
    let event = CallbackEvent {
      transaction_id: payment.transaction_id.clone(),
      status: target,
      provider_transaction_id: Some(initiation.provider_ref.clone()),
      failure_reason: initiation.failure_reason.clone(),
    };
    let evidence = CallbackEvidence {
      raw: Some(initiation.raw.clone()),
      ..CallbackEvidence::default()
    };

    let mut uow = self.store.begin().await?;
    let applied = apply_event(uow.as_mut(), &event, &evidence).await?;
    let session = PaymentSession {
      transaction_id: payment.transaction_id.clone(),
      order_id: payment.order_id,
      status: applied.payment_status,
      amount: payment.amount,
      currency: payment.currency.clone(),
      provider_transaction_id: Some(initiation.provider_ref),
      instructions: initiation.instructions,
      idempotency_key: key.to_string(),
      existing: false,
    };
    idempotency::complete(
      uow.as_mut(),
      IdempotencyScope::Payment,
      key,
      &payment.transaction_id,
      &session,
    )
    .await?;
    uow.commit().await?;
    Ok(session)
  }

  async fn record_initiation_failure(&self, payment: &Payment, key: &str, error: &QuireError) -> Result<()> {
    let mut uow = self.store.begin().await?;
    if let Some(mut locked) = uow.lock_payment(&payment.transaction_id).await? {
      locked.status = locked.status.transition(PaymentStatus::Failed)?;
      locked.provider_response = Some(json!({ "error": error.to_string() }));
      locked.updated_at = Utc::now();
      uow.update_payment(&locked).await?;
    }
    idempotency::release(uow.as_mut(), IdempotencyScope::Payment, key).await?;
    uow.commit().await?;
    tracing::warn!(transaction_id = %payment.transaction_id, "Payment initiation failed, key released for retry");
    Ok(())
  }

  pub fn verify_callback(&self, payload: &[u8], signature: &str) -> Result<()> {
    if self.charges.provider().verify_signature(payload, signature) {
      Ok(())
    } else {
      tracing::warn!(provider = %self.charges.provider().name(), "Rejected callback with invalid signature");
      Err(QuireError::InvalidSignature)
    }
  }

  pub fn parse_callback(&self, payload: &[u8]) -> Result<CallbackEvent> {
    self
      .charges
      .provider()
      .parse_callback(payload)
      .map_err(|e| QuireError::Validation(format!("Unreadable callback payload: {}", e)))
  }

  /// Verifies, parses and applies one provider callback.
  #[instrument(name = "PaymentEngine::handle_callback", skip_all, err)]
  pub async fn handle_callback(&self, payload: &[u8], signature: &str) -> Result<Reconciliation> {
    self.verify_callback(payload, signature)?;
    let event = self.parse_callback(payload)?;
    let raw = serde_json::from_slice::<JsonValue>(payload).ok();
    self
      .reconcile_or_defer(&event, CallbackEvidence::verified(raw, signature))
      .await
  }

  /// Applies `event` in its own unit of work.
  #[instrument(
    name = "PaymentEngine::reconcile",
    skip(self, event, evidence),
    fields(transaction_id = %event.transaction_id, status = %event.status),
    err
  )]
  pub async fn reconcile(&self, event: &CallbackEvent, evidence: &CallbackEvidence) -> Result<Reconciliation> {
    let mut uow = self.store.begin().await?;
    let reconciliation = apply_event(uow.as_mut(), event, evidence).await?;
    if reconciliation.outcome == ReconcileOutcome::Applied {
      uow.commit().await?;
    }
    Ok(reconciliation)
  }

  /// Like [`reconcile`](Self::reconcile), but a failure event whose unit of
  /// work cannot commit is queued for a later retry instead of being lost.
  pub async fn reconcile_or_defer(&self, event: &CallbackEvent, evidence: CallbackEvidence) -> Result<Reconciliation> {
    let error = match self.reconcile(event, &evidence).await {
      Ok(reconciliation) => return Ok(reconciliation),
      Err(e) => e,
    };
    let retryable = matches!(error.kind(), ErrorKind::Storage | ErrorKind::Internal);
    if !retryable || !event.status.releases_reservation() {
      return Err(error);
    }

    tracing::error!(
      transaction_id = %event.transaction_id,
      error = %error,
      "Compensation failed, queueing it for retry"
    );
    let now = Utc::now();
    let task = CompensationTask {
      id: Uuid::new_v4(),
      order_id: None,
      transaction_id: event.transaction_id.clone(),
      target_status: event.status,
      provider_transaction_id: event.provider_transaction_id.clone(),
      reason: event
        .failure_reason
        .clone()
        .unwrap_or_else(|| format!("provider reported {}", event.status)),
      attempts: 0,
      status: CompensationStatus::Pending,
      last_error: Some(error.to_string()),
      next_attempt_at: now + self.config.compensation_backoff(0),
      created_at: now,
      updated_at: now,
    };

    let mut uow = self.store.begin().await?;
    compensation::enqueue(uow.as_mut(), &task).await?;
    uow.commit().await?;

    Ok(Reconciliation {
      outcome: ReconcileOutcome::Deferred,
      transaction_id: event.transaction_id.clone(),
      order_id: None,
      previous_status: None,
      payment_status: event.status,
      order_status: None,
      stock_released: false,
      refund_required: false,
      payment: None,
    })
  }

  #[instrument(name = "PaymentEngine::get_payment", skip(self), err)]
  pub async fn get_payment(&self, transaction_id: &str) -> Result<Payment> {
    let mut uow = self.store.begin().await?;
    uow
      .find_payment(transaction_id)
      .await?
      .ok_or_else(|| QuireError::not_found("payment", transaction_id))
  }
}

/// Steps 3 to 7 of callback handling, inside the caller's unit of work. Locks
/// the payment first and the order second.
async fn apply_event(
  uow: &mut dyn UnitOfWork,
  event: &CallbackEvent,
  evidence: &CallbackEvidence,
) -> Result<Reconciliation> {
  let mut payment = uow
    .lock_payment(&event.transaction_id)
    .await?
    .ok_or_else(|| QuireError::not_found("payment", &event.transaction_id))?;
  let previous = payment.status;

  let mut reconciliation = Reconciliation {
    outcome: ReconcileOutcome::Applied,
    transaction_id: payment.transaction_id.clone(),
    order_id: Some(payment.order_id),
    previous_status: Some(previous),
    payment_status: previous,
    order_status: None,
    stock_released: false,
    refund_required: false,
    payment: None,
  };

  if previous == event.status {
    tracing::info!(status = %previous, "Payment already in reported status, nothing to do");
    reconciliation.outcome = ReconcileOutcome::Replayed;
    return Ok(reconciliation);
  }
  if !previous.can_transition_to(event.status) {
    tracing::warn!(from = %previous, to = %event.status, "Ignoring callback with illegal payment transition");
    reconciliation.outcome = ReconcileOutcome::Ignored;
    return Ok(reconciliation);
  }

  payment.status = event.status;
  if event.provider_transaction_id.is_some() {
    payment.provider_transaction_id = event.provider_transaction_id.clone();
  }
  if evidence.raw.is_some() {
    payment.provider_response = evidence.raw.clone();
  }
  if evidence.signature.is_some() {
    payment.webhook_signature = evidence.signature.clone();
  }
  payment.webhook_verified |= evidence.verified;
  payment.updated_at = Utc::now();
  uow.update_payment(&payment).await?;

  let mut order = uow
    .lock_order(payment.order_id)
    .await?
    .ok_or_else(|| QuireError::not_found("order", payment.order_id))?;
  let order_before = order.status;

  if event.status == PaymentStatus::Completed && matches!(order.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
    tracing::error!(
      order_id = %order.id,
      order_status = %order.status,
      amount = %payment.amount,
      "Payment completed for an order that is no longer payable; refund required"
    );
    uow
      .append_status_event(&OrderStatusEvent::new(
        order.id,
        Some(order.status),
        order.status,
        Some(format!(
          "Payment {} completed after the order was {}; refund required",
          payment.transaction_id, order.status
        )),
        PROVIDER_ACTOR,
      ))
      .await?;
    reconciliation.refund_required = true;
    reconciliation.payment_status = payment.status;
    reconciliation.order_status = Some(order.status);
    reconciliation.payment = Some(payment);
    return Ok(reconciliation);
  }

  let (order_target, payment_state) = match event.status {
    PaymentStatus::Completed => (Some(OrderStatus::Paid), Some(OrderPaymentStatus::Paid)),
    PaymentStatus::Failed | PaymentStatus::Cancelled => (Some(OrderStatus::Cancelled), Some(OrderPaymentStatus::Failed)),
    PaymentStatus::Refunded => (Some(OrderStatus::Refunded), Some(OrderPaymentStatus::Refunded)),
    PaymentStatus::Pending | PaymentStatus::Processing => (None, None),
  };

  if let Some(state) = payment_state {
    order.payment_status = state;
  }
  if let Some(target) = order_target {
    if order.status.can_transition_to(target) {
      // Stock only goes back when the order itself is being cancelled.
      if target == OrderStatus::Cancelled {
        reconciliation.stock_released = inventory::release_order(uow, &mut order).await?;
      }
      order.status = target;
    } else if order.status != target {
      tracing::warn!(order_status = %order.status, wanted = %target, "Order status left unchanged by payment callback");
    }
  }
  order.updated_at = Utc::now();
  uow.update_order(&order).await?;

  if order.status != order_before {
    let note = event
      .failure_reason
      .clone()
      .unwrap_or_else(|| format!("Payment {} {}", payment.transaction_id, payment.status));
    uow
      .append_status_event(&OrderStatusEvent::new(
        order.id,
        Some(order_before),
        order.status,
        Some(note),
        PROVIDER_ACTOR,
      ))
      .await?;
  }

  tracing::info!(
    from = %previous,
    to = %payment.status,
    order_status = %order.status,
    stock_released = reconciliation.stock_released,
    "Payment reconciled"
  );
  reconciliation.payment_status = payment.status;
  reconciliation.order_status = Some(order.status);
  reconciliation.payment = Some(payment);
  Ok(reconciliation)
}
