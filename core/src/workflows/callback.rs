// quire/src/workflows/callback.rs

use crate::error::{QuireError, Result};
use crate::payments::{CallbackEvidence, ReconcileOutcome, Reconciliation};
use crate::pipeline::{ContextData, Pipeline, PipelineControl, StepDef};
use crate::platform::Services;
use crate::provider::CallbackEvent;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const VERIFY_SIGNATURE: &str = "verify_signature";
pub const PARSE_CALLBACK: &str = "parse_callback";
pub const RECONCILE_PAYMENT: &str = "reconcile_payment";
pub const NOTIFY_OUTCOME: &str = "notify_outcome";

#[derive(Debug, Clone)]
pub struct CallbackContext {
  pub payload: Vec<u8>,
  pub signature: String,
  pub event: Option<CallbackEvent>,
  pub reconciliation: Option<Reconciliation>,
  pub notified: bool,
}

impl CallbackContext {
  pub fn new(payload: impl Into<Vec<u8>>, signature: impl Into<String>) -> Self {
    Self {
      payload: payload.into(),
      signature: signature.into(),
      event: None,
      reconciliation: None,
      notified: false,
    }
  }

  pub fn reconciliation(&self) -> Result<Reconciliation> {
    self
      .reconciliation
      .clone()
      .ok_or_else(|| QuireError::Internal("callback finished without a reconciliation".to_string()))
  }
}

/// `verify_signature` -> `parse_callback` -> `reconcile_payment` ->
/// `notify_outcome` (optional, only when the payment actually changed and
/// no refund is owed).
pub fn callback_workflow(services: Arc<Services>) -> Result<Pipeline<CallbackContext>> {
  let mut pipeline = Pipeline::new(
    "payment_callback",
    vec![
      StepDef::required(VERIFY_SIGNATURE),
      StepDef::required(PARSE_CALLBACK),
      StepDef::required(RECONCILE_PAYMENT),
      StepDef::optional(NOTIFY_OUTCOME).skip_if(|ctx: &ContextData<CallbackContext>| {
        ctx
          .read()
          .reconciliation
          .as_ref()
          .map_or(true, |r| r.outcome != ReconcileOutcome::Applied || r.refund_required)
      }),
    ],
  );

  let s = services.clone();
  pipeline.on_step(VERIFY_SIGNATURE, move |ctx: ContextData<CallbackContext>| {
    let services = s.clone();
    async move {
      let guard = ctx.read();
      services.payments.verify_callback(&guard.payload, &guard.signature)?;
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  let s = services.clone();
  pipeline.on_step(PARSE_CALLBACK, move |ctx: ContextData<CallbackContext>| {
    let services = s.clone();
    async move {
      let event = services.payments.parse_callback(&ctx.read().payload)?;
      tracing::info!(transaction_id = %event.transaction_id, status = %event.status, "Callback parsed");
      ctx.write().event = Some(event);
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  let s = services.clone();
  pipeline.on_step(RECONCILE_PAYMENT, move |ctx: ContextData<CallbackContext>| {
    let services = s.clone();
    async move {
      let (event, evidence) = {
        let guard = ctx.read();
        let event = guard
          .event
          .clone()
          .ok_or_else(|| QuireError::Internal("callback reconciled before parsing".to_string()))?;
        let raw = serde_json::from_slice::<JsonValue>(&guard.payload).ok();
        (event, CallbackEvidence::verified(raw, guard.signature.clone()))
      };
      let reconciliation = services.payments.reconcile_or_defer(&event, evidence).await?;
      ctx.write().reconciliation = Some(reconciliation);
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  let s = services;
  pipeline.on_step(NOTIFY_OUTCOME, move |ctx: ContextData<CallbackContext>| {
    let services = s.clone();
    async move {
      let target = ctx
        .read()
        .reconciliation
        .as_ref()
        .and_then(|r| Some((r.order_id?, r.payment.clone()?)));
      if let Some((order_id, payment)) = target {
        match services.notifier.send_payment_status(order_id, &payment).await {
          Ok(()) => ctx.write().notified = true,
          Err(e) => tracing::warn!(%order_id, error = %e, "Payment status notification failed"),
        }
      }
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  Ok(pipeline)
}
