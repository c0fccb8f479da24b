// quire/src/workflows/checkout.rs

use crate::error::{QuireError, Result};
use crate::orders::{CreateOrderRequest, OrderReceipt, Placement};
use crate::pipeline::{ContextData, Pipeline, PipelineControl, StepDef};
use crate::platform::Services;
use std::sync::Arc;

pub const VALIDATE_CART: &str = "validate_cart";
pub const COMMIT_ORDER: &str = "commit_order";
pub const SEND_CONFIRMATION: &str = "send_confirmation";

#[derive(Debug, Clone)]
pub struct CheckoutContext {
  pub request: CreateOrderRequest,
  pub placement: Option<Placement>,
  pub confirmation_sent: bool,
}

impl CheckoutContext {
  pub fn new(request: CreateOrderRequest) -> Self {
    Self {
      request,
      placement: None,
      confirmation_sent: false,
    }
  }

  pub fn receipt(&self) -> Result<OrderReceipt> {
    self
      .placement
      .as_ref()
      .map(|p| p.receipt.clone())
      .ok_or_else(|| QuireError::Internal("checkout finished without an order".to_string()))
  }
}

/// `validate_cart` -> `commit_order` -> `send_confirmation` (optional, only
/// for orders created by this run).
pub fn checkout_workflow(services: Arc<Services>) -> Result<Pipeline<CheckoutContext>> {
  let mut pipeline = Pipeline::new(
    "checkout",
    vec![
      StepDef::required(VALIDATE_CART),
      StepDef::required(COMMIT_ORDER),
      StepDef::optional(SEND_CONFIRMATION).skip_if(|ctx: &ContextData<CheckoutContext>| {
        ctx
          .read()
          .placement
          .as_ref()
          .map_or(true, |placement| placement.order.is_none())
      }),
    ],
  );

  let s = services.clone();
  pipeline.on_step(VALIDATE_CART, move |ctx: ContextData<CheckoutContext>| {
    let services = s.clone();
    async move {
      services.orders.validate_request(&ctx.read().request)?;
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  let s = services.clone();
  pipeline.on_step(COMMIT_ORDER, move |ctx: ContextData<CheckoutContext>| {
    let services = s.clone();
    async move {
      let request = ctx.read().request.clone();
      let placement = services.orders.place_order(&request).await?;
      ctx.write().placement = Some(placement);
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  let s = services;
  pipeline.on_step(SEND_CONFIRMATION, move |ctx: ContextData<CheckoutContext>| {
    let services = s.clone();
    async move {
      let order = ctx.read().placement.as_ref().and_then(|p| p.order.clone());
      let Some(order) = order else {
        return Ok::<_, QuireError>(PipelineControl::Continue);
      };
      match services.notifier.send_order_confirmation(&order).await {
        Ok(()) => ctx.write().confirmation_sent = true,
        Err(e) => tracing::warn!(order_id = %order.id, error = %e, "Order confirmation could not be sent"),
      }
      Ok::<_, QuireError>(PipelineControl::Continue)
    }
  })?;

  Ok(pipeline)
}
