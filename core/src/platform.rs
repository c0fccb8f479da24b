// quire/src/platform.rs

//! Facade wiring the engine components to one store, one provider and one
//! notifier, with the request workflows registered.

use crate::charges::ChargeInitiator;
use crate::compensation::{CompensationQueue, CompensationReport};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::orders::{CreateOrderRequest, OrderManager, OrderReceipt};
use crate::payments::{PaymentEngine, Reconciliation};
use crate::pipeline::{ContextData, PipelineResult, Workflows};
use crate::provider::{Notifier, PaymentProvider};
use crate::store::Store;
use crate::subscriptions::{SubscriptionService, SweepReport};
use crate::workflows::{callback_workflow, checkout_workflow, CallbackContext, CheckoutContext};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Components shared by every workflow handler.
pub struct Services {
  pub config: Arc<EngineConfig>,
  pub orders: OrderManager,
  pub payments: PaymentEngine,
  pub subscriptions: SubscriptionService,
  pub compensations: CompensationQueue,
  pub notifier: Arc<dyn Notifier>,
}

pub struct Platform {
  services: Arc<Services>,
  workflows: Workflows,
}

impl Platform {
  pub fn new(
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
  ) -> Result<Self> {
    let config = Arc::new(config);
    let charges = ChargeInitiator::new(provider);
    let services = Arc::new(Services {
      orders: OrderManager::new(store.clone(), config.clone()),
      payments: PaymentEngine::new(store.clone(), charges.clone(), config.clone()),
      subscriptions: SubscriptionService::new(store.clone(), charges, config.clone()),
      compensations: CompensationQueue::new(store, config.clone()),
      notifier,
      config,
    });

    let workflows = Workflows::new();
    workflows.register(checkout_workflow(services.clone())?);
    workflows.register(callback_workflow(services.clone())?);
    tracing::info!("Platform initialized");

    Ok(Self { services, workflows })
  }

  pub fn services(&self) -> &Arc<Services> {
    &self.services
  }

  pub fn config(&self) -> &EngineConfig {
    &self.services.config
  }

  pub fn orders(&self) -> &OrderManager {
    &self.services.orders
  }

  pub fn payments(&self) -> &PaymentEngine {
    &self.services.payments
  }

  pub fn subscriptions(&self) -> &SubscriptionService {
    &self.services.subscriptions
  }

  pub fn workflows(&self) -> &Workflows {
    &self.workflows
  }

  /// Runs the checkout workflow: validation, the order transaction, then the
  /// confirmation for newly created orders.
  pub async fn checkout(&self, request: CreateOrderRequest) -> Result<OrderReceipt> {
    let ctx = ContextData::new(CheckoutContext::new(request));
    let result = self.workflows.run(ctx.clone()).await?;
    if result == PipelineResult::Stopped {
      tracing::warn!("Checkout workflow stopped early");
    }
    let receipt = ctx.read().receipt();
    receipt
  }

  /// Runs the payment callback workflow for one raw provider notification.
  pub async fn payment_callback(&self, payload: &[u8], signature: &str) -> Result<Reconciliation> {
    let ctx = ContextData::new(CallbackContext::new(payload, signature));
    self.workflows.run(ctx.clone()).await?;
    let reconciliation = ctx.read().reconciliation();
    reconciliation
  }

  pub async fn run_renewal_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
    self.services.subscriptions.run_renewal_sweep(now).await
  }

  pub async fn retry_compensations(&self, now: DateTime<Utc>) -> Result<CompensationReport> {
    self
      .services
      .compensations
      .retry_due(&self.services.payments, now)
      .await
  }
}
