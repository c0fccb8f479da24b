// quire/src/lib.rs

//! Quire: the order, payment and subscription consistency engine behind the
//! bookstore.
//!
//! Everything that changes money or stock runs inside a unit of work handed
//! out by a [`Store`]:
//!  - checkout turns a cart into an order, reserving stock and pricing every
//!    line from the rows it locked;
//!  - provider callbacks move payments through their status table exactly
//!    once, restoring stock when a payment fails;
//!  - subscriptions renew on a schedule with a bounded number of retries.
//!
//! Requests that span several concerns run as step [`pipeline`]s, driven
//! through the [`Platform`] facade.

pub mod charges;
pub mod compensation;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod inventory;
pub mod model;
pub mod orders;
pub mod payments;
pub mod pipeline;
pub mod platform;
pub mod pricing;
pub mod provider;
pub mod store;
pub mod subscriptions;
pub mod workflows;

pub use crate::charges::ChargeInitiator;
pub use crate::compensation::{CompensationQueue, CompensationReport};
pub use crate::config::EngineConfig;
pub use crate::error::{ErrorKind, QuireError, Result};
pub use crate::orders::{CartLine, CreateOrderRequest, OrderManager, OrderReceipt, OrderTracking, UpdateOrderStatus};
pub use crate::payments::{CallbackEvidence, InitializePayment, PaymentEngine, PaymentSession, ReconcileOutcome, Reconciliation};
pub use crate::pipeline::{ContextData, Pipeline, PipelineControl, PipelineResult, StepDef, Workflows};
pub use crate::platform::{Platform, Services};
pub use crate::provider::{
  CallbackEvent, ChargeReference, ChargeRequest, HmacSignatureVerifier, Initiation, InitiationStatus, Notifier,
  PaymentProvider,
};
pub use crate::store::{MemoryStore, Store, UnitOfWork};
pub use crate::subscriptions::{CreateSubscription, RenewalAttempt, SubscriptionService, SubscriptionView, SweepReport};
