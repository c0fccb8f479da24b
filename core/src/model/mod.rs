// quire/src/model/mod.rs

//! Entities persisted by the engine.

pub mod catalog;
pub mod order;
pub mod payment;
pub mod records;
pub mod status;
pub mod subscription;

pub use catalog::{InventoryItem, Package};
pub use order::{Address, CustomerInfo, ItemKind, LineItem, Order, OrderStatusEvent};
pub use payment::Payment;
pub use records::{CompensationTask, IdempotencyRecord, IdempotencyScope, KeyClaim};
pub use status::{
  ChargeStatus, CompensationStatus, OrderPaymentStatus, OrderStatus, PaymentStatus, StatusMachine, SubscriptionStatus,
};
pub use subscription::{Subscription, SubscriptionPayment, MAX_RENEWAL_ATTEMPTS};
