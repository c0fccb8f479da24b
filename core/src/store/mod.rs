// quire/src/store/mod.rs

//! Persistence seam.
//!
//! A [`Store`] hands out [`UnitOfWork`] handles. A unit of work is one
//! database transaction: every `lock_*` read takes an exclusive row lock that
//! is held until [`UnitOfWork::commit`] or until the handle is dropped, which
//! rolls everything back. Components never open transactions on their own;
//! the caller passes the handle in, so the lock scope and the commit point are
//! visible where the operation is composed.
//!
//! Units of work must not be nested on one task: finish (commit or drop) the
//! current handle before beginning another.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{
  CompensationTask, IdempotencyScope, InventoryItem, KeyClaim, Order, OrderStatusEvent, Package, Payment, Subscription,
  SubscriptionPayment, SubscriptionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
  // --- catalog / inventory ---

  async fn lock_inventory_item(&mut self, item_id: i64) -> Result<Option<InventoryItem>>;

  /// Overwrites the stock counter of a row previously locked in this unit of work.
  async fn write_stock(&mut self, item_id: i64, stock_quantity: i32) -> Result<()>;

  async fn find_package(&mut self, package_id: i64) -> Result<Option<Package>>;

  // --- idempotency ---

  /// Claims `key` in `scope`. When another unit of work holds an uncommitted
  /// claim on the same key, this call waits for it to finish.
  async fn claim_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<KeyClaim>;

  async fn complete_idempotency_key(
    &mut self,
    scope: IdempotencyScope,
    key: &str,
    resource_id: &str,
    response: &JsonValue,
  ) -> Result<()>;

  async fn release_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<()>;

  // --- orders ---

  /// Fails with `DuplicateIdempotencyKey` when another order already carries
  /// the same idempotency key.
  async fn insert_order(&mut self, order: &Order) -> Result<()>;

  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>>;

  async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>>;

  async fn update_order(&mut self, order: &Order) -> Result<()>;

  async fn append_status_event(&mut self, event: &OrderStatusEvent) -> Result<()>;

  /// Oldest first.
  async fn status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>>;

  // --- payments ---

  async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

  async fn find_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>>;

  async fn lock_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>>;

  async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>>;

  // --- subscriptions ---

  async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()>;

  async fn find_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>>;

  async fn lock_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>>;

  async fn update_subscription(&mut self, subscription: &Subscription) -> Result<()>;

  async fn subscriptions_for_customer(&mut self, customer_id: Uuid) -> Result<Vec<Subscription>>;

  /// Auto-renewing active subscriptions ending at or before `cutoff` with
  /// fewer than `max_attempts` failed renewal attempts.
  async fn due_subscription_ids(&mut self, cutoff: DateTime<Utc>, max_attempts: i32) -> Result<Vec<Uuid>>;

  async fn subscription_ids_ended_before(
    &mut self,
    status: SubscriptionStatus,
    ended_before: DateTime<Utc>,
  ) -> Result<Vec<Uuid>>;

  async fn insert_subscription_payment(&mut self, payment: &SubscriptionPayment) -> Result<()>;

  async fn update_subscription_payment(&mut self, payment: &SubscriptionPayment) -> Result<()>;

  /// Oldest first.
  async fn subscription_payments(&mut self, subscription_id: Uuid) -> Result<Vec<SubscriptionPayment>>;

  // --- compensation queue ---

  async fn enqueue_compensation(&mut self, task: &CompensationTask) -> Result<()>;

  /// Pending tasks whose `next_attempt_at` has passed, locked, skipping rows
  /// another worker already holds.
  async fn due_compensations(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CompensationTask>>;

  async fn lock_compensation(&mut self, task_id: Uuid) -> Result<Option<CompensationTask>>;

  async fn update_compensation(&mut self, task: &CompensationTask) -> Result<()>;

  // --- lifecycle ---

  async fn commit(&mut self) -> Result<()>;
}
