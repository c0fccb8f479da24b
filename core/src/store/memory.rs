// quire/src/store/memory.rs

//! In-process [`Store`] used by tests and local development.
//!
//! Units of work are serializable: beginning one takes the single state lock
//! and snapshots the state, committing keeps the changes, dropping without a
//! commit restores the snapshot. The state lock plays the role the row locks
//! play in Postgres, only with table-wide granularity.

use crate::error::{QuireError, Result};
use crate::model::{
  CompensationStatus, CompensationTask, IdempotencyRecord, IdempotencyScope, InventoryItem, KeyClaim, Order,
  OrderStatusEvent, Package, Payment, Subscription, SubscriptionPayment, SubscriptionStatus,
};
use crate::store::{Store, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
  inventory: HashMap<i64, InventoryItem>,
  packages: HashMap<i64, Package>,
  idempotency: HashMap<(IdempotencyScope, String), IdempotencyRecord>,
  orders: HashMap<Uuid, Order>,
  order_keys: HashMap<String, Uuid>,
  status_events: Vec<OrderStatusEvent>,
  payments: HashMap<String, Payment>,
  subscriptions: HashMap<Uuid, Subscription>,
  subscription_payments: Vec<SubscriptionPayment>,
  compensations: HashMap<Uuid, CompensationTask>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
  fail_stock_writes: Arc<AtomicBool>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn put_inventory_item(&self, item: InventoryItem) {
    self.state.lock().await.inventory.insert(item.id, item);
  }

  pub async fn put_package(&self, package: Package) {
    self.state.lock().await.packages.insert(package.id, package);
  }

  pub async fn stock_of(&self, item_id: i64) -> Option<i32> {
    self.state.lock().await.inventory.get(&item_id).map(|item| item.stock_quantity)
  }

  pub async fn orders(&self) -> Vec<Order> {
    let mut orders: Vec<Order> = self.state.lock().await.orders.values().cloned().collect();
    orders.sort_by_key(|order| order.created_at);
    orders
  }

  pub async fn payments(&self) -> Vec<Payment> {
    let mut payments: Vec<Payment> = self.state.lock().await.payments.values().cloned().collect();
    payments.sort_by_key(|payment| payment.created_at);
    payments
  }

  pub async fn compensations(&self) -> Vec<CompensationTask> {
    let mut tasks: Vec<CompensationTask> = self.state.lock().await.compensations.values().cloned().collect();
    tasks.sort_by_key(|task| task.created_at);
    tasks
  }

  pub async fn idempotency_record(&self, scope: IdempotencyScope, key: &str) -> Option<IdempotencyRecord> {
    self.state.lock().await.idempotency.get(&(scope, key.to_string())).cloned()
  }

  /// Makes every `write_stock` fail until switched off again. Lets tests drive
  /// the compensation queue without a real storage outage.
  pub fn fail_stock_writes(&self, fail: bool) {
    self.fail_stock_writes.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
    let guard = self.state.clone().lock_owned().await;
    let snapshot = guard.clone();
    Ok(Box::new(MemoryUnitOfWork {
      guard: Some(guard),
      snapshot: Some(snapshot),
      fail_stock_writes: self.fail_stock_writes.clone(),
    }))
  }
}

pub struct MemoryUnitOfWork {
  guard: Option<OwnedMutexGuard<MemoryState>>,
  snapshot: Option<MemoryState>,
  fail_stock_writes: Arc<AtomicBool>,
}

impl MemoryUnitOfWork {
  fn state(&mut self) -> Result<&mut MemoryState> {
    self
      .guard
      .as_deref_mut()
      .ok_or_else(|| QuireError::Internal("unit of work used after commit".to_string()))
  }
}

impl Drop for MemoryUnitOfWork {
  fn drop(&mut self) {
    if let (Some(mut guard), Some(snapshot)) = (self.guard.take(), self.snapshot.take()) {
      *guard = snapshot;
      tracing::trace!("memory unit of work rolled back");
    }
  }
}

fn missing(entity: &'static str, id: impl ToString) -> QuireError {
  QuireError::storage(anyhow::anyhow!("{} '{}' does not exist", entity, id.to_string()))
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
  async fn lock_inventory_item(&mut self, item_id: i64) -> Result<Option<InventoryItem>> {
    Ok(self.state()?.inventory.get(&item_id).cloned())
  }

  async fn write_stock(&mut self, item_id: i64, stock_quantity: i32) -> Result<()> {
    if self.fail_stock_writes.load(Ordering::SeqCst) {
      return Err(QuireError::storage(anyhow::anyhow!("injected stock write failure")));
    }
    let item = self.state()?.inventory.get_mut(&item_id).ok_or_else(|| missing("inventory item", item_id))?;
    item.stock_quantity = stock_quantity;
    Ok(())
  }

  async fn find_package(&mut self, package_id: i64) -> Result<Option<Package>> {
    Ok(self.state()?.packages.get(&package_id).cloned())
  }

  async fn claim_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<KeyClaim> {
    let state = self.state()?;
    let map_key = (scope, key.to_string());
    if let Some(existing) = state.idempotency.get(&map_key) {
      return Ok(KeyClaim::Existing(existing.clone()));
    }
    state.idempotency.insert(
      map_key,
      IdempotencyRecord {
        scope,
        key: key.to_string(),
        resource_id: None,
        response: None,
        created_at: Utc::now(),
        completed_at: None,
      },
    );
    Ok(KeyClaim::Claimed)
  }

  async fn complete_idempotency_key(
    &mut self,
    scope: IdempotencyScope,
    key: &str,
    resource_id: &str,
    response: &JsonValue,
  ) -> Result<()> {
    let record = self
      .state()?
      .idempotency
      .get_mut(&(scope, key.to_string()))
      .ok_or_else(|| missing("idempotency key", key))?;
    record.resource_id = Some(resource_id.to_string());
    record.response = Some(response.clone());
    record.completed_at = Some(Utc::now());
    Ok(())
  }

  async fn release_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<()> {
    self.state()?.idempotency.remove(&(scope, key.to_string()));
    Ok(())
  }

  async fn insert_order(&mut self, order: &Order) -> Result<()> {
    let state = self.state()?;
    if let Some(key) = &order.idempotency_key {
      if state.order_keys.contains_key(key) {
        return Err(QuireError::DuplicateIdempotencyKey { key: key.clone() });
      }
      state.order_keys.insert(key.clone(), order.id);
    }
    state.orders.insert(order.id, order.clone());
    Ok(())
  }

  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    Ok(self.state()?.orders.get(&order_id).cloned())
  }

  async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    self.find_order(order_id).await
  }

  async fn update_order(&mut self, order: &Order) -> Result<()> {
    let slot = self.state()?.orders.get_mut(&order.id).ok_or_else(|| missing("order", order.id))?;
    *slot = order.clone();
    Ok(())
  }

  async fn append_status_event(&mut self, event: &OrderStatusEvent) -> Result<()> {
    self.state()?.status_events.push(event.clone());
    Ok(())
  }

  async fn status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>> {
    Ok(
      self
        .state()?
        .status_events
        .iter()
        .filter(|event| event.order_id == order_id)
        .cloned()
        .collect(),
    )
  }

  async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
    let state = self.state()?;
    if state.payments.contains_key(&payment.transaction_id) {
      return Err(QuireError::storage(anyhow::anyhow!(
        "payment '{}' already exists",
        payment.transaction_id
      )));
    }
    state.payments.insert(payment.transaction_id.clone(), payment.clone());
    Ok(())
  }

  async fn find_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>> {
    Ok(self.state()?.payments.get(transaction_id).cloned())
  }

  async fn lock_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>> {
    self.find_payment(transaction_id).await
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
    let slot = self
      .state()?
      .payments
      .get_mut(&payment.transaction_id)
      .ok_or_else(|| missing("payment", &payment.transaction_id))?;
    *slot = payment.clone();
    Ok(())
  }

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> = self
      .state()?
      .payments
      .values()
      .filter(|payment| payment.order_id == order_id)
      .cloned()
      .collect();
    payments.sort_by_key(|payment| payment.created_at);
    Ok(payments)
  }

  async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()> {
    self.state()?.subscriptions.insert(subscription.id, subscription.clone());
    Ok(())
  }

  async fn find_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>> {
    Ok(self.state()?.subscriptions.get(&subscription_id).cloned())
  }

  async fn lock_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>> {
    self.find_subscription(subscription_id).await
  }

  async fn update_subscription(&mut self, subscription: &Subscription) -> Result<()> {
    let slot = self
      .state()?
      .subscriptions
      .get_mut(&subscription.id)
      .ok_or_else(|| missing("subscription", subscription.id))?;
    *slot = subscription.clone();
    Ok(())
  }

  async fn subscriptions_for_customer(&mut self, customer_id: Uuid) -> Result<Vec<Subscription>> {
    let mut subscriptions: Vec<Subscription> = self
      .state()?
      .subscriptions
      .values()
      .filter(|subscription| subscription.customer_id == customer_id)
      .cloned()
      .collect();
    subscriptions.sort_by_key(|subscription| subscription.created_at);
    Ok(subscriptions)
  }

  async fn due_subscription_ids(&mut self, cutoff: DateTime<Utc>, max_attempts: i32) -> Result<Vec<Uuid>> {
    let mut due: Vec<&Subscription> = self
      .state()?
      .subscriptions
      .values()
      .filter(|s| s.auto_renew && s.status == SubscriptionStatus::Active)
      .filter(|s| s.end_date <= cutoff && s.renewal_attempts < max_attempts)
      .collect();
    due.sort_by_key(|s| s.end_date);
    Ok(due.into_iter().map(|s| s.id).collect())
  }

  async fn subscription_ids_ended_before(
    &mut self,
    status: SubscriptionStatus,
    ended_before: DateTime<Utc>,
  ) -> Result<Vec<Uuid>> {
    Ok(
      self
        .state()?
        .subscriptions
        .values()
        .filter(|s| s.status == status && s.end_date < ended_before)
        .map(|s| s.id)
        .collect(),
    )
  }

  async fn insert_subscription_payment(&mut self, payment: &SubscriptionPayment) -> Result<()> {
    let state = self.state()?;
    if state
      .subscription_payments
      .iter()
      .any(|existing| existing.idempotency_key == payment.idempotency_key)
    {
      return Err(QuireError::DuplicateIdempotencyKey {
        key: payment.idempotency_key.clone(),
      });
    }
    state.subscription_payments.push(payment.clone());
    Ok(())
  }

  async fn update_subscription_payment(&mut self, payment: &SubscriptionPayment) -> Result<()> {
    let slot = self
      .state()?
      .subscription_payments
      .iter_mut()
      .find(|existing| existing.id == payment.id)
      .ok_or_else(|| missing("subscription payment", payment.id))?;
    *slot = payment.clone();
    Ok(())
  }

  async fn subscription_payments(&mut self, subscription_id: Uuid) -> Result<Vec<SubscriptionPayment>> {
    Ok(
      self
        .state()?
        .subscription_payments
        .iter()
        .filter(|payment| payment.subscription_id == subscription_id)
        .cloned()
        .collect(),
    )
  }

  async fn enqueue_compensation(&mut self, task: &CompensationTask) -> Result<()> {
    self.state()?.compensations.insert(task.id, task.clone());
    Ok(())
  }

  async fn due_compensations(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CompensationTask>> {
    let mut due: Vec<CompensationTask> = self
      .state()?
      .compensations
      .values()
      .filter(|task| task.status == CompensationStatus::Pending && task.next_attempt_at <= now)
      .cloned()
      .collect();
    due.sort_by_key(|task| task.next_attempt_at);
    due.truncate(usize::try_from(limit).unwrap_or(0));
    Ok(due)
  }

  async fn lock_compensation(&mut self, task_id: Uuid) -> Result<Option<CompensationTask>> {
    Ok(self.state()?.compensations.get(&task_id).cloned())
  }

  async fn update_compensation(&mut self, task: &CompensationTask) -> Result<()> {
    let slot = self
      .state()?
      .compensations
      .get_mut(&task.id)
      .ok_or_else(|| missing("compensation task", task.id))?;
    *slot = task.clone();
    Ok(())
  }

  async fn commit(&mut self) -> Result<()> {
    if self.guard.is_none() {
      return Err(QuireError::Internal("unit of work committed twice".to_string()));
    }
    self.snapshot = None;
    self.guard = None;
    Ok(())
  }
}
