// quire_server/src/db/pg_store.rs

//! Postgres backend. One unit of work is one sqlx transaction; `lock_*`
//! reads use `SELECT … FOR UPDATE`, so row locks last until commit or until
//! the transaction is dropped (and rolled back).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quire::model::{
  Address, ChargeStatus, CompensationStatus, CompensationTask, CustomerInfo, IdempotencyRecord, IdempotencyScope,
  InventoryItem, KeyClaim, LineItem, Order, OrderPaymentStatus, OrderStatus, OrderStatusEvent, Package, Payment,
  PaymentStatus, Subscription, SubscriptionPayment, SubscriptionStatus,
};
use quire::{QuireError, Result, Store, UnitOfWork};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, idempotency_key, customer, shipping_address, billing_address, subtotal, \
  shipping_cost, tax, total, currency, status, payment_status, stock_reserved, notes, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "transaction_id, idempotency_key, order_id, method, amount, currency, status, \
  provider_transaction_id, provider_response, webhook_verified, webhook_signature, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, customer_id, package_id, status, start_date, end_date, next_billing_date, \
  auto_renew, payment_method, amount, currency, billing_period_days, renewal_attempts, last_attempt_at, \
  last_failure_reason, created_at, updated_at";

const SUBSCRIPTION_PAYMENT_COLUMNS: &str = "id, subscription_id, idempotency_key, period_start, period_end, amount, \
  currency, status, provider_ref, failure_reason, created_at";

const COMPENSATION_COLUMNS: &str = "id, order_id, transaction_id, target_status, provider_transaction_id, reason, \
  attempts, status, last_error, next_attempt_at, created_at, updated_at";

fn db(err: sqlx::Error) -> QuireError {
  QuireError::storage(err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Parses a status column. A value outside the enumeration means the row was
/// written by something other than this engine.
fn column<T: FromStr<Err = QuireError>>(raw: &str) -> Result<T> {
  raw
    .parse()
    .map_err(|e: QuireError| QuireError::storage(anyhow::anyhow!("corrupt column value: {}", e)))
}

fn missing(entity: &'static str, id: impl ToString) -> QuireError {
  QuireError::storage(anyhow::anyhow!("{} '{}' vanished inside its unit of work", entity, id.to_string()))
}

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl Store for PgStore {
  async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
    let tx = self.pool.begin().await.map_err(db)?;
    Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
  }
}

pub struct PgUnitOfWork {
  /// `None` once committed. Dropping a live transaction rolls it back.
  tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
  fn conn(&mut self) -> Result<&mut PgConnection> {
    self
      .tx
      .as_deref_mut()
      .ok_or_else(|| QuireError::Internal("unit of work used after commit".to_string()))
  }

  async fn load_order(&mut self, order_id: Uuid, for_update: bool) -> Result<Option<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE id = $1{}",
      ORDER_COLUMNS,
      if for_update { " FOR UPDATE" } else { "" }
    );
    let Some(row) = sqlx::query_as::<_, OrderRow>(&sql)
      .bind(order_id)
      .fetch_optional(self.conn()?)
      .await
      .map_err(db)?
    else {
      return Ok(None);
    };

    let items = sqlx::query_as::<_, OrderItemRow>(
      "SELECT item_id, kind, title, unit_price, quantity, line_total FROM order_items \
       WHERE order_id = $1 ORDER BY position",
    )
    .bind(order_id)
    .fetch_all(self.conn()?)
    .await
    .map_err(db)?
    .into_iter()
    .map(OrderItemRow::into_line)
    .collect::<Result<Vec<_>>>()?;

    row.into_order(items).map(Some)
  }

  async fn load_payment(&mut self, transaction_id: &str, for_update: bool) -> Result<Option<Payment>> {
    let sql = format!(
      "SELECT {} FROM payments WHERE transaction_id = $1{}",
      PAYMENT_COLUMNS,
      if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(transaction_id)
      .fetch_optional(self.conn()?)
      .await
      .map_err(db)?
      .map(PaymentRow::into_payment)
      .transpose()
  }

  async fn load_subscription(&mut self, subscription_id: Uuid, for_update: bool) -> Result<Option<Subscription>> {
    let sql = format!(
      "SELECT {} FROM subscriptions WHERE id = $1{}",
      SUBSCRIPTION_COLUMNS,
      if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, SubscriptionRow>(&sql)
      .bind(subscription_id)
      .fetch_optional(self.conn()?)
      .await
      .map_err(db)?
      .map(SubscriptionRow::into_subscription)
      .transpose()
  }

  async fn fetch_idempotency_record(&mut self, scope: IdempotencyScope, key: &str) -> Result<Option<IdempotencyRecord>> {
    let row = sqlx::query_as::<_, IdempotencyRow>(
      "SELECT resource_id, response, created_at, completed_at FROM idempotency_keys \
       WHERE scope = $1 AND key = $2 FOR UPDATE",
    )
    .bind(scope.as_str())
    .bind(key)
    .fetch_optional(self.conn()?)
    .await
    .map_err(db)?;
    Ok(row.map(|row| IdempotencyRecord {
      scope,
      key: key.to_string(),
      resource_id: row.resource_id,
      response: row.response,
      created_at: row.created_at,
      completed_at: row.completed_at,
    }))
  }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
  async fn lock_inventory_item(&mut self, item_id: i64) -> Result<Option<InventoryItem>> {
    let row = sqlx::query_as::<_, InventoryRow>(
      "SELECT id, title, unit_price, stock_quantity FROM inventory_items WHERE id = $1 FOR UPDATE",
    )
    .bind(item_id)
    .fetch_optional(self.conn()?)
    .await
    .map_err(db)?;
    Ok(row.map(InventoryItem::from))
  }

  async fn write_stock(&mut self, item_id: i64, stock_quantity: i32) -> Result<()> {
    let updated = sqlx::query("UPDATE inventory_items SET stock_quantity = $2, updated_at = now() WHERE id = $1")
      .bind(item_id)
      .bind(stock_quantity)
      .execute(self.conn()?)
      .await
      .map_err(db)?
      .rows_affected();
    if updated == 0 {
      return Err(missing("inventory item", item_id));
    }
    Ok(())
  }

  async fn find_package(&mut self, package_id: i64) -> Result<Option<Package>> {
    let row = sqlx::query_as::<_, PackageRow>(
      "SELECT id, title, price, billing_period_days, active FROM packages WHERE id = $1",
    )
    .bind(package_id)
    .fetch_optional(self.conn()?)
    .await
    .map_err(db)?;
    Ok(row.map(Package::from))
  }

  #[instrument(name = "PgStore::claim_idempotency_key", skip(self), err)]
  async fn claim_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<KeyClaim> {
    // The insert waits on an uncommitted claim of the same key. If that claim
    // rolls back, the insert wins; otherwise the committed row is returned.
    // A claim released between the two statements is retried once.
    for _ in 0..2 {
      let inserted = sqlx::query(
        "INSERT INTO idempotency_keys (scope, key, created_at) VALUES ($1, $2, $3) \
         ON CONFLICT (scope, key) DO NOTHING",
      )
      .bind(scope.as_str())
      .bind(key)
      .bind(Utc::now())
      .execute(self.conn()?)
      .await
      .map_err(db)?
      .rows_affected();
      if inserted == 1 {
        return Ok(KeyClaim::Claimed);
      }
      if let Some(record) = self.fetch_idempotency_record(scope, key).await? {
        return Ok(KeyClaim::Existing(record));
      }
    }
    Err(QuireError::IdempotencyInProgress { key: key.to_string() })
  }

  async fn complete_idempotency_key(
    &mut self,
    scope: IdempotencyScope,
    key: &str,
    resource_id: &str,
    response: &JsonValue,
  ) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE idempotency_keys SET resource_id = $3, response = $4, completed_at = $5 \
       WHERE scope = $1 AND key = $2",
    )
    .bind(scope.as_str())
    .bind(key)
    .bind(resource_id)
    .bind(response)
    .bind(Utc::now())
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("idempotency key", key));
    }
    Ok(())
  }

  async fn release_idempotency_key(&mut self, scope: IdempotencyScope, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM idempotency_keys WHERE scope = $1 AND key = $2")
      .bind(scope.as_str())
      .bind(key)
      .execute(self.conn()?)
      .await
      .map_err(db)?;
    Ok(())
  }

  #[instrument(name = "PgStore::insert_order", skip(self, order), fields(order_id = %order.id), err)]
  async fn insert_order(&mut self, order: &Order) -> Result<()> {
    let inserted = sqlx::query(
      "INSERT INTO orders (id, idempotency_key, customer, shipping_address, billing_address, subtotal, \
       shipping_cost, tax, total, currency, status, payment_status, stock_reserved, notes, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(order.id)
    .bind(&order.idempotency_key)
    .bind(Json(&order.customer))
    .bind(Json(&order.shipping_address))
    .bind(order.billing_address.as_ref().map(Json))
    .bind(order.subtotal)
    .bind(order.shipping_cost)
    .bind(order.tax)
    .bind(order.total)
    .bind(&order.currency)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.stock_reserved)
    .bind(&order.notes)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(self.conn()?)
    .await;

    match inserted {
      Err(e) if is_unique_violation(&e) => {
        return Err(QuireError::DuplicateIdempotencyKey {
          key: order.idempotency_key.clone().unwrap_or_default(),
        })
      }
      other => other.map_err(db)?,
    };

    for (position, line) in order.line_items.iter().enumerate() {
      sqlx::query(
        "INSERT INTO order_items (order_id, position, item_id, kind, title, unit_price, quantity, line_total) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
      )
      .bind(order.id)
      .bind(position as i32)
      .bind(line.item_id)
      .bind(line.kind.as_str())
      .bind(&line.title)
      .bind(line.unit_price)
      .bind(line.quantity)
      .bind(line.line_total)
      .execute(self.conn()?)
      .await
      .map_err(db)?;
    }
    Ok(())
  }

  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    self.load_order(order_id, false).await
  }

  async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    self.load_order(order_id, true).await
  }

  async fn update_order(&mut self, order: &Order) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE orders SET status = $2, payment_status = $3, stock_reserved = $4, notes = $5, updated_at = $6 \
       WHERE id = $1",
    )
    .bind(order.id)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.stock_reserved)
    .bind(&order.notes)
    .bind(order.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("order", order.id));
    }
    Ok(())
  }

  async fn append_status_event(&mut self, event: &OrderStatusEvent) -> Result<()> {
    sqlx::query(
      "INSERT INTO order_status_events (id, order_id, previous_status, new_status, note, actor, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(event.id)
    .bind(event.order_id)
    .bind(event.previous_status.map(|s| s.as_str()))
    .bind(event.new_status.as_str())
    .bind(&event.note)
    .bind(&event.actor)
    .bind(event.created_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?;
    Ok(())
  }

  async fn status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>> {
    sqlx::query_as::<_, StatusEventRow>(
      "SELECT id, order_id, previous_status, new_status, note, actor, created_at FROM order_status_events \
       WHERE order_id = $1 ORDER BY seq",
    )
    .bind(order_id)
    .fetch_all(self.conn()?)
    .await
    .map_err(db)?
    .into_iter()
    .map(StatusEventRow::into_event)
    .collect()
  }

  async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
    sqlx::query(
      "INSERT INTO payments (transaction_id, idempotency_key, order_id, method, amount, currency, status, \
       provider_transaction_id, provider_response, webhook_verified, webhook_signature, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&payment.transaction_id)
    .bind(&payment.idempotency_key)
    .bind(payment.order_id)
    .bind(&payment.method)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(&payment.provider_transaction_id)
    .bind(&payment.provider_response)
    .bind(payment.webhook_verified)
    .bind(&payment.webhook_signature)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?;
    Ok(())
  }

  async fn find_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>> {
    self.load_payment(transaction_id, false).await
  }

  async fn lock_payment(&mut self, transaction_id: &str) -> Result<Option<Payment>> {
    self.load_payment(transaction_id, true).await
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE payments SET status = $2, provider_transaction_id = $3, provider_response = $4, \
       webhook_verified = $5, webhook_signature = $6, updated_at = $7 WHERE transaction_id = $1",
    )
    .bind(&payment.transaction_id)
    .bind(payment.status.as_str())
    .bind(&payment.provider_transaction_id)
    .bind(&payment.provider_response)
    .bind(payment.webhook_verified)
    .bind(&payment.webhook_signature)
    .bind(payment.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("payment", &payment.transaction_id));
    }
    Ok(())
  }

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>> {
    let sql = format!(
      "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at",
      PAYMENT_COLUMNS
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(order_id)
      .fetch_all(self.conn()?)
      .await
      .map_err(db)?
      .into_iter()
      .map(PaymentRow::into_payment)
      .collect()
  }

  async fn insert_subscription(&mut self, s: &Subscription) -> Result<()> {
    sqlx::query(
      "INSERT INTO subscriptions (id, customer_id, package_id, status, start_date, end_date, next_billing_date, \
       auto_renew, payment_method, amount, currency, billing_period_days, renewal_attempts, last_attempt_at, \
       last_failure_reason, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(s.id)
    .bind(s.customer_id)
    .bind(s.package_id)
    .bind(s.status.as_str())
    .bind(s.start_date)
    .bind(s.end_date)
    .bind(s.next_billing_date)
    .bind(s.auto_renew)
    .bind(&s.payment_method)
    .bind(s.amount)
    .bind(&s.currency)
    .bind(s.billing_period_days)
    .bind(s.renewal_attempts)
    .bind(s.last_attempt_at)
    .bind(&s.last_failure_reason)
    .bind(s.created_at)
    .bind(s.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?;
    Ok(())
  }

  async fn find_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>> {
    self.load_subscription(subscription_id, false).await
  }

  async fn lock_subscription(&mut self, subscription_id: Uuid) -> Result<Option<Subscription>> {
    self.load_subscription(subscription_id, true).await
  }

  async fn update_subscription(&mut self, s: &Subscription) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE subscriptions SET status = $2, end_date = $3, next_billing_date = $4, auto_renew = $5, \
       renewal_attempts = $6, last_attempt_at = $7, last_failure_reason = $8, updated_at = $9 WHERE id = $1",
    )
    .bind(s.id)
    .bind(s.status.as_str())
    .bind(s.end_date)
    .bind(s.next_billing_date)
    .bind(s.auto_renew)
    .bind(s.renewal_attempts)
    .bind(s.last_attempt_at)
    .bind(&s.last_failure_reason)
    .bind(s.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("subscription", s.id));
    }
    Ok(())
  }

  async fn subscriptions_for_customer(&mut self, customer_id: Uuid) -> Result<Vec<Subscription>> {
    let sql = format!(
      "SELECT {} FROM subscriptions WHERE customer_id = $1 ORDER BY created_at",
      SUBSCRIPTION_COLUMNS
    );
    sqlx::query_as::<_, SubscriptionRow>(&sql)
      .bind(customer_id)
      .fetch_all(self.conn()?)
      .await
      .map_err(db)?
      .into_iter()
      .map(SubscriptionRow::into_subscription)
      .collect()
  }

  async fn due_subscription_ids(&mut self, cutoff: DateTime<Utc>, max_attempts: i32) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
      "SELECT id FROM subscriptions WHERE auto_renew AND status = 'active' AND end_date <= $1 \
       AND renewal_attempts < $2 ORDER BY end_date",
    )
    .bind(cutoff)
    .bind(max_attempts)
    .fetch_all(self.conn()?)
    .await
    .map_err(db)
  }

  async fn subscription_ids_ended_before(
    &mut self,
    status: SubscriptionStatus,
    ended_before: DateTime<Utc>,
  ) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM subscriptions WHERE status = $1 AND end_date < $2 ORDER BY end_date")
      .bind(status.as_str())
      .bind(ended_before)
      .fetch_all(self.conn()?)
      .await
      .map_err(db)
  }

  async fn insert_subscription_payment(&mut self, p: &SubscriptionPayment) -> Result<()> {
    let inserted = sqlx::query(
      "INSERT INTO subscription_payments (id, subscription_id, idempotency_key, period_start, period_end, amount, \
       currency, status, provider_ref, failure_reason, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(p.id)
    .bind(p.subscription_id)
    .bind(&p.idempotency_key)
    .bind(p.period_start)
    .bind(p.period_end)
    .bind(p.amount)
    .bind(&p.currency)
    .bind(p.status.as_str())
    .bind(&p.provider_ref)
    .bind(&p.failure_reason)
    .bind(p.created_at)
    .execute(self.conn()?)
    .await;

    match inserted {
      Ok(_) => Ok(()),
      Err(e) if is_unique_violation(&e) => Err(QuireError::DuplicateIdempotencyKey {
        key: p.idempotency_key.clone(),
      }),
      Err(e) => Err(db(e)),
    }
  }

  async fn update_subscription_payment(&mut self, p: &SubscriptionPayment) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE subscription_payments SET status = $2, provider_ref = $3, failure_reason = $4 WHERE id = $1",
    )
    .bind(p.id)
    .bind(p.status.as_str())
    .bind(&p.provider_ref)
    .bind(&p.failure_reason)
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("subscription payment", p.id));
    }
    Ok(())
  }

  async fn subscription_payments(&mut self, subscription_id: Uuid) -> Result<Vec<SubscriptionPayment>> {
    let sql = format!(
      "SELECT {} FROM subscription_payments WHERE subscription_id = $1 ORDER BY seq",
      SUBSCRIPTION_PAYMENT_COLUMNS
    );
    sqlx::query_as::<_, SubscriptionPaymentRow>(&sql)
      .bind(subscription_id)
      .fetch_all(self.conn()?)
      .await
      .map_err(db)?
      .into_iter()
      .map(SubscriptionPaymentRow::into_payment)
      .collect()
  }

  async fn enqueue_compensation(&mut self, task: &CompensationTask) -> Result<()> {
    sqlx::query(
      "INSERT INTO compensation_tasks (id, order_id, transaction_id, target_status, provider_transaction_id, \
       reason, attempts, status, last_error, next_attempt_at, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(task.id)
    .bind(task.order_id)
    .bind(&task.transaction_id)
    .bind(task.target_status.as_str())
    .bind(&task.provider_transaction_id)
    .bind(&task.reason)
    .bind(task.attempts)
    .bind(task.status.as_str())
    .bind(&task.last_error)
    .bind(task.next_attempt_at)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?;
    Ok(())
  }

  async fn due_compensations(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CompensationTask>> {
    let sql = format!(
      "SELECT {} FROM compensation_tasks WHERE status = 'pending' AND next_attempt_at <= $1 \
       ORDER BY next_attempt_at LIMIT $2 FOR UPDATE SKIP LOCKED",
      COMPENSATION_COLUMNS
    );
    sqlx::query_as::<_, CompensationRow>(&sql)
      .bind(now)
      .bind(limit)
      .fetch_all(self.conn()?)
      .await
      .map_err(db)?
      .into_iter()
      .map(CompensationRow::into_task)
      .collect()
  }

  async fn lock_compensation(&mut self, task_id: Uuid) -> Result<Option<CompensationTask>> {
    let sql = format!("SELECT {} FROM compensation_tasks WHERE id = $1 FOR UPDATE", COMPENSATION_COLUMNS);
    sqlx::query_as::<_, CompensationRow>(&sql)
      .bind(task_id)
      .fetch_optional(self.conn()?)
      .await
      .map_err(db)?
      .map(CompensationRow::into_task)
      .transpose()
  }

  async fn update_compensation(&mut self, task: &CompensationTask) -> Result<()> {
    let updated = sqlx::query(
      "UPDATE compensation_tasks SET order_id = $2, attempts = $3, status = $4, last_error = $5, \
       next_attempt_at = $6, updated_at = $7 WHERE id = $1",
    )
    .bind(task.id)
    .bind(task.order_id)
    .bind(task.attempts)
    .bind(task.status.as_str())
    .bind(&task.last_error)
    .bind(task.next_attempt_at)
    .bind(task.updated_at)
    .execute(self.conn()?)
    .await
    .map_err(db)?
    .rows_affected();
    if updated == 0 {
      return Err(missing("compensation task", task.id));
    }
    Ok(())
  }

  async fn commit(&mut self) -> Result<()> {
    let tx = self
      .tx
      .take()
      .ok_or_else(|| QuireError::Internal("unit of work committed twice".to_string()))?;
    tx.commit().await.map_err(db)
  }
}

// --- Row mappings ---

#[derive(FromRow)]
struct InventoryRow {
  id: i64,
  title: String,
  unit_price: Decimal,
  stock_quantity: i32,
}

impl From<InventoryRow> for InventoryItem {
  fn from(row: InventoryRow) -> Self {
    InventoryItem {
      id: row.id,
      title: row.title,
      unit_price: row.unit_price,
      stock_quantity: row.stock_quantity,
    }
  }
}

#[derive(FromRow)]
struct PackageRow {
  id: i64,
  title: String,
  price: Decimal,
  billing_period_days: i32,
  active: bool,
}

impl From<PackageRow> for Package {
  fn from(row: PackageRow) -> Self {
    Package {
      id: row.id,
      title: row.title,
      price: row.price,
      billing_period_days: row.billing_period_days,
      active: row.active,
    }
  }
}

#[derive(FromRow)]
struct IdempotencyRow {
  resource_id: Option<String>,
  response: Option<JsonValue>,
  created_at: DateTime<Utc>,
  completed_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct OrderRow {
  id: Uuid,
  idempotency_key: Option<String>,
  customer: Json<CustomerInfo>,
  shipping_address: Json<Address>,
  billing_address: Option<Json<Address>>,
  subtotal: Decimal,
  shipping_cost: Decimal,
  tax: Decimal,
  total: Decimal,
  currency: String,
  status: String,
  payment_status: String,
  stock_reserved: bool,
  notes: Option<String>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl OrderRow {
  fn into_order(self, line_items: Vec<LineItem>) -> Result<Order> {
    Ok(Order {
      id: self.id,
      idempotency_key: self.idempotency_key,
      customer: self.customer.0,
      line_items,
      shipping_address: self.shipping_address.0,
      billing_address: self.billing_address.map(|a| a.0),
      subtotal: self.subtotal,
      shipping_cost: self.shipping_cost,
      tax: self.tax,
      total: self.total,
      currency: self.currency,
      status: column::<OrderStatus>(&self.status)?,
      payment_status: column::<OrderPaymentStatus>(&self.payment_status)?,
      stock_reserved: self.stock_reserved,
      notes: self.notes,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(FromRow)]
struct OrderItemRow {
  item_id: i64,
  kind: String,
  title: String,
  unit_price: Decimal,
  quantity: i32,
  line_total: Decimal,
}

impl OrderItemRow {
  fn into_line(self) -> Result<LineItem> {
    Ok(LineItem {
      item_id: self.item_id,
      kind: column(&self.kind)?,
      title: self.title,
      unit_price: self.unit_price,
      quantity: self.quantity,
      line_total: self.line_total,
    })
  }
}

#[derive(FromRow)]
struct StatusEventRow {
  id: Uuid,
  order_id: Uuid,
  previous_status: Option<String>,
  new_status: String,
  note: Option<String>,
  actor: String,
  created_at: DateTime<Utc>,
}

impl StatusEventRow {
  fn into_event(self) -> Result<OrderStatusEvent> {
    Ok(OrderStatusEvent {
      id: self.id,
      order_id: self.order_id,
      previous_status: self.previous_status.as_deref().map(column::<OrderStatus>).transpose()?,
      new_status: column(&self.new_status)?,
      note: self.note,
      actor: self.actor,
      created_at: self.created_at,
    })
  }
}

#[derive(FromRow)]
struct PaymentRow {
  transaction_id: String,
  idempotency_key: Option<String>,
  order_id: Uuid,
  method: String,
  amount: Decimal,
  currency: String,
  status: String,
  provider_transaction_id: Option<String>,
  provider_response: Option<JsonValue>,
  webhook_verified: bool,
  webhook_signature: Option<String>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl PaymentRow {
  fn into_payment(self) -> Result<Payment> {
    Ok(Payment {
      transaction_id: self.transaction_id,
      idempotency_key: self.idempotency_key,
      order_id: self.order_id,
      method: self.method,
      amount: self.amount,
      currency: self.currency,
      status: column::<PaymentStatus>(&self.status)?,
      provider_transaction_id: self.provider_transaction_id,
      provider_response: self.provider_response,
      webhook_verified: self.webhook_verified,
      webhook_signature: self.webhook_signature,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(FromRow)]
struct SubscriptionRow {
  id: Uuid,
  customer_id: Uuid,
  package_id: i64,
  status: String,
  start_date: DateTime<Utc>,
  end_date: DateTime<Utc>,
  next_billing_date: DateTime<Utc>,
  auto_renew: bool,
  payment_method: String,
  amount: Decimal,
  currency: String,
  billing_period_days: i32,
  renewal_attempts: i32,
  last_attempt_at: Option<DateTime<Utc>>,
  last_failure_reason: Option<String>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
  fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      id: self.id,
      customer_id: self.customer_id,
      package_id: self.package_id,
      status: column::<SubscriptionStatus>(&self.status)?,
      start_date: self.start_date,
      end_date: self.end_date,
      next_billing_date: self.next_billing_date,
      auto_renew: self.auto_renew,
      payment_method: self.payment_method,
      amount: self.amount,
      currency: self.currency,
      billing_period_days: self.billing_period_days,
      renewal_attempts: self.renewal_attempts,
      last_attempt_at: self.last_attempt_at,
      last_failure_reason: self.last_failure_reason,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(FromRow)]
struct SubscriptionPaymentRow {
  id: Uuid,
  subscription_id: Uuid,
  idempotency_key: String,
  period_start: DateTime<Utc>,
  period_end: DateTime<Utc>,
  amount: Decimal,
  currency: String,
  status: String,
  provider_ref: Option<String>,
  failure_reason: Option<String>,
  created_at: DateTime<Utc>,
}

impl SubscriptionPaymentRow {
  fn into_payment(self) -> Result<SubscriptionPayment> {
    Ok(SubscriptionPayment {
      id: self.id,
      subscription_id: self.subscription_id,
      idempotency_key: self.idempotency_key,
      period_start: self.period_start,
      period_end: self.period_end,
      amount: self.amount,
      currency: self.currency,
      status: column::<ChargeStatus>(&self.status)?,
      provider_ref: self.provider_ref,
      failure_reason: self.failure_reason,
      created_at: self.created_at,
    })
  }
}

#[derive(FromRow)]
struct CompensationRow {
  id: Uuid,
  order_id: Option<Uuid>,
  transaction_id: String,
  target_status: String,
  provider_transaction_id: Option<String>,
  reason: String,
  attempts: i32,
  status: String,
  last_error: Option<String>,
  next_attempt_at: DateTime<Utc>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl CompensationRow {
  fn into_task(self) -> Result<CompensationTask> {
    Ok(CompensationTask {
      id: self.id,
      order_id: self.order_id,
      transaction_id: self.transaction_id,
      target_status: column::<PaymentStatus>(&self.target_status)?,
      provider_transaction_id: self.provider_transaction_id,
      reason: self.reason,
      attempts: self.attempts,
      status: column::<CompensationStatus>(&self.status)?,
      last_error: self.last_error,
      next_attempt_at: self.next_attempt_at,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}
