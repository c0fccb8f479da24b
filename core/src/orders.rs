// quire/src/orders.rs

//! Order transaction manager: turns a cart into a persisted order inside one
//! unit of work, and moves orders through their status table afterwards.

use crate::config::EngineConfig;
use crate::error::{QuireError, Result};
use crate::idempotency::{self, Lookup};
use crate::inventory;
use crate::model::{
  Address, CustomerInfo, IdempotencyScope, InventoryItem, ItemKind, LineItem, Order, OrderPaymentStatus, OrderStatus,
  OrderStatusEvent, StatusMachine,
};
use crate::pricing::{self, Totals};
use crate::store::{Store, UnitOfWork};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

pub const MAX_LINE_QUANTITY: i32 = 9_999;

const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
  pub item_id: i64,
  pub kind: ItemKind,
  pub quantity: i32,
  /// Price the storefront displayed. Never used for the total.
  #[serde(default)]
  pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
  #[serde(default)]
  pub idempotency_key: Option<String>,
  #[validate(nested)]
  pub customer: CustomerInfo,
  #[validate(length(min = 1, max = 100, message = "an order needs between 1 and 100 lines"))]
  pub lines: Vec<CartLine>,
  #[validate(nested)]
  pub shipping_address: Address,
  #[validate(nested)]
  #[serde(default)]
  pub billing_address: Option<Address>,
  #[serde(default)]
  pub shipping: Decimal,
  #[serde(default)]
  pub tax: Decimal,
  pub client_total: Decimal,
  pub currency: String,
  #[validate(length(max = 2000))]
  #[serde(default)]
  pub notes: Option<String>,
}

/// What a checkout returns, and what is stored under its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
  pub order_id: Uuid,
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  pub subtotal: Decimal,
  pub shipping: Decimal,
  pub tax: Decimal,
  pub total: Decimal,
  pub currency: String,
  pub idempotency_key: String,
  /// True when this receipt was replayed from an earlier identical request.
  #[serde(default)]
  pub existing: bool,
}

impl OrderReceipt {
  fn for_order(order: &Order, idempotency_key: &str) -> Self {
    Self {
      order_id: order.id,
      status: order.status,
      payment_status: order.payment_status,
      subtotal: order.subtotal,
      shipping: order.shipping_cost,
      tax: order.tax,
      total: order.total,
      currency: order.currency.clone(),
      idempotency_key: idempotency_key.to_string(),
      existing: false,
    }
  }
}

/// Result of [`OrderManager::place_order`]. `order` is only present when this
/// call created the order, so replays never trigger follow-up side effects.
#[derive(Debug, Clone)]
pub struct Placement {
  pub receipt: OrderReceipt,
  pub order: Option<Order>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrderStatus {
  pub status: OrderStatus,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTracking {
  pub order_id: Uuid,
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  pub events: Vec<OrderStatusEvent>,
}

#[derive(Clone)]
pub struct OrderManager {
  store: Arc<dyn Store>,
  config: Arc<EngineConfig>,
}

impl OrderManager {
  pub fn new(store: Arc<dyn Store>, config: Arc<EngineConfig>) -> Self {
    Self { store, config }
  }

  /// Checks that need no storage. Runs before any unit of work is opened.
  pub fn validate_request(&self, request: &CreateOrderRequest) -> Result<()> {
    request.validate()?;

    for line in &request.lines {
      if line.quantity <= 0 {
        return Err(QuireError::InvalidQuantity {
          item_id: line.item_id,
          quantity: line.quantity,
        });
      }
      if line.quantity > MAX_LINE_QUANTITY {
        return Err(QuireError::Validation(format!(
          "Quantity {} for item {} exceeds the limit of {}",
          line.quantity, line.item_id, MAX_LINE_QUANTITY
        )));
      }
      if line.unit_price.is_some_and(|price| price < Decimal::ZERO) {
        return Err(QuireError::Validation(format!(
          "Unit price for item {} must not be negative",
          line.item_id
        )));
      }
    }
    if request.shipping < Decimal::ZERO || request.tax < Decimal::ZERO || request.client_total < Decimal::ZERO {
      return Err(QuireError::Validation(
        "Shipping, tax and total must not be negative".to_string(),
      ));
    }
    if !request.currency.eq_ignore_ascii_case(&self.config.currency) {
      return Err(QuireError::Validation(format!(
        "Orders must be placed in {}",
        self.config.currency
      )));
    }
    if let Some(key) = &request.idempotency_key {
      idempotency::normalize_key(key)?;
    }
    Ok(())
  }

  /// Validates and commits an order. A lost race on the idempotency key is
  /// retried once through the fetch path.
  #[instrument(name = "OrderManager::place_order", skip(self, request), fields(lines = request.lines.len()), err)]
  pub async fn place_order(&self, request: &CreateOrderRequest) -> Result<Placement> {
    self.validate_request(request)?;
    let key = idempotency::key_or_synthesize(request.idempotency_key.as_deref(), "order")?;

    match self.place_once(request, &key).await {
      Err(QuireError::DuplicateIdempotencyKey { .. }) => {
        tracing::info!(key = %key, "Concurrent request won the idempotency key, fetching its outcome");
        self.place_once(request, &key).await
      }
      other => other,
    }
  }

  /// Same as [`place_order`](Self::place_order) without the follow-up data.
  pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderReceipt> {
    Ok(self.place_order(request).await?.receipt)
  }

  async fn place_once(&self, request: &CreateOrderRequest, key: &str) -> Result<Placement> {
    let mut uow = self.store.begin().await?;

    if let Lookup::Existing(mut receipt) =
      idempotency::begin_or_fetch::<OrderReceipt>(uow.as_mut(), IdempotencyScope::Order, key).await?
    {
      receipt.existing = true;
      return Ok(Placement { receipt, order: None });
    }

    let line_items = self.reserve_lines(uow.as_mut(), &request.lines).await?;
    let ships_physical = line_items.iter().any(LineItem::is_physical);
    let subtotal: Decimal = line_items.iter().map(|line| line.line_total).sum();
    let shipping = self.config.shipping.resolve(request.shipping, ships_physical);
    let tax = self.config.tax.resolve(request.tax, pricing::round_money(subtotal));
    let totals = Totals::compute(&line_items, shipping, tax);

    pricing::check_client_total(request.client_total, totals.total, self.config.total_tolerance)?;

    let now = Utc::now();
    let order = Order {
      id: Uuid::new_v4(),
      idempotency_key: Some(key.to_string()),
      customer: request.customer.clone(),
      line_items,
      shipping_address: request.shipping_address.clone(),
      billing_address: request.billing_address.clone(),
      subtotal: totals.subtotal,
      shipping_cost: totals.shipping,
      tax: totals.tax,
      total: totals.total,
      currency: self.config.currency.clone(),
      status: OrderStatus::Pending,
      payment_status: OrderPaymentStatus::Pending,
      stock_reserved: ships_physical,
      notes: request.notes.clone(),
      created_at: now,
      updated_at: now,
    };

    uow.insert_order(&order).await?;
    uow
      .append_status_event(&OrderStatusEvent::new(
        order.id,
        None,
        OrderStatus::Pending,
        Some("Order placed".to_string()),
        SYSTEM_ACTOR,
      ))
      .await?;

    let receipt = OrderReceipt::for_order(&order, key);
    idempotency::complete(uow.as_mut(), IdempotencyScope::Order, key, &order.id.to_string(), &receipt).await?;
    uow.commit().await?;

    tracing::info!(order_id = %order.id, total = %order.total, "Order committed");
    Ok(Placement {
      receipt,
      order: Some(order),
    })
  }

  /// Reserves physical lines (ascending item id, aggregated per item) and
  /// prices every line from the rows read under lock.
  async fn reserve_lines(&self, uow: &mut dyn UnitOfWork, lines: &[CartLine]) -> Result<Vec<LineItem>> {
    let mut wanted: BTreeMap<i64, i32> = BTreeMap::new();
    for line in lines.iter().filter(|l| l.kind == ItemKind::Physical) {
      let entry = wanted.entry(line.item_id).or_insert(0);
      *entry = entry.checked_add(line.quantity).ok_or(QuireError::InvalidQuantity {
        item_id: line.item_id,
        quantity: line.quantity,
      })?;
    }

    let mut stocked: HashMap<i64, InventoryItem> = HashMap::with_capacity(wanted.len());
    for (item_id, quantity) in wanted {
      let item = inventory::reserve(uow, item_id, quantity).await?;
      stocked.insert(item_id, item);
    }

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
      let (title, unit_price) = match line.kind {
        ItemKind::Physical => {
          let item = stocked
            .get(&line.item_id)
            .ok_or(QuireError::ItemNotFound { item_id: line.item_id })?;
          (item.title.clone(), item.unit_price)
        }
        ItemKind::Package => {
          let package = uow
            .find_package(line.item_id)
            .await?
            .filter(|p| p.active)
            .ok_or(QuireError::ItemNotFound { item_id: line.item_id })?;
          (package.title, package.price)
        }
      };
      if let Some(shown) = line.unit_price {
        if shown != unit_price {
          tracing::debug!(item_id = line.item_id, %shown, %unit_price, "Client price differs from catalog");
        }
      }
      priced.push(LineItem {
        item_id: line.item_id,
        kind: line.kind,
        title,
        unit_price,
        quantity: line.quantity,
        line_total: pricing::line_total(unit_price, line.quantity),
      });
    }
    Ok(priced)
  }

  #[instrument(name = "OrderManager::update_status", skip(self, update), fields(target = %update.status), err)]
  pub async fn update_status(&self, order_id: Uuid, update: UpdateOrderStatus) -> Result<Order> {
    let mut uow = self.store.begin().await?;
    let mut order = uow
      .lock_order(order_id)
      .await?
      .ok_or_else(|| QuireError::not_found("order", order_id))?;

    let previous = order.status;
    order.status = previous.transition(update.status)?;

    match order.status {
      OrderStatus::Cancelled => {
        inventory::release_order(uow.as_mut(), &mut order).await?;
        if order.payment_status == OrderPaymentStatus::Pending {
          order.payment_status = OrderPaymentStatus::Failed;
        }
      }
      OrderStatus::Refunded => order.payment_status = OrderPaymentStatus::Refunded,
      _ => {}
    }
    order.updated_at = Utc::now();

    uow.update_order(&order).await?;
    uow
      .append_status_event(&OrderStatusEvent::new(
        order.id,
        Some(previous),
        order.status,
        update.note,
        update.actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
      ))
      .await?;
    uow.commit().await?;

    tracing::info!(order_id = %order.id, from = %previous, to = %order.status, "Order status updated");
    Ok(order)
  }

  #[instrument(name = "OrderManager::get_order", skip(self), err)]
  pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
    let mut uow = self.store.begin().await?;
    uow
      .find_order(order_id)
      .await?
      .ok_or_else(|| QuireError::not_found("order", order_id))
  }

  #[instrument(name = "OrderManager::tracking", skip(self), err)]
  pub async fn tracking(&self, order_id: Uuid) -> Result<OrderTracking> {
    let mut uow = self.store.begin().await?;
    let order = uow
      .find_order(order_id)
      .await?
      .ok_or_else(|| QuireError::not_found("order", order_id))?;
    let events = uow.status_events(order_id).await?;
    Ok(OrderTracking {
      order_id,
      status: order.status,
      payment_status: order.payment_status,
      events,
    })
  }
}
