// quire/src/model/order.rs

use crate::model::status::{OrderPaymentStatus, OrderStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// What a line item refers to. Only physical items hold stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
  Physical,
  Package,
}

impl ItemKind {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Physical => "physical",
      Self::Package => "package",
    }
  }
}

impl std::str::FromStr for ItemKind {
  type Err = crate::error::QuireError;

  fn from_str(s: &str) -> crate::error::Result<Self> {
    match s {
      "physical" => Ok(Self::Physical),
      "package" => Ok(Self::Package),
      other => Err(crate::error::QuireError::Validation(format!("Unknown item kind '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
  pub item_id: i64,
  pub kind: ItemKind,
  pub title: String,
  pub unit_price: Decimal,
  pub quantity: i32,
  /// Always `unit_price * quantity` with the server-read price.
  pub line_total: Decimal,
}

impl LineItem {
  pub fn is_physical(&self) -> bool {
    self.kind == ItemKind::Physical
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CustomerInfo {
  pub customer_id: Option<Uuid>,
  #[validate(length(min = 1, max = 200))]
  pub name: String,
  #[validate(email)]
  pub email: String,
  #[validate(length(max = 40))]
  pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Address {
  #[validate(length(min = 1, max = 200))]
  pub line1: String,
  #[validate(length(max = 200))]
  pub line2: Option<String>,
  #[validate(length(min = 1, max = 100))]
  pub city: String,
  #[validate(length(max = 100))]
  pub region: Option<String>,
  #[validate(length(min = 1, max = 20))]
  pub postal_code: String,
  #[validate(length(equal = 2))]
  pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: Uuid,
  pub idempotency_key: Option<String>,
  pub customer: CustomerInfo,
  pub line_items: Vec<LineItem>,
  pub shipping_address: Address,
  pub billing_address: Option<Address>,
  pub subtotal: Decimal,
  pub shipping_cost: Decimal,
  pub tax: Decimal,
  pub total: Decimal,
  pub currency: String,
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  /// True while stock decremented for this order has not been given back.
  pub stock_reserved: bool,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn physical_lines(&self) -> impl Iterator<Item = &LineItem> {
    self.line_items.iter().filter(|line| line.is_physical())
  }
}

/// One row of an order's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
  pub id: Uuid,
  pub order_id: Uuid,
  /// `None` for the event written when the order is created.
  pub previous_status: Option<OrderStatus>,
  pub new_status: OrderStatus,
  pub note: Option<String>,
  pub actor: String,
  pub created_at: DateTime<Utc>,
}

impl OrderStatusEvent {
  pub fn new(
    order_id: Uuid,
    previous_status: Option<OrderStatus>,
    new_status: OrderStatus,
    note: Option<String>,
    actor: impl Into<String>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      order_id,
      previous_status,
      new_status,
      note,
      actor: actor.into(),
      created_at: Utc::now(),
    }
  }
}
