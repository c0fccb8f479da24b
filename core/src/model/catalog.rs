// quire/src/model/catalog.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A stocked, physical catalog entry (a printed book, a boxed set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
  pub id: i64,
  pub title: String,
  pub unit_price: Decimal,
  pub stock_quantity: i32,
}

/// An intangible catalog entry (e-book bundle, reading plan). Never stocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
  pub id: i64,
  pub title: String,
  pub price: Decimal,
  pub billing_period_days: i32,
  pub active: bool,
}
