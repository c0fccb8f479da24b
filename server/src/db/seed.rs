// quire_server/src/db/seed.rs

//! Demo catalog for local runs (`SEED_DB=true`).

use crate::errors::Result;
use quire::model::{InventoryItem, Package};
use quire::MemoryStore;
use rust_decimal::Decimal;
use sqlx::PgPool;

fn inventory() -> Vec<InventoryItem> {
  let item = |id: i64, title: &str, cents: i64, stock: i32| InventoryItem {
    id,
    title: title.to_string(),
    unit_price: Decimal::new(cents, 2),
    stock_quantity: stock,
  };
  vec![
    item(1, "The Rust Programming Language", 3999, 25),
    item(2, "Designing Data-Intensive Applications", 4550, 12),
    item(7, "Zero to Production in Rust", 3900, 8),
    item(42, "The Hitchhiker's Guide to the Galaxy", 1000, 50),
    item(99, "Signed First Edition", 25000, 1),
  ]
}

fn packages() -> Vec<Package> {
  let package = |id: i64, title: &str, cents: i64, days: i32| Package {
    id,
    title: title.to_string(),
    price: Decimal::new(cents, 2),
    billing_period_days: days,
    active: true,
  };
  vec![
    package(500, "E-book Club (monthly)", 999, 30),
    package(501, "Reading Plan (yearly)", 9900, 365),
  ]
}

pub async fn seed_postgres(pool: &PgPool) -> Result<()> {
  let mut tx = pool.begin().await?;
  for item in inventory() {
    sqlx::query(
      "INSERT INTO inventory_items (id, title, unit_price, stock_quantity) VALUES ($1, $2, $3, $4) \
       ON CONFLICT (id) DO NOTHING",
    )
    .bind(item.id)
    .bind(&item.title)
    .bind(item.unit_price)
    .bind(item.stock_quantity)
    .execute(&mut *tx)
    .await?;
  }
  for package in packages() {
    sqlx::query(
      "INSERT INTO packages (id, title, price, billing_period_days, active) VALUES ($1, $2, $3, $4, $5) \
       ON CONFLICT (id) DO NOTHING",
    )
    .bind(package.id)
    .bind(&package.title)
    .bind(package.price)
    .bind(package.billing_period_days)
    .bind(package.active)
    .execute(&mut *tx)
    .await?;
  }
  tx.commit().await?;
  tracing::info!("Database seeded with demo catalog.");
  Ok(())
}

pub async fn seed_memory(store: &MemoryStore) {
  for item in inventory() {
    store.put_inventory_item(item).await;
  }
  for package in packages() {
    store.put_package(package).await;
  }
  tracing::info!("In-memory store seeded with demo catalog.");
}
