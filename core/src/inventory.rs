// quire/src/inventory.rs

//! Inventory ledger. Stock counters change only through these functions and
//! only inside a caller-supplied unit of work.

use crate::error::{QuireError, Result};
use crate::model::{InventoryItem, Order};
use crate::store::UnitOfWork;
use tracing::instrument;

/// Locks the item row and takes `quantity` units from it.
///
/// Returns the item as it was read under the lock (stock already reduced), so
/// callers price the line from the same row they reserved.
#[instrument(name = "Inventory::reserve", skip(uow), err)]
pub async fn reserve(uow: &mut dyn UnitOfWork, item_id: i64, quantity: i32) -> Result<InventoryItem> {
  if quantity <= 0 {
    return Err(QuireError::InvalidQuantity { item_id, quantity });
  }
  let mut item = uow
    .lock_inventory_item(item_id)
    .await?
    .ok_or(QuireError::ItemNotFound { item_id })?;

  if item.stock_quantity < quantity {
    return Err(QuireError::InsufficientStock {
      item_id,
      requested: quantity,
      available: item.stock_quantity,
    });
  }

  item.stock_quantity -= quantity;
  uow.write_stock(item_id, item.stock_quantity).await?;
  tracing::debug!(remaining = item.stock_quantity, "Stock reserved");
  Ok(item)
}

/// Gives `quantity` units back. Callers are responsible for calling this at
/// most once per reservation; use [`release_order`] for orders.
#[instrument(name = "Inventory::restore", skip(uow), err)]
pub async fn restore(uow: &mut dyn UnitOfWork, item_id: i64, quantity: i32) -> Result<()> {
  if quantity <= 0 {
    return Err(QuireError::InvalidQuantity { item_id, quantity });
  }
  let item = uow
    .lock_inventory_item(item_id)
    .await?
    .ok_or(QuireError::ItemNotFound { item_id })?;
  let restored = item
    .stock_quantity
    .checked_add(quantity)
    .ok_or_else(|| QuireError::Internal(format!("stock counter overflow for item {}", item_id)))?;
  uow.write_stock(item_id, restored).await?;
  tracing::debug!(restored_to = restored, "Stock restored");
  Ok(())
}

/// Restores every physical line of `order` if its reservation is still held,
/// then clears the flag. A second call is a no-op, which is what makes
/// failure webhooks and cancellations safe to replay.
///
/// The caller must hold the order's row lock and persist `order` afterwards.
#[instrument(name = "Inventory::release_order", skip(uow, order), fields(order_id = %order.id), err)]
pub async fn release_order(uow: &mut dyn UnitOfWork, order: &mut Order) -> Result<bool> {
  if !order.stock_reserved {
    tracing::debug!("No reservation held, nothing to release");
    return Ok(false);
  }
  // Sorted by item id so concurrent releases lock rows in the same order.
  let mut lines: Vec<(i64, i32)> = order.physical_lines().map(|l| (l.item_id, l.quantity)).collect();
  lines.sort_unstable_by_key(|(item_id, _)| *item_id);
  for (item_id, quantity) in lines {
    restore(uow, item_id, quantity).await?;
  }
  order.stock_reserved = false;
  tracing::info!("Order reservation released");
  Ok(true)
}
