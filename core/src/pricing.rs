// quire/src/pricing.rs

//! Pure money arithmetic for orders. Nothing here touches storage, so the
//! rules can be exercised without a unit of work.

use crate::error::{QuireError, Result};
use crate::model::LineItem;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

const DECIMAL_PLACES: u32 = 2;

/// Default allowed gap between the client's and the server's total (0.01).
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub fn round_money(value: Decimal) -> Decimal {
  value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
  round_money(unit_price * Decimal::from(quantity))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
  pub subtotal: Decimal,
  pub shipping: Decimal,
  pub tax: Decimal,
  pub total: Decimal,
}

impl Totals {
  pub fn compute(lines: &[LineItem], shipping: Decimal, tax: Decimal) -> Self {
    let subtotal = round_money(lines.iter().map(|line| line.line_total).sum());
    let shipping = round_money(shipping);
    let tax = round_money(tax);
    Self {
      subtotal,
      shipping,
      tax,
      total: subtotal + shipping + tax,
    }
  }
}

/// Rejects a client total further than `tolerance` from the server's.
pub fn check_client_total(client_total: Decimal, server_total: Decimal, tolerance: Decimal) -> Result<()> {
  if (client_total - server_total).abs() > tolerance {
    return Err(QuireError::TotalMismatch {
      client: client_total,
      server: server_total,
    });
  }
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "amount", rename_all = "snake_case")]
pub enum ShippingPolicy {
  /// Accept the flat amount the storefront computed.
  ClientFlat,
  /// Charge a fixed fee whenever the order ships something physical.
  Flat(Decimal),
}

impl ShippingPolicy {
  pub fn resolve(&self, client_shipping: Decimal, ships_physical: bool) -> Decimal {
    match self {
      Self::ClientFlat => client_shipping,
      Self::Flat(fee) if ships_physical => *fee,
      Self::Flat(_) => Decimal::ZERO,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "rate", rename_all = "snake_case")]
pub enum TaxPolicy {
  ClientFlat,
  /// Fraction of the subtotal, e.g. `0.075`.
  Rate(Decimal),
}

impl TaxPolicy {
  pub fn resolve(&self, client_tax: Decimal, subtotal: Decimal) -> Decimal {
    match self {
      Self::ClientFlat => client_tax,
      Self::Rate(rate) => round_money(subtotal * *rate),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ItemKind;
  use std::str::FromStr;

  fn money(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
  }

  fn line(price: &str, quantity: i32) -> LineItem {
    LineItem {
      item_id: 1,
      kind: ItemKind::Physical,
      title: "Book".to_string(),
      unit_price: money(price),
      quantity,
      line_total: line_total(money(price), quantity),
    }
  }

  #[test]
  fn totals_follow_the_checkout_example() {
    let totals = Totals::compute(&[line("10.00", 2)], money("5.00"), money("1.50"));
    assert_eq!(totals.subtotal, money("20.00"));
    assert_eq!(totals.total, money("26.50"));
    assert!(check_client_total(money("26.50"), totals.total, MONEY_TOLERANCE).is_ok());
  }

  #[test]
  fn client_total_outside_tolerance_is_rejected() {
    let server = money("26.50");
    assert!(check_client_total(money("26.51"), server, MONEY_TOLERANCE).is_ok());
    match check_client_total(money("26.52"), server, MONEY_TOLERANCE) {
      Err(QuireError::TotalMismatch { client, server: s }) => {
        assert_eq!(client, money("26.52"));
        assert_eq!(s, server);
      }
      other => panic!("expected TotalMismatch, got {:?}", other),
    }
    assert!(check_client_total(money("16.50"), server, MONEY_TOLERANCE).is_err());
  }

  #[test]
  fn line_totals_round_half_away_from_zero() {
    assert_eq!(line_total(money("0.335"), 1), money("0.34"));
    assert_eq!(line_total(money("3.333"), 3), money("10.00"));
  }

  #[test]
  fn flat_shipping_only_applies_to_physical_orders() {
    let policy = ShippingPolicy::Flat(money("4.99"));
    assert_eq!(policy.resolve(money("0"), true), money("4.99"));
    assert_eq!(policy.resolve(money("9.99"), false), Decimal::ZERO);
    assert_eq!(ShippingPolicy::ClientFlat.resolve(money("7.00"), false), money("7.00"));
  }

  #[test]
  fn tax_rate_is_rounded_to_cents() {
    assert_eq!(TaxPolicy::Rate(money("0.075")).resolve(Decimal::ZERO, money("19.99")), money("1.50"));
  }
}
