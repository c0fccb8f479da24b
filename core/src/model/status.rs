// quire/src/model/status.rs

//! Closed status enumerations and their transition tables.
//!
//! Every status write in the engine goes through [`StatusMachine::transition`],
//! so an edge missing from a table below cannot be persisted.

use crate::error::{QuireError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait StatusMachine: Copy + Eq + fmt::Display + 'static {
  /// Entity name used in `IllegalTransition` errors.
  const ENTITY: &'static str;

  fn allowed_targets(self) -> &'static [Self];

  fn can_transition_to(self, next: Self) -> bool {
    self.allowed_targets().contains(&next)
  }

  fn transition(self, next: Self) -> Result<Self> {
    if self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(QuireError::IllegalTransition {
        entity: Self::ENTITY,
        from: self.to_string(),
        to: next.to_string(),
      })
    }
  }
}

fn unknown_status(entity: &str, raw: &str) -> QuireError {
  QuireError::Validation(format!("Unknown {} status '{}'", entity, raw))
}

// --- Order ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Pending,
  Paid,
  Processing,
  Shipped,
  Delivered,
  Cancelled,
  Refunded,
}

impl OrderStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Processing => "processing",
      Self::Shipped => "shipped",
      Self::Delivered => "delivered",
      Self::Cancelled => "cancelled",
      Self::Refunded => "refunded",
    }
  }
}

impl StatusMachine for OrderStatus {
  const ENTITY: &'static str = "order";

  fn allowed_targets(self) -> &'static [Self] {
    use OrderStatus::*;
    match self {
      Pending => &[Paid, Processing, Cancelled],
      Paid => &[Processing, Shipped, Cancelled, Refunded],
      Processing => &[Shipped, Cancelled],
      Shipped => &[Delivered],
      Delivered => &[Refunded],
      Cancelled | Refunded => &[],
    }
  }
}

impl FromStr for OrderStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "paid" => Ok(Self::Paid),
      "processing" => Ok(Self::Processing),
      "shipped" => Ok(Self::Shipped),
      "delivered" => Ok(Self::Delivered),
      "cancelled" => Ok(Self::Cancelled),
      "refunded" => Ok(Self::Refunded),
      other => Err(unknown_status("order", other)),
    }
  }
}

/// Payment state as tracked on the order itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
  Pending,
  Paid,
  Failed,
  Refunded,
}

impl OrderPaymentStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Failed => "failed",
      Self::Refunded => "refunded",
    }
  }
}

impl FromStr for OrderPaymentStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "paid" => Ok(Self::Paid),
      "failed" => Ok(Self::Failed),
      "refunded" => Ok(Self::Refunded),
      other => Err(unknown_status("order payment", other)),
    }
  }
}

// --- Payment ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  Pending,
  Processing,
  Completed,
  Failed,
  Cancelled,
  Refunded,
}

impl PaymentStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Processing => "processing",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::Refunded => "refunded",
    }
  }

  /// Failed and cancelled payments release the order's stock reservation.
  pub const fn releases_reservation(&self) -> bool {
    matches!(self, Self::Failed | Self::Cancelled)
  }
}

impl StatusMachine for PaymentStatus {
  const ENTITY: &'static str = "payment";

  fn allowed_targets(self) -> &'static [Self] {
    use PaymentStatus::*;
    match self {
      // Providers may report a terminal state without ever sending `processing`.
      Pending => &[Processing, Completed, Failed, Cancelled],
      Processing => &[Completed, Failed, Cancelled],
      Completed => &[Refunded],
      Failed | Cancelled | Refunded => &[],
    }
  }
}

impl FromStr for PaymentStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "processing" => Ok(Self::Processing),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "cancelled" => Ok(Self::Cancelled),
      "refunded" => Ok(Self::Refunded),
      other => Err(unknown_status("payment", other)),
    }
  }
}

// --- Subscription ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
  Active,
  PendingRenewal,
  Suspended,
  Cancelled,
  Expired,
}

impl SubscriptionStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::PendingRenewal => "pending_renewal",
      Self::Suspended => "suspended",
      Self::Cancelled => "cancelled",
      Self::Expired => "expired",
    }
  }
}

impl StatusMachine for SubscriptionStatus {
  const ENTITY: &'static str = "subscription";

  fn allowed_targets(self) -> &'static [Self] {
    use SubscriptionStatus::*;
    match self {
      Active => &[PendingRenewal, Suspended, Cancelled, Expired],
      PendingRenewal => &[Active, Suspended, Cancelled, Expired],
      Suspended => &[Active, Cancelled, Expired],
      Expired => &[Active],
      Cancelled => &[],
    }
  }
}

impl FromStr for SubscriptionStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "active" => Ok(Self::Active),
      "pending_renewal" => Ok(Self::PendingRenewal),
      "suspended" => Ok(Self::Suspended),
      "cancelled" => Ok(Self::Cancelled),
      "expired" => Ok(Self::Expired),
      other => Err(unknown_status("subscription", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
  Pending,
  Completed,
  Failed,
}

impl ChargeStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }
}

impl FromStr for ChargeStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(unknown_status("subscription payment", other)),
    }
  }
}

// --- Compensation queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
  Pending,
  Resolved,
  DeadLetter,
}

impl CompensationStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Resolved => "resolved",
      Self::DeadLetter => "dead_letter",
    }
  }
}

impl FromStr for CompensationStatus {
  type Err = QuireError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "resolved" => Ok(Self::Resolved),
      "dead_letter" => Ok(Self::DeadLetter),
      other => Err(unknown_status("compensation", other)),
    }
  }
}

macro_rules! display_as_str {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl fmt::Display for $ty {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
          f.write_str(self.as_str())
        }
      }
    )+
  };
}

display_as_str!(
  OrderStatus,
  OrderPaymentStatus,
  PaymentStatus,
  SubscriptionStatus,
  ChargeStatus,
  CompensationStatus,
);
