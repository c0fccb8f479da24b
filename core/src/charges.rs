// quire/src/charges.rs

use crate::error::{QuireError, Result};
use crate::provider::{ChargeRequest, Initiation, PaymentProvider};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

/// The single place the engine asks a provider for money. Order payments,
/// subscription creation and renewals all go through it, and none of them may
/// call it while a unit of work is open.
#[derive(Clone)]
pub struct ChargeInitiator {
  provider: Arc<dyn PaymentProvider>,
}

impl ChargeInitiator {
  pub fn new(provider: Arc<dyn PaymentProvider>) -> Self {
    Self { provider }
  }

  pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
    &self.provider
  }

  #[instrument(
    name = "ChargeInitiator::charge",
    skip(self, request),
    fields(provider = %self.provider.name(), amount = %request.amount, currency = %request.currency),
    err
  )]
  pub async fn charge(&self, request: &ChargeRequest) -> Result<Initiation> {
    if request.amount <= Decimal::ZERO {
      return Err(QuireError::Validation("Charge amount must be positive".to_string()));
    }
    match self.provider.initiate(request).await {
      Ok(initiation) => {
        tracing::info!(provider_ref = %initiation.provider_ref, status = ?initiation.status, "Charge initiated");
        Ok(initiation)
      }
      Err(e) => {
        tracing::warn!(error = %e, "Provider rejected charge");
        Err(QuireError::Provider(e.to_string()))
      }
    }
  }
}
