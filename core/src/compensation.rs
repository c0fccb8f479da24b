// quire/src/compensation.rs

//! Durable retry queue for compensations that could not be applied inline
//! (a failure webhook whose unit of work did not commit). Tasks are retried
//! with exponential backoff and parked as `dead_letter` after too many tries.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{CompensationStatus, CompensationTask};
use crate::payments::{CallbackEvidence, PaymentEngine};
use crate::provider::CallbackEvent;
use crate::store::{Store, UnitOfWork};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

pub async fn enqueue(uow: &mut dyn UnitOfWork, task: &CompensationTask) -> Result<()> {
  uow.enqueue_compensation(task).await?;
  tracing::warn!(task_id = %task.id, transaction_id = %task.transaction_id, "Compensation queued");
  Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationReport {
  pub examined: usize,
  pub resolved: usize,
  pub rescheduled: usize,
  pub dead_lettered: usize,
}

#[derive(Clone)]
pub struct CompensationQueue {
  store: Arc<dyn Store>,
  config: Arc<EngineConfig>,
}

impl CompensationQueue {
  pub fn new(store: Arc<dyn Store>, config: Arc<EngineConfig>) -> Self {
    Self { store, config }
  }

  /// Retries every task due at `now`.
  ///
  /// Due tasks are leased first (their `next_attempt_at` pushed past the
  /// lease), so a second worker draining concurrently skips them.
  #[instrument(name = "CompensationQueue::retry_due", skip(self, engine), err)]
  pub async fn retry_due(&self, engine: &PaymentEngine, now: DateTime<Utc>) -> Result<CompensationReport> {
    let leased = {
      let mut uow = self.store.begin().await?;
      let mut due = uow.due_compensations(now, self.config.compensation_batch_size).await?;
      for task in &mut due {
        task.next_attempt_at = now + self.config.compensation_lease;
        task.updated_at = now;
        uow.update_compensation(task).await?;
      }
      uow.commit().await?;
      due
    };

    let mut report = CompensationReport {
      examined: leased.len(),
      ..CompensationReport::default()
    };

    for task in leased {
      let event = CallbackEvent {
        transaction_id: task.transaction_id.clone(),
        status: task.target_status,
        provider_transaction_id: task.provider_transaction_id.clone(),
        failure_reason: Some(task.reason.clone()),
      };
      let evidence = CallbackEvidence {
        verified: true,
        ..CallbackEvidence::default()
      };
      let outcome = engine.reconcile(&event, &evidence).await;

      let mut uow = self.store.begin().await?;
      let Some(mut current) = uow.lock_compensation(task.id).await? else {
        continue;
      };
      current.attempts += 1;
      current.updated_at = Utc::now();
      match outcome {
        Ok(reconciliation) => {
          current.status = CompensationStatus::Resolved;
          current.order_id = reconciliation.order_id.or(current.order_id);
          current.last_error = None;
          report.resolved += 1;
          tracing::info!(task_id = %current.id, outcome = ?reconciliation.outcome, "Compensation resolved");
        }
        Err(e) if current.attempts >= self.config.max_compensation_attempts => {
          current.status = CompensationStatus::DeadLetter;
          current.last_error = Some(e.to_string());
          report.dead_lettered += 1;
          tracing::error!(
            task_id = %current.id,
            transaction_id = %current.transaction_id,
            attempts = current.attempts,
            error = %e,
            "Compensation moved to dead letter, manual intervention required"
          );
        }
        Err(e) => {
          current.next_attempt_at = now + self.config.compensation_backoff(current.attempts);
          current.last_error = Some(e.to_string());
          report.rescheduled += 1;
          tracing::warn!(task_id = %current.id, attempts = current.attempts, error = %e, "Compensation retry failed");
        }
      }
      uow.update_compensation(&current).await?;
      uow.commit().await?;
    }

    Ok(report)
  }
}
