// quire_server/src/sweeps.rs

//! Background loops for subscription renewals and the compensation queue.
//! Several instances may run them at once. A renewal records its unsettled
//! charge before calling the provider, and a second sweep skips the period
//! while that charge's lease (`renewal_lease`) is held. Queued compensations
//! are claimed with `SKIP LOCKED` and leased the same way.

use chrono::Utc;
use quire::Platform;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub fn spawn_renewal_sweep(platform: Arc<Platform>, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      match platform.run_renewal_sweep(Utc::now()).await {
        Ok(report) if report.due > 0 || report.expired > 0 => {
          tracing::info!(?report, "Renewal sweep finished");
        }
        Ok(_) => tracing::debug!("Renewal sweep found nothing due"),
        Err(e) => tracing::error!(error = %e, "Renewal sweep failed"),
      }
    }
  })
}

pub fn spawn_compensation_worker(platform: Arc<Platform>, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      match platform.retry_compensations(Utc::now()).await {
        Ok(report) if report.examined > 0 => tracing::info!(?report, "Compensation retry pass finished"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Compensation retry pass failed"),
      }
    }
  })
}
