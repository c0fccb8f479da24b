// quire_server/src/web/handlers/maintenance.rs

//! Manual triggers for the background sweeps.

use crate::errors::Result;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SweepQuery {
  /// Runs the sweep as of this instant. Never later than the current time.
  pub at: Option<DateTime<Utc>>,
}

impl SweepQuery {
  fn instant(&self) -> DateTime<Utc> {
    let now = Utc::now();
    match self.at {
      Some(at) if at > now => {
        tracing::warn!(requested = %at, "Sweep instant in the future clamped to now");
        now
      }
      Some(at) => at,
      None => now,
    }
  }
}

pub async fn run_renewals_handler(state: web::Data<AppState>, query: web::Query<SweepQuery>) -> Result<HttpResponse> {
  let now = query.instant();
  let report = state.platform.run_renewal_sweep(now).await?;
  Ok(HttpResponse::Ok().json(report))
}

pub async fn retry_compensations_handler(
  state: web::Data<AppState>,
  query: web::Query<SweepQuery>,
) -> Result<HttpResponse> {
  let now = query.instant();
  let report = state.platform.retry_compensations(now).await?;
  Ok(HttpResponse::Ok().json(report))
}
