// quire_server/src/state.rs
use crate::config::AppConfig;
use quire::Platform;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub platform: Arc<Platform>,
  pub config: Arc<AppConfig>,
  /// "postgres" or "memory", reported by the health check.
  pub store_backend: &'static str,
}
