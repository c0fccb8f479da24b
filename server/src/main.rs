// quire_server/src/main.rs

mod config;
mod db;
mod errors;
mod services;
mod state;
mod sweeps;
mod web;

use crate::config::AppConfig;
use crate::db::PgStore;
use crate::errors::AppError;
use crate::services::{LogNotifier, MockPaymentProvider};
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use quire::{MemoryStore, Platform, Store};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
  let builder = tracing_subscriber::fmt()
    .with_max_level(Level::INFO)
    .with_env_filter(EnvFilter::from_default_env())
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

async fn build_state(app_config: Arc<AppConfig>) -> Result<AppState, AppError> {
  let (store, store_backend): (Arc<dyn Store>, &'static str) = match &app_config.database_url {
    Some(url) => {
      let pool = db::connect(&app_config, url).await?;
      if app_config.seed_db {
        db::seed::seed_postgres(&pool).await?;
      }
      (Arc::new(PgStore::new(pool)), "postgres")
    }
    None => {
      tracing::warn!("DATABASE_URL not set; running on the in-memory store. Data is lost on exit.");
      let store = MemoryStore::new();
      db::seed::seed_memory(&store).await;
      (Arc::new(store), "memory")
    }
  };

  let provider = Arc::new(MockPaymentProvider::new(&app_config.webhook_secret));
  let notifier = Arc::new(LogNotifier::new(app_config.mock_email_sender.clone()));
  let platform = Platform::new(store, provider, notifier, app_config.engine_config())?;

  Ok(AppState {
    platform: Arc::new(platform),
    config: app_config,
    store_backend,
  })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let log_json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
  init_tracing(log_json);

  tracing::info!("Starting quire server...");

  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };

  let app_state = match build_state(app_config.clone()).await {
    Ok(state) => state,
    Err(e) => {
      tracing::error!(error = %e, "Failed to initialize the application.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };

  if app_config.run_sweeps {
    sweeps::spawn_renewal_sweep(app_state.platform.clone(), app_config.renewal_sweep_interval);
    sweeps::spawn_compensation_worker(app_state.platform.clone(), app_config.compensation_interval);
    tracing::info!("Background sweeps started.");
  }

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!(store = app_state.store_backend, "Attempting to bind server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .app_data(web::json_config())
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
