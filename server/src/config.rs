// quire_server/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use quire::pricing::{ShippingPolicy, TaxPolicy};
use quire::EngineConfig;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// Without a database URL the server runs on the in-memory store.
  pub database_url: Option<String>,
  pub database_max_connections: u32,

  pub currency: String,
  pub total_tolerance: Decimal,
  /// `None` trusts the shipping amount sent by the storefront.
  pub flat_shipping: Option<Decimal>,
  /// `None` trusts the tax amount sent by the storefront.
  pub tax_rate: Option<Decimal>,

  pub webhook_secret: String,
  pub mock_email_sender: String,

  pub run_sweeps: bool,
  pub renewal_sweep_interval: Duration,
  pub compensation_interval: Duration,

  pub seed_db: bool,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };

    let server_host = get_env("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = parse_env("SERVER_PORT", "8080")?;
    let database_url = get_env("DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
    let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;

    let currency = get_env("STORE_CURRENCY").unwrap_or_else(|_| "USD".to_string()).to_uppercase();
    let total_tolerance = parse_env("TOTAL_TOLERANCE", "0.01")?;
    let flat_shipping = parse_optional_env("FLAT_SHIPPING")?;
    let tax_rate = parse_optional_env("TAX_RATE")?;

    let webhook_secret = get_env("PAYMENT_WEBHOOK_SECRET")?;
    let mock_email_sender = get_env("MOCK_EMAIL_SENDER").unwrap_or_else(|_| "noreply@quire.local".to_string());

    let run_sweeps = parse_env("RUN_SWEEPS", "true")?;
    let renewal_sweep_interval = Duration::from_secs(parse_env("RENEWAL_SWEEP_INTERVAL_SECS", "3600")?);
    let compensation_interval = Duration::from_secs(parse_env("COMPENSATION_INTERVAL_SECS", "60")?);

    let seed_db = parse_env("SEED_DB", "false")?;

    tracing::info!(
      database = database_url.is_some(),
      currency = %currency,
      run_sweeps,
      "Application configuration loaded successfully."
    );

    Ok(Self {
      server_host,
      server_port,
      database_url,
      database_max_connections,
      currency,
      total_tolerance,
      flat_shipping,
      tax_rate,
      webhook_secret,
      mock_email_sender,
      run_sweeps,
      renewal_sweep_interval,
      compensation_interval,
      seed_db,
    })
  }

  /// Business rules handed to the engine.
  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      currency: self.currency.clone(),
      total_tolerance: self.total_tolerance,
      shipping: self.flat_shipping.map_or(ShippingPolicy::ClientFlat, ShippingPolicy::Flat),
      tax: self.tax_rate.map_or(TaxPolicy::ClientFlat, TaxPolicy::Rate),
      ..EngineConfig::default()
    }
  }
}

fn parse_env<T>(var_name: &str, default: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  env::var(var_name)
    .unwrap_or_else(|_| default.to_string())
    .trim()
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {}: {}", var_name, e)))
}

fn parse_optional_env<T>(var_name: &str) -> Result<Option<T>>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match env::var(var_name) {
    Ok(raw) if !raw.trim().is_empty() => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|e| AppError::Config(format!("Invalid {}: {}", var_name, e))),
    _ => Ok(None),
  }
}
