// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use quire::model::{Address, CustomerInfo, InventoryItem, ItemKind, Order, Package, Payment, PaymentStatus};
use quire::{
  CartLine, ChargeRequest, CreateOrderRequest, EngineConfig, HmacSignatureVerifier, Initiation, InitiationStatus,
  MemoryStore, Notifier, PaymentProvider, Platform,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_quire_tests";

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

pub fn money(s: &str) -> Decimal {
  Decimal::from_str(s).unwrap()
}

// --- Provider double ---

#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
  /// Accepted; the outcome arrives by callback.
  Pending,
  Complete,
  Decline(&'static str),
  /// Transport-level failure.
  Error(&'static str),
}

pub struct ScriptedProvider {
  script: Mutex<VecDeque<Scripted>>,
  fallback: Mutex<Scripted>,
  latency: Mutex<Duration>,
  pub requests: Mutex<Vec<ChargeRequest>>,
  verifier: HmacSignatureVerifier,
}

impl ScriptedProvider {
  pub fn new() -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback: Mutex::new(Scripted::Pending),
      latency: Mutex::new(Duration::ZERO),
      requests: Mutex::new(Vec::new()),
      verifier: HmacSignatureVerifier::new(WEBHOOK_SECRET),
    }
  }

  /// Queues outcomes for the next calls, in order.
  pub fn push(&self, outcomes: impl IntoIterator<Item = Scripted>) {
    self.script.lock().extend(outcomes);
  }

  /// Outcome used once the queue is empty.
  pub fn always(&self, outcome: Scripted) {
    *self.fallback.lock() = outcome;
  }

  /// Every call sleeps this long before answering.
  pub fn slow(&self, latency: Duration) {
    *self.latency.lock() = latency;
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().len()
  }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
  fn name(&self) -> &str {
    "scripted"
  }

  async fn initiate(&self, request: &ChargeRequest) -> anyhow::Result<Initiation> {
    self.requests.lock().push(request.clone());
    let next = self.script.lock().pop_front();
    let outcome = next.unwrap_or_else(|| self.fallback.lock().clone());
    let latency = *self.latency.lock();
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
    let provider_ref = format!("prov_{}", Uuid::new_v4().simple());
    let (status, failure_reason) = match outcome {
      Scripted::Pending => (InitiationStatus::Pending, None),
      Scripted::Complete => (InitiationStatus::Completed, None),
      Scripted::Decline(reason) => (InitiationStatus::Failed, Some(reason.to_string())),
      Scripted::Error(message) => anyhow::bail!("{}", message),
    };
    Ok(Initiation {
      raw: json!({ "id": provider_ref, "status": format!("{:?}", status) }),
      instructions: Some(json!({ "redirect_url": format!("https://pay.example/{}", provider_ref) })),
      provider_ref,
      status,
      failure_reason,
    })
  }

  fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
    self.verifier.verify(payload, signature)
  }
}

/// Builds a signed provider callback body.
pub fn signed_callback(transaction_id: &str, status: PaymentStatus) -> (Vec<u8>, String) {
  let payload = serde_json::to_vec(&json!({
    "transaction_id": transaction_id,
    "status": status.as_str(),
    "provider_transaction_id": format!("prov_cb_{}", transaction_id),
  }))
  .unwrap();
  let signature = HmacSignatureVerifier::new(WEBHOOK_SECRET).sign(&payload);
  (payload, signature)
}

// --- Notifier double ---

#[derive(Default)]
pub struct RecordingNotifier {
  pub confirmations: Mutex<Vec<Uuid>>,
  pub payment_updates: Mutex<Vec<(Uuid, PaymentStatus)>>,
  pub fail: Mutex<bool>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send_order_confirmation(&self, order: &Order) -> anyhow::Result<()> {
    if *self.fail.lock() {
      anyhow::bail!("smtp unavailable");
    }
    self.confirmations.lock().push(order.id);
    Ok(())
  }

  async fn send_payment_status(&self, order_id: Uuid, payment: &Payment) -> anyhow::Result<()> {
    self.payment_updates.lock().push((order_id, payment.status));
    Ok(())
  }
}

// --- Harness ---

pub struct Harness {
  pub store: MemoryStore,
  pub provider: Arc<ScriptedProvider>,
  pub notifier: Arc<RecordingNotifier>,
  pub platform: Platform,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(EngineConfig::default())
  }

  pub fn with_config(config: EngineConfig) -> Self {
    setup_tracing();
    let store = MemoryStore::new();
    let provider = Arc::new(ScriptedProvider::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let platform = Platform::new(Arc::new(store.clone()), provider.clone(), notifier.clone(), config)
      .expect("workflows register");
    Self {
      store,
      provider,
      notifier,
      platform,
    }
  }

  pub async fn book(&self, id: i64, price: &str, stock: i32) {
    self
      .store
      .put_inventory_item(InventoryItem {
        id,
        title: format!("Book #{}", id),
        unit_price: money(price),
        stock_quantity: stock,
      })
      .await;
  }

  pub async fn package(&self, id: i64, price: &str, billing_period_days: i32) {
    self
      .store
      .put_package(Package {
        id,
        title: format!("Reading plan #{}", id),
        price: money(price),
        billing_period_days,
        active: true,
      })
      .await;
  }

  pub async fn stock(&self, item_id: i64) -> i32 {
    self.store.stock_of(item_id).await.expect("item seeded")
  }
}

pub fn customer() -> CustomerInfo {
  CustomerInfo {
    customer_id: Some(Uuid::new_v4()),
    name: "Ada Reader".to_string(),
    email: "ada@example.com".to_string(),
    phone: None,
  }
}

pub fn address() -> Address {
  Address {
    line1: "1 Library Lane".to_string(),
    line2: None,
    city: "Booktown".to_string(),
    region: None,
    postal_code: "12345".to_string(),
    country: "US".to_string(),
  }
}

pub fn physical(item_id: i64, quantity: i32) -> CartLine {
  CartLine {
    item_id,
    kind: ItemKind::Physical,
    quantity,
    unit_price: None,
  }
}

pub fn package_line(package_id: i64) -> CartLine {
  CartLine {
    item_id: package_id,
    kind: ItemKind::Package,
    quantity: 1,
    unit_price: None,
  }
}

pub fn order_request(lines: Vec<CartLine>, shipping: &str, tax: &str, client_total: &str) -> CreateOrderRequest {
  CreateOrderRequest {
    idempotency_key: None,
    customer: customer(),
    lines,
    shipping_address: address(),
    billing_address: None,
    shipping: money(shipping),
    tax: money(tax),
    client_total: money(client_total),
    currency: "USD".to_string(),
    notes: None,
  }
}

pub fn keyed(mut request: CreateOrderRequest, key: &str) -> CreateOrderRequest {
  request.idempotency_key = Some(key.to_string());
  request
}
