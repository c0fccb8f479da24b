// tests/concurrency_tests.rs
mod common;

use common::*;
use chrono::{Duration, Utc};
use quire::model::{ChargeStatus, IdempotencyScope, OrderStatus, PaymentStatus, SubscriptionStatus};
use quire::{CreateSubscription, EngineConfig, ErrorKind, InitializePayment, Platform, SubscriptionView, UpdateOrderStatus};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

struct Shared {
  harness: Harness,
  platform: Arc<Platform>,
}

fn shared() -> Shared {
  let harness = Harness::new();
  let platform = Platform::new(
    Arc::new(harness.store.clone()),
    harness.provider.clone(),
    harness.notifier.clone(),
    EngineConfig::default(),
  )
  .unwrap();
  Shared {
    harness,
    platform: Arc::new(platform),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_checkouts_never_oversell() {
  let s = shared();
  s.harness.book(42, "10.00", 5).await;

  let mut handles = Vec::new();
  for _ in 0..12 {
    let platform = s.platform.clone();
    handles.push(tokio::spawn(async move {
      platform
        .checkout(order_request(vec![physical(42, 1)], "0", "0", "10.00"))
        .await
    }));
  }

  let mut placed = 0;
  let mut out_of_stock = 0;
  for handle in handles {
    match handle.await.unwrap() {
      Ok(_) => placed += 1,
      Err(e) => {
        assert_eq!(e.kind(), ErrorKind::InsufficientStock);
        out_of_stock += 1;
      }
    }
  }

  assert_eq!(placed, 5);
  assert_eq!(out_of_stock, 7);
  assert_eq!(s.harness.stock(42).await, 0);
  assert_eq!(s.harness.store.orders().await.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_requests_with_one_key_create_one_order() {
  let s = shared();
  s.harness.book(42, "10.00", 50).await;
  let request = keyed(order_request(vec![physical(42, 2)], "0", "0", "20.00"), "double-click");

  let mut handles = Vec::new();
  for _ in 0..8 {
    let platform = s.platform.clone();
    let request = request.clone();
    handles.push(tokio::spawn(async move { platform.checkout(request).await }));
  }

  let mut order_ids = Vec::new();
  for handle in handles {
    // A request racing an unfinished claim is told to retry; anything else
    // must see the same order.
    match handle.await.unwrap() {
      Ok(receipt) => order_ids.push(receipt.order_id),
      Err(e) => assert_eq!(e.kind(), ErrorKind::IdempotencyConflict),
    }
  }

  assert!(!order_ids.is_empty());
  assert!(order_ids.windows(2).all(|w| w[0] == w[1]));
  assert_eq!(s.harness.store.orders().await.len(), 1);
  assert_eq!(s.harness.stock(42).await, 48);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_failure_webhook_racing_cancellation_restores_stock_once() {
  let s = shared();
  s.harness.book(42, "10.00", 10).await;
  let receipt = s
    .platform
    .checkout(order_request(vec![physical(42, 4)], "0", "0", "40.00"))
    .await
    .unwrap();
  let session = s
    .platform
    .payments()
    .initialize_payment(InitializePayment {
      order_id: receipt.order_id,
      method: "card".to_string(),
      amount: receipt.total,
      currency: "USD".to_string(),
      idempotency_key: None,
    })
    .await
    .unwrap();
  assert_eq!(s.harness.stock(42).await, 6);

  let (payload, signature) = signed_callback(&session.transaction_id, PaymentStatus::Failed);
  let webhook = {
    let platform = s.platform.clone();
    let payload = payload.clone();
    let signature = signature.clone();
    tokio::spawn(async move { platform.payment_callback(&payload, &signature).await })
  };
  let cancel = {
    let platform = s.platform.clone();
    let order_id = receipt.order_id;
    tokio::spawn(async move {
      platform
        .orders()
        .update_status(
          order_id,
          UpdateOrderStatus {
            status: OrderStatus::Cancelled,
            note: Some("customer request".to_string()),
            actor: Some("support".to_string()),
          },
        )
        .await
    })
  };
  let webhook = webhook.await.unwrap();
  let cancel = cancel.await.unwrap();

  // Whichever lands second finds the reservation already released.
  assert!(webhook.is_ok());
  if let Err(e) = &cancel {
    assert_eq!(e.kind(), ErrorKind::IllegalTransition);
  }
  assert_eq!(s.harness.stock(42).await, 10);
  let order = s.platform.orders().get_order(receipt.order_id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Cancelled);
  assert!(!order.stock_reserved);

  // Redelivery later changes nothing.
  s.platform.payment_callback(&payload, &signature).await.unwrap();
  assert_eq!(s.harness.stock(42).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_duplicate_webhook_deliveries_in_parallel_apply_once() {
  let s = shared();
  s.harness.book(42, "10.00", 10).await;
  let receipt = s
    .platform
    .checkout(order_request(vec![physical(42, 3)], "0", "0", "30.00"))
    .await
    .unwrap();
  let session = s
    .platform
    .payments()
    .initialize_payment(InitializePayment {
      order_id: receipt.order_id,
      method: "card".to_string(),
      amount: receipt.total,
      currency: "USD".to_string(),
      idempotency_key: None,
    })
    .await
    .unwrap();

  let (payload, signature) = signed_callback(&session.transaction_id, PaymentStatus::Cancelled);
  let mut handles = Vec::new();
  for _ in 0..6 {
    let platform = s.platform.clone();
    let payload = payload.clone();
    let signature = signature.clone();
    handles.push(tokio::spawn(async move { platform.payment_callback(&payload, &signature).await }));
  }

  let mut released = 0;
  for handle in handles {
    let reconciliation = handle.await.unwrap().unwrap();
    if reconciliation.stock_released {
      released += 1;
    }
  }

  assert_eq!(released, 1);
  assert_eq!(s.harness.stock(42).await, 10);
}

async fn subscribed(s: &Shared, auto_renew: bool) -> SubscriptionView {
  s.harness.package(700, "9.99", 30).await;
  s.platform
    .subscriptions()
    .create(CreateSubscription {
      customer_id: Uuid::new_v4(),
      package_id: 700,
      payment_method: "card".to_string(),
      auto_renew,
      idempotency_key: None,
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_overlapping_renewal_sweeps_charge_a_period_once() {
  let s = shared();
  let view = subscribed(&s, true).await;
  let old_end = view.subscription.end_date;
  s.harness.provider.always(Scripted::Complete);
  s.harness.provider.slow(StdDuration::from_millis(200));

  let at = Utc::now() + Duration::days(29);
  let sweeps: Vec<_> = (0..2)
    .map(|_| {
      let platform = s.platform.clone();
      tokio::spawn(async move { platform.run_renewal_sweep(at).await })
    })
    .collect();

  let mut renewed = 0;
  for sweep in sweeps {
    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.errors, 0);
    renewed += report.renewed;
  }

  assert_eq!(renewed, 1);
  // One charge at creation, one for the renewed period.
  assert_eq!(s.harness.provider.calls(), 2);
  let after = s.platform.subscriptions().status(view.subscription.id).await.unwrap();
  assert_eq!(after.subscription.end_date, old_end + Duration::days(30));
  assert_eq!(after.payments.len(), 2);
  assert!(after.payments.iter().all(|p| p.status == ChargeStatus::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_initializations_with_different_keys_open_one_payment() {
  let s = shared();
  s.harness.book(42, "10.00", 10).await;
  let receipt = s
    .platform
    .checkout(order_request(vec![physical(42, 1)], "0", "0", "10.00"))
    .await
    .unwrap();
  s.harness.provider.slow(StdDuration::from_millis(200));

  let attempts: Vec<_> = ["a", "b"]
    .into_iter()
    .map(|key| {
      let platform = s.platform.clone();
      let request = InitializePayment {
        order_id: receipt.order_id,
        method: "card".to_string(),
        amount: receipt.total,
        currency: "USD".to_string(),
        idempotency_key: Some(key.to_string()),
      };
      tokio::spawn(async move { platform.payments().initialize_payment(request).await })
    })
    .collect();

  let mut opened = 0;
  for attempt in attempts {
    match attempt.await.unwrap() {
      Ok(_) => opened += 1,
      Err(e) => assert_eq!(e.kind(), ErrorKind::IllegalTransition),
    }
  }

  assert_eq!(opened, 1);
  assert_eq!(s.harness.provider.calls(), 1);
  assert_eq!(s.harness.store.payments().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_cancel_during_manual_renewal_records_a_refund() {
  let s = shared();
  let view = subscribed(&s, true).await;
  let subscription_id = view.subscription.id;
  s.harness.provider.always(Scripted::Complete);
  s.harness.provider.slow(StdDuration::from_millis(300));

  let renew = {
    let platform = s.platform.clone();
    tokio::spawn(async move { platform.subscriptions().renew(subscription_id, Some("renew-1")).await })
  };
  // Lands while the renewal charge is with the provider.
  tokio::time::sleep(StdDuration::from_millis(100)).await;
  s.platform.subscriptions().cancel(subscription_id, None).await.unwrap();

  let err = renew.await.unwrap().unwrap_err();
  assert_eq!(err.kind(), ErrorKind::IllegalTransition);

  let after = s.platform.subscriptions().status(subscription_id).await.unwrap();
  assert_eq!(after.subscription.status, SubscriptionStatus::Cancelled);
  assert_eq!(after.subscription.end_date, view.subscription.end_date);
  assert_eq!(after.payments.len(), 2);
  let charge = &after.payments[1];
  assert_eq!(charge.status, ChargeStatus::Completed);
  assert!(charge.provider_ref.is_some());
  assert!(charge.refund_required());
  assert!(s
    .harness
    .store
    .idempotency_record(IdempotencyScope::SubscriptionRenew, "renew-1")
    .await
    .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_cancel_during_sweep_renewal_records_a_refund() {
  let s = shared();
  let view = subscribed(&s, true).await;
  let subscription_id = view.subscription.id;
  s.harness.provider.always(Scripted::Complete);
  s.harness.provider.slow(StdDuration::from_millis(300));

  let sweep = {
    let platform = s.platform.clone();
    tokio::spawn(async move { platform.run_renewal_sweep(Utc::now() + Duration::days(29)).await })
  };
  tokio::time::sleep(StdDuration::from_millis(100)).await;
  s.platform.subscriptions().cancel(subscription_id, None).await.unwrap();

  let report = sweep.await.unwrap().unwrap();
  assert_eq!(report.renewed, 0);
  assert_eq!(report.refunds_required, 1);

  let after = s.platform.subscriptions().status(subscription_id).await.unwrap();
  assert_eq!(after.subscription.status, SubscriptionStatus::Cancelled);
  assert_eq!(after.subscription.end_date, view.subscription.end_date);
  assert!(after.payments[1].refund_required());
}
