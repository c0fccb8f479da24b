// tests/compensation_tests.rs
mod common;

use chrono::{Duration, Utc};
use common::*;
use quire::model::{CompensationStatus, OrderStatus, PaymentStatus};
use quire::{EngineConfig, InitializePayment, PaymentSession, ReconcileOutcome};
use serial_test::serial;

async fn processing_payment(h: &Harness) -> PaymentSession {
  h.book(42, "10.00", 10).await;
  let receipt = h
    .platform
    .checkout(order_request(vec![physical(42, 2)], "0", "0", "20.00"))
    .await
    .unwrap();
  h.platform
    .payments()
    .initialize_payment(InitializePayment {
      order_id: receipt.order_id,
      method: "card".to_string(),
      amount: receipt.total,
      currency: "USD".to_string(),
      idempotency_key: None,
    })
    .await
    .unwrap()
}

#[tokio::test]
#[serial]
async fn test_failed_compensation_is_queued_and_retried() {
  let h = Harness::new();
  let session = processing_payment(&h).await;
  assert_eq!(h.stock(42).await, 8);

  h.store.fail_stock_writes(true);
  let (payload, signature) = signed_callback(&session.transaction_id, PaymentStatus::Failed);
  let deferred = h.platform.payment_callback(&payload, &signature).await.unwrap();

  assert_eq!(deferred.outcome, ReconcileOutcome::Deferred);
  let payment = h.platform.payments().get_payment(&session.transaction_id).await.unwrap();
  assert_eq!(payment.status, PaymentStatus::Processing);
  assert_eq!(h.stock(42).await, 8);
  let tasks = h.store.compensations().await;
  assert_eq!(tasks.len(), 1);
  assert_eq!(tasks[0].status, CompensationStatus::Pending);
  assert_eq!(tasks[0].target_status, PaymentStatus::Failed);

  // Not due yet.
  let early = h.platform.retry_compensations(Utc::now()).await.unwrap();
  assert_eq!(early.examined, 0);

  h.store.fail_stock_writes(false);
  let report = h.platform.retry_compensations(Utc::now() + Duration::minutes(1)).await.unwrap();
  assert_eq!(report.resolved, 1);

  assert_eq!(h.stock(42).await, 10);
  let payment = h.platform.payments().get_payment(&session.transaction_id).await.unwrap();
  assert_eq!(payment.status, PaymentStatus::Failed);
  assert!(payment.webhook_verified);
  let order = h.platform.orders().get_order(payment.order_id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Cancelled);

  let task = &h.store.compensations().await[0];
  assert_eq!(task.status, CompensationStatus::Resolved);
  assert_eq!(task.order_id, Some(order.id));
  assert_eq!(task.attempts, 1);

  // Nothing left to do, and the original webhook replays cleanly.
  let idle = h.platform.retry_compensations(Utc::now() + Duration::hours(2)).await.unwrap();
  assert_eq!(idle.examined, 0);
  let replay = h.platform.payment_callback(&payload, &signature).await.unwrap();
  assert_eq!(replay.outcome, ReconcileOutcome::Replayed);
  assert_eq!(h.stock(42).await, 10);
}

#[tokio::test]
#[serial]
async fn test_compensation_backs_off_then_dead_letters() {
  let config = EngineConfig {
    max_compensation_attempts: 3,
    ..EngineConfig::default()
  };
  let h = Harness::with_config(config);
  let session = processing_payment(&h).await;

  h.store.fail_stock_writes(true);
  let (payload, signature) = signed_callback(&session.transaction_id, PaymentStatus::Cancelled);
  h.platform.payment_callback(&payload, &signature).await.unwrap();

  let start = Utc::now();
  let first = h.platform.retry_compensations(start + Duration::minutes(1)).await.unwrap();
  assert_eq!(first.rescheduled, 1);
  let task = h.store.compensations().await.remove(0);
  assert_eq!(task.attempts, 1);
  assert_eq!(task.next_attempt_at, start + Duration::minutes(1) + Duration::seconds(60));
  assert!(task.last_error.is_some());

  // Retrying before the backoff elapses finds nothing.
  let too_soon = h.platform.retry_compensations(start + Duration::seconds(90)).await.unwrap();
  assert_eq!(too_soon.examined, 0);

  h.platform.retry_compensations(start + Duration::hours(1)).await.unwrap();
  let last = h.platform.retry_compensations(start + Duration::hours(2)).await.unwrap();
  assert_eq!(last.dead_lettered, 1);

  let task = h.store.compensations().await.remove(0);
  assert_eq!(task.status, CompensationStatus::DeadLetter);
  assert_eq!(task.attempts, 3);
  assert_eq!(h.stock(42).await, 8);

  let after = h.platform.retry_compensations(start + Duration::hours(5)).await.unwrap();
  assert_eq!(after.examined, 0);
}

#[tokio::test]
#[serial]
async fn test_caller_errors_are_not_queued() {
  let h = Harness::new();
  let session = processing_payment(&h).await;
  // An unknown transaction is the caller's problem, not a storage outage.
  let (payload, signature) = signed_callback("TXN-UNKNOWN", PaymentStatus::Failed);
  assert!(h.platform.payment_callback(&payload, &signature).await.is_err());
  assert!(h.store.compensations().await.is_empty());

  let (payload, signature) = signed_callback(&session.transaction_id, PaymentStatus::Completed);
  let applied = h.platform.payment_callback(&payload, &signature).await.unwrap();
  assert_eq!(applied.outcome, ReconcileOutcome::Applied);
  assert!(h.store.compensations().await.is_empty());
}
