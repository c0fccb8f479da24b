// tests/order_tests.rs
mod common;

use common::*;
use quire::model::{IdempotencyScope, OrderPaymentStatus, OrderStatus};
use quire::{ErrorKind, QuireError, UpdateOrderStatus};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_checkout_prices_from_catalog_and_reserves_stock() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;

  let receipt = h
    .platform
    .checkout(order_request(vec![physical(42, 2)], "5.00", "1.50", "26.50"))
    .await
    .unwrap();

  assert_eq!(receipt.subtotal, money("20.00"));
  assert_eq!(receipt.shipping, money("5.00"));
  assert_eq!(receipt.tax, money("1.50"));
  assert_eq!(receipt.total, money("26.50"));
  assert_eq!(receipt.status, OrderStatus::Pending);
  assert_eq!(receipt.payment_status, OrderPaymentStatus::Pending);
  assert!(!receipt.existing);
  assert_eq!(h.stock(42).await, 8);

  let order = h.platform.orders().get_order(receipt.order_id).await.unwrap();
  assert_eq!(order.total, order.subtotal + order.shipping_cost + order.tax);
  assert_eq!(order.line_items[0].unit_price, money("10.00"));
  assert_eq!(order.line_items[0].line_total, money("20.00"));
  assert!(order.stock_reserved);
  assert_eq!(h.notifier.confirmations.lock().as_slice(), &[order.id]);
}

#[tokio::test]
#[serial]
async fn test_client_prices_never_reach_the_total() {
  let h = Harness::new();
  h.book(7, "12.50", 3).await;

  let mut line = physical(7, 1);
  line.unit_price = Some(money("0.01"));
  let receipt = h
    .platform
    .checkout(order_request(vec![line], "0", "0", "12.50"))
    .await
    .unwrap();

  assert_eq!(receipt.total, money("12.50"));
}

#[tokio::test]
#[serial]
async fn test_replayed_checkout_returns_the_same_order_once() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;
  let request = keyed(order_request(vec![physical(42, 2)], "5.00", "1.50", "26.50"), "cart-abc-1");

  let first = h.platform.checkout(request.clone()).await.unwrap();
  let second = h.platform.checkout(request).await.unwrap();

  assert_eq!(first.order_id, second.order_id);
  assert!(second.existing);
  assert_eq!(h.stock(42).await, 8);
  assert_eq!(h.store.orders().await.len(), 1);
  // The replay does not send a second confirmation.
  assert_eq!(h.notifier.confirmations.lock().len(), 1);

  let record = h
    .store
    .idempotency_record(IdempotencyScope::Order, "cart-abc-1")
    .await
    .unwrap();
  assert_eq!(record.resource_id, Some(first.order_id.to_string()));
}

#[tokio::test]
#[serial]
async fn test_insufficient_stock_persists_nothing() {
  let h = Harness::new();
  h.book(42, "10.00", 1).await;
  h.book(43, "4.00", 5).await;

  let err = h
    .platform
    .checkout(order_request(vec![physical(43, 1), physical(42, 2)], "0", "0", "24.00"))
    .await
    .unwrap_err();

  match err {
    QuireError::InsufficientStock {
      item_id,
      requested,
      available,
    } => {
      assert_eq!((item_id, requested, available), (42, 2, 1));
    }
    other => panic!("expected InsufficientStock, got {:?}", other),
  }
  assert_eq!(h.stock(42).await, 1);
  assert_eq!(h.stock(43).await, 5);
  assert!(h.store.orders().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_total_mismatch_rolls_back_reservation() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;

  let err = h
    .platform
    .checkout(keyed(order_request(vec![physical(42, 2)], "5.00", "1.50", "16.50"), "mismatch-1"))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::TotalMismatch);
  assert_eq!(h.stock(42).await, 10);
  assert!(h.store.orders().await.is_empty());
  // The claim rolled back with everything else, so a corrected retry may reuse the key.
  assert!(h
    .store
    .idempotency_record(IdempotencyScope::Order, "mismatch-1")
    .await
    .is_none());
}

#[tokio::test]
#[serial]
async fn test_total_within_tolerance_is_accepted() {
  let h = Harness::new();
  h.book(1, "3.33", 10).await;

  let receipt = h
    .platform
    .checkout(order_request(vec![physical(1, 3)], "0", "0", "10.00"))
    .await
    .unwrap();
  assert_eq!(receipt.total, money("9.99"));
}

#[tokio::test]
#[serial]
async fn test_validation_errors_happen_before_any_transaction() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;

  let err = h
    .platform
    .checkout(order_request(vec![physical(42, 0)], "0", "0", "0"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidQuantity);

  let err = h
    .platform
    .checkout(order_request(vec![], "0", "0", "0"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);

  let mut bad_email = order_request(vec![physical(42, 1)], "0", "0", "10.00");
  bad_email.customer.email = "not-an-email".to_string();
  assert_eq!(h.platform.checkout(bad_email).await.unwrap_err().kind(), ErrorKind::Validation);

  let mut wrong_currency = order_request(vec![physical(42, 1)], "0", "0", "10.00");
  wrong_currency.currency = "EUR".to_string();
  assert_eq!(
    h.platform.checkout(wrong_currency).await.unwrap_err().kind(),
    ErrorKind::Validation
  );

  assert_eq!(h.stock(42).await, 10);
}

#[tokio::test]
#[serial]
async fn test_unknown_item_and_inactive_package_are_not_found() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;

  let err = h
    .platform
    .checkout(order_request(vec![physical(42, 1), physical(404, 1)], "0", "0", "20.00"))
    .await
    .unwrap_err();
  assert!(matches!(err, QuireError::ItemNotFound { item_id: 404 }));
  assert_eq!(h.stock(42).await, 10);

  let err = h
    .platform
    .checkout(order_request(vec![package_line(9)], "0", "0", "5.00"))
    .await
    .unwrap_err();
  assert!(matches!(err, QuireError::ItemNotFound { item_id: 9 }));
}

#[tokio::test]
#[serial]
async fn test_package_lines_bypass_the_ledger() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;
  h.package(500, "15.00", 30).await;

  let receipt = h
    .platform
    .checkout(order_request(vec![package_line(500)], "0", "0", "15.00"))
    .await
    .unwrap();
  let order = h.platform.orders().get_order(receipt.order_id).await.unwrap();

  assert!(!order.stock_reserved);
  assert_eq!(order.line_items[0].title, "Reading plan #500");
  assert_eq!(h.stock(42).await, 10);
}

#[tokio::test]
#[serial]
async fn test_cancelling_an_order_restores_stock_once() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;
  let receipt = h
    .platform
    .checkout(order_request(vec![physical(42, 3)], "0", "0", "30.00"))
    .await
    .unwrap();
  assert_eq!(h.stock(42).await, 7);

  let cancelled = h
    .platform
    .orders()
    .update_status(
      receipt.order_id,
      UpdateOrderStatus {
        status: OrderStatus::Cancelled,
        note: Some("customer changed their mind".to_string()),
        actor: Some("support".to_string()),
      },
    )
    .await
    .unwrap();

  assert_eq!(cancelled.status, OrderStatus::Cancelled);
  assert_eq!(cancelled.payment_status, OrderPaymentStatus::Failed);
  assert!(!cancelled.stock_reserved);
  assert_eq!(h.stock(42).await, 10);

  let again = h
    .platform
    .orders()
    .update_status(
      receipt.order_id,
      UpdateOrderStatus {
        status: OrderStatus::Cancelled,
        note: None,
        actor: None,
      },
    )
    .await
    .unwrap_err();
  assert_eq!(again.kind(), ErrorKind::IllegalTransition);
  assert_eq!(h.stock(42).await, 10);
}

#[tokio::test]
#[serial]
async fn test_status_updates_follow_the_table_and_build_the_timeline() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;
  let receipt = h
    .platform
    .checkout(order_request(vec![physical(42, 1)], "0", "0", "10.00"))
    .await
    .unwrap();
  let orders = h.platform.orders();

  let err = orders
    .update_status(
      receipt.order_id,
      UpdateOrderStatus {
        status: OrderStatus::Delivered,
        note: None,
        actor: None,
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, QuireError::IllegalTransition { .. }));

  for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
    orders
      .update_status(
        receipt.order_id,
        UpdateOrderStatus {
          status,
          note: None,
          actor: Some("warehouse".to_string()),
        },
      )
      .await
      .unwrap();
  }

  let tracking = orders.tracking(receipt.order_id).await.unwrap();
  let timeline: Vec<OrderStatus> = tracking.events.iter().map(|e| e.new_status).collect();
  assert_eq!(
    timeline,
    vec![
      OrderStatus::Pending,
      OrderStatus::Processing,
      OrderStatus::Shipped,
      OrderStatus::Delivered
    ]
  );
  assert_eq!(tracking.events[0].previous_status, None);
  assert_eq!(tracking.events[3].previous_status, Some(OrderStatus::Shipped));
  assert_eq!(tracking.status, OrderStatus::Delivered);
  // Stock stays sold.
  assert_eq!(h.stock(42).await, 9);
}

#[tokio::test]
#[serial]
async fn test_confirmation_failure_does_not_fail_checkout() {
  let h = Harness::new();
  h.book(42, "10.00", 10).await;
  *h.notifier.fail.lock() = true;

  let receipt = h
    .platform
    .checkout(order_request(vec![physical(42, 1)], "0", "0", "10.00"))
    .await
    .unwrap();

  assert_eq!(receipt.status, OrderStatus::Pending);
  assert!(h.notifier.confirmations.lock().is_empty());
  assert_eq!(h.store.orders().await.len(), 1);
}

#[tokio::test]
#[serial]
async fn test_missing_order_is_not_found() {
  let h = Harness::new();
  let err = h.platform.orders().get_order(uuid::Uuid::new_v4()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[serial]
async fn test_platform_registers_both_workflows() {
  let h = Harness::new();
  let workflows = h.platform.workflows();
  assert!(workflows.is_registered::<quire::workflows::CheckoutContext>());
  assert!(workflows.is_registered::<quire::workflows::CallbackContext>());
  assert_eq!(h.platform.services().config.currency, h.platform.config().currency);
}
