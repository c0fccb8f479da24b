// quire_server/src/web/routes.rs
use crate::state::AppState;
use crate::web::handlers::{maintenance, orders, payments, subscriptions};
use actix_web::{web, HttpResponse};

async fn health_check_handler(state: web::Data<AppState>) -> HttpResponse {
  HttpResponse::Ok().json(serde_json::json!({
    "status": "ok",
    "store": state.store_backend,
    "currency": state.config.currency,
  }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders")
          .route("", web::post().to(orders::create_order_handler))
          .route("/{order_id}", web::get().to(orders::get_order_handler))
          .route("/{order_id}/tracking", web::get().to(orders::order_tracking_handler))
          .route("/{order_id}/status", web::patch().to(orders::update_order_status_handler)),
      )
      .service(
        web::scope("/payments")
          .route("", web::post().to(payments::initialize_payment_handler))
          .route("/callback", web::post().to(payments::payment_callback_handler))
          .route("/{transaction_id}", web::get().to(payments::get_payment_handler)),
      )
      .service(
        web::scope("/subscriptions")
          .route("", web::post().to(subscriptions::create_subscription_handler))
          .route("", web::get().to(subscriptions::list_subscriptions_handler))
          .route("/{subscription_id}", web::get().to(subscriptions::get_subscription_handler))
          .route("/{subscription_id}/renew", web::post().to(subscriptions::renew_subscription_handler))
          .route("/{subscription_id}/cancel", web::post().to(subscriptions::cancel_subscription_handler)),
      )
      .service(
        web::scope("/maintenance")
          .route("/renewals", web::post().to(maintenance::run_renewals_handler))
          .route("/compensations", web::post().to(maintenance::retry_compensations_handler)),
      ),
  );
}
