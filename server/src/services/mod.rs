// quire_server/src/services/mod.rs
pub mod email_mock;
pub mod payment_mock;

pub use email_mock::LogNotifier;
pub use payment_mock::MockPaymentProvider;
