// quire/src/workflows/mod.rs

//! Request flows expressed as step pipelines. Each flow keeps its one
//! transactional step separate from the pure checks before it and the
//! best-effort notifications after it.

pub mod callback;
pub mod checkout;

pub use callback::{callback_workflow, CallbackContext};
pub use checkout::{checkout_workflow, CheckoutContext};
