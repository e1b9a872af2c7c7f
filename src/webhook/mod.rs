//! Signed webhook deliveries from the bank.
//!
//! A delivery is verified against the raw body, parsed into a
//! [crate::bank_api::WebhookEvent] and applied through the same
//! [crate::ReconciliationEngine] that syncs use.

mod endpoint;
mod processor;
mod signature;

pub use endpoint::{SIGNATURE_HEADER, WebhookState, receive_webhook};
pub use processor::{
    EventOutcome, TRANSACTION_CREATED, TRANSACTION_DELETED, TRANSACTION_SETTLED, process_event,
};
pub use signature::verify_signature;
