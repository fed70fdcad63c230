//! Retry timing for failed reconciliation cycles.

pub mod backoff;

pub use backoff::{calculate_backoff, RetryPolicy};
