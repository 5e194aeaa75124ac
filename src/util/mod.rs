//! Shared helpers: cancellation tokens and retry/backoff sessions.

pub mod cancel;
pub mod retry;

pub use cancel::CancelToken;
pub use retry::{sleep_with_cancel, RetryError, RetryPolicy, RetrySession};
