//! Resilience helpers for the ranking pipeline
//!
//! - **Retry**: exponential backoff with jitter, gated by a caller-supplied
//!   predicate so permanent failures are returned immediately
//! - **Deadline**: run a fallible future under a hard time limit while
//!   keeping its own error type intact
//!
//! ```rust,no_run
//! use resilience::{with_retry, RetryConfig};
//!
//! # async fn demo() {
//! let result = with_retry(
//!     RetryConfig::default(),
//!     |e: &std::io::Error| e.kind() == std::io::ErrorKind::TimedOut,
//!     || async { Ok::<_, std::io::Error>(()) },
//! )
//! .await;
//! # }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{run_with_deadline, TimeoutError};
