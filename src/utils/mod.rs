//! Utility modules for fault tolerance and resilience

pub mod logging;
pub mod retry;
pub mod signal;
pub mod time;

// Re-export commonly used items
pub use logging::{init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use retry::{retry_async_with_backoff, retry_with_backoff, RetryConfig};
pub use signal::{create_shutdown_receiver, wait_for_shutdown_signal};
pub use time::{current_timestamp, current_timestamp_duration};
