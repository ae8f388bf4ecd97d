//! Logging initialization for the relay hub
//!
//! Simple, non-overengineered logging setup that respects `RUST_LOG` and
//! falls back to a config-supplied filter or "info".

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize human-readable logging.
///
/// `RUST_LOG` always takes precedence over `filter`; `filter` is only used
/// when `RUST_LOG` is unset, and "info" is the final fallback.
pub fn init_logging(filter: Option<&str>) {
    let mut env_filter = EnvFilter::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        env_filter = filter.map(EnvFilter::new).unwrap_or_else(|| EnvFilter::new("info"));
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter)
        .init();
}

/// Initialize JSON-formatted logging, for production/monitoring setups that
/// feed logs into an aggregator.
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let mut env_filter = EnvFilter::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        env_filter = filter.map(EnvFilter::new).unwrap_or_else(|| EnvFilter::new("info"));
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter)
        .init();
}

/// Initialize logging from a [`crate::config::LoggingConfig`].
pub fn init_logging_from_config(config: Option<&crate::config::LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
