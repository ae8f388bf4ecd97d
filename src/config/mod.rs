//! Configuration for the relay hub
//!
//! Handles configuration loading and validation. Every tunable the original
//! `missura/RelayNode` hardcodes as a preprocessor constant lives here instead,
//! so tests can shrink quotas and a deployment can move off the default ports
//! without touching the relay logic.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Relay wire protocol constants and quotas (spec.md §3, §4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 4-byte magic that begins every relay message header.
    pub magic_bytes: [u8; 4],

    /// Version string exchanged during the handshake. Two peers only
    /// complete the handshake if their strings match exactly.
    pub version_string: String,

    /// Maximum resident entries in a flagged array set.
    pub max_fas_total: usize,

    /// Maximum resident oversize-flagged entries in a flagged array set.
    pub max_extra_oversize_transactions: usize,

    /// Transactions at or below this size are never subject to the oversize quota.
    pub max_relay_transaction_bytes: usize,

    /// Absolute ceiling on any single relayed transaction's size.
    pub max_relay_oversize_transaction_bytes: usize,

    /// Outbound queue watermark (bytes) above which transactions are dropped for a peer.
    pub max_waiting_size_tx: usize,

    /// Outbound queue watermark (bytes) above which blocks are dropped for a peer.
    pub max_waiting_size_block: usize,

    /// Maximum payload length accepted in any relay message header.
    pub max_message_length: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            magic_bytes: *b"RLAY",
            version_string: "/RelayNetworkServer:42/".to_string(),
            max_fas_total: 525,
            max_extra_oversize_transactions: 20,
            max_relay_transaction_bytes: 100_000,
            max_relay_oversize_transaction_bytes: 1_000_000,
            max_waiting_size_tx: 1_500_000,
            max_waiting_size_block: 3_000_000,
            max_message_length: 1_000_000,
        }
    }
}

/// Listening and upstream peer configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the relay listens on for untrusted relay-peer connections.
    pub listen_addr: SocketAddr,

    /// TCP accept backlog.
    pub listen_backlog: u32,

    /// Address of the local full node (sanity-checked blocks, no trusted dedup).
    pub local_p2p_addr: SocketAddr,

    /// Hostname suffixes to reject at accept time without starting a relay session.
    pub blocked_hostname_suffixes: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "[::]:8336".parse().expect("valid default listen addr"),
            listen_backlog: 3,
            local_p2p_addr: "127.0.0.1:8335".parse().expect("valid default local addr"),
            blocked_hostname_suffixes: vec![".uptimerobot.com".to_string()],
        }
    }
}

/// Logging configuration, wired up by `crate::utils::init_logging_from_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string. `None` defers to `RUST_LOG`.
    pub filter: Option<String>,

    /// Emit structured JSON log lines instead of human-readable text.
    pub json_format: bool,
}

/// Top-level configuration for the relay hub binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.max_fas_total, 525);
        assert_eq!(cfg.max_extra_oversize_transactions, 20);
        assert_eq!(cfg.max_waiting_size_tx, 1_500_000);
        assert_eq!(cfg.max_waiting_size_block, 3_000_000);
        assert_eq!(cfg.max_message_length, 1_000_000);
    }

    #[test]
    fn network_defaults_match_spec() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.listen_addr.port(), 8336);
        assert_eq!(cfg.local_p2p_addr.to_string(), "127.0.0.1:8335");
        assert_eq!(cfg.listen_backlog, 3);
    }

    #[test]
    fn load_from_missing_file_errors() {
        assert!(Config::load_from_file("/nonexistent/relay-hub.toml").is_err());
    }

    #[test]
    fn load_from_partial_file_keeps_remaining_defaults() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
        write!(
            file,
            r#"
            [relay]
            max_fas_total = 5
            max_extra_oversize_transactions = 2
            "#
        )
        .expect("write temp config file");

        let config = Config::load_from_file(file.path()).expect("load overridden config");
        assert_eq!(config.relay.max_fas_total, 5);
        assert_eq!(config.relay.max_extra_oversize_transactions, 2);
        // Everything else in `relay`, plus all of `network`/`logging`, falls
        // back to its default since the file only named two fields.
        assert_eq!(config.relay.version_string, RelayConfig::default().version_string);
        assert_eq!(config.network.listen_addr.port(), 8336);
    }
}
