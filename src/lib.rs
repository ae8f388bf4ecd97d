//! Relay hub: a compact-relay fan-out between a trusted Bitcoin node, a
//! local node, and many untrusted relay clients.
//!
//! Blocks and transactions come in over a small framed protocol (`codec`),
//! get deduplicated and policy-gated by source (`hub`), and go back out
//! compressed against a per-peer flagged array set (`fas`) so a peer never
//! receives a transaction twice over the wire once it has seen it once.

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod codec;
pub mod config;
pub mod dns;
pub mod error;
pub mod fas;
pub mod hashing;
pub mod hub;
pub mod p2p;
pub mod peer;
pub mod utils;

pub use config::Config;
pub use error::{CodecError, HubError, PeerError};
pub use hub::RelayHub;
