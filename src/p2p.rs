//! Bitcoin-P2P adapter (C5)
//!
//! The trusted upstream node and the local node are, at the wire level,
//! peers like any other relay client: they speak the same framed protocol
//! `peer.rs` already implements, just with a different [`PeerRole`] applied
//! by the hub's fan-out policy. This module is the thin dialing layer that
//! turns a `(host, port)` into a [`PeerHandle`] with the right role, plus
//! the `on_headers` hook the trusted connection gets and every other
//! connection doesn't.
//!
//! Implementing the real Bitcoin wire protocol (version/verack/inv/getdata,
//! message checksums, the full command set) is out of scope here — this
//! relay network is self-contained and never negotiates with unmodified
//! Bitcoin Core nodes on the wire.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::info;

use crate::config::RelayConfig;
use crate::error::PeerError;
use crate::peer::{self, PeerEvent, PeerHandle, PeerRole};

/// Called whenever the trusted connection would otherwise receive a
/// `headers` announcement. No relay message type carries header
/// announcements (spec.md §3 lists only VERSION/MAX_VERSION/BLOCK/
/// END_BLOCK/TRANSACTION), so this is a no-op hook kept for parity with
/// the component boundary rather than something the wire protocol invokes.
pub fn on_headers(_peer: SocketAddr) {}

/// Dial the trusted upstream node and complete the relay handshake.
pub async fn connect_trusted(
    host: &str,
    port: u16,
    config: RelayConfig,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
) -> Result<PeerHandle, PeerError> {
    let stream = TcpStream::connect((host, port)).await?;
    let addr = stream.peer_addr()?;
    info!(%addr, "connected to trusted upstream node");
    peer::spawn(stream, addr, PeerRole::Trusted, config, events).await
}

/// Dial the local full node and complete the relay handshake.
pub async fn connect_local(
    addr: SocketAddr,
    config: RelayConfig,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
) -> Result<PeerHandle, PeerError> {
    let stream = TcpStream::connect(addr).await?;
    info!(%addr, "connected to local node");
    peer::spawn(stream, addr, PeerRole::Local, config, events).await
}
