//! Peer connection management (C4)
//!
//! Each connected peer gets one outbound queue and two tokio tasks: a send
//! loop draining the queue onto the socket, and a receive loop decoding
//! incoming messages and forwarding them to the hub over an event channel.
//! Shared per-peer state (the two flagged array sets, byte counters, the
//! disconnect flag) lives behind a `tokio::sync::Mutex`, the same shape the
//! reference peer handler in this codebase already uses for its read/write
//! split (see `from_transport_connection`).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use std::collections::HashSet;

use crate::codec::{self, MessageType, RawBlock};
use crate::config::RelayConfig;
use crate::error::PeerError;
use crate::fas::FlaggedArraySet;
use crate::hashing::Hash;
use crate::utils::current_timestamp;

/// A peer's role, which governs the hub's fan-out and dedup policy for
/// anything it sends or receives (spec.md §4.4, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// The single upstream node we trust. Its blocks are dedup-checked but
    /// never sanity-checked; it is the sink for everything else relays in.
    Trusted,
    /// The local full node. Its blocks are sanity-checked but not
    /// dedup-checked, since it only ever sees what we already decided to
    /// forward to it.
    Local,
    /// An untrusted relay client. Its blocks are sanity-checked; it is one
    /// of potentially many fan-out targets.
    Relay,
}

/// Stable identifier for a peer within the hub's roster.
pub type PeerId = SocketAddr;

/// Messages the hub learns about from a peer's receive loop.
#[derive(Debug)]
pub enum PeerEvent {
    HandshakeComplete(PeerId),
    Transaction(PeerId, Arc<[u8]>),
    Block(PeerId, RawBlock),
    Disconnected(PeerId, String),
}

/// An item waiting in a peer's outbound queue.
pub(crate) enum Outbound {
    Transaction(Arc<[u8]>),
    Block(RawBlock),
}

/// Oversize admission predicate shared by inbound and outbound paths
/// (spec.md §4.3/§4.4): a transaction at or below `max_relay_transaction_bytes`
/// is always admitted; above it, admission requires both headroom in the
/// oversize quota and staying within the absolute oversize ceiling.
fn oversize_rejected(len: usize, resident_oversize_count: usize, config: &RelayConfig) -> bool {
    len > config.max_relay_transaction_bytes
        && (resident_oversize_count >= config.max_extra_oversize_transactions
            || len > config.max_relay_oversize_transaction_bytes)
}

struct SharedState {
    send_cache: FlaggedArraySet,
    recv_cache: FlaggedArraySet,
    total_waiting_size: usize,
    connected: bool,
    disconnect_reason: Option<String>,
    /// Blocks already sent to or received from this specific peer
    /// (spec.md §3, §4.4). Grows without bound for the peer's lifetime,
    /// same divergence as the hub-level set (spec.md §9 Open Questions).
    blocks_already_seen: HashSet<Hash>,
}

impl SharedState {
    fn new(config: &RelayConfig) -> Self {
        Self {
            send_cache: FlaggedArraySet::new(config.max_fas_total, config.max_extra_oversize_transactions),
            recv_cache: FlaggedArraySet::new(config.max_fas_total, config.max_extra_oversize_transactions),
            total_waiting_size: 0,
            connected: true,
            disconnect_reason: None,
            blocks_already_seen: HashSet::new(),
        }
    }
}

/// A handle held by the hub's roster. Cloning shares the same underlying
/// connection; dropping the last handle does not close the socket, only
/// `disconnect` does (the roster owns handles, the tasks own the socket).
#[derive(Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub role: PeerRole,
    pub conntime: u64,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<Mutex<SharedState>>,
}

impl PeerHandle {
    /// Queue a transaction for delivery, dropping it silently if the
    /// per-peer lock is contended, the peer's outbound backlog already
    /// exceeds the configured watermark, the peer's `send_cache` already
    /// holds this transaction, or the oversize admission predicate rejects
    /// it. The lock is a *try*-lock (spec.md §4.4, §5): a slow client's
    /// receive/send loop holding its own lock must never stall the hub's
    /// transaction fan-out, so contention here is treated the same as any
    /// other drop condition rather than awaited.
    pub async fn enqueue_transaction(&self, tx: Arc<[u8]>, config: &RelayConfig) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if !state.connected
            || state.total_waiting_size + tx.len() > config.max_waiting_size_tx
            || state.send_cache.contains(&tx)
        {
            return;
        }
        let oversize = tx.len() > config.max_relay_transaction_bytes;
        if oversize_rejected(tx.len(), state.send_cache.flag_count(), config) {
            return;
        }
        state.send_cache.add(tx.clone(), oversize);
        state.total_waiting_size += tx.len();
        drop(state);
        let _ = self.outbound_tx.send(Outbound::Transaction(tx));
    }

    /// Queue a block for delivery, dropping it silently over the
    /// block-specific watermark or if this peer has already seen `hash`
    /// (spec.md §4.4: per-peer `blocksAlreadySeen`, distinct from the hub's
    /// process-wide dedup set).
    pub async fn enqueue_block(&self, hash: Hash, block: RawBlock, watermark: usize) {
        let approx_size: usize = 80 + block.transactions.iter().map(|t| t.len()).sum::<usize>();
        let mut state = self.state.lock().await;
        if !state.connected
            || state.total_waiting_size + approx_size > watermark
            || state.blocks_already_seen.contains(&hash)
        {
            return;
        }
        state.blocks_already_seen.insert(hash);
        state.total_waiting_size += approx_size;
        drop(state);
        let _ = self.outbound_tx.send(Outbound::Block(block));
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn disconnect(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        if state.connected {
            state.connected = false;
            state.disconnect_reason = Some(reason.into());
        }
    }

    /// Build a roster-ready handle with no backing socket, for exercising
    /// hub fan-out logic without a real connection.
    #[cfg(test)]
    pub(crate) fn new_for_test(
        id: PeerId,
        role: PeerRole,
        config: &RelayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            role,
            conntime: 0,
            outbound_tx,
            state: Arc::new(Mutex::new(SharedState::new(config))),
        };
        (handle, outbound_rx)
    }
}

/// Accept an already-connected socket, perform the handshake, and spawn the
/// send/receive tasks. Returns the handle the hub adds to its roster; the
/// handshake itself is awaited here so the hub never roster-lists a peer
/// that never said hello.
pub async fn spawn(
    stream: TcpStream,
    addr: SocketAddr,
    role: PeerRole,
    config: RelayConfig,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<PeerHandle, PeerError> {
    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();

    write_version(&mut write_half, &config).await?;
    if let Err(err) = read_version(&mut read_half, &config).await {
        if matches!(err, PeerError::VersionMismatch) {
            // S2: tell the peer what we understand before hanging up, so an
            // honest-but-outdated peer can log what version it needs to speak.
            let _ = codec::write_message(
                &mut write_half,
                config.magic_bytes,
                MessageType::MaxVersion,
                config.version_string.as_bytes(),
            )
            .await;
        }
        return Err(err);
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(SharedState::new(&config)));

    let handle = PeerHandle {
        id: addr,
        role,
        conntime: current_timestamp(),
        outbound_tx,
        state: state.clone(),
    };

    tokio::spawn(send_loop(write_half, outbound_rx, state.clone(), config.clone(), addr));
    tokio::spawn(receive_loop(read_half, state, config, addr, events));

    Ok(handle)
}

async fn write_version(write_half: &mut OwnedWriteHalf, config: &RelayConfig) -> Result<(), PeerError> {
    codec::write_message(
        write_half,
        config.magic_bytes,
        MessageType::Version,
        config.version_string.as_bytes(),
    )
    .await?;
    Ok(())
}

async fn read_version(read_half: &mut OwnedReadHalf, config: &RelayConfig) -> Result<(), PeerError> {
    let header = codec::read_header(read_half, config.magic_bytes, config.max_message_length).await?;
    if header.message_type as u32 != MessageType::Version as u32 {
        return Err(PeerError::NonVersionBeforeHandshake);
    }
    let payload = codec::read_payload(read_half, header.length).await?;
    if payload != config.version_string.as_bytes() {
        return Err(PeerError::VersionMismatch);
    }
    Ok(())
}

async fn send_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<Mutex<SharedState>>,
    config: RelayConfig,
    addr: SocketAddr,
) {
    while let Some(item) = outbound_rx.recv().await {
        let result = match item {
            Outbound::Transaction(tx) => {
                let len = tx.len();
                let result = codec::write_message(&mut write_half, config.magic_bytes, MessageType::Transaction, &tx).await;
                let mut guard = state.lock().await;
                guard.total_waiting_size = guard.total_waiting_size.saturating_sub(len);
                result
            }
            Outbound::Block(block) => {
                let approx_size = 80 + block.transactions.iter().map(|t| t.len()).sum::<usize>();
                let result = send_block(&mut write_half, &block, &state, &config).await;
                let mut guard = state.lock().await;
                guard.total_waiting_size = guard.total_waiting_size.saturating_sub(approx_size);
                result
            }
        };

        if let Err(err) = result {
            warn!(peer = %addr, error = %err, "peer send failed, dropping connection");
            state.lock().await.connected = false;
            break;
        }
    }
}

async fn send_block(
    write_half: &mut OwnedWriteHalf,
    block: &RawBlock,
    state: &Arc<Mutex<SharedState>>,
    config: &RelayConfig,
) -> Result<(), PeerError> {
    let payload = {
        let mut guard = state.lock().await;
        codec::compress_block(block, &mut guard.send_cache, config)
    };
    codec::write_message(write_half, config.magic_bytes, MessageType::Block, &payload).await?;
    codec::write_message(write_half, config.magic_bytes, MessageType::EndBlock, &[]).await?;
    Ok(())
}

async fn receive_loop(
    mut read_half: OwnedReadHalf,
    state: Arc<Mutex<SharedState>>,
    config: RelayConfig,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let _ = events.send(PeerEvent::HandshakeComplete(addr));

    loop {
        let header = match codec::read_header(&mut read_half, config.magic_bytes, config.max_message_length).await {
            Ok(header) => header,
            Err(err) => {
                info!(peer = %addr, error = %err, "peer connection closed");
                break;
            }
        };

        match header.message_type {
            MessageType::Transaction => {
                let payload = match codec::read_payload(&mut read_half, header.length).await {
                    Ok(payload) => payload,
                    Err(_) => break,
                };
                let oversize = payload.len() > config.max_relay_transaction_bytes;
                let admitted = {
                    let guard = state.lock().await;
                    !oversize_rejected(payload.len(), guard.recv_cache.flag_count(), &config)
                };
                if !admitted {
                    warn!(peer = %addr, len = payload.len(), "oversize transaction admission failed, disconnecting");
                    break;
                }
                let tx: Arc<[u8]> = Arc::from(payload);
                state.lock().await.recv_cache.add(tx.clone(), oversize);
                let _ = events.send(PeerEvent::Transaction(addr, tx));
            }
            MessageType::Block => {
                let (_bytes_read, block) = {
                    let mut guard = state.lock().await;
                    match codec::decompress_block(&mut read_half, &mut guard.recv_cache, &config).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(peer = %addr, error = %err, "failed to decompress block");
                            break;
                        }
                    }
                };
                // END_BLOCK follows every BLOCK payload; it is a sender-side
                // marker only, the decoder already self-terminated above.
                if let Err(err) = codec::read_header(&mut read_half, config.magic_bytes, config.max_message_length).await {
                    debug!(peer = %addr, error = %err, "did not receive END_BLOCK marker");
                    break;
                }
                let hash = crate::hashing::block_hash(&block.header);
                state.lock().await.blocks_already_seen.insert(hash);
                let _ = events.send(PeerEvent::Block(addr, block));
            }
            MessageType::EndBlock => {
                // Only reachable if a peer sends END_BLOCK outside of a
                // block transfer; ignored per spec.md §9.
            }
            MessageType::MaxVersion => {
                let payload = codec::read_payload(&mut read_half, header.length).await.unwrap_or_default();
                if payload == config.version_string.as_bytes() {
                    warn!(peer = %addr, "peer echoed our own MAX_VERSION, disconnecting");
                    break;
                }
            }
            MessageType::Version => {
                // A second VERSION after the handshake is simply ignored;
                // the original only rejects a *non*-version before the first one.
                let _ = codec::read_payload(&mut read_half, header.length).await;
            }
        }
    }

    let reason = {
        let mut guard = state.lock().await;
        guard.connected = false;
        guard
            .disconnect_reason
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    };
    let _ = events.send(PeerEvent::Disconnected(addr, reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_round_trip_over_loopback() {
        let config = RelayConfig::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_config = config.clone();
        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let handle = spawn(stream, peer_addr, PeerRole::Relay, server_config, events_tx)
                .await
                .unwrap();
            let event = events_rx.recv().await.unwrap();
            assert!(matches!(event, PeerEvent::HandshakeComplete(_)));
            handle
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let client_handle = spawn(client, client_addr, PeerRole::Trusted, config, events_tx)
            .await
            .unwrap();

        assert!(client_handle.is_connected().await);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_version_string_is_rejected() {
        let mut config_a = RelayConfig::default();
        config_a.version_string = "/RelayNetworkServer:42/".to_string();
        let mut config_b = config_a.clone();
        config_b.version_string = "/RelayNetworkServer:99/".to_string();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            let (events_tx, _rx) = mpsc::unbounded_channel();
            spawn(stream, peer_addr, PeerRole::Relay, config_a, events_tx).await
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let (events_tx, _rx) = mpsc::unbounded_channel();
        let client_result = spawn(client, client_addr, PeerRole::Trusted, config_b, events_tx).await;

        let server_result = server.await.unwrap();
        assert!(client_result.is_err() || server_result.is_err());
    }

    fn make_handle(config: &RelayConfig) -> (PeerHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            id: "127.0.0.1:1".parse().unwrap(),
            role: PeerRole::Relay,
            conntime: 0,
            outbound_tx,
            state: Arc::new(Mutex::new(SharedState::new(config))),
        };
        (handle, outbound_rx)
    }

    #[test]
    fn oversize_admission_predicate() {
        let config = RelayConfig::default();
        // At or below the standard cap: always admitted regardless of flag count.
        assert!(!oversize_rejected(config.max_relay_transaction_bytes, 20, &config));
        // Above the standard cap but within the absolute ceiling and quota headroom.
        assert!(!oversize_rejected(config.max_relay_transaction_bytes + 1, 0, &config));
        // Above the standard cap with the oversize quota already full.
        assert!(oversize_rejected(
            config.max_relay_transaction_bytes + 1,
            config.max_extra_oversize_transactions,
            &config
        ));
        // Above the absolute oversize ceiling outright.
        assert!(oversize_rejected(
            config.max_relay_oversize_transaction_bytes + 1,
            0,
            &config
        ));
    }

    #[tokio::test]
    async fn enqueue_transaction_drops_over_watermark() {
        let mut config = RelayConfig::default();
        config.max_waiting_size_tx = 10;
        let (handle, mut outbound_rx) = make_handle(&config);

        handle.enqueue_transaction(Arc::from(vec![1u8; 20]), &config).await;
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_transaction_skips_tx_already_in_send_cache() {
        let config = RelayConfig::default();
        let (handle, mut outbound_rx) = make_handle(&config);
        let tx: Arc<[u8]> = Arc::from(vec![7u8; 4]);

        handle.enqueue_transaction(tx.clone(), &config).await;
        assert!(outbound_rx.try_recv().is_ok());
        handle.enqueue_transaction(tx, &config).await;
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_block_drops_duplicate_hash_for_same_peer() {
        let config = RelayConfig::default();
        let (handle, mut outbound_rx) = make_handle(&config);
        let hash = [9u8; 32];
        let block = RawBlock {
            header: [1u8; 80],
            transactions: vec![Arc::from(vec![1u8, 2, 3])],
        };

        handle.enqueue_block(hash, block.clone(), config.max_waiting_size_block).await;
        assert!(outbound_rx.try_recv().is_ok());
        handle.enqueue_block(hash, block, config.max_waiting_size_block).await;
        assert!(outbound_rx.try_recv().is_err());
    }
}
