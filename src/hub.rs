//! Relay hub (C6)
//!
//! Owns the peer roster and decides, for every transaction or block that
//! arrives from any one peer, which other peers receive it. The policy
//! matrix is the heart of the relay network (spec.md §4.6):
//!
//! | source  | transactions go to  | blocks go to                    | dedup        | sanity-check |
//! |---------|---------------------|----------------------------------|--------------|--------------|
//! | trusted | all relay peers, local | every other connected peer    | yes          | no           |
//! | local   | trusted             | every other connected peer       | no           | yes          |
//! | relay   | trusted             | every other connected peer       | no           | yes          |
//!
//! Blocks fan out to every *other* roster member regardless of source — the
//! original's separate `localP2P`/`trustedP2P` calls plus its generic peer
//! loop (spec.md §4.6 steps 4–6) reduce to exactly this once local/trusted
//! are roster members like any other peer rather than distinct singleton
//! handles. Transactions are asymmetric instead (see below).
//!
//! A block is never relayed twice: once any source's block clears
//! `blocks_already_relayed`, every later sighting of the same hash from any
//! source is dropped before fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::codec::RawBlock;
use crate::config::RelayConfig;
use crate::error::HubError;
use crate::hashing::{self, Hash};
use crate::peer::{PeerEvent, PeerHandle, PeerId, PeerRole};

/// Shared relay hub state: the peer roster and the process-wide block dedup set.
///
/// `blocks_already_relayed` is intentionally unbounded (spec.md §9, Open
/// Question resolution): a long-running process will accumulate one entry
/// per block it has ever relayed, which at one entry per ~10 minutes is a
/// negligible memory cost compared to bounding it and risking a dedup miss
/// that re-floods every relay peer with a block they've already seen.
pub struct RelayHub {
    config: RelayConfig,
    roster: Mutex<HashMap<PeerId, PeerHandle>>,
    blocks_already_relayed: Mutex<HashSet<Hash>>,
}

impl RelayHub {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            roster: Mutex::new(HashMap::new()),
            blocks_already_relayed: Mutex::new(HashSet::new()),
        })
    }

    /// Add a freshly-handshaken peer to the roster.
    pub async fn add_peer(&self, handle: PeerHandle) {
        info!(peer = %handle.id, role = ?handle.role, "peer joined roster");
        self.roster.lock().await.insert(handle.id, handle);
    }

    async fn remove_peer(&self, id: PeerId) {
        self.roster.lock().await.remove(&id);
    }

    /// Drive the hub from a stream of peer events until the channel closes.
    /// Each connected peer's receive loop feeds this channel via a cloned
    /// sender (spec.md §4.4, §4.6).
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::HandshakeComplete(_) => {}
                PeerEvent::Transaction(from, tx) => self.fan_out_transaction(from, tx).await,
                PeerEvent::Block(from, block) => self.fan_out_block(from, block).await,
                PeerEvent::Disconnected(id, reason) => {
                    info!(peer = %id, reason = %reason, "peer left roster");
                    self.remove_peer(id).await;
                }
            }
        }
    }

    async fn role_of(&self, id: PeerId) -> Option<PeerRole> {
        self.roster.lock().await.get(&id).map(|handle| handle.role)
    }

    async fn fan_out_transaction(&self, source: PeerId, tx: Arc<[u8]>) {
        let Some(role) = self.role_of(source).await else {
            return;
        };

        let roster = self.roster.lock().await;
        let targets: Vec<&PeerHandle> = match role {
            PeerRole::Trusted => roster
                .values()
                .filter(|h| h.id != source && (h.role == PeerRole::Relay || h.role == PeerRole::Local))
                .collect(),
            PeerRole::Local | PeerRole::Relay => {
                roster.values().filter(|h| h.role == PeerRole::Trusted).collect()
            }
        };

        join_all(
            targets
                .into_iter()
                .map(|target| target.enqueue_transaction(tx.clone(), &self.config)),
        )
        .await;
    }

    async fn fan_out_block(&self, source: PeerId, block: RawBlock) {
        let Some(role) = self.role_of(source).await else {
            return;
        };

        let hash = hashing::block_hash(&block.header);

        if role == PeerRole::Trusted {
            // spec.md §4.6 step 3: trusted blocks are deduped against the
            // hub-wide set, never sanity-checked.
            let mut seen = self.blocks_already_relayed.lock().await;
            if !seen.insert(hash) {
                return;
            }
        } else if let Err(reason) = is_block_sane(&block, &self.config) {
            // spec.md §4.6 step 3: local/relay blocks are sanity-checked,
            // with "no dedupe set gating" — blocks_already_relayed is the
            // trusted source's set alone.
            warn!(peer = %source, error = %HubError::insane(hash, reason), "dropping insane block");
            return;
        }

        let roster = self.roster.lock().await;
        let targets = roster.values().filter(|h| h.id != source);

        for target in targets {
            target
                .enqueue_block(hash, block.clone(), self.config.max_waiting_size_block)
                .await;
        }
    }
}

/// Minimal block sanity check applied to anything arriving from the local
/// node or an untrusted relay peer (spec.md §4.6). The trusted upstream is
/// exempt: we dedup its blocks but never second-guess its validity.
///
/// spec.md §4.6 step 1's raw-byte-length floor (`header_size + 80`) is
/// already enforced by `RawBlock::parse` (`codec.rs`) before a `RawBlock`
/// can exist at all, so there is nothing left to check about header size here.
fn is_block_sane(block: &RawBlock, config: &RelayConfig) -> Result<(), String> {
    if block.transactions.is_empty() {
        return Err("block has no transactions".to_string());
    }
    for tx in &block.transactions {
        if tx.len() > config.max_relay_oversize_transaction_bytes {
            return Err("transaction exceeds oversize ceiling".to_string());
        }
    }
    Ok(())
}
