//! Error taxonomy (C9)
//!
//! One `thiserror` enum per fallible boundary. `main.rs` and any task that
//! reports back to the runtime collapse these into `anyhow::Error` at the
//! outer edge, matching the teacher crate's convention.

use crate::hashing::Hash;

/// Errors from the relay wire codec (C3): framing, magic, length, and
/// block-compression record errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("connection closed while reading message header")]
    ShortHeaderRead,

    #[error("invalid magic bytes in relay message header")]
    InvalidMagic,

    #[error("message length {0} exceeds maximum of 1,000,000 bytes")]
    MessageTooLarge(u32),

    #[error("connection closed while reading message payload")]
    ShortPayloadRead,

    #[error("unknown relay message type {0}")]
    UnknownMessageType(u32),

    #[error("compact block record referenced out-of-range flagged array set index {index} (set has {size} entries)")]
    IndexOutOfRange { index: u16, size: usize },

    #[error("compact block stream ended before all transactions were read")]
    TruncatedBlock,

    #[error("block body is shorter than the 80-byte header it must contain")]
    BlockTooShort,

    #[error("unknown compact block record tag {0}")]
    UnknownRecordTag(u8),

    #[error("I/O error while framing a relay message: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that terminate a peer connection (C4). Every variant here maps to
/// the peer's `disconnect` reason string (spec.md §4.4, §7).
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("got non-version before version")]
    NonVersionBeforeHandshake,

    #[error("unknown version string")]
    VersionMismatch,

    #[error("got MAX_VERSION of same version as us")]
    MaxVersionEchoedOurs,

    #[error("got freely relayed transaction too large")]
    TransactionTooLarge,

    #[error("relay codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced at the hub boundary (C6), wrapping adapter/codec failures
/// that are not fatal to the hub itself — only to the peer or fan-out
/// attempt that produced them.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("block {hash} rejected: {reason}")]
    InsaneBlock { hash: String, reason: String },

    #[error("peer connection error: {0}")]
    Peer(#[from] PeerError),
}

impl HubError {
    pub fn insane(hash: Hash, reason: impl Into<String>) -> Self {
        Self::InsaneBlock {
            hash: crate::hashing::format_hash_le(&hash),
            reason: reason.into(),
        }
    }
}
