//! Relay wire codec (C3)
//!
//! Framing for the compact relay protocol (12-byte header: magic, type,
//! length) and the block compression/decompression scheme that replaces
//! previously-seen transactions with short back-references into a
//! [`FlaggedArraySet`](crate::fas::FlaggedArraySet).
//!
//! This is a from-scratch relay network, not a byte-compatible
//! reimplementation of any specific deployed instance: the record tags and
//! compact-integer layout below are fixed once here and used consistently
//! by both the encoder and the decoder, which is all the protocol actually
//! requires (spec.md §4.3).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::RelayConfig;
use crate::error::CodecError;
use crate::fas::FlaggedArraySet;

/// Relay message type tags, carried as a big-endian `u32` in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Version = 0,
    MaxVersion = 1,
    Block = 2,
    EndBlock = 3,
    Transaction = 4,
}

impl MessageType {
    fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Version,
            1 => Self::MaxVersion,
            2 => Self::Block,
            3 => Self::EndBlock,
            4 => Self::Transaction,
            _ => return None,
        })
    }
}

/// The 12-byte header that precedes every relay message: magic, type, length.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub message_type: MessageType,
    pub length: u32,
}

/// Per-transaction record tags within a compressed block stream.
const RECORD_LITERAL: u8 = 0x00;
const RECORD_BACK_REFERENCE: u8 = 0x01;

/// Read and validate a 12-byte relay message header.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected_magic: [u8; 4],
    max_length: u32,
) -> Result<MessageHeader, CodecError> {
    let mut buf = [0u8; 12];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| CodecError::ShortHeaderRead)?;

    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != expected_magic {
        return Err(CodecError::InvalidMagic);
    }

    let type_value = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    if length > max_length {
        return Err(CodecError::MessageTooLarge(length));
    }

    let message_type =
        MessageType::from_u32(type_value).ok_or(CodecError::UnknownMessageType(type_value))?;

    Ok(MessageHeader {
        magic,
        message_type,
        length,
    })
}

/// Serialize a relay message header to its 12-byte wire form.
pub fn encode_header(magic: [u8; 4], message_type: MessageType, length: u32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&magic);
    buf[4..8].copy_from_slice(&(message_type as u32).to_be_bytes());
    buf[8..12].copy_from_slice(&length.to_be_bytes());
    buf
}

/// Write a full message (header + payload) to `writer`.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    magic: [u8; 4],
    message_type: MessageType,
    payload: &[u8],
) -> Result<(), CodecError> {
    let header = encode_header(magic, message_type, payload.len() as u32);
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read exactly `length` bytes of payload following an already-consumed header.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    length: u32,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; length as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| CodecError::ShortPayloadRead)?;
    Ok(buf)
}

/// Encode a `u64` as a Bitcoin-style compact size ("varint").
pub fn encode_compact_size(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

/// Read a Bitcoin-style compact size from an in-memory cursor.
fn read_compact_size(buf: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let tag = *buf.get(*pos).ok_or(CodecError::TruncatedBlock)?;
    *pos += 1;
    match tag {
        0xfd => {
            let bytes = buf.get(*pos..*pos + 2).ok_or(CodecError::TruncatedBlock)?;
            *pos += 2;
            Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u64)
        }
        0xfe => {
            let bytes = buf.get(*pos..*pos + 4).ok_or(CodecError::TruncatedBlock)?;
            *pos += 4;
            Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
        }
        0xff => {
            let bytes = buf.get(*pos..*pos + 8).ok_or(CodecError::TruncatedBlock)?;
            *pos += 8;
            let mut array = [0u8; 8];
            array.copy_from_slice(bytes);
            Ok(u64::from_le_bytes(array))
        }
        small => Ok(small as u64),
    }
}

/// A parsed block: an 80-byte header plus its transactions, each an opaque blob.
///
/// Transactions are treated as reference-equal byte blobs throughout the
/// relay (spec.md §3) — full Bitcoin transaction *parsing* is the P2P
/// client's job (out of scope, C5), so this crate's own block layout
/// length-prefixes each transaction rather than requiring a real Bitcoin
/// deserializer to find transaction boundaries.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub header: [u8; 80],
    pub transactions: Vec<Arc<[u8]>>,
}

impl RawBlock {
    /// Parse `header (80) + compact_size(count) + (compact_size(len) + bytes)*`.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 80 {
            return Err(CodecError::BlockTooShort);
        }
        let mut header = [0u8; 80];
        header.copy_from_slice(&bytes[..80]);

        let mut pos = 80;
        let count = read_compact_size(bytes, &mut pos)?;
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_compact_size(bytes, &mut pos)? as usize;
            let tx_bytes = bytes
                .get(pos..pos + len)
                .ok_or(CodecError::TruncatedBlock)?;
            transactions.push(Arc::from(tx_bytes));
            pos += len;
        }

        Ok(Self {
            header,
            transactions,
        })
    }

    /// Serialize back to the crate's canonical flat block byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(80 + self.transactions.len() * 64);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&encode_compact_size(self.transactions.len() as u64));
        for tx in &self.transactions {
            out.extend_from_slice(&encode_compact_size(tx.len() as u64));
            out.extend_from_slice(tx);
        }
        out
    }
}

/// Compress `block` against `send_cache`, emitting a back-reference for
/// every transaction the cache already holds and a literal (plus `add`) for
/// every transaction it doesn't. Returns the encoded byte stream that goes
/// out as the `BLOCK` message payload; the caller is responsible for
/// queuing a following `END_BLOCK` frame (spec.md §4.3, §4.4).
pub fn compress_block(
    block: &RawBlock,
    send_cache: &mut FlaggedArraySet,
    config: &RelayConfig,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(80 + block.transactions.len() * 8);
    out.extend_from_slice(&block.header);
    out.extend_from_slice(&encode_compact_size(block.transactions.len() as u64));

    for tx in &block.transactions {
        if let Some(index) = send_cache.index_of(tx) {
            out.push(RECORD_BACK_REFERENCE);
            out.extend_from_slice(&index.to_be_bytes());
        } else {
            out.push(RECORD_LITERAL);
            out.extend_from_slice(&encode_compact_size(tx.len() as u64));
            out.extend_from_slice(tx);
            let oversize = tx.len() > config.max_relay_transaction_bytes;
            send_cache.add(tx.clone(), oversize);
        }
    }

    out
}

/// Decompress a block stream read from `reader` against `recv_cache`,
/// resolving back-references via `recv_cache.get` and `add`ing every
/// literal transaction as it is read, in lockstep with the peer that
/// produced the stream. Returns `(compressed_byte_count, reconstructed_block)`.
pub async fn decompress_block<R: AsyncRead + Unpin>(
    reader: &mut R,
    recv_cache: &mut FlaggedArraySet,
    config: &RelayConfig,
) -> Result<(usize, RawBlock), CodecError> {
    let mut bytes_read = 0usize;

    let mut header = [0u8; 80];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| CodecError::TruncatedBlock)?;
    bytes_read += 80;

    let count = read_compact_size_async(reader, &mut bytes_read).await?;

    let mut transactions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut tag = [0u8; 1];
        reader
            .read_exact(&mut tag)
            .await
            .map_err(|_| CodecError::TruncatedBlock)?;
        bytes_read += 1;

        match tag[0] {
            RECORD_LITERAL => {
                let len = read_compact_size_async(reader, &mut bytes_read).await? as usize;
                let mut tx_bytes = vec![0u8; len];
                reader
                    .read_exact(&mut tx_bytes)
                    .await
                    .map_err(|_| CodecError::TruncatedBlock)?;
                bytes_read += len;

                let tx: Arc<[u8]> = Arc::from(tx_bytes);
                let oversize = tx.len() > config.max_relay_transaction_bytes;
                recv_cache.add(tx.clone(), oversize);
                transactions.push(tx);
            }
            RECORD_BACK_REFERENCE => {
                let mut index_bytes = [0u8; 2];
                reader
                    .read_exact(&mut index_bytes)
                    .await
                    .map_err(|_| CodecError::TruncatedBlock)?;
                bytes_read += 2;
                let index = u16::from_be_bytes(index_bytes);

                let tx = recv_cache.get(index).ok_or(CodecError::IndexOutOfRange {
                    index,
                    size: recv_cache.len(),
                })?;
                transactions.push(tx);
            }
            other => return Err(CodecError::UnknownRecordTag(other)),
        }
    }

    Ok((
        bytes_read,
        RawBlock {
            header,
            transactions,
        },
    ))
}

async fn read_compact_size_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    bytes_read: &mut usize,
) -> Result<u64, CodecError> {
    let mut tag = [0u8; 1];
    reader
        .read_exact(&mut tag)
        .await
        .map_err(|_| CodecError::TruncatedBlock)?;
    *bytes_read += 1;

    match tag[0] {
        0xfd => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf).await.map_err(|_| CodecError::TruncatedBlock)?;
            *bytes_read += 2;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        0xfe => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).await.map_err(|_| CodecError::TruncatedBlock)?;
            *bytes_read += 4;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        0xff => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).await.map_err(|_| CodecError::TruncatedBlock)?;
            *bytes_read += 8;
            Ok(u64::from_le_bytes(buf))
        }
        small => Ok(small as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(tx_count: usize) -> RawBlock {
        let header = [7u8; 80];
        let transactions = (0..tx_count)
            .map(|i| Arc::from(vec![i as u8; 10 + i]) as Arc<[u8]>)
            .collect();
        RawBlock { header, transactions }
    }

    #[test]
    fn raw_block_round_trips_through_bytes() {
        let block = sample_block(5);
        let bytes = block.to_bytes();
        let parsed = RawBlock::parse(&bytes).unwrap();
        assert_eq!(parsed.header, block.header);
        assert_eq!(parsed.transactions.len(), block.transactions.len());
        for (a, b) in parsed.transactions.iter().zip(&block.transactions) {
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn compress_then_decompress_is_identity_with_empty_caches() {
        let config = RelayConfig::default();
        let block = sample_block(4);
        let mut send_cache = FlaggedArraySet::new(525, 20);
        let mut recv_cache = FlaggedArraySet::new(525, 20);

        let compressed = compress_block(&block, &mut send_cache, &config);
        let mut cursor = std::io::Cursor::new(compressed);
        let (_n, decoded) = decompress_block(&mut cursor, &mut recv_cache, &config).await.unwrap();

        assert_eq!(decoded.header, block.header);
        assert_eq!(decoded.transactions.len(), block.transactions.len());
        for (a, b) in decoded.transactions.iter().zip(&block.transactions) {
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn previously_seen_transactions_compress_to_back_references() {
        // Invariant 5: once every tx is already cached, compressed size is
        // small (header + per-tx back-reference) regardless of tx size.
        let config = RelayConfig::default();
        let mut send_cache = FlaggedArraySet::new(525, 20);
        let mut recv_cache = FlaggedArraySet::new(525, 20);

        let first_block = sample_block(3);
        let compressed_first = compress_block(&first_block, &mut send_cache, &config);
        let mut cursor = std::io::Cursor::new(compressed_first);
        decompress_block(&mut cursor, &mut recv_cache, &config).await.unwrap();

        // Second block reuses the exact same transactions.
        let second_block = RawBlock {
            header: [9u8; 80],
            transactions: first_block.transactions.clone(),
        };
        let compressed_second = compress_block(&second_block, &mut send_cache, &config);

        // header(80) + count(1) + 3 * (tag(1) + index(2)) = 90
        assert_eq!(compressed_second.len(), 80 + 1 + 3 * 3);

        let mut cursor = std::io::Cursor::new(compressed_second);
        let (_n, decoded) = decompress_block(&mut cursor, &mut recv_cache, &config).await.unwrap();
        for (a, b) in decoded.transactions.iter().zip(&second_block.transactions) {
            assert_eq!(a, b);
        }
        assert_eq!(send_cache.len(), recv_cache.len());
    }

    #[tokio::test]
    async fn back_reference_to_unknown_index_is_an_error() {
        let config = RelayConfig::default();
        let mut recv_cache = FlaggedArraySet::new(525, 20);
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0u8; 80]); // header
        stream.extend_from_slice(&encode_compact_size(1)); // one tx
        stream.push(RECORD_BACK_REFERENCE);
        stream.extend_from_slice(&42u16.to_be_bytes()); // empty cache, index 42 invalid

        let mut cursor = std::io::Cursor::new(stream);
        let result = decompress_block(&mut cursor, &mut recv_cache, &config).await;
        assert!(matches!(result, Err(CodecError::IndexOutOfRange { .. })));
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let bytes = encode_header(*b"RLAY", MessageType::Transaction, 123);
        assert_eq!(&bytes[0..4], b"RLAY");
        assert_eq!(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 4);
        assert_eq!(u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 123);
    }

    #[tokio::test]
    async fn read_header_rejects_wrong_magic() {
        let bytes = encode_header(*b"XXXX", MessageType::Version, 0);
        let mut cursor = std::io::Cursor::new(bytes);
        let result = read_header(&mut cursor, *b"RLAY", 1_000_000).await;
        assert!(matches!(result, Err(CodecError::InvalidMagic)));
    }

    #[tokio::test]
    async fn read_header_rejects_oversize_length() {
        let bytes = encode_header(*b"RLAY", MessageType::Transaction, 2_000_000);
        let mut cursor = std::io::Cursor::new(bytes);
        let result = read_header(&mut cursor, *b"RLAY", 1_000_000).await;
        assert!(matches!(result, Err(CodecError::MessageTooLarge(2_000_000))));
    }
}
