//! Double-SHA256 (C1)
//!
//! A pure function used to derive block identity from the 80-byte Bitcoin
//! header. Thread-safe by construction: it holds no state.

use sha2::{Digest, Sha256};

/// A 32-byte double-SHA256 digest.
pub type Hash = [u8; 32];

/// `dsha256(bytes) = sha256(sha256(bytes))`.
pub fn dsha256(bytes: &[u8]) -> Hash {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Hash of the 80-byte Bitcoin block header, which identifies a block.
///
/// Panics if `header_and_body` is shorter than 80 bytes; callers are
/// expected to have already checked message length (spec.md §4.6 step 1).
pub fn block_hash(header_and_body: &[u8]) -> Hash {
    dsha256(&header_and_body[..80])
}

/// Render a hash little-endian, matching Bitcoin's conventional hex display
/// (the original prints the digest byte-reversed).
pub fn format_hash_le(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsha256_is_double_sha256() {
        use sha2::{Digest, Sha256};
        let data = b"relay hub";
        let expected = Sha256::digest(Sha256::digest(data));
        assert_eq!(&dsha256(data)[..], &expected[..]);
    }

    #[test]
    fn dsha256_empty_input() {
        let h1 = dsha256(b"");
        let h2 = dsha256(b"");
        assert_eq!(h1, h2);
    }

    #[test]
    fn format_hash_le_reverses_bytes() {
        let mut hash = [0u8; 32];
        hash[0] = 0xAB;
        hash[31] = 0xCD;
        let formatted = format_hash_le(&hash);
        assert!(formatted.starts_with("cd"));
        assert!(formatted.ends_with("ab"));
    }

    #[test]
    fn block_hash_uses_first_80_bytes_only() {
        let mut body = vec![0u8; 80];
        body[0] = 1;
        let mut body_with_trailer = body.clone();
        body_with_trailer.extend_from_slice(b"trailing transaction bytes");
        assert_eq!(block_hash(&body), block_hash(&body_with_trailer));
    }
}
