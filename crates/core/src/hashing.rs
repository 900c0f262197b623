//! Shared SHA-256 hex digest utility.
//!
//! Used to derive stable analysis identifiers from the submitted input files.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute a SHA-256 hex digest over several byte slices, in order.
///
/// Equivalent to hashing their concatenation without allocating it.
pub fn sha256_hex_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parts_match_concatenation() {
        let whole = sha256_hex(b"((A,B),C);((A,C),B);");
        let parts = sha256_hex_parts([b"((A,B),C);".as_slice(), b"((A,C),B);".as_slice()]);
        assert_eq!(whole, parts);
    }
}
