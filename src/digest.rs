//! Deterministic fixed-width checksums used to sign transactions and commit blocks.
//!
//! Neither algorithm is treated as collision resistant; the engine only relies on
//! determinism and sensitivity to every input byte.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Width of every digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

const DJB2_SEED: u64 = 5381;

/// Checksum function in effect for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    /// DJB2 (`h * 33 + byte`, bytes taken as signed), widened to 64 hex
    /// characters by repeating the 16-character value four times.
    Djb2,
}

impl HashAlgorithm {
    /// Digest arbitrary bytes. Total: never fails.
    pub fn digest(&self, bytes: &[u8]) -> Digest {
        match self {
            HashAlgorithm::Sha256 => Digest(hex::encode(Sha256::digest(bytes))),
            HashAlgorithm::Djb2 => {
                // Bytes are folded in as signed chars, so 0x80..=0xff subtract.
                let hash = bytes.iter().fold(DJB2_SEED, |h, &b| {
                    h.wrapping_shl(5).wrapping_add(h).wrapping_add(b as i8 as i64 as u64)
                });
                Digest(format!("{hash:016x}").repeat(4))
            }
        }
    }
}

/// A 64-character lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// The all-zero sentinel used as the genesis block's previous digest.
    pub fn zero() -> Self {
        Digest("0".repeat(DIGEST_HEX_LEN))
    }

    /// Wrap an existing hex string. Returns `None` unless it is exactly
    /// `DIGEST_HEX_LEN` hex characters.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() == DIGEST_HEX_LEN && hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Digest(hex_str.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Number of leading `'0'` hex characters.
    pub fn leading_zeros(&self) -> usize {
        self.0.chars().take_while(|c| *c == '0').count()
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
