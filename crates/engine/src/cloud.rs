//! Cloud reputation hook.
//!
//! The transport lives outside the core; this trait is the narrow seam
//! the engine consults when both local passes come back clean. A failed
//! lookup maps to [`CloudVerdict::Unknown`], which the engine ignores.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudVerdict {
    Clean,
    Suspicious,
    Malicious,
    Unknown,
}

/// Synchronous reputation lookup keyed by content hash.
pub trait CloudIntelligence: Send + Sync {
    fn query_hash(&self, sha256_hex: &str) -> CloudVerdict;
}

/// Lowercase hex SHA-256 of a buffer, the key handed to `query_hash`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
