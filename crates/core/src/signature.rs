//! Signature model and the on-disk signature database format.
//!
//! The database file is little-endian binary: a `"SIGS"` magic
//! (0x53494753), a `u32` version, a `u32` record count, then one record
//! per signature: `{u32 name_len, name, u32 severity, u32 pattern_len,
//! pattern, i32 offset}`. An offset of -1 means "match anywhere".

use crate::codec::{Reader, Writer};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

pub const DATABASE_MAGIC: u32 = 0x5349_4753;

/// Where a signature's pattern must sit in the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOffset {
    /// Substring search over the whole buffer.
    Anywhere,
    /// Exact compare at a fixed byte position.
    Fixed(u32),
}

/// A known-bad byte pattern. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    name: String,
    pattern: Vec<u8>,
    offset: SignatureOffset,
    severity: u8,
}

impl Signature {
    /// Pattern must be non-empty and severity in 1..=10.
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<Vec<u8>>,
        offset: SignatureOffset,
        severity: u8,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(EngineError::format(format!(
                "signature {name:?} has an empty pattern"
            )));
        }
        if !(1..=10).contains(&severity) {
            return Err(EngineError::format(format!(
                "signature {name:?} has severity {severity}, expected 1..=10"
            )));
        }
        Ok(Signature {
            name,
            pattern,
            offset,
            severity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn offset(&self) -> SignatureOffset {
        self.offset
    }

    pub fn severity(&self) -> u8 {
        self.severity
    }

    /// Whether this signature matches the buffer.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self.offset {
            SignatureOffset::Fixed(off) => {
                let off = off as usize;
                match off.checked_add(self.pattern.len()) {
                    Some(end) if end <= data.len() => data[off..end] == self.pattern[..],
                    _ => false,
                }
            }
            SignatureOffset::Anywhere => data
                .windows(self.pattern.len())
                .any(|w| w == &self.pattern[..]),
        }
    }
}

/// An immutable set of signatures plus its version stamp.
///
/// Scanners hold a shared snapshot of the whole database; updates build
/// a new value and swap the pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDatabase {
    version: u32,
    signatures: Vec<Signature>,
}

impl SignatureDatabase {
    pub fn new(version: u32, signatures: Vec<Signature>) -> Self {
        SignatureDatabase {
            version,
            signatures,
        }
    }

    pub fn empty(version: u32) -> Self {
        SignatureDatabase::new(version, Vec::new())
    }

    /// The bootstrap set installed when no database file exists.
    pub fn builtin() -> Self {
        let signatures = vec![
            Signature::new(
                "PE.Suspicious.Header",
                b"MZ".to_vec(),
                SignatureOffset::Fixed(0),
                3,
            ),
            Signature::new(
                "Script.Suspicious.PowerShell",
                b"powershell".to_vec(),
                SignatureOffset::Anywhere,
                5,
            ),
            Signature::new(
                "Ransomware.Generic.Extension",
                b".locked".to_vec(),
                SignatureOffset::Anywhere,
                10,
            ),
        ];
        // Constructors above only fail on invalid severity/pattern, which
        // these literals satisfy.
        let signatures = signatures.into_iter().collect::<Result<Vec<_>>>();
        SignatureDatabase::new(1, signatures.unwrap_or_default())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn signature_count(&self) -> u32 {
        self.signatures.len() as u32
    }

    /// Signatures in declaration order; the scan's first-match-wins rule
    /// is defined over this order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(DATABASE_MAGIC);
        w.write_u32(self.version);
        w.write_u32(self.signatures.len() as u32);
        for sig in &self.signatures {
            w.write_string(&sig.name);
            w.write_u32(sig.severity as u32);
            w.write_u32(sig.pattern.len() as u32);
            w.write_bytes(&sig.pattern);
            w.write_i32(match sig.offset {
                SignatureOffset::Anywhere => -1,
                SignatureOffset::Fixed(off) => off as i32,
            });
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u32("magic")?;
        if magic != DATABASE_MAGIC {
            return Err(EngineError::format(format!(
                "bad signature database magic {magic:#010x}"
            )));
        }
        let version = r.read_u32("version")?;
        let count = r.read_u32("signature count")?;
        // A record is at least 17 bytes; a count beyond that bound is
        // corruption, not data, and must not drive an allocation.
        if count as usize > r.remaining() / 17 {
            return Err(EngineError::format(format!(
                "signature count {count} exceeds what {} bytes can hold",
                r.remaining()
            )));
        }

        let mut signatures = Vec::with_capacity(count as usize);
        for i in 0..count {
            let name = r.read_string("signature name")?;
            let severity = r.read_u32("severity")?;
            let severity = u8::try_from(severity).map_err(|_| {
                EngineError::format(format!("signature {i}: severity {severity} out of range"))
            })?;
            let pattern_len = r.read_u32("pattern length")? as usize;
            let pattern = r.read_bytes(pattern_len, "pattern")?;
            let offset = match r.read_i32("offset")? {
                -1 => SignatureOffset::Anywhere,
                off if off >= 0 => SignatureOffset::Fixed(off as u32),
                off => {
                    return Err(EngineError::format(format!(
                        "signature {i}: invalid offset {off}"
                    )))
                }
            };
            signatures.push(Signature::new(name, pattern, offset, severity)?);
        }

        Ok(SignatureDatabase::new(version, signatures))
    }
}
