//! On-disk quarantine index.
//!
//! Little-endian binary: `u32 count`, then per entry
//! `{u32 orig_len, orig, u32 vault_len, vault, u32 name_len, name,
//! u64 quarantine_epoch_secs}`. Strings are UTF-8. The file is replaced
//! atomically (temp + fsync + rename) on every mutation.

use std::path::PathBuf;
use vigil_core::codec::{Reader, Writer};
use vigil_core::Result;

/// The durable slice of a quarantine entry. The id and original size
/// are reconstructed at recovery from the vault file itself.
#[derive(Debug, Clone)]
pub(crate) struct IndexRecord {
    pub original_path: PathBuf,
    pub vault_path: PathBuf,
    pub threat_name: String,
    pub quarantined_at: u64,
}

pub(crate) fn encode(records: &[IndexRecord]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(records.len() as u32);
    for rec in records {
        w.write_string(&rec.original_path.to_string_lossy());
        w.write_string(&rec.vault_path.to_string_lossy());
        w.write_string(&rec.threat_name);
        w.write_u64(rec.quarantined_at);
    }
    w.into_bytes()
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Vec<IndexRecord>> {
    let mut r = Reader::new(bytes);
    let count = r.read_u32("entry count")?;
    // Three length prefixes plus the timestamp put a 20-byte floor
    // under every record; a larger count is corruption.
    if count as usize > r.remaining() / 20 {
        return Err(vigil_core::EngineError::format(format!(
            "index entry count {count} exceeds what {} bytes can hold",
            r.remaining()
        )));
    }
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let original_path = PathBuf::from(r.read_string("original path")?);
        let vault_path = PathBuf::from(r.read_string("vault path")?);
        let threat_name = r.read_string("threat name")?;
        let quarantined_at = r.read_u64("quarantine time")?;
        records.push(IndexRecord {
            original_path,
            vault_path,
            threat_name,
            quarantined_at,
        });
    }
    Ok(records)
}
