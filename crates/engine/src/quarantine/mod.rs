//! Quarantine vault: atomic relocation of malicious files with a
//! durable index.
//!
//! The move itself is a rename (copy + fsync + delete on cross-device
//! failure); the index is rewritten atomically after every mutation, so
//! a crash between the two leaves at worst a vault file the next
//! recovery reports as an orphan, never a dangling index entry.

mod index;

use index::IndexRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{EngineError, Result};

const INDEX_FILE_NAME: &str = "index";
const MAX_VAULT_NAME_LEN: usize = 200;

/// One vaulted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// `<epoch_secs>_<uuid>`; unique across restarts.
    pub id: String,
    pub original_path: PathBuf,
    pub vault_path: PathBuf,
    pub threat_name: String,
    /// Unix epoch seconds.
    pub quarantined_at: u64,
    pub original_size: u64,
}

pub struct QuarantineStore {
    vault_dir: PathBuf,
    index_path: PathBuf,
    entries: Mutex<Vec<QuarantineEntry>>,
}

impl QuarantineStore {
    /// Open the vault, creating it if needed, and recover the index:
    /// entries whose vault file vanished are dropped, stray vault files
    /// are logged but never deleted.
    pub fn open(vault_dir: impl Into<PathBuf>) -> Result<Self> {
        let vault_dir = vault_dir.into();
        fs::create_dir_all(&vault_dir)?;
        let index_path = vault_dir.join(INDEX_FILE_NAME);

        let entries = recover(&vault_dir, &index_path);
        info!(
            vault = %vault_dir.display(),
            entries = entries.len(),
            "quarantine store opened"
        );

        Ok(QuarantineStore {
            vault_dir,
            index_path,
            entries: Mutex::new(entries),
        })
    }

    /// Move `src` into the vault and record it durably. Returns the new
    /// entry id. On any failure the source file is left in place and the
    /// index is untouched.
    pub fn quarantine(&self, src: &Path, threat_name: &str) -> Result<String> {
        let meta = fs::metadata(src)?;
        if !meta.is_file() {
            return Err(EngineError::state(format!(
                "{} is not a regular file",
                src.display()
            )));
        }

        let quarantined_at = epoch_secs();
        let id = format!("{}_{}", quarantined_at, Uuid::new_v4().simple());
        let base = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vault_path = self
            .vault_dir
            .join(format!("{id}_{}", sanitize_file_name(&base)));

        move_into_vault(src, &vault_path)?;

        let entry = QuarantineEntry {
            id: id.clone(),
            original_path: src.to_path_buf(),
            vault_path: vault_path.clone(),
            threat_name: threat_name.to_string(),
            quarantined_at,
            original_size: meta.len(),
        };

        let mut entries = self.lock_entries();
        entries.push(entry);
        if let Err(err) = self.persist(&entries) {
            // Roll back the move so the caller's failure report matches
            // what is on disk.
            entries.pop();
            let _ = fs::rename(&vault_path, src);
            return Err(err);
        }

        info!(
            src = %src.display(),
            vault = %vault_path.display(),
            threat = threat_name,
            "file quarantined"
        );
        Ok(id)
    }

    /// Move a vaulted file to `dest` and drop its entry. The entry
    /// survives any failure.
    pub fn restore(&self, entry_id: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(EngineError::state(format!(
                "restore destination {} already exists",
                dest.display()
            )));
        }

        let mut entries = self.lock_entries();
        let pos = entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| EngineError::not_found(format!("quarantine entry {entry_id}")))?;

        move_into_vault(&entries[pos].vault_path, dest)?;
        let entry = entries.remove(pos);
        if let Err(err) = self.persist(&entries) {
            warn!(%err, "index persist failed after restore; re-adding entry");
            entries.insert(pos, entry);
            return Err(err);
        }

        info!(id = entry_id, dest = %dest.display(), "quarantine entry restored");
        Ok(())
    }

    /// Remove a vaulted file for good. The vault unlink is best-effort;
    /// the index entry goes away regardless.
    pub fn delete_entry(&self, entry_id: &str) -> Result<()> {
        let mut entries = self.lock_entries();
        let pos = entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| EngineError::not_found(format!("quarantine entry {entry_id}")))?;

        let entry = entries.remove(pos);
        if let Err(err) = fs::remove_file(&entry.vault_path) {
            debug!(%err, vault = %entry.vault_path.display(), "vault file removal failed");
        }
        self.persist(&entries)?;

        info!(id = entry_id, "quarantine entry deleted");
        Ok(())
    }

    pub fn list(&self) -> Vec<QuarantineEntry> {
        self.lock_entries().clone()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<QuarantineEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rewrite the whole index atomically.
    fn persist(&self, entries: &[QuarantineEntry]) -> Result<()> {
        let records: Vec<IndexRecord> = entries
            .iter()
            .map(|e| IndexRecord {
                original_path: e.original_path.clone(),
                vault_path: e.vault_path.clone(),
                threat_name: e.threat_name.clone(),
                quarantined_at: e.quarantined_at,
            })
            .collect();

        let tmp = self.index_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&index::encode(&records))?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp, &self.index_path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}

/// Rename with a copy + fsync + delete fallback for cross-device moves.
/// A failed copy never leaves a partial destination behind.
fn move_into_vault(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(%rename_err, src = %src.display(), "rename failed, trying copy fallback");
            match copy_sync(src, dest) {
                Ok(()) => {
                    fs::remove_file(src)?;
                    Ok(())
                }
                Err(copy_err) => {
                    let _ = fs::remove_file(dest);
                    Err(copy_err)
                }
            }
        }
    }
}

fn copy_sync(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    File::open(dest)?.sync_all()?;
    Ok(())
}

/// Read the index and reconcile it with the vault directory contents.
fn recover(vault_dir: &Path, index_path: &Path) -> Vec<QuarantineEntry> {
    let records = match fs::read(index_path) {
        Ok(bytes) => match index::decode(&bytes) {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "quarantine index corrupt; starting with empty index");
                Vec::new()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            warn!(%err, "quarantine index unreadable; starting with empty index");
            Vec::new()
        }
    };

    let mut entries = Vec::with_capacity(records.len());
    for rec in records {
        match fs::metadata(&rec.vault_path) {
            Ok(meta) => {
                let id = id_from_vault_name(&rec.vault_path)
                    .unwrap_or_else(|| format!("{}_{}", rec.quarantined_at, Uuid::new_v4().simple()));
                entries.push(QuarantineEntry {
                    id,
                    original_path: rec.original_path,
                    vault_path: rec.vault_path,
                    threat_name: rec.threat_name,
                    quarantined_at: rec.quarantined_at,
                    original_size: meta.len(),
                });
            }
            Err(_) => {
                warn!(
                    vault = %rec.vault_path.display(),
                    "dropping index entry whose vault file is missing"
                );
            }
        }
    }

    // Report strays so an operator can inspect them; never auto-delete.
    let referenced: HashSet<PathBuf> = entries.iter().map(|e| e.vault_path.clone()).collect();
    if let Ok(dir) = fs::read_dir(vault_dir) {
        for dent in dir.flatten() {
            let path = dent.path();
            if path.file_name().map(|n| n == INDEX_FILE_NAME).unwrap_or(false) {
                continue;
            }
            if path.is_file() && !referenced.contains(&path) {
                warn!(path = %path.display(), "orphan file in quarantine vault");
            }
        }
    }

    entries
}

/// Vault file names start with `<epoch>_<uuid>_`; recover the id part.
fn id_from_vault_name(vault_path: &Path) -> Option<String> {
    let name = vault_path.file_name()?.to_str()?;
    let mut parts = name.splitn(3, '_');
    let epoch = parts.next()?;
    let token = parts.next()?;
    if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) || token.is_empty() {
        return None;
    }
    Some(format!("{epoch}_{token}"))
}

/// Make an untrusted basename safe for the vault directory: path
/// separators and shell metacharacters become `_`, leading dots and
/// spaces are trimmed, the result is capped at 200 chars and never
/// empty.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out: String = name
        .trim_start_matches(['.', ' '])
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if out.len() > MAX_VAULT_NAME_LEN {
        out.truncate(MAX_VAULT_NAME_LEN);
    }
    if out.is_empty() {
        out = "extracted_file".to_string();
    }
    out
}

fn epoch_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
