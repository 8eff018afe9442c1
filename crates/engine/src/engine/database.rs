//! Durable signature store with copy-on-write snapshots.
//!
//! Readers clone an `Arc` to the current set and scan against it
//! unlocked; `install` persists the new set first (temp file + fsync +
//! rename) and only then swaps the pointer, so a crash mid-update leaves
//! either the old or the new file, never a torn one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use vigil_core::{EngineError, Result, SignatureDatabase};

pub(crate) struct SignatureStore {
    path: PathBuf,
    current: RwLock<Arc<SignatureDatabase>>,
}

impl SignatureStore {
    /// Load the database at `path`, installing and persisting the
    /// builtin set when the file is missing or unreadable.
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = match fs::read(&path) {
            Ok(bytes) => match SignatureDatabase::decode(&bytes) {
                Ok(db) => {
                    info!(
                        version = db.version(),
                        signatures = db.signature_count(),
                        "signature database loaded"
                    );
                    db
                }
                Err(err) => {
                    warn!(%err, path = %path.display(), "corrupt signature database, installing builtin set");
                    let db = SignatureDatabase::builtin();
                    persist(&path, &db)?;
                    db
                }
            },
            Err(err) => {
                warn!(%err, path = %path.display(), "no signature database, installing builtin set");
                let db = SignatureDatabase::builtin();
                persist(&path, &db)?;
                db
            }
        };

        Ok(SignatureStore {
            path,
            current: RwLock::new(Arc::new(db)),
        })
    }

    /// Cheap shared handle to the current set. In-flight scans keep the
    /// snapshot they started with.
    pub fn snapshot(&self) -> Arc<SignatureDatabase> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist and activate a new set. On any error the previous set
    /// stays active both in memory and on disk.
    pub fn install(&self, db: SignatureDatabase) -> Result<()> {
        persist(&self.path, &db)?;
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(
            old_version = current.version(),
            new_version = db.version(),
            signatures = db.signature_count(),
            "signature database updated"
        );
        *current = Arc::new(db);
        Ok(())
    }
}

/// Write the encoded database to a sibling temp file, fsync, and rename
/// over the target.
fn persist(path: &Path, db: &SignatureDatabase) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::state("signature database path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("db.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&db.encode())?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vigil_core::{Signature, SignatureOffset};

    fn db_with_version(version: u32) -> SignatureDatabase {
        SignatureDatabase::new(
            version,
            vec![Signature::new("T", b"x".to_vec(), SignatureOffset::Anywhere, 5).unwrap()],
        )
    }

    #[test]
    fn test_open_missing_file_installs_builtin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signatures.db");
        let store = SignatureStore::open(path.clone()).unwrap();
        assert_eq!(store.snapshot().version(), 1);
        // The builtin set was persisted for the next start.
        assert!(path.exists());
        let reloaded = SignatureDatabase::decode(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(reloaded.signature_count(), store.snapshot().signature_count());
    }

    #[test]
    fn test_open_corrupt_file_installs_builtin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signatures.db");
        fs::write(&path, b"garbage").unwrap();
        let store = SignatureStore::open(path).unwrap();
        assert_eq!(store.snapshot().version(), 1);
    }

    #[test]
    fn test_install_swaps_snapshot_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signatures.db");
        let store = SignatureStore::open(path.clone()).unwrap();

        let before = store.snapshot();
        store.install(db_with_version(9)).unwrap();
        assert_eq!(store.snapshot().version(), 9);
        // The snapshot taken before the install still sees the old set.
        assert_eq!(before.version(), 1);

        let on_disk = SignatureDatabase::decode(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.version(), 9);
    }

    #[test]
    fn test_failed_install_keeps_old_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signatures.db");
        let store = SignatureStore::open(path.clone()).unwrap();

        // A directory squatting on the temp path makes the persist fail
        // before the rename, so the update must not take effect.
        fs::create_dir_all(path.with_extension("db.tmp")).unwrap();
        assert!(store.install(db_with_version(9)).is_err());
        assert_eq!(store.snapshot().version(), 1);

        let on_disk = SignatureDatabase::decode(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.version(), 1);
    }
}
