//! Threat engine: signature matching, heuristics, verdict synthesis.
//!
//! `scan_file` / `scan_bytes` are callable from any number of threads;
//! the signature set sits behind a copy-on-write snapshot and the
//! quarantine vault behind its own lock. Per-file I/O problems are
//! absorbed as Clean verdicts so one unreadable file never aborts a
//! directory or real-time scan.

mod database;
mod heuristics;

pub use heuristics::shannon_entropy;

use crate::archive::{ArchiveScanReport, ArchiveScanner};
use crate::cloud::{sha256_hex, CloudIntelligence, CloudVerdict};
use crate::config::EngineConfig;
use crate::quarantine::{QuarantineEntry, QuarantineStore};
use database::SignatureStore;
use heuristics::Heuristics;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_core::{Result, SignatureDatabase, ThreatInfo, Verdict};

pub struct ThreatEngine {
    config: EngineConfig,
    signatures: SignatureStore,
    heuristics: Heuristics,
    heuristics_enabled: AtomicBool,
    quarantine: QuarantineStore,
    cloud: Option<Arc<dyn CloudIntelligence>>,
    /// Files skipped for size or I/O reasons since startup.
    files_skipped: AtomicU64,
}

impl ThreatEngine {
    /// Open the engine: create the data-dir layout, load (or bootstrap)
    /// the signature database, and recover the quarantine index.
    pub fn new(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(config.database_dir())?;
        let signatures = SignatureStore::open(config.database_path())?;
        let quarantine = QuarantineStore::open(config.quarantine_dir())?;
        let heuristics = Heuristics::new(config.entropy_threshold);
        let heuristics_enabled = AtomicBool::new(config.heuristics_enabled);

        info!(data_dir = %config.data_dir.display(), "threat engine ready");
        Ok(ThreatEngine {
            config,
            signatures,
            heuristics,
            heuristics_enabled,
            quarantine,
            cloud: None,
            files_skipped: AtomicU64::new(0),
        })
    }

    /// Attach a cloud reputation client; consulted only when the local
    /// passes find nothing.
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudIntelligence>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database_version(&self) -> u32 {
        self.signatures.snapshot().version()
    }

    pub fn signature_count(&self) -> u32 {
        self.signatures.snapshot().signature_count()
    }

    pub fn set_heuristics_enabled(&self, enabled: bool) {
        let was = self.heuristics_enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "heuristic analysis toggled");
        }
    }

    pub fn heuristics_enabled(&self) -> bool {
        self.heuristics_enabled.load(Ordering::SeqCst)
    }

    /// Files skipped (too large or unreadable) since startup.
    pub fn files_skipped(&self) -> u64 {
        self.files_skipped.load(Ordering::Relaxed)
    }

    /// Scan a file on disk. I/O failures are non-fatal: the file is
    /// treated as Clean and counted as skipped.
    pub fn scan_file(&self, path: &Path) -> Verdict {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!(path = %path.display(), %err, "stat failed, treating as clean");
                self.files_skipped.fetch_add(1, Ordering::Relaxed);
                return Verdict::Clean;
            }
        };

        let size = meta.len();
        if size == 0 {
            return Verdict::Clean;
        }
        if size > self.config.max_scan_size {
            debug!(path = %path.display(), size, "file over scan size cap, skipping");
            self.files_skipped.fetch_add(1, Ordering::Relaxed);
            return Verdict::Clean;
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                debug!(path = %path.display(), %err, "read failed, treating as clean");
                self.files_skipped.fetch_add(1, Ordering::Relaxed);
                return Verdict::Clean;
            }
        };

        match self.scan_bytes(&data, Some(path)) {
            Verdict::Threat(mut info) => {
                info.file_path = path.to_path_buf();
                info.file_size = size;
                warn!(
                    path = %path.display(),
                    threat = %info.threat_name,
                    severity = info.severity,
                    "threat detected"
                );
                Verdict::Threat(info)
            }
            Verdict::Clean => Verdict::Clean,
        }
    }

    /// Scan an in-memory buffer. Never fails; an empty buffer is Clean.
    pub fn scan_bytes(&self, data: &[u8], path_hint: Option<&Path>) -> Verdict {
        if data.is_empty() {
            return Verdict::Clean;
        }

        let db = self.signatures.snapshot();
        for sig in db.signatures() {
            if sig.matches(data) {
                return Verdict::Threat(ThreatInfo {
                    file_path: path_hint.map(Path::to_path_buf).unwrap_or_default(),
                    threat_name: sig.name().to_string(),
                    severity: sig.severity(),
                    file_size: data.len() as u64,
                });
            }
        }

        if self.heuristics_enabled() {
            if let Some(hit) = self.heuristics.evaluate(data, path_hint) {
                return Verdict::Threat(ThreatInfo {
                    file_path: path_hint.map(Path::to_path_buf).unwrap_or_default(),
                    threat_name: hit.name.to_string(),
                    severity: hit.severity,
                    file_size: data.len() as u64,
                });
            }
        }

        if let Some(cloud) = &self.cloud {
            match cloud.query_hash(&sha256_hex(data)) {
                CloudVerdict::Malicious => {
                    return Verdict::Threat(ThreatInfo {
                        file_path: path_hint.map(Path::to_path_buf).unwrap_or_default(),
                        threat_name: "Cloud.Reputation.Malicious".to_string(),
                        severity: 9,
                        file_size: data.len() as u64,
                    });
                }
                CloudVerdict::Suspicious => {
                    debug!(path = ?path_hint, "cloud reputation flagged buffer as suspicious");
                }
                CloudVerdict::Clean | CloudVerdict::Unknown => {}
            }
        }

        Verdict::Clean
    }

    /// Enumerate and scan a ZIP-layout archive.
    pub fn scan_archive(&self, path: &Path) -> Result<ArchiveScanReport> {
        ArchiveScanner::new(self).scan(path)
    }

    /// Move a malicious file into the vault. On failure the original is
    /// left untouched.
    pub fn quarantine(&self, path: &Path, threat_name: &str) -> Result<String> {
        self.quarantine.quarantine(path, threat_name)
    }

    /// Move a vaulted file back out. `dest` must not already exist.
    pub fn restore(&self, entry_id: &str, dest: &Path) -> Result<()> {
        self.quarantine.restore(entry_id, dest)
    }

    pub fn delete_quarantined(&self, entry_id: &str) -> Result<()> {
        self.quarantine.delete_entry(entry_id)
    }

    pub fn list_quarantine(&self) -> Vec<QuarantineEntry> {
        self.quarantine.list()
    }

    /// Persist and activate a new signature set. Scans already running
    /// finish against the set they started with; on error the old set
    /// stays active.
    pub fn update_database(&self, db: SignatureDatabase) -> Result<()> {
        self.signatures.install(db)
    }
}
