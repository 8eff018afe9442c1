//! Configuration for the engine, monitor, and on-demand scans.
//!
//! Everything hangs off a single `data_dir`:
//! `<data_dir>/Database/signatures.db` and `<data_dir>/Quarantine/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_SCAN_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 7.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for the database and quarantine directories.
    pub data_dir: PathBuf,
    /// Files larger than this are skipped, not scanned.
    pub max_scan_size: u64,
    /// Shannon entropy (bits/byte) above which the high-entropy
    /// heuristic fires.
    pub entropy_threshold: f64,
    /// Initial state of the heuristic pass; togglable at runtime.
    pub heuristics_enabled: bool,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            ..EngineConfig::default()
        }
    }

    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join("Database")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_dir().join("signatures.db")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.data_dir.join("Quarantine")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("data"),
            max_scan_size: DEFAULT_MAX_SCAN_SIZE,
            entropy_threshold: DEFAULT_ENTROPY_THRESHOLD,
            heuristics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Directories to watch at startup. Policy only; may be empty.
    pub watch_roots: Vec<PathBuf>,
    /// Long-lived scan workers draining the queue.
    pub worker_threads: usize,
    /// Wait after dequeue so writers can finish the file.
    pub debounce_ms: u64,
    /// Verdicts at or above this severity are quarantined automatically.
    pub auto_quarantine_severity: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            watch_roots: Vec::new(),
            worker_threads: 4,
            debounce_ms: 100,
            auto_quarantine_severity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Per-file size cap for on-demand scans.
    pub max_file_size: u64,
    /// When non-empty, only these extensions are scanned (lowercase, no
    /// dot).
    pub extension_allowlist: Vec<String>,
    /// Prefix-matched, case-insensitive path exclusions.
    pub exclusions: Vec<PathBuf>,
    pub follow_symlinks: bool,
}

impl ScanOptions {
    /// Whether `path` falls under one of the exclusion prefixes.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().to_lowercase();
        self.exclusions.iter().any(|excl| {
            let excl = excl.to_string_lossy().to_lowercase();
            path.starts_with(excl.as_str())
        })
    }

    /// Whether `path`'s extension passes the allow-list.
    pub fn extension_allowed(&self, path: &Path) -> bool {
        if self.extension_allowlist.is_empty() {
            return true;
        }
        match vigil_core::ext::extension_lower(path) {
            Some(ext) => self.extension_allowlist.iter().any(|a| a == &ext),
            None => false,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            max_file_size: DEFAULT_MAX_SCAN_SIZE,
            extension_allowlist: Vec::new(),
            exclusions: vec![
                PathBuf::from("C:\\Windows\\WinSxS"),
                PathBuf::from("C:\\Windows\\Servicing"),
                PathBuf::from("C:\\System Volume Information"),
                PathBuf::from("C:\\$Recycle.Bin"),
                PathBuf::from("C:\\hiberfil.sys"),
                PathBuf::from("C:\\pagefile.sys"),
                PathBuf::from("C:\\swapfile.sys"),
            ],
            follow_symlinks: false,
        }
    }
}
