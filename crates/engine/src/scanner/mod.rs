//! On-demand scan orchestrator.
//!
//! Dispatches every scan kind over the same traversal: resolve targets,
//! pre-count files so progress is live, then walk and feed the engine.
//! One scan runs at a time; `cancel` is observed at file boundaries and
//! in-flight file scans always complete.

mod policy;

pub use policy::{HostPathPolicy, PathPolicy, StaticPathPolicy};

use crate::config::ScanOptions;
use crate::engine::ThreatEngine;
use crate::monitor::ThreatCallback;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use vigil_core::{
    EngineError, Result, ScanKind, ScanOutcome, ScanStatistics, ThreatInfo, Verdict,
};

/// Invoked after every scanned file with the file, the overall percent,
/// and a statistics snapshot. Runs on the scanning thread with no core
/// lock held; must not re-enter the orchestrator except to cancel.
pub type ProgressCallback = Arc<dyn Fn(&Path, u32, &ScanStatistics) + Send + Sync>;

/// Final report of one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub kind: ScanKind,
    pub outcome: ScanOutcome,
    pub threats: Vec<ThreatInfo>,
    pub stats: ScanStatistics,
}

struct Inner {
    engine: Arc<ThreatEngine>,
    options: ScanOptions,
    policy: Arc<dyn PathPolicy>,
    stats: Mutex<ScanStatistics>,
    scanning: AtomicBool,
    cancel: AtomicBool,
    progress_callback: Mutex<Option<ProgressCallback>>,
    threat_callback: Mutex<Option<ThreatCallback>>,
    worker: Mutex<Option<JoinHandle<ScanReport>>>,
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl ScanOrchestrator {
    pub fn new(engine: Arc<ThreatEngine>, options: ScanOptions) -> Self {
        Self::with_policy(engine, options, Arc::new(HostPathPolicy))
    }

    pub fn with_policy(
        engine: Arc<ThreatEngine>,
        options: ScanOptions,
        policy: Arc<dyn PathPolicy>,
    ) -> Self {
        ScanOrchestrator {
            inner: Arc::new(Inner {
                engine,
                options,
                policy,
                stats: Mutex::new(ScanStatistics::default()),
                scanning: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                progress_callback: Mutex::new(None),
                threat_callback: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.inner.options
    }

    /// Run a scan on the calling thread. Fails with a `State` error if
    /// another scan is already in progress.
    pub fn scan(&self, kind: ScanKind, targets: &[PathBuf]) -> Result<ScanReport> {
        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            return Err(EngineError::state("a scan is already in progress"));
        }
        self.inner.cancel.store(false, Ordering::SeqCst);
        let report = run_scan(&self.inner, kind, targets.to_vec());
        self.inner.scanning.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Run a scan on a dedicated thread. Returns false when a scan is
    /// already in progress.
    pub fn start_async(&self, kind: ScanKind, targets: Vec<PathBuf>) -> bool {
        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.cancel.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = thread::spawn(move || {
            let report = run_scan(&inner, kind, targets);
            inner.scanning.store(false, Ordering::SeqCst);
            report
        });
        *lock(&self.inner.worker) = Some(handle);
        true
    }

    /// Ask the running scan to stop at the next file boundary. Safe to
    /// call from progress callbacks and when nothing is running.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Wait for the async scan to finish and take its report.
    pub fn join(&self) -> Option<ScanReport> {
        let handle = lock(&self.inner.worker).take()?;
        handle.join().ok()
    }

    /// Snapshot of the current (or last) scan's counters.
    pub fn statistics(&self) -> ScanStatistics {
        lock(&self.inner.stats).clone()
    }

    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *lock(&self.inner.progress_callback) = Some(callback);
    }

    pub fn set_threat_callback(&self, callback: ThreatCallback) {
        *lock(&self.inner.threat_callback) = Some(callback);
    }

    pub fn clear_callbacks(&self) {
        *lock(&self.inner.progress_callback) = None;
        *lock(&self.inner.threat_callback) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_scan(inner: &Inner, kind: ScanKind, targets: Vec<PathBuf>) -> ScanReport {
    let targets = resolve_targets(inner, kind, targets);
    info!(?kind, targets = targets.len(), "scan started");

    {
        let mut stats = lock(&inner.stats);
        *stats = ScanStatistics {
            started_at_ms: Some(Utc::now().timestamp_millis()),
            ..ScanStatistics::default()
        };
    }

    // Pre-count so the percent moves during the walk.
    for target in &targets {
        if inner.cancel.load(Ordering::SeqCst) {
            break;
        }
        count_target(inner, target);
    }

    let mut outcome = ScanOutcome::Success;
    let mut threats = Vec::new();
    for target in &targets {
        if inner.cancel.load(Ordering::SeqCst) {
            outcome = outcome.worst(ScanOutcome::Cancelled);
            break;
        }
        outcome = outcome.worst(scan_target(inner, target, &mut threats));
    }

    let stats = {
        let mut stats = lock(&inner.stats);
        stats.finished_at_ms = Some(Utc::now().timestamp_millis());
        if outcome == ScanOutcome::Cancelled {
            stats.update_progress();
        } else {
            stats.progress_percent = 100;
        }
        stats.clone()
    };

    info!(
        ?kind,
        ?outcome,
        scanned = stats.scanned_files,
        skipped = stats.skipped_files,
        threats = stats.threats_found,
        "scan finished"
    );

    ScanReport {
        kind,
        outcome,
        threats,
        stats,
    }
}

fn resolve_targets(inner: &Inner, kind: ScanKind, targets: Vec<PathBuf>) -> Vec<PathBuf> {
    match kind {
        ScanKind::File | ScanKind::Folder | ScanKind::Drive | ScanKind::Custom => targets,
        ScanKind::System => inner.policy.system_paths(),
        ScanKind::Quick => inner.policy.quick_paths(),
        ScanKind::Full => inner.policy.fixed_drives(),
    }
}

/// Files under `root` that the exclusion prefixes let through.
/// Traversal errors (permission denied, vanished entries) are logged
/// and skipped, never fatal.
fn walk_files(root: &Path, options: &ScanOptions) -> impl Iterator<Item = walkdir::DirEntry> {
    let filter_options = options.clone();
    WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .into_iter()
        .filter_entry(move |entry| !filter_options.is_excluded(entry.path()))
        .filter_map(|res| match res {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(%err, "traversal error, skipping entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
}

fn count_target(inner: &Inner, target: &Path) {
    let Ok(meta) = fs::metadata(target) else {
        return;
    };
    if inner.options.is_excluded(target) {
        return;
    }

    let mut stats = lock(&inner.stats);
    if meta.is_file() {
        stats.total_files += 1;
        stats.total_bytes += meta.len();
        return;
    }
    drop(stats);

    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in walk_files(target, &inner.options) {
        if inner.cancel.load(Ordering::SeqCst) {
            break;
        }
        files += 1;
        bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }

    let mut stats = lock(&inner.stats);
    stats.total_files += files;
    stats.total_bytes += bytes;
}

fn scan_target(inner: &Inner, target: &Path, threats: &mut Vec<ThreatInfo>) -> ScanOutcome {
    let meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(path = %target.display(), "scan target access denied");
            return ScanOutcome::AccessDenied;
        }
        Err(err) => {
            warn!(path = %target.display(), %err, "scan target unreadable");
            return ScanOutcome::Failed;
        }
    };

    if inner.options.is_excluded(target) {
        debug!(path = %target.display(), "scan target is excluded");
        return ScanOutcome::Success;
    }

    if meta.is_file() {
        scan_one_file(inner, target, meta.len(), threats);
        return ScanOutcome::Success;
    }

    for entry in walk_files(target, &inner.options) {
        if inner.cancel.load(Ordering::SeqCst) {
            return ScanOutcome::Cancelled;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        scan_one_file(inner, entry.path(), size, threats);
    }
    ScanOutcome::Success
}

fn scan_one_file(inner: &Inner, path: &Path, size: u64, threats: &mut Vec<ThreatInfo>) {
    let scannable = size <= inner.options.max_file_size
        && inner.options.extension_allowed(path)
        && !inner.options.is_excluded(path);
    if !scannable {
        let mut stats = lock(&inner.stats);
        stats.skipped_files += 1;
        stats.update_progress();
        return;
    }

    let verdict = inner.engine.scan_file(path);

    let (percent, snapshot) = {
        let mut stats = lock(&inner.stats);
        stats.scanned_files += 1;
        stats.scanned_bytes += size;
        if verdict.is_threat() {
            stats.threats_found += 1;
        }
        stats.update_progress();
        (stats.progress_percent, stats.clone())
    };

    if let Verdict::Threat(info) = verdict {
        let callback = lock(&inner.threat_callback).clone();
        if let Some(callback) = callback {
            callback(&info);
        }
        threats.push(info);
    }

    let callback = lock(&inner.progress_callback).clone();
    if let Some(callback) = callback {
        callback(path, percent, &snapshot);
    }
}
