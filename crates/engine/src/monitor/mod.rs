//! Real-time file monitor.
//!
//! One watch thread drains the platform change notifications, filters
//! them, and feeds a priority queue; a fixed pool of workers drains the
//! queue into the threat engine. High-severity verdicts are quarantined
//! automatically and every verdict reaches the threat callback.
//!
//! The watch thread owns the watcher and its channel; workers touch
//! only the queue and the engine. Shutdown is idempotent: stop flag,
//! wake the queue, join workers, join the watch thread, drop the
//! watcher.

mod filter;
mod queue;

use crate::config::MonitorConfig;
use crate::engine::ThreatEngine;
use filter::should_skip_event;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use queue::ScanQueue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vigil_core::ext::{is_zip_container, scan_priority};
use vigil_core::{EngineError, Result, ThreatInfo, Verdict};

/// Invoked from worker threads for every detected threat; must not
/// re-enter the monitor except to stop it.
pub type ThreatCallback = Arc<dyn Fn(&ThreatInfo) + Send + Sync>;

const WATCH_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct MonitorCounters {
    events_seen: AtomicU64,
    events_filtered: AtomicU64,
    events_enqueued: AtomicU64,
}

pub struct FileMonitor {
    engine: Arc<ThreatEngine>,
    config: MonitorConfig,
    queue: Arc<ScanQueue>,
    watched: Mutex<Vec<PathBuf>>,
    real_time: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watch_thread: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threat_callback: Arc<Mutex<Option<ThreatCallback>>>,
    /// Paths a worker is currently scanning; a second queue entry for
    /// the same path (create followed by modify) is dropped instead of
    /// scanned twice.
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    counters: Arc<MonitorCounters>,
}

impl FileMonitor {
    pub fn new(engine: Arc<ThreatEngine>, config: MonitorConfig) -> Self {
        FileMonitor {
            engine,
            config,
            queue: Arc::new(ScanQueue::new()),
            watched: Mutex::new(Vec::new()),
            real_time: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            watch_thread: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            threat_callback: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(MonitorCounters::default()),
        }
    }

    /// Spin up the watcher, the watch thread, and the worker pool, and
    /// subscribe the configured roots.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::state("monitor already running"));
        }

        let (tx, rx) = channel::<notify::Result<notify::Event>>();
        let watcher = RecommendedWatcher::new(
            move |event| {
                let _ = tx.send(event);
            },
            notify::Config::default(),
        )
        .map_err(|err| EngineError::state(format!("watcher init failed: {err}")))?;
        *self.lock(&self.watcher) = Some(watcher);

        // Paths registered before start now get a live subscription.
        let preexisting = self.lock(&self.watched).clone();
        for path in preexisting {
            if let Some(watcher) = self.lock(&self.watcher).as_mut() {
                if let Err(err) = watcher.watch(&path, RecursiveMode::Recursive) {
                    warn!(path = %path.display(), %err, "could not watch directory");
                }
            }
        }
        let roots = self.config.watch_roots.clone();
        for root in roots {
            if let Err(err) = self.add_watch(&root) {
                warn!(path = %root.display(), %err, "could not watch configured root");
            }
        }

        let watch_handle = self.spawn_watch_thread(rx);
        *self.lock(&self.watch_thread) = Some(watch_handle);

        let mut workers = self.lock(&self.workers);
        for worker_id in 0..self.config.worker_threads.max(1) {
            workers.push(self.spawn_worker(worker_id));
        }

        info!(
            workers = workers.len(),
            watched = self.lock(&self.watched).len(),
            "file monitor started"
        );
        Ok(())
    }

    /// Watch a directory tree. Re-adding a watched path is a no-op.
    pub fn add_watch(&self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize()?;
        let mut watched = self.lock(&self.watched);
        if watched.contains(&canonical) {
            return Ok(());
        }

        if let Some(watcher) = self.lock(&self.watcher).as_mut() {
            watcher
                .watch(&canonical, RecursiveMode::Recursive)
                .map_err(|err| EngineError::state(format!("watch failed: {err}")))?;
        }
        info!(path = %canonical.display(), "watching directory");
        watched.push(canonical);
        Ok(())
    }

    pub fn remove_watch(&self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut watched = self.lock(&self.watched);
        let pos = watched
            .iter()
            .position(|p| p == &canonical)
            .ok_or_else(|| EngineError::not_found(format!("watch {}", canonical.display())))?;

        if let Some(watcher) = self.lock(&self.watcher).as_mut() {
            if let Err(err) = watcher.unwatch(&canonical) {
                debug!(path = %canonical.display(), %err, "unwatch failed");
            }
        }
        watched.remove(pos);
        info!(path = %canonical.display(), "stopped watching directory");
        Ok(())
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.lock(&self.watched).clone()
    }

    /// Real-time toggle; when off, events are dropped before filtering.
    pub fn set_real_time_enabled(&self, enabled: bool) {
        let was = self.real_time.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "real-time protection toggled");
        }
    }

    pub fn real_time_enabled(&self) -> bool {
        self.real_time.load(Ordering::SeqCst)
    }

    pub fn set_threat_callback(&self, callback: ThreatCallback) {
        *self.lock(&self.threat_callback) = Some(callback);
    }

    pub fn clear_threat_callback(&self) {
        *self.lock(&self.threat_callback) = None;
    }

    /// (seen, filtered, enqueued) event counters since startup.
    pub fn event_counters(&self) -> (u64, u64, u64) {
        (
            self.counters.events_seen.load(Ordering::Relaxed),
            self.counters.events_filtered.load(Ordering::Relaxed),
            self.counters.events_enqueued.load(Ordering::Relaxed),
        )
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop everything. Safe to call more than once; later calls are
    /// no-ops.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("file monitor shutting down");

        self.queue.close();
        let workers: Vec<JoinHandle<()>> = self.lock(&self.workers).drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }

        // Dropping the watcher disconnects the event channel, which
        // unblocks the watch thread even mid-wait.
        *self.lock(&self.watcher) = None;
        if let Some(handle) = self.lock(&self.watch_thread).take() {
            let _ = handle.join();
        }

        info!("file monitor stopped");
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_watch_thread(&self, rx: Receiver<notify::Result<notify::Event>>) -> JoinHandle<()> {
        let running = self.running.clone();
        let real_time = self.real_time.clone();
        let queue = self.queue.clone();
        let counters = self.counters.clone();

        thread::spawn(move || {
            debug!("watch thread started");
            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(WATCH_POLL_TIMEOUT) {
                    Ok(Ok(event)) => {
                        handle_fs_event(&event, &real_time, &queue, &counters);
                    }
                    Ok(Err(err)) => {
                        warn!(%err, "watcher reported an error");
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("watch thread stopped");
        })
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let queue = self.queue.clone();
        let callback_slot = self.threat_callback.clone();
        let in_flight = self.in_flight.clone();
        let debounce = Duration::from_millis(self.config.debounce_ms);
        let auto_quarantine_severity = self.config.auto_quarantine_severity;

        thread::spawn(move || {
            debug!(worker_id, "scan worker started");
            while let Some(request) = queue.pop_blocking() {
                let claimed = in_flight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(request.path.clone());
                if !claimed {
                    continue;
                }
                let _guard = InFlightGuard {
                    set: &in_flight,
                    path: &request.path,
                };

                // Let whoever is writing the file finish.
                thread::sleep(debounce);
                if !request.path.exists() {
                    continue;
                }

                if let Verdict::Threat(info) = engine.scan_file(&request.path) {
                    handle_threat(&engine, &callback_slot, auto_quarantine_severity, &info);
                    continue;
                }

                // The container itself came back clean; check the
                // members of ZIP-layout archives.
                if is_zip_container(&request.path) {
                    match engine.scan_archive(&request.path) {
                        Ok(report) => {
                            for threat in report.all_threats() {
                                handle_archive_threat(
                                    &engine,
                                    &callback_slot,
                                    auto_quarantine_severity,
                                    &request.path,
                                    threat,
                                );
                            }
                        }
                        Err(err) => {
                            debug!(path = %request.path.display(), %err, "archive not scannable");
                        }
                    }
                }
            }
            debug!(worker_id, "scan worker stopped");
        })
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Releases a worker's claim on a path when its scan ends, however it
/// ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: &'a PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(self.path);
    }
}

fn handle_fs_event(
    event: &notify::Event,
    real_time: &AtomicBool,
    queue: &ScanQueue,
    counters: &MonitorCounters,
) {
    if !event_is_create_or_modify(&event.kind) {
        return;
    }

    for path in &event.paths {
        counters.events_seen.fetch_add(1, Ordering::Relaxed);
        if !real_time.load(Ordering::SeqCst) {
            continue;
        }
        if path.is_dir() {
            continue;
        }
        if should_skip_event(path) {
            counters.events_filtered.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if queue.push(path.clone(), scan_priority(path)) {
            counters.events_enqueued.fetch_add(1, Ordering::Relaxed);
            debug!(path = %path.display(), "queued for real-time scan");
        }
    }
}

/// Create and modify events reach the queue; a rename target counts as
/// a create.
fn event_is_create_or_modify(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(modify) => matches!(
            modify,
            ModifyKind::Any | ModifyKind::Data(_) | ModifyKind::Name(RenameMode::To)
        ),
        _ => false,
    }
}

fn handle_threat(
    engine: &ThreatEngine,
    callback_slot: &Mutex<Option<ThreatCallback>>,
    auto_quarantine_severity: u8,
    info: &ThreatInfo,
) {
    error!(
        path = %info.file_path.display(),
        threat = %info.threat_name,
        severity = info.severity,
        "real-time threat detected"
    );

    if info.severity >= auto_quarantine_severity {
        match engine.quarantine(&info.file_path, &info.threat_name) {
            Ok(id) => info!(%id, path = %info.file_path.display(), "threat auto-quarantined"),
            Err(err) => error!(%err, path = %info.file_path.display(), "auto-quarantine failed"),
        }
    }

    invoke_callback(callback_slot, info);
}

/// A threat inside an archive member: the container is what gets
/// vaulted.
fn handle_archive_threat(
    engine: &ThreatEngine,
    callback_slot: &Mutex<Option<ThreatCallback>>,
    auto_quarantine_severity: u8,
    archive_path: &Path,
    info: &ThreatInfo,
) {
    error!(
        member = %info.file_path.display(),
        threat = %info.threat_name,
        severity = info.severity,
        "threat detected inside archive"
    );

    if info.severity >= auto_quarantine_severity && archive_path.exists() {
        match engine.quarantine(archive_path, &info.threat_name) {
            Ok(id) => info!(%id, path = %archive_path.display(), "archive auto-quarantined"),
            Err(err) => error!(%err, path = %archive_path.display(), "archive quarantine failed"),
        }
    }

    invoke_callback(callback_slot, info);
}

fn invoke_callback(callback_slot: &Mutex<Option<ThreatCallback>>, info: &ThreatInfo) {
    let callback = callback_slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    // Slot lock released before user code runs.
    if let Some(callback) = callback {
        callback(info);
    }
}
