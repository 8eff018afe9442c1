//! Core of the vigil endpoint anti-malware engine.
//!
//! Four subsystems cooperate here:
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │   ScanOrchestrator       │
//!                 │   on-demand traversal    │
//!                 └──────────┬───────────────┘
//!                            │ scan(path)
//! ┌──────────────────┐       ▼
//! │ FileMonitor      │──► ┌──────────────────────┐    ┌──────────────────────┐
//! │ directory watch  │    │   ThreatEngine       │───►│  QuarantineStore     │
//! │ event filter     │──► │ signatures+heuristics│    │  atomic move + index │
//! │ priority queue   │    │ (read-mostly shared) │    │  restore / delete    │
//! └──────────────────┘    └──────────────────────┘    └──────────────────────┘
//! ```
//!
//! The monitor and orchestrator are peers, each holding an
//! `Arc<ThreatEngine>`; the engine owns the quarantine vault. Service
//! lifecycle, IPC, scheduling, and cloud transport live outside this
//! crate; see [`cloud::CloudIntelligence`] for the one inbound hook.

pub mod archive;
pub mod cloud;
pub mod config;
pub mod engine;
pub mod monitor;
pub mod quarantine;
pub mod scanner;

pub use archive::{ArchiveEntry, ArchiveEntryReport, ArchiveScanReport};
pub use cloud::{CloudIntelligence, CloudVerdict};
pub use config::{EngineConfig, MonitorConfig, ScanOptions};
pub use engine::ThreatEngine;
pub use monitor::{FileMonitor, ThreatCallback};
pub use quarantine::{QuarantineEntry, QuarantineStore};
pub use scanner::{
    HostPathPolicy, PathPolicy, ProgressCallback, ScanOrchestrator, ScanReport, StaticPathPolicy,
};

// Re-export the shared model so embedders depend on one crate.
pub use vigil_core::{
    EngineError, ErrorKind, Result, ScanKind, ScanOutcome, ScanStatistics, Signature,
    SignatureDatabase, SignatureOffset, ThreatInfo, Verdict,
};
