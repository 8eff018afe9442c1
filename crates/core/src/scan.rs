//! On-demand scan API types: kinds, outcomes, statistics.

use serde::{Deserialize, Serialize};

/// What an on-demand scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// A single file.
    File,
    /// A directory tree.
    Folder,
    /// A whole volume root.
    Drive,
    /// The curated system-path list.
    System,
    /// Hot user directories plus program and temp directories.
    Quick,
    /// Every fixed and removable volume.
    Full,
    /// Caller-supplied path list.
    Custom,
}

/// Terminal result of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    /// I/O error on a target; remaining targets were still attempted.
    Failed,
    /// The cancel flag stopped the traversal at a file boundary.
    Cancelled,
    /// A root target could not be opened at all.
    AccessDenied,
}

impl ScanOutcome {
    fn rank(self) -> u8 {
        match self {
            ScanOutcome::Success => 0,
            ScanOutcome::Failed => 1,
            ScanOutcome::AccessDenied => 2,
            ScanOutcome::Cancelled => 3,
        }
    }

    /// The worse of two outcomes; per-target failures combine into the
    /// final result without aborting the run.
    pub fn worst(self, other: ScanOutcome) -> ScanOutcome {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Counters for one scan run. Reset at scan start, final at completion.
///
/// `scanned_files + skipped_files <= total_files` holds while the scan
/// runs; the two sides are equal once it finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub total_files: u64,
    pub scanned_files: u64,
    pub skipped_files: u64,
    pub threats_found: u64,
    pub total_bytes: u64,
    pub scanned_bytes: u64,
    pub progress_percent: u32,
    /// Unix epoch milliseconds; `None` until the scan starts/ends.
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

impl ScanStatistics {
    /// Recompute `progress_percent`, clamped to 0..=100. With an unknown
    /// total the percent stays at 0 until completion.
    pub fn update_progress(&mut self) {
        if self.total_files > 0 {
            self.progress_percent = ((self.scanned_files * 100) / self.total_files).min(100) as u32;
        }
    }
}
