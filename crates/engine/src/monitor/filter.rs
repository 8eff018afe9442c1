//! Pre-queue event filtering for the real-time monitor.
//!
//! Events under well-known churn directories (temp trees, component
//! stores) and events for low-signal extensions never reach the queue;
//! they are counted and dropped.

use std::path::Path;
use vigil_core::ext::is_monitor_skip_extension;

/// Directory names that disqualify a path anywhere they appear.
const SKIP_ANYWHERE: &[&str] = &["temp", "tmp", "system volume information"];

/// Directory names that disqualify a path only directly under a
/// `windows` component.
const SKIP_UNDER_WINDOWS: &[&str] = &["winsxs", "servicing"];

/// Whether the monitor should drop an event for `path` before it is
/// queued. Matches are case-insensitive on whole directory names;
/// events can carry either separator style, so both are recognized.
pub(crate) fn should_skip_event(path: &Path) -> bool {
    if path_in_skip_directory(path) {
        return true;
    }
    is_monitor_skip_extension(path)
}

fn path_in_skip_directory(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    let parts: Vec<&str> = lower.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return false;
    }

    let mut prev_was_windows = false;
    // The final segment is the file name, not a directory.
    for &part in &parts[..parts.len() - 1] {
        if SKIP_ANYWHERE.contains(&part) {
            return true;
        }
        if prev_was_windows && SKIP_UNDER_WINDOWS.contains(&part) {
            return true;
        }
        prev_was_windows = part == "windows";
    }
    false
}
