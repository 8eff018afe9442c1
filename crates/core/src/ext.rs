//! Extension classification used by the monitor's filter and queue.
//!
//! All comparisons are case-insensitive and work on the extension
//! without its leading dot.

use std::path::Path;

/// Immediately-executable formats; highest real-time priority.
pub const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "dll", "scr", "com", "pif"];

/// Script formats; high real-time priority.
pub const SCRIPT_EXTENSIONS: &[&str] = &["bat", "cmd", "ps1", "vbs", "js"];

/// Office documents; macro carriers.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "xls", "xlsx", "ppt", "pptx"];

/// Archive containers as prioritized by the real-time queue.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar"];

/// ZIP-layout containers the archive enumerator understands.
pub const ZIP_CONTAINER_EXTENSIONS: &[&str] = &["zip", "jar", "war", "ear"];

/// Extensions the real-time monitor never enqueues.
pub const MONITOR_SKIP_EXTENSIONS: &[&str] = &[
    "log", "tmp", "temp", "swp", "bak", "txt", "ini", "xml", "json",
];

/// Lowercased extension of `path`, if any.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn ext_in(path: &Path, set: &[&str]) -> bool {
    match extension_lower(path) {
        Some(ext) => set.contains(&ext.as_str()),
        None => false,
    }
}

pub fn is_zip_container(path: &Path) -> bool {
    ext_in(path, ZIP_CONTAINER_EXTENSIONS)
}

pub fn is_monitor_skip_extension(path: &Path) -> bool {
    ext_in(path, MONITOR_SKIP_EXTENSIONS)
}

/// Real-time scan priority for a path: 10 for executables down to 1 for
/// everything unclassified.
pub fn scan_priority(path: &Path) -> u32 {
    if ext_in(path, EXECUTABLE_EXTENSIONS) {
        10
    } else if ext_in(path, SCRIPT_EXTENSIONS) {
        7
    } else if ext_in(path, DOCUMENT_EXTENSIONS) {
        5
    } else if ext_in(path, ARCHIVE_EXTENSIONS) {
        3
    } else {
        1
    }
}
