//! Platform path policy for the curated scan kinds.
//!
//! Which directories make up a "system" or "quick" scan, and what the
//! fixed drives are, is host policy rather than engine logic; the
//! orchestrator takes it through this seam so tests (and embedders with
//! their own ideas) can inject a list.

use std::env;
use std::path::PathBuf;

pub trait PathPolicy: Send + Sync {
    /// Curated OS-critical directories for a System scan.
    fn system_paths(&self) -> Vec<PathBuf>;
    /// Hot user directories plus program and temp directories for a
    /// Quick scan.
    fn quick_paths(&self) -> Vec<PathBuf>;
    /// Roots of every fixed or removable volume for a Full scan.
    fn fixed_drives(&self) -> Vec<PathBuf>;
}

/// Default policy reading the running host's conventions.
pub struct HostPathPolicy;

#[cfg(windows)]
impl PathPolicy for HostPathPolicy {
    fn system_paths(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("C:\\Windows\\System32"),
            PathBuf::from("C:\\Windows\\SysWOW64"),
            PathBuf::from("C:\\Program Files"),
            PathBuf::from("C:\\Program Files (x86)"),
        ]
    }

    fn quick_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.system_paths();
        if let Ok(profile) = env::var("USERPROFILE") {
            for sub in ["Desktop", "Downloads", "Documents", "AppData\\Local\\Temp"] {
                paths.push(PathBuf::from(&profile).join(sub));
            }
        }
        paths
    }

    fn fixed_drives(&self) -> Vec<PathBuf> {
        // Probe the classic drive letters; GetLogicalDrives lives behind
        // the service layer, existence is a good enough proxy here.
        (b'A'..=b'Z')
            .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
            .filter(|root| root.exists())
            .collect()
    }
}

#[cfg(not(windows))]
impl PathPolicy for HostPathPolicy {
    fn system_paths(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("/usr/bin"),
            PathBuf::from("/usr/sbin"),
            PathBuf::from("/usr/lib"),
            PathBuf::from("/etc"),
        ]
    }

    fn quick_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/tmp")];
        if let Ok(home) = env::var("HOME") {
            for sub in ["Desktop", "Downloads", "Documents"] {
                paths.push(PathBuf::from(&home).join(sub));
            }
        }
        paths
    }

    fn fixed_drives(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/")]
    }
}

/// Fixed path lists, for tests and embedders with static layouts.
pub struct StaticPathPolicy {
    pub system: Vec<PathBuf>,
    pub quick: Vec<PathBuf>,
    pub drives: Vec<PathBuf>,
}

impl PathPolicy for StaticPathPolicy {
    fn system_paths(&self) -> Vec<PathBuf> {
        self.system.clone()
    }

    fn quick_paths(&self) -> Vec<PathBuf> {
        self.quick.clone()
    }

    fn fixed_drives(&self) -> Vec<PathBuf> {
        self.drives.clone()
    }
}
