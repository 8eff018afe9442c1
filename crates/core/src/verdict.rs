//! Scan verdicts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A detected threat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatInfo {
    /// Path of the offending file; empty for pure buffer scans.
    pub file_path: PathBuf,
    /// Signature or heuristic rule name, e.g. "Trojan.Agent.X".
    pub threat_name: String,
    /// 1..=10; values >= 8 trigger auto-quarantine in the real-time path.
    pub severity: u8,
    pub file_size: u64,
}

/// Result of scanning a buffer or file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Verdict {
    Clean,
    Threat(ThreatInfo),
}

impl Verdict {
    pub fn is_threat(&self) -> bool {
        matches!(self, Verdict::Threat(_))
    }

    pub fn threat(&self) -> Option<&ThreatInfo> {
        match self {
            Verdict::Clean => None,
            Verdict::Threat(info) => Some(info),
        }
    }

    pub fn into_threat(self) -> Option<ThreatInfo> {
        match self {
            Verdict::Clean => None,
            Verdict::Threat(info) => Some(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_accessors() {
        assert!(!Verdict::Clean.is_threat());
        assert!(Verdict::Clean.threat().is_none());

        let v = Verdict::Threat(ThreatInfo {
            file_path: PathBuf::from("/tmp/evil.exe"),
            threat_name: "Trojan.Agent.X".to_string(),
            severity: 9,
            file_size: 200,
        });
        assert!(v.is_threat());
        assert_eq!(v.threat().unwrap().severity, 9);
    }
}
