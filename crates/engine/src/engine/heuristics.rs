//! Heuristic rules evaluated when the signature pass finds nothing.
//!
//! Rules run in declared order; the first hit wins. Matching operates on
//! the raw byte stream with ASCII case folding only.

use std::path::Path;
use vigil_core::ext::extension_lower;

/// Extensions the tiny-executable rule treats as directly runnable.
const TINY_EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "dll", "scr", "com"];

const TINY_EXECUTABLE_MAX_SIZE: usize = 1024;

/// Byte substrings typical of commodity malware and ransom notes.
const SUSPICIOUS_STRINGS: &[&[u8]] = &[
    b"cryptolocker",
    b"ransomware",
    b"bitcoin",
    b"your files have been encrypted",
    b"pay the ransom",
    b"keylogger",
    b"password stealer",
    b"backdoor",
    b"trojan",
];

/// A heuristic verdict before it is wrapped into `ThreatInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicMatch {
    pub name: &'static str,
    pub severity: u8,
}

#[derive(Debug, Clone)]
pub struct Heuristics {
    entropy_threshold: f64,
}

impl Heuristics {
    pub fn new(entropy_threshold: f64) -> Self {
        Heuristics { entropy_threshold }
    }

    /// Evaluate all rules against a buffer; `path_hint` supplies the
    /// extension for the tiny-executable rule.
    pub fn evaluate(&self, data: &[u8], path_hint: Option<&Path>) -> Option<HeuristicMatch> {
        if data.is_empty() {
            return None;
        }

        let is_executable = path_hint
            .and_then(extension_lower)
            .map(|ext| TINY_EXECUTABLE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);

        if is_executable && data.len() < TINY_EXECUTABLE_MAX_SIZE {
            return Some(HeuristicMatch {
                name: "Heuristic.Suspicious.TinyExecutable",
                severity: 6,
            });
        }

        if shannon_entropy(data) > self.entropy_threshold {
            return Some(HeuristicMatch {
                name: "Heuristic.Suspicious.HighEntropy",
                severity: 7,
            });
        }

        if contains_suspicious_string(data) {
            return Some(HeuristicMatch {
                name: "Heuristic.Suspicious.Strings",
                severity: 5,
            });
        }

        None
    }
}

/// Shannon entropy over byte frequency, in bits per byte (0..=8).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in counts.iter() {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

fn contains_suspicious_string(data: &[u8]) -> bool {
    SUSPICIOUS_STRINGS.iter().any(|needle| {
        data.len() >= needle.len()
            && data
                .windows(needle.len())
                .any(|w| w.eq_ignore_ascii_case(needle))
    })
}
