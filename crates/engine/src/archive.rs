//! ZIP container enumeration and stored-entry scanning.
//!
//! The walker reads the central directory (EOCDR found by bounded
//! backward search) and extracts only method-0 (Stored) entries into a
//! per-archive temp directory, scanning and deleting each one.
//! Encrypted entries are never decrypted and compressed methods are not
//! inflated; both are reported per entry as not scanned so the parent
//! scan keeps its footing.

use crate::engine::ThreatEngine;
use crate::quarantine::sanitize_file_name;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vigil_core::ext::is_zip_container;
use vigil_core::{EngineError, Result, ThreatInfo};

const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const EOCDR_SIG: u32 = 0x0605_4b50;
const EOCDR_LEN: usize = 22;
const CENTRAL_DIR_HEADER_LEN: usize = 46;
const LOCAL_FILE_HEADER_LEN: usize = 30;
/// EOCDR comment is at most 64 KiB, bounding the backward search.
const EOCDR_SEARCH_MAX: u64 = 64 * 1024 + EOCDR_LEN as u64;

const METHOD_STORED: u16 = 0;
const FLAG_ENCRYPTED: u16 = 0x1;

pub const DEFAULT_MAX_NESTING: u32 = 5;
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 100 * 1024 * 1024;

/// One central-directory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub method: u16,
    pub encrypted: bool,
    pub is_dir: bool,
    pub local_header_offset: u64,
}

/// Per-entry scan disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntryReport {
    pub name: String,
    pub size: u64,
    pub scanned: bool,
    /// Why the entry was not scanned (encrypted, unsupported method,
    /// budget exhausted).
    pub skip_reason: Option<String>,
    pub threat: Option<ThreatInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveScanReport {
    pub archive_path: PathBuf,
    pub nesting_level: u32,
    pub entries: Vec<ArchiveEntryReport>,
    pub files_scanned: u64,
    pub threats_found: u64,
    pub extracted_bytes: u64,
    pub nested: Vec<ArchiveScanReport>,
}

impl ArchiveScanReport {
    fn new(archive_path: &Path, nesting_level: u32) -> Self {
        ArchiveScanReport {
            archive_path: archive_path.to_path_buf(),
            nesting_level,
            entries: Vec::new(),
            files_scanned: 0,
            threats_found: 0,
            extracted_bytes: 0,
            nested: Vec::new(),
        }
    }

    /// Threats from this archive and every nested one.
    pub fn all_threats(&self) -> Vec<&ThreatInfo> {
        let mut out: Vec<&ThreatInfo> = self
            .entries
            .iter()
            .filter_map(|e| e.threat.as_ref())
            .collect();
        for nested in &self.nested {
            out.extend(nested.all_threats());
        }
        out
    }
}

pub(crate) struct ArchiveScanner<'a> {
    engine: &'a ThreatEngine,
    max_nesting: u32,
    max_extracted_bytes: u64,
}

impl<'a> ArchiveScanner<'a> {
    pub fn new(engine: &'a ThreatEngine) -> Self {
        ArchiveScanner {
            engine,
            max_nesting: DEFAULT_MAX_NESTING,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }

    pub fn scan(&self, path: &Path) -> Result<ArchiveScanReport> {
        let mut budget = self.max_extracted_bytes;
        self.scan_at_level(path, 0, &mut budget)
    }

    fn scan_at_level(
        &self,
        path: &Path,
        nesting: u32,
        budget: &mut u64,
    ) -> Result<ArchiveScanReport> {
        let entries = list_entries(path)?;
        let mut report = ArchiveScanReport::new(path, nesting);
        let extract_dir = tempfile::tempdir()?;

        for entry in entries {
            if entry.is_dir {
                continue;
            }

            if entry.encrypted {
                report.entries.push(skipped(&entry, "encrypted entry"));
                continue;
            }
            if entry.method != METHOD_STORED {
                report.entries.push(skipped(
                    &entry,
                    format!("unsupported compression method {}", entry.method),
                ));
                continue;
            }
            // A single oversized member cannot eat the whole budget.
            if entry.uncompressed_size > self.max_extracted_bytes / 10 {
                report.entries.push(skipped(&entry, "entry too large to extract"));
                continue;
            }
            if entry.uncompressed_size > *budget {
                warn!(
                    archive = %path.display(),
                    entry = %entry.name,
                    "extraction budget exhausted"
                );
                report
                    .entries
                    .push(skipped(&entry, "extraction budget exhausted"));
                continue;
            }

            let dest = extract_dir.path().join(sanitize_file_name(&entry.name));
            if let Err(err) = extract_stored(path, &entry, &dest) {
                debug!(entry = %entry.name, %err, "extraction failed");
                report
                    .entries
                    .push(skipped(&entry, format!("extraction failed: {err}")));
                continue;
            }
            *budget -= entry.uncompressed_size;
            report.extracted_bytes += entry.uncompressed_size;
            report.files_scanned += 1;

            let verdict = self.engine.scan_file(&dest);
            let threat = verdict.into_threat().map(|mut info| {
                // Point at the member, not the transient temp file.
                info.file_path = PathBuf::from(format!("{}!{}", path.display(), entry.name));
                info
            });
            if threat.is_some() {
                report.threats_found += 1;
            }
            report.entries.push(ArchiveEntryReport {
                name: entry.name.clone(),
                size: entry.uncompressed_size,
                scanned: true,
                skip_reason: None,
                threat,
            });

            // Recurse into nested containers before the temp file goes.
            if is_zip_container(Path::new(&entry.name)) {
                if nesting + 1 >= self.max_nesting {
                    warn!(
                        archive = %path.display(),
                        entry = %entry.name,
                        "nesting limit reached, not descending"
                    );
                } else {
                    match self.scan_at_level(&dest, nesting + 1, budget) {
                        Ok(mut nested) => {
                            nested.archive_path =
                                PathBuf::from(format!("{}!{}", path.display(), entry.name));
                            report.threats_found += nested.threats_found;
                            report.files_scanned += nested.files_scanned;
                            report.extracted_bytes += nested.extracted_bytes;
                            report.nested.push(nested);
                        }
                        Err(err) => {
                            debug!(entry = %entry.name, %err, "nested archive unreadable");
                        }
                    }
                }
            }

            let _ = fs::remove_file(&dest);
        }

        Ok(report)
    }
}

fn skipped(entry: &ArchiveEntry, reason: impl Into<String>) -> ArchiveEntryReport {
    ArchiveEntryReport {
        name: entry.name.clone(),
        size: entry.uncompressed_size,
        scanned: false,
        skip_reason: Some(reason.into()),
        threat: None,
    }
}

/// Whether any entry carries the encryption flag.
pub fn is_password_protected(path: &Path) -> Result<bool> {
    Ok(list_entries(path)?.iter().any(|e| e.encrypted))
}

/// Walk the central directory.
pub fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < EOCDR_LEN as u64 {
        return Err(EngineError::format("file too small to be a zip archive"));
    }

    // Find the EOCDR by scanning backward through the trailer region.
    let tail_len = len.min(EOCDR_SEARCH_MAX) as usize;
    file.seek(SeekFrom::End(-(tail_len as i64)))?;
    let mut tail = vec![0u8; tail_len];
    file.read_exact(&mut tail)?;

    let mut eocdr = None;
    for off in (0..=tail_len - EOCDR_LEN).rev() {
        if le32(&tail, off) == EOCDR_SIG {
            eocdr = Some(off);
            break;
        }
    }
    let eocdr = eocdr.ok_or_else(|| EngineError::format("end of central directory not found"))?;
    let total_entries = le16(&tail, eocdr + 10);
    let cd_offset = le32(&tail, eocdr + 16) as u64;

    file.seek(SeekFrom::Start(cd_offset))?;
    let mut entries = Vec::with_capacity(total_entries as usize);
    for i in 0..total_entries {
        let mut hdr = [0u8; CENTRAL_DIR_HEADER_LEN];
        file.read_exact(&mut hdr).map_err(truncated)?;
        if le32(&hdr, 0) != CENTRAL_DIR_SIG {
            return Err(EngineError::format(format!(
                "central directory entry {i} has a bad signature"
            )));
        }

        let flags = le16(&hdr, 8);
        let method = le16(&hdr, 10);
        let crc32 = le32(&hdr, 16);
        let compressed_size = le32(&hdr, 20) as u64;
        let uncompressed_size = le32(&hdr, 24) as u64;
        let name_len = le16(&hdr, 28) as usize;
        let extra_len = le16(&hdr, 30) as usize;
        let comment_len = le16(&hdr, 32) as usize;
        let local_header_offset = le32(&hdr, 42) as u64;

        let mut name_bytes = vec![0u8; name_len];
        file.read_exact(&mut name_bytes).map_err(truncated)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        file.seek(SeekFrom::Current((extra_len + comment_len) as i64))?;

        let is_dir = name.ends_with('/');
        entries.push(ArchiveEntry {
            name,
            compressed_size,
            uncompressed_size,
            crc32,
            method,
            encrypted: flags & FLAG_ENCRYPTED != 0,
            is_dir,
            local_header_offset,
        });
    }

    Ok(entries)
}

/// Copy a Stored entry's bytes out of the archive.
fn extract_stored(archive: &Path, entry: &ArchiveEntry, dest: &Path) -> Result<()> {
    let mut file = File::open(archive)?;
    file.seek(SeekFrom::Start(entry.local_header_offset))?;

    let mut hdr = [0u8; LOCAL_FILE_HEADER_LEN];
    file.read_exact(&mut hdr).map_err(truncated)?;
    if le32(&hdr, 0) != LOCAL_FILE_HEADER_SIG {
        return Err(EngineError::format(format!(
            "entry {:?} has a bad local header signature",
            entry.name
        )));
    }
    // The local header's own name/extra lengths may differ from the
    // central directory's copy; trust the local ones for the skip.
    let name_len = le16(&hdr, 26) as usize;
    let extra_len = le16(&hdr, 28) as usize;
    file.seek(SeekFrom::Current((name_len + extra_len) as i64))?;

    let mut data = vec![0u8; entry.compressed_size as usize];
    file.read_exact(&mut data).map_err(truncated)?;
    fs::write(dest, &data)?;
    Ok(())
}

fn truncated(err: std::io::Error) -> EngineError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        EngineError::format("truncated zip record")
    } else {
        EngineError::Io(err)
    }
}

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct ZipMember<'a> {
        pub name: &'a str,
        pub data: &'a [u8],
        pub method: u16,
        pub flags: u16,
    }

    /// Minimal well-formed single-disk zip writer for fixtures.
    pub(crate) fn build_zip(members: &[ZipMember<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for m in members {
            let lho = out.len() as u32;
            // Local file header.
            out.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&m.flags.to_le_bytes());
            out.extend_from_slice(&m.method.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // mod time
            out.extend_from_slice(&0u16.to_le_bytes()); // mod date
            out.extend_from_slice(&0u32.to_le_bytes()); // crc32
            out.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(m.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(m.name.as_bytes());
            out.extend_from_slice(m.data);

            // Central directory entry.
            central.extend_from_slice(&CENTRAL_DIR_SIG.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes()); // made by
            central.extend_from_slice(&20u16.to_le_bytes()); // needed
            central.extend_from_slice(&m.flags.to_le_bytes());
            central.extend_from_slice(&m.method.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(m.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attr
            central.extend_from_slice(&0u32.to_le_bytes()); // external attr
            central.extend_from_slice(&lho.to_le_bytes());
            central.extend_from_slice(m.name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        let cd_size = central.len() as u32;
        out.extend_from_slice(&central);

        // End of central directory record.
        out.extend_from_slice(&EOCDR_SIG.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        out
    }

    #[test]
    fn test_list_entries_reads_central_directory() {
        let zip = build_zip(&[
            ZipMember {
                name: "readme.txt",
                data: b"hello",
                method: METHOD_STORED,
                flags: 0,
            },
            ZipMember {
                name: "dir/",
                data: b"",
                method: METHOD_STORED,
                flags: 0,
            },
            ZipMember {
                name: "secret.bin",
                data: b"xxxx",
                method: METHOD_STORED,
                flags: FLAG_ENCRYPTED,
            },
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        fs::write(&path, &zip).unwrap();

        let entries = list_entries(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "readme.txt");
        assert_eq!(entries[0].uncompressed_size, 5);
        assert!(entries[1].is_dir);
        assert!(entries[2].encrypted);
    }

    #[test]
    fn test_password_protection_detection() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.zip");
        fs::write(
            &plain,
            build_zip(&[ZipMember {
                name: "a",
                data: b"a",
                method: METHOD_STORED,
                flags: 0,
            }]),
        )
        .unwrap();
        assert!(!is_password_protected(&plain).unwrap());

        let locked = dir.path().join("locked.zip");
        fs::write(
            &locked,
            build_zip(&[ZipMember {
                name: "a",
                data: b"a",
                method: METHOD_STORED,
                flags: FLAG_ENCRYPTED,
            }]),
        )
        .unwrap();
        assert!(is_password_protected(&locked).unwrap());
    }

    #[test]
    fn test_not_a_zip_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not.zip");
        fs::write(&path, vec![0u8; 4096]).unwrap();
        let err = list_entries(&path).unwrap_err();
        assert_eq!(err.kind(), vigil_core::ErrorKind::Format);
    }

    #[test]
    fn test_extract_stored_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        fs::write(
            &path,
            build_zip(&[ZipMember {
                name: "payload.bin",
                data: b"stored bytes",
                method: METHOD_STORED,
                flags: 0,
            }]),
        )
        .unwrap();

        let entries = list_entries(&path).unwrap();
        let dest = dir.path().join("out.bin");
        extract_stored(&path, &entries[0], &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"stored bytes");
    }

    mod with_engine {
        use super::*;
        use crate::config::EngineConfig;
        use vigil_core::{Signature, SignatureDatabase, SignatureOffset};

        const METHOD_DEFLATE: u16 = 8;

        fn engine_in(dir: &Path) -> ThreatEngine {
            let engine = ThreatEngine::new(EngineConfig::new(dir.join("data"))).unwrap();
            let db = SignatureDatabase::new(
                2,
                vec![Signature::new(
                    "Trojan.Agent.X",
                    b"EVILBYTES".to_vec(),
                    SignatureOffset::Anywhere,
                    9,
                )
                .unwrap()],
            );
            engine.update_database(db).unwrap();
            engine
        }

        #[test]
        fn test_threat_found_in_stored_entry() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            let zip = build_zip(&[
                ZipMember {
                    name: "clean.bin",
                    data: b"nothing here",
                    method: METHOD_STORED,
                    flags: 0,
                },
                ZipMember {
                    name: "bad.bin",
                    data: b"prefix EVILBYTES suffix",
                    method: METHOD_STORED,
                    flags: 0,
                },
            ]);
            let path = dir.path().join("bundle.zip");
            fs::write(&path, &zip).unwrap();

            let report = engine.scan_archive(&path).unwrap();
            assert_eq!(report.files_scanned, 2);
            assert_eq!(report.threats_found, 1);
            let threats = report.all_threats();
            assert_eq!(threats.len(), 1);
            assert_eq!(threats[0].threat_name, "Trojan.Agent.X");
            assert!(threats[0].file_path.to_string_lossy().ends_with("!bad.bin"));
        }

        #[test]
        fn test_deflate_entry_reported_not_scanned() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            let zip = build_zip(&[ZipMember {
                name: "packed.bin",
                data: b"\x01\x02\x03",
                method: METHOD_DEFLATE,
                flags: 0,
            }]);
            let path = dir.path().join("packed.zip");
            fs::write(&path, &zip).unwrap();

            let report = engine.scan_archive(&path).unwrap();
            assert_eq!(report.files_scanned, 0);
            assert_eq!(report.entries.len(), 1);
            assert!(!report.entries[0].scanned);
            assert!(report.entries[0]
                .skip_reason
                .as_deref()
                .unwrap()
                .contains("unsupported compression"));
        }

        #[test]
        fn test_encrypted_entry_never_extracted() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            let zip = build_zip(&[ZipMember {
                name: "locked.bin",
                data: b"EVILBYTES",
                method: METHOD_STORED,
                flags: FLAG_ENCRYPTED,
            }]);
            let path = dir.path().join("locked.zip");
            fs::write(&path, &zip).unwrap();

            let report = engine.scan_archive(&path).unwrap();
            assert_eq!(report.files_scanned, 0);
            assert_eq!(report.threats_found, 0);
            assert_eq!(report.entries[0].skip_reason.as_deref(), Some("encrypted entry"));
        }

        #[test]
        fn test_nested_archive_is_descended() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            let inner = build_zip(&[ZipMember {
                name: "bad.bin",
                data: b"EVILBYTES",
                method: METHOD_STORED,
                flags: 0,
            }]);
            let outer = build_zip(&[ZipMember {
                name: "inner.zip",
                data: &inner,
                method: METHOD_STORED,
                flags: 0,
            }]);
            let path = dir.path().join("outer.zip");
            fs::write(&path, &outer).unwrap();

            let report = engine.scan_archive(&path).unwrap();
            assert_eq!(report.nested.len(), 1);
            assert_eq!(report.nested[0].nesting_level, 1);
            assert_eq!(report.threats_found, 1);
            assert_eq!(report.all_threats().len(), 1);
        }

        #[test]
        fn test_nesting_limit_stops_descent() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            // zip-in-zip six levels deep; only max_nesting - 1 descents
            // happen.
            let mut blob = build_zip(&[ZipMember {
                name: "leaf.bin",
                data: b"EVILBYTES",
                method: METHOD_STORED,
                flags: 0,
            }]);
            for level in 0..6 {
                let name = format!("level{level}.zip");
                blob = build_zip(&[ZipMember {
                    name: &name,
                    data: &blob,
                    method: METHOD_STORED,
                    flags: 0,
                }]);
            }
            let path = dir.path().join("deep.zip");
            fs::write(&path, &blob).unwrap();

            let scanner = ArchiveScanner::new(&engine);
            let report = scanner.scan(&path).unwrap();

            let mut depth = 0;
            let mut cursor = &report;
            while let Some(next) = cursor.nested.first() {
                depth = next.nesting_level;
                cursor = next;
            }
            assert!(depth < DEFAULT_MAX_NESTING);
        }

        #[test]
        fn test_oversized_entry_not_extracted() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_in(dir.path());

            let big = vec![b'A'; 64];
            let zip = build_zip(&[ZipMember {
                name: "big.bin",
                data: &big,
                method: METHOD_STORED,
                flags: 0,
            }]);
            let path = dir.path().join("big.zip");
            fs::write(&path, &zip).unwrap();

            let scanner = ArchiveScanner {
                engine: &engine,
                max_nesting: DEFAULT_MAX_NESTING,
                // Cap of 100: per-entry ceiling is 10 bytes.
                max_extracted_bytes: 100,
            };
            let report = scanner.scan(&path).unwrap();
            assert_eq!(report.files_scanned, 0);
            assert_eq!(
                report.entries[0].skip_reason.as_deref(),
                Some("entry too large to extract")
            );
        }
    }
}
