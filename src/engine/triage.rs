//! Built-in triage backend.
//!
//! A lightweight headless engine that stands behind [`EngineBackend`] when
//! no external analysis library is wired in: it detects the container
//! format by magic, scans for printable strings during auto-analysis, and
//! persists its findings to a JSON sidecar database next to the input. The
//! sidecar is the on-disk state that `unload` must not lose.

use crate::engine::{
    AnalysisMonitor, BinaryFormat, EngineBackend, EngineError, EngineHandle,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum run of printable ASCII treated as a string during analysis.
const MIN_STRING_LEN: usize = 4;

/// Sidecar database written on unload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageDatabase {
    pub input_path: String,
    pub format: BinaryFormat,
    pub size_bytes: u64,
    pub string_count: Option<usize>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

struct OpenSlot {
    handle: EngineHandle,
    path: PathBuf,
    format: BinaryFormat,
    data: Arc<Vec<u8>>,
    analysis: Option<(JoinHandle<usize>, AnalysisMonitor)>,
    /// Carried over from a previous unload of the same input, replaced when
    /// a fresh analysis pass completes.
    prior_string_count: Option<usize>,
    prior_analyzed_at: Option<DateTime<Utc>>,
}

/// Single-slot triage engine.
#[derive(Default)]
pub struct TriageEngine {
    next_handle: u64,
    slot: Option<OpenSlot>,
}

impl TriageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the sidecar database for an input binary.
    pub fn database_path(input: &Path) -> PathBuf {
        let mut name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".binlab.json");
        input.with_file_name(name)
    }
}

impl EngineBackend for TriageEngine {
    fn load(&mut self, path: &Path) -> Result<EngineHandle, EngineError> {
        if let Some(slot) = &self.slot {
            return Err(EngineError::SlotOccupied(slot.handle));
        }

        let data = std::fs::read(path).map_err(|e| EngineError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let format = detect_format(&data);

        // An existing sidecar means this input was analyzed in a previous
        // activation; its results survive a load/unload cycle that skips
        // re-analysis.
        let (prior_string_count, prior_analyzed_at) =
            match std::fs::read(Self::database_path(path)) {
                Ok(raw) => match serde_json::from_slice::<TriageDatabase>(&raw) {
                    Ok(db) => {
                        debug!(path = %path.display(), "Existing triage database found");
                        (db.string_count, db.analyzed_at)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Ignoring corrupt triage database");
                        (None, None)
                    }
                },
                Err(_) => (None, None),
            };

        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        info!(path = %path.display(), %format, size = data.len(), "Triage load complete");

        self.slot = Some(OpenSlot {
            handle,
            path: path.to_path_buf(),
            format,
            data: Arc::new(data),
            analysis: None,
            prior_string_count,
            prior_analyzed_at,
        });
        Ok(handle)
    }

    fn start_auto_analysis(
        &mut self,
        handle: EngineHandle,
    ) -> Result<AnalysisMonitor, EngineError> {
        let slot = match &mut self.slot {
            Some(slot) if slot.handle == handle => slot,
            _ => return Err(EngineError::UnknownHandle(handle)),
        };

        let monitor = AnalysisMonitor::started();
        let worker_monitor = monitor.clone();
        let data = Arc::clone(&slot.data);
        let join = std::thread::spawn(move || {
            let count = count_strings(&data, MIN_STRING_LEN);
            worker_monitor.finish();
            count
        });
        slot.analysis = Some((join, monitor.clone()));
        Ok(monitor)
    }

    fn unload(&mut self, handle: EngineHandle) -> Result<(), EngineError> {
        let slot = match self.slot.take() {
            Some(slot) if slot.handle == handle => slot,
            other => {
                self.slot = other;
                return Err(EngineError::UnknownHandle(handle));
            }
        };
        let OpenSlot {
            handle,
            path,
            format,
            data,
            analysis,
            prior_string_count,
            prior_analyzed_at,
        } = slot;

        // Complete any in-flight analysis before persisting; the sidecar
        // must reflect the final state so a later close of this session
        // needs no further engine work.
        let (string_count, analyzed_at) = match analysis {
            Some((join, _monitor)) => match join.join() {
                Ok(count) => (Some(count), Some(Utc::now())),
                Err(_) => {
                    // Put the slot back so the caller can retry the unload.
                    self.slot = Some(OpenSlot {
                        handle,
                        path,
                        format,
                        data,
                        analysis: None,
                        prior_string_count,
                        prior_analyzed_at,
                    });
                    return Err(EngineError::AnalysisFailed(format!(
                        "analysis thread panicked for {handle}"
                    )));
                }
            },
            None => (prior_string_count, prior_analyzed_at),
        };

        let db = TriageDatabase {
            input_path: path.display().to_string(),
            format,
            size_bytes: data.len() as u64,
            string_count,
            analyzed_at,
        };
        let db_path = Self::database_path(&path);
        let serialized = serde_json::to_vec_pretty(&db)
            .map_err(|e| EngineError::PersistFailed(e.to_string()))?;
        std::fs::write(&db_path, serialized).map_err(|e| {
            EngineError::PersistFailed(format!("{}: {}", db_path.display(), e))
        })?;
        debug!(path = %db_path.display(), "Triage database persisted");
        Ok(())
    }
}

fn detect_format(data: &[u8]) -> BinaryFormat {
    match data {
        [0x7f, b'E', b'L', b'F', ..] => BinaryFormat::Elf,
        [b'M', b'Z', ..] => BinaryFormat::Pe,
        [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
        | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
        | [0xca, 0xfe, 0xba, 0xbe, ..] => BinaryFormat::MachO,
        _ => BinaryFormat::Raw,
    }
}

fn count_strings(data: &[u8], min_len: usize) -> usize {
    let mut count = 0;
    let mut run = 0;
    for &byte in data {
        if byte.is_ascii_graphic() || byte == b' ' || byte == b'\t' {
            run += 1;
        } else {
            if run >= min_len {
                count += 1;
            }
            run = 0;
        }
    }
    if run >= min_len {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_binary(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).expect("create input");
        f.write_all(contents).expect("write input");
        path
    }

    #[test]
    fn detects_formats_by_magic() {
        assert_eq!(detect_format(b"\x7fELF\x02\x01\x01"), BinaryFormat::Elf);
        assert_eq!(detect_format(b"MZ\x90\x00"), BinaryFormat::Pe);
        assert_eq!(
            detect_format(&[0xcf, 0xfa, 0xed, 0xfe, 0x07, 0x00]),
            BinaryFormat::MachO
        );
        assert_eq!(detect_format(b"\x00\x01\x02\x03"), BinaryFormat::Raw);
    }

    #[test]
    fn counts_printable_runs() {
        assert_eq!(count_strings(b"\x00hello\x00hi\x00world!\x00", 4), 2);
        assert_eq!(count_strings(b"trailing string", 4), 1);
        assert_eq!(count_strings(b"\x01\x02\x03", 4), 0);
    }

    #[test]
    fn load_rejects_second_database() {
        let dir = TempDir::new().expect("tempdir");
        let a = write_binary(&dir, "a.bin", b"\x7fELF\x02");
        let b = write_binary(&dir, "b.bin", b"MZ\x90");

        let mut engine = TriageEngine::new();
        let handle = engine.load(&a).expect("first load");
        let err = engine.load(&b).expect_err("slot must be occupied");
        assert!(matches!(err, EngineError::SlotOccupied(h) if h == handle));
    }

    #[test]
    fn unload_persists_sidecar_database() {
        let dir = TempDir::new().expect("tempdir");
        let input = write_binary(&dir, "sample.elf", b"\x7fELF\x02\x00magic words here\x00");

        let mut engine = TriageEngine::new();
        let handle = engine.load(&input).expect("load");
        let monitor = engine.start_auto_analysis(handle).expect("analysis");
        engine.unload(handle).expect("unload");
        assert!(!monitor.is_running());

        let raw = std::fs::read(TriageEngine::database_path(&input)).expect("sidecar exists");
        let db: TriageDatabase = serde_json::from_slice(&raw).expect("valid sidecar");
        assert_eq!(db.format, BinaryFormat::Elf);
        assert_eq!(db.string_count, Some(1));
        assert!(db.analyzed_at.is_some());
    }

    #[test]
    fn reload_keeps_prior_analysis_results() {
        let dir = TempDir::new().expect("tempdir");
        let input = write_binary(&dir, "sample.bin", b"some strings live here\x00");

        let mut engine = TriageEngine::new();
        let handle = engine.load(&input).expect("load");
        engine.start_auto_analysis(handle).expect("analysis");
        engine.unload(handle).expect("unload");

        // Second activation without auto-analysis must not lose the counts.
        let handle = engine.load(&input).expect("reload");
        engine.unload(handle).expect("unload again");

        let raw = std::fs::read(TriageEngine::database_path(&input)).expect("sidecar exists");
        let db: TriageDatabase = serde_json::from_slice(&raw).expect("valid sidecar");
        assert_eq!(db.string_count, Some(1));
    }

    #[test]
    fn unload_unknown_handle_fails() {
        let mut engine = TriageEngine::new();
        let err = engine.unload(EngineHandle(42)).expect_err("nothing loaded");
        assert!(matches!(err, EngineError::UnknownHandle(_)));
    }
}
