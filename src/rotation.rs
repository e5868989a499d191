//! Day-partitioned rotation of the local buffer file.
//!
//! The engine owns the active day key and path. Each record either appends to
//! the active file or rotates: the superseded file is queued for hand-off and
//! the new day's file is opened before `ingest` returns, so the next record
//! always sees the rotated state. Callers must serialize `ingest` calls.
//!
//! A closed path is never written again. A late record for a day that was
//! already closed opens the next generation of that day (`_<day>_<n>`).

use crate::day_key::DayKey;
use crate::error::{ArchiveError, Result};
use crate::handoff::{HandoffQueue, HandoffSnapshot};
use crate::local_file;
use crate::partition::partition_path;
use crate::record::Record;
use crate::sink::ClosedFile;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePartition {
    pub day: DayKey,
    pub sequence: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First record of the engine's life (or after a finalize).
    Opened { path: PathBuf },
    Appended,
    Rotated { closed: ClosedFile, path: PathBuf },
}

#[derive(Debug, Default, Clone, Copy)]
struct EngineCounters {
    records_appended: u64,
    records_dropped: u64,
    append_failures: u64,
    files_opened: u64,
    rotations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub base_path: String,
    pub active_day: Option<DayKey>,
    pub active_path: Option<String>,
    pub active_bytes: Option<u64>,
    pub records_appended: u64,
    pub records_dropped: u64,
    pub append_failures: u64,
    pub files_opened: u64,
    pub rotations: u64,
    pub handoff: HandoffSnapshot,
}

pub struct RotationEngine {
    base_path: PathBuf,
    active: Option<ActivePartition>,
    /// Next generation to open per day, once a file of that day was closed.
    next_sequence: HashMap<DayKey, u32>,
    handoff: HandoffQueue,
    counters: EngineCounters,
}

impl RotationEngine {
    pub fn new(base_path: impl Into<PathBuf>, handoff: HandoffQueue) -> Self {
        Self {
            base_path: base_path.into(),
            active: None,
            next_sequence: HashMap::new(),
            handoff,
            counters: EngineCounters::default(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn active(&self) -> Option<&ActivePartition> {
        self.active.as_ref()
    }

    pub fn ingest(&mut self, record: &Record) -> Result<IngestOutcome> {
        let day = match record.day_key() {
            Ok(day) => day,
            Err(err) => {
                self.counters.records_dropped += 1;
                tracing::warn!(error=%err, "dropping record");
                return Err(err);
            }
        };

        let active_day = self.active.as_ref().map(|active| active.day);
        match active_day {
            Some(current) if current == day => {
                self.append(record)?;
                Ok(IngestOutcome::Appended)
            }
            Some(_) => {
                let closed = self.close_active();
                let path = self.open(day)?;
                self.counters.rotations += 1;
                self.append(record)?;
                match closed {
                    Some(closed) => Ok(IngestOutcome::Rotated { closed, path }),
                    None => Ok(IngestOutcome::Opened { path }),
                }
            }
            None => {
                let path = self.open(day)?;
                self.append(record)?;
                Ok(IngestOutcome::Opened { path })
            }
        }
    }

    /// Hands the active file off and returns to the unpartitioned state. Used
    /// by the shutdown hook; the next record opens a file again.
    pub fn finalize(&mut self) -> Option<ClosedFile> {
        self.close_active()
    }

    pub fn status(&self) -> EngineStatus {
        let active_bytes = self
            .active
            .as_ref()
            .and_then(|active| fs::metadata(&active.path).ok())
            .map(|meta| meta.len());
        EngineStatus {
            base_path: self.base_path.display().to_string(),
            active_day: self.active.as_ref().map(|active| active.day),
            active_path: self
                .active
                .as_ref()
                .map(|active| active.path.display().to_string()),
            active_bytes,
            records_appended: self.counters.records_appended,
            records_dropped: self.counters.records_dropped,
            append_failures: self.counters.append_failures,
            files_opened: self.counters.files_opened,
            rotations: self.counters.rotations,
            handoff: self.handoff.snapshot(),
        }
    }

    fn close_active(&mut self) -> Option<ClosedFile> {
        let active = self.active.take()?;
        let next = self.next_sequence.entry(active.day).or_insert(0);
        *next = (*next).max(active.sequence.saturating_add(1));
        let closed = ClosedFile {
            path: active.path,
            day: active.day,
            sequence: active.sequence,
        };
        tracing::info!(path=%closed.path.display(), day=%closed.day, sequence = closed.sequence, "closing day file");
        self.handoff.submit(closed.clone());
        Some(closed)
    }

    fn open(&mut self, day: DayKey) -> Result<PathBuf> {
        let sequence = self.next_sequence.get(&day).copied().unwrap_or(0);
        let path = partition_path(&self.base_path, &day, sequence);
        if path.exists() {
            // Left over from an earlier run; nothing of this process is
            // handing it off.
            tracing::warn!(path=%path.display(), "day file already on disk; appending to it");
        } else {
            local_file::create_empty(&path)?;
        }
        self.counters.files_opened += 1;
        tracing::info!(path=%path.display(), day=%day, sequence, "opened day file");
        self.active = Some(ActivePartition {
            day,
            sequence,
            path: path.clone(),
        });
        Ok(path)
    }

    fn append(&mut self, record: &Record) -> Result<()> {
        let Some(active) = self.active.as_ref() else {
            return Err(ArchiveError::invalid_record("no active day file"));
        };
        match local_file::append_line(&active.path, record.line()) {
            Ok(()) => {
                self.counters.records_appended += 1;
                tracing::trace!(path=%active.path.display(), "appended record");
                Ok(())
            }
            Err(err) => {
                self.counters.append_failures += 1;
                tracing::error!(error=%err, "failed to append record");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{handoff_channel, HandoffReceiver};
    use serde_json::json;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn record(time_published: &str) -> Record {
        Record::from_value(json!({ "deviceId": 1, "timePublished": time_published })).unwrap()
    }

    fn engine(dir: &TempDir) -> (RotationEngine, HandoffReceiver) {
        let (queue, receiver) = handoff_channel();
        (RotationEngine::new(dir.path().join("messages.log"), queue), receiver)
    }

    fn lines(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count()
    }

    #[tokio::test]
    async fn same_day_appends_and_new_day_rotates() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut receiver) = engine(&dir);
        let first = dir.path().join("messages_2023-11-28.log");
        let second = dir.path().join("messages_2023-11-29.log");

        assert_eq!(
            engine.ingest(&record("2023-11-28 12:00:00")).unwrap(),
            IngestOutcome::Opened { path: first.clone() }
        );
        assert_eq!(engine.ingest(&record("2023-11-28 13:00:00")).unwrap(), IngestOutcome::Appended);
        assert!(receiver.try_recv().is_none());

        let outcome = engine.ingest(&record("2023-11-29 00:00:01")).unwrap();
        let IngestOutcome::Rotated { closed, path } = outcome else {
            panic!("expected rotation, got {outcome:?}");
        };
        assert_eq!(closed.path, first);
        assert_eq!(closed.day.to_string(), "2023-11-28");
        assert_eq!(path, second);

        assert_eq!(receiver.recv().await.unwrap(), closed);
        assert_eq!(lines(&first), 2);
        assert_eq!(lines(&second), 1);
        assert_eq!(engine.active().unwrap().day.to_string(), "2023-11-29");
    }

    #[test]
    fn invalid_first_record_leaves_engine_unpartitioned() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _receiver) = engine(&dir);

        let err = engine.ingest(&record("not-a-date")).unwrap_err();

        assert!(matches!(err, ArchiveError::InvalidTimestamp { .. }));
        assert!(engine.active().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(engine.status().records_dropped, 1);

        assert!(matches!(
            engine.ingest(&record("2023-11-28 12:00:00")).unwrap(),
            IngestOutcome::Opened { .. }
        ));
    }

    #[test]
    fn invalid_record_mid_day_does_not_rotate() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _receiver) = engine(&dir);
        engine.ingest(&record("2023-11-28 12:00:00")).unwrap();

        assert!(engine.ingest(&record("garbage")).is_err());

        assert_eq!(engine.active().unwrap().day.to_string(), "2023-11-28");
        assert_eq!(engine.ingest(&record("2023-11-28 18:00:00")).unwrap(), IngestOutcome::Appended);
    }

    #[test]
    fn one_file_per_distinct_day() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _receiver) = engine(&dir);
        let stamps = [
            "2023-11-28 01:00:00",
            "2023-11-28T05:00:00Z",
            "2023-11-29 00:00:00",
            "2023-11-29 10:00:00",
            "2023-11-29 23:59:59",
            "2023-11-30T00:00:00+02:00",
        ];
        for stamp in stamps {
            engine.ingest(&record(stamp)).unwrap();
        }

        let status = engine.status();
        assert_eq!(status.files_opened, 3);
        assert_eq!(status.rotations, 2);
        assert_eq!(status.records_appended, 6);
        assert_eq!(status.handoff.submitted, 2);

        let files: HashSet<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(
            files,
            HashSet::from([
                "messages_2023-11-28.log".to_string(),
                "messages_2023-11-29.log".to_string(),
                "messages_2023-11-30.log".to_string(),
            ])
        );
        assert_eq!(lines(&dir.path().join("messages_2023-11-29.log")), 3);
    }

    #[test]
    fn existing_day_file_is_appended_not_truncated() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _receiver) = engine(&dir);
        let path = dir.path().join("messages_2023-11-28.log");
        fs::write(&path, "{\"from\":\"previous run\"}\n").unwrap();

        engine.ingest(&record("2023-11-28 12:00:00")).unwrap();

        assert_eq!(lines(&path), 2);
    }

    #[tokio::test]
    async fn late_record_opens_next_generation_of_closed_day() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut receiver) = engine(&dir);
        let first = dir.path().join("messages_2023-11-28.log");
        let late = dir.path().join("messages_2023-11-28_1.log");

        engine.ingest(&record("2023-11-28 12:00:00")).unwrap();
        engine.ingest(&record("2023-11-29 00:00:01")).unwrap();
        let outcome = engine.ingest(&record("2023-11-28 23:59:59")).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rotated { ref path, .. } if *path == late));
        engine.ingest(&record("2023-11-29 00:00:02")).unwrap();

        let closed: Vec<_> = std::iter::from_fn(|| receiver.try_recv()).collect();
        let names: Vec<_> = closed
            .iter()
            .map(|file| {
                let name = file.path.file_name().unwrap().to_string_lossy().into_owned();
                (name, file.sequence)
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("messages_2023-11-28.log".to_string(), 0),
                ("messages_2023-11-29.log".to_string(), 0),
                ("messages_2023-11-28_1.log".to_string(), 1),
            ]
        );
        assert_eq!(lines(&first), 1);
        assert_eq!(lines(&late), 1);
        let active = engine.active().unwrap();
        assert_eq!(active.path, dir.path().join("messages_2023-11-29_1.log"));
        assert_eq!(active.sequence, 1);
    }

    #[test]
    fn finalize_hands_off_and_resets() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _receiver) = engine(&dir);
        assert!(engine.finalize().is_none());

        engine.ingest(&record("2023-11-28 12:00:00")).unwrap();
        let closed = engine.finalize().unwrap();

        assert_eq!(closed.path, dir.path().join("messages_2023-11-28.log"));
        assert!(engine.active().is_none());
        assert_eq!(engine.status().handoff.submitted, 1);
    }

    #[test]
    fn append_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let (queue, _receiver) = handoff_channel();
        let mut engine = RotationEngine::new(dir.path().join("missing").join("messages.log"), queue);

        let err = engine.ingest(&record("2023-11-28 12:00:00")).unwrap_err();

        assert!(matches!(err, ArchiveError::FileSystem { .. }));
        assert!(engine.active().is_none());
    }
}
