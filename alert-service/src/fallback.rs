//! Local fallback queue for alerts the object store would not take.
//!
//! One JSON object per line, appended and fsynced before the caller is told
//! the alert was queued. Sequence numbers increase for the life of the file;
//! on open the last one is recovered by scanning.
//!
//! Replay walks the queue in order and stops at the first entry the handler
//! cannot persist. What is left (including anything appended meanwhile) is
//! written to a temp file and renamed over the queue.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::FallbackError;
use crate::models::AlertRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub sequence: u64,
    pub queued_at: DateTime<Utc>,
    /// Last store error seen before the record was spilled.
    pub reason: String,
    pub record: AlertRecord,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

pub struct FallbackQueue {
    path: PathBuf,
    /// Next sequence to hand out; also serializes file writes.
    next_sequence: Mutex<u64>,
    /// At most one replay at a time.
    replaying: Mutex<()>,
}

impl FallbackQueue {
    /// Open (or create) the queue file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FallbackError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let raw = fs::read(&path).await?;
        if raw.last().is_some_and(|b| *b != b'\n') {
            // Terminate a torn line so the next append starts cleanly.
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }

        let last = read_entries(&path)
            .await?
            .last()
            .map(|e| e.sequence)
            .unwrap_or(0);
        info!(path = %path.display(), last_sequence = last, "fallback queue opened");

        Ok(Self {
            path,
            next_sequence: Mutex::new(last + 1),
            replaying: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append `record`; returns its sequence number.
    pub async fn append(&self, record: &AlertRecord, reason: &str) -> Result<u64, FallbackError> {
        let mut next = self.next_sequence.lock().await;
        let entry = FallbackEntry {
            sequence: *next,
            queued_at: Utc::now(),
            reason: reason.to_string(),
            record: record.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        *next += 1;
        Ok(entry.sequence)
    }

    pub async fn entries(&self) -> Result<Vec<FallbackEntry>, FallbackError> {
        let _guard = self.next_sequence.lock().await;
        read_entries(&self.path).await
    }

    pub async fn len(&self) -> Result<usize, FallbackError> {
        Ok(self.entries().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, FallbackError> {
        Ok(self.len().await? == 0)
    }

    /// Hand queued entries to `handler` oldest first. `handler` returns
    /// whether the entry was persisted; the first `false` ends the pass.
    pub async fn replay<F, Fut>(&self, mut handler: F) -> Result<ReplayReport, FallbackError>
    where
        F: FnMut(FallbackEntry) -> Fut,
        Fut: Future<Output = bool>,
    {
        let _replaying = self.replaying.lock().await;

        let pending = self.entries().await?;
        if pending.is_empty() {
            return Ok(ReplayReport::default());
        }

        let mut replayed = 0usize;
        let mut done_through = None;
        for entry in pending {
            let sequence = entry.sequence;
            if !handler(entry).await {
                break;
            }
            replayed += 1;
            done_through = Some(sequence);
        }

        let Some(done_through) = done_through else {
            let remaining = self.len().await?;
            return Ok(ReplayReport { replayed, remaining });
        };

        // Appends are blocked from here until the rewrite lands.
        let _guard = self.next_sequence.lock().await;
        let remaining: Vec<_> = read_entries(&self.path)
            .await?
            .into_iter()
            .filter(|e| e.sequence > done_through)
            .collect();
        rewrite(&self.path, &remaining).await?;

        info!(
            replayed,
            remaining = remaining.len(),
            "fallback queue replayed"
        );
        Ok(ReplayReport {
            replayed,
            remaining: remaining.len(),
        })
    }
}

async fn read_entries(path: &Path) -> Result<Vec<FallbackEntry>, FallbackError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for (lineno, line) in String::from_utf8_lossy(&raw).lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FallbackEntry>(line) {
            Ok(entry) => entries.push(entry),
            // A torn final line from a crash mid-append ends up here.
            Err(e) => error!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "skipping unreadable fallback entry"
            ),
        }
    }
    Ok(entries)
}

async fn rewrite(path: &Path, entries: &[FallbackEntry]) -> Result<(), FallbackError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&buf).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::energy::AlertPayload;

    fn record(building: &str, ts: i64) -> AlertRecord {
        AlertRecord::new(
            AlertPayload {
                building_id: building.into(),
                floor_id: "Floor-1".into(),
                wattage: 5000.0,
                timestamp: ts,
                message: "spike".into(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FallbackQueue::open(dir.path().join("queue.jsonl")).await.unwrap();

        assert_eq!(queue.append(&record("A", 1), "down").await.unwrap(), 1);
        assert_eq!(queue.append(&record("B", 2), "down").await.unwrap(), 2);

        let entries = queue.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record.building_id, "A");
        assert_eq!(entries[1].reason, "down");
    }

    #[tokio::test]
    async fn sequence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/queue.jsonl");
        {
            let queue = FallbackQueue::open(&path).await.unwrap();
            queue.append(&record("A", 1), "down").await.unwrap();
            queue.append(&record("A", 2), "down").await.unwrap();
        }
        let queue = FallbackQueue::open(&path).await.unwrap();
        assert_eq!(queue.append(&record("A", 3), "down").await.unwrap(), 3);
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn replay_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FallbackQueue::open(dir.path().join("queue.jsonl")).await.unwrap();
        for ts in 1..=3 {
            queue.append(&record("Library", ts), "down").await.unwrap();
        }

        let mut seen = Vec::new();
        let report = queue
            .replay(|entry| {
                seen.push(entry.record.timestamp);
                let ok = entry.record.timestamp != 2;
                async move { ok }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(report, ReplayReport { replayed: 1, remaining: 2 });
        let left: Vec<_> = queue
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.record.timestamp)
            .collect();
        assert_eq!(left, vec![2, 3]);
    }

    #[tokio::test]
    async fn full_replay_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FallbackQueue::open(dir.path().join("queue.jsonl")).await.unwrap();
        queue.append(&record("DormA", 1), "down").await.unwrap();

        let report = queue.replay(|_| async { true }).await.unwrap();
        assert_eq!(report, ReplayReport { replayed: 1, remaining: 0 });
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.append(&record("DormA", 2), "down").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let queue = FallbackQueue::open(&path).await.unwrap();
            queue.append(&record("Science", 1), "down").await.unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{\"sequence\":2,\"queued").await.unwrap();
        drop(file);

        let queue = FallbackQueue::open(&path).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.append(&record("Science", 3), "down").await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 2);
    }
}
