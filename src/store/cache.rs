// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local activity and stream cache.
//!
//! Layout:
//!
//! ```text
//! <activities_file>              # append-only JSON Lines table
//! <streams_dir>/<id>/stream.json
//! <streams_dir>/<id>/unavailable.json   # Strava has no streams for <id>
//! ```
//!
//! Every `append_activities` batch is written as its activity rows followed
//! by a single commit row, then fsynced. Rows without a trailing commit row
//! are a torn write from a crash; they are dropped (and the file truncated)
//! the next time the cache is opened, so a batch is registered all or
//! nothing.

use crate::error::{AppError, Result};
use crate::models::{ActivitySummary, StreamRecord};
use crate::time_utils::format_utc_rfc3339;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const STREAM_FILE: &str = "stream.json";
const UNAVAILABLE_FILE: &str = "unavailable.json";

/// One line of the activity table.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "row", rename_all = "snake_case")]
enum Row {
    Activity(ActivitySummary),
    Commit { count: usize, committed_at: String },
}

/// Marker written when Strava reports an activity has no stream data.
#[derive(Debug, Serialize, Deserialize)]
struct UnavailableMarker {
    activity_id: u64,
    reason: String,
    recorded_at: String,
}

/// Activity table plus per-activity stream files.
pub struct ActivityCache {
    activities_file: PathBuf,
    streams_dir: PathBuf,
    /// Committed activities in append order
    activities: Vec<ActivitySummary>,
    known: HashSet<u64>,
}

impl ActivityCache {
    /// Open (or create) the cache, recovering from any torn append.
    pub fn open(activities_file: impl Into<PathBuf>, streams_dir: impl Into<PathBuf>) -> Result<Self> {
        let activities_file = activities_file.into();
        let streams_dir = streams_dir.into();

        if let Some(parent) = activities_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AppError::io("Failed to create", parent, e))?;
        }
        fs::create_dir_all(&streams_dir)
            .map_err(|e| AppError::io("Failed to create", &streams_dir, e))?;

        let (activities, committed_len, file_len) = read_table(&activities_file)?;
        if file_len > committed_len {
            tracing::warn!(
                path = %activities_file.display(),
                discarded_bytes = file_len - committed_len,
                "Discarding uncommitted rows from an interrupted append"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&activities_file)
                .map_err(|e| AppError::io("Failed to open", &activities_file, e))?;
            file.set_len(committed_len)
                .and_then(|_| file.sync_all())
                .map_err(|e| AppError::io("Failed to truncate", &activities_file, e))?;
        }

        let known = activities.iter().map(|a| a.id).collect();
        tracing::debug!(
            path = %activities_file.display(),
            count = activities.len(),
            "Activity cache opened"
        );

        Ok(Self {
            activities_file,
            streams_dir,
            activities,
            known,
        })
    }

    /// IDs of all persisted activity summaries.
    pub fn known_activity_ids(&self) -> HashSet<u64> {
        self.known.clone()
    }

    pub fn contains(&self, activity_id: u64) -> bool {
        self.known.contains(&activity_id)
    }

    /// Persisted activity summaries, in the order they were appended.
    pub fn activities(&self) -> &[ActivitySummary] {
        &self.activities
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Append new summaries as one all-or-nothing batch.
    ///
    /// Already-known IDs (and repeats within the batch) are skipped.
    /// Returns the number of rows actually written.
    pub fn append_activities(&mut self, batch: &[ActivitySummary]) -> Result<usize> {
        let mut batch_ids = HashSet::new();
        let fresh: Vec<&ActivitySummary> = batch
            .iter()
            .filter(|a| !self.known.contains(&a.id) && batch_ids.insert(a.id))
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::new();
        for activity in &fresh {
            encode_row(&mut buf, &Row::Activity((*activity).clone()))?;
        }
        encode_row(
            &mut buf,
            &Row::Commit {
                count: fresh.len(),
                committed_at: format_utc_rfc3339(chrono::Utc::now()),
            },
        )?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.activities_file)
            .map_err(|e| AppError::io("Failed to open", &self.activities_file, e))?;
        let len_before = file
            .metadata()
            .map_err(|e| AppError::io("Failed to stat", &self.activities_file, e))?
            .len();

        if let Err(e) = file.write_all(&buf).and_then(|_| file.sync_data()) {
            // Best effort: leave no uncommitted tail behind for the next open.
            let _ = file.set_len(len_before);
            return Err(AppError::io("Failed to append to", &self.activities_file, e));
        }

        for activity in fresh.iter() {
            self.known.insert(activity.id);
            self.activities.push((*activity).clone());
        }

        tracing::debug!(count = fresh.len(), "Appended activities to cache");
        Ok(fresh.len())
    }

    fn stream_dir(&self, activity_id: u64) -> PathBuf {
        self.streams_dir.join(activity_id.to_string())
    }

    pub fn stream_path(&self, activity_id: u64) -> PathBuf {
        self.stream_dir(activity_id).join(STREAM_FILE)
    }

    /// Whether a non-empty stream file exists (a single `stat`).
    pub fn has_stream(&self, activity_id: u64) -> bool {
        fs::metadata(self.stream_path(activity_id))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Persist one activity's streams, replacing any previous file.
    pub fn write_stream(&self, activity_id: u64, record: &StreamRecord) -> Result<()> {
        if record.activity_id() != activity_id {
            return Err(AppError::Persistence(format!(
                "Stream record for activity {} written under id {}",
                record.activity_id(),
                activity_id
            )));
        }

        let json = serde_json::to_vec(record)
            .map_err(|e| AppError::Persistence(format!("Failed to encode stream: {}", e)))?;
        super::write_atomic(&self.stream_path(activity_id), &json)
    }

    /// Read a stored stream back, `None` if it was never written.
    pub fn read_stream(&self, activity_id: u64) -> Result<Option<StreamRecord>> {
        let path = self.stream_path(activity_id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::io("Failed to read", &path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::Persistence(format!("Corrupt stream file {}: {}", path.display(), e)))
    }

    pub fn is_stream_unavailable(&self, activity_id: u64) -> bool {
        self.stream_dir(activity_id).join(UNAVAILABLE_FILE).is_file()
    }

    /// Remember that Strava has no stream data for this activity.
    pub fn mark_stream_unavailable(&self, activity_id: u64, reason: &str) -> Result<()> {
        let marker = UnavailableMarker {
            activity_id,
            reason: reason.to_string(),
            recorded_at: format_utc_rfc3339(chrono::Utc::now()),
        };
        let json = serde_json::to_vec(&marker)
            .map_err(|e| AppError::Persistence(format!("Failed to encode marker: {}", e)))?;
        super::write_atomic(&self.stream_dir(activity_id).join(UNAVAILABLE_FILE), &json)
    }

    /// Number of stored streams. Scans the stream directory; status use only.
    pub fn stream_count(&self) -> Result<usize> {
        self.count_entries_with(STREAM_FILE)
    }

    pub fn unavailable_count(&self) -> Result<usize> {
        self.count_entries_with(UNAVAILABLE_FILE)
    }

    fn count_entries_with(&self, file_name: &str) -> Result<usize> {
        let entries = fs::read_dir(&self.streams_dir)
            .map_err(|e| AppError::io("Failed to list", &self.streams_dir, e))?;
        Ok(entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(file_name).is_file())
            .count())
    }
}

fn encode_row(buf: &mut Vec<u8>, row: &Row) -> Result<()> {
    serde_json::to_writer(&mut *buf, row)
        .map_err(|e| AppError::Persistence(format!("Failed to encode row: {}", e)))?;
    buf.push(b'\n');
    Ok(())
}

/// Read the committed rows of the activity table.
///
/// Returns the committed activities, the byte length covered by the last
/// commit row, and the total file length.
fn read_table(path: &Path) -> Result<(Vec<ActivitySummary>, u64, u64)> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0, 0)),
        Err(e) => return Err(AppError::io("Failed to read", path, e)),
    };

    let mut committed = Vec::new();
    let mut pending = Vec::new();
    let mut seen = HashSet::new();
    let mut committed_len = 0usize;
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        // An unterminated final line is always part of a torn write.
        let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') else {
            break;
        };
        let end = offset + newline + 1;
        let line = &bytes[offset..end - 1];
        line_no += 1;

        match serde_json::from_slice::<Row>(line) {
            Ok(Row::Activity(activity)) => pending.push(activity),
            Ok(Row::Commit { count, .. }) => {
                if count != pending.len() {
                    return Err(AppError::Persistence(format!(
                        "Corrupt activity table {}: commit at line {} covers {} rows, found {}",
                        path.display(),
                        line_no,
                        count,
                        pending.len()
                    )));
                }
                committed.extend(pending.drain(..).filter(|a| seen.insert(a.id)));
                committed_len = end;
            }
            Err(e) => {
                // Garbage is only acceptable as the tail of a torn write.
                let rest = &bytes[end..];
                if rest.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(AppError::Persistence(format!(
                        "Corrupt activity table {} at line {}: {}",
                        path.display(),
                        line_no,
                        e
                    )));
                }
                break;
            }
        }
        offset = end;
    }

    Ok((committed, committed_len as u64, bytes.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamRecord;
    use serde_json::json;

    fn activity(id: u64) -> ActivitySummary {
        ActivitySummary {
            id,
            name: format!("Activity {}", id),
            activity_type: "Ride".to_string(),
            sport_type: Some("Ride".to_string()),
            distance: 1000.0 * id as f64,
            moving_time: 600,
            elapsed_time: 700,
            elevation_gain: 10.0,
            start_date: "2025-05-01T10:00:00Z".to_string(),
            is_trainer: false,
            manual: false,
        }
    }

    fn open(dir: &Path) -> ActivityCache {
        ActivityCache::open(dir.join("activities.jsonl"), dir.join("streams")).unwrap()
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        assert!(cache.known_activity_ids().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_append_is_idempotent_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path());

        assert_eq!(cache.append_activities(&[activity(1), activity(2)]).unwrap(), 2);
        assert_eq!(cache.append_activities(&[activity(2), activity(3), activity(3)]).unwrap(), 1);
        assert_eq!(cache.append_activities(&[activity(1)]).unwrap(), 0);

        let reopened = open(dir.path());
        assert_eq!(reopened.known_activity_ids(), HashSet::from([1, 2, 3]));
        let ids: Vec<u64> = reopened.activities().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_append_only_writes_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path());
        cache.append_activities(&[activity(1)]).unwrap();
        let before = fs::read(dir.path().join("activities.jsonl")).unwrap();

        cache.append_activities(&[activity(2)]).unwrap();
        let after = fs::read(dir.path().join("activities.jsonl")).unwrap();

        assert!(after.starts_with(&before), "existing rows must not be rewritten");
    }

    #[test]
    fn test_torn_append_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.jsonl");
        {
            let mut cache = open(dir.path());
            cache.append_activities(&[activity(5), activity(6)]).unwrap();
        }
        let committed = fs::read(&path).unwrap();

        // Simulate a crash mid-batch: two complete rows, half of a third, no commit.
        let mut torn = Vec::new();
        encode_row(&mut torn, &Row::Activity(activity(7))).unwrap();
        encode_row(&mut torn, &Row::Activity(activity(8))).unwrap();
        torn.extend_from_slice(br#"{"row":"activity","id":9,"na"#);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn).unwrap();
        drop(file);

        let cache = open(dir.path());
        assert_eq!(cache.known_activity_ids(), HashSet::from([5, 6]));
        assert_eq!(fs::read(&path).unwrap(), committed, "torn tail must be truncated");
    }

    #[test]
    fn test_uncommitted_complete_rows_are_not_known() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.jsonl");
        let mut rows = Vec::new();
        encode_row(&mut rows, &Row::Activity(activity(1))).unwrap();
        fs::write(&path, rows).unwrap();

        let mut cache = open(dir.path());
        assert!(cache.known_activity_ids().is_empty());

        // The recovered table accepts new batches normally.
        cache.append_activities(&[activity(2)]).unwrap();
        assert_eq!(open(dir.path()).known_activity_ids(), HashSet::from([2]));
    }

    #[test]
    fn test_garbage_before_committed_rows_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.jsonl");
        let mut rows = b"garbage\n".to_vec();
        encode_row(&mut rows, &Row::Activity(activity(1))).unwrap();
        encode_row(
            &mut rows,
            &Row::Commit {
                count: 1,
                committed_at: "2025-01-01T00:00:00Z".to_string(),
            },
        )
        .unwrap();
        fs::write(&path, rows).unwrap();

        let result = ActivityCache::open(path, dir.path().join("streams"));
        assert!(matches!(result, Err(AppError::Persistence(_))));
    }

    #[test]
    fn test_stream_write_read_and_has_stream() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let record = StreamRecord::from_raw(
            77,
            vec![
                ("time".to_string(), json!([0, 1])),
                ("heartrate".to_string(), json!([100, 101])),
            ],
        )
        .unwrap();

        assert!(!cache.has_stream(77));
        assert!(cache.read_stream(77).unwrap().is_none());

        cache.write_stream(77, &record).unwrap();
        assert!(cache.has_stream(77));
        assert!(dir.path().join("streams").join("77").join("stream.json").is_file());
        assert_eq!(cache.read_stream(77).unwrap(), Some(record));
        assert_eq!(cache.stream_count().unwrap(), 1);
    }

    #[test]
    fn test_write_stream_rejects_mismatched_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let record =
            StreamRecord::from_raw(1, vec![("time".to_string(), json!([0]))]).unwrap();

        assert!(cache.write_stream(2, &record).is_err());
        assert!(!cache.has_stream(2));
    }

    #[test]
    fn test_unavailable_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());

        assert!(!cache.is_stream_unavailable(12));
        cache.mark_stream_unavailable(12, "manual activity").unwrap();
        assert!(cache.is_stream_unavailable(12));
        assert!(!cache.has_stream(12));
        assert_eq!(cache.unavailable_count().unwrap(), 1);
        assert_eq!(cache.stream_count().unwrap(), 0);
    }
}
