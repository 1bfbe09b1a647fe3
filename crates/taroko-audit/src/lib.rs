//! taroko-audit
//!
//! Append-only decision/order audit. Writes JSON Lines (one event per
//! line) with recursively sorted keys, into one file per Taipei trade day
//! under `logs/` — the daily rotation the persisted-state layout requires.
//!
//! Every order attempt, veto, swap, and shutdown flows through here; the
//! database keeps the queryable rows, this file keeps the forensic stream.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taroko_schemas::session;
use uuid::Uuid;

/// One audited event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    /// Taipei trade day the event belongs to (file routing key).
    pub day_id: u32,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
}

/// Append-only JSONL writer with daily file rotation.
pub struct AuditWriter {
    dir: PathBuf,
}

impl AuditWriter {
    /// Create the writer and ensure the log directory exists.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;
        Ok(Self { dir })
    }

    /// Path of the file for a given instant's Taipei trade day.
    pub fn file_for(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("taroko-{}.jsonl", session::day_id(now)))
    }

    /// Append one event to the day file for `now`.
    pub fn append(
        &self,
        now: DateTime<Utc>,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let ev = AuditEvent {
            event_id: Uuid::new_v4(),
            ts_utc: now,
            day_id: session::day_id(now),
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
        };

        let line = canonical_json_line(&ev)?;
        append_line(&self.file_for(now), &line)?;
        Ok(ev)
    }
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes()).context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One event == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let w = AuditWriter::new(dir.path()).unwrap();
        w.append(at(3, 2), "order", "ATTEMPT", json!({"qty": 2})).unwrap();
        w.append(at(3, 3), "order", "FILLED", json!({"qty": 2})).unwrap();

        let content = fs::read_to_string(w.file_for(at(3, 2))).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let ev: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(ev.topic, "order");
        assert_eq!(ev.event_type, "ATTEMPT");
        assert_eq!(ev.payload["qty"], 2);
    }

    #[test]
    fn events_route_to_taipei_day_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = AuditWriter::new(dir.path()).unwrap();
        // 23:30 UTC June 2 is June 3 in Taipei.
        let late = Utc.with_ymd_and_hms(2025, 6, 2, 23, 30, 0).unwrap();
        w.append(late, "tick", "SNAPSHOT", json!({})).unwrap();

        assert!(w.file_for(late).ends_with("taroko-20250603.jsonl"));
        assert!(w.file_for(late).exists());
    }

    #[test]
    fn lines_have_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let w = AuditWriter::new(dir.path()).unwrap();
        w.append(at(3, 2), "order", "ATTEMPT", json!({"zeta": 1, "alpha": 2}))
            .unwrap();
        let content = fs::read_to_string(w.file_for(at(3, 2))).unwrap();
        let alpha_pos = content.find("alpha").unwrap();
        let zeta_pos = content.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn separate_days_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = AuditWriter::new(dir.path()).unwrap();
        w.append(at(3, 2), "t", "A", json!({})).unwrap();
        w.append(at(4, 2), "t", "B", json!({})).unwrap();
        assert_ne!(w.file_for(at(3, 2)), w.file_for(at(4, 2)));
        assert!(w.file_for(at(3, 2)).exists());
        assert!(w.file_for(at(4, 2)).exists());
    }
}
