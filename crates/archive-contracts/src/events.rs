use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for the archive's `events.jsonl` log.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Clones share the same file lock, so generation threads can log through
/// their own handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Writer tagged with a fresh random session id.
    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Logging must never take the session down; write errors are dropped.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        let _ = self.emit(event_type, payload);
    }
}

/// Turns a `json!({...})` literal into an event payload.
pub fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let emitted = writer.emit(
            "state_loaded",
            payload(json!({"images": 4, "categories": 7})),
        )?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("state_loaded"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["images"], json!(4));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let emitted = writer.emit(
            "batch_settled",
            payload(json!({"type": "override", "session_id": "other"})),
        )?;

        assert_eq!(emitted["type"], json!("override"));
        assert_eq!(emitted["session_id"], json!("other"));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::for_new_session(&path);
        let clone = writer.clone();

        writer.emit("one", EventPayload::new())?;
        clone.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], json!("one"));
        assert_eq!(rows[1]["type"], json!("two"));
        assert_eq!(rows[0]["session_id"], rows[1]["session_id"]);
        Ok(())
    }

    #[test]
    fn record_swallows_write_failures() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // A directory in place of the log file makes every append fail.
        let writer = EventWriter::new(temp.path(), "session-123");
        writer.record("persist_failed", EventPayload::new());
        assert!(writer.emit("persist_failed", EventPayload::new()).is_err());
        Ok(())
    }
}
