use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ErrorKind;
use crate::normalized::Adjustment;
use crate::providers::ProviderKind;
use crate::request::MediaKind;

pub type EventPayload = Map<String, Value>;

/// Ordered status updates for one generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ValidationDone {
        model: String,
        adjustments: Vec<Adjustment>,
    },
    AssetsIngested {
        count: usize,
        hosted: usize,
    },
    Submitted {
        provider: ProviderKind,
        job_id: String,
        handle: Option<String>,
    },
    PollingTick {
        job_id: String,
        attempt: u32,
        progress: Option<f64>,
        poll_errors: u32,
    },
    Done {
        model: String,
        kind: MediaKind,
        uri: Option<String>,
        mime_type: Option<String>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ValidationDone { .. } => "validation_done",
            Self::AssetsIngested { .. } => "assets_ingested",
            Self::Submitted { .. } => "submitted",
            Self::PollingTick { .. } => "polling_tick",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    pub fn payload(&self) -> EventPayload {
        let mut payload = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.remove("type");
        payload
    }
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `generation_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    generation_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, generation_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                generation_id: generation_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn generation_id(&self) -> &str {
        &self.inner.generation_id
    }

    pub fn record(&self, event: &ProgressEvent) -> anyhow::Result<Value> {
        self.emit(event.event_type(), event.payload())
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "generation_id".to_string(),
            Value::String(self.inner.generation_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
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
    fn record_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "gen-123");

        let emitted = writer.record(&ProgressEvent::AssetsIngested {
            count: 2,
            hosted: 2,
        })?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("assets_ingested"));
        assert_eq!(parsed["generation_id"], json!("gen-123"));
        assert_eq!(parsed["count"], json!(2));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn validation_event_serializes_adjustments() {
        let event = ProgressEvent::ValidationDone {
            model: "veo-3.1-generate-preview".to_string(),
            adjustments: vec![
                Adjustment::DurationForResolution {
                    resolution: "1080p".to_string(),
                    requested: 4,
                    applied: 8,
                },
                Adjustment::AudioDisabled,
            ],
        };
        let payload = event.payload();
        assert!(payload.get("type").is_none());
        assert_eq!(
            payload["adjustments"][0]["rule"],
            json!("duration_for_resolution")
        );
        assert_eq!(payload["adjustments"][0]["applied"], json!(8));
        assert_eq!(payload["adjustments"][1]["rule"], json!("audio_disabled"));
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "gen-123");

        let mut payload = EventPayload::new();
        payload.insert(
            "generation_id".to_string(),
            Value::String("override".to_string()),
        );
        let emitted = writer.emit("submitted", payload)?;
        assert_eq!(emitted["generation_id"], json!("override"));
        Ok(())
    }

    #[test]
    fn record_appends_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "gen-123");

        writer.record(&ProgressEvent::PollingTick {
            job_id: "job".to_string(),
            attempt: 1,
            progress: None,
            poll_errors: 0,
        })?;
        writer.record(&ProgressEvent::Failed {
            kind: ErrorKind::Timeout,
            message: "gave up".to_string(),
        })?;

        let content = fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types, vec!["polling_tick", "failed"]);
        Ok(())
    }
}
