use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Keys every session event carries; payload entries with these names are dropped.
const RESERVED_EVENT_KEYS: &[&str] = &["type", "session_id", "seq", "ts"];

/// JSONL log of everything that happened in one chat session.
///
/// Events are numbered from 1 in the order they reach the file, so `seq`
/// is gapless within a session even when clones of the writer are shared.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    // last sequence number written; held across the append
    last_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                last_seq: Mutex::new(0),
            }),
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Uuid::new_v4().to_string())
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        let log = &self.shared;
        if let Some(parent) = log.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }

        let mut last_seq = log
            .last_seq
            .lock()
            .map_err(|_| anyhow!("session event log lock poisoned"))?;
        let seq = *last_seq + 1;
        let event = session_event(&log.session_id, seq, event_type, payload);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", log.path.display()))?;
        *last_seq = seq;

        Ok(Value::Object(event))
    }
}

fn session_event(
    session_id: &str,
    seq: u64,
    event_type: &str,
    payload: EventPayload,
) -> EventPayload {
    let mut event = EventPayload::new();
    event.insert("type".to_string(), Value::from(event_type));
    event.insert("session_id".to_string(), Value::from(session_id));
    event.insert("seq".to_string(), Value::from(seq));
    event.insert(
        "ts".to_string(),
        Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    event.extend(
        payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_EVENT_KEYS.contains(&key.as_str())),
    );
    event
}
