//! Progress line protocol
//!
//! Worker processes report milestones to the supervisor by printing one line
//! per event on stdout:
//!
//! ```text
//! PROGRESS:{"step":"processing_batch","message":"Processing batch 2","progress":47,"timestamp":"...","batch_number":2}
//! ```
//!
//! Every other stdout line is plain log output. Decoding never fails: a line
//! carrying the sentinel but an unparseable payload comes back as
//! [`DecodedLine::Malformed`] so the caller can still log it verbatim.
//!
//! Line buffering is the reader's job. [`decode`] must only be handed complete
//! lines (terminator already observed and stripped).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Sentinel that starts every progress line
pub const PROGRESS_PREFIX: &str = "PROGRESS:";

/// Keys with a fixed meaning; never stored in [`ProgressEvent::extra`]
const RESERVED_KEYS: &[&str] = &["step", "message", "progress", "timestamp"];

/// One reported milestone from a worker process
///
/// `progress` is relative to the reporting stage (0-100). The supervisor
/// rescales it into the stage's slice of the overall pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Short symbolic step name (e.g. "batch_creation")
    pub step: String,
    /// Human-readable status text
    pub message: String,
    /// Stage-relative percentage, clamped to 0-100 on encode and decode
    #[serde(serialize_with = "serialize_progress", deserialize_with = "deserialize_progress")]
    pub progress: u8,
    /// When the worker produced the event
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata (batch number, channel name, error text, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProgressEvent {
    /// Create an event stamped with the current time
    pub fn new(step: impl Into<String>, message: impl Into<String>, progress: u8) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            progress: progress.min(100),
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach a metadata field
    ///
    /// Reserved keys (`step`, `message`, `progress`, `timestamp`) are ignored
    /// so an encoded line never carries duplicate keys.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::debug!(key = %key, "Ignoring reserved progress metadata key");
            return self;
        }
        self.extra.insert(key, value.into());
        self
    }

    /// Metadata value rendered as a string (numbers and booleans included)
    pub fn extra_str(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Metadata value as an unsigned integer
    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        match self.extra.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

}

/// Result of decoding one complete output line
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A well-formed progress event
    Progress(ProgressEvent),
    /// Sentinel present but payload unusable; `raw` is the original line
    Malformed { raw: String, reason: String },
    /// Ordinary output, preserved verbatim
    Plain(String),
}

/// Encode an event as a single progress line (no trailing newline)
pub fn encode(event: &ProgressEvent) -> Result<String, serde_json::Error> {
    Ok(format!("{}{}", PROGRESS_PREFIX, serde_json::to_string(event)?))
}

/// Decode one complete output line
pub fn decode(line: &str) -> DecodedLine {
    let Some(payload) = line.trim().strip_prefix(PROGRESS_PREFIX) else {
        return DecodedLine::Plain(line.to_string());
    };

    match serde_json::from_str::<ProgressEvent>(payload) {
        Ok(event) => DecodedLine::Progress(event),
        Err(e) => DecodedLine::Malformed {
            raw: line.to_string(),
            reason: e.to_string(),
        },
    }
}

fn serialize_progress<S>(progress: &u8, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8((*progress).min(100))
}

/// Accept any JSON number (or numeric string) and clamp it into 0-100
fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("progress is not a number: {}", value)))?;

    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

/// RFC 3339, or a naive ISO 8601 timestamp interpreted as UTC
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", s, e)))
}

/// Worker-side emitter for progress lines
///
/// Writes one encoded line per event and flushes immediately so the
/// supervisor sees each milestone as it happens. Write failures are logged
/// and swallowed: losing a progress line must never abort the worker.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ProgressReporter {
    /// Reporter writing to the process's stdout
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    /// Reporter that drops every event
    pub fn discard() -> Self {
        Self::with_writer(std::io::sink())
    }

    /// Reporter writing to an arbitrary sink
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Emit a fully built event
    pub fn report(&self, event: &ProgressEvent) {
        let line = match encode(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(step = %event.step, error = %e, "Could not encode progress event");
                return;
            }
        };

        let mut sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
            tracing::warn!(step = %event.step, error = %e, "Could not write progress line");
        }
    }

    /// Emit an event without metadata
    pub fn emit(&self, step: &str, message: impl Into<String>, progress: u8) {
        self.report(&ProgressEvent::new(step, message, progress));
    }
}
