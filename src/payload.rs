//! # Payload Normalizer
//!
//! Converts the message shapes producers send into one canonical batch:
//! channel names, a shared timestamp axis in seconds since the reference
//! instant, and one value column per channel.
//!
//! ## Accepted Shapes
//! - Paired samples: `{"samples": [[ts_ms, value], ...]}`, one implicit `PPG` channel
//! - Tabular (pandas `orient="split"`): `{"columns": [...], "index": [...], "data": [[...]]}`
//! - Keyed columns: `{"TIMESTAMP": [...], "RED": [...], "IR": [...], "GREEN": [...]}`,
//!   or the same keys with a `_DELTA` suffix holding delta-encoded values
//!
//! Any of these may be wrapped as `{"raw": <shape>, "inference": {...}}`, where
//! the inference side channel carries a processed signal per channel plus a
//! label and confidence.
//!
//! A bad timestamp never stops a batch: it is replaced by the current wall
//! clock and the rest of the message is kept.

use crate::error::PayloadError;
use crate::timeseries::{normalize_channel_name, Sample};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Channel name used for the single-column paired-samples shape
pub const IMPLICIT_CHANNEL: &str = "PPG";

const TIMESTAMP_KEY: &str = "TIMESTAMP";
const KEYED_CHANNELS: [&str; 3] = ["RED", "IR", "GREEN"];
const DELTA_SUFFIX: &str = "_DELTA";

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Label and confidence attached to a processed channel update
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceAnnotation {
    pub label: String,
    /// Always within `[0, 1]`
    pub confidence: f64,
}

impl InferenceAnnotation {
    /// Title text shown above a processed chart
    pub fn title_for(&self, channel: &str) -> String {
        if self.label.is_empty() {
            format!("{} ({:.0}%)", channel, self.confidence * 100.0)
        } else {
            format!("{}: {} ({:.0}%)", channel, self.label, self.confidence * 100.0)
        }
    }
}

/// Processed signal for one channel from the inference side channel
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceUpdate {
    pub channel: String,
    pub signal: Vec<f64>,
    pub annotation: InferenceAnnotation,
}

/// Canonical form of one inbound message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedBatch {
    /// Upper-cased channel names
    pub channels: Vec<String>,
    /// Seconds since the reference instant, one per row
    pub timestamps: Vec<f64>,
    /// `values[c][row]`, every column as long as `timestamps`
    pub values: Vec<Vec<f64>>,
    pub inference: Vec<InferenceUpdate>,
}

impl NormalizedBatch {
    /// Samples of channel `index` paired with the shared timestamps
    pub fn samples(&self, index: usize) -> Vec<Sample> {
        self.values
            .get(index)
            .map(|column| {
                self.timestamps
                    .iter()
                    .zip(column)
                    .map(|(&x, &y)| Sample::new(x, y))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }
}

/// Current wall clock in epoch milliseconds
pub fn now_epoch_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// Parse `text` as JSON and normalize it.
pub fn normalize_str(text: &str, reference_epoch_ms: f64) -> Result<NormalizedBatch, PayloadError> {
    let value: Value = serde_json::from_str(text)?;
    normalize(&value, reference_epoch_ms).ok_or(PayloadError::Unrecognized)
}

/// Normalize a decoded message. `None` means the shape is not recognized.
pub fn normalize(raw: &Value, reference_epoch_ms: f64) -> Option<NormalizedBatch> {
    normalize_at(raw, reference_epoch_ms, now_epoch_ms())
}

/// Same as [`normalize`] with an explicit wall clock for substituted timestamps
pub fn normalize_at(raw: &Value, reference_epoch_ms: f64, now_ms: f64) -> Option<NormalizedBatch> {
    let object = raw.as_object()?;

    let (payload, inference) = match object.get("raw") {
        Some(inner @ Value::Object(_)) => (inner, object.get("inference")),
        _ => (raw, None),
    };
    let payload = payload.as_object()?;

    let to_seconds = |ms: f64| (ms - reference_epoch_ms) / 1000.0;

    let mut batch = if let Some(samples) = payload.get("samples").and_then(Value::as_array) {
        paired_samples(samples, now_ms, to_seconds)
    } else if let (Some(columns), Some(index), Some(data)) = (
        payload.get("columns").and_then(Value::as_array),
        payload.get("index").and_then(Value::as_array),
        payload.get("data").and_then(Value::as_array),
    ) {
        tabular(columns, index, data, now_ms, to_seconds)
    } else if let Some(batch) = keyed_columns(payload, now_ms, to_seconds) {
        batch
    } else {
        return None;
    };

    if let Some(Value::Object(entries)) = inference {
        batch.inference = inference_updates(entries);
    }

    debug_assert!(batch.values.iter().all(|c| c.len() == batch.timestamps.len()));
    Some(batch)
}

fn paired_samples(samples: &[Value], now_ms: f64, to_seconds: impl Fn(f64) -> f64) -> NormalizedBatch {
    let mut timestamps = Vec::with_capacity(samples.len());
    let mut column = Vec::with_capacity(samples.len());

    for sample in samples {
        let (ts, value) = match sample {
            Value::Array(pair) if pair.len() >= 2 => {
                let ts = number(&pair[0]).filter(|t| t.is_finite()).unwrap_or(now_ms);
                (ts, number(&pair[1]))
            }
            Value::Array(single) => (now_ms, single.first().and_then(number)),
            scalar => (now_ms, number(scalar)),
        };
        timestamps.push(to_seconds(ts));
        column.push(value.unwrap_or(f64::NAN));
    }

    NormalizedBatch {
        channels: vec![IMPLICIT_CHANNEL.to_string()],
        timestamps,
        values: vec![column],
        inference: Vec::new(),
    }
}

fn tabular(
    columns: &[Value],
    index: &[Value],
    rows: &[Value],
    now_ms: f64,
    to_seconds: impl Fn(f64) -> f64,
) -> NormalizedBatch {
    let channels: Vec<String> = columns.iter().map(column_name).collect();
    let mut values: Vec<Vec<f64>> = channels.iter().map(|_| Vec::with_capacity(rows.len())).collect();
    let mut timestamps = Vec::with_capacity(rows.len());

    for (r, row) in rows.iter().enumerate() {
        let ms = index.get(r).and_then(index_to_ms).unwrap_or(now_ms);
        timestamps.push(to_seconds(ms));

        let cells = row.as_array();
        for (c, column) in values.iter_mut().enumerate() {
            let cell = cells.and_then(|cells| cells.get(c));
            column.push(cell.and_then(number).unwrap_or(f64::NAN));
        }
    }

    NormalizedBatch {
        channels,
        timestamps,
        values,
        inference: Vec::new(),
    }
}

fn keyed_columns(
    payload: &Map<String, Value>,
    now_ms: f64,
    to_seconds: impl Fn(f64) -> f64,
) -> Option<NormalizedBatch> {
    let (suffix, raw_times) = match payload.get(TIMESTAMP_KEY).and_then(Value::as_array) {
        Some(times) => ("", times),
        None => {
            let key = format!("{TIMESTAMP_KEY}{DELTA_SUFFIX}");
            (DELTA_SUFFIX, payload.get(&key).and_then(Value::as_array)?)
        }
    };
    let is_delta = !suffix.is_empty();

    let decode = |raw: &[Value]| -> Vec<f64> {
        let values = raw.iter().map(|v| number(v).unwrap_or(f64::NAN));
        if is_delta {
            deltas_to_values(values)
        } else {
            values.collect()
        }
    };

    let times_ms = decode(raw_times);
    let rows = times_ms.len();

    let mut channels = Vec::new();
    let mut values = Vec::new();
    for name in KEYED_CHANNELS {
        let key = format!("{name}{suffix}");
        if let Some(raw) = payload.get(&key).and_then(Value::as_array) {
            let mut column = decode(raw);
            column.resize(rows, f64::NAN);
            channels.push(name.to_string());
            values.push(column);
        }
    }

    Some(NormalizedBatch {
        channels,
        timestamps: times_ms
            .into_iter()
            .map(|ms| if ms.is_finite() { ms } else { now_ms })
            .map(to_seconds)
            .collect(),
        values,
        inference: Vec::new(),
    })
}

/// Running sum of a delta-encoded column, starting from its first value.
///
/// A non-finite delta yields NaN for its own row only.
fn deltas_to_values(deltas: impl Iterator<Item = f64>) -> Vec<f64> {
    deltas
        .scan(None, |acc: &mut Option<f64>, delta| {
            if !delta.is_finite() {
                return Some(f64::NAN);
            }
            let next = match *acc {
                None => delta,
                Some(prev) => prev + delta,
            };
            *acc = Some(next);
            Some(next)
        })
        .collect()
}

fn inference_updates(entries: &Map<String, Value>) -> Vec<InferenceUpdate> {
    entries
        .iter()
        .filter_map(|(channel, entry)| {
            let entry = entry.as_object()?;
            let signal = entry
                .get("signal")
                .and_then(Value::as_array)?
                .iter()
                .map(|v| number(v).unwrap_or(f64::NAN))
                .collect();
            let label = entry
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let confidence = entry
                .get("confidence")
                .and_then(number)
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(0.0);

            Some(InferenceUpdate {
                channel: normalize_channel_name(channel),
                signal,
                annotation: InferenceAnnotation { label, confidence },
            })
        })
        .collect()
}

fn column_name(column: &Value) -> String {
    match column {
        Value::String(s) => normalize_channel_name(s),
        other => normalize_channel_name(&other.to_string()),
    }
}

/// Numeric view of a JSON cell; numeric strings are accepted
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Index entry as epoch milliseconds: numbers are taken as-is, strings parsed as datetimes
fn index_to_ms(entry: &Value) -> Option<f64> {
    match entry {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_datetime_ms(s),
        _ => None,
    }
}

/// Parse an ISO-like datetime string to epoch milliseconds.
///
/// Strings without an offset are read as UTC.
pub fn parse_datetime_ms(text: &str) -> Option<f64> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis() as f64);
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis() as f64);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis() as f64)
}
