//! Event extraction: untyped JSON records into typed `Point`s
//!
//! Every target field is resolved through a declared, ordered fallback chain
//! of source keys; the first present, non-null, parseable value wins. The
//! extractor never fails a batch: a record it cannot use is skipped and
//! counted.

use super::types::{Point, RawEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category label used when a device cannot be classified
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Device class derived from a user agent string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "Mobile",
            DeviceClass::Tablet => "Tablet",
            DeviceClass::Desktop => "Desktop",
            DeviceClass::Unknown => UNKNOWN_CATEGORY,
        }
    }
}

// Each marker matches when ALL of its substrings occur in the lowercased UA.
// Checked in priority order: mobile, then tablet, then desktop. iPad UAs carry
// "Mobile/..." tokens, so the mobile markers avoid the bare word "mobile".
const MOBILE_MARKERS: &[&[&str]] = &[
    &["iphone"],
    &["ipod"],
    &["android", "mobile"],
    &["windows phone"],
    &["blackberry"],
    &["opera mini"],
    &["iemobile"],
];

const TABLET_MARKERS: &[&[&str]] = &[
    &["ipad"],
    &["tablet"],
    &["android"],
    &["kindle"],
    &["silk"],
    &["playbook"],
];

const DESKTOP_MARKERS: &[&[&str]] = &[
    &["windows nt"],
    &["macintosh"],
    &["mac os x"],
    &["x11"],
    &["linux"],
    &["cros"],
];

/// Fixed-priority substring classifier for user agent strings
pub fn classify_user_agent(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_ascii_lowercase();
    let matches = |markers: &[&[&str]]| {
        markers
            .iter()
            .any(|marker| marker.iter().all(|needle| ua.contains(needle)))
    };

    if matches(MOBILE_MARKERS) {
        DeviceClass::Mobile
    } else if matches(TABLET_MARKERS) {
        DeviceClass::Tablet
    } else if matches(DESKTOP_MARKERS) {
        DeviceClass::Desktop
    } else {
        DeviceClass::Unknown
    }
}

/// Map an HTTP status code to its class label (`404` -> `"4xx"`)
pub fn status_class(code: i64) -> Option<String> {
    if (100..600).contains(&code) {
        Some(format!("{}xx", code / 100))
    } else {
        None
    }
}

/// One candidate in a category fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "key", rename_all = "snake_case")]
pub enum CategorySource {
    /// String value at the key, used verbatim
    Field(String),
    /// User agent string at the key, passed through `classify_user_agent`
    UserAgent(String),
    /// Numeric status code at the key, mapped through `status_class`
    StatusClass(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryField {
    pub chain: Vec<CategorySource>,
    /// Label used when every candidate is absent
    #[serde(default)]
    pub default: Option<String>,
}

/// What to do when a metric resolves to nothing or to an invalid value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidValuePolicy {
    /// Missing, non-finite or `<= 0` drops the whole point (e.g. load times)
    DropPoint,
    /// Missing, non-finite or negative becomes `0` and the point is kept (e.g. counts)
    CoerceZero,
    /// Missing or non-finite leaves the metric out; the point is kept
    Omit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricField {
    /// Metric name on the produced `Point`
    pub name: String,
    /// Source keys tried in order (dotted paths address nested objects)
    pub chain: Vec<String>,
    /// Terminal value when every key is absent
    #[serde(default)]
    pub default: Option<f64>,
    pub policy: InvalidValuePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFallback {
    /// Stamp the point with the time it was extracted
    ExtractionTime,
    /// Treat the record as malformed
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampField {
    pub chain: Vec<String>,
    pub fallback: TimestampFallback,
}

/// Declared mapping from raw record shape to `Point`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub timestamp: TimestampField,
    #[serde(default)]
    pub category: Option<CategoryField>,
    pub metrics: Vec<MetricField>,
}

impl FieldMapping {
    pub fn new(timestamp_chain: &[&str], fallback: TimestampFallback) -> Self {
        Self {
            timestamp: TimestampField {
                chain: timestamp_chain.iter().map(|k| k.to_string()).collect(),
                fallback,
            },
            category: None,
            metrics: Vec::new(),
        }
    }

    pub fn category(mut self, chain: Vec<CategorySource>, default: Option<&str>) -> Self {
        self.category = Some(CategoryField {
            chain,
            default: default.map(str::to_string),
        });
        self
    }

    pub fn metric(
        mut self,
        name: &str,
        chain: &[&str],
        default: Option<f64>,
        policy: InvalidValuePolicy,
    ) -> Self {
        self.metrics.push(MetricField {
            name: name.to_string(),
            chain: chain.iter().map(|k| k.to_string()).collect(),
            default,
            policy,
        });
        self
    }
}

/// Normalize one raw record; `None` means the record is skipped
pub fn normalize(raw: &RawEvent, mapping: &FieldMapping, now_ms: i64) -> Option<Point> {
    if !raw.is_object() {
        return None;
    }

    let timestamp_ms = match first_resolved(raw, &mapping.timestamp.chain, parse_timestamp_ms) {
        Some(ts) => ts,
        None => match mapping.timestamp.fallback {
            TimestampFallback::ExtractionTime => now_ms,
            TimestampFallback::Reject => return None,
        },
    };

    let mut point = Point::new(timestamp_ms);

    if let Some(field) = &mapping.category {
        point.category = resolve_category(raw, field);
    }

    for field in &mapping.metrics {
        let resolved = first_resolved(raw, &field.chain, parse_number).or(field.default);

        match field.policy {
            InvalidValuePolicy::DropPoint => match resolved {
                Some(v) if v.is_finite() && v > 0.0 => {
                    point.metrics.insert(field.name.clone(), v);
                }
                _ => return None,
            },
            InvalidValuePolicy::CoerceZero => {
                let v = match resolved {
                    Some(v) if v.is_finite() && v >= 0.0 => v,
                    _ => 0.0,
                };
                point.metrics.insert(field.name.clone(), v);
            }
            InvalidValuePolicy::Omit => {
                if let Some(v) = resolved.filter(|v| v.is_finite()) {
                    point.metrics.insert(field.name.clone(), v);
                }
            }
        }
    }

    Some(point)
}

/// Normalize a batch in input order; returns the points and the skip count
pub fn normalize_batch(raws: &[RawEvent], mapping: &FieldMapping, now_ms: i64) -> (Vec<Point>, usize) {
    let mut points = Vec::with_capacity(raws.len());
    let mut skipped = 0;

    for raw in raws {
        match normalize(raw, mapping, now_ms) {
            Some(point) => points.push(point),
            None => {
                skipped += 1;
                log::debug!("Skipping unusable record: {}", raw);
            }
        }
    }

    (points, skipped)
}

fn resolve_category(raw: &Value, field: &CategoryField) -> Option<String> {
    for source in &field.chain {
        let resolved = match source {
            CategorySource::Field(key) => lookup(raw, key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            CategorySource::UserAgent(key) => lookup(raw, key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|ua| classify_user_agent(ua).as_str().to_string()),
            CategorySource::StatusClass(key) => lookup(raw, key)
                .and_then(parse_number)
                .and_then(|code| status_class(code as i64)),
        };

        if resolved.is_some() {
            return resolved;
        }
    }

    field.default.clone()
}

fn first_resolved<T>(raw: &Value, chain: &[String], parse: fn(&Value) -> Option<T>) -> Option<T> {
    chain
        .iter()
        .find_map(|key| lookup(raw, key).and_then(parse))
}

/// Dotted-path lookup; JSON `null` counts as absent
fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = raw;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            if let Some(ms) = s.parse::<f64>().ok().filter(|f| f.is_finite()) {
                return Some(ms.round() as i64);
            }
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}
