//! Data models for trainboard.
//!
//! Wire shapes follow the training platform's JSON. Every field is optional on
//! the wire; missing or malformed values become explicit markers
//! ([`Timestamp::Absent`], [`Timestamp::Invalid`], `None`) instead of failing the
//! whole payload.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── Timestamps ───────────────────────────────────────────────────────────────

/// A lifecycle timestamp as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Timestamp {
    /// The field was missing or null.
    #[default]
    Absent,
    /// The field was present but could not be parsed.
    Invalid(String),
    At(DateTime<Utc>),
}

impl Timestamp {
    /// Parse an ISO-8601 string. Naive date-times are taken as UTC and a bare
    /// date means midnight UTC.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Timestamp::Absent;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Timestamp::At(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Timestamp::At(naive.and_utc());
            }
        }
        if let Some(midnight) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Timestamp::At(midnight.and_utc());
        }
        Timestamp::Invalid(raw.to_string())
    }

    pub fn from_millis(ms: i64) -> Self {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Timestamp::At)
            .unwrap_or_else(|| Timestamp::Invalid(ms.to_string()))
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::At(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Milliseconds since the Unix epoch, if the timestamp is valid.
    pub fn millis(&self) -> Option<i64> {
        self.at().map(|dt| dt.timestamp_millis())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Absent => serializer.serialize_none(),
            Timestamp::Invalid(raw) => serializer.serialize_str(raw),
            Timestamp::At(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(match raw {
            serde_json::Value::Null => Timestamp::Absent,
            serde_json::Value::String(s) => Timestamp::parse(&s),
            other => Timestamp::Invalid(other.to_string()),
        })
    }
}

/// Accepts a JSON string or number and keeps its textual form.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// A finite, non-negative number; anything else on the wire reads as `None`.
fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    let n = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(n.filter(|v| v.is_finite() && *v >= 0.0))
}

/// A non-negative whole number, accepting `2` and `2.0`; anything else is `None`.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let n = lenient_quantity(deserializer)?;
    Ok(n.filter(|v| v.fract() == 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v as u32))
}

// ─── Ordered maps ─────────────────────────────────────────────────────────────

/// A JSON object whose keys keep the order they were received in.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordered<V>(pub Vec<(String, V)>);

impl<V> Default for Ordered<V> {
    fn default() -> Self {
        Ordered(Vec::new())
    }
}

impl<V> Ordered<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the first position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for Ordered<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut out = Ordered::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl<V: Serialize> Serialize for Ordered<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Ordered<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = Ordered<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Ordered::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Ordered(Vec::with_capacity(access.size_hint().unwrap_or(0)));
                while let Some((k, v)) = access.next_entry::<String, V>()? {
                    out.insert(k, v);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_any(OrderedVisitor(PhantomData))
    }
}

// ─── Job records ──────────────────────────────────────────────────────────────

/// One training job as returned by the analytics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub training_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub training_status: TrainingStatus,
    #[serde(default)]
    pub training: Training,
    #[serde(default)]
    pub model_definition: ModelDefinition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub submission_timestamp: Timestamp,
    #[serde(default)]
    pub download_start_timestamp: Timestamp,
    #[serde(default)]
    pub process_start_timestamp: Timestamp,
    #[serde(default)]
    pub completion_timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Training {
    #[serde(default)]
    pub resources: Resources,
}

/// Resource shape requested by a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub cpus: Option<f64>,
    /// GPUs per learner; fractional shares are allowed.
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub gpus: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub learners: Option<u32>,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub memory: Option<f64>,
    #[serde(default)]
    pub memory_unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub framework: Framework,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Framework {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl JobRecord {
    /// Learner count with the platform default of one learner.
    pub fn learners_or_one(&self) -> u32 {
        match self.training.resources.learners {
            Some(n) if n > 0 => n,
            _ => 1,
        }
    }

    /// Total GPUs used by the job across all learners.
    pub fn gpu_total(&self) -> Option<f64> {
        self.training
            .resources
            .gpus
            .map(|g| g * f64::from(self.learners_or_one()))
    }

    pub fn framework(&self) -> Option<&str> {
        self.model_definition.framework.name.as_deref()
    }

    pub fn submitted(&self) -> &Timestamp {
        &self.training_status.submission_timestamp
    }
}

/// Job records keyed by the source they were loaded from, in source order.
pub type JobResults = Ordered<Vec<JobRecord>>;

/// Body of an analytics response: `{ "results": { source: [jobs] } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsPayload {
    #[serde(default)]
    pub results: JobResults,
}

// ─── Evaluation metrics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    String,
    JsonString,
    Int,
    Float,
    #[serde(other)]
    Unknown,
}

/// A scalar carried as a type tag plus its string encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub kind: ValueType,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
}

impl TypedValue {
    pub fn int(v: i64) -> Self {
        Self {
            kind: ValueType::Int,
            value: v.to_string(),
        }
    }

    pub fn float(v: f64) -> Self {
        Self {
            kind: ValueType::Float,
            value: v.to_string(),
        }
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self {
            kind: ValueType::String,
            value: v.into(),
        }
    }

    pub fn is_numeric_type(&self) -> bool {
        matches!(self.kind, ValueType::Int | ValueType::Float)
    }

    /// The numeric value, if the tag is numeric and the text parses to a finite number.
    pub fn as_number(&self) -> Option<f64> {
        if !self.is_numeric_type() {
            return None;
        }
        self.value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub training_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    /// Fetch time of the record, usually epoch milliseconds as text.
    #[serde(default, deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rindex: String,
}

/// One evaluation-metrics record from the metrics log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EMetricsRecord {
    #[serde(default)]
    pub meta: MetaInfo,
    #[serde(default)]
    pub grouplabel: String,
    #[serde(default)]
    pub etimes: Ordered<TypedValue>,
    #[serde(default)]
    pub values: Ordered<TypedValue>,
}

// ─── Charts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Pie,
    Bar,
}

/// Declarative chart data: labels and the values aligned with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub id: String,
    pub title: String,
    pub kind: ChartKind,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl Chart {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: ChartKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            labels: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, value: f64) {
        self.labels.push(label.into());
        self.values.push(value);
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}
