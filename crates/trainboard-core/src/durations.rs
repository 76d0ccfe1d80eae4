//! Lifecycle duration histograms.
//!
//! A job's duration between two lifecycle timestamps is assigned to the first
//! threshold it is strictly below. A negative threshold is the unbounded
//! "max" bucket and may only come last.

use serde::{Deserialize, Serialize};

use crate::error::{DashError, Result};
use crate::models::{Chart, ChartKind, JobRecord};

/// Ordered upper bounds in seconds, optionally ending with a negative sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBuckets {
    thresholds: Vec<i64>,
}

impl DurationBuckets {
    pub fn new(thresholds: Vec<i64>) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(DashError::InvalidBuckets("no thresholds given".into()));
        }
        let last = thresholds.len() - 1;
        let mut prev = 0;
        for (i, &t) in thresholds.iter().enumerate() {
            if t < 0 {
                if i != last {
                    return Err(DashError::InvalidBuckets(format!(
                        "unbounded bucket at position {i} must be last"
                    )));
                }
                continue;
            }
            if t <= prev {
                return Err(DashError::InvalidBuckets(format!(
                    "threshold {t}s must be positive and greater than {prev}s"
                )));
            }
            prev = t;
        }
        Ok(Self { thresholds })
    }

    /// The thresholds used by the analytics view for a lifecycle phase.
    pub fn preset(phase: LifecyclePhase) -> Self {
        let thresholds = match phase {
            LifecyclePhase::Queueing => vec![4, 6, 8, 10, 12, 14, 16, -1],
            LifecyclePhase::Download => vec![2, 4, 8, 16, 32, 64, 128, -1],
            LifecyclePhase::Training => vec![15, 30, 60, 120, 240, 480, 960, -1],
        };
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Index of the bucket for a duration in milliseconds. `None` when the
    /// duration is not strictly positive or exceeds every bounded threshold
    /// without a sentinel to catch it.
    pub fn bucket_for(&self, duration_ms: i64) -> Option<usize> {
        if duration_ms <= 0 {
            return None;
        }
        self.thresholds
            .iter()
            .position(|&t| t < 0 || duration_ms < t.saturating_mul(1000))
    }

    /// Labels of the form `< Ns`, the last one being `max`.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.thresholds.iter().map(|t| format!("< {t}s")).collect();
        if let Some(last) = labels.last_mut() {
            *last = "max".to_string();
        }
        labels
    }
}

impl std::str::FromStr for DurationBuckets {
    type Err = DashError;

    /// Parse a comma-separated list such as `4,6,8,-1`.
    fn from_str(s: &str) -> Result<Self> {
        let thresholds = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|_| DashError::InvalidBuckets(format!("not a number: {t}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(thresholds)
    }
}

/// Per-bucket counts aligned with their labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationHistogram {
    pub labels: Vec<String>,
    pub counts: Vec<u64>,
    /// Records skipped for a missing, invalid or non-positive duration.
    pub dropped: u64,
}

impl DurationHistogram {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn to_chart(&self, id: &str, title: &str) -> Chart {
        let mut chart = Chart::new(id, title, ChartKind::Bar);
        for (label, count) in self.labels.iter().zip(&self.counts) {
            chart.push(label.clone(), *count as f64);
        }
        chart
    }
}

/// Count each record's `upper - lower` duration (milliseconds) into `buckets`.
pub fn classify<'a, I, L, U>(
    records: I,
    lower: L,
    upper: U,
    buckets: &DurationBuckets,
) -> DurationHistogram
where
    I: IntoIterator<Item = &'a JobRecord>,
    L: Fn(&JobRecord) -> Option<i64>,
    U: Fn(&JobRecord) -> Option<i64>,
{
    let mut counts = vec![0u64; buckets.len()];
    let mut dropped = 0;
    for record in records {
        let slot = match (lower(record), upper(record)) {
            (Some(start), Some(end)) => buckets.bucket_for(end.saturating_sub(start)),
            _ => None,
        };
        match slot {
            Some(i) => counts[i] += 1,
            None => dropped += 1,
        }
    }
    DurationHistogram {
        labels: buckets.labels(),
        counts,
        dropped,
    }
}

/// The lifecycle intervals charted by the analytics view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Submission to download start.
    Queueing,
    /// Download start to process start.
    Download,
    /// Process start to completion.
    Training,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 3] = [
        LifecyclePhase::Queueing,
        LifecyclePhase::Download,
        LifecyclePhase::Training,
    ];

    pub fn lower(&self, record: &JobRecord) -> Option<i64> {
        let status = &record.training_status;
        match self {
            LifecyclePhase::Queueing => status.submission_timestamp.millis(),
            LifecyclePhase::Download => status.download_start_timestamp.millis(),
            LifecyclePhase::Training => status.process_start_timestamp.millis(),
        }
    }

    pub fn upper(&self, record: &JobRecord) -> Option<i64> {
        let status = &record.training_status;
        match self {
            LifecyclePhase::Queueing => status.download_start_timestamp.millis(),
            LifecyclePhase::Download => status.process_start_timestamp.millis(),
            LifecyclePhase::Training => status.completion_timestamp.millis(),
        }
    }

    pub fn chart_id(&self) -> &'static str {
        match self {
            LifecyclePhase::Queueing => "chart_queueTimes",
            LifecyclePhase::Download => "chart_dlTimes",
            LifecyclePhase::Training => "chart_trainTimes",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LifecyclePhase::Queueing => "Queueing Times",
            LifecyclePhase::Download => "Downloading Times",
            LifecyclePhase::Training => "Training Times",
        }
    }
}

impl std::str::FromStr for LifecyclePhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queueing" | "queue" => Ok(LifecyclePhase::Queueing),
            "download" => Ok(LifecyclePhase::Download),
            "training" | "train" => Ok(LifecyclePhase::Training),
            other => Err(format!("unknown lifecycle phase: {other}")),
        }
    }
}
