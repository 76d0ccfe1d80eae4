//! Job-history analytics: time-range filtering, grouping and the charts of the
//! analytics view.
//!
//! Everything here is a pure function over already-fetched records.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::durations::{classify, DurationBuckets, LifecyclePhase};
use crate::models::{Chart, ChartKind, JobRecord, JobResults, Timestamp};

/// Bounds below this are taken to be seconds rather than milliseconds.
pub const SECONDS_CUTOVER: i64 = 2_000_000_000;

/// Key used when the grouped field is missing from a record.
pub const UNKNOWN_KEY: &str = "unknown";

/// Normalize an epoch bound given in seconds or milliseconds to milliseconds.
pub fn normalize_bound(raw: i64) -> i64 {
    if raw < SECONDS_CUTOVER {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

// ─── Time range ───────────────────────────────────────────────────────────────

/// Inclusive submission-time window in epoch milliseconds. A bound of zero or
/// less is inactive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    /// The unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a range from optional raw bounds (seconds or milliseconds).
    pub fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self {
            from: from.map(normalize_bound).unwrap_or(0),
            to: to.map(normalize_bound).unwrap_or(0),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.from > 0 || self.to > 0
    }

    /// Whether a submission timestamp falls inside the window. Without active
    /// bounds every record is kept, including those with unusable timestamps.
    pub fn contains(&self, ts: &Timestamp) -> bool {
        if !self.is_bounded() {
            return true;
        }
        let Some(ms) = ts.millis() else {
            return false;
        };
        (self.from <= 0 || ms >= self.from) && (self.to <= 0 || ms <= self.to)
    }

    pub fn filter<'a, I>(&self, records: I) -> Vec<&'a JobRecord>
    where
        I: IntoIterator<Item = &'a JobRecord>,
    {
        records
            .into_iter()
            .filter(|r| self.contains(r.submitted()))
            .collect()
    }
}

/// Concatenate all sources' records, in source order.
pub fn merge_sources(results: &JobResults) -> Vec<&JobRecord> {
    results.iter().flat_map(|(_, jobs)| jobs.iter()).collect()
}

// ─── Grouping ─────────────────────────────────────────────────────────────────

/// Records sharing one grouping key.
#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    pub key: String,
    pub records: Vec<&'a JobRecord>,
}

impl Bucket<'_> {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn sum(&self, field: NumericField) -> f64 {
        self.records.iter().filter_map(|r| field.value(r)).sum()
    }

    /// Number of distinct owning users in the bucket.
    pub fn distinct_users(&self) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.user_id.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Group records by `key_fn`, keeping keys in first-seen order.
pub fn group_by<'a, I, F>(records: I, key_fn: F) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a JobRecord>,
    F: Fn(&JobRecord) -> String,
{
    let mut buckets: Vec<Bucket<'a>> = Vec::new();
    for record in records {
        let key = key_fn(record);
        match buckets.iter_mut().find(|b| b.key == key) {
            Some(bucket) => bucket.records.push(record),
            None => buckets.push(Bucket {
                key,
                records: vec![record],
            }),
        }
    }
    buckets
}

/// Sort buckets by key, for timeline charts.
pub fn sorted_by_key(mut buckets: Vec<Bucket<'_>>) -> Vec<Bucket<'_>> {
    buckets.sort_by(|a, b| a.key.cmp(&b.key));
    buckets
}

/// The grouping functions offered by the analytics view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// UTC calendar day of submission.
    Day,
    Cpus,
    Gpus,
    /// GPUs multiplied by learners.
    GpuTotal,
    Framework,
    Learners,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Day,
        Dimension::Cpus,
        Dimension::Gpus,
        Dimension::GpuTotal,
        Dimension::Framework,
        Dimension::Learners,
    ];

    pub fn key(&self, record: &JobRecord) -> String {
        let key = match self {
            Dimension::Day => record
                .submitted()
                .at()
                .map(|dt| dt.format("%Y-%m-%d").to_string()),
            Dimension::Cpus => record.training.resources.cpus.map(|c| c.to_string()),
            Dimension::Gpus => record.training.resources.gpus.map(|g| g.to_string()),
            Dimension::GpuTotal => record.gpu_total().map(|g| g.to_string()),
            Dimension::Framework => record.framework().map(str::to_string),
            Dimension::Learners => record.training.resources.learners.map(|l| l.to_string()),
        };
        key.unwrap_or_else(|| UNKNOWN_KEY.to_string())
    }

    pub fn group<'a, I>(&self, records: I) -> Vec<Bucket<'a>>
    where
        I: IntoIterator<Item = &'a JobRecord>,
    {
        group_by(records, |r| self.key(r))
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Dimension::Day),
            "cpus" => Ok(Dimension::Cpus),
            "gpus" => Ok(Dimension::Gpus),
            "gpu_total" | "gpus_sum" => Ok(Dimension::GpuTotal),
            "framework" => Ok(Dimension::Framework),
            "learners" => Ok(Dimension::Learners),
            other => Err(format!("unknown dimension: {other}")),
        }
    }
}

/// Numeric fields that can be summed per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Cpus,
    Gpus,
    GpuTotal,
    Learners,
}

impl NumericField {
    pub fn value(&self, record: &JobRecord) -> Option<f64> {
        let res = &record.training.resources;
        match self {
            NumericField::Cpus => res.cpus,
            NumericField::Gpus => res.gpus,
            NumericField::GpuTotal => record.gpu_total(),
            NumericField::Learners => res.learners.map(f64::from),
        }
    }
}

/// `(key, count)` for each bucket.
pub fn count_per_key(buckets: &[Bucket<'_>]) -> Vec<(String, usize)> {
    buckets.iter().map(|b| (b.key.clone(), b.count())).collect()
}

/// `(key, sum of field)` for each bucket. Records missing the field add nothing.
pub fn sum_per_key(buckets: &[Bucket<'_>], field: NumericField) -> Vec<(String, f64)> {
    buckets.iter().map(|b| (b.key.clone(), b.sum(field))).collect()
}

fn count_chart(id: &str, title: &str, kind: ChartKind, buckets: &[Bucket<'_>]) -> Chart {
    let mut chart = Chart::new(id, title, kind);
    for b in buckets {
        chart.push(b.key.clone(), b.count() as f64);
    }
    chart
}

// ─── Report ───────────────────────────────────────────────────────────────────

/// All charts of the analytics view for one set of sources and time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub range: TimeRange,
    pub total_jobs: usize,
    pub kept_jobs: usize,
    pub charts: Vec<Chart>,
}

impl AnalyticsReport {
    pub fn build(results: &JobResults, range: TimeRange) -> Self {
        let merged = merge_sources(results);
        let total_jobs = merged.len();
        let jobs = range.filter(merged);

        let days = sorted_by_key(Dimension::Day.group(jobs.iter().copied()));

        let mut daily_jobs = Chart::new("chart_dailyJobs", "Daily Jobs", ChartKind::Line);
        let mut daily_users = Chart::new("chart_dailyUsers", "Daily Users", ChartKind::Line);
        let mut daily_gpus =
            Chart::new("chart_GPUs_timeline", "Daily GPU Usage", ChartKind::Line);
        for day in &days {
            daily_jobs.push(day.key.clone(), day.count() as f64);
            daily_users.push(day.key.clone(), day.distinct_users() as f64);
            daily_gpus.push(day.key.clone(), day.sum(NumericField::Gpus));
        }

        let pie = |id: &str, title: &str, dim: Dimension| {
            count_chart(id, title, ChartKind::Pie, &dim.group(jobs.iter().copied()))
        };

        let mut charts = vec![
            daily_jobs,
            daily_users,
            pie("chart_CPUs", "Job CPUs", Dimension::Cpus),
            pie("chart_GPUs", "GPUs per Trainer", Dimension::Gpus),
            pie("chart_sumGPUs", "GPUs per Job", Dimension::GpuTotal),
            daily_gpus,
            pie("chart_frameworks", "DL Frameworks", Dimension::Framework),
            pie("chart_learners", "# Learners", Dimension::Learners),
        ];

        for phase in LifecyclePhase::ALL {
            let histogram = classify(
                jobs.iter().copied(),
                |r| phase.lower(r),
                |r| phase.upper(r),
                &DurationBuckets::preset(phase),
            );
            charts.push(histogram.to_chart(phase.chart_id(), phase.title()));
        }

        Self {
            range,
            total_jobs,
            kept_jobs: jobs.len(),
            charts,
        }
    }

    pub fn chart(&self, id: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| c.id == id)
    }
}
