//! Incremental metric charts for streaming evaluation metrics.
//!
//! A [`ChartBoard`] owns one chart slot per scalar metric name. Slots are
//! assigned the first time a name is seen and never reused, so the slot vector
//! may contain empty entries. Each chart holds one series per group label.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::EMetricsRecord;

/// Series colors, picked by the number of series already on the chart.
pub const PALETTE: [&str; 6] = [
    "MediumBlue",
    "DarkOrange",
    "DarkGreen",
    "Indigo",
    "DarkRed",
    "Sienna",
];

/// `etimes` fields tried, in order, for the horizontal axis.
pub const TEMPORAL_KEYS: [&str; 5] = ["iteration", "epoch", "step", "tick", "time"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
}

/// Horizontal-axis value of a record and the label it is displayed with.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalValue {
    pub x: f64,
    pub label: String,
}

/// Pick the record's temporal-x proxy: a preferred `etimes` key, then any
/// numeric `etimes` entry, then the record's fetch time.
pub fn temporal_value(record: &EMetricsRecord) -> Option<TemporalValue> {
    let preferred = TEMPORAL_KEYS
        .iter()
        .filter_map(|key| record.etimes.get(key))
        .find_map(|v| v.as_number().map(|x| (x, v)));
    let any_numeric = || record.etimes.iter().find_map(|(_, v)| v.as_number().map(|x| (x, v)));

    if let Some((x, v)) = preferred.or_else(any_numeric) {
        return Some(TemporalValue {
            x,
            label: v.value.clone(),
        });
    }
    let time = record.meta.time.trim();
    time.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .map(|x| TemporalValue {
            x,
            label: time.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub group: String,
    pub color: String,
    pub points: Vec<ChartPoint>,
}

/// The chart for one scalar metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricChart {
    pub slot: usize,
    pub name: String,
    pub series: Vec<Series>,
    /// Temporal labels in first-seen order, each appearing once.
    pub labels: Vec<String>,
    #[serde(skip)]
    seen_labels: HashSet<String>,
}

impl MetricChart {
    fn new(slot: usize, name: &str, group: &str, point: ChartPoint, label: String) -> Self {
        let mut chart = Self {
            slot,
            name: name.to_string(),
            series: vec![Series {
                group: group.to_string(),
                color: PALETTE[0].to_string(),
                points: vec![point],
            }],
            labels: Vec::new(),
            seen_labels: HashSet::new(),
        };
        chart.add_label(label);
        chart
    }

    fn add_label(&mut self, label: String) {
        if self.seen_labels.insert(label.clone()) {
            self.labels.push(label);
        }
    }

    fn append(&mut self, group: &str, point: ChartPoint, label: String) {
        let idx = match self.series.iter().position(|s| s.group == group) {
            Some(idx) => idx,
            None => {
                let color = PALETTE[self.series.len() % PALETTE.len()];
                self.series.push(Series {
                    group: group.to_string(),
                    color: color.to_string(),
                    points: Vec::new(),
                });
                self.series.len() - 1
            }
        };
        self.series[idx].points.push(point);
        self.add_label(label);
    }

    pub fn series(&self, group: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.group == group)
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }
}

/// Outcome of ingesting one fetched page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub records: usize,
    pub points_added: usize,
    pub charts_created: usize,
}

/// Chart state for one training's metrics, grown page by page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartBoard {
    slots: Vec<Option<MetricChart>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    next_slot: usize,
    /// Offset of the next record to fetch.
    position: u64,
}

impl ChartBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for a metric name, assigned on first sight.
    pub fn slot_index(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.next_slot;
        self.index.insert(name.to_string(), idx);
        self.next_slot += 1;
        idx
    }

    /// Grow the slot vector so `idx` is addressable, back-filling with empty slots.
    fn slot_mut(&mut self, idx: usize) -> &mut Option<MetricChart> {
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        &mut self.slots[idx]
    }

    /// Append every numeric scalar of `records` to its chart and advance the
    /// position by the number of records. A page contributes at most one point
    /// per (metric, group, x).
    pub fn ingest_page(&mut self, records: &[EMetricsRecord]) -> PageSummary {
        let mut summary = PageSummary {
            records: records.len(),
            ..Default::default()
        };
        // (slot, group, x) already appended from this page
        let mut appended: HashSet<(usize, &str, u64)> = HashSet::new();

        for record in records {
            let temporal = temporal_value(record);
            for (name, typed) in record.values.iter() {
                let slot = self.slot_index(name);
                let Some(y) = typed.as_number() else {
                    continue;
                };
                let Some(TemporalValue { x, label }) = temporal.clone() else {
                    continue;
                };
                // zero marks a record without a usable step
                if x == 0.0 {
                    continue;
                }
                if !appended.insert((slot, record.grouplabel.as_str(), x.to_bits())) {
                    continue;
                }
                let point = ChartPoint { x, y };
                let entry = self.slot_mut(slot);
                match entry {
                    Some(chart) => chart.append(&record.grouplabel, point, label),
                    None => {
                        *entry = Some(MetricChart::new(slot, name, &record.grouplabel, point, label));
                        summary.charts_created += 1;
                    }
                }
                summary.points_added += 1;
            }
        }

        self.position += records.len() as u64;
        debug!(
            records = summary.records,
            points = summary.points_added,
            position = self.position,
            "Ingested metrics page"
        );
        summary
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// All slots, including empty ones.
    pub fn slots(&self) -> &[Option<MetricChart>] {
        &self.slots
    }

    pub fn charts(&self) -> impl Iterator<Item = &MetricChart> {
        self.slots.iter().flatten()
    }

    pub fn chart(&self, name: &str) -> Option<&MetricChart> {
        let idx = *self.index.get(name)?;
        self.slots.get(idx)?.as_ref()
    }

    /// Drop all charts, slot assignments and the fetch position.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
