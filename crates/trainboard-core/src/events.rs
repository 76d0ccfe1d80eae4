//! Dashboard event bus.
//!
//! An [`EventBus`] is created by whoever assembles the application and handed
//! to the components that publish or listen. Clones share one channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::charts::PageSummary;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// New metric points were appended to a training's charts.
    ChartsUpdated {
        training_id: String,
        position: u64,
        summary: PageSummary,
    },
    /// Follow mode was switched on or off.
    FollowChanged { training_id: String, following: bool },
    /// Fetching metrics for a training failed.
    FetchFailed { training_id: String, message: String },
    /// An analytics report was rebuilt.
    AnalyticsLoaded { total_jobs: usize, kept_jobs: usize },
}

impl DashboardEvent {
    /// Short name used as the SSE event type.
    pub fn kind(&self) -> &'static str {
        match self {
            DashboardEvent::ChartsUpdated { .. } => "charts_updated",
            DashboardEvent::FollowChanged { .. } => "follow_changed",
            DashboardEvent::FetchFailed { .. } => "fetch_failed",
            DashboardEvent::AnalyticsLoaded { .. } => "analytics_loaded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers. Returns how many received it; an event
    /// published with nobody listening is dropped.
    pub fn publish(&self, event: DashboardEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }
}
