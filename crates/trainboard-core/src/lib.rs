//! trainboard-core: analytics and live metric charts for a training platform.
//!
//! The aggregation, duration and chart modules are pure, synchronous
//! transformations over already-fetched records. [`Follower`] is the only
//! part that runs on its own, as a background tokio task polling a
//! [`MetricsSource`].

pub mod analytics;
pub mod charts;
pub mod config;
pub mod durations;
pub mod error;
pub mod events;
pub mod follower;
pub mod models;
pub mod storage;
pub mod view;

pub use analytics::{AnalyticsReport, Dimension, TimeRange};
pub use charts::{ChartBoard, MetricChart, PageSummary};
pub use config::DashboardConfig;
pub use durations::{DurationBuckets, DurationHistogram, LifecyclePhase};
pub use error::DashError;
pub use events::{DashboardEvent, EventBus};
pub use follower::{FollowOptions, FollowSnapshot, Follower};
pub use models::{Chart, ChartKind, EMetricsRecord, JobRecord, JobResults, Timestamp};
pub use storage::{JobStore, JsonlMetricsSource, MetricsSource};
pub use view::ViewStatus;
