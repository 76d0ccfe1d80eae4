//! REST API handlers and SSE streaming for trainboard-server.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, WatchStream};
use tracing::warn;

use trainboard_core::analytics::{merge_sources, TimeRange};
use trainboard_core::durations::{classify, DurationBuckets, LifecyclePhase};
use trainboard_core::models::JobResults;
use trainboard_core::{
    AnalyticsReport, ChartBoard, DashError, DashboardEvent, FollowOptions, Follower,
    MetricsSource,
};

use crate::state::AppState;

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sources", get(list_sources))
        .route("/analytics", post(build_analytics))
        .route("/analytics/stream", get(stream_analytics))
        .route("/durations", get(get_durations))
        .route("/trainings", get(list_trainings))
        .route("/trainings/{id}/emetrics", get(get_emetrics))
        .route("/trainings/{id}/charts", get(get_charts))
        .route("/trainings/{id}/charts/stream", get(stream_charts))
        .route("/events", get(stream_events))
        .route("/config", get(get_config))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn error_response(e: DashError) -> Response {
    let status = match &e {
        DashError::SourceNotFound(_) | DashError::TrainingNotFound(_) => StatusCode::NOT_FOUND,
        DashError::InvalidBuckets(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// Split a comma-separated list, dropping empty entries.
fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

fn requested_sources(state: &AppState, requested: Option<Vec<String>>) -> Vec<String> {
    match requested {
        Some(sources) if !sources.is_empty() => sources,
        _ => state.config.sources.clone(),
    }
}

fn sse_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

fn json_event(name: &str, data: &impl serde::Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

// ─── Analytics ───────────────────────────────────────────────────────────────

async fn list_sources(State(state): State<AppState>) -> impl IntoResponse {
    match state.jobs.list_sources() {
        Ok(names) => Json(names).into_response(),
        Err(e) => error_response(e),
    }
}

/// Body of `POST /analytics`.
#[derive(Deserialize)]
struct AnalyticsRequest {
    /// Sources to load from the job store. Omitted means the configured default.
    sources: Option<Vec<String>>,
    /// Seconds or milliseconds since epoch; zero or omitted is unbounded.
    time_from: Option<i64>,
    time_to: Option<i64>,
    /// Job records supplied inline instead of loaded from the store.
    results: Option<JobResults>,
}

async fn build_analytics(
    State(state): State<AppState>,
    Json(req): Json<AnalyticsRequest>,
) -> impl IntoResponse {
    let range = TimeRange::new(req.time_from, req.time_to);
    let results = match req.results {
        Some(results) => results,
        None => match state.jobs.load(&requested_sources(&state, req.sources)) {
            Ok(results) => results,
            Err(e) => return error_response(e),
        },
    };

    let report = AnalyticsReport::build(&results, range);
    state.bus.publish(DashboardEvent::AnalyticsLoaded {
        total_jobs: report.total_jobs,
        kept_jobs: report.kept_jobs,
    });
    Json(report).into_response()
}

/// Query params of the analytics stream.
#[derive(Deserialize)]
struct JobsQuery {
    /// Comma-separated list of sources.
    sources: Option<String>,
    time_from: Option<i64>,
    time_to: Option<i64>,
}

impl JobsQuery {
    fn range(&self) -> TimeRange {
        TimeRange::new(self.time_from, self.time_to)
    }

    fn sources(&self, state: &AppState) -> Vec<String> {
        requested_sources(state, self.sources.as_deref().map(split_list))
    }
}

/// SSE endpoint: rebuilds the analytics report on the jobs polling interval.
async fn stream_analytics(
    State(state): State<AppState>,
    Query(q): Query<JobsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sources = q.sources(&state);
    let range = q.range();

    let interval = tokio::time::interval(state.config.jobs_poll_interval());
    let stream = IntervalStream::new(interval).map(move |_| {
        let event = match state.jobs.load(&sources) {
            Ok(results) => {
                let report = AnalyticsReport::build(&results, range);
                state.bus.publish(DashboardEvent::AnalyticsLoaded {
                    total_jobs: report.total_jobs,
                    kept_jobs: report.kept_jobs,
                });
                json_event("report", &report)
            }
            Err(e) => {
                warn!("Failed to load jobs for analytics stream: {}", e);
                Event::default().event("error").data(e.to_string())
            }
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(sse_keep_alive())
}

#[derive(Deserialize)]
struct DurationsQuery {
    phase: LifecyclePhase,
    /// Comma-separated thresholds in seconds; defaults to the phase preset.
    buckets: Option<String>,
    sources: Option<String>,
    time_from: Option<i64>,
    time_to: Option<i64>,
}

async fn get_durations(
    State(state): State<AppState>,
    Query(q): Query<DurationsQuery>,
) -> impl IntoResponse {
    let buckets = match q.buckets.as_deref() {
        Some(list) => match list.parse::<DurationBuckets>() {
            Ok(b) => b,
            Err(e) => return error_response(e),
        },
        None => DurationBuckets::preset(q.phase),
    };
    let sources = requested_sources(&state, q.sources.as_deref().map(split_list));
    let results = match state.jobs.load(&sources) {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let merged = merge_sources(&results);
    let jobs = TimeRange::new(q.time_from, q.time_to).filter(merged.iter().copied());
    let histogram = classify(
        jobs,
        |r| q.phase.lower(r),
        |r| q.phase.upper(r),
        &buckets,
    );
    Json(histogram).into_response()
}

// ─── Training metrics ────────────────────────────────────────────────────────

async fn list_trainings(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.list_trainings() {
        Ok(ids) => Json(ids).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    pos: u64,
    pagesize: Option<usize>,
}

async fn get_emetrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    let pagesize = q.pagesize.unwrap_or(state.config.page_size);
    match state.metrics.fetch_page(&id, q.pos, pagesize) {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the full chart board from the whole log, ingested `pagesize` records at a time.
async fn get_charts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    let pagesize = q.pagesize.unwrap_or(state.config.follow_page_size).max(1);
    let records = match state.metrics.read_all(&id) {
        Ok(records) => records,
        Err(e) => return error_response(e),
    };
    let mut board = ChartBoard::new();
    for page in records.chunks(pagesize) {
        board.ingest_page(page);
    }
    Json(board).into_response()
}

/// SSE endpoint: follows a training and sends the chart board whenever new
/// points arrive. Each stream owns its follower, which stops when the client
/// disconnects.
async fn stream_charts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let options = FollowOptions {
        follow: true,
        ..FollowOptions::from(state.config.as_ref())
    };
    let follower = Follower::spawn(state.metrics.clone(), id, options, state.bus.clone());

    let stream = WatchStream::from_changes(follower.updates()).map(move |snapshot| {
        // dropping the stream drops the follower
        let _owner = &follower;
        Ok(json_event("charts", &snapshot))
    });

    Sse::new(stream).keep_alive(sse_keep_alive())
}

// ─── Events & config ─────────────────────────────────────────────────────────

/// SSE endpoint: every dashboard event published on the bus.
async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(|event| async move {
        // lagged receivers just miss events
        event.ok().map(|e| Ok(json_event(e.kind(), &e)))
    });
    Sse::new(stream).keep_alive(sse_keep_alive())
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "config": state.config.as_ref(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
