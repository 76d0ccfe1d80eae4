//! HTTP-level tests for the trainboard API router.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use trainboard_core::models::{EMetricsRecord, JobRecord, TypedValue};
use trainboard_core::{DashboardConfig, DashboardEvent, EventBus, JobStore, JsonlMetricsSource};
use trainboard_server::{build_router, AppState};

fn job(user: &str, submitted: &str, downloaded: &str, framework: &str) -> JobRecord {
    serde_json::from_value(json!({
        "user_id": user,
        "training_status": {
            "submission_timestamp": submitted,
            "download_start_timestamp": downloaded,
        },
        "training": {"resources": {"cpus": 1, "gpus": 1, "learners": 2}},
        "model_definition": {"framework": {"name": framework}},
    }))
    .unwrap()
}

fn metrics(group: &str, iteration: i64, accuracy: f64) -> EMetricsRecord {
    let mut rec = EMetricsRecord {
        grouplabel: group.to_string(),
        ..Default::default()
    };
    rec.etimes.insert("iteration", TypedValue::int(iteration));
    rec.values.insert("accuracy", TypedValue::float(accuracy));
    rec
}

fn setup() -> (TempDir, AppState) {
    let tmp = TempDir::new().unwrap();
    JobStore::new(tmp.path())
        .save_source(
            "local",
            &[
                job("alice", "2023-11-14T10:00:00Z", "2023-11-14T10:00:05Z", "tensorflow"),
                job("bob", "2023-11-15T10:00:00Z", "2023-11-15T10:01:00Z", "pytorch"),
            ],
        )
        .unwrap();
    JsonlMetricsSource::new(tmp.path())
        .append(
            "training-1",
            &[
                metrics("training", 1, 0.5),
                metrics("training", 2, 0.6),
                metrics("validation", 2, 0.55),
            ],
        )
        .unwrap();

    let config = DashboardConfig::default().with_data_dir(tmp.path());
    (tmp, AppState::new(config))
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Read SSE frames until the first named event; returns its name and data.
async fn first_sse_event(response: Response) -> (String, Value) {
    let mut body = response.into_body();
    let mut buffer = String::new();
    loop {
        while let Some(end) = buffer.find("\n\n") {
            let block: String = buffer.drain(..end + 2).collect();
            let mut name = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            if let Some(name) = name {
                return (name, serde_json::from_str(&data).unwrap());
            }
        }
        let frame = tokio::time::timeout(Duration::from_secs(10), body.frame())
            .await
            .expect("no SSE frame in time")
            .expect("SSE stream ended")
            .unwrap();
        if let Ok(bytes) = frame.into_data() {
            buffer.push_str(std::str::from_utf8(&bytes).unwrap());
        }
    }
}

async fn open_stream(state: &AppState, uri: &str) -> Response {
    let response = build_router(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
}

#[tokio::test]
async fn test_list_sources_and_trainings() {
    let (_tmp, state) = setup();

    let (status, body) = get_json(&state, "/api/sources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["local"]));

    let (_, body) = get_json(&state, "/api/trainings").await;
    assert_eq!(body, json!(["training-1"]));
}

#[tokio::test]
async fn test_analytics_report_publishes_event() {
    let (tmp, _) = setup();
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let state = AppState::with_bus(DashboardConfig::default().with_data_dir(tmp.path()), bus);

    let request = Request::post("/api/analytics")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"sources": ["local"]}"#))
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["total_jobs"], 2);
    let charts = report["charts"].as_array().unwrap();
    assert_eq!(charts.len(), 11);

    assert_eq!(
        events.try_recv().unwrap(),
        DashboardEvent::AnalyticsLoaded {
            total_jobs: 2,
            kept_jobs: 2
        }
    );
}

#[tokio::test]
async fn test_analytics_accepts_inline_results() {
    let (_tmp, state) = setup();
    let body = json!({
        "time_from": 1_700_006_400,
        "results": {
            "cruiser1": [
                {"user_id": "carol", "training_status": {"submission_timestamp": "2023-11-15T12:00:00Z"}},
                {"user_id": "dave", "training_status": {"submission_timestamp": "2023-11-13T12:00:00Z"}},
            ]
        }
    });
    let request = Request::post("/api/analytics")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let report: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(report["total_jobs"], 2);
    assert_eq!(report["kept_jobs"], 1);
}

#[tokio::test]
async fn test_unknown_source_is_not_found() {
    let (_tmp, state) = setup();
    let request = Request::post("/api/analytics")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"sources": ["cruiser9"]}"#))
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_durations_histogram() {
    let (_tmp, state) = setup();

    let (status, body) = get_json(&state, "/api/durations?phase=queueing").await;
    assert_eq!(status, StatusCode::OK);
    // 5s lands under 6s, 60s only fits the max bucket
    let labels = body["labels"].as_array().unwrap();
    let counts = body["counts"].as_array().unwrap();
    let total: u64 = counts.iter().map(|c| c.as_u64().unwrap()).sum();
    assert_eq!(total, 2);
    let six = labels.iter().position(|l| l == "< 6s").unwrap();
    assert_eq!(counts[six], 1);

    let (_, body) = get_json(&state, "/api/durations?phase=queueing&buckets=10,-1").await;
    assert_eq!(body["labels"], json!(["< 10s", "max"]));
    assert_eq!(body["counts"], json!([1, 1]));

    let (status, _) = get_json(&state, "/api/durations?phase=queueing&buckets=10,5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_emetrics_page_and_charts() {
    let (_tmp, state) = setup();

    let (status, body) = get_json(&state, "/api/trainings/training-1/emetrics?pos=1&pagesize=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["grouplabel"], "training");

    let (status, body) = get_json(&state, "/api/trainings/training-1/charts?pagesize=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position"], 3);
    let chart = &body["slots"][0];
    assert_eq!(chart["name"], "accuracy");
    assert_eq!(chart["series"].as_array().unwrap().len(), 2);

    let (status, _) = get_json(&state, "/api/trainings/missing/charts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_config_endpoint() {
    let (_tmp, state) = setup();
    let (status, body) = get_json(&state, "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["metrics_poll_interval_ms"], 4000);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_charts_stream_sends_followed_board() {
    let (_tmp, state) = setup();
    let response = open_stream(&state, "/api/trainings/training-1/charts/stream").await;

    let (name, snapshot) = first_sse_event(response).await;
    assert_eq!(name, "charts");
    assert_eq!(snapshot["training_id"], "training-1");
    assert_eq!(snapshot["following"], true);
    assert_eq!(snapshot["status"]["state"], "following");
    assert_eq!(snapshot["board"]["position"], 3);
    assert_eq!(snapshot["board"]["slots"][0]["name"], "accuracy");
}

#[tokio::test]
async fn test_charts_stream_for_unknown_training_reports_failure() {
    let (_tmp, state) = setup();
    let response = open_stream(&state, "/api/trainings/missing/charts/stream").await;

    let (name, snapshot) = first_sse_event(response).await;
    assert_eq!(name, "charts");
    assert_eq!(snapshot["following"], false);
    assert_eq!(snapshot["status"]["state"], "failed");
    assert_eq!(snapshot["board"]["position"], 0);
}

#[tokio::test]
async fn test_analytics_stream_sends_report() {
    let (_tmp, state) = setup();
    let response = open_stream(&state, "/api/analytics/stream?sources=local&time_from=1700006400").await;

    let (name, report) = first_sse_event(response).await;
    assert_eq!(name, "report");
    assert_eq!(report["total_jobs"], 2);
    assert_eq!(report["kept_jobs"], 1);
}

#[tokio::test]
async fn test_events_stream_relays_published_events() {
    let (_tmp, state) = setup();
    let response = open_stream(&state, "/api/events").await;

    state.bus.publish(DashboardEvent::FollowChanged {
        training_id: "training-1".into(),
        following: false,
    });

    let (name, event) = first_sse_event(response).await;
    assert_eq!(name, "follow_changed");
    assert_eq!(event["event"], "follow_changed");
    assert_eq!(event["training_id"], "training-1");
    assert_eq!(event["following"], false);
}
