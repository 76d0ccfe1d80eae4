//! Integration tests for trainboard-core.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use trainboard_core::analytics::{self, Dimension, TimeRange};
use trainboard_core::models::{EMetricsRecord, JobRecord, TypedValue};
use trainboard_core::{
    AnalyticsReport, DashError, DashboardConfig, DashboardEvent, EventBus, FollowOptions,
    Follower, JobStore, JsonlMetricsSource, MetricsSource, ViewStatus,
};

fn job(user: &str, submitted: Option<&str>, cpus: f64, gpus: u32, framework: &str) -> JobRecord {
    serde_json::from_value(json!({
        "user_id": user,
        "training_status": {
            "submission_timestamp": submitted,
            "download_start_timestamp": submitted,
        },
        "training": {"resources": {"cpus": cpus, "gpus": gpus, "learners": 1}},
        "model_definition": {"framework": {"name": framework}},
    }))
    .expect("valid job record")
}

fn write_jobs(tmp: &TempDir) -> JobStore {
    let store = JobStore::new(tmp.path());
    store
        .save_source(
            "local",
            &[
                job("alice", Some("2023-11-14T10:00:00Z"), 1.0, 1, "tensorflow"),
                job("bob", Some("2023-11-15T10:00:00Z"), 2.0, 2, "pytorch"),
                job("carol", Some("not a date"), 0.5, 0, "caffe"),
            ],
        )
        .unwrap();
    store
        .save_source(
            "cruiser1",
            &[
                job("alice", Some("2023-11-16T10:00:00Z"), 1.0, 4, "tensorflow"),
                job("dave", None, 4.0, 1, "tensorflow"),
            ],
        )
        .unwrap();
    store
}

fn metrics(group: &str, iteration: i64, loss: f64) -> EMetricsRecord {
    let mut rec = EMetricsRecord {
        grouplabel: group.to_string(),
        ..Default::default()
    };
    rec.meta.training_id = "training-1".to_string();
    rec.etimes.insert("iteration", TypedValue::int(iteration));
    rec.values.insert("loss", TypedValue::float(loss));
    rec
}

#[test]
fn test_store_lists_and_loads_sources() {
    let tmp = TempDir::new().unwrap();
    let store = write_jobs(&tmp);

    assert_eq!(store.list_sources().unwrap(), ["cruiser1", "local"]);

    let results = store.load(&["local".to_string(), "cruiser1".to_string()]).unwrap();
    let keys: Vec<&str> = results.keys().collect();
    assert_eq!(keys, ["local", "cruiser1"]);
    assert_eq!(analytics::merge_sources(&results).len(), 5);

    let err = store.load(&["cruiser9".to_string()]).unwrap_err();
    assert!(matches!(err, DashError::SourceNotFound(name) if name == "cruiser9"));
    assert!(store.load_source("../etc").is_err());
}

#[test]
fn test_fractional_gpus_do_not_reject_the_source() {
    let tmp = TempDir::new().unwrap();
    let jobs_dir = tmp.path().join("jobs");
    std::fs::create_dir_all(&jobs_dir).unwrap();
    let jobs = json!([
        {"user_id": "alice", "training": {"resources": {"cpus": 1, "gpus": 1, "learners": 2}}},
        {"user_id": "bob", "training": {"resources": {"cpus": 1, "gpus": 0.5, "learners": 2}}},
        {"user_id": "carol", "training": {"resources": {"gpus": "lots", "learners": -1}}},
    ]);
    std::fs::write(jobs_dir.join("local.json"), jobs.to_string()).unwrap();

    let results = JobStore::new(tmp.path()).load(&[]).unwrap();
    let merged = analytics::merge_sources(&results);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[1].training.resources.gpus, Some(0.5));
    assert_eq!(merged[1].gpu_total(), Some(1.0));
    assert_eq!(merged[2].training.resources.gpus, None);
    assert_eq!(merged[2].training.resources.learners, None);

    let report = AnalyticsReport::build(&results, TimeRange::all());
    let per_trainer = report.chart("chart_GPUs").unwrap();
    assert_eq!(per_trainer.labels, ["1", "0.5", "unknown"]);
}

#[test]
fn test_bucket_counts_cover_filtered_records() {
    let tmp = TempDir::new().unwrap();
    let results = write_jobs(&tmp).load(&[]).unwrap();
    let merged = analytics::merge_sources(&results);

    for range in [TimeRange::all(), TimeRange::new(Some(1_699_999_000), None)] {
        let kept = range.filter(merged.iter().copied());
        for dim in Dimension::ALL {
            let total: usize = dim.group(kept.iter().copied()).iter().map(|b| b.count()).sum();
            assert_eq!(total, kept.len(), "{dim:?} with {range:?}");
        }
    }
}

#[test]
fn test_range_filter_drops_unusable_timestamps_only_when_bounded() {
    let tmp = TempDir::new().unwrap();
    let results = write_jobs(&tmp).load(&[]).unwrap();
    let merged = analytics::merge_sources(&results);

    assert_eq!(TimeRange::all().filter(merged.iter().copied()).len(), 5);

    // 2023-11-15T00:00:00Z in seconds, through 2023-11-15T23:59:59Z in milliseconds
    let range = TimeRange::new(Some(1_700_006_400), Some(1_700_092_799_000));
    let once = range.filter(merged.iter().copied());
    let users: Vec<_> = once.iter().filter_map(|j| j.user_id.as_deref()).collect();
    assert_eq!(users, ["bob"]);

    let twice = range.filter(once.iter().copied());
    assert_eq!(once.len(), twice.len());
}

#[test]
fn test_report_from_store() {
    let tmp = TempDir::new().unwrap();
    let results = write_jobs(&tmp).load(&[]).unwrap();
    let report = AnalyticsReport::build(&results, TimeRange::all());

    assert_eq!(report.total_jobs, 5);
    assert_eq!(report.kept_jobs, 5);

    let frameworks = report.chart("chart_frameworks").unwrap();
    // cruiser1 sorts first
    assert_eq!(frameworks.labels, ["tensorflow", "pytorch", "caffe"]);
    assert_eq!(frameworks.values, [3.0, 1.0, 1.0]);

    let days = report.chart("chart_dailyJobs").unwrap();
    assert_eq!(
        days.labels,
        ["2023-11-14", "2023-11-15", "2023-11-16", "unknown"]
    );

    let cpus = report.chart("chart_CPUs").unwrap();
    assert!(cpus.labels.contains(&"0.5".to_string()));

    // identical submission/download timestamps never count as queue time
    let queue = report.chart("chart_queueTimes").unwrap();
    assert_eq!(queue.total(), 0.0);
}

#[test]
fn test_jsonl_source_pages_and_skips_malformed_lines() {
    let tmp = TempDir::new().unwrap();
    let source = JsonlMetricsSource::new(tmp.path());
    source
        .append("training-1", &[metrics("training", 1, 0.9), metrics("training", 2, 0.8)])
        .unwrap();
    std::fs::OpenOptions::new()
        .append(true)
        .open(tmp.path().join("emetrics/training-1.jsonl"))
        .and_then(|mut f| std::io::Write::write_all(&mut f, b"{broken\n\n"))
        .unwrap();
    source.append("training-1", &[metrics("validation", 3, 0.7)]).unwrap();

    let first = source.fetch_page("training-1", 0, 2).unwrap();
    assert_eq!(first.len(), 2);
    let rest = source.fetch_page("training-1", 2, 10).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].grouplabel, "validation");

    let all = source.read_all("training-1").unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2], rest[0]);

    assert_eq!(source.list_trainings().unwrap(), ["training-1"]);
    assert!(matches!(
        source.fetch_page("missing", 0, 10),
        Err(DashError::TrainingNotFound(_))
    ));
}

#[test]
fn test_config_yaml_fills_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("trainboard.yaml");
    std::fs::write(&path, "port: 9100\nsources: [local]\n").unwrap();

    let config = DashboardConfig::load(&path).unwrap();
    assert_eq!(config.port, 9100);
    assert_eq!(config.sources, ["local"]);
    assert_eq!(config.metrics_poll_interval(), Duration::from_secs(4));
    assert_eq!(config.jobs_poll_interval(), Duration::from_secs(20));

    let missing = DashboardConfig::load(&tmp.path().join("nope.yaml")).unwrap();
    assert_eq!(missing, DashboardConfig::default());
}

#[tokio::test(start_paused = true)]
async fn test_follower_polls_and_appends() {
    let tmp = TempDir::new().unwrap();
    let source = JsonlMetricsSource::new(tmp.path());
    source
        .append(
            "training-1",
            &[metrics("training", 1, 0.9), metrics("training", 2, 0.8), metrics("training", 3, 0.7)],
        )
        .unwrap();

    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let options = FollowOptions {
        page_size: 2,
        follow_page_size: 100,
        poll_interval: Duration::from_secs(4),
        follow: true,
    };
    let follower = Follower::spawn(Arc::new(source.clone()), "training-1", options, bus);

    let first = follower.snapshot().await.unwrap();
    assert_eq!(first.board.position(), 2);
    assert_eq!(first.status, ViewStatus::Following);
    assert!(matches!(events.recv().await.unwrap(), DashboardEvent::ChartsUpdated { position: 2, .. }));

    source
        .append("training-1", &[metrics("validation", 4, 0.75), metrics("validation", 5, 0.6)])
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let later = follower.snapshot().await.unwrap();
    assert_eq!(later.board.position(), 5);
    let loss = later.board.chart("loss").unwrap();
    assert_eq!(loss.series.len(), 2);
    assert_eq!(loss.series("training").unwrap().points.len(), 3);

    let last = follower.stop().await.unwrap();
    assert!(!last.following);
    assert_eq!(last.board.position(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_followers_push_only_their_own_updates() {
    let tmp = TempDir::new().unwrap();
    let source = JsonlMetricsSource::new(tmp.path());
    source
        .append("training-1", &[metrics("training", 1, 0.9), metrics("training", 2, 0.8)])
        .unwrap();

    let bus = EventBus::default();
    let options = FollowOptions {
        follow: false,
        ..FollowOptions::default()
    };
    let first = Follower::spawn(Arc::new(source.clone()), "training-1", options.clone(), bus.clone());
    let second = Follower::spawn(Arc::new(source.clone()), "training-1", options, bus);

    let mut first_updates = first.updates();
    let mut second_updates = second.updates();
    first_updates.changed().await.unwrap();
    assert_eq!(first_updates.borrow_and_update().board.position(), 2);
    second_updates.changed().await.unwrap();
    assert_eq!(second_updates.borrow_and_update().board.position(), 2);

    source.append("training-1", &[metrics("training", 3, 0.7)]).unwrap();
    let summary = first.refresh().await.unwrap();
    assert_eq!(summary.records, 1);

    assert!(first_updates.has_changed().unwrap());
    assert_eq!(first_updates.borrow_and_update().board.position(), 3);
    assert!(!second_updates.has_changed().unwrap());

    // an empty poll pushes nothing
    first.refresh().await.unwrap();
    assert!(!first_updates.has_changed().unwrap());
}

struct FlakySource {
    calls: AtomicUsize,
}

impl MetricsSource for FlakySource {
    fn fetch_page(
        &self,
        _training_id: &str,
        pos: u64,
        _pagesize: usize,
    ) -> trainboard_core::error::Result<Vec<EMetricsRecord>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![metrics("training", pos as i64 + 1, 1.0)])
        } else {
            Err(DashError::Other("metrics service unavailable".into()))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_turns_follow_off() {
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let source = Arc::new(FlakySource {
        calls: AtomicUsize::new(0),
    });
    let options = FollowOptions {
        follow: true,
        ..FollowOptions::default()
    };
    let follower = Follower::spawn(source, "training-1", options, bus);

    assert!(follower.refresh().await.is_err());

    let snap = follower.snapshot().await.unwrap();
    assert!(!snap.following);
    assert_eq!(snap.status.user_message(), Some("Error loading the data."));
    // data fetched before the failure is kept
    assert_eq!(snap.board.position(), 1);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DashboardEvent::FetchFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}
