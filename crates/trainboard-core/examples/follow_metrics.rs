//! Example of following a training's metrics from Rust.

use std::sync::Arc;
use std::time::Duration;

use trainboard_core::models::{EMetricsRecord, TypedValue};
use trainboard_core::{EventBus, FollowOptions, Follower, JsonlMetricsSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Write a metrics log to follow
    let data_dir = std::env::temp_dir().join("trainboard-example");
    let source = JsonlMetricsSource::new(&data_dir);
    let training_id = format!("training-{}", std::process::id());

    let record = |group: &str, iteration: i64| {
        let mut rec = EMetricsRecord {
            grouplabel: group.to_string(),
            ..Default::default()
        };
        rec.etimes.insert("iteration", TypedValue::int(iteration));
        rec.values
            .insert("loss", TypedValue::float(1.0 / (iteration as f64 + 1.0)));
        rec
    };
    let first: Vec<_> = (1..=10).map(|i| record("training", i)).collect();
    source.append(&training_id, &first)?;

    // 2. Follow it, polling every 200ms
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let options = FollowOptions {
        poll_interval: Duration::from_millis(200),
        follow: true,
        ..FollowOptions::default()
    };
    let follower = Follower::spawn(Arc::new(source.clone()), &training_id, options, bus);

    // 3. Keep writing while the follower polls
    for i in 11..=30 {
        source.append(&training_id, &[record("validation", i)])?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    while let Ok(event) = events.try_recv() {
        println!("{}: {:?}", event.kind(), event);
    }

    // 4. Stop and print the final charts
    let snapshot = follower.stop().await?;
    for chart in snapshot.board.charts() {
        for series in &chart.series {
            println!("{} [{}]: {} points", chart.name, series.group, series.points.len());
        }
    }

    std::fs::remove_file(data_dir.join("emetrics").join(format!("{training_id}.jsonl")))?;
    Ok(())
}
