//! trainboard CLI: job analytics and live training charts from the terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, EnvFilter};

use trainboard::analytics::{merge_sources, TimeRange};
use trainboard::durations::classify;
use trainboard::{
    AnalyticsReport, Chart, ChartBoard, DashboardConfig, DashboardEvent, DurationBuckets,
    EventBus, FollowOptions, Follower, JobStore, JsonlMetricsSource, LifecyclePhase,
    MetricsSource,
};

#[derive(Parser)]
#[command(
    name = "trainboard",
    about = "📈 trainboard: job analytics and live training charts",
    version,
    author
)]
struct Cli {
    /// YAML configuration file (missing file means defaults)
    #[arg(long, short, global = true, default_value = "trainboard.yaml")]
    config: PathBuf,
    /// Override the data directory from the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// List job sources and their record counts
    Sources,
    /// Build the analytics charts for a set of sources
    Analytics {
        #[command(flatten)]
        jobs: JobsArgs,
        /// Only print this chart (e.g. chart_frameworks)
        #[arg(long)]
        chart: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Histogram of lifecycle durations
    Durations {
        /// queueing, download or training
        #[arg(long, default_value = "queueing")]
        phase: LifecyclePhase,
        /// Comma-separated thresholds in seconds; -1 ends with a max bucket
        #[arg(long)]
        buckets: Option<DurationBuckets>,
        #[command(flatten)]
        jobs: JobsArgs,
    },
    /// List trainings with metrics logs
    Trainings,
    /// Build the metric charts of a training from its full log
    Charts {
        training_id: String,
        /// Records per fetched page
        #[arg(long)]
        pagesize: Option<usize>,
        /// Print the chart board as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow a training, polling for new metrics until interrupted
    Follow {
        training_id: String,
        /// Polling interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(clap::Args)]
struct JobsArgs {
    /// Comma-separated job sources (default: config, or all)
    #[arg(long, value_delimiter = ',')]
    sources: Vec<String>,
    /// Lower bound, seconds or milliseconds since epoch
    #[arg(long)]
    from: Option<i64>,
    /// Upper bound, seconds or milliseconds since epoch
    #[arg(long)]
    to: Option<i64>,
}

impl JobsArgs {
    fn range(&self) -> TimeRange {
        TimeRange::new(self.from, self.to)
    }

    fn sources(&self, config: &DashboardConfig) -> Vec<String> {
        if self.sources.is_empty() {
            config.sources.clone()
        } else {
            self.sources.clone()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;

    let mut config = DashboardConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_serve(config).await?;
        }
        Commands::Sources => cmd_sources(&config)?,
        Commands::Analytics { jobs, chart, json } => cmd_analytics(&config, &jobs, chart, json)?,
        Commands::Durations {
            phase,
            buckets,
            jobs,
        } => cmd_durations(&config, phase, buckets, &jobs)?,
        Commands::Trainings => cmd_trainings(&config)?,
        Commands::Charts {
            training_id,
            pagesize,
            json,
        } => cmd_charts(&config, &training_id, pagesize, json)?,
        Commands::Follow {
            training_id,
            interval_ms,
            duration,
        } => {
            if let Some(ms) = interval_ms {
                config.metrics_poll_interval_ms = ms;
            }
            cmd_follow(&config, training_id, duration.map(Duration::from_secs)).await?;
        }
    }

    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is given.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "trainboard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_serve(config: DashboardConfig) -> Result<()> {
    println!("📈 trainboard");
    println!("   Data:   {}", config.data_dir.display());
    println!("   URL:    http://{}:{}", config.host, config.port);
    println!();

    trainboard_server::serve(config).await
}

fn cmd_sources(config: &DashboardConfig) -> Result<()> {
    let store = JobStore::new(&config.data_dir);
    let sources = store.list_sources()?;
    if sources.is_empty() {
        println!("No job sources found in '{}'", store.dir().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Source", "Jobs"]);
    for name in &sources {
        let jobs = store.load_source(name).map(|j| j.len().to_string());
        table.add_row([name.as_str(), jobs.as_deref().unwrap_or("unreadable")]);
    }
    println!("{}", table);
    Ok(())
}

fn cmd_analytics(
    config: &DashboardConfig,
    jobs: &JobsArgs,
    chart: Option<String>,
    json: bool,
) -> Result<()> {
    let results = JobStore::new(&config.data_dir).load(&jobs.sources(config))?;
    let report = AnalyticsReport::build(&results, jobs.range());
    info!(total = report.total_jobs, kept = report.kept_jobs, "Analytics built");

    let charts: Vec<&Chart> = match &chart {
        Some(id) => vec![report
            .chart(id)
            .with_context(|| format!("Unknown chart: {}", id))?],
        None => report.charts.iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&charts)?);
        return Ok(());
    }

    println!("Jobs: {} of {} in range", report.kept_jobs, report.total_jobs);
    for chart in charts {
        println!();
        println!("── {} ({}) ──", chart.title, chart.id);
        println!("{}", chart_table(chart));
    }
    Ok(())
}

fn cmd_durations(
    config: &DashboardConfig,
    phase: LifecyclePhase,
    buckets: Option<DurationBuckets>,
    jobs: &JobsArgs,
) -> Result<()> {
    let buckets = buckets.unwrap_or_else(|| DurationBuckets::preset(phase));
    let results = JobStore::new(&config.data_dir).load(&jobs.sources(config))?;
    let merged = merge_sources(&results);
    let kept = jobs.range().filter(merged.iter().copied());

    let histogram = classify(kept, |r| phase.lower(r), |r| phase.upper(r), &buckets);
    println!("{}", chart_table(&histogram.to_chart(phase.chart_id(), phase.title())));
    if histogram.dropped > 0 {
        println!("{} job(s) without a usable duration", histogram.dropped);
    }
    Ok(())
}

fn cmd_trainings(config: &DashboardConfig) -> Result<()> {
    let trainings = JsonlMetricsSource::new(&config.data_dir).list_trainings()?;
    if trainings.is_empty() {
        println!("No metrics logs found in '{}'", config.data_dir.display());
    }
    for id in trainings {
        println!("{}", id);
    }
    Ok(())
}

fn cmd_charts(
    config: &DashboardConfig,
    training_id: &str,
    pagesize: Option<usize>,
    json: bool,
) -> Result<()> {
    let source = JsonlMetricsSource::new(&config.data_dir);
    let pagesize = pagesize.unwrap_or(config.follow_page_size).max(1);

    let mut board = ChartBoard::new();
    for page in source.read_all(training_id)?.chunks(pagesize) {
        board.ingest_page(page);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&board)?);
    } else {
        println!("Training: {} ({} records)", training_id, board.position());
        println!("{}", board_table(&board));
    }
    Ok(())
}

async fn cmd_follow(
    config: &DashboardConfig,
    training_id: String,
    duration: Option<Duration>,
) -> Result<()> {
    let source: Arc<dyn MetricsSource> = Arc::new(JsonlMetricsSource::new(&config.data_dir));
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let options = FollowOptions {
        follow: true,
        ..FollowOptions::from(config)
    };
    let follower = Follower::spawn(source, training_id, options, bus);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Following {}", follower.training_id()));

    let deadline = tokio::time::sleep(duration.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(DashboardEvent::ChartsUpdated { position, summary, .. }) => {
                    spinner.set_message(format!(
                        "{} records, {} new point(s)",
                        position, summary.points_added
                    ));
                }
                Ok(DashboardEvent::FetchFailed { message, .. }) => {
                    spinner.println(format!("✗ {}", message));
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let last = follower.stop().await?;
    spinner.finish_with_message(format!("Stopped ({})", last.status));
    println!("{}", board_table(&last.board));
    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn chart_table(chart: &Chart) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Label", "Value"]);
    for (label, value) in chart.labels.iter().zip(&chart.values) {
        table.add_row([label.as_str(), &format_value(*value)]);
    }
    table
}

fn board_table(board: &ChartBoard) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Metric", "Group", "Points", "Last x", "Last y"]);
    for chart in board.charts() {
        for series in &chart.series {
            let last = series.points.last();
            table.add_row([
                chart.name.as_str(),
                series.group.as_str(),
                &series.points.len().to_string(),
                &last.map(|p| format_value(p.x)).unwrap_or_else(|| "-".into()),
                &last.map(|p| format_value(p.y)).unwrap_or_else(|| "-".into()),
            ]);
        }
    }
    table
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.4}", v)
    }
}
