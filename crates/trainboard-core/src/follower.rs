//! Live metrics follower: keeps a training's charts up to date.
//!
//! `Follower::spawn()` starts a background tokio task that owns the
//! [`ChartBoard`]. It fetches the first page at once and, while follow mode is
//! on, polls for the next page on a fixed interval. Callers talk to it over a
//! channel; dropping the handle stops the task and keeps nothing else alive.
//! Every change to the follower's state is also pushed on its own watch
//! channel, so a consumer sees only this follower's updates.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::charts::{ChartBoard, PageSummary};
use crate::config::DashboardConfig;
use crate::error::{DashError, Result};
use crate::events::{DashboardEvent, EventBus};
use crate::storage::MetricsSource;
use crate::view::ViewStatus;

#[derive(Debug, Clone)]
pub struct FollowOptions {
    /// Records requested by the initial fetch.
    pub page_size: usize,
    /// Records requested by each poll.
    pub follow_page_size: usize,
    pub poll_interval: Duration,
    /// Start with follow mode on.
    pub follow: bool,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for FollowOptions {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            page_size: config.page_size,
            follow_page_size: config.follow_page_size,
            poll_interval: config.metrics_poll_interval(),
            follow: false,
        }
    }
}

/// Point-in-time copy of a follower's state.
#[derive(Debug, Clone, Serialize)]
pub struct FollowSnapshot {
    pub training_id: String,
    pub status: ViewStatus,
    pub following: bool,
    pub board: ChartBoard,
}

/// Commands sent to the background follow task.
enum FollowCommand {
    Snapshot(oneshot::Sender<FollowSnapshot>),
    SetFollow(bool),
    /// Fetch the next page now, outside the polling schedule.
    Refresh(oneshot::Sender<Result<PageSummary>>),
    Stop(oneshot::Sender<FollowSnapshot>),
}

/// Handle to a running follow task.
pub struct Follower {
    sender: mpsc::UnboundedSender<FollowCommand>,
    updates: watch::Receiver<FollowSnapshot>,
    training_id: String,
}

impl Follower {
    /// Start following `training_id`. Must be called within a tokio runtime.
    pub fn spawn(
        source: Arc<dyn MetricsSource>,
        training_id: impl Into<String>,
        options: FollowOptions,
        bus: EventBus,
    ) -> Self {
        let training_id = training_id.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = FollowState::new(training_id.clone(), options.follow, bus);
        let (publisher, updates) = watch::channel(state.snapshot());

        info!(training = %training_id, follow = options.follow, "Follower started");
        tokio::spawn(follow_task(receiver, source, state, publisher, options));

        Self {
            sender,
            updates,
            training_id,
        }
    }

    pub fn training_id(&self) -> &str {
        &self.training_id
    }

    /// Snapshots pushed by this follower after each fetch that changed its
    /// charts or status. Closed once the task stops.
    pub fn updates(&self) -> watch::Receiver<FollowSnapshot> {
        self.updates.clone()
    }

    pub async fn snapshot(&self) -> Result<FollowSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(FollowCommand::Snapshot(tx))?;
        rx.await.map_err(|_| DashError::ChannelClosed)
    }

    /// Turn polling on or off. Data already fetched is kept either way.
    pub fn set_follow(&self, follow: bool) -> Result<()> {
        self.send(FollowCommand::SetFollow(follow))
    }

    pub async fn refresh(&self) -> Result<PageSummary> {
        let (tx, rx) = oneshot::channel();
        self.send(FollowCommand::Refresh(tx))?;
        rx.await.map_err(|_| DashError::ChannelClosed)?
    }

    /// Stop the task and return its final state.
    pub async fn stop(self) -> Result<FollowSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(FollowCommand::Stop(tx))?;
        rx.await.map_err(|_| DashError::ChannelClosed)
    }

    fn send(&self, cmd: FollowCommand) -> Result<()> {
        self.sender.send(cmd).map_err(|_| DashError::ChannelClosed)
    }
}

// ─── Background follow task ──────────────────────────────────────────────────

struct FollowState {
    training_id: String,
    board: ChartBoard,
    status: ViewStatus,
    following: bool,
    bus: EventBus,
}

impl FollowState {
    fn new(training_id: String, following: bool, bus: EventBus) -> Self {
        Self {
            training_id,
            board: ChartBoard::new(),
            status: ViewStatus::Loading,
            following,
            bus,
        }
    }

    fn snapshot(&self) -> FollowSnapshot {
        FollowSnapshot {
            training_id: self.training_id.clone(),
            status: self.status.clone(),
            following: self.following,
            board: self.board.clone(),
        }
    }

    fn settled_status(&self) -> ViewStatus {
        if self.following {
            ViewStatus::Following
        } else {
            ViewStatus::Ready
        }
    }

    fn set_following(&mut self, following: bool) {
        if self.following == following {
            return;
        }
        self.following = following;
        if !self.status.is_failed() || following {
            self.status = self.settled_status();
        }
        self.bus.publish(DashboardEvent::FollowChanged {
            training_id: self.training_id.clone(),
            following,
        });
    }

    fn fetch(&mut self, source: &dyn MetricsSource, pagesize: usize) -> Result<PageSummary> {
        match source.fetch_page(&self.training_id, self.board.position(), pagesize) {
            Ok(page) => {
                let summary = self.board.ingest_page(&page);
                self.status = self.settled_status();
                if summary.records > 0 {
                    self.bus.publish(DashboardEvent::ChartsUpdated {
                        training_id: self.training_id.clone(),
                        position: self.board.position(),
                        summary,
                    });
                }
                Ok(summary)
            }
            Err(e) => {
                warn!(training = %self.training_id, "Failed to fetch metrics: {}", e);
                self.status = ViewStatus::Failed(e.to_string());
                self.set_following(false);
                self.bus.publish(DashboardEvent::FetchFailed {
                    training_id: self.training_id.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// Fetch a page and push a snapshot when anything visible changed.
fn fetch_and_push(
    state: &mut FollowState,
    source: &dyn MetricsSource,
    pagesize: usize,
    publisher: &watch::Sender<FollowSnapshot>,
) -> Result<PageSummary> {
    let before = (state.following, state.status.clone());
    let result = state.fetch(source, pagesize);
    let changed = match &result {
        Ok(summary) => summary.records > 0 || before != (state.following, state.status.clone()),
        Err(_) => true,
    };
    if changed {
        publisher.send_replace(state.snapshot());
    }
    result
}

async fn follow_task(
    mut receiver: mpsc::UnboundedReceiver<FollowCommand>,
    source: Arc<dyn MetricsSource>,
    mut state: FollowState,
    publisher: watch::Sender<FollowSnapshot>,
    options: FollowOptions,
) {
    // the first page is always pushed, even when empty
    let _ = state.fetch(source.as_ref(), options.page_size);
    publisher.send_replace(state.snapshot());

    let mut ticker = interval(options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            // Prioritize incoming commands
            biased;

            cmd = receiver.recv() => {
                match cmd {
                    None => break,
                    Some(FollowCommand::Snapshot(reply)) => {
                        let _ = reply.send(state.snapshot());
                    }
                    Some(FollowCommand::SetFollow(follow)) => {
                        if follow != state.following {
                            if follow {
                                ticker.reset();
                            }
                            state.set_following(follow);
                            publisher.send_replace(state.snapshot());
                        }
                    }
                    Some(FollowCommand::Refresh(reply)) => {
                        let result = fetch_and_push(
                            &mut state,
                            source.as_ref(),
                            options.follow_page_size,
                            &publisher,
                        );
                        let _ = reply.send(result);
                    }
                    Some(FollowCommand::Stop(reply)) => {
                        state.set_following(false);
                        let last = state.snapshot();
                        publisher.send_replace(last.clone());
                        let _ = reply.send(last);
                        break;
                    }
                }
            }

            _ = ticker.tick(), if state.following => {
                let _ = fetch_and_push(&mut state, source.as_ref(), options.follow_page_size, &publisher);
            }
        }
    }

    info!(training = %state.training_id, position = state.board.position(), "Follower stopped");
}
