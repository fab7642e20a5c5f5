//! Runs a [`Reporter`] on its own task.
//!
//! The reporter keeps mutable session state, so it has exactly one owner: a
//! task that drains a command channel and periodically runs the dropdown
//! idle reset. Hosts talk to it through a cloneable [`ReporterHandle`].
//!
//! Signals and actions are timestamped by the handle when they are sent, so
//! a backed-up channel does not squeeze clicks into the rage-click window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::reporter::{Reporter, Signal, UserAction};
use super::{EventType, PageContext, Transport};
use crate::utils::Clock;

/// Buffer size for the command channel
const CHANNEL_BUFFER_SIZE: usize = 64;

/// How often the dropdown idle reset runs.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum Command {
    Signal(Signal, DateTime<Utc>),
    Action(UserAction, DateTime<Utc>),
    Track(EventType, Option<String>),
    SetPage(PageContext),
    Stats(oneshot::Sender<ReporterStats>),
    Flush(oneshot::Sender<()>),
}

/// Point-in-time view of the reporter's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterStats {
    pub session_id: String,
    pub event_count: u64,
    pub dropdown_clicks: u32,
    pub dropdown_changes: u32,
}

#[derive(Clone)]
pub struct ReporterHandle {
    tx: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
}

impl ReporterHandle {
    async fn send(&self, command: Command) {
        if let Err(e) = self.tx.send(command).await {
            error!(error = %e, "Failed to reach telemetry reporter - channel closed");
        }
    }

    pub async fn signal(&self, signal: Signal) {
        let at = self.clock.now();
        self.send(Command::Signal(signal, at)).await;
    }

    pub async fn action(&self, action: UserAction) {
        let at = self.clock.now();
        self.send(Command::Action(action, at)).await;
    }

    pub async fn track(&self, event_type: EventType, value: Option<&str>) {
        self.send(Command::Track(event_type, value.map(str::to_string)))
            .await;
    }

    pub async fn set_page(&self, page: PageContext) {
        self.send(Command::SetPage(page)).await;
    }

    /// Returns `None` once the reporter task has stopped.
    pub async fn stats(&self) -> Option<ReporterStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx)).await;
        rx.await.ok()
    }

    /// Wait until everything tracked so far has been handed to the transport.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx)).await;
        if rx.await.is_err() {
            debug!("Reporter stopped before flush completed");
        }
    }
}

/// Move the reporter onto a task. The task ends, after a final flush, when
/// every handle has been dropped.
pub fn spawn_reporter<T, C>(reporter: Reporter<T, C>) -> (ReporterHandle, JoinHandle<()>)
where
    T: Transport,
    C: Clock + Clone + 'static,
{
    spawn_reporter_with_interval(reporter, IDLE_CHECK_INTERVAL)
}

pub fn spawn_reporter_with_interval<T, C>(
    reporter: Reporter<T, C>,
    idle_check: Duration,
) -> (ReporterHandle, JoinHandle<()>)
where
    T: Transport,
    C: Clock + Clone + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let clock: Arc<dyn Clock> = Arc::new(reporter.clock().clone());
    let task = tokio::spawn(run(reporter, rx, idle_check));
    (ReporterHandle { tx, clock }, task)
}

async fn run<T, C>(mut reporter: Reporter<T, C>, mut rx: mpsc::Receiver<Command>, idle_check: Duration)
where
    T: Transport,
    C: Clock,
{
    info!(session = %reporter.session_id(), "Telemetry reporter task started");
    let mut ticker = tokio::time::interval(idle_check);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Signal(signal, at) => reporter.on_signal_at(signal, at),
                    Command::Action(action, at) => reporter.record_action_at(action, at),
                    Command::Track(event_type, value) => reporter.track(event_type, value.as_deref()),
                    Command::SetPage(page) => reporter.set_page(page),
                    Command::Stats(reply) => {
                        let (dropdown_clicks, dropdown_changes) = reporter.dropdown_counts();
                        let _ = reply.send(ReporterStats {
                            session_id: reporter.session_id().to_string(),
                            event_count: reporter.event_count(),
                            dropdown_clicks,
                            dropdown_changes,
                        });
                    }
                    Command::Flush(reply) => {
                        reporter.flush().await;
                        let _ = reply.send(());
                    }
                }
            }
            _ = ticker.tick() => reporter.reset_dropdown_tracking(),
        }
    }

    reporter.flush().await;
    info!(
        session = %reporter.session_id(),
        events = reporter.event_count(),
        "Telemetry reporter task stopped"
    );
}
