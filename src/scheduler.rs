use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::db::{self, Store};
use crate::timeparse::canonical;

/// Work the scheduler drives. Errors are logged, never propagated to callers.
#[async_trait]
pub trait ScrapeJob: Send + Sync {
    async fn run(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Paused,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<RunState> {
        match s {
            "idle" => Some(RunState::Idle),
            "running" => Some(RunState::Running),
            "paused" => Some(RunState::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the persisted scheduler row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: RunState,
    #[serde(rename = "isJobRunning")]
    pub is_running: bool,
    pub interval_minutes: i64,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler state store failed: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("invalid run interval {0:?}")]
    Interval(Duration),
}

/// Handle to the single scheduler of this process.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    store: Store,
    job: Arc<dyn ScrapeJob>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    interval_delta: TimeDelta,
    /// Held for every transition and for run admission and bookkeeping.
    control: Mutex<Control>,
    in_flight: AtomicBool,
}

#[derive(Default)]
struct Control {
    timer: Option<CancellationToken>,
}

impl Scheduler {
    /// Recover persisted state and build the scheduler. A state left
    /// `running` by a previous process comes back as `idle`.
    pub fn boot(
        store: Store,
        job: Arc<dyn ScrapeJob>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Result<Scheduler, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::Interval(interval));
        }
        let interval_delta =
            TimeDelta::from_std(interval).map_err(|_| SchedulerError::Interval(interval))?;
        let minutes = (interval.as_secs() / 60) as i64;

        let previous = store.with(|c| db::recover_scheduler_state(c, minutes))?;
        if previous == RunState::Running {
            info!("scheduler was running at shutdown; reset to idle");
        } else {
            debug!(state = %previous, "scheduler state recovered");
        }

        Ok(Scheduler {
            shared: Arc::new(Shared {
                store,
                job,
                clock,
                interval,
                interval_delta,
                control: Mutex::new(Control::default()),
                in_flight: AtomicBool::new(false),
            }),
        })
    }

    pub fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        Ok(self.shared.load()?)
    }

    /// idle or paused → running, with an immediate run. No-op when running.
    pub async fn start(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.shared
            .activate(&[RunState::Idle, RunState::Paused], "start")
            .await
    }

    /// paused → running, with an immediate run. No-op otherwise.
    pub async fn resume(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.shared.activate(&[RunState::Paused], "resume").await
    }

    /// running or paused → idle. An in-flight run finishes normally.
    pub async fn stop(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.shared
            .deactivate(&[RunState::Running, RunState::Paused], RunState::Idle, "stop")
            .await
    }

    /// running → paused. No-op otherwise.
    pub async fn pause(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.shared
            .deactivate(&[RunState::Running], RunState::Paused, "pause")
            .await
    }

    /// Cancel the pending timer without touching persisted state.
    pub async fn shutdown(&self) {
        if let Some(timer) = self.shared.control.lock().await.timer.take() {
            timer.cancel();
        }
    }
}

impl Shared {
    fn load(&self) -> Result<SchedulerStatus> {
        self.store.with(db::load_scheduler_state)
    }

    fn next_run_at(&self) -> String {
        canonical(&(self.clock.now() + self.interval_delta))
    }

    async fn activate(
        self: &Arc<Self>,
        from: &[RunState],
        command: &str,
    ) -> Result<SchedulerStatus, SchedulerError> {
        let mut control = self.control.lock().await;
        let current = self.load()?;
        if !from.contains(&current.state) {
            debug!(command, state = %current.state, "transition ignored");
            return Ok(current);
        }

        let next = self.next_run_at();
        self.store
            .with(|c| db::set_run_state(c, RunState::Running, Some(&next)))?;
        self.arm(&mut control);
        drop(control);
        info!(command, from = %current.state, next_run_at = %next, "scheduler running");

        self.trigger();
        Ok(self.load()?)
    }

    async fn deactivate(
        &self,
        from: &[RunState],
        to: RunState,
        command: &str,
    ) -> Result<SchedulerStatus, SchedulerError> {
        let mut control = self.control.lock().await;
        let current = self.load()?;
        if !from.contains(&current.state) {
            debug!(command, state = %current.state, "transition ignored");
            return Ok(current);
        }

        self.store.with(|c| db::set_run_state(c, to, None))?;
        if let Some(timer) = control.timer.take() {
            timer.cancel();
        }
        info!(command, from = %current.state, to = %to, "scheduler state changed");
        Ok(self.load()?)
    }

    /// Replace any pending timer with a fresh one-shot firing after one interval.
    fn arm(self: &Arc<Self>, control: &mut Control) {
        if let Some(old) = control.timer.take() {
            old.cancel();
        }
        let token = CancellationToken::new();
        control.timer = Some(token.clone());

        let shared = Arc::clone(self);
        let delay = self.interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => shared.run_guarded().await,
            }
        });
    }

    fn trigger(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run_guarded().await });
    }

    /// Single-flight run. Dropped when another run is in flight or the
    /// scheduler has left `running` since it was requested.
    async fn run_guarded(self: &Arc<Self>) {
        {
            let _control = self.control.lock().await;
            match self.load() {
                Ok(s) if s.state == RunState::Running => {}
                Ok(s) => {
                    debug!(state = %s.state, "run dropped: scheduler not running");
                    return;
                }
                Err(e) => {
                    error!("run dropped: cannot read scheduler state: {:#}", e);
                    return;
                }
            }
            if self.in_flight.swap(true, Ordering::SeqCst) {
                debug!("run dropped: another run is in flight");
                return;
            }
            if let Err(e) = self.store.with(db::mark_job_started) {
                self.in_flight.store(false, Ordering::SeqCst);
                error!("run dropped: cannot persist run start: {:#}", e);
                return;
            }
        }

        info!("scheduled run started");
        let outcome = self.job.run().await;
        match &outcome {
            Ok(()) => info!("scheduled run finished"),
            Err(e) => error!("scheduled run failed: {:#}", e),
        }

        let mut control = self.control.lock().await;
        let now = self.clock.now();
        let last_run_at = outcome.is_ok().then(|| canonical(&now));
        // An unreadable state re-arms; the next admission check drops the run if needed.
        let still_running = match self.load() {
            Ok(s) => s.state == RunState::Running,
            Err(e) => {
                warn!("cannot read scheduler state after run, re-arming: {:#}", e);
                true
            }
        };
        let next_run_at = still_running.then(|| canonical(&(now + self.interval_delta)));

        if let Err(e) = self.store.with(|c| {
            db::mark_job_finished(c, last_run_at.as_deref(), next_run_at.as_deref())
        }) {
            error!("failed to persist run completion: {:#}", e);
        }
        if still_running {
            self.arm(&mut control);
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}
