//! Task resources and the convergence loop that waits on them.
//!
//! # Design
//! The appliance answers long-running calls with a task resource instead of
//! the final result. `TaskMonitor::converge` either hands that snapshot back
//! untouched (asynchronous mode) or re-reads the task at its own URI on a
//! fixed interval until it reaches a terminal state or the timeout elapses.
//!
//! The loop sleeps on the calling thread and keeps no shared state, so
//! concurrent dispatches polling different tasks never contend with each
//! other. Fetching is abstracted behind `TaskSource` so the loop can be
//! driven by the dispatcher in production and by scripted sources in tests.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result, SdkError};

/// Default interval between two task fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Lifecycle state reported by the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskState {
    New,
    Pending,
    Starting,
    Running,
    Suspended,
    Stopping,
    Completed,
    Terminated,
    Killed,
    Error,
    Warning,
    Interrupted,
    #[default]
    #[serde(other)]
    Unknown,
}

/// How a terminal `Warning` state is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningPolicy {
    /// Warning is a failure carrying the partial result.
    #[default]
    Fail,
    /// Warning counts as success.
    Succeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    InFlight,
    Succeeded,
    Failed,
}

impl TaskState {
    fn progress(self, policy: WarningPolicy) -> Progress {
        match self {
            TaskState::Completed | TaskState::Terminated => Progress::Succeeded,
            TaskState::Error | TaskState::Killed | TaskState::Interrupted => Progress::Failed,
            TaskState::Warning => match policy {
                WarningPolicy::Fail => Progress::Failed,
                WarningPolicy::Succeed => Progress::Succeeded,
            },
            _ => Progress::InFlight,
        }
    }

    /// Whether polling stops at this state, regardless of policy.
    pub fn is_terminal(self) -> bool {
        self.progress(WarningPolicy::Fail) != Progress::InFlight
    }
}

/// One error entry reported by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskError {
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub recommended_actions: Vec<String>,
}

/// The resource a task operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssociatedResource {
    pub resource_uri: Option<String>,
    pub resource_name: Option<String>,
    pub resource_category: Option<String>,
    pub association_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskProgress {
    pub status_update: Option<String>,
    pub timestamp: Option<String>,
}

/// Snapshot of a server-side task. The client only ever reads these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskResource {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub uri: Option<String>,
    pub name: Option<String>,
    pub task_state: TaskState,
    pub task_status: Option<String>,
    pub state_reason: Option<String>,
    pub percent_complete: Option<u32>,
    pub task_errors: Vec<TaskError>,
    pub associated_resource: Option<AssociatedResource>,
    pub progress_updates: Vec<TaskProgress>,
    pub task_output: Vec<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

/// Whether the caller waits for the task to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceMode {
    #[default]
    Sync,
    Async,
}

/// Convergence settings supplied with a task-returning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    pub timeout: Duration,
    pub mode: ConvergenceMode,
}

impl TaskOptions {
    pub fn sync(timeout: Duration) -> Self {
        Self {
            timeout,
            mode: ConvergenceMode::Sync,
        }
    }

    pub fn asynchronous() -> Self {
        Self {
            mode: ConvergenceMode::Async,
            ..Self::default()
        }
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self::sync(crate::http::DEFAULT_TIMEOUT)
    }
}

/// Something that can re-read a task at its URI.
pub trait TaskSource {
    fn fetch_task(&self, uri: &str) -> Result<TaskResource>;
}

/// Polls tasks to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMonitor {
    interval: Duration,
    warning_policy: WarningPolicy,
}

impl Default for TaskMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, WarningPolicy::default())
    }
}

impl TaskMonitor {
    pub fn new(interval: Duration, warning_policy: WarningPolicy) -> Self {
        Self {
            interval,
            warning_policy,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn warning_policy(&self) -> WarningPolicy {
        self.warning_policy
    }

    /// Resolve `task` according to `mode`.
    ///
    /// In `Sync` mode this blocks the calling thread until the task is
    /// terminal, returning the final snapshot on success, `TaskFailed` on a
    /// failure state, or `TaskTimeout` once `timeout` has elapsed.
    pub fn converge<S>(
        &self,
        source: &S,
        task: TaskResource,
        mode: ConvergenceMode,
        timeout: Duration,
    ) -> Result<TaskResource>
    where
        S: TaskSource + ?Sized,
    {
        if mode == ConvergenceMode::Async {
            debug!(task_uri = ?task.uri, "returning task without waiting");
            return Ok(task);
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut task = task;

        loop {
            match task.task_state.progress(self.warning_policy) {
                Progress::Succeeded => {
                    info!(
                        task_uri = ?task.uri,
                        state = ?task.task_state,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "task finished"
                    );
                    return Ok(task);
                }
                Progress::Failed => {
                    warn!(
                        task_uri = ?task.uri,
                        state = ?task.task_state,
                        errors = task.task_errors.len(),
                        "task failed"
                    );
                    return Err(ErrorKind::TaskFailed {
                        task: Box::new(task),
                    }
                    .into());
                }
                Progress::InFlight => {}
            }

            let uri = task.uri.clone().ok_or_else(SdkError::no_response)?;

            let now = Instant::now();
            if now >= deadline {
                warn!(task_uri = %uri, state = ?task.task_state, "task timed out");
                return Err(ErrorKind::TaskTimeout {
                    task_uri: uri,
                    timeout,
                    last_state: task.task_state,
                }
                .into());
            }

            thread::sleep(self.interval.min(deadline - now));
            task = source.fetch_task(&uri)?;
            info!(
                task_uri = %uri,
                state = ?task.task_state,
                percent_complete = task.percent_complete.unwrap_or_default(),
                "task progress"
            );
        }
    }
}
