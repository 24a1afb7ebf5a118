//! Registry of in-flight client-side jobs (scan watches, rescans, audits).
//! Cancelling a job only stops local polling and further calls; work already
//! handed to the gateway keeps running there.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::progress::{ProgressView, StepView};

const FINISHED_JOB_TTL_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scan,
    Rescan,
    Audit,
}

impl JobKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scan" => Some(JobKind::Scan),
            "rescan" => Some(JobKind::Rescan),
            "audit" => Some(JobKind::Audit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Rescan => "rescan",
            JobKind::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub kind: JobKind,
    pub user_id: String,
    pub subject: String,
}

impl JobKey {
    pub fn new(kind: JobKind, user_id: &str, subject: &str) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            subject: subject.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Running,
    Completed,
    TimedOut,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self != JobState::Running
    }
}

/// What the polling script sees for one job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub kind: JobKind,
    pub subject: String,
    pub state: JobState,
    pub percent: u32,
    pub label: String,
    pub elapsed_secs: u64,
    pub steps: Vec<StepView>,
    pub failures: Vec<String>,
    pub message: Option<String>,
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to one job: its cancellation token plus its live snapshot.
#[derive(Debug, Clone)]
pub struct JobHandle {
    token: CancellationToken,
    snapshot: Arc<Mutex<JobSnapshot>>,
}

impl JobHandle {
    fn new(key: &JobKey, label: &str) -> Self {
        Self {
            token: CancellationToken::new(),
            snapshot: Arc::new(Mutex::new(JobSnapshot {
                kind: key.kind,
                subject: key.subject.clone(),
                state: JobState::Running,
                percent: 0,
                label: label.to_string(),
                elapsed_secs: 0,
                steps: Vec::new(),
                failures: Vec::new(),
                message: None,
                result: None,
                started_at: Utc::now(),
                finished_at: None,
            })),
        }
    }

    /// A handle not tracked by any registry.
    pub fn detached(kind: JobKind, subject: &str) -> Self {
        Self::new(&JobKey::new(kind, "", subject), "")
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut JobSnapshot)) {
        let mut snapshot = lock(&self.snapshot);
        if snapshot.state == JobState::Running {
            f(&mut snapshot);
        }
    }

    pub fn set_progress(&self, percent: u32, label: impl Into<String>) {
        let label = label.into();
        self.update(|s| {
            s.percent = percent.max(s.percent);
            s.label = label;
        });
    }

    pub fn apply_view(&self, view: &ProgressView) {
        self.update(|s| {
            s.percent = view.percent.max(s.percent);
            s.label = view.label.clone();
            s.elapsed_secs = view.elapsed_secs;
            s.steps = view.steps.clone();
        });
    }

    pub fn record_failure(&self, failure: impl Into<String>) {
        let failure = failure.into();
        self.update(|s| s.failures.push(failure));
    }

    /// Moves the job to a terminal state; later updates are ignored.
    pub fn finish(&self, state: JobState, message: Option<String>) {
        let mut snapshot = lock(&self.snapshot);
        if snapshot.state.is_terminal() {
            return;
        }
        snapshot.state = state;
        snapshot.message = message;
        snapshot.finished_at = Some(Utc::now());
        if state == JobState::Completed {
            snapshot.percent = 100;
        }
    }

    pub fn finish_with(&self, result: Value, message: Option<String>) {
        self.update(|s| s.result = Some(result));
        self.finish(JobState::Completed, message);
    }

    fn cancel(&self) {
        self.token.cancel();
        self.finish(JobState::Cancelled, Some("Cancelled".to_string()));
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job; an earlier job under the same key is cancelled.
    pub fn start(&self, key: JobKey, label: &str) -> JobHandle {
        self.prune_finished(Utc::now());
        let handle = JobHandle::new(&key, label);
        let mut jobs = lock(&self.jobs);
        if let Some(previous) = jobs.insert(key.clone(), handle.clone()) {
            info!(kind = key.kind.as_str(), subject = %key.subject, "Replacing running job");
            previous.cancel();
        } else {
            debug!(kind = key.kind.as_str(), subject = %key.subject, "Job started");
        }
        handle
    }

    /// Current snapshot. A finished job is handed out once and then forgotten.
    pub fn get(&self, key: &JobKey) -> Option<JobSnapshot> {
        let mut jobs = lock(&self.jobs);
        let snapshot = jobs.get(key).map(JobHandle::snapshot)?;
        if snapshot.state.is_terminal() {
            jobs.remove(key);
            debug!(kind = key.kind.as_str(), subject = %key.subject, "Finished job collected");
        }
        Some(snapshot)
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        lock(&self.jobs)
            .get(key)
            .map(|h| h.snapshot().state == JobState::Running)
            .unwrap_or(false)
    }

    /// Drops finished jobs nobody came back for.
    pub fn prune_finished(&self, now: DateTime<Utc>) -> usize {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, handle| match handle.snapshot().finished_at {
            Some(at) => now - at < Duration::seconds(FINISHED_JOB_TTL_SECS),
            None => true,
        });
        before - jobs.len()
    }

    /// Cancels and forgets the job. Returns whether one existed.
    pub fn cancel(&self, key: &JobKey) -> bool {
        match lock(&self.jobs).remove(key) {
            Some(handle) => {
                info!(kind = key.kind.as_str(), subject = %key.subject, "Job cancelled");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in lock(&self.jobs).drain() {
            handle.cancel();
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
