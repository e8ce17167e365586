//! Polling of upstream asynchronous batch jobs.
//!
//! Upstream batch APIs (bulk copy/move/delete) answer either with the finished per-entry
//! outcome or with an opaque job id. The id does not say which kind of operation it belongs to,
//! so [`JobPoller::check_status`] asks each registered [`JobKindProbe`] in priority order until
//! one recognizes it.
//!
//! Terminal states (`complete`, `failed`) are remembered per job id; later polls return the
//! stored result without calling upstream again. All of this is in-memory and lost on restart.
//! Both the remembered results and the detected kinds are capped at
//! [`DEFAULT_CACHE_CAPACITY`] entries per poller; the oldest entry is dropped first, and a job
//! whose result was dropped is simply probed again.

use crate::error::ToolError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome for one entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Success { target: String },
    Failure { target: String, reason: String },
}

/// Aggregate per-entry result of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub entries: Vec<EntryOutcome>,
}

impl BatchReport {
    #[must_use]
    pub fn new(entries: Vec<EntryOutcome>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, EntryOutcome::Success { .. }))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// Human-readable summary listing every failure reason.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} succeeded, {} failed",
            self.succeeded(),
            self.failed()
        );
        for e in &self.entries {
            if let EntryOutcome::Failure { target, reason } = e {
                out.push_str(&format!("\n- {target}: {reason}"));
            }
        }
        out
    }
}

/// Opaque reference to an upstream asynchronous job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    /// Unknown until a probe recognizes the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl JobHandle {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
        }
    }
}

/// What a batch submission returned. Resolve with [`JobPoller::settle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSubmission {
    Complete(BatchReport),
    Pending(JobHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    InProgress,
    Complete(BatchReport),
    Failed { reason: String },
}

impl JobState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub kind: String,
    #[serde(flatten)]
    pub state: JobState,
}

/// Result of asking one kind about a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The id is not a job of this kind.
    NotThisKind,
    Status(JobState),
}

/// Status check for one job kind (e.g. `copy`).
///
/// Implementations must report an unrecognized id as `Ok(ProbeOutcome::NotThisKind)` and keep
/// `Err` for failures (network, auth, 5xx), so detection can tell the two apart.
#[async_trait]
pub trait JobKindProbe: Send + Sync {
    fn kind(&self) -> &str;
    async fn probe(&self, job_id: &str) -> Result<ProbeOutcome, ToolError>;
}

/// What to do when more than one kind claims the same id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Take the first kind in priority order.
    #[default]
    FirstMatch,
    /// Probe every kind and refuse ids claimed by more than one.
    Reject,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job '{job_id}' was not recognized by any job kind (tried: {})", .tried.join(", "))]
    Unrecognized { job_id: String, tried: Vec<String> },

    #[error("job '{job_id}' is claimed by several job kinds: {}", .kinds.join(", "))]
    Ambiguous { job_id: String, kinds: Vec<String> },

    #[error("checking job '{job_id}' as '{kind}' failed: {source}")]
    Probe {
        job_id: String,
        kind: String,
        #[source]
        source: ToolError,
    },

    #[error("job '{job_id}' still in progress after {polls} polls")]
    StillRunning { job_id: String, polls: u32 },

    #[error("job '{job_id}' ({kind}) failed: {reason}")]
    Failed {
        job_id: String,
        kind: String,
        reason: String,
    },
}

/// Per-poller cap on remembered terminal results and detected kinds.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Insertion-ordered map that drops its oldest entry once `capacity` is exceeded.
#[derive(Debug)]
struct BoundedMap<V> {
    capacity: usize,
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> BoundedMap<V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, key: &str, value: V) {
        if let Some(slot) = self.entries.get_mut(key) {
            *slot = value;
            return;
        }
        self.order.push_back(key.to_string());
        self.entries.insert(key.to_string(), value);
        self.evict();
    }

    /// Keeps an existing value; returns whichever value ends up stored.
    fn get_or_insert(&mut self, key: &str, value: V) -> V {
        if let Some(existing) = self.entries.get(key) {
            return existing.clone();
        }
        self.insert(key, value.clone());
        value
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(job_id = %oldest, "job cache full; dropped oldest entry");
        }
    }
}

pub struct JobPoller {
    probes: Vec<Arc<dyn JobKindProbe>>,
    policy: CollisionPolicy,
    pinned: RwLock<BoundedMap<usize>>,
    terminal: RwLock<BoundedMap<JobStatus>>,
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&str> = self.probes.iter().map(|p| p.kind()).collect();
        f.debug_struct("JobPoller")
            .field("kinds", &kinds)
            .field("policy", &self.policy)
            .field("remembered", &self.terminal.read().len())
            .finish_non_exhaustive()
    }
}

impl JobPoller {
    /// Probes are tried in the given order.
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn JobKindProbe>>) -> Self {
        Self {
            probes,
            policy: CollisionPolicy::default(),
            pinned: RwLock::new(BoundedMap::new(DEFAULT_CACHE_CAPACITY)),
            terminal: RwLock::new(BoundedMap::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    /// Cap on remembered terminal results and detected kinds (at least 1).
    #[must_use]
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        Self {
            pinned: RwLock::new(BoundedMap::new(capacity)),
            terminal: RwLock::new(BoundedMap::new(capacity)),
            ..self
        }
    }

    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.kind().to_string()).collect()
    }

    /// Resolve the current state of `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Unrecognized`] if no kind knows the id, [`JobError::Ambiguous`] under
    /// [`CollisionPolicy::Reject`] when several do, and [`JobError::Probe`] when a probe fails.
    pub async fn check_status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        if let Some(done) = self.terminal.read().get(job_id) {
            return Ok(done.clone());
        }

        let pinned = self.pinned.read().get(job_id).copied();
        let (idx, state) = match pinned {
            Some(idx) => (idx, self.probe_pinned(job_id, idx).await?),
            None => self.detect(job_id).await?,
        };

        let status = JobStatus {
            job_id: job_id.to_string(),
            kind: self.probes[idx].kind().to_string(),
            state,
        };
        tracing::debug!(
            job_id,
            kind = %status.kind,
            terminal = status.state.is_terminal(),
            "job polled"
        );

        if status.state.is_terminal() {
            self.pinned.write().remove(job_id);
            // A concurrent poll may have stored the terminal result first; keep that one.
            return Ok(self.terminal.write().get_or_insert(job_id, status));
        }

        self.pinned.write().insert(job_id, idx);
        Ok(status)
    }

    /// Poll until the job reaches a terminal state or `max_polls` is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::StillRunning`] after `max_polls` non-terminal answers, or any error
    /// from [`JobPoller::check_status`].
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        interval: Duration,
        max_polls: u32,
    ) -> Result<JobStatus, JobError> {
        for poll in 1..=max_polls.max(1) {
            let status = self.check_status(job_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if poll < max_polls {
                tokio::time::sleep(interval).await;
            }
        }
        Err(JobError::StillRunning {
            job_id: job_id.to_string(),
            polls: max_polls.max(1),
        })
    }

    /// Turn a batch submission into its final report, polling when upstream deferred the work.
    ///
    /// A handle that already names its kind skips detection.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Failed`] when the job as a whole failed, or any error from
    /// [`JobPoller::wait_for_completion`].
    pub async fn settle(
        &self,
        submission: BatchSubmission,
        interval: Duration,
        max_polls: u32,
    ) -> Result<BatchReport, JobError> {
        let handle = match submission {
            BatchSubmission::Complete(report) => return Ok(report),
            BatchSubmission::Pending(handle) => handle,
        };
        if let Some(kind) = handle.kind.as_deref()
            && let Some(idx) = self.probes.iter().position(|p| p.kind() == kind)
            && self.terminal.read().get(&handle.id).is_none()
        {
            self.pinned.write().insert(&handle.id, idx);
        }

        let status = self
            .wait_for_completion(&handle.id, interval, max_polls)
            .await?;
        match status.state {
            JobState::Complete(report) => Ok(report),
            JobState::Failed { reason } => Err(JobError::Failed {
                job_id: status.job_id,
                kind: status.kind,
                reason,
            }),
            // wait_for_completion only returns terminal states.
            JobState::InProgress => Err(JobError::StillRunning {
                job_id: status.job_id,
                polls: max_polls.max(1),
            }),
        }
    }

    async fn probe_pinned(&self, job_id: &str, idx: usize) -> Result<JobState, JobError> {
        let probe = &self.probes[idx];
        match probe.probe(job_id).await {
            Ok(ProbeOutcome::Status(state)) => Ok(state),
            // The job was garbage-collected upstream.
            Ok(ProbeOutcome::NotThisKind) => {
                self.pinned.write().remove(job_id);
                Err(JobError::Unrecognized {
                    job_id: job_id.to_string(),
                    tried: vec![probe.kind().to_string()],
                })
            }
            Err(source) => Err(JobError::Probe {
                job_id: job_id.to_string(),
                kind: probe.kind().to_string(),
                source,
            }),
        }
    }

    async fn detect(&self, job_id: &str) -> Result<(usize, JobState), JobError> {
        let mut matched: Vec<(usize, JobState)> = Vec::new();
        for (idx, probe) in self.probes.iter().enumerate() {
            match probe.probe(job_id).await {
                Ok(ProbeOutcome::NotThisKind) => {}
                Ok(ProbeOutcome::Status(state)) => {
                    matched.push((idx, state));
                    if self.policy == CollisionPolicy::FirstMatch {
                        break;
                    }
                }
                Err(source) => {
                    return Err(JobError::Probe {
                        job_id: job_id.to_string(),
                        kind: probe.kind().to_string(),
                        source,
                    });
                }
            }
        }

        if matched.len() > 1 {
            return Err(JobError::Ambiguous {
                job_id: job_id.to_string(),
                kinds: matched
                    .iter()
                    .map(|(i, _)| self.probes[*i].kind().to_string())
                    .collect(),
            });
        }
        matched.pop().ok_or_else(|| JobError::Unrecognized {
            job_id: job_id.to_string(),
            tried: self.kinds(),
        })
    }
}

/// Render a poll outcome as tool-result content. Job failures are content, never errors.
#[must_use]
pub fn status_result(outcome: &Result<JobStatus, JobError>) -> CallToolResult {
    match outcome {
        Ok(status) => {
            let text = match &status.state {
                JobState::InProgress => format!(
                    "Job {} ({}) is still in progress; check again shortly.",
                    status.job_id, status.kind
                ),
                JobState::Complete(report) => format!(
                    "Job {} ({}) complete: {}",
                    status.job_id,
                    status.kind,
                    report.summary()
                ),
                JobState::Failed { reason } => format!(
                    "Job {} ({}) failed: {reason}",
                    status.job_id, status.kind
                ),
            };
            let mut result = CallToolResult::success(vec![Content::text(text)]);
            result.structured_content = serde_json::to_value(status).ok();
            if matches!(status.state, JobState::Failed { .. }) {
                result.is_error = Some(true);
            }
            result
        }
        Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
    }
}

/// Tool definition exposing [`JobPoller::check_status`] as `check_job_status`.
///
/// # Errors
///
/// Returns an error only if the built-in schema fails to compile.
pub fn job_status_tool(
    poller: Arc<JobPoller>,
) -> Result<crate::registry::ToolDefinition, crate::error::RegistryError> {
    let schema = json!({
        "type": "object",
        "properties": {
            "job_id": {
                "type": "string",
                "minLength": 1,
                "description": "Async job id returned by a batch operation"
            }
        },
        "required": ["job_id"],
        "additionalProperties": false
    });
    let description = format!(
        "Check the status of an asynchronous batch job ({}).",
        poller.kinds().join(", ")
    );
    crate::registry::ToolDefinition::new(
        "check_job_status",
        description,
        schema,
        move |args: JsonObject| {
            let poller = Arc::clone(&poller);
            async move {
                let job_id = args
                    .get("job_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let outcome = poller.check_status(&job_id).await;
                Ok::<_, ToolError>(status_result(&outcome))
            }
        },
    )
}
