//! Content-addressed task/result queue.
//!
//! A task id is a hash of the task name and its canonicalized input, so the
//! same logical call always lands on the same slot. A result, once written, is
//! final: the first `complete` wins and later ones only report whether they
//! agreed with it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::agent::{local_host, require_actor, validate_id};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Volatile knobs that never take part in the task id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `tasks/pending/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub schema_version: u32,
    pub id: String,
    pub task_name: String,
    pub canonical_input: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub caller: String,
    /// Where the first submission came from, `host:pid`.
    pub invocation: String,
}

/// `tasks/results/<id>.json`. Permanently authoritative once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub schema_version: u32,
    pub id: String,
    pub task_name: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Pending,
    AlreadyPending,
    Resolved,
}

impl std::fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AlreadyPending => write!(f, "already_pending"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitReceipt {
    pub id: String,
    pub status: SubmitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompleteOutcome {
    Ok { result: TaskResult },
    /// A result already existed. `conflict` is set when its content differs
    /// from what this call tried to write; the existing result still stands.
    AlreadyResolved { result: TaskResult, conflict: bool },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Pending { task: Task },
    Resolved { result: TaskResult },
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Recursively sort object keys so that key order never changes the id.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 over `task_name`, a NUL separator and the compact
/// canonical JSON of `input`.
pub fn task_id(task_name: &str, input: &Value) -> String {
    let canonical = canonicalize(input);
    let mut hasher = Sha256::new();
    hasher.update(task_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Task and result files under `<root>/tasks/`. No leader is required.
pub struct TaskQueue {
    pending_dir: PathBuf,
    results_dir: PathBuf,
    events: EventLog,
}

impl TaskQueue {
    pub fn open(root: &Path) -> Self {
        let dir = root.join("tasks");
        Self {
            pending_dir: dir.join("pending"),
            results_dir: dir.join("results"),
            events: EventLog::open(root),
        }
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.pending_dir.join(format!("{id}.json"))
    }

    fn result_path(&self, id: &str) -> PathBuf {
        self.results_dir.join(format!("{id}.json"))
    }

    fn read_task(&self, id: &str) -> Result<Option<Task>> {
        validate_id(id)?;
        atomic::read_record_opt(&self.task_path(id))
    }

    pub fn get_result(&self, id: &str) -> Result<Option<TaskResult>> {
        validate_id(id)?;
        atomic::read_record_opt(&self.result_path(id))
    }

    /// Submit work. An existing result short-circuits to `Resolved`; an
    /// existing task yields `AlreadyPending` without writing anything.
    pub fn submit(
        &self,
        task_name: &str,
        canonical_input: &Value,
        options: TaskOptions,
        caller: &str,
    ) -> Result<SubmitReceipt> {
        let caller = require_actor(caller)?;
        let task_name = task_name.trim();
        if task_name.is_empty() {
            return Err(HiveError::InvalidInput("task name must be non-empty".into()));
        }
        let id = task_id(task_name, canonical_input);

        if let Some(result) = self.get_result(&id)? {
            self.events
                .record(Component::Task, "submit", caller, &id, "resolved");
            return Ok(SubmitReceipt {
                id,
                status: SubmitStatus::Resolved,
                content: Some(result.content),
            });
        }

        let task = Task {
            schema_version: SCHEMA_VERSION,
            id: id.clone(),
            task_name: task_name.to_string(),
            canonical_input: canonicalize(canonical_input),
            created_at: Utc::now(),
            options,
            claimed_by: None,
            claimed_at: None,
            caller: caller.to_string(),
            invocation: format!("{}:{}", local_host(), std::process::id()),
        };
        let status = if atomic::write_json_new(&self.task_path(&id), &task)? {
            SubmitStatus::Pending
        } else {
            SubmitStatus::AlreadyPending
        };
        self.events
            .record(Component::Task, "submit", caller, &id, &status.to_string());
        Ok(SubmitReceipt {
            id,
            status,
            content: None,
        })
    }

    /// Advisory bookkeeping: records who is working on a task. Later claims
    /// simply overwrite earlier ones.
    pub fn claim(&self, id: &str, actor: &str) -> Result<Task> {
        let actor = require_actor(actor)?;
        let mut task = self
            .read_task(id)?
            .ok_or_else(|| HiveError::TaskNotFound(id.to_string()))?;
        if let Some(previous) = &task.claimed_by
            && previous != actor
        {
            tracing::debug!(id, previous = %previous, actor, "task re-claimed");
        }
        task.claimed_by = Some(actor.to_string());
        task.claimed_at = Some(Utc::now());
        atomic::write_json_atomic(&self.task_path(id), &task)?;
        self.events.record(Component::Task, "claim", actor, id, "ok");
        Ok(task)
    }

    /// Record the outcome of a task. First writer wins, always.
    pub fn complete(
        &self,
        id: &str,
        content: Value,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<CompleteOutcome> {
        let actor = require_actor(actor)?;
        let task = self
            .read_task(id)?
            .ok_or_else(|| HiveError::TaskNotFound(id.to_string()))?;

        let result = TaskResult {
            schema_version: SCHEMA_VERSION,
            id: id.to_string(),
            task_name: task.task_name,
            completed_at: Utc::now(),
            completed_by: Some(actor.to_string()),
            content,
            notes: notes.map(str::to_string),
        };
        if atomic::write_json_new(&self.result_path(id), &result)? {
            self.events.record(Component::Task, "complete", actor, id, "ok");
            return Ok(CompleteOutcome::Ok { result });
        }

        let existing = self
            .get_result(id)?
            .ok_or_else(|| HiveError::TaskNotFound(id.to_string()))?;
        let conflict = existing.content != result.content;
        if conflict {
            tracing::warn!(
                id,
                actor,
                original_by = existing.completed_by.as_deref().unwrap_or("-"),
                "conflicting completion ignored; original result stands"
            );
            self.events
                .record(Component::Task, "complete", actor, id, "result_conflict");
        } else {
            self.events
                .record(Component::Task, "complete", actor, id, "already_resolved");
        }
        Ok(CompleteOutcome::AlreadyResolved {
            result: existing,
            conflict,
        })
    }

    pub fn poll(&self, id: &str) -> Result<PollOutcome> {
        if let Some(result) = self.get_result(id)? {
            return Ok(PollOutcome::Resolved { result });
        }
        match self.read_task(id)? {
            Some(task) => Ok(PollOutcome::Pending { task }),
            None => Err(HiveError::TaskNotFound(id.to_string())),
        }
    }

    /// Tasks without a result, oldest first.
    pub fn list_pending(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = atomic::read_records::<Task>(&self.pending_dir)?
            .into_iter()
            .filter(|t| !self.result_path(&t.id).exists())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }
}
