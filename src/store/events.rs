use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::atomic::SCHEMA_VERSION;

/// Subsystem that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Presence,
    Lease,
    ScopeLock,
    Messaging,
    Request,
    Task,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Lease => write!(f, "lease"),
            Self::ScopeLock => write!(f, "scope_lock"),
            Self::Messaging => write!(f, "messaging"),
            Self::Request => write!(f, "request"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub component: Component,
    pub op: String,
    pub actor: String,
    pub ref_id: String,
    pub outcome: String,
}

/// Append-only audit log of state-changing calls.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn open(root: &Path) -> Self {
        Self {
            path: root.join("events.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        // One write through an O_APPEND handle keeps concurrent lines whole.
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Record an event. Best effort: a failed append is logged, never returned,
    /// so the audit trail cannot fail the operation it describes.
    pub fn record(&self, component: Component, op: &str, actor: &str, ref_id: &str, outcome: &str) {
        let event = Event {
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            component,
            op: op.to_string(),
            actor: actor.to_string(),
            ref_id: ref_id.to_string(),
            outcome: outcome.to_string(),
        };
        if let Err(err) = self.append(&event) {
            tracing::warn!(%component, op, ref_id, "failed to append event: {err}");
        }
    }

    /// Read events, optionally limited to the last N. Undecodable lines are skipped.
    pub fn read(&self, limit: Option<usize>) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = fs::read_to_string(&self.path)?;
        let mut events: Vec<Event> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Event>(l).ok())
            .filter(|e| e.schema_version == SCHEMA_VERSION)
            .collect();
        if let Some(n) = limit {
            let len = events.len();
            if len > n {
                events = events.split_off(len - n);
            }
        }
        Ok(events)
    }
}
