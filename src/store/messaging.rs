use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{generate_id, require_actor, validate_id};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};
use crate::store::expiry_after;
use crate::store::presence::PresenceRegistry;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Immutable addressed note, `memos/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Memo {
    pub schema_version: u32,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Links externally defined work to one agent, `assignments/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub schema_version: u32,
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub memo_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemoView {
    #[serde(flatten)]
    pub memo: Memo,
    pub status: MemoStatus,
}

#[derive(Debug, Clone, Default)]
pub struct MemoFilter {
    pub to: Option<String>,
    pub from: Option<String>,
    pub related_task_id: Option<String>,
    pub include_expired: bool,
}

impl MemoFilter {
    fn matches(&self, memo: &Memo, expired: bool) -> bool {
        if expired && !self.include_expired {
            return false;
        }
        if let Some(to) = &self.to
            && !memo.to.iter().any(|r| r == to)
        {
            return false;
        }
        if let Some(from) = &self.from
            && &memo.from != from
        {
            return false;
        }
        if let Some(task) = &self.related_task_id
            && memo.related_task_id.as_ref() != Some(task)
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

/// Memos and assignments. Delivery means "the file exists"; recipients poll.
pub struct MessageStore {
    memos_dir: PathBuf,
    assignments_dir: PathBuf,
    presence: PresenceRegistry,
    events: EventLog,
}

impl MessageStore {
    pub fn open(root: &Path) -> Self {
        Self {
            memos_dir: root.join("memos"),
            assignments_dir: root.join("assignments"),
            presence: PresenceRegistry::open(root),
            events: EventLog::open(root),
        }
    }

    fn memo_path(&self, id: &str) -> PathBuf {
        self.memos_dir.join(format!("{id}.json"))
    }

    fn assignment_path(&self, id: &str) -> PathBuf {
        self.assignments_dir.join(format!("{id}.json"))
    }

    pub fn send_memo(
        &self,
        to: Vec<String>,
        subject: &str,
        body: &str,
        ttl: Option<Duration>,
        related_task_id: Option<&str>,
        from: &str,
    ) -> Result<Memo> {
        let from = require_actor(from)?;
        let mut to: Vec<String> = to
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let mut seen = HashSet::new();
        to.retain(|r| seen.insert(r.clone()));
        if to.is_empty() {
            return Err(HiveError::InvalidInput("memo needs at least one recipient".into()));
        }
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(HiveError::InvalidInput("memo subject must be non-empty".into()));
        }

        let now = Utc::now();
        let memo = Memo {
            schema_version: SCHEMA_VERSION,
            id: generate_id("memo"),
            created_at: now,
            from: from.to_string(),
            to,
            subject: subject.to_string(),
            body: body.to_string(),
            related_task_id: related_task_id.map(str::to_string),
            expires_at: ttl.map(|t| expiry_after(now, t)).transpose()?,
        };
        atomic::write_json_atomic(&self.memo_path(&memo.id), &memo)?;
        self.events
            .record(Component::Messaging, "send_memo", from, &memo.id, &memo.to.join(","));
        Ok(memo)
    }

    pub fn get_memo(&self, id: &str) -> Result<MemoView> {
        validate_id(id)?;
        let memo: Memo = atomic::read_record_opt(&self.memo_path(id))?
            .ok_or_else(|| HiveError::MemoNotFound(id.to_string()))?;
        let status = if memo.is_expired_at(Utc::now()) {
            MemoStatus::Expired
        } else {
            MemoStatus::Active
        };
        Ok(MemoView { memo, status })
    }

    /// Memos matching `filter`, oldest first.
    pub fn list_memos(&self, filter: &MemoFilter) -> Result<Vec<MemoView>> {
        let now = Utc::now();
        let mut memos: Vec<MemoView> = atomic::read_records::<Memo>(&self.memos_dir)?
            .into_iter()
            .filter_map(|memo| {
                let expired = memo.is_expired_at(now);
                filter.matches(&memo, expired).then(|| MemoView {
                    status: if expired {
                        MemoStatus::Expired
                    } else {
                        MemoStatus::Active
                    },
                    memo,
                })
            })
            .collect();
        memos.sort_by(|a, b| {
            a.memo
                .created_at
                .cmp(&b.memo.created_at)
                .then_with(|| a.memo.id.cmp(&b.memo.id))
        });
        Ok(memos)
    }

    /// Assign a task to an agent. The notifying memo is written first, so a
    /// failure can at worst leave a memo without an assignment, never an
    /// assignment nobody was told about.
    pub fn assign(
        &self,
        task_id: &str,
        agent_id: &str,
        note: Option<&str>,
        actor: &str,
    ) -> Result<Assignment> {
        let actor = require_actor(actor)?;
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(HiveError::InvalidInput("task id must be non-empty".into()));
        }
        if !self.presence.exists(agent_id)? {
            return Err(HiveError::AgentNotFound(agent_id.to_string()));
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let memo = self.send_memo(
            vec![agent_id.to_string()],
            &format!("assignment: {task_id}"),
            note.unwrap_or(""),
            None,
            Some(task_id),
            actor,
        )?;

        let assignment = Assignment {
            schema_version: SCHEMA_VERSION,
            id: generate_id("assign"),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            memo_id: memo.id,
            created_by: actor.to_string(),
            created_at: Utc::now(),
            note: note.map(str::to_string),
        };
        atomic::write_json_atomic(&self.assignment_path(&assignment.id), &assignment)?;
        self.events
            .record(Component::Messaging, "assign", actor, &assignment.id, agent_id);
        Ok(assignment)
    }

    /// Assignments, optionally for one agent, oldest first.
    pub fn list_assignments(&self, agent_id: Option<&str>) -> Result<Vec<Assignment>> {
        let mut assignments: Vec<Assignment> = atomic::read_records::<Assignment>(&self.assignments_dir)?
            .into_iter()
            .filter(|a| agent_id.is_none_or(|id| a.agent_id == id))
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(assignments)
    }
}
