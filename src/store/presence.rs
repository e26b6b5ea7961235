use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{generate_agent_id, require_actor, validate_id};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};

/// Re-registering the same `(name, host, pid)` inside this window returns the
/// existing id instead of minting a new one.
pub const REGISTER_DEDUP_WINDOW_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Self-reported presence record, `agents/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    pub role: String,
    pub pid: u32,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Orchestrator decision, `agents/roles/<id>.json`. Kept out of the agent's own
/// file so heartbeats never race with role changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleAssignment {
    pub schema_version: u32,
    pub agent_id: String,
    pub role: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

/// Derived liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Active,
    Stale,
    Dead,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stale => write!(f, "stale"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// An agent as seen by a reader: record + orchestrator role + derived status.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub assigned_role: Option<String>,
    pub status: Liveness,
    pub age_secs: i64,
}

/// Classify by heartbeat age. The dead threshold is checked first, so an agent
/// older than `dead_after` is never `active` whatever `stale_after` says.
pub fn classify(age: Duration, stale_after: Duration, dead_after: Duration) -> Liveness {
    let age = age.max(Duration::zero());
    if age >= dead_after {
        Liveness::Dead
    } else if age < stale_after {
        Liveness::Active
    } else {
        Liveness::Stale
    }
}

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Agent heartbeat records under `<root>/agents/`.
pub struct PresenceRegistry {
    dir: PathBuf,
    events: EventLog,
}

impl PresenceRegistry {
    pub fn open(root: &Path) -> Self {
        Self {
            dir: root.join("agents"),
            events: EventLog::open(root),
        }
    }

    fn agent_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn roles_dir(&self) -> PathBuf {
        self.dir.join("roles")
    }

    fn role_path(&self, id: &str) -> PathBuf {
        self.roles_dir().join(format!("{id}.json"))
    }

    fn read_agent(&self, id: &str) -> Result<Agent> {
        validate_id(id)?;
        atomic::read_record_opt(&self.agent_path(id))?
            .ok_or_else(|| HiveError::AgentNotFound(id.to_string()))
    }

    fn read_role(&self, id: &str) -> Option<String> {
        match atomic::read_record_opt::<RoleAssignment>(&self.role_path(id)) {
            Ok(found) => found.map(|r| r.role),
            Err(err) => {
                tracing::warn!(agent_id = id, "ignoring unreadable role assignment: {err}");
                None
            }
        }
    }

    fn view(&self, agent: Agent, now: DateTime<Utc>, stale_after: Duration, dead_after: Duration) -> AgentView {
        let age = now - agent.last_seen_at;
        AgentView {
            assigned_role: self.read_role(&agent.id),
            status: classify(age, stale_after, dead_after),
            age_secs: age.num_seconds().max(0),
            agent,
        }
    }

    /// Register an agent and return its record. Retried startups with the same
    /// `(name, host, pid)` inside the dedup window get the existing id back.
    pub fn register(&self, name: &str, role: &str, pid: u32, host: &str) -> Result<Agent> {
        let name = require_actor(name)?;
        let role = role.trim();
        if role.is_empty() {
            return Err(HiveError::InvalidInput("role must be non-empty".into()));
        }
        let host = host.trim();
        if host.is_empty() {
            return Err(HiveError::InvalidInput("host must be non-empty".into()));
        }

        let now = Utc::now();
        let window = Duration::seconds(REGISTER_DEDUP_WINDOW_SECS);
        let existing = atomic::read_records::<Agent>(&self.dir)?
            .into_iter()
            .filter(|a| a.name == name && a.host == host && a.pid == pid)
            .filter(|a| now - a.last_seen_at < window)
            .max_by_key(|a| a.last_seen_at);

        let agent = match existing {
            Some(mut agent) => {
                agent.role = role.to_string();
                agent.last_seen_at = now;
                atomic::write_json_atomic(&self.agent_path(&agent.id), &agent)?;
                self.events
                    .record(Component::Presence, "register", name, &agent.id, "reused");
                agent
            }
            None => {
                let mut id = generate_agent_id();
                while self.agent_path(&id).exists() {
                    id = generate_agent_id();
                }
                let agent = Agent {
                    schema_version: SCHEMA_VERSION,
                    id,
                    name: name.to_string(),
                    role: role.to_string(),
                    pid,
                    host: host.to_string(),
                    started_at: now,
                    last_seen_at: now,
                };
                atomic::write_json_atomic(&self.agent_path(&agent.id), &agent)?;
                self.events
                    .record(Component::Presence, "register", name, &agent.id, "created");
                agent
            }
        };
        Ok(agent)
    }

    /// Refresh `last_seen_at` for an agent.
    pub fn heartbeat(&self, agent_id: &str) -> Result<Agent> {
        let mut agent = self.read_agent(agent_id)?;
        agent.last_seen_at = Utc::now();
        atomic::write_json_atomic(&self.agent_path(agent_id), &agent)?;
        self.events
            .record(Component::Presence, "heartbeat", agent_id, agent_id, "ok");
        Ok(agent)
    }

    pub fn get(&self, agent_id: &str, stale_after: Duration, dead_after: Duration) -> Result<AgentView> {
        let agent = self.read_agent(agent_id)?;
        Ok(self.view(agent, Utc::now(), stale_after, dead_after))
    }

    pub fn exists(&self, agent_id: &str) -> Result<bool> {
        validate_id(agent_id)?;
        Ok(self.agent_path(agent_id).exists())
    }

    /// List every agent, dead ones included, most recently seen first.
    pub fn list(&self, stale_after: Duration, dead_after: Duration) -> Result<Vec<AgentView>> {
        let now = Utc::now();
        let mut agents: Vec<AgentView> = atomic::read_records::<Agent>(&self.dir)?
            .into_iter()
            .map(|a| self.view(a, now, stale_after, dead_after))
            .collect();
        agents.sort_by(|a, b| {
            b.agent
                .last_seen_at
                .cmp(&a.agent.last_seen_at)
                .then_with(|| a.agent.id.cmp(&b.agent.id))
        });
        Ok(agents)
    }

    /// Record the orchestrator's role decision for an agent.
    pub fn set_assigned_role(&self, agent_id: &str, role: &str, actor: &str) -> Result<RoleAssignment> {
        let actor = require_actor(actor)?;
        self.read_agent(agent_id)?;
        let role = role.trim();
        if role.is_empty() {
            return Err(HiveError::InvalidInput("role must be non-empty".into()));
        }
        let assignment = RoleAssignment {
            schema_version: SCHEMA_VERSION,
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            assigned_by: actor.to_string(),
            assigned_at: Utc::now(),
        };
        atomic::write_json_atomic(&self.role_path(agent_id), &assignment)?;
        self.events
            .record(Component::Presence, "set_role", actor, agent_id, role);
        Ok(assignment)
    }
}
