use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::agent::{generate_id, require_actor, validate_id};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};
use crate::store::expiry_after;

/// What holders of a scope lock ask others to refrain from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum LockMode {
    NoTouch,
    NoWrite,
    ReadOnly,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTouch => write!(f, "no_touch"),
            Self::NoWrite => write!(f, "no_write"),
            Self::ReadOnly => write!(f, "read_only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Expired,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Advisory claim over work scopes, `locks/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeLock {
    pub schema_version: u32,
    pub id: String,
    pub scopes: Vec<String>,
    pub mode: LockMode,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ScopeLock {
    pub fn status_at(&self, now: DateTime<Utc>) -> LockStatus {
        if now < self.expires_at {
            LockStatus::Active
        } else {
            LockStatus::Expired
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScopeLockView {
    #[serde(flatten)]
    pub lock: ScopeLock,
    pub status: LockStatus,
}

/// Why `audit` surfaced a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    /// Past `expires_at` but nobody ever unlocked it.
    ExpiredNotReleased,
    /// Still active, but held longer than the audit threshold.
    LongLived,
}

impl std::fmt::Display for AuditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExpiredNotReleased => write!(f, "expired_not_released"),
            Self::LongLived => write!(f, "long_lived"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditFinding {
    #[serde(flatten)]
    pub lock: ScopeLock,
    pub status: LockStatus,
    pub reason: AuditReason,
    pub age_secs: i64,
}

/// Outcome of `unlock`, distinguishing self-release from release by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub lock: ScopeLock,
    pub foreign: bool,
}

/// Advisory scope locks under `<root>/locks/`. Overlaps are never rejected;
/// `audit` exists to surface forgotten locks for a human.
pub struct ScopeLockStore {
    dir: PathBuf,
    events: EventLog,
}

impl ScopeLockStore {
    pub fn open(root: &Path) -> Self {
        Self {
            dir: root.join("locks"),
            events: EventLog::open(root),
        }
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn lock(
        &self,
        scopes: Vec<String>,
        mode: LockMode,
        ttl: Duration,
        note: Option<&str>,
        actor: &str,
    ) -> Result<ScopeLock> {
        let actor = require_actor(actor)?;
        let scopes: Vec<String> = scopes
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            return Err(HiveError::InvalidInput("at least one scope is required".into()));
        }

        let now = Utc::now();
        let lock = ScopeLock {
            schema_version: SCHEMA_VERSION,
            id: generate_id("lock"),
            scopes,
            mode,
            created_by: actor.to_string(),
            created_at: now,
            expires_at: expiry_after(now, ttl)?,
            note: note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        };
        atomic::write_json_atomic(&self.lock_path(&lock.id), &lock)?;
        self.events
            .record(Component::ScopeLock, "lock", actor, &lock.id, &lock.mode.to_string());
        Ok(lock)
    }

    pub fn get(&self, lock_id: &str) -> Result<ScopeLock> {
        validate_id(lock_id)?;
        atomic::read_record_opt(&self.lock_path(lock_id))?
            .ok_or_else(|| HiveError::LockNotFound(lock_id.to_string()))
    }

    /// Remove a lock. Anyone may release anyone's lock; doing so for another
    /// actor's lock is logged as `unlock_foreign`.
    pub fn unlock(&self, lock_id: &str, actor: &str) -> Result<UnlockOutcome> {
        let actor = require_actor(actor)?;
        let lock = self.get(lock_id)?;
        match fs::remove_file(self.lock_path(lock_id)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(HiveError::LockNotFound(lock_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let foreign = lock.created_by != actor;
        if foreign {
            tracing::warn!(
                lock_id,
                owner = %lock.created_by,
                actor,
                "scope lock released by a different actor"
            );
            self.events
                .record(Component::ScopeLock, "unlock_foreign", actor, lock_id, &lock.created_by);
        } else {
            self.events
                .record(Component::ScopeLock, "unlock", actor, lock_id, "ok");
        }
        Ok(UnlockOutcome { lock, foreign })
    }

    /// List locks oldest first; expired ones only when asked.
    pub fn list(&self, include_expired: bool) -> Result<Vec<ScopeLockView>> {
        let now = Utc::now();
        let mut locks: Vec<ScopeLockView> = atomic::read_records::<ScopeLock>(&self.dir)?
            .into_iter()
            .map(|lock| ScopeLockView {
                status: lock.status_at(now),
                lock,
            })
            .filter(|v| include_expired || v.status == LockStatus::Active)
            .collect();
        locks.sort_by(|a, b| {
            a.lock
                .created_at
                .cmp(&b.lock.created_at)
                .then_with(|| a.lock.id.cmp(&b.lock.id))
        });
        Ok(locks)
    }

    /// Stale candidates: expired-but-never-unlocked locks, and active locks
    /// older than `older_than`. Nothing is removed.
    pub fn audit(&self, older_than: Duration) -> Result<Vec<AuditFinding>> {
        let now = Utc::now();
        let findings = self
            .list(true)?
            .into_iter()
            .filter_map(|view| {
                let age = now - view.lock.created_at;
                let reason = match view.status {
                    LockStatus::Expired => AuditReason::ExpiredNotReleased,
                    LockStatus::Active if age > older_than => AuditReason::LongLived,
                    LockStatus::Active => return None,
                };
                Some(AuditFinding {
                    status: view.status,
                    reason,
                    age_secs: age.num_seconds().max(0),
                    lock: view.lock,
                })
            })
            .collect();
        Ok(findings)
    }
}
