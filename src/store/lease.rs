use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{local_host, require_actor};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};
use crate::store::lock;

/// Descriptive sibling of the lock file, `orchestrator/state.json`.
/// Holding the OS lock is what confers leadership; this file only says who.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseState {
    pub schema_version: u32,
    pub name: String,
    pub pid: u32,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Held(LeaseState),
    AlreadyHeld { holder_pid: Option<u32> },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LeaseStatus {
    /// Some live process holds the OS lock right now.
    pub held: bool,
    pub holder_name: Option<String>,
    pub holder_pid: Option<u32>,
    pub holder_alive: bool,
    pub heartbeat_age_secs: Option<i64>,
    /// `state.json` names a holder that never released, but the lock is free:
    /// the holder died and the OS let go on its behalf.
    pub stale: bool,
}

/// Singleton leadership lease under `<root>/orchestrator/`.
///
/// A manager that wins [`try_acquire`](Self::try_acquire) keeps the locked file
/// handle; dropping the manager or exiting the process frees the lease.
pub struct LeaseManager {
    dir: PathBuf,
    events: EventLog,
    held: Option<File>,
    holder: Option<LeaseState>,
}

impl LeaseManager {
    pub fn open(root: &Path) -> Self {
        Self {
            dir: root.join("orchestrator"),
            events: EventLog::open(root),
            held: None,
            holder: None,
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("lease.lock")
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    fn pid_path(&self) -> PathBuf {
        self.dir.join("pid")
    }

    fn read_state(&self) -> Option<LeaseState> {
        match atomic::read_record_opt::<LeaseState>(&self.state_path()) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("ignoring unreadable lease state: {err}");
                None
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Non-blocking attempt to become leader. Contention returns
    /// `AlreadyHeld` immediately; nobody queues.
    pub fn try_acquire(&mut self, name: &str, pid: u32) -> Result<AcquireOutcome> {
        let name = require_actor(name)?;
        if let Some(state) = &self.holder {
            return Ok(AcquireOutcome::Held(state.clone()));
        }

        let file = match lock::acquire_lock(&self.lock_path()) {
            Ok(file) => file,
            Err(HiveError::Locked(_)) => {
                let holder_pid = self
                    .read_state()
                    .filter(|s| s.released_at.is_none())
                    .map(|s| s.pid);
                self.events
                    .record(Component::Lease, "acquire", name, "lease", "already_held");
                return Ok(AcquireOutcome::AlreadyHeld { holder_pid });
            }
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let state = LeaseState {
            schema_version: SCHEMA_VERSION,
            name: name.to_string(),
            pid,
            host: local_host(),
            started_at: now,
            heartbeat_at: now,
            released_at: None,
        };
        atomic::write_json_atomic(&self.state_path(), &state)?;
        atomic::write_text_atomic(&self.pid_path(), &format!("{pid}\n"))?;

        self.held = Some(file);
        self.holder = Some(state.clone());
        tracing::info!(name, pid, "lease acquired");
        self.events
            .record(Component::Lease, "acquire", name, "lease", "held");
        Ok(AcquireOutcome::Held(state))
    }

    /// Refresh `heartbeat_at` while holding the lease. No-op otherwise.
    pub fn heartbeat(&mut self) -> Result<()> {
        let path = self.state_path();
        let Some(state) = self.holder.as_mut() else {
            return Ok(());
        };
        state.heartbeat_at = Utc::now();
        atomic::write_json_atomic(&path, state)?;
        Ok(())
    }

    /// Give up leadership. Safe to call when nothing is held: returns `false`.
    pub fn release(&mut self) -> Result<bool> {
        let Some(file) = self.held.take() else {
            return Ok(false);
        };
        let state = self.holder.take();

        if let Some(mut state) = state {
            state.released_at = Some(Utc::now());
            atomic::write_json_atomic(&self.state_path(), &state)?;
            match fs::remove_file(self.pid_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            tracing::info!(name = %state.name, "lease released");
            self.events
                .record(Component::Lease, "release", &state.name, "lease", "released");
        }
        lock::release_lock(file)?;
        Ok(true)
    }

    /// Report the lease as any reader sees it. A fresh non-blocking lock check
    /// tells a live holder apart from a lock file left behind by a dead one.
    /// A `try_acquire` that races this check may briefly see `AlreadyHeld`;
    /// a contender should retry before treating the lease as taken.
    pub fn status(&self) -> Result<LeaseStatus> {
        let held = self.held.is_some() || lock::is_locked(&self.lock_path())?;
        let state = self.read_state().filter(|s| s.released_at.is_none());
        let now = Utc::now();

        Ok(LeaseStatus {
            held,
            holder_name: state.as_ref().filter(|_| held).map(|s| s.name.clone()),
            holder_pid: state.as_ref().map(|s| s.pid),
            holder_alive: held,
            heartbeat_age_secs: state
                .as_ref()
                .map(|s| (now - s.heartbeat_at).num_seconds().max(0)),
            stale: !held && state.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn only_one_manager_holds_the_lease() {
        let dir = tempdir().unwrap();
        let mut first = LeaseManager::open(dir.path());
        let mut second = LeaseManager::open(dir.path());

        assert!(matches!(
            first.try_acquire("boss", 100).unwrap(),
            AcquireOutcome::Held(_)
        ));
        assert_eq!(
            second.try_acquire("rival", 200).unwrap(),
            AcquireOutcome::AlreadyHeld {
                holder_pid: Some(100)
            }
        );

        // Re-asking while holding is idempotent.
        assert!(matches!(
            first.try_acquire("boss", 100).unwrap(),
            AcquireOutcome::Held(_)
        ));
    }

    #[test]
    fn drop_releases_without_explicit_release() {
        let dir = tempdir().unwrap();
        {
            let mut holder = LeaseManager::open(dir.path());
            holder.try_acquire("boss", 100).unwrap();
        }
        let mut next = LeaseManager::open(dir.path());
        assert!(matches!(
            next.try_acquire("heir", 200).unwrap(),
            AcquireOutcome::Held(state) if state.pid == 200
        ));
    }

    #[test]
    fn release_without_holding_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut manager = LeaseManager::open(dir.path());
        assert!(!manager.release().unwrap());
        manager.heartbeat().unwrap();
    }

    #[test]
    fn release_hands_over_and_marks_state() {
        let dir = tempdir().unwrap();
        let mut first = LeaseManager::open(dir.path());
        first.try_acquire("boss", 100).unwrap();
        assert!(dir.path().join("orchestrator").join("pid").exists());

        assert!(first.release().unwrap());
        assert!(!first.is_held());
        assert!(!dir.path().join("orchestrator").join("pid").exists());

        let status = first.status().unwrap();
        assert!(!status.held);
        assert!(!status.stale);
        assert_eq!(status.holder_pid, None);

        let mut second = LeaseManager::open(dir.path());
        assert!(matches!(
            second.try_acquire("heir", 200).unwrap(),
            AcquireOutcome::Held(_)
        ));
    }

    #[test]
    fn status_reports_live_holder() {
        let dir = tempdir().unwrap();
        let mut holder = LeaseManager::open(dir.path());
        holder.try_acquire("boss", 4242).unwrap();
        holder.heartbeat().unwrap();

        let observer = LeaseManager::open(dir.path());
        let status = observer.status().unwrap();
        assert!(status.held);
        assert!(status.holder_alive);
        assert!(!status.stale);
        assert_eq!(status.holder_pid, Some(4242));
        assert_eq!(status.holder_name.as_deref(), Some("boss"));
        assert!(status.heartbeat_age_secs.unwrap() <= 1);
    }

    #[test]
    fn status_detects_stale_file_after_holder_vanishes() {
        let dir = tempdir().unwrap();
        {
            let mut holder = LeaseManager::open(dir.path());
            holder.try_acquire("boss", 4242).unwrap();
            // Dropped without release(): simulates a crashed holder.
        }
        let lock_file = dir.path().join("orchestrator").join("lease.lock");
        assert!(lock_file.exists());

        let status = LeaseManager::open(dir.path()).status().unwrap();
        assert!(!status.held);
        assert!(!status.holder_alive);
        assert!(status.stale);
        assert_eq!(status.holder_pid, Some(4242));
    }

    #[test]
    fn status_on_empty_root() {
        let dir = tempdir().unwrap();
        let status = LeaseManager::open(dir.path()).status().unwrap();
        assert!(!status.held);
        assert!(!status.stale);
        assert_eq!(status.heartbeat_age_secs, None);
    }

    #[test]
    fn anonymous_acquire_is_rejected() {
        let dir = tempdir().unwrap();
        let mut manager = LeaseManager::open(dir.path());
        assert!(matches!(
            manager.try_acquire("", 1),
            Err(HiveError::IdentityRequired)
        ));
    }
}
