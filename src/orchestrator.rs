//! The lease holder's request loop.
//!
//! Only the process holding the lease drains `orchestrator/inbox/`. Every
//! request gets exactly one response file, including failures, so a requester
//! polling the outbox never waits on a request that was silently dropped.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{HiveError, Result};
use crate::store::lease::{AcquireOutcome, LeaseManager, LeaseState};
use crate::store::messaging::MessageStore;
use crate::store::presence::PresenceRegistry;
use crate::store::requests::{Request, RequestChannel};

#[derive(Debug, Deserialize)]
struct SetRolePayload {
    agent_id: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct AssignTaskPayload {
    task_id: String,
    agent_id: String,
    #[serde(default)]
    note: Option<String>,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Pass {
    pub handled: usize,
    pub shutdown: bool,
}

pub struct Orchestrator {
    root: PathBuf,
    lease: LeaseManager,
    state: LeaseState,
    channel: RequestChannel,
}

impl Orchestrator {
    /// Become the orchestrator or fail fast with `LeaseContention`.
    pub fn start(root: &Path, name: &str, pid: u32) -> Result<Self> {
        let mut lease = LeaseManager::open(root);
        let state = match lease.try_acquire(name, pid)? {
            AcquireOutcome::Held(state) => state,
            AcquireOutcome::AlreadyHeld { holder_pid } => {
                return Err(HiveError::LeaseContention { holder_pid });
            }
        };
        Ok(Self {
            root: root.to_path_buf(),
            lease,
            state,
            channel: RequestChannel::open(root),
        })
    }

    pub fn state(&self) -> &LeaseState {
        &self.state
    }

    /// Heartbeat the lease, then answer every queued request in creation
    /// order. A `shutdown` request ends the pass; anything after it stays
    /// queued for the next leader. A request that cannot be answered is
    /// logged and left for the next pass without holding up the rest.
    pub fn run_once(&mut self) -> Result<Pass> {
        self.lease.heartbeat()?;
        let mut pass = Pass::default();
        for request in self.channel.drain_inbox()? {
            match self.handle(&request) {
                Ok(Handled::Rearchived) => {}
                Ok(Handled::Answered { shutdown }) => {
                    pass.handled += 1;
                    if shutdown {
                        pass.shutdown = true;
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(id = %request.id, code = err.code(), "request not answered: {err}");
                }
            }
        }
        Ok(pass)
    }

    fn handle(&self, request: &Request) -> Result<Handled> {
        // Answered before a crash but never archived: re-archive as is.
        if let Some(previous) = self.channel.poll_response(&request.id)? {
            self.channel
                .respond(&request.id, previous.response, &self.state.name)?;
            return Ok(Handled::Rearchived);
        }
        let (response, shutdown) = self.dispatch(request);
        self.channel.respond(&request.id, response, &self.state.name)?;
        Ok(Handled::Answered { shutdown })
    }

    /// Loop until a `shutdown` request is handled, then release the lease.
    /// Returns the number of requests answered.
    pub fn run(mut self, poll: Duration) -> Result<usize> {
        let mut total = 0;
        loop {
            let pass = self.run_once()?;
            total += pass.handled;
            if pass.shutdown {
                break;
            }
            thread::sleep(poll);
        }
        self.stop()?;
        Ok(total)
    }

    pub fn stop(mut self) -> Result<()> {
        self.lease.release()?;
        Ok(())
    }

    fn dispatch(&self, request: &Request) -> (Value, bool) {
        tracing::debug!(id = %request.id, action = %request.action, from = %request.from, "handling request");
        let outcome = match request.action.as_str() {
            "ping" => Ok(json!({"ok": true, "leader": self.state.name, "pid": self.state.pid})),
            "set_role" => self.set_role(&request.payload),
            "assign_task" => self.assign_task(&request.payload),
            "shutdown" => {
                tracing::info!(from = %request.from, "shutdown requested");
                return (json!({"ok": true, "shutdown": true}), true);
            }
            other => Err(HiveError::InvalidInput(format!("unknown action '{other}'"))),
        };
        match outcome {
            Ok(response) => (response, false),
            Err(err) => {
                tracing::warn!(id = %request.id, action = %request.action, "request failed: {err}");
                (
                    json!({"ok": false, "error": err.code(), "message": err.to_string()}),
                    false,
                )
            }
        }
    }

    fn set_role(&self, payload: &Value) -> Result<Value> {
        let payload: SetRolePayload = parse_payload(payload)?;
        let assignment = PresenceRegistry::open(&self.root).set_assigned_role(
            &payload.agent_id,
            &payload.role,
            &self.state.name,
        )?;
        Ok(json!({"ok": true, "assignment": assignment}))
    }

    /// Re-delivery of the same `(task_id, agent_id)` returns the existing
    /// assignment instead of notifying the agent twice.
    fn assign_task(&self, payload: &Value) -> Result<Value> {
        let payload: AssignTaskPayload = parse_payload(payload)?;
        let store = MessageStore::open(&self.root);
        if let Some(existing) = store
            .list_assignments(Some(&payload.agent_id))?
            .into_iter()
            .find(|a| a.task_id == payload.task_id)
        {
            return Ok(json!({"ok": true, "assignment": existing, "existing": true}));
        }
        let assignment = store.assign(
            &payload.task_id,
            &payload.agent_id,
            payload.note.as_deref(),
            &self.state.name,
        )?;
        Ok(json!({"ok": true, "assignment": assignment}))
    }
}

enum Handled {
    Rearchived,
    Answered { shutdown: bool },
}

fn parse_payload<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| HiveError::InvalidInput(format!("bad payload: {e}")))
}
