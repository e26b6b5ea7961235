use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{generate_id, require_actor, validate_id};
use crate::error::{HiveError, Result};
use crate::store::atomic::{self, SCHEMA_VERSION};
use crate::store::events::{Component, EventLog};

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Ask the current orchestrator to do something, `orchestrator/inbox/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub schema_version: u32,
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub from: String,
    pub created_at: DateTime<Utc>,
}

/// Orchestrator's answer, `orchestrator/outbox/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub schema_version: u32,
    pub id: String,
    pub response: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// Result of `submit_request`. `Queued` is not a failure: the orchestrator has
/// simply not answered yet; ask again later or watch the outbox.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Queued { id: String },
    Response { id: String, response: serde_json::Value },
}

impl SubmitOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id } | Self::Response { id, .. } => id,
        }
    }
}

/// Inbox/outbox channel between any agent and whoever holds the lease.
pub struct RequestChannel {
    inbox: PathBuf,
    outbox: PathBuf,
    processed: PathBuf,
    rejected: PathBuf,
    events: EventLog,
}

impl RequestChannel {
    pub fn open(root: &Path) -> Self {
        let dir = root.join("orchestrator");
        Self {
            inbox: dir.join("inbox"),
            outbox: dir.join("outbox"),
            processed: dir.join("processed"),
            rejected: dir.join("rejected"),
            events: EventLog::open(root),
        }
    }

    fn file_name(id: &str) -> String {
        format!("{id}.json")
    }

    /// Queue a request and, when `wait` is non-zero, poll the outbox until the
    /// deadline. Always returns: `Response` if one arrived, `Queued` otherwise.
    pub fn submit_request(
        &self,
        action: &str,
        payload: serde_json::Value,
        from: &str,
        wait: Duration,
    ) -> Result<SubmitOutcome> {
        self.submit_request_with_interval(action, payload, from, wait, POLL_INTERVAL)
    }

    pub fn submit_request_with_interval(
        &self,
        action: &str,
        payload: serde_json::Value,
        from: &str,
        wait: Duration,
        interval: Duration,
    ) -> Result<SubmitOutcome> {
        let from = require_actor(from)?;
        let action = action.trim();
        if action.is_empty() {
            return Err(HiveError::InvalidInput("request action must be non-empty".into()));
        }
        let deadline = Instant::now().checked_add(wait).ok_or_else(|| {
            HiveError::InvalidInput(format!("wait of {}s is out of range", wait.as_secs()))
        })?;

        let request = Request {
            schema_version: SCHEMA_VERSION,
            id: generate_id("req"),
            action: action.to_string(),
            payload,
            from: from.to_string(),
            created_at: Utc::now(),
        };
        atomic::write_json_atomic(&self.inbox.join(Self::file_name(&request.id)), &request)?;
        self.events
            .record(Component::Request, "submit", from, &request.id, &request.action);

        if wait.is_zero() {
            return Ok(SubmitOutcome::Queued { id: request.id });
        }

        loop {
            if let Some(response) = self.poll_response(&request.id)? {
                return Ok(SubmitOutcome::Response {
                    id: request.id,
                    response: response.response,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(SubmitOutcome::Queued { id: request.id });
            }
            thread::sleep(interval.min(deadline - now));
        }
    }

    /// Async pickup: the response for `id`, if the orchestrator has written one.
    pub fn poll_response(&self, id: &str) -> Result<Option<Response>> {
        validate_id(id)?;
        atomic::read_record_opt(&self.outbox.join(Self::file_name(id)))
    }

    /// Pending requests ordered by creation time (then id), never by directory
    /// listing order.
    ///
    /// A request whose id is not a valid file stem, or does not match the file
    /// it was found in, can never be answered or archived. It is moved to
    /// `orchestrator/rejected/` so it stops blocking the inbox. Unreadable
    /// records are skipped and left in place.
    pub fn drain_inbox(&self) -> Result<Vec<Request>> {
        let mut requests = Vec::new();
        for path in atomic::json_files(&self.inbox)? {
            let request: Request = match atomic::read_record(&path) {
                Ok(request) => request,
                Err(err) => {
                    tracing::warn!(path = %path.display(), code = err.code(), "skipping unreadable request: {err}");
                    continue;
                }
            };
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if validate_id(&request.id).is_err() || request.id != stem {
                self.reject(&path, &request);
                continue;
            }
            requests.push(request);
        }
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    fn reject(&self, path: &Path, request: &Request) {
        let Some(name) = path.file_name() else {
            return;
        };
        tracing::warn!(path = %path.display(), id = %request.id, "rejecting request whose id does not name its file");
        let moved = fs::create_dir_all(&self.rejected)
            .and_then(|()| fs::rename(path, self.rejected.join(name)));
        if let Err(err) = moved {
            tracing::warn!(path = %path.display(), "could not move rejected request: {err}");
            return;
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        self.events
            .record(Component::Request, "reject", &request.from, &stem, "id_mismatch");
    }

    /// Requests set aside by `drain_inbox`, by file name.
    pub fn rejected(&self) -> Result<Vec<PathBuf>> {
        atomic::json_files(&self.rejected)
    }

    /// Write the response, then archive the request. A crash between the two
    /// steps leaves the request in the inbox to be handled again, never lost.
    ///
    /// The first response written for `id` stands; a later call archives the
    /// request and returns the stored response unchanged.
    pub fn respond(&self, id: &str, response: serde_json::Value, actor: &str) -> Result<Response> {
        let actor = require_actor(actor)?;
        validate_id(id)?;
        let candidate = Response {
            schema_version: SCHEMA_VERSION,
            id: id.to_string(),
            response,
            completed_at: Utc::now(),
        };
        let outbox_path = self.outbox.join(Self::file_name(id));
        let (record, outcome) = if atomic::write_json_new(&outbox_path, &candidate)? {
            (candidate, "ok")
        } else {
            let existing: Response = atomic::read_record(&outbox_path)?;
            if existing.response != candidate.response {
                tracing::warn!(id, "request already answered, keeping the first response");
            }
            (existing, "already_answered")
        };

        fs::create_dir_all(&self.processed)?;
        match fs::rename(
            self.inbox.join(Self::file_name(id)),
            self.processed.join(Self::file_name(id)),
        ) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(id, "request already archived");
            }
            Err(err) => return Err(err.into()),
        }
        self.events
            .record(Component::Request, "respond", actor, id, outcome);
        Ok(record)
    }

    /// Archived requests, oldest first.
    pub fn processed(&self) -> Result<Vec<Request>> {
        let mut requests: Vec<Request> = atomic::read_records(&self.processed)?;
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn channel() -> (tempfile::TempDir, RequestChannel) {
        let dir = tempdir().unwrap();
        let channel = RequestChannel::open(dir.path());
        (dir, channel)
    }

    #[test]
    fn zero_wait_queues_immediately() {
        let (_dir, channel) = channel();
        let outcome = channel
            .submit_request("ping", json!({}), "worker", Duration::ZERO)
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(channel.drain_inbox().unwrap().len(), 1);
    }

    #[test]
    fn unanswered_request_returns_queued_at_deadline() {
        let (_dir, channel) = channel();
        let started = Instant::now();
        let outcome = channel
            .submit_request("set_role", json!({"role": "x"}), "worker", Duration::from_secs(1))
            .unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "overshot the deadline: {elapsed:?}");
    }

    #[test]
    fn response_is_picked_up_while_waiting() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let responder = thread::spawn(move || {
            let channel = RequestChannel::open(&root);
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Some(request) = channel.drain_inbox().unwrap().into_iter().next() {
                    channel
                        .respond(&request.id, json!({"ok": true}), "orchestrator")
                        .unwrap();
                    return;
                }
                thread::sleep(Duration::from_millis(20));
            }
        });

        let channel = RequestChannel::open(dir.path());
        let outcome = channel
            .submit_request_with_interval(
                "ping",
                json!({}),
                "worker",
                Duration::from_secs(5),
                Duration::from_millis(20),
            )
            .unwrap();
        responder.join().unwrap();

        match outcome {
            SubmitOutcome::Response { response, .. } => assert_eq!(response, json!({"ok": true})),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn drain_orders_by_creation_time_not_listing_order() {
        let (dir, channel) = channel();
        let inbox = dir.path().join("orchestrator").join("inbox");
        let now = Utc::now();
        // Names sort opposite to creation time.
        for (id, age) in [("req-a", 1), ("req-b", 30), ("req-c", 10)] {
            let request = Request {
                schema_version: SCHEMA_VERSION,
                id: id.into(),
                action: "ping".into(),
                payload: json!(null),
                from: "w".into(),
                created_at: now - chrono::Duration::seconds(age),
            };
            atomic::write_json_atomic(&inbox.join(format!("{id}.json")), &request).unwrap();
        }

        let order: Vec<String> = channel.drain_inbox().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["req-b", "req-c", "req-a"]);
    }

    #[test]
    fn respond_archives_and_is_repeatable() {
        let (_dir, channel) = channel();
        let id = channel
            .submit_request("ping", json!({}), "worker", Duration::ZERO)
            .unwrap()
            .id()
            .to_string();

        channel.respond(&id, json!({"ok": true}), "boss").unwrap();
        assert!(channel.drain_inbox().unwrap().is_empty());
        assert_eq!(channel.processed().unwrap().len(), 1);
        assert_eq!(
            channel.poll_response(&id).unwrap().unwrap().response,
            json!({"ok": true})
        );

        // A duplicate respond (e.g. replay after a crash) must not fail.
        channel.respond(&id, json!({"ok": true}), "boss").unwrap();
        assert_eq!(channel.processed().unwrap().len(), 1);
    }

    #[test]
    fn first_response_stands() {
        let (_dir, channel) = channel();
        let id = channel
            .submit_request("ping", json!({}), "worker", Duration::ZERO)
            .unwrap()
            .id()
            .to_string();

        channel.respond(&id, json!({"ok": true, "leader": "a"}), "a").unwrap();
        let second = channel.respond(&id, json!({"ok": true, "leader": "b"}), "b").unwrap();

        assert_eq!(second.response["leader"], "a");
        assert_eq!(channel.poll_response(&id).unwrap().unwrap().response["leader"], "a");
    }

    #[test]
    fn drain_sets_aside_requests_that_do_not_name_their_file() {
        let (dir, channel) = channel();
        let inbox = dir.path().join("orchestrator").join("inbox");
        let good = channel
            .submit_request("ping", json!({}), "worker", Duration::ZERO)
            .unwrap()
            .id()
            .to_string();
        for (file, id) in [("req-bad", "../x"), ("req-stem", "req-other")] {
            let request = Request {
                schema_version: SCHEMA_VERSION,
                id: id.into(),
                action: "ping".into(),
                payload: json!(null),
                from: "w".into(),
                created_at: Utc::now() - chrono::Duration::seconds(60),
            };
            atomic::write_json_atomic(&inbox.join(format!("{file}.json")), &request).unwrap();
        }

        let drained: Vec<String> = channel.drain_inbox().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(drained, vec![good]);
        assert_eq!(channel.rejected().unwrap().len(), 2);
        assert!(!inbox.join("req-bad.json").exists());

        // Set aside once, not re-read on every pass.
        assert_eq!(channel.drain_inbox().unwrap().len(), 1);
        assert_eq!(channel.rejected().unwrap().len(), 2);
    }

    #[test]
    fn submit_requires_identity_and_action() {
        let (_dir, channel) = channel();
        assert!(matches!(
            channel.submit_request("ping", json!({}), "", Duration::ZERO),
            Err(HiveError::IdentityRequired)
        ));
        assert!(matches!(
            channel.submit_request(" ", json!({}), "w", Duration::ZERO),
            Err(HiveError::InvalidInput(_))
        ));
        assert!(channel.poll_response("req-unknown").unwrap().is_none());
    }

    #[test]
    fn unrepresentable_wait_is_rejected_before_queueing() {
        let (_dir, channel) = channel();
        assert!(matches!(
            channel.submit_request("ping", json!({}), "w", Duration::MAX),
            Err(HiveError::InvalidInput(_))
        ));
        assert!(channel.drain_inbox().unwrap().is_empty());
    }
}
