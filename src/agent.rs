use chrono::Utc;

use crate::error::{HiveError, Result};

/// Resolve the actor identity from an explicit flag, then `HIVE_AGENT`.
///
/// Returns `None` when neither is set; write paths turn that into
/// [`HiveError::IdentityRequired`] via [`require_actor`].
pub fn resolve_actor(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var("HIVE_AGENT")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Reject anonymous writers. Every entity is namespaced by its creator, so an
/// empty or whitespace-only actor is never accepted.
pub fn require_actor(actor: &str) -> Result<&str> {
    let actor = actor.trim();
    if actor.is_empty() || actor.chars().any(|c| c.is_control()) {
        return Err(HiveError::IdentityRequired);
    }
    Ok(actor)
}

/// Validate an id that will be used as a file stem.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(HiveError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn short_token() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    token[..8].to_string()
}

/// Fresh agent id, e.g. `agent-3f9c01ab`.
pub fn generate_agent_id() -> String {
    format!("agent-{}", short_token())
}

/// Time-prefixed id so that lexical order roughly follows creation order,
/// e.g. `memo-20261018093012345-3f9c01ab`.
pub fn generate_id(kind: &str) -> String {
    let ts = Utc::now().format("%Y%m%d%H%M%S%3f");
    format!("{kind}-{ts}-{}", short_token())
}

/// Best-effort host name for presence records.
pub fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests must not run concurrently.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn generated_ids_are_well_formed() {
        let agent = generate_agent_id();
        assert!(agent.starts_with("agent-"));
        assert_eq!(agent.len(), "agent-".len() + 8);
        validate_id(&agent).unwrap();

        let memo = generate_id("memo");
        assert!(memo.starts_with("memo-"));
        validate_id(&memo).unwrap();
    }

    #[test]
    fn require_actor_rejects_anonymous() {
        assert!(matches!(require_actor(""), Err(HiveError::IdentityRequired)));
        assert!(matches!(require_actor("   "), Err(HiveError::IdentityRequired)));
        assert_eq!(require_actor(" worker-1 ").unwrap(), "worker-1");
    }

    #[test]
    fn validate_id_blocks_traversal() {
        for bad in ["", "../etc", "a/b", ".hidden", "has space"] {
            assert!(validate_id(bad).is_err(), "{bad} should be rejected");
        }
        validate_id("task_1.v2").unwrap();
    }

    #[test]
    fn resolve_actor_env_behavior() {
        let _guard = ENV_LOCK.lock().unwrap();

        unsafe { std::env::set_var("HIVE_AGENT", "env-agent") };
        assert_eq!(resolve_actor(None), Some("env-agent".to_string()));
        // Explicit flag wins over the environment.
        assert_eq!(resolve_actor(Some("flag-agent")), Some("flag-agent".to_string()));

        unsafe { std::env::set_var("HIVE_AGENT", "") };
        assert_eq!(resolve_actor(None), None);

        unsafe { std::env::remove_var("HIVE_AGENT") };
        assert_eq!(resolve_actor(Some("  ")), None);
    }
}
