pub mod agents;
pub mod events;
pub mod locks;
pub mod memo;
pub mod orchestrator;
pub mod tasks;

use crate::config::Config;
use crate::error::{HiveError, Result};

/// Identity for write commands: `--actor`, then `HIVE_AGENT`.
pub(crate) fn actor(config: &Config) -> Result<&str> {
    config.actor.as_deref().ok_or(HiveError::IdentityRequired)
}

/// Parse a JSON argument given on the command line.
pub(crate) fn parse_json_arg(flag: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| HiveError::InvalidInput(format!("{flag}: {e}")))
}

fn out_of_range(what: &str, n: u64) -> HiveError {
    HiveError::InvalidInput(format!("{what}: {n} is out of range"))
}

/// Whole minutes from the command line, rejecting values chrono cannot hold.
pub(crate) fn minutes(what: &str, n: u64) -> Result<chrono::Duration> {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| out_of_range(what, n))
}

pub(crate) fn hours(what: &str, n: u64) -> Result<chrono::Duration> {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| out_of_range(what, n))
}

pub(crate) fn seconds(what: &str, n: u64) -> Result<chrono::Duration> {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| out_of_range(what, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_reject_values_chrono_cannot_hold() {
        assert_eq!(minutes("--ttl-min", 90).unwrap(), chrono::Duration::minutes(90));
        assert!(matches!(minutes("--ttl-min", 1_000_000_000_000_000), Err(HiveError::InvalidInput(_))));
        assert!(matches!(hours("--older-than-hours", 9_000_000_000_000_000), Err(HiveError::InvalidInput(_))));
        assert!(matches!(seconds("--stale-sec", u64::MAX), Err(HiveError::InvalidInput(_))));
        assert_eq!(seconds("--stale-sec", 0).unwrap(), chrono::Duration::zero());
    }
}
