use colored::Colorize;
use serde_json::json;

use crate::config::Config;
use crate::error::Result;
use crate::output::{Format, format_age, print_json};
use crate::store::scope_locks::{LockMode, LockStatus, ScopeLockStore};

use super::{actor, hours, minutes};

pub fn lock(
    config: &Config,
    scopes: Vec<String>,
    mode: LockMode,
    ttl_min: Option<u64>,
    note: Option<&str>,
    format: Format,
) -> Result<()> {
    let ttl = minutes("--ttl-min", ttl_min.unwrap_or(config.lock_ttl_min))?;
    let lock = ScopeLockStore::open(&config.root).lock(scopes, mode, ttl, note, actor(config)?)?;
    match format {
        Format::Json => print_json(&lock)?,
        Format::Pretty => {
            println!("Locked {} ({})", lock.id.bold(), lock.mode.to_string().yellow());
            for scope in &lock.scopes {
                println!("  {}", scope.green());
            }
            println!(
                "  {} {}",
                "expires:".dimmed(),
                lock.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(ref note) = lock.note {
                println!("  {} {}", "note:".dimmed(), note);
            }
        }
        Format::Minimal => println!("{}", lock.id),
    }
    Ok(())
}

pub fn unlock(config: &Config, lock_id: &str, format: Format) -> Result<()> {
    let outcome = ScopeLockStore::open(&config.root).unlock(lock_id, actor(config)?)?;
    match format {
        Format::Json => println!(
            "{}",
            json!({"unlocked": outcome.lock.id, "created_by": outcome.lock.created_by, "foreign": outcome.foreign})
        ),
        Format::Pretty => {
            println!("Unlocked {}", outcome.lock.id.bold());
            if outcome.foreign {
                println!(
                    "  {} lock belonged to '{}'",
                    "warning:".yellow(),
                    outcome.lock.created_by.cyan()
                );
            }
        }
        Format::Minimal => println!("{}", outcome.lock.id),
    }
    Ok(())
}

pub fn list(config: &Config, include_expired: bool, format: Format) -> Result<()> {
    let locks = ScopeLockStore::open(&config.root).list(include_expired)?;
    match format {
        Format::Json => print_json(&locks)?,
        Format::Pretty => {
            if locks.is_empty() {
                println!("{}", "No scope locks.".dimmed());
            }
            for view in &locks {
                let status = match view.status {
                    LockStatus::Active => view.status.to_string().green(),
                    LockStatus::Expired => view.status.to_string().red(),
                };
                println!(
                    "{} {} {} {}",
                    view.lock.id.bold(),
                    view.lock.mode.to_string().yellow(),
                    status,
                    format!("by {}", view.lock.created_by).cyan(),
                );
                println!("  {} {}", "scopes:".dimmed(), view.lock.scopes.join(", "));
            }
        }
        Format::Minimal => {
            for view in &locks {
                println!("{} {} {}", view.lock.id, view.status, view.lock.scopes.join(","));
            }
        }
    }
    Ok(())
}

pub fn audit(config: &Config, older_than_hours: u64, format: Format) -> Result<()> {
    let older_than = hours("--older-than-hours", older_than_hours)?;
    let findings = ScopeLockStore::open(&config.root).audit(older_than)?;
    match format {
        Format::Json => print_json(&findings)?,
        Format::Pretty => {
            if findings.is_empty() {
                println!("{}", "No forgotten locks.".green());
            }
            for f in &findings {
                println!(
                    "{} {} {} {}",
                    f.lock.id.bold(),
                    f.reason.to_string().yellow(),
                    format!("age {}", format_age(f.age_secs)).dimmed(),
                    format!("by {}", f.lock.created_by).cyan(),
                );
                println!("  {} {}", "scopes:".dimmed(), f.lock.scopes.join(", "));
            }
        }
        Format::Minimal => {
            for f in &findings {
                println!("{} {}", f.lock.id, f.reason);
            }
        }
    }
    Ok(())
}
