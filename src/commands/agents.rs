use colored::Colorize;

use crate::agent::local_host;
use crate::config::Config;
use crate::error::Result;
use crate::output::{Format, format_age, liveness_label, print_json};
use crate::store::presence::PresenceRegistry;

use super::seconds;

pub fn register(
    config: &Config,
    name: &str,
    role: &str,
    pid: Option<u32>,
    host: Option<&str>,
    format: Format,
) -> Result<()> {
    let registry = PresenceRegistry::open(&config.root);
    let host = host.map(str::to_string).unwrap_or_else(local_host);
    let agent = registry.register(name, role, pid.unwrap_or_else(std::process::id), &host)?;
    match format {
        Format::Json => print_json(&agent)?,
        Format::Pretty => {
            println!("Registered '{}' as {}", agent.name.cyan().bold(), agent.id.bold());
            println!("  {} {}", "role:".dimmed(), agent.role);
            println!("  {} {}@{}", "pid:".dimmed(), agent.pid, agent.host);
        }
        Format::Minimal => println!("{}", agent.id),
    }
    Ok(())
}

pub fn heartbeat(config: &Config, agent_id: &str, format: Format) -> Result<()> {
    let agent = PresenceRegistry::open(&config.root).heartbeat(agent_id)?;
    match format {
        Format::Json => print_json(&agent)?,
        Format::Pretty => println!(
            "{} {}",
            format!("[{}]", agent.id).cyan(),
            agent.last_seen_at.format("%H:%M:%S").to_string().dimmed()
        ),
        Format::Minimal => println!("{}", agent.id),
    }
    Ok(())
}

pub fn list(
    config: &Config,
    stale_secs: Option<u64>,
    dead_secs: Option<u64>,
    format: Format,
) -> Result<()> {
    let stale = stale_secs.unwrap_or(config.active_secs);
    let dead = dead_secs.unwrap_or(config.dead_secs);
    let agents = PresenceRegistry::open(&config.root)
        .list(seconds("stale threshold", stale)?, seconds("dead threshold", dead)?)?;
    match format {
        Format::Json => print_json(&agents)?,
        Format::Pretty => {
            if agents.is_empty() {
                println!("{}", "No agents registered.".dimmed());
            }
            for view in &agents {
                let role = view
                    .assigned_role
                    .as_deref()
                    .unwrap_or(&view.agent.role);
                println!(
                    "{} {} {} {}",
                    format!("[{}]", view.agent.name).cyan().bold(),
                    view.agent.id.dimmed(),
                    liveness_label(view.status),
                    format!("seen {} ago", format_age(view.age_secs)).dimmed(),
                );
                println!("  {} {}", "role:".dimmed(), role);
                println!("  {} {}@{}", "pid:".dimmed(), view.agent.pid, view.agent.host);
            }
        }
        Format::Minimal => {
            for view in &agents {
                println!("{} {} {}", view.agent.id, view.status, view.agent.name);
            }
        }
    }
    Ok(())
}
