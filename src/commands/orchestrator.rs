use std::time::Duration;

use colored::Colorize;
use serde_json::json;

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::output::{Format, format_age, print_json};
use crate::store::lease::LeaseManager;
use crate::store::requests::{RequestChannel, SubmitOutcome};

use super::{actor, parse_json_arg};

pub fn start(
    config: &Config,
    name: Option<&str>,
    once: bool,
    poll_ms: u64,
    format: Format,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => actor(config)?,
    };
    let mut orch = Orchestrator::start(&config.root, name, std::process::id())?;
    let state = orch.state().clone();
    match format {
        Format::Json => print_json(&state)?,
        Format::Pretty => println!(
            "Orchestrator '{}' holds the lease {}",
            state.name.cyan().bold(),
            format!("(pid {})", state.pid).dimmed()
        ),
        Format::Minimal => println!("{}", state.pid),
    }

    let handled = if once {
        let pass = orch.run_once()?;
        orch.stop()?;
        pass.handled
    } else {
        orch.run(Duration::from_millis(poll_ms.max(1)))?
    };
    match format {
        Format::Json => println!("{}", json!({"stopped": true, "handled": handled})),
        Format::Pretty => println!("Stopped after {} request(s).", handled.to_string().bold()),
        Format::Minimal => println!("{handled}"),
    }
    Ok(())
}

pub fn status(config: &Config, format: Format) -> Result<()> {
    let status = LeaseManager::open(&config.root).status()?;
    match format {
        Format::Json => print_json(&status)?,
        Format::Pretty => {
            if status.held {
                println!(
                    "{} {} {}",
                    "held".green().bold(),
                    status.holder_name.as_deref().unwrap_or("?").cyan(),
                    status
                        .holder_pid
                        .map(|p| format!("pid={p}"))
                        .unwrap_or_default()
                        .dimmed()
                );
            } else if status.stale {
                println!(
                    "{} {}",
                    "free (stale state from a dead holder)".yellow(),
                    status
                        .holder_pid
                        .map(|p| format!("pid={p}"))
                        .unwrap_or_default()
                        .dimmed()
                );
            } else {
                println!("{}", "free".dimmed());
            }
            if let Some(age) = status.heartbeat_age_secs {
                println!("  {} {} ago", "heartbeat:".dimmed(), format_age(age));
            }
        }
        Format::Minimal => println!("{}", if status.held { "held" } else { "free" }),
    }
    Ok(())
}

pub fn stop(config: &Config, wait_sec: u64, format: Format) -> Result<()> {
    request(config, "shutdown", None, wait_sec, format)
}

pub fn request(
    config: &Config,
    action: &str,
    payload: Option<&str>,
    wait_sec: u64,
    format: Format,
) -> Result<()> {
    let payload = match payload {
        Some(raw) => parse_json_arg("--payload", raw)?,
        None => json!({}),
    };
    let outcome = RequestChannel::open(&config.root).submit_request(
        action,
        payload,
        actor(config)?,
        Duration::from_secs(wait_sec),
    )?;
    print_submit(&outcome, format)
}

pub fn response(config: &Config, id: &str, format: Format) -> Result<()> {
    let outcome = match RequestChannel::open(&config.root).poll_response(id)? {
        Some(resp) => SubmitOutcome::Response {
            id: resp.id,
            response: resp.response,
        },
        None => SubmitOutcome::Queued { id: id.to_string() },
    };
    print_submit(&outcome, format)
}

fn print_submit(outcome: &SubmitOutcome, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(outcome)?,
        Format::Pretty => match outcome {
            SubmitOutcome::Queued { id } => {
                println!("{} {}", "queued".yellow(), id.dimmed());
            }
            SubmitOutcome::Response { id, response } => {
                println!("{} {}", "answered".green(), id.dimmed());
                println!("  {}", serde_json::to_string_pretty(response)?);
            }
        },
        Format::Minimal => match outcome {
            SubmitOutcome::Queued { id } => println!("queued {id}"),
            SubmitOutcome::Response { response, .. } => println!("{response}"),
        },
    }
    Ok(())
}
