use colored::Colorize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{HiveError, Result};
use crate::output::{Format, print_json};
use crate::store::tasks::{CompleteOutcome, PollOutcome, SubmitStatus, TaskOptions, TaskQueue};

use super::{actor, parse_json_arg};

pub fn submit(
    config: &Config,
    name: &str,
    input: &str,
    options: Option<&str>,
    format: Format,
) -> Result<()> {
    let input = parse_json_arg("--input", input)?;
    let options: TaskOptions = match options {
        Some(raw) => serde_json::from_value(parse_json_arg("--options", raw)?)
            .map_err(|e| HiveError::InvalidInput(format!("--options: {e}")))?,
        None => TaskOptions::default(),
    };
    let receipt = TaskQueue::open(&config.root).submit(name, &input, options, actor(config)?)?;
    match format {
        Format::Json => print_json(&receipt)?,
        Format::Pretty => {
            let status = match receipt.status {
                SubmitStatus::Pending => receipt.status.to_string().yellow(),
                SubmitStatus::AlreadyPending => receipt.status.to_string().yellow().dimmed(),
                SubmitStatus::Resolved => receipt.status.to_string().green(),
            };
            println!("{} {}", status, receipt.id.dimmed());
            if let Some(ref content) = receipt.content {
                println!("  {}", content);
            }
        }
        Format::Minimal => println!("{}", receipt.id),
    }
    Ok(())
}

pub fn claim(config: &Config, id: &str, format: Format) -> Result<()> {
    let task = TaskQueue::open(&config.root).claim(id, actor(config)?)?;
    match format {
        Format::Json => print_json(&task)?,
        Format::Pretty => println!(
            "Claimed {} ({})",
            task.task_name.bold(),
            task.id.get(..12).unwrap_or(&task.id).dimmed()
        ),
        Format::Minimal => println!("{}", task.id),
    }
    Ok(())
}

/// `content` is stored as a JSON string unless `as_json` asks for it to be
/// parsed first.
pub fn complete(
    config: &Config,
    id: &str,
    content: &str,
    as_json: bool,
    notes: Option<&str>,
    format: Format,
) -> Result<()> {
    let content = if as_json {
        parse_json_arg("--content", content)?
    } else {
        Value::String(content.to_string())
    };
    let outcome = TaskQueue::open(&config.root).complete(id, content, notes, actor(config)?)?;
    match format {
        Format::Json => print_json(&outcome)?,
        Format::Pretty => match &outcome {
            CompleteOutcome::Ok { result } => println!("{} {}", "completed".green(), result.id.dimmed()),
            CompleteOutcome::AlreadyResolved { result, conflict } => {
                println!("{} {}", "already resolved".yellow(), result.id.dimmed());
                if *conflict {
                    println!(
                        "  {} conflicting result ignored; kept result from '{}'",
                        "warning:".yellow(),
                        result.completed_by.as_deref().unwrap_or("-")
                    );
                }
            }
        },
        Format::Minimal => match &outcome {
            CompleteOutcome::Ok { .. } => println!("ok"),
            CompleteOutcome::AlreadyResolved { conflict: true, .. } => println!("conflict"),
            CompleteOutcome::AlreadyResolved { .. } => println!("already_resolved"),
        },
    }
    Ok(())
}

pub fn poll(config: &Config, id: &str, format: Format) -> Result<()> {
    let outcome = TaskQueue::open(&config.root).poll(id)?;
    match format {
        Format::Json => print_json(&outcome)?,
        Format::Pretty => match &outcome {
            PollOutcome::Pending { task } => {
                println!("{} {}", "pending".yellow(), task.task_name.bold());
                if let Some(ref who) = task.claimed_by {
                    println!("  {} {}", "claimed by:".dimmed(), who.cyan());
                }
            }
            PollOutcome::Resolved { result } => {
                println!("{} {}", "resolved".green(), result.task_name.bold());
                println!("  {}", result.content);
            }
        },
        Format::Minimal => match &outcome {
            PollOutcome::Pending { .. } => println!("pending"),
            PollOutcome::Resolved { result } => println!("{}", result.content),
        },
    }
    Ok(())
}

pub fn pending(config: &Config, format: Format) -> Result<()> {
    let tasks = TaskQueue::open(&config.root).list_pending()?;
    match format {
        Format::Json => print_json(&tasks)?,
        Format::Pretty => {
            if tasks.is_empty() {
                println!("{}", "No pending tasks.".dimmed());
            }
            for t in &tasks {
                println!(
                    "{} {} {} {}",
                    t.id.get(..12).unwrap_or(&t.id).dimmed(),
                    t.task_name.bold(),
                    t.canonical_input,
                    t.claimed_by
                        .as_deref()
                        .map(|c| format!("claimed by {c}"))
                        .unwrap_or_default()
                        .cyan(),
                );
            }
        }
        Format::Minimal => {
            for t in &tasks {
                println!("{} {}", t.id, t.task_name);
            }
        }
    }
    Ok(())
}
