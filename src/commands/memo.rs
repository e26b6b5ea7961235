use colored::Colorize;

use crate::config::Config;
use crate::error::Result;
use crate::output::{Format, print_json, truncate};
use crate::store::messaging::{MemoFilter, MemoStatus, MessageStore};

use super::{actor, minutes};

pub fn send(
    config: &Config,
    to: Vec<String>,
    subject: &str,
    body: &str,
    ttl_min: Option<u64>,
    task: Option<&str>,
    format: Format,
) -> Result<()> {
    let ttl = ttl_min.map(|m| minutes("--ttl-min", m)).transpose()?;
    let memo = MessageStore::open(&config.root).send_memo(to, subject, body, ttl, task, actor(config)?)?;
    match format {
        Format::Json => print_json(&memo)?,
        Format::Pretty => println!(
            "Sent {} to {}: {}",
            memo.id.dimmed(),
            memo.to.join(", ").cyan(),
            memo.subject
        ),
        Format::Minimal => println!("{}", memo.id),
    }
    Ok(())
}

pub fn list(config: &Config, filter: MemoFilter, format: Format) -> Result<()> {
    let memos = MessageStore::open(&config.root).list_memos(&filter)?;
    match format {
        Format::Json => print_json(&memos)?,
        Format::Pretty => {
            if memos.is_empty() {
                println!("{}", "No memos.".dimmed());
            }
            for view in &memos {
                let m = &view.memo;
                let expired = if view.status == MemoStatus::Expired {
                    " (expired)".red().to_string()
                } else {
                    String::new()
                };
                println!(
                    "{} {} {} {}{}",
                    m.created_at.format("%m-%d %H:%M").to_string().dimmed(),
                    format!("{} -> {}", m.from, m.to.join(",")).cyan(),
                    m.subject.bold(),
                    m.related_task_id
                        .as_deref()
                        .map(|t| format!("[{t}]"))
                        .unwrap_or_default()
                        .dimmed(),
                    expired,
                );
                if !m.body.is_empty() {
                    println!("  {}", m.body);
                }
            }
        }
        Format::Minimal => {
            for view in &memos {
                println!("{} {}: {}", view.memo.id, view.memo.from, truncate(&view.memo.subject, 40));
            }
        }
    }
    Ok(())
}

pub fn assign(
    config: &Config,
    task_id: &str,
    agent_id: &str,
    note: Option<&str>,
    format: Format,
) -> Result<()> {
    let assignment = MessageStore::open(&config.root).assign(task_id, agent_id, note, actor(config)?)?;
    match format {
        Format::Json => print_json(&assignment)?,
        Format::Pretty => {
            println!(
                "Assigned {} to {}",
                assignment.task_id.bold(),
                assignment.agent_id.cyan()
            );
            println!("  {} {}", "memo:".dimmed(), assignment.memo_id);
        }
        Format::Minimal => println!("{}", assignment.id),
    }
    Ok(())
}
