use colored::Colorize;

use crate::config::Config;
use crate::error::Result;
use crate::output::{Format, print_json};
use crate::store::events::EventLog;

pub fn list(config: &Config, limit: Option<usize>, format: Format) -> Result<()> {
    let events = EventLog::open(&config.root).read(limit)?;
    match format {
        Format::Json => print_json(&events)?,
        Format::Pretty => {
            if events.is_empty() {
                println!("{}", "No events.".dimmed());
            }
            for e in &events {
                let outcome = match e.outcome.as_str() {
                    "ok" | "held" | "released" | "pending" | "resolved" => e.outcome.green(),
                    "already_held" | "already_pending" | "result_conflict" => e.outcome.yellow(),
                    _ => e.outcome.normal(),
                };
                println!(
                    "{} {} {}.{} {} {}",
                    e.timestamp.format("%H:%M:%S").to_string().dimmed(),
                    format!("[{}]", e.actor).cyan(),
                    e.component,
                    e.op,
                    e.ref_id.dimmed(),
                    outcome
                );
            }
        }
        Format::Minimal => {
            for e in &events {
                println!("{} {} {}", e.component, e.op, e.outcome);
            }
        }
    }
    Ok(())
}
