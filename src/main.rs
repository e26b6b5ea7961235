use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hive::config::Config;
use hive::output::Format;
use hive::store::messaging::MemoFilter;
use hive::store::scope_locks::LockMode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "hive",
    version,
    about = "Filesystem coordination substrate for cooperating agents"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Coordination root (defaults to $HIVE_ROOT, then .hive)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Acting identity for writes (defaults to $HIVE_AGENT)
    #[arg(long, global = true)]
    actor: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Leadership lease and the orchestrator request channel
    Orchestrator {
        #[command(subcommand)]
        action: OrchestratorAction,
    },
    /// Agent presence registry
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
    /// Declare an advisory lock over one or more scopes
    Lock {
        /// Scopes to lock (paths, modules, any label)
        #[arg(required = true)]
        scopes: Vec<String>,
        /// Lock mode
        #[arg(long, value_enum, default_value = "no_write")]
        mode: LockMode,
        /// Time to live in minutes (defaults to $HIVE_LOCK_TTL_MIN, then 120)
        #[arg(long)]
        ttl_min: Option<u64>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
    /// Release a scope lock
    Unlock {
        /// Lock ID
        lock_id: String,
    },
    /// List scope locks
    Locks {
        /// Include expired locks
        #[arg(long)]
        all: bool,
    },
    /// Report expired-but-unreleased and long-lived locks
    LocksAudit {
        /// Flag active locks older than this many hours
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
    /// Send a memo
    Memo {
        /// Recipients (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<String>,
        /// Subject line
        #[arg(long)]
        subject: String,
        /// Memo body
        #[arg(long, default_value = "")]
        body: String,
        /// Expire after this many minutes
        #[arg(long)]
        ttl_min: Option<u64>,
        /// Related task ID
        #[arg(long)]
        task: Option<String>,
    },
    /// List memos
    Memos {
        /// Only memos addressed to this recipient
        #[arg(long)]
        to: Option<String>,
        /// Only memos from this sender
        #[arg(long)]
        from: Option<String>,
        /// Only memos about this task
        #[arg(long)]
        task: Option<String>,
        /// Include expired memos
        #[arg(long)]
        all: bool,
    },
    /// Assign a task to an agent (writes a memo and an assignment)
    Assign {
        /// Task ID
        task_id: String,
        /// Target agent ID
        #[arg(long)]
        agent: String,
        /// Note for the assignee
        #[arg(long)]
        note: Option<String>,
    },
    /// Content-addressed task queue
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },
    /// Show the event log
    Events {
        /// Only the last N events
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum OrchestratorAction {
    /// Acquire the lease and serve requests until shutdown
    Start {
        /// Orchestrator name (defaults to the actor)
        #[arg(long)]
        name: Option<String>,
        /// Drain the inbox once, then release the lease
        #[arg(long)]
        once: bool,
        /// Inbox poll interval in milliseconds
        #[arg(long, default_value_t = 200)]
        poll_ms: u64,
    },
    /// Show who holds the lease
    Status,
    /// Ask the running orchestrator to shut down
    Stop {
        /// Seconds to wait for acknowledgement
        #[arg(long, default_value_t = 5)]
        wait_sec: u64,
    },
    /// Submit a request to the orchestrator
    Request {
        /// Action name (ping, set_role, assign_task, shutdown)
        #[arg(long)]
        action: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Seconds to wait for a response (0 queues and returns)
        #[arg(long, default_value_t = 0)]
        wait_sec: u64,
    },
    /// Fetch the response to an earlier request
    Response {
        /// Request ID
        id: String,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// Register an agent
    Register {
        /// Agent name
        #[arg(long)]
        name: String,
        /// Declared role
        #[arg(long)]
        role: String,
        /// Process ID (defaults to this process)
        #[arg(long)]
        pid: Option<u32>,
        /// Host name (defaults to this host)
        #[arg(long)]
        host: Option<String>,
    },
    /// Refresh an agent's heartbeat
    Heartbeat {
        /// Agent ID
        id: String,
    },
    /// List agents with their liveness
    List {
        /// Heartbeats older than this are stale
        #[arg(long)]
        stale_sec: Option<u64>,
        /// Heartbeats older than this are dead
        #[arg(long)]
        dead_sec: Option<u64>,
    },
}

#[derive(Subcommand)]
enum TasksAction {
    /// Submit a task, or get its result if one exists
    Submit {
        /// Task name
        #[arg(long)]
        name: String,
        /// Task input as JSON
        #[arg(long)]
        input: String,
        /// Volatile options as JSON (excluded from the task ID)
        #[arg(long)]
        options: Option<String>,
    },
    /// Mark a task as being worked on
    Claim {
        /// Task ID
        id: String,
    },
    /// Record a task's result (first writer wins)
    Complete {
        /// Task ID
        id: String,
        /// Result content
        #[arg(long)]
        content: String,
        /// Parse --content as JSON instead of storing it as a string
        #[arg(long)]
        json: bool,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a task's state
    Poll {
        /// Task ID
        id: String,
    },
    /// List tasks without a result
    Pending,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("HIVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn run(cli: Cli, format: Format) -> hive::error::Result<()> {
    let mut config = Config::from_env(cli.root.as_deref())?;
    if let Some(actor) = hive::agent::resolve_actor(cli.actor.as_deref()) {
        config.actor = Some(actor);
    }
    tracing::debug!(root = %config.root.display(), actor = ?config.actor, "config loaded");

    match cli.command {
        Commands::Orchestrator { action } => match action {
            OrchestratorAction::Start {
                name,
                once,
                poll_ms,
            } => hive::commands::orchestrator::start(&config, name.as_deref(), once, poll_ms, format),
            OrchestratorAction::Status => hive::commands::orchestrator::status(&config, format),
            OrchestratorAction::Stop { wait_sec } => {
                hive::commands::orchestrator::stop(&config, wait_sec, format)
            }
            OrchestratorAction::Request {
                action,
                payload,
                wait_sec,
            } => hive::commands::orchestrator::request(
                &config,
                &action,
                payload.as_deref(),
                wait_sec,
                format,
            ),
            OrchestratorAction::Response { id } => {
                hive::commands::orchestrator::response(&config, &id, format)
            }
        },
        Commands::Agents { action } => match action {
            AgentsAction::Register {
                name,
                role,
                pid,
                host,
            } => hive::commands::agents::register(
                &config,
                &name,
                &role,
                pid,
                host.as_deref(),
                format,
            ),
            AgentsAction::Heartbeat { id } => hive::commands::agents::heartbeat(&config, &id, format),
            AgentsAction::List {
                stale_sec,
                dead_sec,
            } => hive::commands::agents::list(&config, stale_sec, dead_sec, format),
        },
        Commands::Lock {
            scopes,
            mode,
            ttl_min,
            note,
        } => hive::commands::locks::lock(&config, scopes, mode, ttl_min, note.as_deref(), format),
        Commands::Unlock { lock_id } => hive::commands::locks::unlock(&config, &lock_id, format),
        Commands::Locks { all } => hive::commands::locks::list(&config, all, format),
        Commands::LocksAudit { older_than_hours } => {
            hive::commands::locks::audit(&config, older_than_hours, format)
        }
        Commands::Memo {
            to,
            subject,
            body,
            ttl_min,
            task,
        } => hive::commands::memo::send(
            &config,
            to,
            &subject,
            &body,
            ttl_min,
            task.as_deref(),
            format,
        ),
        Commands::Memos {
            to,
            from,
            task,
            all,
        } => hive::commands::memo::list(
            &config,
            MemoFilter {
                to,
                from,
                related_task_id: task,
                include_expired: all,
            },
            format,
        ),
        Commands::Assign {
            task_id,
            agent,
            note,
        } => hive::commands::memo::assign(&config, &task_id, &agent, note.as_deref(), format),
        Commands::Tasks { action } => match action {
            TasksAction::Submit {
                name,
                input,
                options,
            } => hive::commands::tasks::submit(&config, &name, &input, options.as_deref(), format),
            TasksAction::Claim { id } => hive::commands::tasks::claim(&config, &id, format),
            TasksAction::Complete {
                id,
                content,
                json,
                notes,
            } => hive::commands::tasks::complete(
                &config,
                &id,
                &content,
                json,
                notes.as_deref(),
                format,
            ),
            TasksAction::Poll { id } => hive::commands::tasks::poll(&config, &id, format),
            TasksAction::Pending => hive::commands::tasks::pending(&config, format),
        },
        Commands::Events { limit } => hive::commands::events::list(&config, limit, format),
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(e.exit_code());
    }
}
