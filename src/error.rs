use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("lease is held by another process{}", holder_suffix(.holder_pid))]
    LeaseContention { holder_pid: Option<u32> },

    #[error("schema version mismatch in '{path}': found {found}, expected {expected}")]
    SchemaVersionMismatch {
        path: String,
        found: u64,
        expected: u32,
    },

    #[error("actor identity required for write operations (pass --actor or set HIVE_AGENT)")]
    IdentityRequired,

    #[error("agent '{0}' not found in registry")]
    AgentNotFound(String),

    #[error("scope lock '{0}' not found")]
    LockNotFound(String),

    #[error("memo '{0}' not found")]
    MemoNotFound(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("invalid id '{0}': must be non-empty ASCII alphanumeric/hyphen/underscore/dot")]
    InvalidId(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt file '{0}': {1}")]
    CorruptFile(String, String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HiveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LeaseContention { .. } => "already_held",
            Self::SchemaVersionMismatch { .. } => "schema_version_mismatch",
            Self::IdentityRequired => "identity_required",
            Self::AgentNotFound(_) => "agent_not_found",
            Self::LockNotFound(_) => "lock_not_found",
            Self::MemoNotFound(_) => "memo_not_found",
            Self::TaskNotFound(_) => "task_not_found",
            Self::InvalidId(_) => "invalid_id",
            Self::InvalidInput(_) => "invalid_input",
            Self::CorruptFile(_, _) => "corrupt_file",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::Locked(_) => "locked",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
        }
    }

    /// Process exit code for the CLI: `2` lease contention, `3` schema mismatch, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LeaseContention { .. } => 2,
            Self::SchemaVersionMismatch { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;

fn holder_suffix(pid: &Option<u32>) -> String {
    pid.map(|p| format!(" (pid {p})")).unwrap_or_default()
}
