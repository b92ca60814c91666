//! repmgrd Error Types

use thiserror::Error;

/// Result type alias for repmgrd operations
pub type Result<T> = std::result::Result<T, Error>;

/// repmgrd error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // LSN errors
    #[error("could not parse transaction log location \"{0}\"")]
    LsnParse(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("The replication cluster is not configured (schema {0} missing)")]
    ClusterMisconfigured(String),

    // Primary connection / failover errors
    #[error("We couldn't reconnect to the primary for long enough")]
    PrimaryUnreachable,

    #[error("No primary reachable for cluster '{0}'")]
    NoPrimary(String),

    #[error("It seems like we have been promoted")]
    RolePromoted,

    #[error("Can't reach most of the nodes; minority partition")]
    MinorityPartition,

    // Signal / lifecycle
    #[error("Operation cancelled")]
    Cancelled,

    // I/O / process errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable process exit codes, matching the daemon's documented exit statuses.
///
/// Discriminants are assigned by this implementation; only `Success` is
/// guaranteed to be `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitStatus {
    Success = 0,
    ErrBadConfig = 1,
    ErrBadQuery = 2,
    ErrDbCon = 3,
    ErrDbQuery = 4,
    ErrPromoted = 5,
    ErrFailoverFail = 6,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl Error {
    /// Map an error to the exit status the daemon should terminate with,
    /// when it is fatal. Transient errors (skip-the-tick cases) are never
    /// converted through this path; callers decide fatality contextually.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Error::Config(_) | Error::ConfigParse(_) | Error::ClusterMisconfigured(_) => {
                ExitStatus::ErrBadConfig
            }
            Error::QueryExecution(_) => ExitStatus::ErrBadQuery,
            Error::PrimaryUnreachable | Error::NoPrimary(_) => ExitStatus::ErrDbCon,
            Error::Database(_) => ExitStatus::ErrDbQuery,
            Error::RolePromoted => ExitStatus::ErrPromoted,
            Error::MinorityPartition => ExitStatus::ErrFailoverFail,
            Error::LsnParse(_) | Error::Cancelled | Error::Io(_) => ExitStatus::ErrBadQuery,
        }
    }
}
