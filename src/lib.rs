//! repmgrd - Replication manager daemon for a PostgreSQL primary/standby cluster
//!
//! Runs alongside each standby, samples replication progress, records it on
//! the primary, and on loss of the primary either re-discovers a promoted
//! primary (manual policy) or runs an election among surviving standbys and
//! dispatches promotion/follow commands (automatic policy).

pub mod config;
pub mod daemon;
pub mod db;
pub mod election;
pub mod lsn;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod supervisor;

pub mod error;
pub use error::{Error, ExitStatus, Result};

pub mod prelude {
    pub use crate::config::RepmgrConfig;
    pub use crate::daemon::Daemon;
    pub use crate::db::{DbConn, PgLink, PrimaryConn};
    pub use crate::error::{Error, ExitStatus, Result};
    pub use crate::lsn::Lsn;
}
