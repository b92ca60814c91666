//! repmgrd Configuration
//!
//! Configuration structures for the replication manager daemon, loaded from
//! a TOML file the way the rest of this codebase loads configuration.

use serde::{Deserialize, Serialize};

/// Supervisor failover policy (§4.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverPolicy {
    /// Only re-discover a primary; never promote a standby automatically.
    Manual,
    /// Run the election engine and promote the winning standby.
    Automatic,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        FailoverPolicy::Manual
    }
}

/// Main repmgrd configuration, as read from `repmgrd.conf` (TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepmgrConfig {
    /// Local node id; mandatory, unique within `cluster_name`
    pub node: i32,

    /// Cluster name; used to derive the schema name and scope peer queries
    pub cluster_name: String,

    /// How to reach the local database (libpq connection string or URL)
    pub conninfo: String,

    /// Supervisor failover policy
    #[serde(default)]
    pub failover: FailoverPolicy,

    /// Shell command invoked when this node wins an election
    #[serde(default)]
    pub promote_command: String,

    /// Shell command invoked when a peer wins an election
    #[serde(default)]
    pub follow_command: String,

    /// Log level, passed through to the `tracing` `EnvFilter`
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Log facility; accepted for interface compatibility, has no effect
    /// on this implementation (no syslog backend)
    #[serde(default)]
    pub logfacility: String,

    /// Monitoring tick interval, in seconds (default 3, per the core contract)
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Number of primary-reconnect attempts before handing off to the
    /// supervisor (default 15, per the core contract)
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay between primary-reconnect attempts, in seconds (default 20)
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Number of manual-failover re-discovery attempts (default 6)
    #[serde(default = "default_retry_promote_attempts")]
    pub retry_promote_attempts: u32,

    /// Delay between manual-failover re-discovery attempts, in seconds
    /// (default 300 = 5 minutes)
    #[serde(default = "default_retry_promote_interval_secs")]
    pub retry_promote_interval_secs: u64,
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    3
}

fn default_reconnect_attempts() -> u32 {
    15
}

fn default_reconnect_interval_secs() -> u64 {
    20
}

fn default_retry_promote_attempts() -> u32 {
    6
}

fn default_retry_promote_interval_secs() -> u64 {
    300
}

impl RepmgrConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RepmgrConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: RepmgrConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster_name.is_empty() {
            return Err(crate::Error::Config("cluster_name cannot be empty".into()));
        }

        if self.conninfo.is_empty() {
            return Err(crate::Error::Config("conninfo cannot be empty".into()));
        }

        if self.failover == FailoverPolicy::Automatic && self.promote_command.is_empty() {
            return Err(crate::Error::Config(
                "promote_command is required when failover = \"automatic\"".into(),
            ));
        }

        Ok(())
    }

    /// Derived schema name: fixed prefix concatenated with the cluster name
    pub fn schema_name(&self) -> String {
        format!("{}{}", SCHEMA_PREFIX, self.cluster_name)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn reconnect_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn retry_promote_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_promote_interval_secs)
    }
}

/// Fixed schema prefix; the full schema is `<prefix><cluster_name>`
pub const SCHEMA_PREFIX: &str = "repmgr_";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
node = 1
cluster_name = "maincluster"
conninfo = "host=node1.example.com dbname=repmgr user=repmgr"
failover = "manual"
"#;

        let config = RepmgrConfig::from_str(toml).unwrap();
        assert_eq!(config.node, 1);
        assert_eq!(config.failover, FailoverPolicy::Manual);
        assert_eq!(config.schema_name(), "repmgr_maincluster");
        assert_eq!(config.monitor_interval_secs, 3);
        assert_eq!(config.reconnect_attempts, 15);
    }

    #[test]
    fn test_automatic_requires_promote_command() {
        let toml = r#"
node = 1
cluster_name = "maincluster"
conninfo = "host=node1.example.com dbname=repmgr"
failover = "automatic"
"#;
        assert!(RepmgrConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_missing_cluster_name() {
        let toml = r#"
node = 1
cluster_name = ""
conninfo = "host=node1"
"#;
        assert!(RepmgrConfig::from_str(toml).is_err());
    }
}
