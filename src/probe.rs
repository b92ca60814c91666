//! Node probe (§4.3)
//!
//! Probing a peer means connecting directly to it (not through the
//! primary) and reading the row it last published for itself in the
//! replicated `repl_nodes` table — every standby carries the whole
//! database, cluster schema included, so the peer's own connection sees
//! its own most recent publish without needing to go through anyone else.

use tracing::debug;

use crate::config::RepmgrConfig;
use crate::db::PgLink;
use crate::lsn::Lsn;
use crate::registry;

/// The outcome of probing one peer: either its published position, or
/// unreachable. Connection and query failures both collapse to
/// `unreachable` — an unreachable peer simply does not count toward
/// quorum or candidacy, it is not an error surfaced to the caller.
pub async fn probe(conninfo: &str, node_id: i32, config: &RepmgrConfig) -> Option<Lsn> {
    let link = match PgLink::connect(conninfo).await {
        Ok(link) => link,
        Err(e) => {
            debug!("probe: node {} unreachable: {}", node_id, e);
            return None;
        }
    };

    let result = registry::last_standby_location(&link, config, node_id).await;
    link.close().await;

    match result {
        Ok(lsn) => Some(lsn),
        Err(e) => {
            debug!("probe: node {} query failed: {}", node_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unreachable_conninfo_returns_none() {
        let config = RepmgrConfig {
            node: 1,
            cluster_name: "maincluster".into(),
            conninfo: "host=localhost".into(),
            failover: crate::config::FailoverPolicy::Manual,
            promote_command: String::new(),
            follow_command: String::new(),
            loglevel: "info".into(),
            logfacility: String::new(),
            monitor_interval_secs: 3,
            reconnect_attempts: 15,
            reconnect_interval_secs: 20,
            retry_promote_attempts: 6,
            retry_promote_interval_secs: 300,
        };

        // No Postgres instance is reachable at this address in the test
        // environment, so this exercises the "unreachable" path.
        let result = probe("host=127.0.0.1 port=1 connect_timeout=1", 2, &config).await;
        assert!(result.is_none());
    }
}
