//! Reconnect/failover supervisor (§4.5)
//!
//! Entered when the monitoring loop reports the primary unreachable after
//! its own reconnect bound is exhausted. Drives either manual
//! re-discovery or the election engine, depending on configured policy.

use tracing::{error, info, warn};

use crate::config::{FailoverPolicy, RepmgrConfig};
use crate::db::PgLink;
use crate::election::{self, ElectionOutcome};
use crate::error::{Error, Result};
use crate::registry;

pub enum SupervisorOutcome {
    /// A primary connection is available again; the monitoring loop can
    /// resume against it.
    Reconnected {
        local: PgLink,
        primary: PgLink,
        primary_node_id: i32,
    },
    /// The local node itself won the election and has been promoted.
    Promoted { local: PgLink },
    /// Manual re-discovery exhausted its attempt budget.
    Exhausted { local: PgLink },
}

pub async fn supervise(local: PgLink, config: &RepmgrConfig) -> Result<SupervisorOutcome> {
    match config.failover {
        FailoverPolicy::Manual => manual_rediscover(local, config).await,
        FailoverPolicy::Automatic => automatic_failover(local, config).await,
    }
}

async fn manual_rediscover(local: PgLink, config: &RepmgrConfig) -> Result<SupervisorOutcome> {
    for attempt in 1..=config.retry_promote_attempts {
        match registry::discover_primary(&local, config).await {
            Ok((primary, primary_node_id)) => {
                info!(
                    "manual failover: discovered primary node {} on attempt {}",
                    primary_node_id, attempt
                );
                return Ok(SupervisorOutcome::Reconnected { local, primary, primary_node_id });
            }
            Err(e) => {
                warn!("manual failover: re-discovery attempt {} failed: {}", attempt, e);
                tokio::time::sleep(config.retry_promote_interval()).await;
            }
        }
    }
    error!(
        "manual failover: exhausted {} re-discovery attempts",
        config.retry_promote_attempts
    );
    Ok(SupervisorOutcome::Exhausted { local })
}

/// Runs the election against the owned local connection, then handles the
/// connection lifecycle around it (§4.6 step 7): the primary's conninfo for
/// a "followed" outcome is looked up before `local` is closed, since
/// `local` is the only open connection to look it up through; `local` is
/// then closed before the promote/follow command is dispatched, and
/// reopened unconditionally afterward so the monitoring loop can resume.
async fn automatic_failover(local: PgLink, config: &RepmgrConfig) -> Result<SupervisorOutcome> {
    let outcome = election::run_election(&local, config).await;

    let primary_conninfo = match &outcome {
        Ok(ElectionOutcome::Followed { primary_node }) => {
            registry::node_conninfo(&local, config, *primary_node).await.map(Some)
        }
        _ => Ok(None),
    };

    local.close().await;
    let outcome = outcome?;
    let primary_conninfo = primary_conninfo?;
    election::dispatch(config, outcome).await;

    let reconnected_local = PgLink::connect(&config.conninfo).await?;
    match outcome {
        ElectionOutcome::Promoted => Ok(SupervisorOutcome::Promoted { local: reconnected_local }),
        ElectionOutcome::Followed { primary_node } => {
            let conninfo = primary_conninfo.ok_or_else(|| {
                Error::QueryExecution(format!("no conninfo looked up for node {}", primary_node))
            })?;
            let primary = PgLink::connect(&conninfo).await?;
            Ok(SupervisorOutcome::Reconnected {
                local: reconnected_local,
                primary,
                primary_node_id: primary_node,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(policy: FailoverPolicy) -> RepmgrConfig {
        RepmgrConfig {
            node: 1,
            cluster_name: "maincluster".into(),
            conninfo: "host=localhost".into(),
            failover: policy,
            promote_command: String::new(),
            follow_command: String::new(),
            loglevel: "info".into(),
            logfacility: String::new(),
            monitor_interval_secs: 3,
            reconnect_attempts: 15,
            reconnect_interval_secs: 20,
            retry_promote_attempts: 2,
            retry_promote_interval_secs: 0,
        }
    }

    #[test]
    fn test_manual_is_default_policy() {
        let config = sample_config(FailoverPolicy::Manual);
        assert_eq!(config.failover, FailoverPolicy::Manual);
    }
}
