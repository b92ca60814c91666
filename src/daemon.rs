//! Daemon orchestration and lifecycle (§4.7, §9 re-architecture note)
//!
//! Owns the local and primary connections as plain values rather than as
//! process globals, threading them through the monitoring loop and
//! handing them to the supervisor across state transitions.

use tracing::info;

use crate::config::RepmgrConfig;
use crate::db::{DbConn, PgLink};
use crate::error::{Error, ExitStatus, Result};
use crate::monitor::{self, TickOutcome};
use crate::registry;
use crate::supervisor::{self, SupervisorOutcome};

/// Connect to the local database, confirm it is a standby, verify the
/// cluster schema, locate the primary, and self-register. Fatal on any
/// failure (§7: cluster misconfiguration, absent primary).
pub struct Daemon {
    pub local: PgLink,
    pub primary: PgLink,
    pub primary_node_id: i32,
    pub config: RepmgrConfig,
}

impl Daemon {
    pub async fn bootstrap(config: RepmgrConfig) -> Result<Self> {
        let local = PgLink::connect(&config.conninfo).await?;

        if !local.is_in_recovery().await? {
            return Err(Error::Config(
                "local node is not a standby at startup".into(),
            ));
        }

        registry::ensure_schema(&local, &config).await?;
        let (primary, primary_node_id) = registry::discover_primary(&local, &config).await?;
        registry::ensure_self_registered(&primary, &config).await?;

        info!(
            "bootstrap complete: node {} following primary node {}",
            config.node, primary_node_id
        );

        Ok(Self { local, primary, primary_node_id, config })
    }

    /// Run the monitoring loop until a terminal state is reached (role
    /// change, supervisor exhaustion, election outcome, or an interrupt
    /// signal).
    pub async fn run(self) -> Result<ExitStatus> {
        let Daemon { mut local, mut primary, mut primary_node_id, config } = self;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received interrupt; shutting down");
                    cleanup(&local, &primary).await;
                    return Ok(ExitStatus::Success);
                }
                tick = monitor::tick(&local, &primary, &config, primary_node_id) => {
                    match tick? {
                        TickOutcome::Continue => {}
                        TickOutcome::Promoted => {
                            cleanup(&local, &primary).await;
                            return Ok(ExitStatus::ErrPromoted);
                        }
                        TickOutcome::PrimaryLost => {
                            match supervisor::supervise(local, &config).await {
                                Ok(SupervisorOutcome::Reconnected { local: l2, primary: p2, primary_node_id: pid2 }) => {
                                    primary.close().await;
                                    local = l2;
                                    primary = p2;
                                    primary_node_id = pid2;
                                }
                                Ok(SupervisorOutcome::Promoted { local: l2 }) => {
                                    primary.close().await;
                                    l2.close().await;
                                    return Ok(ExitStatus::ErrPromoted);
                                }
                                Ok(SupervisorOutcome::Exhausted { local: l2 }) => {
                                    primary.close().await;
                                    l2.close().await;
                                    return Ok(ExitStatus::ErrDbCon);
                                }
                                Err(e) => {
                                    primary.close().await;
                                    return Err(e);
                                }
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(config.monitor_interval()).await;
        }
    }
}

/// Cancel any in-flight query on the primary connection and close both
/// connections, deduplicating the case where they are the same object
/// (immediately post-promotion the local and primary links may coincide
/// in practice, though this implementation never actually aliases them —
/// each `PgLink` owns a distinct pool, so `close` is simply called on
/// both and is always safe to call twice).
async fn cleanup(local: &PgLink, primary: &PgLink) {
    primary.cancel_pending_insert().await;
    primary.close().await;
    local.close().await;
}
