//! Monitoring loop (§4.4)
//!
//! One call to [`tick`] performs the full per-tick sequence: liveness
//! check and bounded reconnect, role re-validation, cancel of any
//! still-in-flight insert, sampling of both sides, lag computation, and
//! the fire-and-forget record of the sample.

use tracing::{info, warn};

use crate::config::RepmgrConfig;
use crate::db::{DbConn, PrimaryConn};
use crate::error::Result;
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Ordinary tick; monitoring continues.
    Continue,
    /// The local node is no longer a standby; the daemon must exit.
    Promoted,
    /// The primary did not recover within the reconnect bound; hand off
    /// to the supervisor.
    PrimaryLost,
}

pub async fn tick<L: DbConn, P: PrimaryConn>(
    local: &L,
    primary: &P,
    config: &RepmgrConfig,
    primary_node_id: i32,
) -> Result<TickOutcome> {
    // 1. Primary-liveness check and bounded reconnect.
    if !primary.is_ok().await {
        warn!("primary connection not OK; entering reconnect retry");
        let mut recovered = false;
        for attempt in 1..=config.reconnect_attempts {
            tokio::time::sleep(config.reconnect_interval()).await;
            match primary.reset().await {
                Ok(()) if primary.is_ok().await => {
                    info!("primary connection recovered on attempt {}", attempt);
                    recovered = true;
                    break;
                }
                Ok(()) => continue,
                Err(e) => warn!("reconnect attempt {} failed: {}", attempt, e),
            }
        }
        if !recovered {
            warn!(
                "primary still unreachable after {} attempts; handing off to supervisor",
                config.reconnect_attempts
            );
            return Ok(TickOutcome::PrimaryLost);
        }
    }

    // 2. Role re-validation.
    match local.is_in_recovery().await {
        Ok(false) => {
            warn!("local node is no longer a standby");
            return Ok(TickOutcome::Promoted);
        }
        Ok(true) => {}
        Err(e) => {
            warn!("role re-validation query failed, skipping tick: {}", e);
            return Ok(TickOutcome::Continue);
        }
    }

    // 3. Cancel any insert still in flight from the previous tick.
    primary.cancel_pending_insert().await;

    // 4. Sample local.
    let (receive_lsn, apply_lsn) = match (local.last_receive_lsn().await, local.last_apply_lsn().await) {
        (Ok(r), Ok(a)) => (r, a),
        (r, a) => {
            warn!("failed to sample local position, skipping tick: {:?}", r.err().or(a.err()));
            return Ok(TickOutcome::Continue);
        }
    };

    // 5. Sample primary.
    let primary_lsn = match primary.current_lsn().await {
        Ok(lsn) => lsn,
        Err(e) => {
            warn!("failed to sample primary position, skipping tick: {}", e);
            return Ok(TickOutcome::Continue);
        }
    };

    // 6. Compute lag.
    let bytes_behind_receive = primary_lsn.to_bytes() as i64 - receive_lsn.to_bytes() as i64;
    let bytes_behind_apply = receive_lsn.to_bytes() as i64 - apply_lsn.to_bytes() as i64;

    // 7. Record sample (fire-and-forget).
    let sql = registry::monitor_sample_sql(
        config,
        primary_node_id,
        config.node,
        primary_lsn,
        receive_lsn,
        bytes_behind_receive,
        bytes_behind_apply,
    );
    primary.spawn_insert(sql).await;

    Ok(TickOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::FakeDb;
    use crate::lsn::Lsn;
    use std::sync::atomic::Ordering;

    fn sample_config() -> RepmgrConfig {
        RepmgrConfig {
            node: 2,
            cluster_name: "maincluster".into(),
            conninfo: "host=localhost".into(),
            failover: crate::config::FailoverPolicy::Manual,
            promote_command: String::new(),
            follow_command: String::new(),
            loglevel: "info".into(),
            logfacility: String::new(),
            monitor_interval_secs: 3,
            reconnect_attempts: 2,
            reconnect_interval_secs: 0,
            retry_promote_attempts: 6,
            retry_promote_interval_secs: 300,
        }
    }

    #[tokio::test]
    async fn test_tick_detects_role_change() {
        let local = FakeDb::primary_at(Lsn::ZERO);
        let primary = FakeDb::primary_at(Lsn::ZERO);
        let config = sample_config();

        let outcome = tick(&local, &primary, &config, 1).await.unwrap();
        assert_eq!(outcome, TickOutcome::Promoted);
    }

    #[tokio::test]
    async fn test_tick_records_lag_and_cancels_previous_insert() {
        let local = FakeDb::standby_at(Lsn::new(1, 0x100), Lsn::new(1, 0x50));
        let primary = FakeDb::primary_at(Lsn::new(1, 0x200));
        let config = sample_config();

        // Simulate a still-in-flight insert left over from the previous tick.
        primary.spawn_insert("stale sql".into()).await;
        assert_eq!(primary.spawn_calls(), 1);

        let outcome = tick(&local, &primary, &config, 1).await.unwrap();
        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(primary.cancel_calls(), 1);
        assert_eq!(primary.spawn_calls(), 2);

        let sql = primary.last_insert_sql().unwrap();
        assert_ne!(sql, "stale sql");
        assert!(sql.contains("256")); // bytes_behind_receive: 0x200 - 0x100
        assert!(sql.contains("176")); // bytes_behind_apply: 0x100 - 0x50
    }

    #[tokio::test]
    async fn test_tick_skips_on_transient_local_failure() {
        let local = FakeDb::standby_at(Lsn::ZERO, Lsn::ZERO);
        local.fail_queries.store(true, Ordering::SeqCst);
        let primary = FakeDb::primary_at(Lsn::ZERO);
        let config = sample_config();

        let outcome = tick(&local, &primary, &config, 1).await.unwrap();
        assert_eq!(outcome, TickOutcome::Continue);
        // a transient failure must not be treated as a role change or a
        // fatal condition, and must not record a sample
        assert_eq!(primary.spawn_calls(), 0);
    }

    #[tokio::test]
    async fn test_tick_reconnects_primary_when_not_ok() {
        let local = FakeDb::standby_at(Lsn::new(1, 0x10), Lsn::new(1, 0x10));
        let primary = FakeDb::primary_at(Lsn::new(1, 0x10));
        primary.set_ok(false);
        let config = sample_config();

        let outcome = tick(&local, &primary, &config, 1).await.unwrap();
        assert_eq!(outcome, TickOutcome::Continue);
        assert!(primary.reset_calls() >= 1);
    }

    #[tokio::test]
    async fn test_tick_hands_off_after_reconnect_exhausted() {
        let local = FakeDb::standby_at(Lsn::ZERO, Lsn::ZERO);
        let primary = FakeDb::primary_at(Lsn::ZERO);
        primary.set_ok(false);
        primary.fail_reset.store(true, Ordering::SeqCst);
        let config = sample_config();

        let outcome = tick(&local, &primary, &config, 1).await.unwrap();
        assert_eq!(outcome, TickOutcome::PrimaryLost);
        assert_eq!(primary.reset_calls(), config.reconnect_attempts as u64);
    }
}
