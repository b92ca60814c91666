//! Election engine (§4.6)
//!
//! Runs once per automatic-failover invocation: gathers peer positions,
//! applies the quorum test, and dispatches the promote or follow command.

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::RepmgrConfig;
use crate::db::DbConn;
use crate::error::{Error, Result};
use crate::lsn::Lsn;
use crate::probe;
use crate::registry;

/// Safety cap on the peer set; exceeding peers are logged and ignored
/// rather than silently truncated without a trace.
const MAX_PEERS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: i32,
    pub lsn: Lsn,
    pub reachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// The local node was the best candidate and has been promoted.
    Promoted,
    /// A peer won; the local node has been (or will be) reconfigured to
    /// follow it.
    Followed { primary_node: i32 },
}

/// Gather peer positions, apply the quorum test, and decide the outcome.
/// Takes `local` generically over [`DbConn`] so it can be driven by a fake
/// in tests; the peer set and each peer's position still come through the
/// registry and [`probe::probe`], which dial Postgres directly. Does not
/// touch the local connection's lifecycle or invoke the dispatched command
/// — the caller (the supervisor) owns that, since only it holds the
/// concrete connection whose close/reopen must bracket the dispatch
/// per §4.6 step 7.
pub async fn run_election<L: DbConn>(local: &L, config: &RepmgrConfig) -> Result<ElectionOutcome> {
    let applied = local.last_apply_lsn().await;
    let local_lsn = registry::publish_own_position(config, applied).await;

    let mut peers = registry::list_peer_standbys(config, config.node).await?;
    if peers.len() > MAX_PEERS {
        warn!(
            "peer set ({}) exceeds the {}-peer safety cap; ignoring the rest",
            peers.len(),
            MAX_PEERS
        );
        peers.truncate(MAX_PEERS);
    }

    let mut candidates = Vec::with_capacity(peers.len());
    for peer in &peers {
        let lsn = probe::probe(&peer.conninfo, peer.node_id, config).await;
        candidates.push(Candidate {
            node_id: peer.node_id,
            lsn: lsn.unwrap_or(Lsn::ZERO),
            reachable: lsn.is_some(),
        });
    }

    let total_nodes = 1 + peers.len();
    let visible_nodes = 1 + candidates.iter().filter(|c| c.reachable).count();

    if !quorum_met(total_nodes, visible_nodes) {
        error!(
            "minority partition: {} of {} nodes visible; aborting election",
            visible_nodes, total_nodes
        );
        return Err(Error::MinorityPartition);
    }

    Ok(decide(config.node, local_lsn, &candidates))
}

/// True if enough of the cluster is visible to hold an election.
pub fn quorum_met(total_nodes: usize, visible_nodes: usize) -> bool {
    visible_nodes >= total_nodes / 2
}

/// Pick the winner: the reachable candidate with the highest LSN, seeded
/// from the local node's own (freshly published) position rather than from
/// any peer probe result, so a node can never lose to a stale reading of
/// itself. Ties are resolved in favor of whichever node is already "best",
/// i.e. the local node keeps its seeded seat on an exact tie.
pub fn decide(local_node_id: i32, local_lsn: Lsn, candidates: &[Candidate]) -> ElectionOutcome {
    let mut best_node = local_node_id;
    let mut best_lsn = local_lsn;
    for candidate in candidates.iter().filter(|c| c.reachable) {
        if candidate.lsn > best_lsn {
            best_node = candidate.node_id;
            best_lsn = candidate.lsn;
        }
    }

    if best_node == local_node_id {
        ElectionOutcome::Promoted
    } else {
        ElectionOutcome::Followed { primary_node: best_node }
    }
}

pub async fn dispatch(config: &RepmgrConfig, outcome: ElectionOutcome) {
    let command = match outcome {
        ElectionOutcome::Promoted => {
            info!("won the election; invoking promote_command");
            &config.promote_command
        }
        ElectionOutcome::Followed { primary_node } => {
            info!("node {} won the election; invoking follow_command", primary_node);
            &config.follow_command
        }
    };

    if command.is_empty() {
        warn!("no command configured for this outcome; skipping dispatch");
        return;
    }

    match Command::new("/bin/sh").arg("-c").arg(command).status().await {
        Ok(status) => info!("dispatched command exited with {}", status),
        Err(e) => error!("failed to spawn dispatched command: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(node_id: i32, segment: u32, offset: u32, reachable: bool) -> Candidate {
        Candidate { node_id, lsn: Lsn::new(segment, offset), reachable }
    }

    #[test]
    fn test_decide_winner_by_lsn() {
        // local = 2/0, peer 5 = 2/100, peer 7 = 1/FFFFFFFF
        let candidates = vec![
            candidate(5, 2, 0x100, true),
            candidate(7, 1, 0xFFFFFFFF, true),
        ];
        let outcome = decide(1, Lsn::new(2, 0), &candidates);
        assert_eq!(outcome, ElectionOutcome::Followed { primary_node: 5 });
    }

    #[test]
    fn test_decide_self_wins() {
        // local = 5/10, peers at 5/08 and 4/FF
        let candidates = vec![
            candidate(2, 5, 0x08, true),
            candidate(3, 4, 0xFF, true),
        ];
        let outcome = decide(1, Lsn::new(5, 0x10), &candidates);
        assert_eq!(outcome, ElectionOutcome::Promoted);
    }

    #[test]
    fn test_decide_ties_favor_retention() {
        let candidates = vec![candidate(2, 5, 0x10, true)];
        // exactly equal to local; local (already "best") must be kept
        let outcome = decide(1, Lsn::new(5, 0x10), &candidates);
        assert_eq!(outcome, ElectionOutcome::Promoted);
    }

    #[test]
    fn test_decide_ignores_unreachable_candidates() {
        let candidates = vec![candidate(2, 9, 0xFF, false)];
        let outcome = decide(1, Lsn::new(1, 0), &candidates);
        assert_eq!(outcome, ElectionOutcome::Promoted);
    }

    #[test]
    fn test_quorum_gate_minority_fails() {
        // local reachable, 3 peers listed, all unreachable
        assert!(!quorum_met(1 + 3, 1 + 0));
    }

    #[test]
    fn test_quorum_gate_majority_passes() {
        assert!(quorum_met(1 + 3, 1 + 2));
    }
}
