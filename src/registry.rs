//! Cluster registry client (§4.2)
//!
//! Reads and writes the node/monitoring tables under schema
//! `repmgr_<cluster_name>`. Schema, table, and (for lack of a bind-param
//! form for SQL identifiers) literal values are interpolated into the SQL
//! text; every value that reaches these functions originates in the local
//! config file or the local database, never from an untrusted peer, and
//! string literals are escaped before interpolation.

use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::RepmgrConfig;
use crate::db::{DbConn, PgLink};
use crate::error::{Error, Result};
use crate::lsn::Lsn;

/// A row of `repl_nodes`: a node known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: i32,
    pub conninfo: String,
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Verify the expected tables exist under the cluster's schema. Absence is
/// fatal at startup (§7: "Cluster misconfigured").
pub async fn ensure_schema(link: &PgLink, config: &RepmgrConfig) -> Result<()> {
    let schema = config.schema_name();
    let sql = format!(
        "SELECT to_regclass({nodes}), to_regclass({monitor}), to_regclass({status})",
        nodes = quote(&format!("{schema}.repl_nodes")),
        monitor = quote(&format!("{schema}.repl_monitor")),
        status = quote(&format!("{schema}.repl_status")),
    );
    let row = link.fetch_optional(&sql).await?;
    let present = row
        .map(|r| {
            r.try_get::<Option<String>, _>(0).ok().flatten().is_some()
                && r.try_get::<Option<String>, _>(1).ok().flatten().is_some()
                && r.try_get::<Option<String>, _>(2).ok().flatten().is_some()
        })
        .unwrap_or(false);

    if !present {
        return Err(Error::ClusterMisconfigured(schema));
    }
    debug!("cluster schema {} verified", schema);
    Ok(())
}

/// Insert the local node's row if it is not already present. Idempotent.
pub async fn ensure_self_registered(link: &PgLink, config: &RepmgrConfig) -> Result<()> {
    let schema = config.schema_name();
    let sql = format!(
        "INSERT INTO {schema}.repl_nodes (id, cluster, conninfo, last_standby_location) \
         VALUES ({node}, {cluster}, {conninfo}, '0/0') \
         ON CONFLICT (id) DO NOTHING",
        node = config.node,
        cluster = quote(&config.cluster_name),
        conninfo = quote(&config.conninfo),
    );
    link.execute(&sql).await?;
    Ok(())
}

/// Locate the current primary among the known nodes and open a connection
/// to it. A node counts as "the primary" if it answers and
/// `pg_is_in_recovery()` is false. The first such node found wins; absence
/// of any reachable primary is fatal at startup.
pub async fn discover_primary(link: &PgLink, config: &RepmgrConfig) -> Result<(PgLink, i32)> {
    let schema = config.schema_name();
    let sql = format!(
        "SELECT id, conninfo FROM {schema}.repl_nodes WHERE cluster = {cluster} AND id <> {node}",
        cluster = quote(&config.cluster_name),
        node = config.node,
    );
    let rows = link.fetch_all(&sql).await?;

    for row in rows {
        let id: i32 = row.try_get(0)?;
        let conninfo: String = row.try_get(1)?;
        match PgLink::connect(&conninfo).await {
            Ok(candidate) => match candidate.is_in_recovery().await {
                Ok(false) => {
                    info!("discovered primary: node {}", id);
                    return Ok((candidate, id));
                }
                Ok(true) => debug!("node {} is a standby, not the primary", id),
                Err(e) => debug!("node {} did not answer is_in_recovery: {}", id, e),
            },
            Err(e) => debug!("could not connect to node {}: {}", id, e),
        }
    }

    Err(Error::NoPrimary(config.cluster_name.clone()))
}

/// Look up a single node's `conninfo` by id, as seen through `link`.
pub async fn node_conninfo(link: &PgLink, config: &RepmgrConfig, node_id: i32) -> Result<String> {
    let schema = config.schema_name();
    let sql = format!("SELECT conninfo FROM {schema}.repl_nodes WHERE id = {node_id}");
    let row = link
        .fetch_optional(&sql)
        .await?
        .ok_or_else(|| Error::QueryExecution(format!("no repl_nodes row for node {}", node_id)))?;
    Ok(row.try_get(0)?)
}

/// The peer set used by the election: standbys currently attached to a
/// primary, per `repl_status`, other than `excluding_node_id`. Nodes known
/// to `repl_nodes` but not listed in `repl_status` are not counted as
/// peers for quorum or candidacy.
///
/// Opens its own short-lived connection via `config.conninfo`, the same
/// way [`crate::probe::probe`] does, rather than requiring a caller to
/// hand in an already-open link — this is what lets the election engine
/// take its local connection generically over [`crate::db::DbConn`].
pub async fn list_peer_standbys(
    config: &RepmgrConfig,
    excluding_node_id: i32,
) -> Result<Vec<NodeRecord>> {
    let link = PgLink::connect(&config.conninfo).await?;
    let schema = config.schema_name();
    let sql = format!(
        "SELECT id, conninfo FROM {schema}.repl_nodes WHERE cluster = {cluster} AND id IN \
         (SELECT standby_node FROM {schema}.repl_status WHERE standby_node <> {node})",
        cluster = quote(&config.cluster_name),
        node = excluding_node_id,
    );
    let rows = link.fetch_all(&sql).await;
    link.close().await;

    rows?
        .into_iter()
        .map(|row| {
            Ok(NodeRecord {
                node_id: row.try_get(0)?,
                conninfo: row.try_get(1)?,
            })
        })
        .collect()
}

/// Publish this node's last applied position so peers' probes see a fresh
/// value. On failure to determine or publish it, the zero sentinel is
/// published instead (§4.3) so this node cannot win an election off a
/// stale position. Opens its own short-lived connection, for the same
/// reason as [`list_peer_standbys`].
pub async fn publish_own_position(config: &RepmgrConfig, applied: Result<Lsn>) -> Lsn {
    let lsn = match applied {
        Ok(lsn) => lsn,
        Err(e) => {
            warn!("could not determine local applied position: {}", e);
            Lsn::ZERO
        }
    };

    let link = match PgLink::connect(&config.conninfo).await {
        Ok(link) => link,
        Err(e) => {
            warn!("could not connect to publish own position: {}", e);
            return Lsn::ZERO;
        }
    };

    let schema = config.schema_name();
    let sql = format!(
        "UPDATE {schema}.repl_nodes SET last_standby_location = {lsn} WHERE id = {node}",
        lsn = quote(&lsn.to_string()),
        node = config.node,
    );
    let result = link.execute(&sql).await;
    link.close().await;
    if let Err(e) = result {
        warn!("could not publish own position: {}", e);
        return Lsn::ZERO;
    }
    lsn
}

/// Read a node's last published standby location from the cluster table,
/// as seen through `link` (typically the primary's connection).
pub async fn last_standby_location(
    link: &PgLink,
    config: &RepmgrConfig,
    node_id: i32,
) -> Result<Lsn> {
    let schema = config.schema_name();
    let sql = format!(
        "SELECT last_standby_location FROM {schema}.repl_nodes WHERE id = {node_id}"
    );
    let row = link
        .fetch_optional(&sql)
        .await?
        .ok_or_else(|| Error::QueryExecution(format!("no repl_nodes row for node {}", node_id)))?;
    let text: String = row.try_get(0)?;
    Ok(Lsn::parse_or_zero(&text))
}

/// Build the insert for one monitoring sample (§4.4 step 7). Returned as
/// SQL text rather than executed here, since the caller fires it
/// asynchronously via `PgLink::spawn_insert`.
pub fn monitor_sample_sql(
    config: &RepmgrConfig,
    primary_node: i32,
    standby_node: i32,
    primary_lsn: Lsn,
    standby_lsn: Lsn,
    bytes_behind_receive: i64,
    bytes_behind_apply: i64,
) -> String {
    let schema = config.schema_name();
    format!(
        "INSERT INTO {schema}.repl_monitor \
         (primary_node, standby_node, sampled_at, primary_lsn, standby_lsn, \
          bytes_behind_receive, bytes_behind_apply) \
         VALUES ({primary_node}, {standby_node}, now(), {primary_lsn}, {standby_lsn}, \
          {bytes_behind_receive}, {bytes_behind_apply})",
        primary_lsn = quote(&primary_lsn.to_string()),
        standby_lsn = quote(&standby_lsn.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RepmgrConfig {
        RepmgrConfig {
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
        }
    }

    #[test]
    fn test_monitor_sample_sql_shape() {
        let config = sample_config();
        let sql = monitor_sample_sql(&config, 1, 2, Lsn::new(1, 0x100), Lsn::new(1, 0x50), 0xB0, 0);

        assert!(sql.contains("repmgr_maincluster.repl_monitor"));
        assert!(sql.contains("'1/100'"));
        assert!(sql.contains("'1/50'"));
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("host=foo dbname=o'brien"), "'host=foo dbname=o''brien'");
    }
}
