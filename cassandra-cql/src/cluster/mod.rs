//! Cluster coordinator (spec.md §4.6, §6).
//!
//! Discovers peers off one seed connection's `system.local`/`system.peers`,
//! opens up to `primaries` connections with a data-center preference, routes
//! queries round-robin across them, watches `STATUS_CHANGE`/`TOPOLOGY_CHANGE`
//! events to track the rest of the ring, and fails a primary connection over
//! to a fresh candidate when it goes down — the same "background task reacts
//! to state, public API stays a thin async call" split `postro::pool`'s
//! worker loop uses for connection lifecycle.
mod cache;
mod node;

pub(crate) use cache::PreparedCache;
pub use node::NodeRecord;
use node::Readiness;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tokio::sync::broadcast;

use crate::common::verbose;
use crate::connection::{Config, Connection, Event, QueryOptions};
use crate::consistency::Consistency;
use crate::error::{ClusterError, ConfigError, Error, Result};
use crate::protocol::ProtocolVersion;
use crate::result::QueryResult;
use crate::row::{DecodeError, Row};
use crate::statement::{BoundValues, PreparedStatement, encode_bound};

/// A node is eligible for re-promotion once it has been down this long
/// without flapping back up on its own (spec.md §4.6 "Failover").
const DOWN_EXPIRY: std::time::Duration = std::time::Duration::from_secs(60);

struct Shared {
    config: Config,
    version: ProtocolVersion,
    nodes: Mutex<HashMap<IpAddr, NodeRecord>>,
    primaries: Mutex<Vec<IpAddr>>,
    cursor: AtomicUsize,
    cache: Arc<PreparedCache>,
    closed: AtomicBool,
}

/// A coordinated view of one Cassandra cluster: a set of primary connections,
/// round-robin routed, kept alive and re-balanced as nodes come and go.
#[derive(Clone)]
pub struct Cluster(Arc<Shared>);

impl Cluster {
    /// Connect to one of `config`'s hosts, discover the ring, and bring up
    /// `config.primaries()` primary connections (spec.md §4.6 "Discovery").
    pub async fn connect(config: Config) -> Result<Self> {
        if config.hosts().is_empty() {
            return Err(ConfigError::new("no host configured").into());
        }
        let version = config.cql_version();

        let mut seed = None;
        let mut last_err = None;
        for host in config.hosts() {
            match connect_seed(host.as_str(), config.port(), version, &config).await {
                Ok(conn) => {
                    seed = Some(conn);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let seed_conn = seed.ok_or_else(|| {
            last_err.unwrap_or_else(|| ConfigError::new("no seed host reachable").into())
        })?;

        let (dc, rack) = local_dc_rack(&seed_conn).await?;
        let peers = peer_rows(&seed_conn).await?;
        let seed_addr = seed_conn.peer_addr().ip();

        let mut nodes = HashMap::new();
        let mut seed_node = NodeRecord::new(seed_addr, dc, rack);
        seed_node.conn = Some(seed_conn.clone());
        nodes.insert(seed_addr, seed_node);
        for row in peers {
            let addr: IpAddr = row.try_get("peer")?;
            if addr == seed_addr {
                continue;
            }
            let dc: String = row.try_get("data_center")?;
            let rack: String = row.try_get("rack")?;
            nodes.insert(addr, NodeRecord::new(addr, dc, rack));
        }

        let shared = Arc::new(Shared {
            config,
            version,
            nodes: Mutex::new(nodes),
            primaries: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            cache: PreparedCache::new(),
            closed: AtomicBool::new(false),
        });

        let mut candidates: Vec<IpAddr> = shared.nodes.lock().unwrap().keys().cloned().collect();
        candidates.shuffle(&mut rand::thread_rng());
        if let Some(pref) = shared.config.prefer_dc() {
            let nodes = shared.nodes.lock().unwrap();
            candidates.sort_by_key(|a| nodes.get(a).map(|n| n.data_center.as_str() != pref).unwrap_or(true));
        }

        let wanted = shared.config.primaries();
        let mut primaries = Vec::with_capacity(wanted);
        for addr in candidates {
            if primaries.len() >= wanted {
                break;
            }
            if addr == seed_addr {
                if let Some(n) = shared.nodes.lock().unwrap().get(&seed_addr) {
                    n.ready.mark_ready();
                }
                spawn_close_watcher(shared.clone(), seed_addr, seed_conn.clone());
                primaries.push(addr);
                continue;
            }
            match bring_up_primary(&shared, addr).await {
                Ok(()) => primaries.push(addr),
                Err(e) => verbose!(error = %e, node = %addr, "failed to establish initial primary candidate"),
            }
        }

        if !primaries.contains(&seed_addr) {
            seed_conn.close_now();
            if let Some(node) = shared.nodes.lock().unwrap().get_mut(&seed_addr) {
                node.conn = None;
            }
        }

        *shared.primaries.lock().unwrap() = primaries.clone();
        if primaries.is_empty() {
            return Err(ClusterError::NoPrimaryAvailable.into());
        }

        let cluster = Self(shared);
        cluster.start_event_watchers().await;
        Ok(cluster)
    }

    /// Run an unprepared query at `consistency` (spec.md §4.5, §6).
    pub async fn query(&self, cql: &str, consistency: Consistency, opts: &QueryOptions) -> Result<QueryResult> {
        let node = self.get_a_node().ok_or(ClusterError::NoPrimaryAvailable)?;
        let conn = node.conn.ok_or(ClusterError::NoPrimaryAvailable)?;
        conn.query(cql, consistency, opts).await
    }

    /// [`Cluster::query`], then unwrap the `RESULT` into its row set
    /// (spec.md §7 "Protocol" `ResultKindMismatch`).
    pub async fn query_rows(&self, cql: &str, consistency: Consistency) -> Result<Vec<Row>> {
        match self.query(cql, consistency, &QueryOptions::default()).await? {
            QueryResult::Rows(rows) => Ok(rows.rows),
            _ => Err(crate::error::ProtocolError::ResultKindMismatch { expected: "ROWS" }.into()),
        }
    }

    /// `PREPARE` `cql`, returning a cached handle if one is already live
    /// (spec.md §9). A fresh prepare fans out to every current primary in
    /// parallel; the first success wins and the rest are left to finish in
    /// the background rather than aborted, so they still warm that
    /// connection's own copy of the statement.
    pub async fn prepare(&self, cql: &str) -> Result<PreparedStatement> {
        if let Some(stmt) = self.0.cache.get_live(cql) {
            return Ok(stmt);
        }

        let primaries = self.0.primaries.lock().unwrap().clone();
        if primaries.is_empty() {
            return Err(ClusterError::NoPrimaryAvailable.into());
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for addr in primaries {
            let conn = { self.0.nodes.lock().unwrap().get(&addr).and_then(|n| n.conn.clone()) };
            let Some(conn) = conn else { continue };
            let cql = cql.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = conn.prepare(&cql).await;
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut last_err = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(prepared) => {
                    let stmt = PreparedStatement::new(
                        prepared.id,
                        cql.to_string(),
                        prepared.params,
                        prepared.result.unwrap_or(crate::metadata::ColumnsMetadata {
                            columns: Vec::new(),
                            has_more_pages: false,
                            paging_state: None,
                        }),
                        self.clone(),
                    );
                    self.0.cache.insert(cql.to_string(), &stmt);
                    return Ok(stmt);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ClusterError::NoPrimaryAvailable.into()))
    }

    /// Bind `values` and run `stmt`, re-preparing it on a node that doesn't
    /// already have it (spec.md §4.5, §9).
    pub(crate) async fn execute_prepared(
        &self,
        stmt: &PreparedStatement,
        values: BoundValues,
        consistency: Consistency,
        opts: &QueryOptions,
    ) -> Result<QueryResult> {
        let encoded = encode_bound(stmt.params(), values)?;
        let node = self.get_a_node().ok_or(ClusterError::NoPrimaryAvailable)?;
        let conn = node.conn.ok_or(ClusterError::NoPrimaryAvailable)?;

        match conn.execute_prepared(stmt.id(), consistency, &encoded, opts).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let crate::error::ErrorKind::Server(se) = e.kind() {
                    if is_unprepared(se) {
                        let reprepared = conn.prepare(stmt.cql()).await?;
                        return conn
                            .execute_prepared(&reprepared.id, consistency, &encoded, opts)
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    /// `OPTIONS`/`SUPPORTED`, uncached, against any ready primary
    /// (spec.md §4.4 "Options").
    pub async fn options(&self) -> Result<Vec<(String, Vec<String>)>> {
        let node = self.get_a_node().ok_or(ClusterError::NoPrimaryAvailable)?;
        let conn = node.conn.ok_or(ClusterError::NoPrimaryAvailable)?;
        conn.options().await
    }

    /// Register for cluster events on the current primaries; used by callers
    /// that want their own event stream rather than relying on the
    /// coordinator's internal node tracking (spec.md §4.6).
    pub async fn register(&self, event_types: &[&str]) -> Result<broadcast::Receiver<Event>> {
        let node = self.get_a_node().ok_or(ClusterError::NoPrimaryAvailable)?;
        let conn = node.conn.ok_or(ClusterError::NoPrimaryAvailable)?;
        conn.register(event_types).await
    }

    pub(crate) fn cache(&self) -> &Arc<PreparedCache> {
        &self.0.cache
    }

    /// Every keyspace name known to the schema (spec.md's schema
    /// introspection convenience wrappers).
    pub async fn keyspaces(&self) -> Result<Vec<String>> {
        let rows = self.query_rows("SELECT keyspace_name FROM system.schema_keyspaces", Consistency::One).await?;
        rows.into_iter().map(|row| Ok(row.try_get("keyspace_name")?)).collect()
    }

    /// Every table name in `keyspace`.
    pub async fn tables(&self, keyspace: &str) -> Result<Vec<String>> {
        let cql = format!(
            "SELECT columnfamily_name FROM system.schema_columnfamilies WHERE keyspace_name = '{}'",
            escape_literal(keyspace)
        );
        let rows = self.query_rows(&cql, Consistency::One).await?;
        rows.into_iter().map(|row| Ok(row.try_get("columnfamily_name")?)).collect()
    }

    /// Every column name declared on `keyspace.table`.
    pub async fn columns(&self, keyspace: &str, table: &str) -> Result<Vec<String>> {
        let cql = format!(
            "SELECT column_name FROM system.schema_columns WHERE keyspace_name = '{}' AND columnfamily_name = '{}'",
            escape_literal(keyspace),
            escape_literal(table)
        );
        let rows = self.query_rows(&cql, Consistency::One).await?;
        rows.into_iter().map(|row| Ok(row.try_get("column_name")?)).collect()
    }

    /// This cluster's name, read off `system.local` (spec.md's schema
    /// introspection convenience wrappers).
    pub async fn cluster_name(&self) -> Result<String> {
        let mut rows = self.query_rows("SELECT cluster_name FROM system.local", Consistency::One).await?;
        let row = rows.pop().ok_or(DecodeError::RowNotFound)?;
        Ok(row.try_get("cluster_name")?)
    }

    /// Stop admitting new work and close every connection once it drains
    /// (spec.md §4.6 "Graceful shutdown").
    pub async fn close_when_idle(&self) {
        self.0.closed.store(true, Ordering::Release);
        let conns: Vec<Connection> = {
            let nodes = self.0.nodes.lock().unwrap();
            nodes.values().filter_map(|n| n.conn.clone()).collect()
        };
        for conn in conns {
            conn.close_when_idle().await;
        }
    }

    /// Close every connection immediately (spec.md §4.6 "Abrupt shutdown").
    pub fn close_now(&self) {
        self.0.closed.store(true, Ordering::Release);
        let nodes = self.0.nodes.lock().unwrap();
        for node in nodes.values() {
            if let Some(conn) = &node.conn {
                conn.close_now();
            }
        }
    }

    /// Round-robin pick among primaries, preferring one that's marked ready
    /// (spec.md §6 "Query routing").
    fn get_a_node(&self) -> Option<NodeRecord> {
        let primaries = self.0.primaries.lock().unwrap();
        if primaries.is_empty() {
            return None;
        }
        let nodes = self.0.nodes.lock().unwrap();
        let start = self.0.cursor.fetch_add(1, Ordering::Relaxed) % primaries.len();
        for i in 0..primaries.len() {
            let idx = (start + i) % primaries.len();
            if let Some(node) = nodes.get(&primaries[idx]) {
                if node.ready.is_ready() && node.conn.is_some() {
                    return Some(node.clone());
                }
            }
        }
        nodes.get(&primaries[start]).cloned()
    }

    async fn start_event_watchers(&self) {
        let watcher_count = if self.0.config.primaries() > 1 { 2 } else { 1 };
        let primaries = self.0.primaries.lock().unwrap().clone();
        for addr in primaries.into_iter().take(watcher_count) {
            let conn = { self.0.nodes.lock().unwrap().get(&addr).and_then(|n| n.conn.clone()) };
            let Some(conn) = conn else { continue };
            match conn.register(&["TOPOLOGY_CHANGE", "STATUS_CHANGE", "SCHEMA_CHANGE"]).await {
                Ok(rx) => {
                    let shared = self.0.clone();
                    tokio::spawn(watch_events(shared, rx));
                }
                Err(e) => verbose!(error = %e, node = %addr, "failed to register for cluster events"),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        let shared = Arc::new(Shared {
            config: Config::parse("cassandra://localhost").unwrap(),
            version: ProtocolVersion::V2,
            nodes: Mutex::new(HashMap::new()),
            primaries: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            cache: PreparedCache::new(),
            closed: AtomicBool::new(false),
        });
        Self(shared)
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn is_unprepared(err: &crate::error::ServerError) -> bool {
    // Cassandra's `Unprepared` error code (spec.md §7 "Server").
    err.code == 0x2500
}

async fn connect_seed(host: &str, port: u16, version: ProtocolVersion, config: &Config) -> Result<Connection> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    let addr = addrs
        .next()
        .ok_or_else(|| Error::from(ConfigError::new(format!("could not resolve host: {host}"))))?;
    let conn = Connection::connect(addr, version).await?;
    conn.startup(config).await?;
    Ok(conn)
}

async fn local_dc_rack(conn: &Connection) -> Result<(String, String)> {
    let result = conn
        .query("SELECT data_center, rack FROM system.local", Consistency::One, &QueryOptions::default())
        .await?;
    let rows = result.into_rows()?.rows;
    match rows.into_iter().next() {
        Some(row) => Ok((row.try_get("data_center")?, row.try_get("rack")?)),
        None => Ok((String::new(), String::new())),
    }
}

async fn peer_rows(conn: &Connection) -> Result<Vec<Row>> {
    let result = conn
        .query("SELECT peer, data_center, rack FROM system.peers", Consistency::One, &QueryOptions::default())
        .await?;
    Ok(result.into_rows()?.rows)
}

async fn bring_up_primary(shared: &Arc<Shared>, addr: IpAddr) -> Result<()> {
    let socket = SocketAddr::new(addr, shared.config.port());
    let conn = Connection::connect(socket, shared.version).await?;
    conn.startup(&shared.config).await?;

    for (cql, _) in shared.cache.all_live() {
        conn.prepare(&cql).await?;
    }

    {
        let mut nodes = shared.nodes.lock().unwrap();
        match nodes.get_mut(&addr) {
            Some(node) => {
                node.conn = Some(conn.clone());
                node.down_since = None;
                node.ready = Arc::new(Readiness::new());
                node.ready.mark_ready();
            }
            None => return Err(ClusterError::NoPrimaryAvailable.into()),
        }
    }

    spawn_close_watcher(shared.clone(), addr, conn);
    Ok(())
}

fn spawn_close_watcher(shared: Arc<Shared>, addr: IpAddr, conn: Connection) {
    tokio::spawn(async move {
        conn.closed().await;
        handle_closed(shared, addr).await;
    });
}

async fn handle_closed(shared: Arc<Shared>, addr: IpAddr) {
    if shared.closed.load(Ordering::Acquire) {
        return;
    }
    let was_primary = {
        {
            let mut nodes = shared.nodes.lock().unwrap();
            if let Some(node) = nodes.get_mut(&addr) {
                node.conn = None;
                node.ready = Arc::new(Readiness::new());
                node.down_since = Some(std::time::Instant::now());
            }
        }
        let mut primaries = shared.primaries.lock().unwrap();
        let before = primaries.len();
        primaries.retain(|a| *a != addr);
        before != primaries.len()
    };
    if was_primary {
        pick_new_primary(&shared).await;
    }
}

/// Pick a dormant, not-recently-down candidate and bring it up as a new
/// primary (spec.md §4.6 "Failover", §9 — surfaced as a warning rather than
/// aborting the process when nothing is eligible).
async fn pick_new_primary(shared: &Arc<Shared>) {
    let candidate = {
        let nodes = shared.nodes.lock().unwrap();
        let primaries = shared.primaries.lock().unwrap();
        let mut candidates: Vec<IpAddr> = nodes
            .values()
            .filter(|n| !primaries.contains(&n.addr))
            .filter(|n| n.down_since.is_none() || n.is_down_expired(DOWN_EXPIRY))
            .map(|n| n.addr)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        if let Some(pref) = shared.config.prefer_dc() {
            candidates.sort_by_key(|a| nodes.get(a).map(|n| n.data_center.as_str() != pref).unwrap_or(true));
        }
        candidates.into_iter().next()
    };

    let Some(addr) = candidate else {
        verbose!("no eligible candidate node available to promote to primary");
        return;
    };

    match bring_up_primary(shared, addr).await {
        Ok(()) => {
            shared.primaries.lock().unwrap().push(addr);
        }
        Err(e) => {
            verbose!(error = %e, node = %addr, "failed to promote candidate node");
            let mut nodes = shared.nodes.lock().unwrap();
            if let Some(node) = nodes.get_mut(&addr) {
                node.down_since = Some(std::time::Instant::now());
            }
        }
    }
}

async fn watch_events(shared: Arc<Shared>, mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => handle_event(&shared, event).await,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn handle_event(shared: &Arc<Shared>, event: Event) {
    match event {
        Event::StatusChange { status, node } => match status.as_str() {
            "DOWN" => mark_down(shared, node),
            "UP" => mark_up(shared, node).await,
            _ => {}
        },
        Event::TopologyChange { change, node } => match change.as_str() {
            "NEW_NODE" => add_new_node(shared, node),
            "REMOVED_NODE" => remove_node(shared, node).await,
            _ => {}
        },
        Event::SchemaChange { .. } => {}
    }
}

fn mark_down(shared: &Arc<Shared>, addr: IpAddr) {
    let mut nodes = shared.nodes.lock().unwrap();
    if let Some(node) = nodes.get_mut(&addr) {
        if node.down_since.is_none() {
            node.down_since = Some(std::time::Instant::now());
        }
    }
}

/// A node coming back `UP` only triggers promotion when it's in the
/// preferred DC and a non-preferred-DC primary can be displaced for it
/// (spec.md §4.6 "DC preference is re-asserted as nodes recover").
async fn mark_up(shared: &Arc<Shared>, addr: IpAddr) {
    let was_down = {
        let mut nodes = shared.nodes.lock().unwrap();
        match nodes.get_mut(&addr) {
            Some(node) if node.down_since.is_some() => {
                node.down_since = None;
                true
            }
            _ => false,
        }
    };
    if !was_down {
        return;
    }

    let Some(pref) = shared.config.prefer_dc() else { return };
    let is_preferred = {
        let nodes = shared.nodes.lock().unwrap();
        nodes.get(&addr).map(|n| n.data_center.as_str() == pref).unwrap_or(false)
    };
    if !is_preferred || shared.primaries.lock().unwrap().contains(&addr) {
        return;
    }

    let displaced = {
        let nodes = shared.nodes.lock().unwrap();
        let primaries = shared.primaries.lock().unwrap();
        primaries
            .iter()
            .find(|a| nodes.get(a).map(|n| n.data_center.as_str() != pref).unwrap_or(false))
            .cloned()
    };
    let Some(displaced) = displaced else { return };

    match bring_up_primary(shared, addr).await {
        Ok(()) => {
            let mut primaries = shared.primaries.lock().unwrap();
            primaries.retain(|a| *a != displaced);
            primaries.push(addr);
            drop(primaries);
            let conn = { shared.nodes.lock().unwrap().get(&displaced).and_then(|n| n.conn.clone()) };
            if let Some(conn) = conn {
                tokio::spawn(async move { conn.close_when_idle().await });
            }
        }
        Err(e) => verbose!(error = %e, node = %addr, "failed to promote newly-up preferred-dc node"),
    }
}

fn add_new_node(shared: &Arc<Shared>, addr: IpAddr) {
    let mut nodes = shared.nodes.lock().unwrap();
    nodes.entry(addr).or_insert_with(|| NodeRecord::new(addr, "", ""));
}

async fn remove_node(shared: &Arc<Shared>, addr: IpAddr) {
    let (conn, was_primary) = {
        let conn = {
            let mut nodes = shared.nodes.lock().unwrap();
            nodes.remove(&addr).and_then(|n| n.conn)
        };
        let mut primaries = shared.primaries.lock().unwrap();
        let before = primaries.len();
        primaries.retain(|a| *a != addr);
        (conn, before != primaries.len())
    };
    if let Some(conn) = conn {
        conn.close_now();
    }
    if was_primary {
        pick_new_primary(shared).await;
    }
}
