//! One row of the coordinator's node table (spec.md §3 "Node record").
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::common::ByteStr;
use crate::connection::Connection;

/// A node the coordinator knows about, whether or not it currently has a
/// connection open to it.
#[derive(Clone)]
pub struct NodeRecord {
    pub addr: IpAddr,
    pub data_center: ByteStr,
    pub rack: ByteStr,
    pub conn: Option<Connection>,
    pub ready: Arc<Readiness>,
    pub down_since: Option<Instant>,
}

impl NodeRecord {
    pub fn new(addr: IpAddr, data_center: impl Into<ByteStr>, rack: impl Into<ByteStr>) -> Self {
        Self {
            addr,
            data_center: data_center.into(),
            rack: rack.into(),
            conn: None,
            ready: Arc::new(Readiness::new()),
            down_since: None,
        }
    }

    pub fn is_down_expired(&self, grace: std::time::Duration) -> bool {
        match self.down_since {
            Some(since) => since.elapsed() >= grace,
            None => false,
        }
    }
}

/// A primary's readiness future (spec.md §3 invariants): resolves once
/// startup, the optional `USE <keyspace>`, and re-preparation of every
/// cached query have all completed on that connection.
pub struct Readiness {
    notify: tokio::sync::Notify,
    ready: std::sync::atomic::AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self { notify: tokio::sync::Notify::new(), ready: std::sync::atomic::AtomicBool::new(false) }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, std::sync::atomic::Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        if self.is_ready() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
