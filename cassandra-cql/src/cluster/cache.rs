//! Prepared-statement cache keyed by CQL text, with weak-reference,
//! grace-period eviction (spec.md §9 "Prepared statement cache").
//!
//! A statement stays cached (and thus gets transparently re-prepared on
//! newly-promoted primaries) as long as *something* holds its
//! [`PreparedStatement`][crate::statement::PreparedStatement] handle, plus a
//! grace period after the last handle drops — matching `postro::pool`'s
//! idle-connection reaper shape (a timer armed on release, cancelled in
//! effect by the entry still being live when it fires).
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::statement::{PreparedStatement, WeakPreparedStatement};

const GRACE_PERIOD: Duration = Duration::from_secs(300);

struct CacheEntry {
    weak: WeakPreparedStatement,
}

pub(crate) struct PreparedCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl PreparedCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(HashMap::new()) })
    }

    /// A still-live statement for this exact CQL text, if one is cached.
    pub fn get_live(&self, cql: &str) -> Option<PreparedStatement> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(cql).and_then(|e| e.weak.upgrade()) {
            Some(stmt) => Some(stmt),
            None => {
                entries.remove(cql);
                None
            }
        }
    }

    pub fn insert(&self, cql: String, stmt: &PreparedStatement) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(cql, CacheEntry { weak: stmt.downgrade() });
    }

    /// Every statement that is still cached and has a live handle — used to
    /// re-prepare the full working set on a freshly promoted primary
    /// (spec.md §4.6 "New primary connections re-prepare").
    pub fn all_live(&self) -> Vec<(String, PreparedStatement)> {
        let entries = self.entries.lock().unwrap();
        entries.iter().filter_map(|(cql, e)| e.weak.upgrade().map(|s| (cql.clone(), s))).collect()
    }

    /// Arm a grace-period eviction for `cql`, called from the statement's
    /// `Drop`. If `cql` has been re-prepared (a live handle exists again) by
    /// the time this fires, it's a no-op — the race resolves itself because
    /// eviction only ever removes an entry that is *still* dead at fire time.
    pub fn arm_eviction(self: &Arc<Self>, cql: String) {
        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(GRACE_PERIOD).await;
            let mut entries = cache.entries.lock().unwrap();
            if let Some(entry) = entries.get(&cql) {
                if entry.weak.upgrade().is_none() {
                    entries.remove(&cql);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn get_live_returns_none_once_dropped() {
        let cache = PreparedCache::new();
        {
            let stmt = PreparedStatement::for_test(Bytes::from_static(b"id"), "SELECT 1".into());
            cache.insert("SELECT 1".into(), &stmt);
            assert!(cache.get_live("SELECT 1").is_some());
        }
        assert!(cache.get_live("SELECT 1").is_none());
    }

    #[tokio::test]
    async fn all_live_skips_dead_entries() {
        let cache = PreparedCache::new();
        let stmt = PreparedStatement::for_test(Bytes::from_static(b"id"), "SELECT 1".into());
        cache.insert("SELECT 1".into(), &stmt);
        assert_eq!(cache.all_live().len(), 1);
        drop(stmt);
        assert!(cache.all_live().is_empty());
    }
}
