//! Prepared statement identity (spec.md §3 "Prepared statement").
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::cluster::Cluster;
use crate::connection::QueryOptions;
use crate::consistency::Consistency;
use crate::error::{EncodingError, Result};
use crate::metadata::ColumnsMetadata;
use crate::result::QueryResult;
use crate::value::{self, Value};

/// A prepared statement handle returned by `prepare()`.
///
/// Unlike a client-generated name, the `id` is opaque bytes assigned by the
/// server in its `PREPARED` response (spec.md §4.4) — this client never
/// constructs one itself, only stores what the server handed back.
#[derive(Clone)]
pub struct PreparedStatement(Arc<Inner>);

struct Inner {
    id: Bytes,
    cql: String,
    params: ColumnsMetadata,
    result: ColumnsMetadata,
    cluster: Cluster,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: Bytes,
        cql: String,
        params: ColumnsMetadata,
        result: ColumnsMetadata,
        cluster: Cluster,
    ) -> Self {
        Self(Arc::new(Inner { id, cql, params, result, cluster }))
    }

    /// The opaque id the server assigned this statement.
    pub fn id(&self) -> &Bytes {
        &self.0.id
    }

    /// The CQL text this statement was prepared from — used as the cache key
    /// (spec.md §9).
    pub fn cql(&self) -> &str {
        &self.0.cql
    }

    /// Bind parameter metadata, in positional order.
    pub fn params(&self) -> &ColumnsMetadata {
        &self.0.params
    }

    /// Result-row column metadata, if the server included it.
    pub fn result(&self) -> &ColumnsMetadata {
        &self.0.result
    }

    /// A weak handle suitable for a cache entry that shouldn't keep the
    /// statement alive on its own (spec.md §9's grace-period eviction).
    pub(crate) fn downgrade(&self) -> WeakPreparedStatement {
        WeakPreparedStatement(Arc::downgrade(&self.0))
    }

    /// Bind `values` and run this statement at `consistency` (spec.md §4.5).
    /// Delegates to the owning [`Cluster`], which re-prepares this statement
    /// on any primary that doesn't already have it (spec.md §9).
    pub async fn execute(&self, values: BoundValues, consistency: Consistency) -> Result<QueryResult> {
        self.execute_with(values, consistency, &QueryOptions::default()).await
    }

    pub async fn execute_with(
        &self,
        values: BoundValues,
        consistency: Consistency,
        opts: &QueryOptions,
    ) -> Result<QueryResult> {
        self.0.cluster.execute_prepared(self, values, consistency, opts).await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cluster.cache().arm_eviction(self.cql.clone());
    }
}

/// Parameter values bound to a [`PreparedStatement::execute`] call.
///
/// `Named` is a `Vec` of pairs rather than a map so that binding the same
/// name twice is representable — and rejected — instead of silently
/// overwriting (spec.md §4.5 "binding the same name twice is an error").
#[derive(Debug, Clone)]
pub enum BoundValues {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl BoundValues {
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self::Positional(values.into_iter().collect())
    }

    pub fn named(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::Named(values.into_iter().collect())
    }
}

/// Encode bound values against `params`' column order, producing the
/// wire-ready `[Option<Vec<u8>>]` list `EXECUTE` needs (spec.md §4.1, §4.5).
pub(crate) fn encode_bound(params: &ColumnsMetadata, values: BoundValues) -> Result<Vec<Option<Vec<u8>>>> {
    match values {
        BoundValues::Positional(values) => {
            if values.len() != params.columns.len() {
                return Err(EncodingError::ParamCountMismatch {
                    expected: params.columns.len(),
                    got: values.len(),
                }
                .into());
            }
            params
                .columns
                .iter()
                .zip(values)
                .map(|(col, value)| Ok(value::encode(&col.ty, &value)?))
                .collect()
        }
        BoundValues::Named(values) => {
            let mut seen = HashSet::with_capacity(values.len());
            for (name, _) in &values {
                if !seen.insert(name.as_str()) {
                    return Err(EncodingError::DuplicateParamName(name.clone()).into());
                }
            }

            let mut by_name: std::collections::HashMap<String, Value> = values.into_iter().collect();

            params
                .columns
                .iter()
                .map(|col| {
                    let value = by_name.remove(col.name.as_str()).unwrap_or(Value::Null);
                    Ok(value::encode(&col.ty, &value)?)
                })
                .collect::<Result<Vec<_>>>()
                .and_then(|encoded| {
                    if let Some((name, _)) = by_name.into_iter().next() {
                        return Err(EncodingError::UnknownParamName(name).into());
                    }
                    Ok(encoded)
                })
        }
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("id", &format_args!("{:02x?}", &self.0.id[..]))
            .field("cql", &self.0.cql)
            .finish()
    }
}

/// A non-owning handle to a [`PreparedStatement`], held by the statement
/// cache so a statement can be dropped (and its server-side id go stale)
/// once nothing else references it, after its grace period elapses.
#[derive(Clone)]
pub(crate) struct WeakPreparedStatement(std::sync::Weak<Inner>);

impl WeakPreparedStatement {
    pub(crate) fn upgrade(&self) -> Option<PreparedStatement> {
        self.0.upgrade().map(PreparedStatement)
    }
}

#[cfg(test)]
impl PreparedStatement {
    /// A statement with no real connection backing it, for exercising cache
    /// eviction in isolation.
    pub(crate) fn for_test(id: Bytes, cql: String) -> Self {
        let empty = ColumnsMetadata { columns: Vec::new(), has_more_pages: false, paging_state: None };
        Self::new(id, cql, empty.clone(), empty, Cluster::for_test())
    }
}
