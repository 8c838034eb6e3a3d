//! Asynchronous Cassandra native protocol (CQL binary) driver.
//!
//! # Examples
//!
//! Connect and run a query:
//!
//! ```no_run
//! use cassandra_cql::{Cluster, Config, Consistency};
//!
//! # async fn app() -> cassandra_cql::Result<()> {
//! let config = Config::parse("cassandra://127.0.0.1/my_keyspace")?;
//! let cluster = Cluster::connect(config).await?;
//!
//! let rows = cluster.query_rows("SELECT id, name FROM users", Consistency::One).await?;
//! for row in rows {
//!     let id: i32 = row.try_get("id")?;
//!     let name: String = row.try_get("name")?;
//!     println!("{id}: {name}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Prepared statements are cached by the [`Cluster`] and transparently
//! re-prepared on every primary connection, including ones that come up
//! after the statement was first prepared:
//!
//! ```no_run
//! use cassandra_cql::{Cluster, Config, Consistency, BoundValues, Value};
//!
//! # async fn app(cluster: Cluster) -> cassandra_cql::Result<()> {
//! let stmt = cluster.prepare("INSERT INTO users (id, name) VALUES (?, ?)").await?;
//! stmt.execute(
//!     BoundValues::positional([Value::Int(1), Value::Text("ferris".into())]),
//!     Consistency::Quorum,
//! ).await?;
//! # Ok(())
//! # }
//! ```

mod common;
mod ext;

// Protocol
mod frame;
mod protocol;

// Encoding
mod types;
mod value;

// Component
pub mod metadata;
pub mod row;
mod result;

// Operation
mod statement;

// Connection / coordination
mod connection;
mod cluster;

mod consistency;
mod error;

pub use cluster::{Cluster, NodeRecord};
pub use connection::{Config, Connection, Event, QueryOptions};
pub use consistency::Consistency;
pub use error::{
    AuthError, ClusterError, ConfigError, EncodingError, Error, ErrorKind, ProtocolError, Result,
    ServerError,
};
pub use metadata::{ColumnMeta, ColumnsMetadata};
pub use protocol::ProtocolVersion;
pub use result::{PreparedResult, QueryResult, RowsResult, SchemaChange};
pub use row::{Column, Decode, DecodeError, FromRow, Row};
pub use statement::{BoundValues, PreparedStatement};
pub use types::{ColumnType, TypeTag};
pub use value::Value;

#[cfg(feature = "macros")]
pub use cassandra_cql_macros::{Decode, FromRow};
