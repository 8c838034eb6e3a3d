//! `RESULT` response body decoding (spec.md §3 "Result kinds", §4.3, §9).
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::metadata::ColumnsMetadata;
use crate::row::Row;

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

/// A decoded `RESULT` body, represented as a tagged sum over its kind
/// (spec.md §9 "Polymorphism over response bodies").
#[derive(Debug)]
pub enum QueryResult {
    Void,
    Rows(RowsResult),
    SetKeyspace(String),
    Prepared(PreparedResult),
    SchemaChange(SchemaChange),
}

#[derive(Debug)]
pub struct RowsResult {
    pub metadata: Arc<ColumnsMetadata>,
    pub rows: Vec<Row>,
}

#[derive(Debug)]
pub struct PreparedResult {
    pub id: Bytes,
    pub params: ColumnsMetadata,
    /// Present only under protocol v2 (spec.md §3).
    pub result: Option<ColumnsMetadata>,
}

#[derive(Debug, Clone)]
pub struct SchemaChange {
    pub change_type: String,
    pub keyspace: String,
    pub table: String,
}

impl QueryResult {
    pub fn from_frame(frame: &mut Frame) -> Result<Self, ProtocolError> {
        let kind = frame.unpack_int()?;
        Ok(match kind {
            KIND_VOID => Self::Void,
            KIND_ROWS => Self::Rows(decode_rows(frame)?),
            KIND_SET_KEYSPACE => Self::SetKeyspace(frame.unpack_string()?),
            KIND_PREPARED => Self::Prepared(decode_prepared(frame)?),
            KIND_SCHEMA_CHANGE => Self::SchemaChange(SchemaChange {
                change_type: frame.unpack_string()?,
                keyspace: frame.unpack_string()?,
                table: frame.unpack_string()?,
            }),
            other => {
                return Err(ProtocolError::ResultKindMismatch {
                    expected: "one of VOID|ROWS|SET_KEYSPACE|PREPARED|SCHEMA_CHANGE",
                }
                .also_log(other))
            }
        })
    }

    /// Unwrap into [`RowsResult`], failing if the kind wasn't `ROWS`
    /// (spec.md §7 "Protocol ... result kind mismatch").
    pub fn into_rows(self) -> Result<RowsResult, ProtocolError> {
        match self {
            Self::Rows(rows) => Ok(rows),
            _ => Err(ProtocolError::ResultKindMismatch { expected: "ROWS" }),
        }
    }
}

fn decode_rows(frame: &mut Frame) -> Result<RowsResult, ProtocolError> {
    let metadata = Arc::new(ColumnsMetadata::from_frame(frame)?);
    let row_count = frame.unpack_int()?;
    if row_count < 0 {
        return Err(ProtocolError::InvalidLength(row_count));
    }
    let column_count = metadata.columns.len();
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let mut values = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            values.push(frame.unpack_bytes()?);
        }
        rows.push(Row::new(metadata.clone(), values));
    }
    Ok(RowsResult { metadata, rows })
}

fn decode_prepared(frame: &mut Frame) -> Result<PreparedResult, ProtocolError> {
    let id = frame.unpack_short_bytes()?;
    let params = ColumnsMetadata::from_frame(frame)?;
    // v2 servers append result-set metadata; v1 servers stop after params.
    let result = if frame.is_empty() { None } else { Some(ColumnsMetadata::from_frame(frame)?) };
    Ok(PreparedResult { id, params, result })
}

/// Small helper so an unrecognized kind still gets a warning the way an
/// unrecognized column type tag does (spec.md §4.2's logging convention
/// applied consistently to RESULT kinds).
trait AlsoLog {
    fn also_log(self, kind: i32) -> Self;
}

impl AlsoLog for ProtocolError {
    fn also_log(self, kind: i32) -> Self {
        #[cfg(feature = "verbose")]
        tracing::warn!(kind, "unrecognized RESULT kind");
        #[cfg(not(feature = "verbose"))]
        let _ = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnMeta;
    use crate::types::{ColumnType, TypeTag};

    #[test]
    fn void_result() {
        let mut f = Frame::new();
        f.pack_int(KIND_VOID);
        assert!(matches!(QueryResult::from_frame(&mut f).unwrap(), QueryResult::Void));
    }

    #[test]
    fn set_keyspace_result() {
        let mut f = Frame::new();
        f.pack_int(KIND_SET_KEYSPACE);
        f.pack_string("test");
        match QueryResult::from_frame(&mut f).unwrap() {
            QueryResult::SetKeyspace(ks) => assert_eq!(ks, "test"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn schema_change_result() {
        let mut f = Frame::new();
        f.pack_int(KIND_SCHEMA_CHANGE);
        f.pack_string("DROPPED");
        f.pack_string("test");
        f.pack_string("users");
        match QueryResult::from_frame(&mut f).unwrap() {
            QueryResult::SchemaChange(change) => {
                assert_eq!(change.change_type, "DROPPED");
                assert_eq!(change.keyspace, "test");
                assert_eq!(change.table, "users");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rows_result_one_row_two_columns() {
        let mut f = Frame::new();
        f.pack_int(KIND_ROWS);
        // metadata: global_tables_spec flag, 2 columns
        f.pack_int(0x0001);
        f.pack_int(2);
        f.pack_string("test");
        f.pack_string("c");
        f.pack_string("a");
        f.pack_short(TypeTag::Varchar.as_u16());
        f.pack_string("b");
        f.pack_short(TypeTag::Int.as_u16());
        // one row
        f.pack_int(1);
        f.pack_bytes(Some(b"hello"));
        f.pack_bytes(Some(&100i32.to_be_bytes()));

        let rows = QueryResult::from_frame(&mut f).unwrap().into_rows().unwrap();
        assert_eq!(rows.rows.len(), 1);
        let a: String = rows.rows[0].try_get("a").unwrap();
        let b: i32 = rows.rows[0].try_get("b").unwrap();
        assert_eq!(a, "hello");
        assert_eq!(b, 100);
    }

    #[test]
    fn prepared_v1_has_no_result_metadata() {
        let mut f = Frame::new();
        f.pack_int(KIND_PREPARED);
        f.pack_short_bytes(b"abc123");
        f.pack_int(0); // no global spec, no flags
        f.pack_int(0); // zero params
        match QueryResult::from_frame(&mut f).unwrap() {
            QueryResult::Prepared(p) => {
                assert_eq!(&p.id[..], b"abc123");
                assert!(p.result.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn column_meta_eq_across_collection_types() {
        let a = ColumnMeta {
            keyspace: "ks".into(),
            table: "t".into(),
            name: "n".into(),
            ty: ColumnType::List(Box::new(ColumnType::Int)),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
