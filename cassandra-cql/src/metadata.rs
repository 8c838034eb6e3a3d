//! `Metadata` as it prefixes a `RESULT` `Rows`/`Prepared` body (spec.md §4.3).
use std::sync::Arc;

use bytes::Bytes;

use crate::common::ByteStr;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::types::ColumnType;

const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;

/// One column's identity and type, as carried by `Rows`/`Prepared` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub keyspace: ByteStr,
    pub table: ByteStr,
    pub name: ByteStr,
    pub ty: ColumnType,
}

/// The decoded `<metadata>` section of a `RESULT` body (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct ColumnsMetadata {
    pub columns: Vec<ColumnMeta>,
    pub has_more_pages: bool,
    pub paging_state: Option<Bytes>,
}

impl ColumnsMetadata {
    pub fn from_frame(frame: &mut Frame) -> Result<Self, ProtocolError> {
        let flags = frame.unpack_int()?;
        let column_count = frame.unpack_int()?;
        if column_count < 0 {
            return Err(ProtocolError::InvalidLength(column_count));
        }

        let paging_state = if flags & FLAG_HAS_MORE_PAGES != 0 {
            frame.unpack_bytes()?
        } else {
            None
        };

        if flags & FLAG_NO_METADATA != 0 {
            return Ok(Self {
                columns: Vec::new(),
                has_more_pages: flags & FLAG_HAS_MORE_PAGES != 0,
                paging_state,
            });
        }

        let global_spec = if flags & FLAG_GLOBAL_TABLES_SPEC != 0 {
            let keyspace = ByteStr::from(frame.unpack_string()?);
            let table = ByteStr::from(frame.unpack_string()?);
            Some((keyspace, table))
        } else {
            None
        };

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let (keyspace, table) = match &global_spec {
                Some((ks, tbl)) => (ks.clone(), tbl.clone()),
                None => (
                    ByteStr::from(frame.unpack_string()?),
                    ByteStr::from(frame.unpack_string()?),
                ),
            };
            let name = ByteStr::from(frame.unpack_string()?);
            let ty = ColumnType::from_frame(frame)?;
            columns.push(ColumnMeta { keyspace, table, name, ty });
        }

        Ok(Self {
            columns,
            has_more_pages: flags & FLAG_HAS_MORE_PAGES != 0,
            paging_state,
        })
    }

    /// Matches a bare column name, a `table.name` qualifier, or a full
    /// `keyspace.table.name` qualifier (spec.md §4.3).
    pub fn find_column(&self, name: &str) -> Option<(usize, &ColumnMeta)> {
        self.columns.iter().enumerate().find(|(_, c)| {
            if c.name.as_str() == name {
                return true;
            }
            match name.rsplit_once('.') {
                Some((rest, short)) if short == c.name.as_str() => match rest.rsplit_once('.') {
                    Some((ks, table)) => ks == c.keyspace.as_str() && table == c.table.as_str(),
                    None => rest == c.table.as_str(),
                },
                _ => false,
            }
        })
    }
}

/// Shared handle to a query's resolved column metadata — every [`Row`][crate::row::Row]
/// decoded from the same `RESULT` body clones this cheaply rather than
/// re-parsing the column spec per row.
pub type SharedMetadata = Arc<ColumnsMetadata>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tables_spec_is_shared_across_columns() {
        let mut f = Frame::new();
        f.pack_int(FLAG_GLOBAL_TABLES_SPEC);
        f.pack_int(2);
        f.pack_string("ks");
        f.pack_string("tbl");
        f.pack_string("id");
        f.pack_short(crate::types::TypeTag::Uuid.as_u16());
        f.pack_string("name");
        f.pack_short(crate::types::TypeTag::Varchar.as_u16());

        let meta = ColumnsMetadata::from_frame(&mut f).unwrap();
        assert_eq!(meta.columns.len(), 2);
        assert_eq!(meta.columns[0].keyspace, "ks");
        assert_eq!(meta.columns[1].table, "tbl");
        assert_eq!(meta.columns[0].name, "id");
        assert_eq!(meta.columns[1].name, "name");
    }

    #[test]
    fn no_metadata_flag_yields_no_columns() {
        let mut f = Frame::new();
        f.pack_int(FLAG_NO_METADATA);
        f.pack_int(0);
        let meta = ColumnsMetadata::from_frame(&mut f).unwrap();
        assert!(meta.columns.is_empty());
    }

    #[test]
    fn find_column_matches_qualified_names() {
        let mut f = Frame::new();
        f.pack_int(0);
        f.pack_int(1);
        f.pack_string("ks");
        f.pack_string("tbl");
        f.pack_string("name");
        f.pack_short(crate::types::TypeTag::Varchar.as_u16());
        let meta = ColumnsMetadata::from_frame(&mut f).unwrap();

        assert_eq!(meta.find_column("name").unwrap().0, 0);
        assert_eq!(meta.find_column("tbl.name").unwrap().0, 0);
        assert_eq!(meta.find_column("ks.tbl.name").unwrap().0, 0);
        assert!(meta.find_column("other.name").is_none());
        assert!(meta.find_column("missing").is_none());
    }

    #[test]
    fn has_more_pages_carries_paging_state() {
        let mut f = Frame::new();
        f.pack_int(FLAG_HAS_MORE_PAGES | FLAG_NO_METADATA);
        f.pack_int(0);
        f.pack_bytes(Some(b"page-token"));
        let meta = ColumnsMetadata::from_frame(&mut f).unwrap();
        assert!(meta.has_more_pages);
        assert_eq!(meta.paging_state.as_deref(), Some(&b"page-token"[..]));
    }
}
