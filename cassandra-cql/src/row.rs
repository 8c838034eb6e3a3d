//! Row/column decoding.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::Bytes;
use std::{borrow::Cow, fmt, net::IpAddr, str::Utf8Error, string::FromUtf8Error};

use crate::{
    common::ByteStr,
    metadata::SharedMetadata,
    types::ColumnType,
    value::{self, Value},
};

/// One decoded row of a `RESULT` `Rows` body (spec.md §4.3).
///
/// Every row produced by the same query response shares one [`SharedMetadata`]
/// handle (an `Arc`), so cloning the column spec per row costs nothing.
pub struct Row {
    metadata: SharedMetadata,
    values: Vec<Option<Bytes>>,
}

impl Row {
    pub(crate) fn new(metadata: SharedMetadata, values: Vec<Option<Bytes>>) -> Self {
        Self { metadata, values }
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let (i, meta) = idx.position(&self.metadata)?;
        let value = self.values[i].clone();
        R::decode(Column::new(meta.name.clone(), meta.ty.clone(), value))
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }

    /// Iterate columns in declared order.
    pub fn into_iter(self) -> IntoIter {
        IntoIter { metadata: self.metadata, values: self.values.into_iter(), i: 0 }
    }
}

/// [`IntoIterator`] implementation from [`Row`].
pub struct IntoIter {
    metadata: SharedMetadata,
    values: std::vec::IntoIter<Option<Bytes>>,
    i: usize,
}

impl Iterator for IntoIter {
    type Item = Column;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.values.next()?;
        let meta = &self.metadata.columns[self.i];
        self.i += 1;
        Some(Column::new(meta.name.clone(), meta.ty.clone(), value))
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (meta, raw) in self.metadata.columns.iter().zip(&self.values) {
            let decoded = raw.clone().map(|b| value::decode(&meta.ty, Some(b)));
            match decoded {
                Some(v) => dbg.entry(&meta.name.as_str(), &format_args!("{v}")),
                None => dbg.entry(&meta.name.as_str(), &format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// One column's name, type and raw wire value within a [`Row`].
#[derive(Clone)]
pub struct Column {
    name: ByteStr,
    ty: ColumnType,
    value: Option<Bytes>,
}

impl Column {
    fn new(name: ByteStr, ty: ColumnType, value: Option<Bytes>) -> Self {
        Self { name, ty, value }
    }

    /// Returns column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns column type.
    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Clone the inner [`Bytes`].
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn value(&self) -> Option<Bytes> {
        self.value.clone()
    }

    /// Consume self into the inner [`Bytes`].
    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    /// Try consume self into the inner [`Bytes`].
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::Null)
    }

    /// Decode this column into a [`Value`] using its declared [`ColumnType`].
    pub fn decode_value(&self) -> Value {
        value::decode(&self.ty, self.value.clone())
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name.as_str())
            .field("value", &self.decode_value())
            .finish()
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from [`Column`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl Decode for Value {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column.decode_value())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! decode_via_value {
    ($ty:ty, $variant:ident, $types:pat) => {
        impl Decode for $ty {
            fn decode(column: Column) -> Result<Self, DecodeError> {
                if !matches!(column.ty(), $types) {
                    return Err(DecodeError::TypeMismatch);
                }
                match column.decode_value() {
                    Value::$variant(v) => Ok(v),
                    Value::Null => Err(DecodeError::Null),
                    _ => Err(DecodeError::TypeMismatch),
                }
            }
        }
    };
}

decode_via_value!(i32, Int, ColumnType::Int);
decode_via_value!(i64, Bigint, ColumnType::Bigint | ColumnType::Counter | ColumnType::Timestamp);
decode_via_value!(f32, Float, ColumnType::Float);
decode_via_value!(f64, Double, ColumnType::Double);
decode_via_value!(bool, Boolean, ColumnType::Boolean);
decode_via_value!(String, Text, ColumnType::Text | ColumnType::Varchar | ColumnType::Ascii);
decode_via_value!(uuid::Uuid, Uuid, ColumnType::Uuid | ColumnType::Timeuuid);
decode_via_value!(IpAddr, Inet, ColumnType::Inet);

impl Decode for Vec<u8> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if !matches!(column.ty(), ColumnType::Blob) {
            return Err(DecodeError::TypeMismatch);
        }
        column.try_into_value().map(|b| b.to_vec())
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Resolve `self` against the row's metadata to a (position, column meta) pair.
    fn position(self, metadata: &SharedMetadata) -> Result<(usize, crate::metadata::ColumnMeta), DecodeError>;
}

impl Index for usize {
    fn position(self, metadata: &SharedMetadata) -> Result<(usize, crate::metadata::ColumnMeta), DecodeError> {
        metadata
            .columns
            .get(self)
            .cloned()
            .map(|meta| (self, meta))
            .ok_or(DecodeError::IndexOutOfBounds(self))
    }
}

impl Index for &str {
    fn position(self, metadata: &SharedMetadata) -> Result<(usize, crate::metadata::ColumnMeta), DecodeError> {
        metadata
            .find_column(self)
            .map(|(i, meta)| (i, meta.clone()))
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Server returned a non-UTF8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Column's declared type does not match the requested Rust type.
    TypeMismatch,
    /// Column value is `NULL`.
    Null,
    /// A query expecting exactly one row back (e.g. `cluster_name()`) got none.
    RowNotFound,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMismatch => write!(f, "column type mismatch"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::RowNotFound => write!(f, "row not found"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));

impl std::error::Error for DecodeError {}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnMeta, ColumnsMetadata};
    use std::sync::Arc;

    fn row_with(name: &str, ty: ColumnType, value: Option<Bytes>) -> Row {
        let metadata = Arc::new(ColumnsMetadata {
            columns: vec![ColumnMeta {
                keyspace: "ks".into(),
                table: "tbl".into(),
                name: name.into(),
                ty,
            }],
            has_more_pages: false,
            paging_state: None,
        });
        Row::new(metadata, vec![value])
    }

    #[test]
    fn try_get_by_name() {
        let row = row_with("n", ColumnType::Int, Some(Bytes::from(42i32.to_be_bytes().to_vec())));
        let n: i32 = row.try_get("n").unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn try_get_missing_column_errors() {
        let row = row_with("n", ColumnType::Int, None);
        let err = row.try_get::<_, i32>("missing").unwrap_err();
        assert!(matches!(err, DecodeError::ColumnNotFound(_)));
    }

    #[test]
    fn option_decode_handles_null() {
        let row = row_with("n", ColumnType::Int, None);
        let n: Option<i32> = row.try_get(0).unwrap();
        assert_eq!(n, None);
    }

    #[test]
    fn non_null_required_field_errors_on_null() {
        let row = row_with("n", ColumnType::Int, None);
        let err = row.try_get::<_, i32>(0).unwrap_err();
        assert!(matches!(err, DecodeError::Null));
    }
}
