//! CQL column type tags (spec.md §3 "Column type tag").
use crate::error::ProtocolError;
use crate::frame::Frame;

/// The `u16` opcode identifying a column's CQL type on the wire.
///
/// Collection tags (`List`/`Set`) carry one inner type, `Map` carries two,
/// and `Custom` carries a class-name string — see [`ColumnType`] for the
/// fully-resolved, recursive form used once a column spec has been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TypeTag {
    Custom = 0x0000,
    Ascii = 0x0001,
    Bigint = 0x0002,
    Blob = 0x0003,
    Boolean = 0x0004,
    Counter = 0x0005,
    Decimal = 0x0006,
    Double = 0x0007,
    Float = 0x0008,
    Int = 0x0009,
    Text = 0x000A,
    Timestamp = 0x000B,
    Uuid = 0x000C,
    Varchar = 0x000D,
    Varint = 0x000E,
    Timeuuid = 0x000F,
    Inet = 0x0010,
    List = 0x0020,
    Map = 0x0021,
    Set = 0x0022,
}

impl TypeTag {
    pub fn from_u16(tag: u16) -> Option<Self> {
        Some(match tag {
            0x0000 => Self::Custom,
            0x0001 => Self::Ascii,
            0x0002 => Self::Bigint,
            0x0003 => Self::Blob,
            0x0004 => Self::Boolean,
            0x0005 => Self::Counter,
            0x0006 => Self::Decimal,
            0x0007 => Self::Double,
            0x0008 => Self::Float,
            0x0009 => Self::Int,
            0x000A => Self::Text,
            0x000B => Self::Timestamp,
            0x000C => Self::Uuid,
            0x000D => Self::Varchar,
            0x000E => Self::Varint,
            0x000F => Self::Timeuuid,
            0x0010 => Self::Inet,
            0x0020 => Self::List,
            0x0021 => Self::Map,
            0x0022 => Self::Set,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A column's fully-resolved CQL type: the [`TypeTag`] plus any inner types
/// collections carry, or the class name a `CUSTOM` tag carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Text,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    /// A tag this client doesn't recognize; decoded values fall back to
    /// hex-encoded opaque bytes (spec.md §4.2).
    Unknown(u16),
}

impl ColumnType {
    pub fn tag(&self) -> u16 {
        match self {
            Self::Custom(_) => TypeTag::Custom.as_u16(),
            Self::Ascii => TypeTag::Ascii.as_u16(),
            Self::Bigint => TypeTag::Bigint.as_u16(),
            Self::Blob => TypeTag::Blob.as_u16(),
            Self::Boolean => TypeTag::Boolean.as_u16(),
            Self::Counter => TypeTag::Counter.as_u16(),
            Self::Decimal => TypeTag::Decimal.as_u16(),
            Self::Double => TypeTag::Double.as_u16(),
            Self::Float => TypeTag::Float.as_u16(),
            Self::Int => TypeTag::Int.as_u16(),
            Self::Text => TypeTag::Text.as_u16(),
            Self::Timestamp => TypeTag::Timestamp.as_u16(),
            Self::Uuid => TypeTag::Uuid.as_u16(),
            Self::Varchar => TypeTag::Varchar.as_u16(),
            Self::Varint => TypeTag::Varint.as_u16(),
            Self::Timeuuid => TypeTag::Timeuuid.as_u16(),
            Self::Inet => TypeTag::Inet.as_u16(),
            Self::List(_) => TypeTag::List.as_u16(),
            Self::Map(..) => TypeTag::Map.as_u16(),
            Self::Set(_) => TypeTag::Set.as_u16(),
            Self::Unknown(tag) => *tag,
        }
    }

    /// Parse one column type spec from the frame, recursing into inner types
    /// for collections and reading the class name for `CUSTOM` (spec.md §3).
    pub fn from_frame(frame: &mut Frame) -> Result<Self, ProtocolError> {
        let tag = frame.unpack_short()?;
        Ok(match TypeTag::from_u16(tag) {
            Some(TypeTag::Custom) => Self::Custom(frame.unpack_string()?),
            Some(TypeTag::Ascii) => Self::Ascii,
            Some(TypeTag::Bigint) => Self::Bigint,
            Some(TypeTag::Blob) => Self::Blob,
            Some(TypeTag::Boolean) => Self::Boolean,
            Some(TypeTag::Counter) => Self::Counter,
            Some(TypeTag::Decimal) => Self::Decimal,
            Some(TypeTag::Double) => Self::Double,
            Some(TypeTag::Float) => Self::Float,
            Some(TypeTag::Int) => Self::Int,
            Some(TypeTag::Text) => Self::Text,
            Some(TypeTag::Timestamp) => Self::Timestamp,
            Some(TypeTag::Uuid) => Self::Uuid,
            Some(TypeTag::Varchar) => Self::Varchar,
            Some(TypeTag::Varint) => Self::Varint,
            Some(TypeTag::Timeuuid) => Self::Timeuuid,
            Some(TypeTag::Inet) => Self::Inet,
            Some(TypeTag::List) => Self::List(Box::new(Self::from_frame(frame)?)),
            Some(TypeTag::Map) => {
                let key = Self::from_frame(frame)?;
                let value = Self::from_frame(frame)?;
                Self::Map(Box::new(key), Box::new(value))
            }
            Some(TypeTag::Set) => Self::Set(Box::new(Self::from_frame(frame)?)),
            None => {
                #[cfg(feature = "verbose")]
                tracing::warn!(tag = format!("{tag:#06x}"), "unknown column type tag");
                Self::Unknown(tag)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tag_round_trip() {
        let mut f = Frame::new();
        f.pack_short(TypeTag::Int.as_u16());
        assert_eq!(ColumnType::from_frame(&mut f).unwrap(), ColumnType::Int);
    }

    #[test]
    fn list_of_text_round_trip() {
        let mut f = Frame::new();
        f.pack_short(TypeTag::List.as_u16());
        f.pack_short(TypeTag::Varchar.as_u16());
        assert_eq!(
            ColumnType::from_frame(&mut f).unwrap(),
            ColumnType::List(Box::new(ColumnType::Varchar))
        );
    }

    #[test]
    fn map_of_text_to_int_round_trip() {
        let mut f = Frame::new();
        f.pack_short(TypeTag::Map.as_u16());
        f.pack_short(TypeTag::Varchar.as_u16());
        f.pack_short(TypeTag::Int.as_u16());
        assert_eq!(
            ColumnType::from_frame(&mut f).unwrap(),
            ColumnType::Map(Box::new(ColumnType::Varchar), Box::new(ColumnType::Int))
        );
    }

    #[test]
    fn custom_tag_carries_class_name() {
        let mut f = Frame::new();
        f.pack_short(TypeTag::Custom.as_u16());
        f.pack_string("org.apache.cassandra.db.marshal.UTF8Type");
        assert_eq!(
            ColumnType::from_frame(&mut f).unwrap(),
            ColumnType::Custom("org.apache.cassandra.db.marshal.UTF8Type".into())
        );
    }

    #[test]
    fn unknown_tag_falls_back() {
        let mut f = Frame::new();
        f.pack_short(0xBEEF);
        assert_eq!(ColumnType::from_frame(&mut f).unwrap(), ColumnType::Unknown(0xBEEF));
    }
}
