//! The CQL value codec: `encode(type, value) -> bytes` / `decode(type, bytes)
//! -> value`, dispatched by [`ColumnType`] (spec.md §4.2).
use std::net::IpAddr;

use bytes::{Buf, Bytes};
use uuid::Uuid;

use crate::error::EncodingError;
use crate::ext::FmtExt;
use crate::types::ColumnType;

/// A decoded CQL value. `Null` stands for both a CQL `NULL` and a
/// zero-length collection element — callers distinguish them the way
/// spec.md §4.2 does: by the surrounding `[bytes]` length being `-1` versus
/// `0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Ascii(String),
    Bigint(i64),
    Blob(Bytes),
    Boolean(bool),
    Counter(i64),
    Decimal { unscaled: Vec<u8>, scale: i32 },
    Double(f64),
    Float(f32),
    Int(i32),
    Text(String),
    Timestamp(i64),
    Uuid(Uuid),
    Varint(Vec<u8>),
    Timeuuid(Uuid),
    Inet(IpAddr),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// A column whose [`ColumnType`] this client didn't recognize. Holds the
    /// raw bytes hex-encoded, since there's no way to know how to parse them
    /// (spec.md §4.2 "unknown type tags ... logged and surfaced as an opaque
    /// byte blob rather than rejected outright").
    Unknown(String),
}

/// Decode one column value given its resolved type and raw wire bytes.
///
/// `bytes` is `None` for a CQL `NULL`; a present-but-empty slice decodes to
/// the type's zero value where the protocol allows it (e.g. an empty blob).
pub fn decode(ty: &ColumnType, bytes: Option<Bytes>) -> Value {
    let Some(bytes) = bytes else { return Value::Null };

    match ty {
        ColumnType::Ascii => Value::Ascii(bytes_to_ascii(&bytes)),
        ColumnType::Bigint => Value::Bigint(decode_i64(&bytes)),
        ColumnType::Blob => Value::Blob(bytes),
        ColumnType::Boolean => Value::Boolean(bytes.first().copied().unwrap_or(0) != 0),
        ColumnType::Counter => Value::Counter(decode_i64(&bytes)),
        ColumnType::Decimal => decode_decimal(&bytes),
        ColumnType::Double => Value::Double(f64::from_be_bytes(pad_be(&bytes))),
        ColumnType::Float => Value::Float(f32::from_be_bytes(pad_be(&bytes))),
        ColumnType::Int => Value::Int(decode_i32(&bytes)),
        ColumnType::Text | ColumnType::Varchar => {
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        ColumnType::Timestamp => Value::Timestamp(decode_i64(&bytes)),
        ColumnType::Uuid => Value::Uuid(decode_uuid(&bytes)),
        ColumnType::Varint => Value::Varint(bytes.to_vec()),
        ColumnType::Timeuuid => Value::Timeuuid(decode_uuid(&bytes)),
        ColumnType::Inet => decode_inet(&bytes),
        ColumnType::List(inner) => Value::List(decode_collection_elems(inner, bytes)),
        ColumnType::Set(inner) => Value::Set(decode_collection_elems(inner, bytes)),
        ColumnType::Map(key_ty, value_ty) => Value::Map(decode_map_elems(key_ty, value_ty, bytes)),
        ColumnType::Custom(_) | ColumnType::Unknown(_) => {
            #[cfg(feature = "verbose")]
            tracing::warn!(tag = ty.tag(), "decoding column with unrecognized type as opaque bytes");
            Value::Unknown(hex_encode(&bytes))
        }
    }
}

/// Encode a value for the wire, as the `[bytes]` body bound to a `QUERY`'s
/// positional or named parameter (spec.md §4.2, §4.5).
pub fn encode(ty: &ColumnType, value: &Value) -> Result<Option<Vec<u8>>, EncodingError> {
    if matches!(value, Value::Null) {
        return Ok(None);
    }

    let encoded = match (ty, value) {
        (ColumnType::Ascii, Value::Ascii(s) | Value::Text(s)) => {
            if !s.is_ascii() {
                return Err(EncodingError::NonAscii);
            }
            s.clone().into_bytes()
        }
        (ColumnType::Bigint, Value::Bigint(n) | Value::Counter(n)) => n.to_be_bytes().to_vec(),
        (ColumnType::Blob, Value::Blob(b)) => b.to_vec(),
        (ColumnType::Boolean, Value::Boolean(b)) => vec![if *b { 1 } else { 0 }],
        (ColumnType::Counter, Value::Counter(n) | Value::Bigint(n)) => n.to_be_bytes().to_vec(),
        (ColumnType::Decimal, Value::Decimal { unscaled, scale }) => {
            let mut out = scale.to_be_bytes().to_vec();
            out.extend_from_slice(&minimal_two_complement(unscaled));
            out
        }
        (ColumnType::Double, Value::Double(f)) => f.to_be_bytes().to_vec(),
        (ColumnType::Float, Value::Float(f)) => f.to_be_bytes().to_vec(),
        (ColumnType::Int, Value::Int(n)) => n.to_be_bytes().to_vec(),
        (ColumnType::Text | ColumnType::Varchar, Value::Text(s) | Value::Ascii(s)) => {
            s.clone().into_bytes()
        }
        (ColumnType::Timestamp, Value::Timestamp(ms)) => ms.to_be_bytes().to_vec(),
        (ColumnType::Uuid, Value::Uuid(u)) => u.as_bytes().to_vec(),
        (ColumnType::Varint, Value::Varint(bytes)) => minimal_two_complement(bytes),
        (ColumnType::Timeuuid, Value::Timeuuid(u)) => u.as_bytes().to_vec(),
        (ColumnType::Inet, Value::Inet(addr)) => match addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        },
        (ColumnType::List(inner), Value::List(items)) => encode_collection(inner, items)?,
        (ColumnType::Set(inner), Value::Set(items)) => encode_collection(inner, items)?,
        (ColumnType::Map(key_ty, value_ty), Value::Map(pairs)) => {
            encode_map(key_ty, value_ty, pairs)?
        }
        (ColumnType::Custom(_) | ColumnType::Unknown(_), _) => {
            return Err(EncodingError::UnknownTypeTag(ty.tag()))
        }
        _ => return Err(EncodingError::UnknownTypeTag(ty.tag())),
    };

    Ok(Some(encoded))
}

fn bytes_to_ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes(pad_be(bytes))
}

fn decode_i64(bytes: &[u8]) -> i64 {
    i64::from_be_bytes(pad_be(bytes))
}

/// Left-pad (sign-extending for signed reads is the caller's problem — these
/// scalar types are always exactly-sized on the wire, so padding only
/// matters for malformed/truncated input) `bytes` into a fixed array.
fn pad_be<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let start = N.saturating_sub(bytes.len());
    let copy_len = bytes.len().min(N);
    buf[start..].copy_from_slice(&bytes[bytes.len() - copy_len..]);
    buf
}

fn decode_uuid(bytes: &[u8]) -> Uuid {
    let mut buf = [0u8; 16];
    let len = bytes.len().min(16);
    buf[..len].copy_from_slice(&bytes[..len]);
    Uuid::from_bytes(buf)
}

fn decode_decimal(bytes: &[u8]) -> Value {
    if bytes.len() < 4 {
        return Value::Decimal { unscaled: bytes.to_vec(), scale: 0 };
    }
    let scale = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Value::Decimal { unscaled: bytes[4..].to_vec(), scale }
}

fn decode_inet(bytes: &[u8]) -> Value {
    match bytes.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(bytes);
            Value::Inet(IpAddr::from(buf))
        }
        16 => {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(bytes);
            Value::Inet(IpAddr::from(buf))
        }
        _ => Value::Unknown(hex_encode(bytes)),
    }
}

/// `[short n][bytes_0]...[bytes_n-1]` — the element-count/length-prefix shape
/// shared by `LIST` and `SET` in CQL v1/v2 (spec.md §4.2: unlike v3+, the
/// count and each element length are `short`, mirroring
/// `Frame::pack_short_bytes`/`unpack_short_bytes`). Elements have no null
/// sentinel at this level — only the outer column `[bytes]` can be null.
fn decode_collection_elems(inner: &ColumnType, mut bytes: Bytes) -> Vec<Value> {
    let count = if bytes.remaining() >= 2 { bytes.get_u16() } else { 0 };
    (0..count)
        .filter_map(|_| collection_elem(&mut bytes))
        .map(|elem| decode(inner, Some(elem)))
        .collect()
}

fn decode_map_elems(key_ty: &ColumnType, value_ty: &ColumnType, mut bytes: Bytes) -> Vec<(Value, Value)> {
    let count = if bytes.remaining() >= 2 { bytes.get_u16() } else { 0 };
    (0..count)
        .filter_map(|_| {
            let k = collection_elem(&mut bytes)?;
            let v = collection_elem(&mut bytes)?;
            Some((decode(key_ty, Some(k)), decode(value_ty, Some(v))))
        })
        .collect()
}

/// One `[short_bytes]`-shaped element inside a collection body: `short`
/// length followed by that many bytes. No negative-length null sentinel.
fn collection_elem(bytes: &mut Bytes) -> Option<Bytes> {
    if bytes.remaining() < 2 {
        return None;
    }
    let len = bytes.get_u16() as usize;
    if bytes.remaining() < len {
        return None;
    }
    Some(bytes.copy_to_bytes(len))
}

fn encode_collection(inner: &ColumnType, items: &[Value]) -> Result<Vec<u8>, EncodingError> {
    let mut out = (items.len() as u16).to_be_bytes().to_vec();
    for item in items {
        append_elem(&mut out, encode(inner, item)?)?;
    }
    Ok(out)
}

fn encode_map(
    key_ty: &ColumnType,
    value_ty: &ColumnType,
    pairs: &[(Value, Value)],
) -> Result<Vec<u8>, EncodingError> {
    let mut out = (pairs.len() as u16).to_be_bytes().to_vec();
    for (k, v) in pairs {
        append_elem(&mut out, encode(key_ty, k)?)?;
        append_elem(&mut out, encode(value_ty, v)?)?;
    }
    Ok(out)
}

/// Appends one collection element. v1/v2 collections can't carry a null
/// element, so an encoded `None` (a `Value::Null` nested inside a
/// `List`/`Set`/`Map`) is rejected rather than silently framed as a zero-length value.
fn append_elem(out: &mut Vec<u8>, elem: Option<Vec<u8>>) -> Result<(), EncodingError> {
    let bytes = elem.ok_or(EncodingError::NullCollectionElement)?;
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Two's-complement, minimal-length (no redundant leading `0x00`/`0xff` byte
/// beyond what's needed to keep the sign bit correct), matching CQL
/// `VARINT`'s wire form (spec.md §4.2).
fn minimal_two_complement(bytes: &[u8]) -> Vec<u8> {
    if bytes.is_empty() {
        return vec![0];
    }

    let negative = bytes[0] & 0x80 != 0;
    let pad = if negative { 0xff } else { 0x00 };

    let mut start = 0;
    while start + 1 < bytes.len()
        && bytes[start] == pad
        && (bytes[start + 1] & 0x80 != 0) == negative
    {
        start += 1;
    }

    bytes[start..].to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Ascii(s) | Value::Text(s) => write!(f, "{s}"),
            Value::Bigint(n) | Value::Counter(n) | Value::Timestamp(n) => write!(f, "{n}"),
            Value::Blob(b) => write!(f, "{}", b.lossy()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Decimal { unscaled, scale } => write!(f, "{}e-{scale}", hex_encode(unscaled)),
            Value::Double(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Uuid(u) | Value::Timeuuid(u) => write!(f, "{u}"),
            Value::Varint(b) => write!(f, "{}", hex_encode(b)),
            Value::Inet(addr) => write!(f, "{addr}"),
            Value::List(items) | Value::Set(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Unknown(hex) => write!(f, "{hex}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_null_is_value_null() {
        assert_eq!(decode(&ColumnType::Int, None), Value::Null);
    }

    #[test]
    fn decode_int() {
        let bytes = Bytes::copy_from_slice(&42i32.to_be_bytes());
        assert_eq!(decode(&ColumnType::Int, Some(bytes)), Value::Int(42));
    }

    #[test]
    fn encode_int_round_trip() {
        let encoded = encode(&ColumnType::Int, &Value::Int(-7)).unwrap().unwrap();
        let decoded = decode(&ColumnType::Int, Some(Bytes::from(encoded)));
        assert_eq!(decoded, Value::Int(-7));
    }

    #[test]
    fn encode_null_is_none() {
        assert_eq!(encode(&ColumnType::Int, &Value::Null).unwrap(), None);
    }

    #[test]
    fn varint_minimal_encoding_drops_redundant_byte() {
        // 0x00 0x01 -> redundant leading zero for a positive value -> drop it
        assert_eq!(minimal_two_complement(&[0x00, 0x01]), vec![0x01]);
        // 0xff 0x80 -> redundant leading 0xff for a negative value -> drop it
        assert_eq!(minimal_two_complement(&[0xff, 0x80]), vec![0x80]);
        // 0x00 0x80 -> leading zero needed to keep sign bit clear -> keep it
        assert_eq!(minimal_two_complement(&[0x00, 0x80]), vec![0x00, 0x80]);
    }

    #[test]
    fn decimal_round_trip() {
        let value = Value::Decimal { unscaled: vec![0x01, 0x0], scale: 2 };
        let encoded = encode(&ColumnType::Decimal, &value).unwrap().unwrap();
        assert_eq!(decode(&ColumnType::Decimal, Some(Bytes::from(encoded))), value);
    }

    #[test]
    fn list_of_int_round_trip() {
        let ty = ColumnType::List(Box::new(ColumnType::Int));
        let value = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let encoded = encode(&ty, &value).unwrap().unwrap();
        let decoded = decode(&ty, Some(Bytes::from(encoded)));
        assert_eq!(decoded, value);
    }

    #[test]
    fn list_with_null_element_rejected_on_encode() {
        let ty = ColumnType::List(Box::new(ColumnType::Int));
        let value = Value::List(vec![Value::Int(1), Value::Null]);
        let err = encode(&ty, &value).unwrap_err();
        assert!(matches!(err, EncodingError::NullCollectionElement));
    }

    #[test]
    fn map_of_text_to_int_round_trip() {
        let ty = ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::Int));
        let value = Value::Map(vec![(Value::Text("a".into()), Value::Int(1))]);
        let encoded = encode(&ty, &value).unwrap().unwrap();
        assert_eq!(decode(&ty, Some(Bytes::from(encoded))), value);
    }

    /// Hand-written `[short count][short len][elem]...` bytes (spec.md §4.2's
    /// v1/v2 collection shape), proving the codec against literal bytes
    /// rather than only round-tripping through its own encoder.
    #[test]
    fn list_decodes_against_literal_u16_framed_bytes() {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes()); // count
        body.extend_from_slice(&4u16.to_be_bytes()); // elem 0 len
        body.extend_from_slice(&7i32.to_be_bytes());
        body.extend_from_slice(&4u16.to_be_bytes()); // elem 1 len
        body.extend_from_slice(&9i32.to_be_bytes());

        let ty = ColumnType::List(Box::new(ColumnType::Int));
        let decoded = decode(&ty, Some(Bytes::from(body.clone())));
        assert_eq!(decoded, Value::List(vec![Value::Int(7), Value::Int(9)]));

        let encoded = encode(&ty, &decoded).unwrap().unwrap();
        assert_eq!(encoded, body);
    }

    #[test]
    fn unknown_type_decodes_to_hex_fallback() {
        let decoded = decode(&ColumnType::Unknown(0xBEEF), Some(Bytes::from_static(b"\xca\xfe")));
        assert_eq!(decoded, Value::Unknown("0xcafe".into()));
    }

    #[test]
    fn ascii_non_ascii_rejected_on_encode() {
        let err = encode(&ColumnType::Ascii, &Value::Ascii("caf\u{e9}".into())).unwrap_err();
        assert!(matches!(err, EncodingError::NonAscii));
    }

    #[test]
    fn inet_v4_round_trip() {
        let value = Value::Inet("10.0.0.1".parse().unwrap());
        let encoded = encode(&ColumnType::Inet, &value).unwrap().unwrap();
        assert_eq!(decode(&ColumnType::Inet, Some(Bytes::from(encoded))), value);
    }
}
