//! The protocol frame buffer: typed, monotonic `pack_*`/`unpack_*` access to
//! the scalar types defined by spec.md §3/§4.1.
//!
//! A single [`Frame`] wraps one [`BytesMut`] and is used both to build a
//! request body (append-only, via `pack_*`) and to walk a response body
//! (front-consuming, via `unpack_*`) — `BytesMut` already implements both
//! [`Buf`] and [`BufMut`], so the two directions share one cursor the way
//! `postro`'s `row.rs` shares one `Bytes` cursor across `RowDescription` and
//! `DataRow`.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::ProtocolError;

/// A growable/consumable byte buffer for one protocol frame body.
#[derive(Debug, Default, Clone)]
pub struct Frame(BytesMut);

type Result<T> = std::result::Result<T, ProtocolError>;

impl Frame {
    pub fn new() -> Self {
        Self(BytesMut::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self(BytesMut::with_capacity(cap))
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(BytesMut::from(&bytes[..]))
    }

    pub fn into_bytes(self) -> Bytes {
        self.0.freeze()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.0.remaining() < n {
            return Err(ProtocolError::Truncated { needed: n, available: self.0.remaining() });
        }
        Ok(())
    }

    // ===== short: u16 BE =====

    pub fn pack_short(&mut self, value: u16) {
        self.0.put_u16(value);
    }

    pub fn unpack_short(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.0.get_u16())
    }

    // ===== int: i32 BE =====

    pub fn pack_int(&mut self, value: i32) {
        self.0.put_i32(value);
    }

    pub fn unpack_int(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.0.get_i32())
    }

    // ===== string: u16 length + utf8 =====

    pub fn pack_string(&mut self, value: &str) {
        self.0.put_u16(value.len() as u16);
        self.0.put_slice(value.as_bytes());
    }

    pub fn unpack_string(&mut self) -> Result<String> {
        let len = self.unpack_short()? as usize;
        self.need(len)?;
        let bytes = self.0.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    // ===== long_string: i32 length + utf8 =====

    pub fn pack_long_string(&mut self, value: &str) {
        self.0.put_i32(value.len() as i32);
        self.0.put_slice(value.as_bytes());
    }

    pub fn unpack_long_string(&mut self) -> Result<String> {
        let len = self.unpack_int()?;
        if len < 0 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let len = len as usize;
        self.need(len)?;
        let bytes = self.0.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    // ===== bytes: i32 length, negative = null =====

    pub fn pack_bytes(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.0.put_i32(bytes.len() as i32);
                self.0.put_slice(bytes);
            }
            None => self.0.put_i32(-1),
        }
    }

    pub fn unpack_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.unpack_int()?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        self.need(len)?;
        Ok(Some(self.0.split_to(len).freeze()))
    }

    // ===== short_bytes: u16 length =====

    pub fn pack_short_bytes(&mut self, value: &[u8]) {
        self.0.put_u16(value.len() as u16);
        self.0.put_slice(value);
    }

    pub fn unpack_short_bytes(&mut self) -> Result<Bytes> {
        let len = self.unpack_short()? as usize;
        self.need(len)?;
        Ok(self.0.split_to(len).freeze())
    }

    // ===== uuid: 16 raw bytes =====

    pub fn pack_uuid(&mut self, value: uuid::Uuid) {
        self.0.put_slice(value.as_bytes());
    }

    pub fn unpack_uuid(&mut self) -> Result<uuid::Uuid> {
        self.need(16)?;
        let mut buf = [0u8; 16];
        self.0.copy_to_slice(&mut buf);
        Ok(uuid::Uuid::from_bytes(buf))
    }

    // ===== string_list: u16 count + strings =====

    pub fn pack_string_list(&mut self, values: &[impl AsRef<str>]) {
        self.0.put_u16(values.len() as u16);
        for v in values {
            self.pack_string(v.as_ref());
        }
    }

    pub fn unpack_string_list(&mut self) -> Result<Vec<String>> {
        let count = self.unpack_short()?;
        (0..count).map(|_| self.unpack_string()).collect()
    }

    // ===== string_map: u16 count + (string,string) pairs, sorted on write =====

    pub fn pack_string_map(&mut self, values: &[(String, String)]) {
        let mut sorted: Vec<&(String, String)> = values.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        self.0.put_u16(sorted.len() as u16);
        for (k, v) in sorted {
            self.pack_string(k);
            self.pack_string(v);
        }
    }

    pub fn unpack_string_map(&mut self) -> Result<Vec<(String, String)>> {
        let count = self.unpack_short()?;
        (0..count)
            .map(|_| Ok((self.unpack_string()?, self.unpack_string()?)))
            .collect()
    }

    pub fn unpack_string_multimap(&mut self) -> Result<Vec<(String, Vec<String>)>> {
        let count = self.unpack_short()?;
        (0..count)
            .map(|_| Ok((self.unpack_string()?, self.unpack_string_list()?)))
            .collect()
    }

    // ===== inet: u8 addr length + addr [+ i32 port] =====

    pub fn pack_inet(&mut self, addr: SocketAddr) {
        match addr.ip() {
            IpAddr::V4(v4) => {
                self.0.put_u8(4);
                self.0.put_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.0.put_u8(16);
                self.0.put_slice(&v6.octets());
            }
        }
        self.0.put_i32(addr.port() as i32);
    }

    pub fn unpack_inet(&mut self) -> Result<SocketAddr> {
        let ip = self.unpack_inet_addr()?;
        let port = self.unpack_int()?;
        Ok(SocketAddr::new(ip, port as u16))
    }

    /// `addr` without a trailing port — used by `system.peers`' `peer` column
    /// (spec.md §4.6), which carries only the raw address bytes.
    pub fn unpack_inet_addr(&mut self) -> Result<IpAddr> {
        let len = self.need_byte()?;
        match len {
            4 => {
                self.need(4)?;
                let mut buf = [0u8; 4];
                self.0.copy_to_slice(&mut buf);
                Ok(IpAddr::V4(Ipv4Addr::from(buf)))
            }
            16 => {
                self.need(16)?;
                let mut buf = [0u8; 16];
                self.0.copy_to_slice(&mut buf);
                Ok(IpAddr::V6(Ipv6Addr::from(buf)))
            }
            other => Err(ProtocolError::InvalidInetLength(other)),
        }
    }

    fn need_byte(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    pub fn pack_byte(&mut self, value: u8) {
        self.0.put_u8(value);
    }

    pub fn unpack_byte(&mut self) -> Result<u8> {
        self.need_byte()
    }

    pub fn pack_long(&mut self, value: i64) {
        self.0.put_i64(value);
    }

    pub fn unpack_long(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.0.get_i64())
    }

    /// Remaining unread bytes, consuming the whole tail.
    pub fn unpack_rest(&mut self) -> Bytes {
        self.0.split_to(self.0.len()).freeze()
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<BytesMut> for Frame {
    fn from(buf: BytesMut) -> Self {
        Self(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_round_trip() {
        let mut f = Frame::new();
        f.pack_short(0xBEEF);
        assert_eq!(f.unpack_short().unwrap(), 0xBEEF);
    }

    #[test]
    fn string_round_trip_preserves_utf8() {
        let mut f = Frame::new();
        f.pack_string("caf\u{e9}");
        assert_eq!(f.unpack_string().unwrap(), "caf\u{e9}");
    }

    #[test]
    fn bytes_negative_length_is_null() {
        let mut f = Frame::new();
        f.pack_bytes(None);
        assert_eq!(f.unpack_bytes().unwrap(), None);
    }

    #[test]
    fn bytes_round_trip() {
        let mut f = Frame::new();
        f.pack_bytes(Some(b"hello"));
        assert_eq!(f.unpack_bytes().unwrap().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn string_list_round_trip() {
        let mut f = Frame::new();
        f.pack_string_list(&["a", "bb", "ccc"]);
        assert_eq!(f.unpack_string_list().unwrap(), vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn string_map_is_written_sorted() {
        let mut f = Frame::new();
        f.pack_string_map(&[("z".into(), "1".into()), ("a".into(), "2".into())]);
        let decoded = f.unpack_string_map().unwrap();
        assert_eq!(decoded, vec![("a".to_string(), "2".to_string()), ("z".to_string(), "1".to_string())]);
    }

    #[test]
    fn string_map_decode_accepts_any_order() {
        let mut f = Frame::new();
        // hand-write an out-of-order map: count=2, "z"->"1", "a"->"2"
        f.pack_short(2);
        f.pack_string("z");
        f.pack_string("1");
        f.pack_string("a");
        f.pack_string("2");
        let decoded = f.unpack_string_map().unwrap();
        assert_eq!(decoded, vec![("z".to_string(), "1".to_string()), ("a".to_string(), "2".to_string())]);
    }

    #[test]
    fn inet_v4_round_trip() {
        let mut f = Frame::new();
        let addr: SocketAddr = "10.0.0.1:9042".parse().unwrap();
        f.pack_inet(addr);
        assert_eq!(f.unpack_inet().unwrap(), addr);
    }

    #[test]
    fn unpack_past_end_is_protocol_error() {
        let mut f = Frame::new();
        f.pack_short(1);
        assert!(f.unpack_int().is_err());
    }

    #[test]
    fn uuid_round_trip() {
        let mut f = Frame::new();
        let id = uuid::Uuid::from_bytes([7; 16]);
        f.pack_uuid(id);
        assert_eq!(f.unpack_uuid().unwrap(), id);
    }
}
