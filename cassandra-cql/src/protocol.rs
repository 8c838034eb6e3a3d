//! Message envelope and opcode table (spec.md §3 "Message envelope", §6).
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;

/// Reserved for server-initiated `ERROR` not tied to a client request.
pub const STREAM_ID_SERVER_ERROR: i8 = 0;
/// Reserved for `EVENT` pushes (wire value `0xFF`).
pub const STREAM_ID_EVENT: i8 = -1;

/// Request/response opcode (spec.md §3 "Opcodes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Credentials = 0x04,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        Ok(match byte {
            0x00 => Self::Error,
            0x01 => Self::Startup,
            0x02 => Self::Ready,
            0x03 => Self::Authenticate,
            0x04 => Self::Credentials,
            0x05 => Self::Options,
            0x06 => Self::Supported,
            0x07 => Self::Query,
            0x08 => Self::Result,
            0x09 => Self::Prepare,
            0x0A => Self::Execute,
            0x0B => Self::Register,
            0x0C => Self::Event,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The CQL native protocol version this connection negotiated (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    fn request_byte(self) -> u8 {
        match self {
            Self::V1 => 0x01,
            Self::V2 => 0x02,
        }
    }

    fn response_byte(self) -> u8 {
        self.request_byte() | 0x80
    }

    fn from_response_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x81 => Ok(Self::V1),
            0x82 => Ok(Self::V2),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

/// One full protocol message: header plus body (spec.md §3 "Message envelope").
///
/// `version | flags | stream_id | opcode | length:u32 | body` — this is the
/// transport-level unit; `body` itself is decoded with [`Frame`][crate::frame::Frame].
#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub flags: u8,
    pub stream_id: i8,
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Envelope {
    pub fn request(version: ProtocolVersion, stream_id: i8, opcode: Opcode, body: Bytes) -> Self {
        Self { version, flags: 0, stream_id, opcode, body }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSION != 0
    }

    pub fn has_tracing(&self) -> bool {
        self.flags & FLAG_TRACING != 0
    }

    /// Strip the leading 16-byte tracing id the server prepends when
    /// `FLAG_TRACING` is set (spec.md §3), returning the id if present.
    pub fn take_tracing_id(&mut self) -> Option<Bytes> {
        if !self.has_tracing() || self.body.len() < 16 {
            return None;
        }
        let mut body = std::mem::replace(&mut self.body, Bytes::new());
        let id = body.split_to(16);
        self.body = body;
        Some(id)
    }

    /// Serialize the header plus uncompressed body onto `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.version.request_byte());
        out.put_u8(self.flags);
        out.put_i8(self.stream_id);
        out.put_u8(self.opcode.as_u8());
        out.put_u32(self.body.len() as u32);
        out.extend_from_slice(&self.body);
    }

    /// Decode a header plus body already known to be fully buffered.
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        if buf.len() < 8 {
            return Err(ProtocolError::Truncated { needed: 8, available: buf.len() });
        }
        let version = ProtocolVersion::from_response_byte(buf.get_u8())?;
        let flags = buf.get_u8();
        let stream_id = buf.get_i8();
        let opcode = Opcode::from_u8(buf.get_u8())?;
        let length = buf.get_u32() as usize;
        if buf.len() < length {
            return Err(ProtocolError::Truncated { needed: length, available: buf.len() });
        }
        let body = buf.split_to(length);
        Ok(Self { version, flags, stream_id, opcode, body })
    }

    /// Number of header bytes preceding the body, constant across v1/v2.
    pub const HEADER_LEN: usize = 8;

    /// Read just the `length` field out of a buffered 8-byte header, so the
    /// connection's reader task knows how many more bytes to wait for.
    pub fn peek_body_len(header: &[u8; Self::HEADER_LEN]) -> usize {
        u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize
    }
}

/// Body compression algorithm negotiated at startup (spec.md §4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Negotiated for protocol v1.
    Snappy,
    /// Negotiated for protocol v2; body is prefixed with a big-endian `u32`
    /// uncompressed length before the raw LZ4 block.
    Lz4,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
        }
    }

    pub fn for_protocol_version(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V1 => Self::Snappy,
            ProtocolVersion::V2 => Self::Lz4,
        }
    }

    pub fn compress(self, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Snappy => Ok(snap::raw::Encoder::new()
                .compress_vec(body)
                .map_err(|e| ProtocolError::Decompress(e.to_string()))?),
            Self::Lz4 => {
                let compressed = lz4::block::compress(body, None, false)
                    .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
                let mut out = Vec::with_capacity(4 + compressed.len());
                out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                out.extend_from_slice(&compressed);
                Ok(out)
            }
        }
    }

    pub fn decompress(self, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Snappy => {
                let len = snap::raw::decompress_len(body)
                    .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
                let mut out = vec![0u8; len];
                snap::raw::Decoder::new()
                    .decompress(body, &mut out)
                    .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
                Ok(out)
            }
            Self::Lz4 => {
                if body.len() < 4 {
                    return Err(ProtocolError::Decompress("lz4 body missing length prefix".into()));
                }
                let uncompressed_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as i32;
                lz4::block::decompress(&body[4..], Some(uncompressed_len))
                    .map_err(|e| ProtocolError::Decompress(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let env = Envelope::request(ProtocolVersion::V2, 5, Opcode::Options, Bytes::new());
        let mut out = BytesMut::new();
        env.encode(&mut out);
        // flip the response high bit by hand, the way a server reply would arrive
        out[0] |= 0x80;
        let decoded = Envelope::decode(out.freeze()).unwrap();
        assert_eq!(decoded.stream_id, 5);
        assert_eq!(decoded.opcode, Opcode::Options);
        assert_eq!(decoded.version, ProtocolVersion::V2);
    }

    #[test]
    fn truncated_header_is_protocol_error() {
        assert!(Envelope::decode(Bytes::from_static(&[0x82, 0x00])).is_err());
    }

    #[test]
    fn lz4_round_trip() {
        let body = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = Compression::Lz4.compress(&body).unwrap();
        let decompressed = Compression::Lz4.decompress(&compressed).unwrap();
        assert_eq!(decompressed, body);
    }

    #[test]
    fn snappy_round_trip() {
        let body = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = Compression::Snappy.compress(&body).unwrap();
        let decompressed = Compression::Snappy.decompress(&compressed).unwrap();
        assert_eq!(decompressed, body);
    }
}
