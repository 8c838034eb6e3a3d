//! Minimal hand-rolled wire helpers for the integration tests, built the same
//! way `luma-cassandra/src/protocol/tests.rs` asserts literal byte sequences:
//! no dependency on `cassandra_cql`'s own (private) frame/envelope types, just
//! the byte layout spec.md §3/§4 describes. This lets the tests stand in for
//! a real Cassandra node without trusting the crate under test to decode its
//! own wire format correctly.
#![allow(dead_code)]

use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const OP_ERROR: u8 = 0x00;
pub const OP_STARTUP: u8 = 0x01;
pub const OP_READY: u8 = 0x02;
pub const OP_AUTHENTICATE: u8 = 0x03;
pub const OP_OPTIONS: u8 = 0x05;
pub const OP_SUPPORTED: u8 = 0x06;
pub const OP_QUERY: u8 = 0x07;
pub const OP_RESULT: u8 = 0x08;
pub const OP_PREPARE: u8 = 0x09;
pub const OP_EXECUTE: u8 = 0x0A;
pub const OP_REGISTER: u8 = 0x0B;
pub const OP_EVENT: u8 = 0x0C;

pub const KIND_VOID: i32 = 0x0001;
pub const KIND_ROWS: i32 = 0x0002;
pub const KIND_SET_KEYSPACE: i32 = 0x0003;
pub const KIND_PREPARED: i32 = 0x0004;
pub const KIND_SCHEMA_CHANGE: i32 = 0x0005;

/// One decoded client request: just enough to script a reply.
pub struct Request {
    pub stream_id: i8,
    pub opcode: u8,
    pub body: Vec<u8>,
}

/// Read one request envelope (8-byte header, request version byte with the
/// high bit clear) off `stream`.
pub async fn read_request(stream: &mut TcpStream) -> std::io::Result<Request> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await?;
    let stream_id = header[2] as i8;
    let opcode = header[3];
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Request { stream_id, opcode, body })
}

/// Write one response envelope (version `0x81`, the v1 response byte) for
/// `stream_id`/`opcode`/`body`.
pub async fn write_response(
    stream: &mut TcpStream,
    stream_id: i8,
    opcode: u8,
    body: &[u8],
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.push(0x81);
    out.push(0x00);
    out.push(stream_id as u8);
    out.push(opcode);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    stream.write_all(&out).await
}

pub async fn write_ready(stream: &mut TcpStream, stream_id: i8) -> std::io::Result<()> {
    write_response(stream, stream_id, OP_READY, &[]).await
}

// ===== body builders =====

pub fn pack_short(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn pack_int(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn pack_string(out: &mut Vec<u8>, s: &str) {
    pack_short(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

pub fn pack_bytes(out: &mut Vec<u8>, v: Option<&[u8]>) {
    match v {
        Some(b) => {
            pack_int(out, b.len() as i32);
            out.extend_from_slice(b);
        }
        None => pack_int(out, -1),
    }
}

pub fn pack_short_bytes(out: &mut Vec<u8>, v: &[u8]) {
    pack_short(out, v.len() as u16);
    out.extend_from_slice(v);
}

/// `system.peers`' `peer` column shape: raw address bytes, no port.
pub fn pack_inet_addr(out: &mut Vec<u8>, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.push(16);
            out.extend_from_slice(&v6.octets());
        }
    }
}

pub fn void_result() -> Vec<u8> {
    let mut body = Vec::new();
    pack_int(&mut body, KIND_VOID);
    body
}

pub fn set_keyspace_result(keyspace: &str) -> Vec<u8> {
    let mut body = Vec::new();
    pack_int(&mut body, KIND_SET_KEYSPACE);
    pack_string(&mut body, keyspace);
    body
}

pub fn schema_change_result(change_type: &str, keyspace: &str, table: &str) -> Vec<u8> {
    let mut body = Vec::new();
    pack_int(&mut body, KIND_SCHEMA_CHANGE);
    pack_string(&mut body, change_type);
    pack_string(&mut body, keyspace);
    pack_string(&mut body, table);
    body
}

/// One-column-per-`rows[i]` `ROWS` result, no global table spec, all columns
/// typed `VARCHAR` (tag `0x000D`) unless otherwise noted — sufficient for the
/// `system.local`/`system.peers` style lookups the tests script.
pub fn rows_result(columns: &[(&str, u16)], rows: &[Vec<Option<Vec<u8>>>]) -> Vec<u8> {
    let mut body = Vec::new();
    pack_int(&mut body, KIND_ROWS);
    pack_int(&mut body, 0x0001); // global_tables_spec
    pack_int(&mut body, columns.len() as i32);
    pack_string(&mut body, "ks");
    pack_string(&mut body, "t");
    for (name, ty) in columns {
        pack_string(&mut body, name);
        pack_short(&mut body, *ty);
    }
    pack_int(&mut body, rows.len() as i32);
    for row in rows {
        for cell in row {
            pack_bytes(&mut body, cell.as_deref());
        }
    }
    body
}

pub fn prepared_result(id: &[u8], param_names: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    pack_int(&mut body, KIND_PREPARED);
    pack_short_bytes(&mut body, id);
    // param metadata: no global spec, param_names.len() columns, each VARCHAR
    pack_int(&mut body, 0);
    pack_int(&mut body, param_names.len() as i32);
    for name in param_names {
        pack_string(&mut body, "ks");
        pack_string(&mut body, "t");
        pack_string(&mut body, name);
        pack_short(&mut body, 0x000D); // VARCHAR
    }
    body
}

pub const TYPE_VARCHAR: u16 = 0x000D;
pub const TYPE_INT: u16 = 0x0009;
pub const TYPE_INET: u16 = 0x0010;

pub fn varchar(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}

pub fn int_val(v: i32) -> Option<Vec<u8>> {
    Some(v.to_be_bytes().to_vec())
}

pub fn inet_val(addr: IpAddr) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match addr {
        IpAddr::V4(v4) => out.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => out.extend_from_slice(&v6.octets()),
    }
    Some(out)
}

/// Read a `long_string` (`i32` length + utf8) out of a request body at `pos`,
/// returning the string and the position just past it.
pub fn read_long_string(body: &[u8], pos: usize) -> (String, usize) {
    let len = i32::from_be_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]) as usize;
    let start = pos + 4;
    (String::from_utf8(body[start..start + len].to_vec()).unwrap(), start + len)
}
