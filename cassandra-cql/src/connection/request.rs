//! `QUERY`/`EXECUTE`/`PREPARE` request body construction (spec.md §4.4, §6).
//!
//! v1 carries no bind values in `QUERY` (only `EXECUTE` binds parameters) and
//! no flags byte at all; v2 adds an optional values section plus a flags byte
//! to both messages, shared here as [`pack_v2_tail`].
use bytes::Bytes;

use crate::consistency::Consistency;
use crate::frame::Frame;
use crate::protocol::ProtocolVersion;

const FLAG_VALUES: u8 = 0x01;
const FLAG_SKIP_METADATA: u8 = 0x02;
const FLAG_PAGE_SIZE: u8 = 0x04;
const FLAG_WITH_PAGING_STATE: u8 = 0x08;
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;

/// Per-call options accepted by `query`/`execute` (spec.md §6). Every field
/// here is a v2 extension — v1 connections silently ignore them.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<Consistency>,
}

pub fn query_body(
    version: ProtocolVersion,
    cql: &str,
    consistency: Consistency,
    opts: &QueryOptions,
) -> Bytes {
    let mut f = Frame::new();
    f.pack_long_string(cql);
    f.pack_short(consistency.as_u16());
    if version == ProtocolVersion::V2 {
        pack_v2_tail(&mut f, &[], opts);
    }
    f.into_bytes()
}

pub fn execute_body(
    version: ProtocolVersion,
    id: &[u8],
    consistency: Consistency,
    values: &[Option<Vec<u8>>],
    opts: &QueryOptions,
) -> Bytes {
    let mut f = Frame::new();
    f.pack_short_bytes(id);
    match version {
        ProtocolVersion::V1 => {
            f.pack_short(values.len() as u16);
            for v in values {
                f.pack_bytes(v.as_deref());
            }
            f.pack_short(consistency.as_u16());
        }
        ProtocolVersion::V2 => {
            f.pack_short(consistency.as_u16());
            pack_v2_tail(&mut f, values, opts);
        }
    }
    f.into_bytes()
}

pub fn prepare_body(cql: &str) -> Bytes {
    let mut f = Frame::new();
    f.pack_long_string(cql);
    f.into_bytes()
}

/// `[flags:u8][n:short][value]*n][page_size:int]?[paging_state:bytes]?[serial_consistency:short]?`
/// — the v2 tail shared by `QUERY` and `EXECUTE` after their `consistency` field.
fn pack_v2_tail(f: &mut Frame, values: &[Option<Vec<u8>>], opts: &QueryOptions) {
    let mut flags = 0u8;
    if !values.is_empty() {
        flags |= FLAG_VALUES;
    }
    if opts.skip_metadata {
        flags |= FLAG_SKIP_METADATA;
    }
    if opts.page_size.is_some() {
        flags |= FLAG_PAGE_SIZE;
    }
    if opts.paging_state.is_some() {
        flags |= FLAG_WITH_PAGING_STATE;
    }
    if opts.serial_consistency.is_some() {
        flags |= FLAG_WITH_SERIAL_CONSISTENCY;
    }
    f.pack_byte(flags);

    if !values.is_empty() {
        f.pack_short(values.len() as u16);
        for v in values {
            f.pack_bytes(v.as_deref());
        }
    }
    if let Some(page_size) = opts.page_size {
        f.pack_int(page_size);
    }
    if let Some(paging_state) = &opts.paging_state {
        f.pack_bytes(Some(paging_state));
    }
    if let Some(sc) = opts.serial_consistency {
        f.pack_short(sc.as_u16());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_query_body_matches_scenario_bytes() {
        // spec.md §8 scenario 2: `USE test;` at consistency ANY.
        let body = query_body(ProtocolVersion::V1, "USE test;", Consistency::Any, &QueryOptions::default());
        let mut expected = Vec::new();
        expected.extend_from_slice(&9i32.to_be_bytes());
        expected.extend_from_slice(b"USE test;");
        expected.extend_from_slice(&0u16.to_be_bytes());
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn v1_execute_body_has_no_flags_byte() {
        let body = execute_body(
            ProtocolVersion::V1,
            b"abc",
            Consistency::One,
            &[Some(b"val".to_vec())],
            &QueryOptions::default(),
        );
        let mut expected = Vec::new();
        expected.extend_from_slice(&3u16.to_be_bytes());
        expected.extend_from_slice(b"abc");
        expected.extend_from_slice(&1u16.to_be_bytes());
        expected.extend_from_slice(&3i32.to_be_bytes());
        expected.extend_from_slice(b"val");
        expected.extend_from_slice(&1u16.to_be_bytes());
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn v2_query_body_sets_values_flag_only_when_bound() {
        let body = query_body(ProtocolVersion::V2, "SELECT 1", Consistency::One, &QueryOptions::default());
        // long_string(8) + short(consistency) + flags byte == 0 (no values/page/paging/serial)
        let flags_byte = body[4 + 8 + 2];
        assert_eq!(flags_byte, 0);
    }
}
