//! Server-pushed events delivered on stream id `0xFF` (spec.md §4.4 "Events").
use std::net::IpAddr;

/// One decoded `EVENT` push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TopologyChange { change: String, node: IpAddr },
    StatusChange { status: String, node: IpAddr },
    SchemaChange { change: String, keyspace: String, table: String },
}

impl Event {
    pub(super) fn from_frame(frame: &mut crate::frame::Frame) -> Result<Self, crate::error::ProtocolError> {
        let name = frame.unpack_string()?;
        Ok(match name.as_str() {
            "TOPOLOGY_CHANGE" => Self::TopologyChange {
                change: frame.unpack_string()?,
                node: frame.unpack_inet()?.ip(),
            },
            "STATUS_CHANGE" => Self::StatusChange {
                status: frame.unpack_string()?,
                node: frame.unpack_inet()?.ip(),
            },
            "SCHEMA_CHANGE" => Self::SchemaChange {
                change: frame.unpack_string()?,
                keyspace: frame.unpack_string()?,
                table: frame.unpack_string()?,
            },
            _ => {
                #[cfg(feature = "verbose")]
                tracing::warn!(event = name.as_str(), "unrecognized event name");
                return Err(crate::error::ProtocolError::UnexpectedOpcode {
                    expected: "TOPOLOGY_CHANGE|STATUS_CHANGE|SCHEMA_CHANGE",
                    got: 0,
                });
            }
        })
    }
}

/// Event type names accepted by `REGISTER` (spec.md §4.6).
pub const EVENT_TOPOLOGY_CHANGE: &str = "TOPOLOGY_CHANGE";
pub const EVENT_STATUS_CHANGE: &str = "STATUS_CHANGE";
pub const EVENT_SCHEMA_CHANGE: &str = "SCHEMA_CHANGE";
