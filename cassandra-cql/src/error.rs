//! `cassandra-cql` error types.
//!
//! Mirrors spec.md §7: one flat [`ErrorKind`] per error family (transport,
//! protocol, server, authentication, configuration, encoding, cluster,
//! row decode), wrapped in a single public [`Error`] that captures a
//! backtrace at the point it was created.
use std::{backtrace::Backtrace, fmt, io};

use crate::row::DecodeError;

/// A specialized [`Result`] type for `cassandra-cql` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from `cassandra-cql`.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attach a human-readable context prefix (e.g. which operation failed).
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kinds from `cassandra-cql`.
pub enum ErrorKind {
    /// TCP connect failure, mid-frame EOF, or other I/O failure.
    Transport(io::Error),
    /// Malformed frame, unexpected opcode, or result-kind mismatch.
    Protocol(ProtocolError),
    /// The server replied with an `ERROR` opcode.
    Server(ServerError),
    /// Authenticator class unsupported, or required credentials missing.
    Authentication(AuthError),
    /// Required configuration missing or malformed.
    Configuration(ConfigError),
    /// A value failed its type's encoding constraints.
    Encoding(EncodingError),
    /// No primary connection is available to route a query to.
    Cluster(ClusterError),
    /// Row/column decode failure.
    Decode(DecodeError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<io::Error>e => ErrorKind::Transport(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<AuthError>e => ErrorKind::Authentication(e));
from!(<ConfigError>e => ErrorKind::Configuration(e));
from!(<EncodingError>e => ErrorKind::Encoding(e));
from!(<ClusterError>e => ErrorKind::Cluster(e));
from!(<DecodeError>e => ErrorKind::Decode(e));

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::Authentication(e) => e.fmt(f),
            Self::Configuration(e) => e.fmt(f),
            Self::Encoding(e) => e.fmt(f),
            Self::Cluster(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Malformed frame, unexpected opcode, or other wire-level violation
/// (spec.md §4.1, §7 "Protocol").
#[derive(Debug)]
pub enum ProtocolError {
    /// An `unpack_*` read past the end of the buffer — the connection that
    /// produced this frame must be torn down (spec.md §4.1).
    Truncated { needed: usize, available: usize },
    InvalidUtf8,
    InvalidLength(i32),
    InvalidInetLength(u8),
    UnexpectedOpcode { expected: &'static str, got: u8 },
    UnknownOpcode(u8),
    UnsupportedVersion(u8),
    /// The response's compression flag was set but no algorithm was
    /// negotiated at startup (spec.md §4.4).
    CompressionFlagWithoutAlgorithm,
    /// `query_rows` (or similar) was called but the `RESULT` body was not
    /// `Rows` (spec.md §7).
    ResultKindMismatch { expected: &'static str },
    Decompress(String),
}

impl std::error::Error for ProtocolError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "frame truncated: needed {needed} bytes, {available} available")
            }
            Self::InvalidUtf8 => write!(f, "invalid utf-8 in protocol string"),
            Self::InvalidLength(n) => write!(f, "invalid length prefix: {n}"),
            Self::InvalidInetLength(n) => write!(f, "invalid inet address length: {n}"),
            Self::UnexpectedOpcode { expected, got } => {
                write!(f, "unexpected opcode: expected {expected}, got {got:#04x}")
            }
            Self::UnknownOpcode(op) => write!(f, "unknown opcode: {op:#04x}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported protocol version: {v:#04x}"),
            Self::CompressionFlagWithoutAlgorithm => {
                write!(f, "response has compression flag set but no algorithm was negotiated")
            }
            Self::ResultKindMismatch { expected } => {
                write!(f, "result kind mismatch: expected {expected}")
            }
            Self::Decompress(msg) => write!(f, "decompression failed: {msg}"),
        }
    }
}

/// The server's own `ERROR` opcode body (spec.md §7 "Server").
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
}

impl std::error::Error for ServerError {}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server error {:#010x}: {}", self.code, self.message)
    }
}

/// Authentication negotiation failure (spec.md §4.4, §7 "Authentication").
#[derive(Debug)]
pub enum AuthError {
    /// The server asked for an authenticator class this client does not
    /// implement (only `PasswordAuthenticator` is supported, spec.md §4.4).
    UnsupportedAuthenticator(String),
    /// The authenticator requires credentials that the [`Config`][crate::connection::Config]
    /// did not provide.
    MissingCredentials,
}

impl std::error::Error for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedAuthenticator(class) => {
                write!(f, "unsupported authenticator class: {class}")
            }
            Self::MissingCredentials => write!(f, "server requires credentials but none were configured"),
        }
    }
}

/// Required configuration missing or malformed (spec.md §7 "Configuration").
#[derive(Debug)]
pub struct ConfigError {
    pub reason: std::borrow::Cow<'static, str>,
}

impl ConfigError {
    pub fn new(reason: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.reason)
    }
}

/// A CQL value failed to satisfy its type's wire encoding (spec.md §7 "Encoding").
#[derive(Debug)]
pub enum EncodingError {
    /// Non-ASCII bytes bound to an `ASCII` column (spec.md §3).
    NonAscii,
    /// Encoding of a type tag the codec does not recognize (spec.md §4.2).
    UnknownTypeTag(u16),
    /// A named-bind map (spec.md §4.5) reused the same parameter name twice.
    DuplicateParamName(String),
    /// A named-bind map referenced a name that is not one of the prepared
    /// statement's parameter columns.
    UnknownParamName(String),
    /// A positional bind list didn't have exactly as many values as the
    /// statement has parameters.
    ParamCountMismatch { expected: usize, got: usize },
    /// A `Value::Null` nested inside a `List`/`Set`/`Map` element: CQL v1/v2
    /// collections have no per-element null sentinel (spec.md §4.2).
    NullCollectionElement,
}

impl std::error::Error for EncodingError {}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonAscii => write!(f, "value is not valid ASCII"),
            Self::UnknownTypeTag(tag) => write!(f, "cannot encode unknown type tag {tag:#06x}"),
            Self::DuplicateParamName(name) => write!(f, "parameter name bound twice: {name}"),
            Self::UnknownParamName(name) => write!(f, "no such parameter: {name}"),
            Self::ParamCountMismatch { expected, got } => {
                write!(f, "expected {expected} positional values, got {got}")
            }
            Self::NullCollectionElement => {
                write!(f, "collection elements cannot be NULL in this protocol version")
            }
        }
    }
}

/// The coordinator could not route a request to any node (spec.md §7 "Cluster").
#[derive(Debug)]
pub enum ClusterError {
    /// Every known node is down, or not yet ready, and none can be picked
    /// (spec.md §9 — surfaced rather than aborting the process).
    NoPrimaryAvailable,
    /// The coordinator was closed via `close_now`/`close_when_idle`.
    Closed,
}

impl std::error::Error for ClusterError {}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPrimaryAvailable => write!(f, "no primary connection is available"),
            Self::Closed => write!(f, "cluster coordinator is closed"),
        }
    }
}
