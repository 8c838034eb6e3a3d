//! Single TCP connection to one Cassandra node (spec.md §4.4).
//!
//! Unlike a strictly sequential wire protocol, CQL multiplexes up to 127
//! requests over one socket via stream ids. Rather than a hand-rolled
//! `Poll`-chained transport, this connection runs its socket I/O on a
//! dedicated background task and correlates replies with
//! [`tokio::sync::oneshot`] channels — the same mpsc/oneshot shape the
//! pool's worker task uses for acquire/release, generalized from "one
//! pending acquire" to "up to 127 pending requests".
mod config;
mod event;
mod request;

pub use config::Config;
pub use event::Event;
pub use request::QueryOptions;

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{broadcast, oneshot},
};

use crate::{
    common::{span, verbose},
    consistency::Consistency,
    error::{AuthError, Error, ProtocolError, Result, ServerError},
    frame::Frame,
    protocol::{Compression, Envelope, Opcode, ProtocolVersion, STREAM_ID_EVENT},
    result::QueryResult,
};

const MIN_STREAM_ID: i8 = 1;
const MAX_STREAM_ID: i8 = 127;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A request waiting for a free stream id.
struct PendingRequest {
    opcode: Opcode,
    body: Bytes,
    reply: oneshot::Sender<Result<(Opcode, Bytes)>>,
}

struct StreamTable {
    free_ids: Vec<i8>,
    waiting: HashMap<i8, oneshot::Sender<Result<(Opcode, Bytes)>>>,
    pending: VecDeque<PendingRequest>,
    closed: bool,
}

impl StreamTable {
    fn new() -> Self {
        Self {
            free_ids: (MIN_STREAM_ID..=MAX_STREAM_ID).rev().collect(),
            waiting: HashMap::new(),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    fn in_flight(&self) -> usize {
        self.waiting.len() + self.pending.len()
    }
}

struct Shared {
    write: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Mutex<StreamTable>,
    version: ProtocolVersion,
    compression: Mutex<Option<Compression>>,
    events: broadcast::Sender<Event>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    closed: AtomicBool,
    idle_notify: tokio::sync::Notify,
    closed_notify: tokio::sync::Notify,
}

/// A single connection to one node.
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

impl Connection {
    /// Open a TCP connection and start the background reader task. Does not
    /// perform the CQL startup handshake — call [`Connection::startup`] next.
    pub async fn connect(addr: SocketAddr, version: ProtocolVersion) -> Result<Self> {
        span!("cassandra_cql::connect", %addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read, write) = stream.into_split();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            write: tokio::sync::Mutex::new(write),
            state: Mutex::new(StreamTable::new()),
            version,
            compression: Mutex::new(None),
            events,
            peer_addr,
            local_addr,
            closed: AtomicBool::new(false),
            idle_notify: tokio::sync::Notify::new(),
            closed_notify: tokio::sync::Notify::new(),
        });

        tokio::spawn(reader_loop(shared.clone(), read));

        Ok(Self(shared))
    }

    /// The socket address of the remote node.
    pub fn peer_addr(&self) -> SocketAddr {
        self.0.peer_addr
    }

    /// This end's local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Resolve once this connection has gone down, by any cause (remote
    /// close, write failure, or a local graceful/abrupt close). The cluster
    /// coordinator spawns one watcher per primary connection awaiting this
    /// to drive failover (spec.md §4.6).
    pub async fn closed(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            self.0.closed_notify.notified().await;
        }
    }

    /// Run a plain (unprepared) `QUERY` (spec.md §4.5, §6).
    pub async fn query(
        &self,
        cql: &str,
        consistency: Consistency,
        opts: &QueryOptions,
    ) -> Result<QueryResult> {
        let body = request::query_body(self.0.version, cql, consistency, opts);
        let (opcode, resp) = self.send_message(Opcode::Query, body).await?;
        self.decode_result(opcode, resp)
    }

    /// Send `PREPARE` for `cql` and return the raw `RESULT::Prepared` payload
    /// (spec.md §4.5). Callers build a [`crate::statement::PreparedStatement`]
    /// from it.
    pub async fn prepare(&self, cql: &str) -> Result<crate::result::PreparedResult> {
        let body = request::prepare_body(cql);
        let (opcode, resp) = self.send_message(Opcode::Prepare, body).await?;
        match self.decode_result(opcode, resp)? {
            QueryResult::Prepared(p) => Ok(p),
            _ => Err(ProtocolError::ResultKindMismatch { expected: "PREPARED" }.into()),
        }
    }

    /// Run a previously prepared statement by id with bound, already-encoded
    /// parameter values (spec.md §4.5, §6).
    pub async fn execute_prepared(
        &self,
        id: &[u8],
        consistency: Consistency,
        values: &[Option<Vec<u8>>],
        opts: &QueryOptions,
    ) -> Result<QueryResult> {
        let body = request::execute_body(self.0.version, id, consistency, values, opts);
        let (opcode, resp) = self.send_message(Opcode::Execute, body).await?;
        self.decode_result(opcode, resp)
    }

    /// `OPTIONS` / `SUPPORTED` round-trip, with no caching of the result
    /// (spec.md §4.4 "Options").
    pub async fn options(&self) -> Result<Vec<(String, Vec<String>)>> {
        let (opcode, resp) = self.send_message(Opcode::Options, Bytes::new()).await?;
        if opcode != Opcode::Supported {
            return Err(ProtocolError::UnexpectedOpcode { expected: "SUPPORTED", got: opcode.as_u8() }.into());
        }
        let mut f = Frame::from(resp);
        Ok(f.unpack_string_multimap()?)
    }

    fn decode_result(&self, opcode: Opcode, body: Bytes) -> Result<QueryResult> {
        if opcode != Opcode::Result {
            return Err(ProtocolError::UnexpectedOpcode { expected: "RESULT", got: opcode.as_u8() }.into());
        }
        let mut f = Frame::from(body);
        Ok(QueryResult::from_frame(&mut f)?)
    }

    /// Negotiate compression, send `STARTUP`, and handle `AUTHENTICATE` if
    /// the server asks for it (spec.md §4.4).
    pub async fn startup(&self, config: &Config) -> Result<()> {
        let compression = Compression::for_protocol_version(self.0.version);

        let mut body = Frame::new();
        let options = vec![
            ("CQL_VERSION".to_string(), "3.0.5".to_string()),
            ("COMPRESSION".to_string(), compression.name().to_string()),
        ];
        body.pack_string_map(&options);

        let (opcode, resp) = self.send_message(Opcode::Startup, body.into_bytes()).await?;
        *self.0.compression.lock().unwrap() = Some(compression);

        match opcode {
            Opcode::Ready => {}
            Opcode::Authenticate => {
                let mut f = Frame::from(resp);
                let class = f.unpack_string()?;
                if class != "org.apache.cassandra.auth.PasswordAuthenticator" {
                    return Err(AuthError::UnsupportedAuthenticator(class).into());
                }
                let (username, password) = config
                    .credentials()
                    .ok_or(AuthError::MissingCredentials)?;
                let mut creds = Frame::new();
                creds.pack_string_map(&[
                    ("username".to_string(), username.to_string()),
                    ("password".to_string(), password.to_string()),
                ]);
                let (opcode, _) = self.send_message(Opcode::Credentials, creds.into_bytes()).await?;
                if opcode != Opcode::Ready {
                    return Err(ProtocolError::UnexpectedOpcode { expected: "READY", got: opcode.as_u8() }.into());
                }
            }
            other => {
                return Err(ProtocolError::UnexpectedOpcode { expected: "READY|AUTHENTICATE", got: other.as_u8() }.into());
            }
        }

        if let Some(keyspace) = config.keyspace() {
            let mut q = Frame::new();
            q.pack_long_string(&format!("USE {keyspace}"));
            q.pack_short(crate::consistency::Consistency::Any.as_u16());
            let (opcode, body) = self.send_message(Opcode::Query, q.into_bytes()).await?;
            if opcode != Opcode::Result {
                return Err(ProtocolError::UnexpectedOpcode { expected: "RESULT", got: opcode.as_u8() }.into());
            }
            let mut f = Frame::from(body);
            match crate::result::QueryResult::from_frame(&mut f)? {
                crate::result::QueryResult::SetKeyspace(_) => {}
                other => {
                    verbose!(?other, "unexpected result decoding USE keyspace response");
                }
            }
        }

        Ok(())
    }

    /// Register for server-pushed events and return a receiver for them
    /// (spec.md §4.6).
    pub async fn register(&self, event_types: &[&str]) -> Result<broadcast::Receiver<Event>> {
        let mut body = Frame::new();
        body.pack_string_list(event_types);
        let (opcode, _) = self.send_message(Opcode::Register, body.into_bytes()).await?;
        if opcode != Opcode::Ready {
            return Err(ProtocolError::UnexpectedOpcode { expected: "READY", got: opcode.as_u8() }.into());
        }
        Ok(self.0.events.subscribe())
    }

    /// Send one request body under the given opcode and await its matching
    /// reply, handling stream-id allocation/queuing transparently.
    pub async fn send_message(&self, opcode: Opcode, body: Bytes) -> Result<(Opcode, Bytes)> {
        let (tx, rx) = oneshot::channel();

        let assigned = {
            let mut state = self.0.state.lock().unwrap();
            if state.closed {
                return Err(crate::error::ClusterError::Closed.into());
            }
            match state.free_ids.pop() {
                Some(id) => {
                    state.waiting.insert(id, tx);
                    Some(id)
                }
                None => {
                    state.pending.push_back(PendingRequest { opcode, body: body.clone(), reply: tx });
                    None
                }
            }
        };

        if let Some(id) = assigned {
            self.write_envelope(id, opcode, body).await?;
        }

        match rx.await {
            Ok(result) => {
                let (opcode, body) = result?;
                if opcode == Opcode::Error {
                    return Err(parse_server_error(body)?);
                }
                Ok((opcode, body))
            }
            Err(_) => Err(connection_closed_error()),
        }
    }

    async fn write_envelope(&self, id: i8, opcode: Opcode, body: Bytes) -> Result<()> {
        let compression = *self.0.compression.lock().unwrap();
        let (flags, body) = match compression {
            Some(algo) => {
                let compressed = algo.compress(&body)?;
                if compressed.len() < body.len() {
                    (crate::protocol::FLAG_COMPRESSION, Bytes::from(compressed))
                } else {
                    (0, body)
                }
            }
            None => (0, body),
        };

        let env = Envelope { version: self.0.version, flags, stream_id: id, opcode, body };
        let mut out = BytesMut::new();
        env.encode(&mut out);

        let mut write = self.0.write.lock().await;
        if let Err(e) = write.write_all(&out).await {
            drop(write);
            self.fail_all(Error::from(e));
            return Err(connection_closed_error());
        }
        Ok(())
    }

    /// Release `id` back to the pool, handing it straight to the oldest
    /// pending request if one is waiting (spec.md §4.4 "Stream-id allocation").
    async fn release_id(&self, id: i8) {
        let next = {
            let mut state = self.0.state.lock().unwrap();
            state.pending.pop_front()
        };

        match next {
            Some(req) => {
                {
                    let mut state = self.0.state.lock().unwrap();
                    state.waiting.insert(id, req.reply);
                }
                if let Err(e) = self.write_envelope(id, req.opcode, req.body).await {
                    verbose!(error = %e, "failed writing promoted pending request");
                }
            }
            None => {
                let mut state = self.0.state.lock().unwrap();
                state.free_ids.push(id);
                if state.in_flight() == 0 {
                    drop(state);
                    self.0.idle_notify.notify_waiters();
                }
            }
        }
    }

    /// Fail every in-flight and queued request with one uniform error
    /// (spec.md §4.4 "Close", §7). `cause` is logged but not surfaced to
    /// callers — they all see the same "connection closed" error.
    fn fail_all(&self, cause: Error) {
        verbose!(error = %cause, "connection closing, failing all pending requests");
        self.0.closed.store(true, Ordering::Release);
        let mut state = self.0.state.lock().unwrap();
        state.closed = true;
        for (_, tx) in state.waiting.drain() {
            let _ = tx.send(Err(connection_closed_error()));
        }
        for req in state.pending.drain(..) {
            let _ = req.reply.send(Err(connection_closed_error()));
        }
        drop(state);
        self.0.idle_notify.notify_waiters();
        self.0.closed_notify.notify_waiters();
    }

    /// Abrupt close: fail everything immediately and shut the socket down.
    pub fn close_now(&self) {
        self.fail_all(crate::error::ClusterError::Closed.into());
        let shared = self.0.clone();
        tokio::spawn(async move {
            let mut write = shared.write.lock().await;
            let _ = write.shutdown().await;
        });
    }

    /// Graceful close: stop admitting... new requests would require a
    /// separate "draining" flag; here we mark closed for future requests
    /// immediately, and wait for outstanding ones to finish before closing
    /// the socket (spec.md §4.6 "Graceful shutdown").
    pub async fn close_when_idle(&self) {
        {
            let mut state = self.0.state.lock().unwrap();
            state.closed = true;
        }

        loop {
            let idle = {
                let state = self.0.state.lock().unwrap();
                state.in_flight() == 0
            };
            if idle {
                break;
            }
            self.0.idle_notify.notified().await;
        }

        self.0.closed.store(true, Ordering::Release);
        let mut write = self.0.write.lock().await;
        let _ = write.shutdown().await;
        drop(write);
        self.0.closed_notify.notify_waiters();
    }
}

fn connection_closed_error() -> Error {
    crate::error::ClusterError::Closed.into()
}

fn parse_server_error(body: Bytes) -> Result<Error> {
    let mut f = Frame::from(body);
    let code = f.unpack_int()?;
    let message = f.unpack_string()?;
    Ok(Error::from(ServerError { code, message }))
}

async fn reader_loop(shared: Arc<Shared>, mut read: OwnedReadHalf) {
    loop {
        let mut header = [0u8; Envelope::HEADER_LEN];
        if let Err(e) = read.read_exact(&mut header).await {
            shutdown_with_error(&shared, e);
            return;
        }

        let length = Envelope::peek_body_len(&header);
        let mut body = vec![0u8; length];
        if let Err(e) = read.read_exact(&mut body).await {
            shutdown_with_error(&shared, e);
            return;
        }

        let mut full = BytesMut::with_capacity(header.len() + body.len());
        full.extend_from_slice(&header);
        full.extend_from_slice(&body);

        let mut envelope = match Envelope::decode(full.freeze()) {
            Ok(env) => env,
            Err(e) => {
                shutdown_with_error(&shared, e);
                return;
            }
        };

        envelope.take_tracing_id();

        if envelope.is_compressed() {
            let compression = *shared.compression.lock().unwrap();
            match compression {
                Some(algo) => match algo.decompress(&envelope.body) {
                    Ok(decompressed) => envelope.body = Bytes::from(decompressed),
                    Err(e) => {
                        shutdown_with_error(&shared, e);
                        return;
                    }
                },
                None => {
                    shutdown_with_error(&shared, ProtocolError::CompressionFlagWithoutAlgorithm);
                    return;
                }
            }
        }

        if envelope.stream_id == STREAM_ID_EVENT && envelope.opcode == Opcode::Event {
            let mut f = Frame::from(envelope.body);
            match event::Event::from_frame(&mut f) {
                Ok(event) => {
                    let _ = shared.events.send(event);
                }
                Err(e) => verbose!(error = %e, "failed to decode EVENT frame"),
            }
            continue;
        }

        let waiter = {
            let mut state = shared.state.lock().unwrap();
            state.waiting.remove(&envelope.stream_id)
        };

        let conn = Connection(shared.clone());
        if let Some(tx) = waiter {
            let _ = tx.send(Ok((envelope.opcode, envelope.body)));
            conn.release_id(envelope.stream_id).await;
        } else {
            verbose!(stream_id = %envelope.stream_id, "reply for unknown stream id, dropping");
        }
    }
}

fn shutdown_with_error(shared: &Arc<Shared>, cause: impl Into<Error>) {
    Connection(shared.clone()).fail_all(cause.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_table_starts_with_127_free_ids() {
        let table = StreamTable::new();
        assert_eq!(table.free_ids.len(), 127);
        assert!(table.free_ids.contains(&1));
        assert!(table.free_ids.contains(&127));
        assert_eq!(table.in_flight(), 0);
    }
}
