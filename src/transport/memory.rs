//! In-memory transport for tests and single-process setups.
//!
//! Features:
//! - Thread-safe, cheap to clone (all clones share state)
//! - Retains published messages per stream so delivery policies replay
//! - Tracks binds, unbinds and acknowledgments
//! - Failure injection for connects, binds, unbinds and connection loss

use crate::connection::ConnectionOptions;
use crate::error::{EngineError, Result};
use crate::types::{Acknowledge, BindingSpec, ConnectionId, DeliverPolicy, Message};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{Binding, Connection, Transport};

/// A message retained on a stream.
#[derive(Clone)]
struct Stored {
    subject: String,
    sequence: u64,
    published_at: i64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Counters {
    connects: u64,
    binds: HashMap<String, u64>,
    unbinds: u64,
    acks: Vec<(String, u64)>,
}

#[derive(Default)]
struct Shared {
    next_connection: AtomicU64,
    next_binding: AtomicU64,
    next_sequence: AtomicU64,
    refuse_connect: AtomicBool,
    bind_delay: Mutex<Option<Duration>>,
    reject_bind: RwLock<HashSet<String>>,
    fail_unbind: RwLock<HashSet<String>>,
    streams: RwLock<HashMap<String, Vec<Stored>>>,
    /// Closed flags of every connection handed out.
    connections: RwLock<Vec<(ConnectionId, Arc<AtomicBool>)>>,
    bindings: RwLock<HashMap<u64, BindingEntry>>,
    counters: Mutex<Counters>,
}

/// Transport-side record of a live binding.
struct BindingEntry {
    connection: ConnectionId,
    spec: BindingSpec,
    sink: Arc<Mutex<Option<Sender<Message>>>>,
}

impl Shared {
    /// Drop every binding held on a connection, ending their delivery.
    fn release_connection(&self, connection: ConnectionId) {
        let mut bindings = self.bindings.write();
        bindings.retain(|_, b| {
            if b.connection == connection {
                b.sink.lock().take();
                false
            } else {
                true
            }
        });
    }
}

impl Acknowledge for Shared {
    fn ack(&self, subject: &str, sequence: u64) -> Result<()> {
        self.counters.lock().acks.push((subject.to_string(), sequence));
        Ok(())
    }
}

/// In-memory transport.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create an empty broker with no streams or connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message to `subject` on `stream`. Returns how many live
    /// bindings it was delivered to.
    pub fn publish(&self, stream: &str, subject: &str, payload: impl Into<Vec<u8>>) -> usize {
        let stored = Stored {
            subject: subject.to_string(),
            sequence: self.shared.next_sequence.fetch_add(1, Ordering::SeqCst) + 1,
            published_at: now_millis(),
            payload: payload.into(),
        };

        self.shared
            .streams
            .write()
            .entry(stream.to_string())
            .or_default()
            .push(stored.clone());

        let sinks: Vec<Sender<Message>> = self
            .shared
            .bindings
            .read()
            .values()
            .filter(|b| b.spec.stream == stream && b.spec.subject == subject)
            .filter_map(|b| b.sink.lock().clone())
            .collect();

        let mut delivered = 0;
        for sink in sinks {
            if sink.send(self.message(stream, &stored)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Publish a JSON payload.
    pub fn publish_json<T: serde::Serialize>(
        &self,
        stream: &str,
        subject: &str,
        value: &T,
    ) -> Result<usize> {
        let payload = serde_json::to_vec(value)?;
        Ok(self.publish(stream, subject, payload))
    }

    fn message(&self, stream: &str, stored: &Stored) -> Message {
        let acker: Arc<dyn Acknowledge> = self.shared.clone();
        Message::new(
            stored.subject.clone(),
            stream,
            stored.sequence,
            stored.payload.clone(),
            acker,
        )
    }

    /// Messages a new binding receives before going live.
    fn replay(&self, spec: &BindingSpec) -> Vec<Message> {
        let streams = self.shared.streams.read();
        let Some(stored) = streams.get(&spec.stream) else {
            return Vec::new();
        };
        let matching = stored.iter().filter(|m| m.subject == spec.subject);

        let selected: Vec<&Stored> = match spec.deliver_policy {
            DeliverPolicy::All => matching.collect(),
            DeliverPolicy::New => Vec::new(),
            DeliverPolicy::Last | DeliverPolicy::LastPerSubject => {
                matching.last().into_iter().collect()
            }
            DeliverPolicy::ByStartSequence(seq) => matching.filter(|m| m.sequence >= seq).collect(),
            DeliverPolicy::ByStartTime(millis) => {
                matching.filter(|m| m.published_at >= millis).collect()
            }
        };

        selected
            .into_iter()
            .map(|m| self.message(&spec.stream, m))
            .collect()
    }

    // --- Failure injection ---

    /// Make every subsequent `connect` fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Reject binds for a subject until [`allow_binds`](Self::allow_binds).
    pub fn reject_binds(&self, subject: &str) {
        self.shared.reject_bind.write().insert(subject.to_string());
    }

    /// Undo [`reject_binds`](Self::reject_binds).
    pub fn allow_binds(&self, subject: &str) {
        self.shared.reject_bind.write().remove(subject);
    }

    /// Fail unbinds for a subject until [`allow_unbinds`](Self::allow_unbinds).
    pub fn fail_unbinds(&self, subject: &str) {
        self.shared.fail_unbind.write().insert(subject.to_string());
    }

    /// Undo [`fail_unbinds`](Self::fail_unbinds).
    pub fn allow_unbinds(&self, subject: &str) {
        self.shared.fail_unbind.write().remove(subject);
    }

    /// Sleep inside every bind call, to widen race windows in tests.
    pub fn set_bind_delay(&self, delay: Option<Duration>) {
        *self.shared.bind_delay.lock() = delay;
    }

    /// Simulate losing every connection.
    pub fn sever_all(&self) {
        let connections = self.shared.connections.read().clone();
        for (id, closed) in connections {
            closed.store(true, Ordering::SeqCst);
            self.shared.release_connection(id);
        }
    }

    // --- Inspection ---

    /// Successful connects so far.
    pub fn connect_count(&self) -> u64 {
        self.shared.counters.lock().connects
    }

    /// Total successful binds ever made for a subject.
    pub fn bind_count(&self, subject: &str) -> u64 {
        self.shared
            .counters
            .lock()
            .binds
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Successful unbinds so far, across subjects.
    pub fn unbind_count(&self) -> u64 {
        self.shared.counters.lock().unbinds
    }

    /// Subjects with a live binding, sorted. Duplicates are kept.
    pub fn active_bindings(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .shared
            .bindings
            .read()
            .values()
            .map(|b| b.spec.subject.clone())
            .collect();
        subjects.sort();
        subjects
    }

    /// Acknowledged (subject, sequence) pairs in ack order.
    pub fn acks(&self) -> Vec<(String, u64)> {
        self.shared.counters.lock().acks.clone()
    }

    /// Number of acknowledged messages.
    pub fn ack_count(&self) -> usize {
        self.shared.counters.lock().acks.len()
    }

    /// Connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.shared
            .connections
            .read()
            .iter()
            .filter(|(_, closed)| !closed.load(Ordering::SeqCst))
            .count()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>> {
        if self.shared.refuse_connect.load(Ordering::SeqCst) {
            return Err(EngineError::Connect(format!(
                "connection refused by {}",
                options.servers.join(",")
            )));
        }
        if options.servers.is_empty() {
            return Err(EngineError::Connect("no servers configured".to_string()));
        }

        let id = ConnectionId(self.shared.next_connection.fetch_add(1, Ordering::SeqCst) + 1);
        let closed = Arc::new(AtomicBool::new(false));
        self.shared
            .connections
            .write()
            .push((id, Arc::clone(&closed)));
        self.shared.counters.lock().connects += 1;

        Ok(Arc::new(MemoryConnection {
            id,
            closed,
            transport: self.clone(),
        }))
    }
}

/// A connection handed out by [`MemoryTransport`].
pub struct MemoryConnection {
    id: ConnectionId,
    closed: Arc<AtomicBool>,
    transport: MemoryTransport,
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn bind(&self, spec: &BindingSpec, sink: Sender<Message>) -> Result<Arc<dyn Binding>> {
        let shared = &self.transport.shared;

        let delay = *shared.bind_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self.is_closed() {
            return Err(EngineError::NotConnected);
        }
        if shared.reject_bind.read().contains(&spec.subject) {
            return Err(EngineError::BindingRejected {
                subject: spec.subject.clone(),
                stream: spec.stream.clone(),
                reason: "consumer rejected by server".to_string(),
            });
        }

        for message in self.transport.replay(spec) {
            if sink.send(message).is_err() {
                break;
            }
        }

        let id = shared.next_binding.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = Arc::new(Mutex::new(Some(sink)));
        shared.bindings.write().insert(
            id,
            BindingEntry {
                connection: self.id,
                spec: spec.clone(),
                sink: Arc::clone(&sink),
            },
        );
        *shared
            .counters
            .lock()
            .binds
            .entry(spec.subject.clone())
            .or_default() += 1;

        Ok(Arc::new(MemoryBinding {
            id,
            subject: spec.subject.clone(),
            sink,
            shared: Arc::clone(shared),
        }))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Close(format!("connection {} already closed", self.id)));
        }
        self.transport.shared.release_connection(self.id);
        Ok(())
    }
}

struct MemoryBinding {
    id: u64,
    subject: String,
    sink: Arc<Mutex<Option<Sender<Message>>>>,
    shared: Arc<Shared>,
}

impl Binding for MemoryBinding {
    fn unbind(&self) -> Result<()> {
        if self.shared.fail_unbind.read().contains(&self.subject) {
            return Err(EngineError::Teardown {
                subject: self.subject.clone(),
                reason: "consumer delete timed out".to_string(),
            });
        }

        self.sink.lock().take();
        self.shared.bindings.write().remove(&self.id);
        self.shared.counters.lock().unbinds += 1;
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
