//! Core types shared across the engine.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier for a transport connection, assigned by the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Health of the connection supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Where in a stream's history a new binding starts delivering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeliverPolicy {
    /// Replay the whole stream.
    #[default]
    All,
    /// Only the most recent message, then live.
    Last,
    /// Only messages published after the binding exists.
    New,
    /// The most recent message per subject, then live.
    LastPerSubject,
    /// Start at a stream sequence.
    ByStartSequence(u64),
    /// Start at a point in time (unix millis).
    ByStartTime(i64),
}

/// Error returned by a message handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied callback, invoked once per delivered message.
pub type MessageHandler = Arc<dyn Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Wrap a closure as a shareable [`MessageHandler`].
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A caller's declared desire for a subject to be live.
///
/// Identity is the subject string alone. Requirements are never mutated
/// after creation; changing the delivery policy of a live subject takes an
/// unsubscribe followed by a subscribe.
#[derive(Clone)]
pub struct SubscriptionRequirement {
    pub subject: String,
    pub stream: String,
    /// Push-only consumers are not supported and get rejected at subscribe.
    pub push_only: bool,
    pub deliver_policy: DeliverPolicy,
    pub handler: MessageHandler,
}

impl SubscriptionRequirement {
    /// Pull-style requirement with the default delivery policy.
    pub fn new<F>(subject: impl Into<String>, stream: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self::with_handler(subject, stream, self::handler(handler))
    }

    /// Same as [`new`](Self::new) but with an already shared handler.
    pub fn with_handler(
        subject: impl Into<String>,
        stream: impl Into<String>,
        handler: MessageHandler,
    ) -> Self {
        Self {
            subject: subject.into(),
            stream: stream.into(),
            push_only: false,
            deliver_policy: DeliverPolicy::default(),
            handler,
        }
    }

    pub fn deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    pub fn push_only(mut self, push_only: bool) -> Self {
        self.push_only = push_only;
        self
    }

    /// The transport-facing part of the requirement.
    pub fn binding_spec(&self) -> BindingSpec {
        BindingSpec {
            subject: self.subject.clone(),
            stream: self.stream.clone(),
            deliver_policy: self.deliver_policy,
        }
    }
}

impl fmt::Debug for SubscriptionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequirement")
            .field("subject", &self.subject)
            .field("stream", &self.stream)
            .field("push_only", &self.push_only)
            .field("deliver_policy", &self.deliver_policy)
            .finish_non_exhaustive()
    }
}

/// What the transport needs to create a durable pull consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingSpec {
    pub subject: String,
    pub stream: String,
    pub deliver_policy: DeliverPolicy,
}

/// Acknowledges delivered messages back to the transport.
pub trait Acknowledge: Send + Sync {
    fn ack(&self, subject: &str, sequence: u64) -> Result<()>;
}

/// A message delivered on a live binding.
pub struct Message {
    subject: String,
    stream: String,
    sequence: u64,
    payload: Vec<u8>,
    acker: Arc<dyn Acknowledge>,
}

impl Message {
    /// Built by transports when a message arrives.
    pub fn new(
        subject: impl Into<String>,
        stream: impl Into<String>,
        sequence: u64,
        payload: Vec<u8>,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            subject: subject.into(),
            stream: stream.into(),
            sequence,
            payload,
            acker,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Stream sequence assigned by the transport.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the JSON payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Only the lifecycle handler acknowledges, right after the handler returns.
    pub(crate) fn ack(&self) -> Result<()> {
        self.acker.ack(&self.subject, self.sequence)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("stream", &self.stream)
            .field("sequence", &self.sequence)
            .field("payload_size", &self.payload.len())
            .finish()
    }
}
