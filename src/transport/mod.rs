//! Transport seam.
//!
//! The engine never speaks a wire protocol itself. A transport hands out
//! connections, a connection creates durable pull consumers ("bindings"),
//! and each binding pushes delivered messages into a channel owned by the
//! lifecycle handler. Dropping the sender side ends delivery.
//!
//! [`MemoryTransport`] is an in-process implementation used by the tests
//! and useful for embedding.

mod memory;

pub use memory::{MemoryConnection, MemoryTransport};

use crate::connection::ConnectionOptions;
use crate::error::Result;
use crate::types::{BindingSpec, ConnectionId, Message};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Establishes connections.
pub trait Transport: Send + Sync {
    fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>>;
}

/// One live transport connection.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// True once the connection was closed locally or lost.
    fn is_closed(&self) -> bool;

    /// Create a consumer binding; delivered messages go to `sink`.
    fn bind(&self, spec: &BindingSpec, sink: Sender<Message>) -> Result<Arc<dyn Binding>>;

    fn close(&self) -> Result<()>;
}

/// A live consumer binding.
pub trait Binding: Send + Sync {
    /// Tear the binding down. On success the transport must release its sink.
    fn unbind(&self) -> Result<()>;
}
