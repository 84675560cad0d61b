//! Owner of the transport connections.

use crate::error::{EngineError, Result};
use crate::transport::{Connection, Transport};
use crate::types::ConnectionStatus;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::ConnectionOptions;

/// Holds zero or more live connections.
///
/// Only [`connect`](Self::connect) adds to the held list and only
/// [`close_all`](Self::close_all) empties it. In practice one connection is
/// held at a time.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    connections: RwLock<Vec<Arc<dyn Connection>>>,
    connecting: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Clears the connecting flag however `connect` exits.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor. No connection is made until `connect`.
    pub fn new(transport: Arc<dyn Transport>, options: ConnectionOptions) -> Self {
        Self {
            transport,
            options,
            connections: RwLock::new(Vec::new()),
            connecting: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Options passed to the transport on every connect.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Establish a new connection and add it to the held list.
    ///
    /// Failures are recorded and returned; there is no immediate retry.
    pub fn connect(&self) -> Result<Arc<dyn Connection>> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Connect(
                "connection attempt already in progress".to_string(),
            ));
        }
        let _guard = ConnectingGuard(&self.connecting);

        match self.transport.connect(&self.options) {
            Ok(conn) => {
                info!(connection = %conn.id(), servers = ?self.options.servers, "connected");
                let mut held = self.connections.write();
                held.retain(|c| !c.is_closed());
                held.push(Arc::clone(&conn));
                *self.last_error.lock() = None;
                Ok(conn)
            }
            Err(err) => {
                warn!(error = %err, servers = ?self.options.servers, "connection failed");
                *self.last_error.lock() = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Close every held connection. A failing close is logged and does not
    /// stop the others.
    pub fn close_all(&self) {
        let held: Vec<Arc<dyn Connection>> = self.connections.write().drain(..).collect();
        for conn in held {
            match conn.close() {
                Ok(()) => info!(connection = %conn.id(), "connection closed"),
                Err(err) => warn!(connection = %conn.id(), error = %err, "close failed"),
            }
        }
    }

    /// Snapshot of the held connections, open or not.
    pub fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.read().clone()
    }

    /// First held connection that is still open.
    pub fn active(&self) -> Option<Arc<dyn Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| !c.is_closed())
            .cloned()
    }

    /// `Connected` if any held connection is open.
    pub fn status(&self) -> ConnectionStatus {
        if self.connecting.load(Ordering::SeqCst) {
            ConnectionStatus::Connecting
        } else if self.active().is_some() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Most recent connect failure, if the last attempt failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn supervisor(transport: &MemoryTransport) -> ConnectionSupervisor {
        ConnectionSupervisor::new(Arc::new(transport.clone()), ConnectionOptions::default())
    }

    #[test]
    fn test_connect_adds_connection() {
        let transport = MemoryTransport::new();
        let sup = supervisor(&transport);
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);

        sup.connect().unwrap();
        assert_eq!(sup.status(), ConnectionStatus::Connected);
        assert_eq!(sup.connections().len(), 1);
        assert!(sup.last_error().is_none());
    }

    #[test]
    fn test_connect_failure_is_recorded() {
        let transport = MemoryTransport::new();
        transport.refuse_connections(true);
        let sup = supervisor(&transport);

        assert!(sup.connect().is_err());
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
        assert!(sup.last_error().unwrap().contains("refused"));

        transport.refuse_connections(false);
        sup.connect().unwrap();
        assert!(sup.last_error().is_none());
    }

    #[test]
    fn test_lost_connection_reports_disconnected() {
        let transport = MemoryTransport::new();
        let sup = supervisor(&transport);
        sup.connect().unwrap();

        transport.sever_all();
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
        assert!(sup.active().is_none());

        // Reconnecting prunes the dead connection.
        sup.connect().unwrap();
        assert_eq!(sup.connections().len(), 1);
        assert_eq!(sup.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_close_all_swallows_failures() {
        let transport = MemoryTransport::new();
        let sup = supervisor(&transport);
        let conn = sup.connect().unwrap();

        // Closing an already-closed connection fails inside close_all.
        conn.close().unwrap();
        sup.close_all();
        assert!(sup.connections().is_empty());
        assert_eq!(sup.status(), ConnectionStatus::Disconnected);
    }
}
