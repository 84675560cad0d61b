//! Fixed-interval connection health probe.

use crate::reconciler::ReconcileTrigger;
use crate::types::ConnectionStatus;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use super::ConnectionSupervisor;

/// Background loop that reconnects when disconnected and re-triggers
/// reconciliation on every tick, so failed bindings are eventually retried
/// even when nothing else calls subscribe or unsubscribe.
pub struct HealthProbe {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl HealthProbe {
    pub fn spawn(
        interval: Duration,
        supervisor: Arc<ConnectionSupervisor>,
        trigger: ReconcileTrigger,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("health-probe".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => probe_once(&supervisor, &trigger),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Stop the probe thread and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for HealthProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One probe tick.
pub(crate) fn probe_once(supervisor: &ConnectionSupervisor, trigger: &ReconcileTrigger) {
    match supervisor.status() {
        ConnectionStatus::Connecting => {
            debug!("connection attempt in progress, probe idle");
            return;
        }
        ConnectionStatus::Disconnected => {
            if let Err(err) = supervisor.connect() {
                debug!(error = %err, "reconnect attempt failed");
            }
        }
        ConnectionStatus::Connected => {}
    }
    trigger.request();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::reconciler::{ReconcileScheduler, Reconciler};
    use crate::subscriptions::{LifecycleHandler, RequirementRegistry};
    use crate::transport::MemoryTransport;
    use std::time::Instant;

    fn setup(transport: &MemoryTransport) -> (Arc<ConnectionSupervisor>, ReconcileScheduler) {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(transport.clone()),
            ConnectionOptions::default(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(RequirementRegistry::new()),
            Arc::clone(&supervisor),
            Arc::new(LifecycleHandler::new(16)),
            2,
        ));
        let scheduler = ReconcileScheduler::spawn(reconciler, Duration::from_millis(5)).unwrap();
        (supervisor, scheduler)
    }

    #[test]
    fn test_probe_once_reconnects() {
        let transport = MemoryTransport::new();
        let (supervisor, scheduler) = setup(&transport);

        probe_once(&supervisor, &scheduler.trigger());
        assert_eq!(supervisor.status(), ConnectionStatus::Connected);

        // Already connected: no new connection.
        probe_once(&supervisor, &scheduler.trigger());
        assert_eq!(transport.connect_count(), 1);
    }

    #[test]
    fn test_probe_loop_recovers_from_outage() {
        let transport = MemoryTransport::new();
        transport.refuse_connections(true);
        let (supervisor, scheduler) = setup(&transport);
        let mut probe = HealthProbe::spawn(
            Duration::from_millis(10),
            Arc::clone(&supervisor),
            scheduler.trigger(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(supervisor.status(), ConnectionStatus::Disconnected);
        assert!(supervisor.last_error().is_some());

        transport.refuse_connections(false);
        let deadline = Instant::now() + Duration::from_secs(2);
        while supervisor.status() != ConnectionStatus::Connected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(supervisor.status(), ConnectionStatus::Connected);

        probe.stop();
    }
}
