//! Debounced reconcile scheduling.
//!
//! Every trigger enqueues a signal. A single scheduler thread waits for the
//! first signal, then keeps restarting a quiet-period timer while more
//! signals arrive, and runs one pass once the queue has been quiet for the
//! whole debounce window. A burst of subscribe/unsubscribe calls therefore
//! costs one pass.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

use super::Reconciler;

enum Signal {
    Reconcile,
    Stop,
}

#[derive(Default)]
struct SchedulerState {
    /// A request has been made that no pass has picked up yet.
    pending: bool,
    /// A scheduled pass is executing.
    running: bool,
    stopped: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    idle: Condvar,
}

/// Cheap, cloneable handle for requesting a debounced pass.
#[derive(Clone)]
pub struct ReconcileTrigger {
    signals: Sender<Signal>,
    shared: Arc<Shared>,
}

impl ReconcileTrigger {
    /// Request a pass. Returns false once the scheduler has stopped.
    pub fn request(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return false;
        }
        // Sent under the lock so `pending` never lags the queue.
        state.pending = true;
        self.signals.send(Signal::Reconcile).is_ok()
    }

    /// Wait until no request is pending and no scheduled pass is running.
    /// Returns false on timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.pending || state.running {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !(state.pending || state.running);
            }
        }
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }
}

/// Owns the scheduler thread.
pub struct ReconcileScheduler {
    trigger: ReconcileTrigger,
    worker: Option<JoinHandle<()>>,
}

impl ReconcileScheduler {
    pub fn spawn(reconciler: Arc<Reconciler>, debounce: Duration) -> std::io::Result<Self> {
        let (signals, queue) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::default()),
            idle: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("reconcile-scheduler".to_string())
            .spawn(move || run(queue, debounce, reconciler, worker_shared))?;

        Ok(Self {
            trigger: ReconcileTrigger { signals, shared },
            worker: Some(worker),
        })
    }

    /// Handle for requesting passes from other components.
    pub fn trigger(&self) -> ReconcileTrigger {
        self.trigger.clone()
    }

    /// Stop the thread, dropping any pass not yet started.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.trigger.shared.state.lock();
            state.stopped = true;
            let _ = self.trigger.signals.send(Signal::Stop);
        }
        let _ = worker.join();
    }
}

impl Drop for ReconcileScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(queue: Receiver<Signal>, debounce: Duration, reconciler: Arc<Reconciler>, shared: Arc<Shared>) {
    'outer: while let Ok(signal) = queue.recv() {
        if matches!(signal, Signal::Stop) {
            break;
        }

        loop {
            match queue.recv_timeout(debounce) {
                Ok(Signal::Reconcile) => continue,
                Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break 'outer,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        {
            let mut state = shared.state.lock();
            // This pass covers every request made so far.
            while let Ok(signal) = queue.try_recv() {
                if matches!(signal, Signal::Stop) {
                    break 'outer;
                }
            }
            state.pending = false;
            state.running = true;
        }

        if reconciler.reconcile().is_none() {
            debug!("scheduled reconcile skipped, pass already running");
        }

        shared.state.lock().running = false;
        shared.idle.notify_all();
    }

    let mut state = shared.state.lock();
    state.stopped = true;
    state.pending = false;
    state.running = false;
    shared.idle.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionOptions, ConnectionSupervisor};
    use crate::subscriptions::{LifecycleHandler, RequirementRegistry};
    use crate::transport::MemoryTransport;
    use crate::types::SubscriptionRequirement;

    fn reconciler(transport: &MemoryTransport, registry: &Arc<RequirementRegistry>) -> Arc<Reconciler> {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(transport.clone()),
            ConnectionOptions::default(),
        ));
        supervisor.connect().unwrap();
        Arc::new(Reconciler::new(
            Arc::clone(registry),
            supervisor,
            Arc::new(LifecycleHandler::new(16)),
            2,
        ))
    }

    #[test]
    fn test_burst_collapses_into_one_pass() {
        let transport = MemoryTransport::new();
        let registry = Arc::new(RequirementRegistry::new());
        let reconciler = reconciler(&transport, &registry);
        let scheduler =
            ReconcileScheduler::spawn(Arc::clone(&reconciler), Duration::from_millis(50)).unwrap();
        let trigger = scheduler.trigger();

        for i in 0..10 {
            registry.add(&[SubscriptionRequirement::new(format!("s{}", i), "st", |_| Ok(()))]);
            trigger.request();
        }

        assert!(trigger.settle(Duration::from_secs(5)));
        assert_eq!(reconciler.passes(), 1);
        assert_eq!(transport.active_bindings().len(), 10);
    }

    #[test]
    fn test_settle_without_requests_returns_immediately() {
        let transport = MemoryTransport::new();
        let registry = Arc::new(RequirementRegistry::new());
        let scheduler =
            ReconcileScheduler::spawn(reconciler(&transport, &registry), Duration::from_millis(10))
                .unwrap();
        assert!(scheduler.trigger().settle(Duration::from_millis(1)));
    }

    #[test]
    fn test_stopped_scheduler_refuses_requests() {
        let transport = MemoryTransport::new();
        let registry = Arc::new(RequirementRegistry::new());
        let mut scheduler =
            ReconcileScheduler::spawn(reconciler(&transport, &registry), Duration::from_millis(10))
                .unwrap();
        let trigger = scheduler.trigger();

        scheduler.stop();
        assert!(trigger.is_stopped());
        assert!(!trigger.request());
        assert!(trigger.settle(Duration::from_millis(1)));
    }
}
