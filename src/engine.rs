//! Engine tying registry, supervisor, lifecycle handler and reconciler together.

use crate::connection::{ConnectionOptions, ConnectionSupervisor, HealthProbe};
use crate::error::{EngineError, Result};
use crate::reconciler::{PassReport, ReconcileScheduler, ReconcileTrigger, Reconciler};
use crate::subscriptions::{LifecycleHandler, RequirementRegistry, SubscriptionInfo};
use crate::transport::Transport;
use crate::types::{ConnectionId, ConnectionStatus, SubscriptionRequirement};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub connection: ConnectionOptions,

    /// Quiet period before a requested pass runs.
    /// Default: 300ms
    pub debounce: Duration,

    /// Health probe interval.
    /// Default: 5s
    pub probe_interval: Duration,

    /// Max concurrent create/teardown operations within one pass.
    /// Default: 8
    pub max_concurrent_ops: usize,

    /// Buffered messages per binding before the transport blocks.
    /// Default: 1000
    pub message_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            debounce: Duration::from_millis(300),
            probe_interval: Duration::from_secs(5),
            max_concurrent_ops: 8,
            message_buffer: 1000,
        }
    }
}

/// Point-in-time engine counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStats {
    /// Distinct desired subjects.
    pub desired: usize,
    pub live: usize,
    /// Held connections that are still open.
    pub connections: usize,
    pub status: ConnectionStatus,
    pub passes: u64,
    pub skipped: u64,
}

/// The subscription engine.
///
/// Callers declare what they want with [`subscribe`](Self::subscribe) and
/// [`unsubscribe`](Self::unsubscribe); a debounced reconcile pass makes it so.
/// Neither call ever fails: returning means the requirement was recorded and
/// a pass was requested, not that the feed is live.
///
/// Build one per process at the composition root and pass it around; tests
/// build as many isolated engines as they like.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<RequirementRegistry>,
    supervisor: Arc<ConnectionSupervisor>,
    lifecycle: Arc<LifecycleHandler>,
    reconciler: Arc<Reconciler>,
    scheduler: Mutex<ReconcileScheduler>,
    trigger: ReconcileTrigger,
    probe: Mutex<Option<HealthProbe>>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Create an engine. No connection is made until [`connect`](Self::connect).
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let registry = Arc::new(RequirementRegistry::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport,
            config.connection.clone(),
        ));
        let lifecycle = Arc::new(LifecycleHandler::new(config.message_buffer));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&supervisor),
            Arc::clone(&lifecycle),
            config.max_concurrent_ops,
        ));

        let scheduler = ReconcileScheduler::spawn(Arc::clone(&reconciler), config.debounce)?;
        let trigger = scheduler.trigger();

        Ok(Self {
            config,
            registry,
            supervisor,
            lifecycle,
            reconciler,
            scheduler: Mutex::new(scheduler),
            trigger,
            probe: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Desired set ---

    /// Record requirements and request a pass.
    ///
    /// Push-only requirements are rejected with a logged policy violation.
    pub fn subscribe(&self, requirements: &[SubscriptionRequirement]) {
        let accepted: Vec<SubscriptionRequirement> = requirements
            .iter()
            .filter(|r| {
                if r.push_only {
                    warn!(
                        subject = %r.subject,
                        stream = %r.stream,
                        "policy violation: push-only subscriptions are not supported"
                    );
                }
                !r.push_only
            })
            .cloned()
            .collect();

        self.registry.add(&accepted);
        self.request_reconcile();
    }

    /// Drop requirements by subject and request a pass.
    pub fn unsubscribe(&self, requirements: &[SubscriptionRequirement]) {
        let subjects: Vec<&str> = requirements.iter().map(|r| r.subject.as_str()).collect();
        self.unsubscribe_subjects(&subjects);
    }

    pub fn unsubscribe_subjects<S: AsRef<str>>(&self, subjects: &[S]) {
        self.registry.remove(subjects);
        self.request_reconcile();
    }

    /// Drop every requirement and request a pass.
    pub fn clear_subscriptions(&self) {
        self.registry.clear();
        self.request_reconcile();
    }

    // --- Reconciliation ---

    /// Request a debounced pass.
    pub fn request_reconcile(&self) {
        if !self.trigger.request() {
            debug!("engine shut down, reconcile request dropped");
        }
    }

    /// Run a pass immediately, bypassing the debounce.
    /// Returns `None` if another pass was running.
    pub fn reconcile_now(&self) -> Option<PassReport> {
        self.reconciler.reconcile()
    }

    /// Wait until requested passes have run. Returns false on timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        self.trigger.settle(timeout)
    }

    // --- Connection ---

    /// Establish a connection and request a pass.
    ///
    /// Fails with [`EngineError::Shutdown`] once the engine has been shut down.
    pub fn connect(&self) -> Result<ConnectionId> {
        self.ensure_running()?;
        let connection = self.supervisor.connect()?;
        self.request_reconcile();
        Ok(connection.id())
    }

    /// Tear down all subscriptions and close every connection.
    ///
    /// Stops the health probe first so it does not reconnect behind our back.
    pub fn disconnect(&self) {
        self.stop_health_probe();
        self.registry.clear();

        let report = match self.reconcile_now() {
            Some(report) => Some(report),
            None => {
                // A pass is in flight; let it finish and try once more.
                self.settle(self.config.debounce + Duration::from_secs(1));
                self.reconcile_now()
            }
        };
        if let Some(report) = report {
            if !report.failed_removals.is_empty() {
                warn!(
                    subjects = ?report.failed_removals,
                    "teardown failed during disconnect, bindings go with the connection"
                );
            }
        }

        self.supervisor.close_all();
        self.lifecycle.evict_stale();
        info!("disconnected");
    }

    /// Start the background health probe. No-op if already running.
    pub fn start_health_probe(&self) -> Result<()> {
        self.ensure_running()?;
        let mut probe = self.probe.lock();
        if probe.is_none() {
            *probe = Some(HealthProbe::spawn(
                self.config.probe_interval,
                Arc::clone(&self.supervisor),
                self.trigger.clone(),
            )?);
        }
        Ok(())
    }

    pub fn stop_health_probe(&self) {
        // Taken out first so the join happens without the lock held.
        let probe = self.probe.lock().take();
        if let Some(mut probe) = probe {
            probe.stop();
        }
    }

    /// Disconnect and stop every background thread. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect();
        self.scheduler.lock().stop();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    // --- Inspection ---

    /// Aggregate health of the held connections.
    pub fn status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    /// Most recent connect failure, cleared by the next successful connect.
    pub fn last_error(&self) -> Option<String> {
        self.supervisor.last_error()
    }

    /// Live subjects, sorted.
    pub fn live_subjects(&self) -> Vec<String> {
        self.lifecycle.live_subjects()
    }

    /// Details of every live subscription, sorted by subject.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.lifecycle.subscriptions()
    }

    /// Distinct desired subjects, sorted.
    pub fn desired_subjects(&self) -> Vec<String> {
        self.registry.subjects()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            desired: self.registry.subjects().len(),
            live: self.lifecycle.len(),
            connections: self
                .supervisor
                .connections()
                .iter()
                .filter(|c| !c.is_closed())
                .count(),
            status: self.supervisor.status(),
            passes: self.reconciler.passes(),
            skipped: self.reconciler.skipped(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
