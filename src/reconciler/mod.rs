//! Reconciliation of live subscriptions toward the desired set.
//!
//! A pass:
//! 1. forgets live subscriptions whose connection died,
//! 2. deduplicates the desired set by subject,
//! 3. tears down live subjects nobody wants any more,
//! 4. binds desired subjects that are not live, on the active connection.
//!
//! Teardowns and creations each fan out over a bounded pool of scoped
//! worker threads and the pass waits for all of them. A failed operation
//! is logged and left for the next pass; it never blocks other subjects.
//!
//! Passes are guarded: a pass requested while another runs is skipped, not
//! queued. Callers rely on the next trigger (a subscribe, an unsubscribe or
//! the health probe) to pick up anything the skipped pass would have done.

mod plan;
mod scheduler;

pub use scheduler::{ReconcileScheduler, ReconcileTrigger};

use crate::connection::ConnectionSupervisor;
use crate::subscriptions::{LifecycleHandler, RequirementRegistry};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use plan::Plan;

/// Outcome of one executed pass. All lists hold subjects, sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub failed_creates: Vec<String>,
    pub failed_removals: Vec<String>,
    /// Wanted but not attempted because no connection was open.
    pub deferred: Vec<String>,
    /// Dropped because their connection had closed.
    pub evicted: Vec<String>,
}

impl PassReport {
    /// Nothing failed and nothing was deferred.
    pub fn is_converged(&self) -> bool {
        self.failed_creates.is_empty() && self.failed_removals.is_empty() && self.deferred.is_empty()
    }

    fn is_noop(&self) -> bool {
        self == &PassReport::default()
    }
}

/// Drives the live set toward the registry.
pub struct Reconciler {
    registry: Arc<RequirementRegistry>,
    supervisor: Arc<ConnectionSupervisor>,
    lifecycle: Arc<LifecycleHandler>,
    max_concurrent_ops: usize,
    reconciling: AtomicBool,
    passes: AtomicU64,
    skipped: AtomicU64,
}

/// Returns the reconciler to idle however the pass ends.
struct ReconcilingGuard<'a>(&'a AtomicBool);

impl Drop for ReconcilingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(
        registry: Arc<RequirementRegistry>,
        supervisor: Arc<ConnectionSupervisor>,
        lifecycle: Arc<LifecycleHandler>,
        max_concurrent_ops: usize,
    ) -> Self {
        Self {
            registry,
            supervisor,
            lifecycle,
            max_concurrent_ops: max_concurrent_ops.max(1),
            reconciling: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Run one pass now. Returns `None` if a pass is already running.
    pub fn reconcile(&self) -> Option<PassReport> {
        if self
            .reconciling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("reconcile already running, skipping");
            return None;
        }
        let _guard = ReconcilingGuard(&self.reconciling);

        let report = self.run_pass();
        self.passes.fetch_add(1, Ordering::Relaxed);

        if !report.is_noop() {
            debug!(
                created = report.created.len(),
                removed = report.removed.len(),
                failed_creates = report.failed_creates.len(),
                failed_removals = report.failed_removals.len(),
                deferred = report.deferred.len(),
                evicted = report.evicted.len(),
                "reconcile pass finished"
            );
        }
        Some(report)
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::SeqCst)
    }

    /// Passes executed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Passes skipped by the guard so far.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn run_pass(&self) -> PassReport {
        let mut report = PassReport {
            evicted: self.lifecycle.evict_stale(),
            ..Default::default()
        };
        if !report.evicted.is_empty() {
            info!(count = report.evicted.len(), "dropped subscriptions of closed connection");
        }

        let desired = self.registry.collapse();
        let plan = Plan::compute(&desired, &self.lifecycle.live_subjects());
        if plan.is_empty() {
            return report;
        }

        let lifecycle = &self.lifecycle;
        for (subject, outcome) in fan_out(plan.to_remove, self.max_concurrent_ops, |subject| {
            let outcome = lifecycle.destroy_binding(&subject);
            (subject, outcome)
        }) {
            match outcome {
                Ok(()) => report.removed.push(subject),
                Err(_) => report.failed_removals.push(subject),
            }
        }

        match self.supervisor.active() {
            Some(connection) => {
                let connection = &connection;
                for (subject, outcome) in fan_out(plan.to_add, self.max_concurrent_ops, |req| {
                    let outcome = lifecycle.create_binding(connection, &req);
                    if let Err(err) = &outcome {
                        warn!(
                            subject = %req.subject,
                            stream = %req.stream,
                            error = %err,
                            "binding creation failed"
                        );
                    }
                    (req.subject, outcome)
                }) {
                    match outcome {
                        Ok(()) => report.created.push(subject),
                        Err(_) => report.failed_creates.push(subject),
                    }
                }
            }
            None => {
                debug!(count = plan.to_add.len(), "no open connection, deferring bindings");
                report.deferred = plan.to_add.into_iter().map(|r| r.subject).collect();
            }
        }

        report.created.sort();
        report.removed.sort();
        report.failed_creates.sort();
        report.failed_removals.sort();
        report.deferred.sort();
        report
    }
}

/// Run `op` over `items` on at most `limit` scoped threads and wait for all.
fn fan_out<T, R, F>(items: Vec<T>, limit: usize, op: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let workers = limit.max(1).min(items.len());
    if workers <= 1 {
        return items.into_iter().map(op).collect();
    }

    let (job_tx, job_rx) = unbounded();
    for item in items {
        let _ = job_tx.send(item);
    }
    drop(job_tx);

    let (done_tx, done_rx) = unbounded();
    let op = &op;
    thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            scope.spawn(move || {
                for item in jobs.iter() {
                    let _ = done.send(op(item));
                }
            });
        }
    });
    drop(done_tx);

    done_rx.try_iter().collect()
}
