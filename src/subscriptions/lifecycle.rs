//! Binding creation, message dispatch and teardown.

use crate::error::{EngineError, Result};
use crate::transport::Connection;
use crate::types::{Message, MessageHandler, SubscriptionRequirement};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use super::types::{Subscription, SubscriptionInfo};

/// Owns the live subscriptions and their binding handles.
pub struct LifecycleHandler {
    /// Live subscriptions by subject.
    live: RwLock<HashMap<String, Subscription>>,
    /// Capacity of each binding's delivery channel.
    message_buffer: usize,
}

impl LifecycleHandler {
    /// Create a handler whose consumers buffer up to `message_buffer` messages.
    pub fn new(message_buffer: usize) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            message_buffer: message_buffer.max(1),
        }
    }

    /// Bind `requirement` on `connection`.
    ///
    /// A live subscription for the same subject is a programming error and is
    /// rejected before the transport is contacted.
    pub fn create_binding(
        &self,
        connection: &Arc<dyn Connection>,
        requirement: &SubscriptionRequirement,
    ) -> Result<()> {
        let subject = &requirement.subject;
        if self.live.read().contains_key(subject) {
            return Err(EngineError::DuplicateBinding(subject.clone()));
        }
        if requirement.push_only {
            return Err(EngineError::PolicyViolation {
                subject: subject.clone(),
                reason: "push-only consumers are not supported".to_string(),
            });
        }

        // The consumer runs before bind so replayed history cannot fill the buffer.
        let (sink, source) = bounded(self.message_buffer);
        spawn_consumer(subject, Arc::clone(&requirement.handler), source)?;

        let binding = connection.bind(&requirement.binding_spec(), sink)?;

        let mut live = self.live.write();
        if live.contains_key(subject) {
            drop(live);
            if let Err(err) = binding.unbind() {
                warn!(subject = %subject, error = %err, "failed to release duplicate binding");
            }
            return Err(EngineError::DuplicateBinding(subject.clone()));
        }

        live.insert(
            subject.clone(),
            Subscription {
                info: SubscriptionInfo {
                    subject: subject.clone(),
                    stream: requirement.stream.clone(),
                    deliver_policy: requirement.deliver_policy,
                    connection: connection.id(),
                },
                binding,
                connection: Arc::clone(connection),
            },
        );

        debug!(
            subject = %subject,
            stream = %requirement.stream,
            connection = %connection.id(),
            "binding created"
        );
        Ok(())
    }

    /// Tear down the binding for `subject`.
    ///
    /// On failure the subscription stays live so the next pass retries it.
    /// Unknown subjects are a no-op.
    pub fn destroy_binding(&self, subject: &str) -> Result<()> {
        let binding = match self.live.read().get(subject) {
            Some(sub) => Arc::clone(&sub.binding),
            None => return Ok(()),
        };

        if let Err(err) = binding.unbind() {
            warn!(subject = %subject, error = %err, "binding teardown failed");
            return Err(err);
        }

        self.live.write().remove(subject);
        debug!(subject = %subject, "binding destroyed");
        Ok(())
    }

    /// Forget subscriptions whose connection has closed. Returns their subjects.
    pub fn evict_stale(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        self.live.write().retain(|subject, sub| {
            if sub.is_stale() {
                evicted.push(subject.clone());
                false
            } else {
                true
            }
        });
        evicted.sort();
        evicted
    }

    /// Whether `subject` has a live binding.
    pub fn is_live(&self, subject: &str) -> bool {
        self.live.read().contains_key(subject)
    }

    /// Live subjects, sorted.
    pub fn live_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.live.read().keys().cloned().collect();
        subjects.sort();
        subjects
    }

    /// Details of every live subscription, sorted by subject.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> =
            self.live.read().values().map(|s| s.info.clone()).collect();
        infos.sort_by(|a, b| a.subject.cmp(&b.subject));
        infos
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }
}

/// One consumer thread per binding. It exits once the transport drops the sender.
fn spawn_consumer(subject: &str, handler: MessageHandler, source: Receiver<Message>) -> Result<()> {
    thread::Builder::new()
        .name(format!("sub:{}", subject))
        .spawn(move || {
            for message in source.iter() {
                dispatch(&handler, &message);
            }
        })?;
    Ok(())
}

/// Run the handler, then acknowledge no matter how the handler ended.
fn dispatch(handler: &MessageHandler, message: &Message) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(
                subject = %message.subject(),
                sequence = message.sequence(),
                error = %err,
                "message handler failed"
            );
        }
        Err(_) => {
            error!(
                subject = %message.subject(),
                sequence = message.sequence(),
                "message handler panicked"
            );
        }
    }

    if let Err(err) = message.ack() {
        warn!(subject = %message.subject(), error = %err, "acknowledge failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::transport::{MemoryTransport, Transport};
    use crate::types::DeliverPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn connect(transport: &MemoryTransport) -> Arc<dyn Connection> {
        transport.connect(&ConnectionOptions::default()).unwrap()
    }

    fn req(subject: &str) -> SubscriptionRequirement {
        SubscriptionRequirement::new(subject, "st", |_| Ok(())).deliver_policy(DeliverPolicy::New)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_create_and_destroy() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        lifecycle.create_binding(&conn, &req("a")).unwrap();
        assert!(lifecycle.is_live("a"));
        assert_eq!(transport.active_bindings(), vec!["a"]);

        lifecycle.destroy_binding("a").unwrap();
        assert!(lifecycle.is_empty());
        assert!(transport.active_bindings().is_empty());
    }

    #[test]
    fn test_duplicate_rejected_without_transport() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        lifecycle.create_binding(&conn, &req("a")).unwrap();
        let err = lifecycle.create_binding(&conn, &req("a"));
        assert!(matches!(err, Err(EngineError::DuplicateBinding(_))));
        assert_eq!(transport.bind_count("a"), 1);
    }

    #[test]
    fn test_push_only_rejected() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        let err = lifecycle.create_binding(&conn, &req("a").push_only(true));
        assert!(matches!(err, Err(EngineError::PolicyViolation { .. })));
        assert_eq!(transport.bind_count("a"), 0);
    }

    #[test]
    fn test_rejected_bind_leaves_nothing_live() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        transport.reject_binds("a");
        let err = lifecycle.create_binding(&conn, &req("a"));
        assert!(matches!(err, Err(EngineError::BindingRejected { .. })));
        assert!(!lifecycle.is_live("a"));
    }

    #[test]
    fn test_failed_teardown_stays_live() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);
        lifecycle.create_binding(&conn, &req("a")).unwrap();

        transport.fail_unbinds("a");
        assert!(lifecycle.destroy_binding("a").is_err());
        assert!(lifecycle.is_live("a"));

        transport.allow_unbinds("a");
        lifecycle.destroy_binding("a").unwrap();
        assert!(!lifecycle.is_live("a"));
    }

    #[test]
    fn test_handler_runs_and_acks() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let requirement = SubscriptionRequirement::new("a", "st", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .deliver_policy(DeliverPolicy::New);
        lifecycle.create_binding(&conn, &requirement).unwrap();

        transport.publish("st", "a", b"{}".to_vec());
        transport.publish("st", "a", b"{}".to_vec());

        assert!(wait_for(|| transport.ack_count() == 2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_handler_still_acks() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);

        let requirement = SubscriptionRequirement::new("a", "st", |_| Err("boom".into()))
            .deliver_policy(DeliverPolicy::New);
        lifecycle.create_binding(&conn, &requirement).unwrap();

        transport.publish("st", "a", b"1".to_vec());
        assert!(wait_for(|| transport.ack_count() == 1));
    }

    #[test]
    fn test_evict_stale_after_connection_loss() {
        let transport = MemoryTransport::new();
        let conn = connect(&transport);
        let lifecycle = LifecycleHandler::new(16);
        lifecycle.create_binding(&conn, &req("a")).unwrap();
        lifecycle.create_binding(&conn, &req("b")).unwrap();

        assert!(lifecycle.evict_stale().is_empty());
        transport.sever_all();
        assert_eq!(lifecycle.evict_stale(), vec!["a", "b"]);
        assert!(lifecycle.is_empty());
    }
}
