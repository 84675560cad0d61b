//! # Subscription Reconciliation Engine
//!
//! Keeps the live subscriptions of a subject-based streaming connection in
//! step with a declarative set of desired subscriptions requested by many
//! independent callers.
//!
//! ## Core Concepts
//!
//! - **Requirements**: what callers want live, keyed by subject
//! - **Subscriptions**: what is actually bound on the transport
//! - **Reconciler**: debounced, guarded passes that diff and apply
//! - **Supervisor**: owns connections, reports health, reconnects via probe
//!
//! Guarantees: at most one live subscription per subject, and eventual
//! convergence of the live set toward the desired set. Messages are
//! acknowledged after the handler returns, even if it fails.
//!
//! ## Example
//!
//! ```ignore
//! use subsync::{DeliverPolicy, Engine, EngineConfig, MemoryTransport, SubscriptionRequirement};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryTransport::new()))?;
//! engine.connect()?;
//! engine.start_health_probe()?;
//!
//! let tipsets = SubscriptionRequirement::new("mainnet.tipsets", "CHAIN", |msg| {
//!     let tipset: serde_json::Value = msg.decode()?;
//!     println!("{}", tipset);
//!     Ok(())
//! })
//! .deliver_policy(DeliverPolicy::Last);
//!
//! engine.subscribe(&[tipsets.clone()]);
//! // ... later, when the view goes away
//! engine.unsubscribe(&[tipsets]);
//!
//! engine.shutdown();
//! ```

pub mod catalog;
pub mod connection;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use catalog::{RequirementTemplate, SubjectCatalog, NETWORK_PLACEHOLDER};
pub use connection::{ConnectionOptions, ConnectionSupervisor, HealthProbe, TlsOptions};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{EngineError, Result};
pub use reconciler::{PassReport, ReconcileScheduler, ReconcileTrigger, Reconciler};
pub use subscriptions::{LifecycleHandler, RequirementRegistry, SubscriptionInfo};
pub use transport::{Binding, Connection, MemoryConnection, MemoryTransport, Transport};
pub use types::*;
