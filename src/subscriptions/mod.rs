//! Desired and live subscriptions.
//!
//! - [`RequirementRegistry`] holds the desired set as callers declared it,
//!   duplicates included. It never touches the transport.
//! - [`LifecycleHandler`] owns the live set: it creates consumer bindings,
//!   runs one consumer thread per binding that feeds the caller's handler and
//!   acknowledges, and tears bindings down.
//!
//! Only the reconciler moves the live set toward the desired one.
//!
//! # Example
//!
//! ```ignore
//! let registry = RequirementRegistry::new();
//! registry.add(&[SubscriptionRequirement::new("tipsets.main", "TIPSETS", |msg| {
//!     println!("got {}", msg.subject());
//!     Ok(())
//! })]);
//!
//! let lifecycle = LifecycleHandler::new(1000);
//! for req in registry.snapshot() {
//!     lifecycle.create_binding(&connection, &req)?;
//! }
//! ```

mod lifecycle;
mod registry;
mod types;

pub use lifecycle::LifecycleHandler;
pub use registry::RequirementRegistry;
pub use types::SubscriptionInfo;
