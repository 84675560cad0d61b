//! Live subscription records.

use crate::transport::{Binding, Connection};
use crate::types::{ConnectionId, DeliverPolicy};
use std::sync::Arc;

/// Read-only view of a live subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub subject: String,
    pub stream: String,
    pub deliver_policy: DeliverPolicy,
    pub connection: ConnectionId,
}

/// A live subscription. The binding handle never leaves the lifecycle handler.
pub(crate) struct Subscription {
    pub(crate) info: SubscriptionInfo,
    pub(crate) binding: Arc<dyn Binding>,
    pub(crate) connection: Arc<dyn Connection>,
}

impl Subscription {
    /// The binding died with its connection.
    pub(crate) fn is_stale(&self) -> bool {
        self.connection.is_closed()
    }
}
