//! Desired-subscription registry.

use crate::types::SubscriptionRequirement;
use parking_lot::Mutex;
use std::collections::HashSet;

/// In-memory multiset of desired subscriptions.
///
/// Duplicate subjects are tolerated on insert and collapsed at the start of
/// every reconcile pass, keeping the first entry per subject. Pure set
/// manipulation: no I/O, never blocks on the transport.
#[derive(Default)]
pub struct RequirementRegistry {
    requirements: Mutex<Vec<SubscriptionRequirement>>,
}

impl RequirementRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append requirements. Duplicates stay until the next collapse.
    pub fn add(&self, requirements: &[SubscriptionRequirement]) {
        self.requirements.lock().extend_from_slice(requirements);
    }

    /// Remove every entry whose subject matches one of `subjects`.
    pub fn remove<S: AsRef<str>>(&self, subjects: &[S]) {
        let doomed: HashSet<&str> = subjects.iter().map(|s| s.as_ref()).collect();
        self.requirements
            .lock()
            .retain(|r| !doomed.contains(r.subject.as_str()));
    }

    /// Drop every requirement.
    pub fn clear(&self) {
        self.requirements.lock().clear();
    }

    /// Drop later entries for subjects already present and return the
    /// remaining set in insertion order.
    pub fn collapse(&self) -> Vec<SubscriptionRequirement> {
        let mut requirements = self.requirements.lock();
        let mut seen = HashSet::new();
        requirements.retain(|r| seen.insert(r.subject.clone()));
        requirements.clone()
    }

    /// Copy of the desired set in insertion order, duplicates included.
    pub fn snapshot(&self) -> Vec<SubscriptionRequirement> {
        self.requirements.lock().clone()
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.requirements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.lock().is_empty()
    }

    /// Distinct desired subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .requirements
            .lock()
            .iter()
            .map(|r| r.subject.clone())
            .collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }
}
