//! Diff between the desired and the live set.

use crate::types::SubscriptionRequirement;
use std::collections::HashSet;

/// What one pass has to do. A subject is never in both lists.
pub(crate) struct Plan {
    pub(crate) to_add: Vec<SubscriptionRequirement>,
    pub(crate) to_remove: Vec<String>,
}

impl Plan {
    /// `desired` must already be deduplicated.
    pub(crate) fn compute(desired: &[SubscriptionRequirement], live: &[String]) -> Self {
        let live_set: HashSet<&str> = live.iter().map(String::as_str).collect();
        let desired_set: HashSet<&str> = desired.iter().map(|r| r.subject.as_str()).collect();

        let to_add = desired
            .iter()
            .filter(|r| !live_set.contains(r.subject.as_str()))
            .cloned()
            .collect();

        let to_remove = live
            .iter()
            .filter(|s| !desired_set.contains(s.as_str()))
            .cloned()
            .collect();

        Self { to_add, to_remove }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(subject: &str) -> SubscriptionRequirement {
        SubscriptionRequirement::new(subject, "st", |_| Ok(()))
    }

    fn subjects(reqs: &[SubscriptionRequirement]) -> Vec<&str> {
        reqs.iter().map(|r| r.subject.as_str()).collect()
    }

    #[test]
    fn test_plan_diff() {
        let desired = vec![req("a"), req("b")];
        let live = vec!["b".to_string(), "c".to_string()];
        let plan = Plan::compute(&desired, &live);
        assert_eq!(subjects(&plan.to_add), vec!["a"]);
        assert_eq!(plan.to_remove, vec!["c"]);
    }

    #[test]
    fn test_plan_converged_is_empty() {
        let desired = vec![req("a")];
        let live = vec!["a".to_string()];
        assert!(Plan::compute(&desired, &live).is_empty());
    }

    #[test]
    fn test_plan_lists_are_disjoint() {
        let desired = vec![req("x"), req("y")];
        let live = vec!["y".to_string(), "z".to_string()];
        let plan = Plan::compute(&desired, &live);
        for subject in &plan.to_remove {
            assert!(!plan.to_add.iter().any(|r| &r.subject == subject));
        }
    }
}
