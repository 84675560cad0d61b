//! Subject catalog: named groups of requirement templates.
//!
//! Templates may carry a `{network}` placeholder in their subject and stream,
//! substituted when a group is expanded for a concrete network or tenant.
//!
//! ```ignore
//! let catalog = SubjectCatalog::from_json(r#"{
//!     "dashboard": [
//!         { "subject": "{network}.tipsets", "stream": "{network}_CHAIN",
//!           "deliver_policy": { "kind": "last" } }
//!     ]
//! }"#)?;
//! let requirements = catalog.expand("dashboard", "mainnet", handler)?;
//! engine.subscribe(&requirements);
//! ```

use crate::error::{EngineError, Result};
use crate::types::{DeliverPolicy, MessageHandler, SubscriptionRequirement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Placeholder replaced by the network identifier.
pub const NETWORK_PLACEHOLDER: &str = "{network}";

/// One requirement, before network substitution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementTemplate {
    pub subject: String,
    pub stream: String,
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,
    #[serde(default)]
    pub push_only: bool,
}

impl RequirementTemplate {
    pub fn new(subject: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            stream: stream.into(),
            deliver_policy: DeliverPolicy::default(),
            push_only: false,
        }
    }

    pub fn deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    fn instantiate(&self, network: &str, handler: &MessageHandler) -> SubscriptionRequirement {
        SubscriptionRequirement::with_handler(
            self.subject.replace(NETWORK_PLACEHOLDER, network),
            self.stream.replace(NETWORK_PLACEHOLDER, network),
            handler.clone(),
        )
        .deliver_policy(self.deliver_policy)
        .push_only(self.push_only)
    }
}

/// Named groups of templates, e.g. one group per page or feature area.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectCatalog {
    groups: BTreeMap<String, Vec<RequirementTemplate>>,
}

impl SubjectCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read and parse a JSON catalog file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Add or replace a group.
    pub fn insert_group(&mut self, name: impl Into<String>, templates: Vec<RequirementTemplate>) {
        self.groups.insert(name.into(), templates);
    }

    /// Group names, sorted.
    pub fn groups(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Templates of `group`, if it exists.
    pub fn templates(&self, group: &str) -> Option<&[RequirementTemplate]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// Concrete requirements for `group` on `network`, all sharing `handler`.
    pub fn expand(
        &self,
        group: &str,
        network: &str,
        handler: MessageHandler,
    ) -> Result<Vec<SubscriptionRequirement>> {
        let templates = self
            .groups
            .get(group)
            .ok_or_else(|| EngineError::UnknownGroup(group.to_string()))?;
        Ok(templates
            .iter()
            .map(|t| t.instantiate(network, &handler))
            .collect())
    }

    fn validate(&self) -> Result<()> {
        for (group, templates) in &self.groups {
            for template in templates {
                if template.subject.trim().is_empty() || template.stream.trim().is_empty() {
                    return Err(EngineError::Catalog(format!(
                        "group {} has a template with an empty subject or stream",
                        group
                    )));
                }
            }
        }
        Ok(())
    }
}
