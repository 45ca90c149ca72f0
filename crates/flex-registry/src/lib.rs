// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]

use flex_core::CapabilityRecord;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

/// Lookup of capability descriptors by id.
///
/// Implementations must be internally thread-safe: the registry is the
/// one piece of mutable state shared across concurrently executing runs.
pub trait CapabilityRegistry: Send + Sync {
    /// Resolve a capability by id, active or not.
    fn get(&self, capability_id: &str) -> Option<CapabilityRecord>;

    /// Records offered to the planner: active capabilities only, sorted
    /// by id.
    fn planner_snapshot(&self) -> Vec<CapabilityRecord>;

    /// Every registered record, sorted by id.
    fn all(&self) -> Vec<CapabilityRecord>;
}

/// In-memory registry over a `RwLock`ed map.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<BTreeMap<String, CapabilityRecord>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from records; later duplicates win.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = CapabilityRecord>) -> Self {
        let registry = Self::new();
        for record in records {
            registry.register(record);
        }
        registry
    }

    /// Register (or replace) a record under its capability id.
    pub fn register(&self, record: CapabilityRecord) {
        debug!(
            target: "flex.registry",
            capability = %record.capability_id,
            version = %record.version,
            "registering capability"
        );
        self.records
            .write()
            .expect("registry lock poisoned")
            .insert(record.capability_id.clone(), record);
    }

    /// Remove a record. Does nothing if absent.
    pub fn deregister(&self, capability_id: &str) {
        self.records
            .write()
            .expect("registry lock poisoned")
            .remove(capability_id);
    }

    /// Number of registered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().expect("registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CapabilityRegistry for InMemoryRegistry {
    fn get(&self, capability_id: &str) -> Option<CapabilityRecord> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .get(capability_id)
            .cloned()
    }

    fn planner_snapshot(&self) -> Vec<CapabilityRecord> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter(|record| record.is_active())
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<CapabilityRecord> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_core::{AgentType, CapabilityKind, CapabilityStatus, OutputContract};

    fn record(id: &str, status: CapabilityStatus) -> CapabilityRecord {
        CapabilityRecord {
            capability_id: id.into(),
            version: "1.0.0".into(),
            display_name: id.into(),
            summary: "test capability".into(),
            kind: CapabilityKind::Execution,
            agent_type: AgentType::Ai,
            input_contract: None,
            output_contract: OutputContract::Freeform {
                instructions: String::new(),
            },
            input_facets: vec![],
            output_facets: vec![],
            post_conditions: vec![],
            assignment_defaults: None,
            metadata: Default::default(),
            status,
        }
    }

    #[test]
    fn register_and_get() {
        let registry = InMemoryRegistry::new();
        registry.register(record("writer.v1", CapabilityStatus::Active));
        assert!(registry.get("writer.v1").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn planner_snapshot_excludes_inactive_records() {
        let registry = InMemoryRegistry::with_records([
            record("writer.v1", CapabilityStatus::Active),
            record("old.v0", CapabilityStatus::Inactive),
        ]);
        let snapshot = registry.planner_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].capability_id, "writer.v1");

        // Inactive records still resolve for resume.
        assert!(registry.get("old.v0").is_some());
        assert_eq!(registry.all().len(), 2);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = InMemoryRegistry::new();
        registry.register(record("writer.v1", CapabilityStatus::Active));
        registry.register(record("writer.v1", CapabilityStatus::Inactive));
        assert_eq!(registry.len(), 1);
        assert!(registry.planner_snapshot().is_empty());
    }

    #[test]
    fn deregister_removes_records() {
        let registry = InMemoryRegistry::with_records([record("a.v1", CapabilityStatus::Active)]);
        registry.deregister("a.v1");
        assert!(registry.is_empty());
        registry.deregister("a.v1");
    }
}
