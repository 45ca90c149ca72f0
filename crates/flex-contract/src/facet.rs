// SPDX-License-Identifier: MIT OR Apache-2.0
//! Facet definitions and the catalog.

use flex_core::FacetDirection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// A named, semantically-typed slot for a payload fragment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetDefinition {
    /// Facet name, e.g. `copyVariants`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// What the facet means to downstream consumers.
    pub semantics: String,
    /// Declared direction.
    pub direction: FacetDirection,
    /// JSON-Schema fragment describing the facet value.
    pub schema_fragment: Value,
}

/// The set of facets known to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FacetCatalog {
    facets: BTreeMap<String, FacetDefinition>,
}

impl FacetCatalog {
    /// Build a catalog from definitions; later duplicates win.
    #[must_use]
    pub fn new(definitions: impl IntoIterator<Item = FacetDefinition>) -> Self {
        Self {
            facets: definitions
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
        }
    }

    /// Register (or replace) a facet definition.
    pub fn register(&mut self, definition: FacetDefinition) {
        self.facets.insert(definition.name.clone(), definition);
    }

    /// Look up a facet by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FacetDefinition> {
        self.facets.get(name)
    }

    /// Number of registered facets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facets.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// Filter facet names by declared direction for use as inputs.
    ///
    /// Unknown facets pass through untouched (the catalog is advisory for
    /// facets the planner invents); facets declared output-only are
    /// logged and dropped.
    #[must_use]
    pub fn filter_inputs(&self, names: &[String]) -> Vec<String> {
        self.filter(names, true)
    }

    /// Filter facet names by declared direction for use as outputs.
    #[must_use]
    pub fn filter_outputs(&self, names: &[String]) -> Vec<String> {
        self.filter(names, false)
    }

    fn filter(&self, names: &[String], as_input: bool) -> Vec<String> {
        names
            .iter()
            .filter(|name| match self.get(name) {
                None => true,
                Some(def) => {
                    let ok = if as_input {
                        def.direction.accepts_input()
                    } else {
                        def.direction.accepts_output()
                    };
                    if !ok {
                        warn!(
                            target: "flex.contract",
                            facet = %name,
                            direction = ?def.direction,
                            as_input,
                            "facet used against its declared direction; dropping"
                        );
                    }
                    ok
                }
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> FacetCatalog {
        FacetCatalog::new([
            FacetDefinition {
                name: "brief".into(),
                description: "Campaign brief".into(),
                semantics: "Structured brief".into(),
                direction: FacetDirection::Input,
                schema_fragment: json!({"type": "object"}),
            },
            FacetDefinition {
                name: "copyVariants".into(),
                description: "Copy variants".into(),
                semantics: "Produced variants".into(),
                direction: FacetDirection::Output,
                schema_fragment: json!({"type": "array"}),
            },
            FacetDefinition {
                name: "qaFindings".into(),
                description: "QA findings".into(),
                semantics: "Validation notes".into(),
                direction: FacetDirection::Bidirectional,
                schema_fragment: json!({"type": "array"}),
            },
        ])
    }

    #[test]
    fn direction_filtering_drops_misused_facets() {
        let c = catalog();
        let inputs = c.filter_inputs(&[
            "brief".into(),
            "copyVariants".into(),
            "qaFindings".into(),
        ]);
        assert_eq!(inputs, vec!["brief", "qaFindings"]);

        let outputs = c.filter_outputs(&["brief".into(), "copyVariants".into()]);
        assert_eq!(outputs, vec!["copyVariants"]);
    }

    #[test]
    fn unknown_facets_pass_through() {
        let c = catalog();
        assert_eq!(c.filter_inputs(&["mystery".into()]), vec!["mystery"]);
    }

    #[test]
    fn register_replaces_existing_definition() {
        let mut c = catalog();
        c.register(FacetDefinition {
            name: "brief".into(),
            description: "v2".into(),
            semantics: "v2".into(),
            direction: FacetDirection::Bidirectional,
            schema_fragment: json!({"type": "object"}),
        });
        assert_eq!(c.len(), 3);
        assert!(c.get("brief").unwrap().direction.accepts_output());
    }
}
