// SPDX-License-Identifier: MIT OR Apache-2.0
//! The contract compiler: facet name lists in, a JSON-Schema object
//! contract plus a provenance trail out.

use crate::facet::FacetCatalog;
use flex_core::{FacetDirection, FacetProvenanceEntry};
use serde_json::{Map, Value, json};

/// A compiled facet contract.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledContract {
    /// JSON-Schema object whose `properties` are the union of the facet
    /// schema fragments.
    pub schema: Value,
    /// One entry per contributing facet, used to build operator prompts.
    pub provenance: Vec<FacetProvenanceEntry>,
}

impl CompiledContract {
    /// Whether any facet contributed a property.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.provenance.is_empty()
    }
}

/// Compile a facet name list into a contract.
///
/// `as_input` selects which declared directions are admissible; facets
/// used against their direction were already dropped by the catalog
/// filter, so unknown facets compile to permissive fragments.
#[must_use]
pub fn compile_contract(
    catalog: &FacetCatalog,
    facets: &[String],
    as_input: bool,
) -> CompiledContract {
    let names = if as_input {
        catalog.filter_inputs(facets)
    } else {
        catalog.filter_outputs(facets)
    };

    let mut properties = Map::new();
    let mut provenance = Vec::new();

    for name in &names {
        let (fragment, title, direction) = match catalog.get(name) {
            Some(def) => (
                def.schema_fragment.clone(),
                def.description.clone(),
                def.direction,
            ),
            None => (
                json!({}),
                name.clone(),
                if as_input {
                    FacetDirection::Input
                } else {
                    FacetDirection::Output
                },
            ),
        };
        provenance.push(FacetProvenanceEntry {
            facet: name.clone(),
            title,
            direction,
            pointer: format!("/properties/{name}"),
        });
        properties.insert(name.clone(), fragment);
    }

    CompiledContract {
        schema: json!({
            "type": "object",
            "properties": Value::Object(properties),
        }),
        provenance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::FacetDefinition;
    use serde_json::json;

    fn catalog() -> FacetCatalog {
        FacetCatalog::new([
            FacetDefinition {
                name: "brief".into(),
                description: "Campaign brief".into(),
                semantics: "Structured brief".into(),
                direction: FacetDirection::Input,
                schema_fragment: json!({"type": "object", "required": ["goal"]}),
            },
            FacetDefinition {
                name: "copyVariants".into(),
                description: "Copy variants".into(),
                semantics: "Produced variants".into(),
                direction: FacetDirection::Output,
                schema_fragment: json!({"type": "array", "minItems": 1}),
            },
        ])
    }

    #[test]
    fn properties_are_the_union_of_fragments() {
        let compiled = compile_contract(
            &catalog(),
            &["copyVariants".into()],
            false,
        );
        assert_eq!(compiled.schema["type"], json!("object"));
        assert_eq!(
            compiled.schema["properties"]["copyVariants"]["minItems"],
            json!(1)
        );
    }

    #[test]
    fn provenance_carries_pointer_and_direction() {
        let compiled = compile_contract(&catalog(), &["brief".into()], true);
        assert_eq!(compiled.provenance.len(), 1);
        let entry = &compiled.provenance[0];
        assert_eq!(entry.pointer, "/properties/brief");
        assert_eq!(entry.title, "Campaign brief");
        assert_eq!(entry.direction, FacetDirection::Input);
    }

    #[test]
    fn misdirected_facets_do_not_contribute() {
        let compiled = compile_contract(&catalog(), &["brief".into()], false);
        assert!(compiled.is_empty());
        assert_eq!(compiled.schema["properties"], json!({}));
    }

    #[test]
    fn unknown_facets_compile_to_permissive_fragments() {
        let compiled = compile_contract(&catalog(), &["mystery".into()], true);
        assert_eq!(compiled.provenance[0].title, "mystery");
        assert_eq!(compiled.schema["properties"]["mystery"], json!({}));
    }
}
