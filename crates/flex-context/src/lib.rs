// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-context
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use flex_core::{FlexPlan, FlexPlanNode, OutputContract};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One provenance entry on a facet's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceEntry {
    /// Node that produced the update.
    pub node_id: String,
    /// Capability behind the node, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Why the value was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// When the update happened.
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceEntry {
    /// Build an entry for `node_id`, timestamped now.
    #[must_use]
    pub fn now(node_id: impl Into<String>, capability_id: Option<String>) -> Self {
        Self {
            node_id: node_id.into(),
            capability_id,
            rationale: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a rationale.
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Current state of one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetState {
    /// Current value.
    pub value: Value,
    /// When the value last changed.
    pub updated_at: DateTime<Utc>,
    /// Append-only update history.
    pub provenance: Vec<ProvenanceEntry>,
}

/// One clarification exchange recorded during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationEntry {
    /// Correlation id of the exchange.
    pub id: String,
    /// The question put to the operator.
    pub question: String,
    /// Node that raised the question, when node-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// The operator's answer, once given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Whether the operator declined to answer.
    #[serde(default)]
    pub denied: bool,
    /// When the question was recorded.
    pub asked_at: DateTime<Utc>,
    /// When the answer was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

/// A serializable deep copy of the run context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunContextSnapshot {
    /// Facet states keyed by facet name.
    #[serde(default)]
    pub facets: BTreeMap<String, FacetState>,
    /// Clarification log.
    #[serde(default)]
    pub clarifications: Vec<ClarificationEntry>,
}

/// The in-memory facet store of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    facets: BTreeMap<String, FacetState>,
    clarifications: Vec<ClarificationEntry>,
}

impl RunContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate a context from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: RunContextSnapshot) -> Self {
        Self {
            facets: snapshot.facets,
            clarifications: snapshot.clarifications,
        }
    }

    /// Seed facets from envelope inputs, attributed to the `envelope`
    /// pseudo-node.
    pub fn seed_inputs(&mut self, inputs: &BTreeMap<String, Value>) {
        for (name, value) in inputs {
            self.update_facet(name.clone(), value.clone(), ProvenanceEntry::now("envelope", None));
        }
    }

    /// Store `value` under `name`, appending `provenance` to the facet's
    /// chain. The facet is created on first update; never deleted.
    pub fn update_facet(
        &mut self,
        name: impl Into<String>,
        value: Value,
        provenance: ProvenanceEntry,
    ) {
        let name = name.into();
        let timestamp = provenance.timestamp;
        let entry = self.facets.entry(name).or_insert_with(|| FacetState {
            value: Value::Null,
            updated_at: timestamp,
            provenance: Vec::new(),
        });
        entry.value = value;
        entry.updated_at = timestamp;
        entry.provenance.push(provenance);
    }

    /// Apply a node's output to the store.
    ///
    /// For each declared output facet with a matching property in the
    /// output object, the property value is stored. When nothing matched
    /// and the node declares exactly one output facet, the whole output is
    /// stored under it. Otherwise the update is a no-op — missing facet
    /// coverage is surfaced by post-conditions or goal conditions.
    pub fn update_from_node(&mut self, node: &FlexPlanNode, output: &Value) {
        let declared = &node.facets.output;
        let properties = output.as_object();

        let mut matched = false;
        if let Some(map) = properties {
            for facet in declared {
                if let Some(value) = map.get(facet) {
                    self.update_facet(
                        facet.clone(),
                        value.clone(),
                        ProvenanceEntry::now(&node.id, node.capability_id.clone()),
                    );
                    matched = true;
                }
            }
        }
        if matched {
            return;
        }

        if let [single] = declared.as_slice() {
            // Single-facet passthrough.
            self.update_facet(
                single.clone(),
                output.clone(),
                ProvenanceEntry::now(&node.id, node.capability_id.clone()),
            );
        } else {
            debug!(
                target: "flex.context",
                node = %node.id,
                declared = declared.len(),
                "node output matched no declared facet; leaving store untouched"
            );
        }
    }

    /// Current value of a facet.
    #[must_use]
    pub fn get_facet(&self, name: &str) -> Option<&Value> {
        self.facets.get(name).map(|state| &state.value)
    }

    /// Full state of a facet, including provenance.
    #[must_use]
    pub fn facet_state(&self, name: &str) -> Option<&FacetState> {
        self.facets.get(name)
    }

    /// Record a clarification question.
    pub fn record_clarification_question(
        &mut self,
        id: impl Into<String>,
        question: impl Into<String>,
        node_id: Option<String>,
    ) {
        self.clarifications.push(ClarificationEntry {
            id: id.into(),
            question: question.into(),
            node_id,
            answer: None,
            denied: false,
            asked_at: Utc::now(),
            answered_at: None,
        });
    }

    /// Record an answer (or denial) to a previously recorded question.
    ///
    /// Unknown ids are ignored.
    pub fn record_clarification_answer(&mut self, id: &str, answer: Option<String>, denied: bool) {
        if let Some(entry) = self.clarifications.iter_mut().find(|c| c.id == id) {
            entry.answer = answer;
            entry.denied = denied;
            entry.answered_at = Some(Utc::now());
        }
    }

    /// The clarification log.
    #[must_use]
    pub fn clarifications(&self) -> &[ClarificationEntry] {
        &self.clarifications
    }

    /// Produce a deep-copy snapshot. Mutating the returned value never
    /// affects the live store.
    #[must_use]
    pub fn snapshot(&self) -> RunContextSnapshot {
        RunContextSnapshot {
            facets: self.facets.clone(),
            clarifications: self.clarifications.clone(),
        }
    }

    /// The snapshot as a JSON value, as embedded in node projections and
    /// persisted records.
    #[must_use]
    pub fn snapshot_value(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    /// Compose the run's final output according to the envelope contract.
    ///
    /// - `facets` mode projects each listed facet's current value,
    ///   omitting missing facets.
    /// - `json_schema` mode projects facets intersecting the schema's
    ///   top-level `properties`; when none are present it falls back to
    ///   the last plan node's single declared output facet.
    /// - `freeform` composes an empty object.
    #[must_use]
    pub fn compose_final_output(&self, contract: &OutputContract, plan: Option<&FlexPlan>) -> Value {
        match contract {
            OutputContract::Facets { facets } => {
                let mut out = Map::new();
                for facet in facets {
                    if let Some(value) = self.get_facet(facet) {
                        out.insert(facet.clone(), value.clone());
                    }
                }
                Value::Object(out)
            }
            OutputContract::JsonSchema { schema } => {
                let mut out = Map::new();
                if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                    for key in properties.keys() {
                        if let Some(value) = self.get_facet(key) {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                }
                if !out.is_empty() {
                    return Value::Object(out);
                }
                // Nothing intersected: fall back to the last node's single
                // output facet, whose passthrough value is the closest
                // candidate for the contract.
                if let Some(facet_value) = plan.and_then(|p| self.last_single_output_facet(p)) {
                    return facet_value;
                }
                Value::Object(out)
            }
            OutputContract::Freeform { .. } => Value::Object(Map::new()),
        }
    }

    fn last_single_output_facet(&self, plan: &FlexPlan) -> Option<Value> {
        let node = plan
            .nodes
            .iter()
            .rev()
            .find(|n| n.facets.output.len() == 1)?;
        let facet = &node.facets.output[0];
        let value = self.get_facet(facet)?.clone();
        if value.is_object() {
            Some(value)
        } else {
            let mut out = Map::new();
            out.insert(facet.clone(), value);
            Some(Value::Object(out))
        }
    }
}
