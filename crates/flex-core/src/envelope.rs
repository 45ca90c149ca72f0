// SPDX-License-Identifier: MIT OR Apache-2.0
//! The caller-facing task envelope: objective, inputs, policies, output
//! contract, and goal conditions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A declarative task description handed to the orchestrator.
///
/// The envelope is intentionally planner-agnostic: it states *what* the
/// caller wants (objective, inputs, output contract, goal conditions) and
/// under which policies, never *how* the plan should look.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    /// Human intent, e.g. `"Create LinkedIn variants for the retreat"`.
    pub objective: String,

    /// Named input payloads seeding the run context.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,

    /// Caller policy shape — canonical `{planner, runtime[]}` or legacy
    /// fields. Normalized once at accept time by the policy normalizer.
    #[serde(default)]
    pub policies: Value,

    /// Free-form instructions forwarded verbatim into capability bundles.
    #[serde(default)]
    pub special_instructions: Vec<String>,

    /// Run-level constraints: resume handles and HITL gating.
    #[serde(default)]
    pub constraints: EnvelopeConstraints,

    /// Caller identity and correlation metadata.
    #[serde(default)]
    pub metadata: EnvelopeMetadata,

    /// Contract the final output must satisfy.
    #[serde(default)]
    pub output_contract: OutputContract,

    /// Post-run predicates over the run context; any unmet condition
    /// triggers a re-plan.
    #[serde(default, rename = "goal_condition")]
    pub goal_condition: Vec<FacetCondition>,
}

/// Run-level constraints carried on the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeConstraints {
    /// Resume a previously paused run by id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_run_id: Option<String>,

    /// Resume the latest paused run on a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_thread_id: Option<String>,

    /// Thread handle for conversational callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Gate execution behind an operator approval of the generated plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_hitl_approval: Option<bool>,

    /// Open extension map for transport-level constraints.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Caller identity and correlation metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Opaque caller identifier, passed through to events and records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Conversation/thread handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Caller-side correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Explicit run id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Contract the final output of a run must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutputContract {
    /// Validate against an explicit JSON Schema (Draft-07 subset).
    JsonSchema {
        /// The schema object.
        schema: Value,
    },

    /// Project the listed facets out of the run context.
    Facets {
        /// Facet names, in projection order.
        facets: Vec<String>,
    },

    /// No structural contract; instructions guide the producer.
    Freeform {
        /// Guidance for whatever produces the output.
        instructions: String,
    },
}

impl Default for OutputContract {
    fn default() -> Self {
        Self::Freeform {
            instructions: String::new(),
        }
    }
}

impl OutputContract {
    /// Returns the schema when this contract is `json_schema` mode.
    #[must_use]
    pub fn schema(&self) -> Option<&Value> {
        match self {
            Self::JsonSchema { schema } => Some(schema),
            _ => None,
        }
    }

    /// Returns `true` for `json_schema` mode.
    #[must_use]
    pub fn is_json_schema(&self) -> bool {
        matches!(self, Self::JsonSchema { .. })
    }
}

/// A predicate over one facet of the run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetCondition {
    /// Facet the condition reads.
    pub facet: String,

    /// JSON-pointer-style path within the facet value (`/status`, `/`).
    pub path: String,

    /// The condition itself, in DSL and/or JSON-Logic form.
    pub condition: ConditionSpec,
}

/// A condition in its authored and compiled forms.
///
/// When `dsl` is present it is authoritative; `json_logic` is the
/// evaluatable form either compiled from the DSL or supplied directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    /// Authored DSL expression, e.g. `status == "approved"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsl: Option<String>,

    /// Deterministic canonical rendering of the DSL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_dsl: Option<String>,

    /// Evaluatable JSON-Logic tree.
    #[serde(default)]
    pub json_logic: Value,

    /// Non-fatal notes raised during parsing/validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Variable paths the condition references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

/// Envelope rejection reasons, raised before any persistence.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The objective is missing or blank.
    #[error("envelope objective must be a non-empty string")]
    EmptyObjective,

    /// A `json_schema` output contract did not carry a schema object.
    #[error("output contract schema must be a JSON object")]
    InvalidSchema,

    /// A `facets` output contract listed no facets.
    #[error("output contract facet list must not be empty")]
    EmptyFacetList,

    /// A goal condition is structurally unusable.
    #[error("goal condition {index} is invalid: {reason}")]
    InvalidGoalCondition {
        /// Zero-based index into `goal_condition`.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
}

/// Validate an envelope's caller-visible shape.
///
/// This runs before any persistence; a failure here maps to a transport
/// 400 and never produces a run record.
///
/// # Errors
///
/// Returns the first [`EnvelopeError`] encountered.
pub fn validate_envelope(envelope: &TaskEnvelope) -> Result<(), EnvelopeError> {
    if envelope.objective.trim().is_empty() {
        return Err(EnvelopeError::EmptyObjective);
    }
    match &envelope.output_contract {
        OutputContract::JsonSchema { schema } if !schema.is_object() => {
            return Err(EnvelopeError::InvalidSchema);
        }
        OutputContract::Facets { facets } if facets.is_empty() => {
            return Err(EnvelopeError::EmptyFacetList);
        }
        _ => {}
    }
    for (index, goal) in envelope.goal_condition.iter().enumerate() {
        if goal.facet.trim().is_empty() {
            return Err(EnvelopeError::InvalidGoalCondition {
                index,
                reason: "facet name is empty".into(),
            });
        }
        if goal.condition.json_logic.is_null() && goal.condition.dsl.is_none() {
            return Err(EnvelopeError::InvalidGoalCondition {
                index,
                reason: "neither dsl nor jsonLogic is present".into(),
            });
        }
    }
    Ok(())
}

/// Builder for constructing [`TaskEnvelope`]s ergonomically.
///
/// # Examples
///
/// ```
/// use flex_core::TaskEnvelopeBuilder;
///
/// let envelope = TaskEnvelopeBuilder::new("Summarize the incident")
///     .input("incidentId", serde_json::json!("inc-42"))
///     .thread_id("thread-1")
///     .build();
///
/// assert_eq!(envelope.objective, "Summarize the incident");
/// assert_eq!(envelope.metadata.thread_id.as_deref(), Some("thread-1"));
/// ```
#[derive(Debug)]
pub struct TaskEnvelopeBuilder {
    objective: String,
    inputs: BTreeMap<String, Value>,
    policies: Value,
    special_instructions: Vec<String>,
    constraints: EnvelopeConstraints,
    metadata: EnvelopeMetadata,
    output_contract: OutputContract,
    goal_condition: Vec<FacetCondition>,
}

impl TaskEnvelopeBuilder {
    /// Create a new builder with the given objective.
    #[must_use]
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            inputs: BTreeMap::new(),
            policies: Value::Null,
            special_instructions: vec![],
            constraints: EnvelopeConstraints::default(),
            metadata: EnvelopeMetadata::default(),
            output_contract: OutputContract::default(),
            goal_condition: vec![],
        }
    }

    /// Add a named input.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Set the raw policy payload.
    #[must_use]
    pub fn policies(mut self, policies: Value) -> Self {
        self.policies = policies;
        self
    }

    /// Append a special instruction.
    #[must_use]
    pub fn instruction(mut self, line: impl Into<String>) -> Self {
        self.special_instructions.push(line.into());
        self
    }

    /// Set the output contract.
    #[must_use]
    pub fn output_contract(mut self, contract: OutputContract) -> Self {
        self.output_contract = contract;
        self
    }

    /// Append a goal condition.
    #[must_use]
    pub fn goal(mut self, goal: FacetCondition) -> Self {
        self.goal_condition.push(goal);
        self
    }

    /// Set the conversational thread id on the metadata.
    #[must_use]
    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.metadata.thread_id = Some(thread_id.into());
        self
    }

    /// Set an explicit run id.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.metadata.run_id = Some(run_id.into());
        self
    }

    /// Set the resume handle on the constraints.
    #[must_use]
    pub fn resume_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.constraints.resume_run_id = Some(run_id.into());
        self
    }

    /// Require operator approval of the generated plan.
    #[must_use]
    pub fn requires_hitl_approval(mut self, required: bool) -> Self {
        self.constraints.requires_hitl_approval = Some(required);
        self
    }

    /// Consume the builder and produce a [`TaskEnvelope`].
    #[must_use]
    pub fn build(self) -> TaskEnvelope {
        TaskEnvelope {
            objective: self.objective,
            inputs: self.inputs,
            policies: self.policies,
            special_instructions: self.special_instructions,
            constraints: self.constraints,
            metadata: self.metadata,
            output_contract: self.output_contract,
            goal_condition: self.goal_condition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_deserializes_from_caller_json() {
        let envelope: TaskEnvelope = serde_json::from_value(json!({
            "objective": "Create LinkedIn variants",
            "inputs": {"variantCount": 2},
            "specialInstructions": ["Keep it short"],
            "metadata": {"clientId": "acme", "threadId": "t-1"},
            "outputContract": {
                "mode": "json_schema",
                "schema": {"type": "object", "properties": {"variants": {"type": "array"}}}
            },
            "goal_condition": [{
                "facet": "summary",
                "path": "/status",
                "condition": {"jsonLogic": {"==": [{"var": "status"}, "approved"]}}
            }]
        }))
        .unwrap();

        assert_eq!(envelope.metadata.client_id.as_deref(), Some("acme"));
        assert_eq!(envelope.goal_condition.len(), 1);
        assert!(envelope.output_contract.is_json_schema());
        validate_envelope(&envelope).unwrap();
    }

    #[test]
    fn output_contract_defaults_to_freeform() {
        let envelope: TaskEnvelope =
            serde_json::from_value(json!({"objective": "do the thing"})).unwrap();
        assert!(matches!(
            envelope.output_contract,
            OutputContract::Freeform { .. }
        ));
    }

    #[test]
    fn empty_objective_is_rejected() {
        let envelope = TaskEnvelopeBuilder::new("   ").build();
        assert!(matches!(
            validate_envelope(&envelope),
            Err(EnvelopeError::EmptyObjective)
        ));
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let envelope = TaskEnvelopeBuilder::new("x")
            .output_contract(OutputContract::JsonSchema {
                schema: json!("not a schema"),
            })
            .build();
        assert!(matches!(
            validate_envelope(&envelope),
            Err(EnvelopeError::InvalidSchema)
        ));
    }

    #[test]
    fn empty_facet_list_is_rejected() {
        let envelope = TaskEnvelopeBuilder::new("x")
            .output_contract(OutputContract::Facets { facets: vec![] })
            .build();
        assert!(matches!(
            validate_envelope(&envelope),
            Err(EnvelopeError::EmptyFacetList)
        ));
    }

    #[test]
    fn goal_condition_without_logic_is_rejected() {
        let envelope = TaskEnvelopeBuilder::new("x")
            .goal(FacetCondition {
                facet: "summary".into(),
                path: "/status".into(),
                condition: ConditionSpec::default(),
            })
            .build();
        let err = validate_envelope(&envelope).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::InvalidGoalCondition { index: 0, .. }
        ));
    }

    #[test]
    fn constraints_keep_unknown_fields() {
        let envelope: TaskEnvelope = serde_json::from_value(json!({
            "objective": "x",
            "constraints": {"resumeRunId": "r-1", "deadline": "soon"}
        }))
        .unwrap();
        assert_eq!(envelope.constraints.resume_run_id.as_deref(), Some("r-1"));
        assert_eq!(
            envelope.constraints.extra.get("deadline"),
            Some(&json!("soon"))
        );
    }
}
