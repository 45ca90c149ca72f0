// SPDX-License-Identifier: MIT OR Apache-2.0
//! The plan builder: wrap a validated planner draft into an executable
//! [`FlexPlan`].
//!
//! The builder resolves each node's facets and contracts, tracks facet
//! availability through the plan, injects branch, normalization, and
//! fallback nodes, wires sequential and routing edges, and computes the
//! plan version.

use crate::{BranchRequest, DraftNode, GraphContext, PlannerDraft, PlannerError, validate_draft};
use chrono::Utc;
use flex_condition::parse_dsl;
use flex_contract::{FacetCatalog, compile_contract, is_schema_subset};
use flex_core::{
    CapabilityKind, CapabilityRecord, ConditionSpec, ContextBundle, FlexPlan, FlexPlanNode,
    NodeContracts, NodeFacets, NodeKind, NodeProvenance, OutputContract, PlanEdge, RoutingSpec,
    TaskEnvelope,
};
use flex_policy::NormalizedPolicies;
use flex_registry::CapabilityRegistry;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Output contract applied when nothing more specific resolves.
const DEFAULT_FREEFORM_INSTRUCTIONS: &str =
    "Produce output consistent with downstream expectations.";

/// Output contract of the injected fallback node.
const FALLBACK_INSTRUCTIONS: &str = "Document HITL escalation decision and context.";

/// Everything the builder needs besides the draft itself.
pub struct PlanBuildInput<'a> {
    /// Run the plan is being built for.
    pub run_id: &'a str,
    /// The caller's envelope.
    pub envelope: &'a TaskEnvelope,
    /// Normalized policies.
    pub policies: &'a NormalizedPolicies,
    /// Capability lookup.
    pub registry: &'a dyn CapabilityRegistry,
    /// Facet catalog for direction filtering and contract compilation.
    pub catalog: &'a FacetCatalog,
    /// Present when building a replacement plan.
    pub graph_context: Option<&'a GraphContext>,
}

/// Errors raised while building a plan from a draft.
#[derive(Debug, thiserror::Error)]
pub enum PlanBuildError {
    /// The draft failed structural validation.
    #[error(transparent)]
    Draft(#[from] PlannerError),

    /// An execution node references an unknown capability.
    #[error("node {index}: unknown capability '{capability_id}'")]
    UnknownCapability {
        /// Draft node index.
        index: usize,
        /// The unknown id.
        capability_id: String,
    },

    /// Two nodes resolved to the same id.
    #[error("duplicate node id '{id}'")]
    DuplicateNodeId {
        /// The colliding id.
        id: String,
    },

    /// A routing target is missing or not strictly after its router.
    #[error("routing node '{node_id}': target '{target}' {reason}")]
    RoutingTarget {
        /// The routing node.
        node_id: String,
        /// The offending target.
        target: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A route condition failed to canonicalize.
    #[error("routing node '{node_id}': invalid route condition: {message}")]
    RouteCondition {
        /// The routing node.
        node_id: String,
        /// The condition error.
        message: String,
    },
}

/// Build an executable plan from a draft.
///
/// # Errors
///
/// Returns [`PlanBuildError`] on structural violations; see the variants.
pub fn build_plan(
    input: &PlanBuildInput<'_>,
    draft: PlannerDraft,
) -> Result<FlexPlan, PlanBuildError> {
    validate_draft(&draft)?;

    let mut available: BTreeSet<String> = input.envelope.inputs.keys().cloned().collect();
    available.extend(draft.directives.iter().cloned());

    let mut nodes: Vec<FlexPlanNode> = Vec::with_capacity(draft.nodes.len() + 3);
    for (index, draft_node) in draft.nodes.iter().enumerate() {
        let node = build_node(input, draft_node, index, &mut available)?;
        nodes.push(node);
    }

    // Branch nodes go before the first execution node.
    let branch_requests = collect_branch_requests(&draft, input.envelope);
    let branch_count = branch_requests.len();
    if branch_count > 0 {
        let at = nodes
            .iter()
            .position(|n| n.kind == NodeKind::Execution)
            .unwrap_or(0);
        for (offset, request) in branch_requests.into_iter().enumerate() {
            let node = build_branch_node(input, &request, offset);
            nodes.insert(at + offset, node);
        }
    }

    // Normalization node when the final schema is not already guaranteed.
    if let OutputContract::JsonSchema { schema } = &input.envelope.output_contract {
        let last_execution_schema = nodes
            .iter()
            .rev()
            .find(|n| n.kind == NodeKind::Execution)
            .map(|n| match &n.contracts.output {
                OutputContract::JsonSchema { schema } => schema.clone(),
                _ => json!({}),
            })
            .unwrap_or_else(|| json!({}));
        if !is_schema_subset(&last_execution_schema, schema) {
            debug!(target: "flex.planner", "appending normalization node for the final contract");
            let node = build_normalization_node(input, nodes.len());
            nodes.push(node);
        }
    }

    // Every plan ends with a fallback unless the planner supplied one.
    let derived_count = if nodes.iter().any(|n| n.kind == NodeKind::Fallback) {
        0
    } else {
        nodes.push(build_fallback_node(input, nodes.len()));
        1
    };

    ensure_unique_ids(&nodes)?;
    let edges = build_edges(&nodes)?;

    let has_transformation = nodes.iter().any(|n| n.kind == NodeKind::Transformation);
    let computed_version =
        1 + branch_count as u32 + derived_count + u32::from(has_transformation);
    let version = draft.version.map_or(computed_version, |proposed| {
        proposed.max(computed_version)
    });

    let mut metadata: BTreeMap<String, Value> = draft.metadata.clone();
    metadata.insert(
        "scenario".into(),
        scenario_hints(input.envelope, input.policies),
    );
    if let Some(context) = input.graph_context {
        metadata.insert(
            "replan".into(),
            json!({
                "previousVersion": context.previous_plan_version,
                "reason": context.replan_reason,
                "completedNodeIds": context.completed_node_ids,
            }),
        );
    }

    Ok(FlexPlan {
        run_id: input.run_id.to_string(),
        version,
        created_at: Utc::now(),
        nodes,
        edges,
        metadata,
    })
}

fn build_node(
    input: &PlanBuildInput<'_>,
    draft: &DraftNode,
    index: usize,
    available: &mut BTreeSet<String>,
) -> Result<FlexPlanNode, PlanBuildError> {
    let capability: Option<CapabilityRecord> = match &draft.capability_id {
        Some(id) => input.registry.get(id),
        None => None,
    };

    let kind = coerce_kind(draft, capability.as_ref());
    if kind == NodeKind::Execution && capability.is_none() {
        return Err(PlanBuildError::UnknownCapability {
            index,
            capability_id: draft.capability_id.clone().unwrap_or_default(),
        });
    }

    // Facets: union of capability and draft declarations, direction-filtered.
    let input_facets = input.catalog.filter_inputs(&union(
        capability.as_ref().map(|c| c.input_facets.as_slice()),
        &draft.input_facets,
    ));
    let output_facets = input.catalog.filter_outputs(&union(
        capability.as_ref().map(|c| c.output_facets.as_slice()),
        &draft.output_facets,
    ));

    let missing: Vec<&String> = input_facets
        .iter()
        .filter(|f| !available.contains(*f))
        .collect();
    if !missing.is_empty() {
        warn!(
            target: "flex.planner",
            node = index,
            missing = ?missing,
            "node consumes facets no earlier node produces"
        );
    }
    let missing: Vec<Value> = missing
        .into_iter()
        .map(|f| Value::String(f.clone()))
        .collect();

    let compiled_input = compile_contract(input.catalog, &input_facets, true);
    let compiled_output = compile_contract(input.catalog, &output_facets, false);

    // Output contract precedence: capability > compiled facets > freeform
    // default; transformation nodes carry the envelope contract.
    let output_contract = if kind == NodeKind::Transformation {
        input.envelope.output_contract.clone()
    } else if let Some(capability) = &capability {
        capability.output_contract.clone()
    } else if !compiled_output.is_empty() {
        OutputContract::JsonSchema {
            schema: compiled_output.schema.clone(),
        }
    } else {
        OutputContract::Freeform {
            instructions: DEFAULT_FREEFORM_INSTRUCTIONS.into(),
        }
    };
    let input_contract = if compiled_input.is_empty() {
        capability.as_ref().and_then(|c| c.input_contract.clone())
    } else {
        Some(OutputContract::JsonSchema {
            schema: compiled_input.schema.clone(),
        })
    };

    // Explicit planner ids are kept verbatim: routing targets reference
    // them, so rewriting would orphan the routes.
    let id = match &draft.id {
        Some(id) => id.clone(),
        None => {
            let base = draft
                .capability_id
                .as_deref()
                .or(draft.stage.as_deref())
                .or(draft.label.as_deref())
                .unwrap_or("node");
            format!("{}_{}", sanitize(base), index + 1)
        }
    };

    let label = draft
        .label
        .clone()
        .or_else(|| capability.as_ref().map(|c| c.display_name.clone()))
        .unwrap_or_else(|| id.clone());
    let capability_label = capability
        .as_ref()
        .map_or_else(|| label.clone(), |c| c.display_name.clone());

    let mut metadata = draft.metadata.clone();
    metadata.insert("kind".into(), json!(kind));
    if let Some(stage) = &draft.stage {
        metadata.insert("plannerStage".into(), json!(stage));
    }
    if !missing.is_empty() {
        metadata.insert("missingFacets".into(), Value::Array(missing));
    }

    let routing = draft
        .routing
        .clone()
        .map(|spec| canonicalize_routing(&id, spec))
        .transpose()?;

    let mut instructions = input.envelope.special_instructions.clone();
    instructions.extend(draft.instructions.iter().cloned());

    let facets = NodeFacets {
        input: input_facets,
        output: output_facets,
    };
    available.extend(facets.output.iter().cloned());

    Ok(FlexPlanNode {
        bundle: ContextBundle {
            run_id: input.run_id.to_string(),
            node_id: id.clone(),
            objective: input.envelope.objective.clone(),
            instructions,
            inputs: input.envelope.inputs.clone(),
            policies: input.policies.canonical.clone(),
            contract: output_contract.clone(),
            facets: facets.clone(),
            facet_provenance: compiled_output.provenance.clone(),
            run_context_snapshot: None,
        },
        id,
        kind,
        capability_id: capability.as_ref().map(|c| c.capability_id.clone()),
        capability_label,
        label,
        contracts: NodeContracts {
            input: input_contract,
            output: output_contract,
            fallback: None,
        },
        facets,
        provenance: NodeProvenance::Planner,
        rationale: draft.rationale.clone(),
        metadata,
        routing,
    })
}

fn coerce_kind(draft: &DraftNode, capability: Option<&CapabilityRecord>) -> NodeKind {
    if let Some(kind) = draft.kind {
        return kind;
    }
    if draft.routing.is_some() {
        return NodeKind::Routing;
    }
    match capability.map(|c| c.kind) {
        Some(CapabilityKind::Structuring) => NodeKind::Structuring,
        Some(CapabilityKind::Validation) => NodeKind::Validation,
        Some(CapabilityKind::Transformation) => NodeKind::Transformation,
        _ => NodeKind::Execution,
    }
}

fn canonicalize_routing(
    node_id: &str,
    mut spec: RoutingSpec,
) -> Result<RoutingSpec, PlanBuildError> {
    for route in &mut spec.routes {
        canonicalize_condition(node_id, &mut route.condition)?;
    }
    Ok(spec)
}

fn canonicalize_condition(
    node_id: &str,
    condition: &mut ConditionSpec,
) -> Result<(), PlanBuildError> {
    if let Some(dsl) = condition.dsl.clone() {
        let parsed = parse_dsl(&dsl, None).map_err(|e| PlanBuildError::RouteCondition {
            node_id: node_id.to_string(),
            message: e.to_string(),
        })?;
        condition.canonical_dsl = Some(parsed.canonical);
        condition.json_logic = parsed.json_logic;
        condition.variables = parsed.variables;
        condition.warnings = parsed.warnings;
    }
    Ok(())
}

/// Branch sources: planner requests first, envelope policy fields as the
/// legacy fallback.
fn collect_branch_requests(draft: &PlannerDraft, envelope: &TaskEnvelope) -> Vec<BranchRequest> {
    if !draft.branch_requests.is_empty() {
        return draft.branch_requests.clone();
    }
    for field in ["branchVariants", "variantStrategies", "preExecutionBranches"] {
        if let Some(items) = envelope.policies.get(field).and_then(Value::as_array) {
            return items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(label) => BranchRequest {
                        label: label.clone(),
                        strategy: None,
                        metadata: BTreeMap::new(),
                    },
                    other => BranchRequest {
                        label: other
                            .get("label")
                            .and_then(Value::as_str)
                            .map_or_else(|| format!("branch {}", i + 1), str::to_string),
                        strategy: other
                            .get("strategy")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        metadata: BTreeMap::new(),
                    },
                })
                .collect();
        }
    }
    Vec::new()
}

fn build_branch_node(
    input: &PlanBuildInput<'_>,
    request: &BranchRequest,
    offset: usize,
) -> FlexPlanNode {
    let id = format!("branch_{}", offset + 1);
    let mut metadata: BTreeMap<String, Value> = BTreeMap::new();
    metadata.insert("kind".into(), json!(NodeKind::Branch));
    metadata.insert("derivedCapability".into(), json!(true));
    if let Some(strategy) = &request.strategy {
        metadata.insert("branchStrategy".into(), json!(strategy));
    }
    derived_node(
        input,
        id,
        NodeKind::Branch,
        request.label.clone(),
        OutputContract::Freeform {
            instructions: DEFAULT_FREEFORM_INSTRUCTIONS.into(),
        },
        None,
        metadata,
        "branch",
    )
}

fn build_normalization_node(input: &PlanBuildInput<'_>, position: usize) -> FlexPlanNode {
    let id = format!("normalize_output_{}", position + 1);
    let mut metadata: BTreeMap<String, Value> = BTreeMap::new();
    metadata.insert("kind".into(), json!(NodeKind::Transformation));
    metadata.insert("derivedCapability".into(), json!(true));
    let mut node = derived_node(
        input,
        id,
        NodeKind::Transformation,
        "Normalize output".into(),
        input.envelope.output_contract.clone(),
        None,
        metadata,
        "normalization",
    );
    // The reshaped output must land back in the context under the final
    // contract's top-level properties, or the projection would keep
    // serving the unnormalized upstream facet.
    if let OutputContract::JsonSchema { schema } = &input.envelope.output_contract {
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            let outputs: Vec<String> = properties.keys().cloned().collect();
            node.facets.output = outputs.clone();
            node.bundle.facets.output = outputs;
        }
    }
    node
}

fn build_fallback_node(input: &PlanBuildInput<'_>, position: usize) -> FlexPlanNode {
    let id = format!("fallback_hitl_{}", position + 1);
    let mut metadata: BTreeMap<String, Value> = BTreeMap::new();
    metadata.insert("kind".into(), json!(NodeKind::Fallback));
    metadata.insert("derivedCapability".into(), json!(true));
    derived_node(
        input,
        id,
        NodeKind::Fallback,
        "HITL escalation".into(),
        OutputContract::Freeform {
            instructions: FALLBACK_INSTRUCTIONS.into(),
        },
        Some("hitl".into()),
        metadata,
        "fallback",
    )
}

#[allow(clippy::too_many_arguments)]
fn derived_node(
    input: &PlanBuildInput<'_>,
    id: String,
    kind: NodeKind,
    label: String,
    output_contract: OutputContract,
    fallback: Option<String>,
    metadata: BTreeMap<String, Value>,
    reason: &str,
) -> FlexPlanNode {
    FlexPlanNode {
        bundle: ContextBundle {
            run_id: input.run_id.to_string(),
            node_id: id.clone(),
            objective: input.envelope.objective.clone(),
            instructions: input.envelope.special_instructions.clone(),
            inputs: input.envelope.inputs.clone(),
            policies: input.policies.canonical.clone(),
            contract: output_contract.clone(),
            facets: NodeFacets::default(),
            facet_provenance: vec![],
            run_context_snapshot: None,
        },
        id,
        kind,
        capability_id: None,
        capability_label: label.clone(),
        label,
        contracts: NodeContracts {
            input: None,
            output: output_contract,
            fallback,
        },
        facets: NodeFacets::default(),
        provenance: NodeProvenance::Injected {
            reason: reason.to_string(),
        },
        rationale: vec![],
        metadata,
        routing: None,
    }
}

fn ensure_unique_ids(nodes: &[FlexPlanNode]) -> Result<(), PlanBuildError> {
    let mut seen = BTreeSet::new();
    for node in nodes {
        if !seen.insert(&node.id) {
            return Err(PlanBuildError::DuplicateNodeId {
                id: node.id.clone(),
            });
        }
    }
    Ok(())
}

fn build_edges(nodes: &[FlexPlanNode]) -> Result<Vec<PlanEdge>, PlanBuildError> {
    let mut edges = Vec::new();
    for pair in nodes.windows(2) {
        edges.push(PlanEdge {
            from: pair[0].id.clone(),
            to: pair[1].id.clone(),
            reason: "sequence".into(),
        });
    }
    for (index, node) in nodes.iter().enumerate() {
        let Some(routing) = &node.routing else {
            continue;
        };
        let mut check = |target: &str, reason: &str| -> Result<PlanEdge, PlanBuildError> {
            match nodes.iter().position(|n| n.id == target) {
                None => Err(PlanBuildError::RoutingTarget {
                    node_id: node.id.clone(),
                    target: target.to_string(),
                    reason: "does not exist in the plan".into(),
                }),
                Some(position) if position <= index => Err(PlanBuildError::RoutingTarget {
                    node_id: node.id.clone(),
                    target: target.to_string(),
                    reason: "must come after the routing node".into(),
                }),
                Some(_) => Ok(PlanEdge {
                    from: node.id.clone(),
                    to: target.to_string(),
                    reason: reason.into(),
                }),
            }
        };
        for route in &routing.routes {
            edges.push(check(&route.to, "route")?);
        }
        if let Some(else_to) = &routing.else_to {
            edges.push(check(else_to, "route_else")?);
        }
    }
    Ok(edges)
}

fn scenario_hints(envelope: &TaskEnvelope, policies: &NormalizedPolicies) -> Value {
    let input_str = |key: &str| {
        envelope
            .inputs
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let variant_count = policies
        .planner
        .as_ref()
        .and_then(|p| p.topology.as_ref())
        .and_then(|t| t.variant_count)
        .or_else(|| {
            envelope
                .inputs
                .get("variantCount")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
        });
    let mut hints = Map::new();
    if let Some(channel) = input_str("channel") {
        hints.insert("channel".into(), json!(channel));
    }
    if let Some(platform) = input_str("platform") {
        hints.insert("platform".into(), json!(platform));
    }
    if let Some(formats) = envelope.inputs.get("formats").filter(|v| v.is_array()) {
        hints.insert("formats".into(), (*formats).clone());
    }
    if let Some(count) = variant_count {
        hints.insert("variantCount".into(), json!(count));
    }
    if let Some(tags) = envelope.inputs.get("tags").filter(|v| v.is_array()) {
        hints.insert("tags".into(), (*tags).clone());
    }
    Value::Object(hints)
}

fn union(capability: Option<&[String]>, draft: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in capability.unwrap_or_default().iter().chain(draft) {
        if !out.iter().any(|existing| existing == name) {
            out.push(name.clone());
        }
    }
    out
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_core::{AgentType, CapabilityStatus, FacetDirection, TaskEnvelopeBuilder};
    use flex_policy::normalize_policies;
    use flex_registry::InMemoryRegistry;
    use pretty_assertions::assert_eq;

    fn capability(id: &str, kind: CapabilityKind, inputs: &[&str], outputs: &[&str]) -> CapabilityRecord {
        CapabilityRecord {
            capability_id: id.into(),
            version: "1.0.0".into(),
            display_name: format!("{id} display"),
            summary: "cap".into(),
            kind,
            agent_type: AgentType::Ai,
            input_contract: None,
            output_contract: OutputContract::Freeform {
                instructions: "produce".into(),
            },
            input_facets: inputs.iter().map(|s| (*s).to_string()).collect(),
            output_facets: outputs.iter().map(|s| (*s).to_string()).collect(),
            post_conditions: vec![],
            assignment_defaults: None,
            metadata: BTreeMap::new(),
            status: CapabilityStatus::Active,
        }
    }

    fn catalog() -> FacetCatalog {
        FacetCatalog::new([
            flex_contract::FacetDefinition {
                name: "brief".into(),
                description: "Brief".into(),
                semantics: "brief".into(),
                direction: FacetDirection::Input,
                schema_fragment: json!({"type": "object"}),
            },
            flex_contract::FacetDefinition {
                name: "copyVariants".into(),
                description: "Variants".into(),
                semantics: "variants".into(),
                direction: FacetDirection::Output,
                schema_fragment: json!({"type": "array"}),
            },
        ])
    }

    fn draft_node(capability: &str, stage: &str) -> DraftNode {
        DraftNode {
            capability_id: Some(capability.into()),
            stage: Some(stage.into()),
            ..DraftNode::default()
        }
    }

    fn build(
        registry: &InMemoryRegistry,
        envelope: &TaskEnvelope,
        draft: PlannerDraft,
    ) -> Result<FlexPlan, PlanBuildError> {
        let policies = normalize_policies(&envelope.policies).unwrap();
        let catalog = catalog();
        build_plan(
            &PlanBuildInput {
                run_id: "r-1",
                envelope,
                policies: &policies,
                registry,
                catalog: &catalog,
                graph_context: None,
            },
            draft,
        )
    }

    #[test]
    fn simple_draft_builds_with_fallback_appended() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &["brief"],
            &["copyVariants"],
        )]);
        let envelope = TaskEnvelopeBuilder::new("write copy")
            .input("brief", json!({"goal": "launch"}))
            .build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "drafting")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();

        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.nodes[0].id, "writer_v1_1");
        assert_eq!(plan.nodes[0].planner_stage(), Some("drafting"));
        assert_eq!(plan.nodes[1].kind, NodeKind::Fallback);
        assert_eq!(plan.nodes[1].contracts.fallback.as_deref(), Some("hitl"));
        assert_eq!(
            plan.edges,
            vec![PlanEdge {
                from: "writer_v1_1".into(),
                to: "fallback_hitl_2".into(),
                reason: "sequence".into(),
            }]
        );
        // 1 + 0 branches + 1 fallback + no transformation.
        assert_eq!(plan.version, 2);
    }

    #[test]
    fn unknown_execution_capability_is_rejected() {
        let registry = InMemoryRegistry::new();
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let err = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("ghost.v1", "s")],
                ..PlannerDraft::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PlanBuildError::UnknownCapability { .. }));
    }

    #[test]
    fn missing_facets_are_logged_into_metadata() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &["brief"],
            &["copyVariants"],
        )]);
        // No `brief` input on the envelope.
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "drafting")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(
            plan.nodes[0].metadata["missingFacets"],
            json!(["brief"])
        );
    }

    #[test]
    fn facet_flow_extends_availability() {
        let registry = InMemoryRegistry::with_records([
            capability("writer.v1", CapabilityKind::Execution, &[], &["copyVariants"]),
            capability("qa.v1", CapabilityKind::Validation, &["copyVariants"], &[]),
        ]);
        // `copyVariants` is output-only in the catalog but consumed by
        // qa.v1; direction filtering keeps it out of qa's inputs, so no
        // missing-facet note appears.
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "draft"), draft_node("qa.v1", "qa")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(plan.nodes[1].kind, NodeKind::Validation);
        assert!(plan.nodes[1].metadata.get("missingFacets").is_none());
    }

    #[test]
    fn branch_nodes_insert_before_first_execution_node() {
        let registry = InMemoryRegistry::with_records([
            capability("shape.v1", CapabilityKind::Structuring, &[], &[]),
            capability("writer.v1", CapabilityKind::Execution, &[], &["copyVariants"]),
        ]);
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("shape.v1", "shape"), draft_node("writer.v1", "draft")],
                branch_requests: vec![
                    BranchRequest {
                        label: "tone A".into(),
                        strategy: Some("tone".into()),
                        metadata: BTreeMap::new(),
                    },
                    BranchRequest {
                        label: "tone B".into(),
                        strategy: None,
                        metadata: BTreeMap::new(),
                    },
                ],
                ..PlannerDraft::default()
            },
        )
        .unwrap();

        let kinds: Vec<NodeKind> = plan.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Structuring,
                NodeKind::Branch,
                NodeKind::Branch,
                NodeKind::Execution,
                NodeKind::Fallback,
            ]
        );
        // 1 + 2 branches + 1 fallback + no transformation.
        assert_eq!(plan.version, 4);
    }

    #[test]
    fn envelope_branch_variants_are_the_legacy_source() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let mut envelope = TaskEnvelopeBuilder::new("x").build();
        envelope.policies = json!({"branchVariants": ["formal", "casual"]});
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "draft")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(
            plan.nodes.iter().filter(|n| n.kind == NodeKind::Branch).count(),
            2
        );
        assert_eq!(plan.nodes[0].label, "formal");
    }

    #[test]
    fn normalization_node_appended_when_schema_not_subset() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let envelope = TaskEnvelopeBuilder::new("x")
            .output_contract(OutputContract::JsonSchema {
                schema: json!({
                    "type": "object",
                    "required": ["variants"],
                    "properties": {"variants": {"type": "array", "minItems": 2}}
                }),
            })
            .build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "draft")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();

        let normalization = plan
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Transformation)
            .expect("normalization node");
        assert_eq!(normalization.contracts.output, envelope.output_contract);
        assert_eq!(
            normalization.provenance,
            NodeProvenance::Injected {
                reason: "normalization".into()
            }
        );
        // 1 + 0 branches + 1 fallback + transformation.
        assert_eq!(plan.version, 3);
    }

    #[test]
    fn transformation_node_carries_the_envelope_contract() {
        let registry = InMemoryRegistry::with_records([capability(
            "reshape.v1",
            CapabilityKind::Transformation,
            &[],
            &[],
        )]);
        let contract = OutputContract::JsonSchema {
            schema: json!({"type": "object", "properties": {"x": {}}}),
        };
        let envelope = TaskEnvelopeBuilder::new("x")
            .output_contract(contract.clone())
            .build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("reshape.v1", "reshape")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(plan.nodes[0].contracts.output, contract);
    }

    #[test]
    fn routing_targets_must_be_forward_references() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let routing_node = DraftNode {
            id: Some("route_1".into()),
            kind: Some(NodeKind::Routing),
            routing: Some(RoutingSpec {
                routes: vec![flex_core::RouteRule {
                    to: "writer_v1_2".into(),
                    condition: ConditionSpec {
                        dsl: Some("facets.routeTarget == \"success\"".into()),
                        ..ConditionSpec::default()
                    },
                    label: None,
                }],
                else_to: None,
            }),
            ..DraftNode::default()
        };
        let mut writer = draft_node("writer.v1", "draft");
        writer.id = Some("writer_v1_2".into());

        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![routing_node.clone(), writer.clone()],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        // Route edges come after the sequential chain.
        assert!(plan.edges.iter().any(|e| e.reason == "route" && e.to == "writer_v1_2"));
        // Route conditions are canonicalized.
        let spec = plan.nodes[0].routing.as_ref().unwrap();
        assert_eq!(
            spec.routes[0].condition.json_logic,
            json!({"==": [{"var": "facets.routeTarget"}, "success"]})
        );

        // Reversed order: target precedes the router.
        let err = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![writer, routing_node],
                ..PlannerDraft::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PlanBuildError::RoutingTarget { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let mut a = draft_node("writer.v1", "draft");
        a.id = Some("dup".into());
        let mut b = draft_node("writer.v1", "draft");
        b.id = Some("dup".into());
        let err = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![a, b],
                ..PlannerDraft::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PlanBuildError::DuplicateNodeId { .. }));
    }

    #[test]
    fn scenario_hints_capture_variant_count_and_channel() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let mut envelope = TaskEnvelopeBuilder::new("x")
            .input("channel", json!("linkedin"))
            .input("variantCount", json!(2))
            .build();
        envelope.policies = json!({"variantCount": 2});
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                nodes: vec![draft_node("writer.v1", "draft")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(plan.metadata["scenario"]["channel"], json!("linkedin"));
        assert_eq!(plan.metadata["scenario"]["variantCount"], json!(2));
    }

    #[test]
    fn proposed_draft_version_wins_when_higher() {
        let registry = InMemoryRegistry::with_records([capability(
            "writer.v1",
            CapabilityKind::Execution,
            &[],
            &["copyVariants"],
        )]);
        let envelope = TaskEnvelopeBuilder::new("x").build();
        let plan = build(
            &registry,
            &envelope,
            PlannerDraft {
                version: Some(7),
                nodes: vec![draft_node("writer.v1", "draft")],
                ..PlannerDraft::default()
            },
        )
        .unwrap();
        assert_eq!(plan.version, 7);
    }

    #[test]
    fn sanitize_handles_punctuation_runs() {
        assert_eq!(sanitize("writer.v1"), "writer_v1");
        assert_eq!(sanitize("Final -- Review"), "final_review");
        assert_eq!(sanitize("__x__"), "x");
    }
}
