// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-planner
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The plan builder.
pub mod builder;

pub use builder::{PlanBuildError, PlanBuildInput, build_plan};

use async_trait::async_trait;
use flex_core::{CapabilityRecord, FacetCheckResult, NodeKind, RoutingSpec, TaskEnvelope};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Default per-call planner timeout.
pub const DEFAULT_PLANNER_TIMEOUT: Duration = Duration::from_secs(180);

/// State handed to the planner when re-planning an in-flight run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphContext {
    /// Version of the plan being replaced.
    pub previous_plan_version: u32,
    /// Nodes already completed; the planner should plan around them.
    #[serde(default)]
    pub completed_node_ids: Vec<String>,
    /// Facet snapshot at re-plan time.
    #[serde(default)]
    pub facet_snapshot: Value,
    /// Why the re-plan was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_reason: Option<String>,
    /// Goal outcomes, when the goal gate triggered the re-plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goal_results: Vec<FacetCheckResult>,
}

/// The request handed to a planner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRequest {
    /// The caller's envelope.
    pub envelope: TaskEnvelope,
    /// Canonical policies (normalizer output).
    pub policies: Value,
    /// Active capability records offered to the planner.
    pub capabilities: Vec<CapabilityRecord>,
    /// Present on re-plan requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_context: Option<GraphContext>,
}

/// One node of a planner draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DraftNode {
    /// Explicit node id; generated from the capability/stage/label when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Capability to dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Node kind; coerced from the capability when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Planner stage tag (`drafting`, `qa`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Facets the node consumes, in addition to the capability's.
    #[serde(default)]
    pub input_facets: Vec<String>,
    /// Facets the node produces, in addition to the capability's.
    #[serde(default)]
    pub output_facets: Vec<String>,
    /// Node-specific instructions appended to the bundle.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Planner rationale lines.
    #[serde(default)]
    pub rationale: Vec<String>,
    /// Routing table, for routing nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingSpec>,
    /// Open metadata merged into the node metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// A pre-execution branch requested by the planner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BranchRequest {
    /// Display label of the branch.
    pub label: String,
    /// Branching strategy hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Open metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// A validated plan draft returned by a planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannerDraft {
    /// Version the planner proposes; the coordinator bumps it when it is
    /// not strictly greater than the previous plan's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Draft nodes, in execution order.
    pub nodes: Vec<DraftNode>,
    /// Pre-execution branches.
    #[serde(default)]
    pub branch_requests: Vec<BranchRequest>,
    /// Facets the planner declares available up front.
    #[serde(default)]
    pub directives: Vec<String>,
    /// Open metadata merged into the plan metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Errors from the planner boundary.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The planner produced a structurally unusable draft.
    #[error("planner draft rejected: {}", errors.join("; "))]
    DraftRejected {
        /// What was wrong with it.
        errors: Vec<String>,
    },

    /// The planner call exceeded its timeout.
    #[error("planner timed out after {timeout:?}")]
    Timeout {
        /// The enforced timeout.
        timeout: Duration,
    },

    /// The planner backend failed.
    #[error("planner backend failed: {0}")]
    Backend(String),
}

/// An external service that turns envelopes into plan drafts.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a draft for the request.
    async fn draft_plan(&self, request: PlannerRequest) -> Result<PlannerDraft, PlannerError>;
}

/// Call the planner, racing it against `timeout`.
///
/// # Errors
///
/// Returns [`PlannerError::Timeout`] when the timer wins, or whatever
/// the planner itself returned.
pub async fn draft_with_timeout(
    planner: &dyn Planner,
    request: PlannerRequest,
    timeout: Duration,
) -> Result<PlannerDraft, PlannerError> {
    match tokio::time::timeout(timeout, planner.draft_plan(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(target: "flex.planner", ?timeout, "planner call timed out");
            Err(PlannerError::Timeout { timeout })
        }
    }
}

/// Structural validation applied to every draft before building.
///
/// # Errors
///
/// Returns [`PlannerError::DraftRejected`] listing every violation.
pub fn validate_draft(draft: &PlannerDraft) -> Result<(), PlannerError> {
    let mut errors = Vec::new();
    if draft.nodes.is_empty() {
        errors.push("draft contains no nodes".to_string());
    }
    for (index, node) in draft.nodes.iter().enumerate() {
        let is_routing = node.routing.is_some() || node.kind == Some(NodeKind::Routing);
        if is_routing {
            match &node.routing {
                None => errors.push(format!("node {index}: routing node without routes")),
                Some(spec) if spec.routes.is_empty() && spec.else_to.is_none() => {
                    errors.push(format!("node {index}: routing table is empty"));
                }
                Some(_) => {}
            }
        } else if node.capability_id.is_none()
            && !matches!(node.kind, Some(NodeKind::Branch | NodeKind::Fallback))
        {
            errors.push(format!(
                "node {index}: neither capability nor routing nor branch/fallback kind"
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PlannerError::DraftRejected { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowPlanner;

    #[async_trait]
    impl Planner for SlowPlanner {
        async fn draft_plan(&self, _request: PlannerRequest) -> Result<PlannerDraft, PlannerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PlannerDraft::default())
        }
    }

    fn request() -> PlannerRequest {
        PlannerRequest {
            envelope: flex_core::TaskEnvelopeBuilder::new("objective").build(),
            policies: serde_json::json!({"runtime": []}),
            capabilities: vec![],
            graph_context: None,
        }
    }

    #[tokio::test]
    async fn timeout_races_the_planner_call() {
        let err = draft_with_timeout(&SlowPlanner, request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Timeout { .. }));
    }

    #[test]
    fn empty_draft_is_rejected() {
        let err = validate_draft(&PlannerDraft::default()).unwrap_err();
        match err {
            PlannerError::DraftRejected { errors } => {
                assert_eq!(errors, vec!["draft contains no nodes"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn node_without_capability_or_routing_is_rejected() {
        let draft = PlannerDraft {
            nodes: vec![DraftNode::default()],
            ..PlannerDraft::default()
        };
        assert!(validate_draft(&draft).is_err());
    }

    #[test]
    fn routing_node_with_routes_is_accepted() {
        let draft = PlannerDraft {
            nodes: vec![DraftNode {
                kind: Some(NodeKind::Routing),
                routing: Some(RoutingSpec {
                    routes: vec![],
                    else_to: Some("somewhere".into()),
                }),
                ..DraftNode::default()
            }],
            ..PlannerDraft::default()
        };
        validate_draft(&draft).unwrap();
    }

    #[test]
    fn capability_node_is_accepted() {
        let draft = PlannerDraft {
            nodes: vec![DraftNode {
                capability_id: Some("writer.v1".into()),
                ..DraftNode::default()
            }],
            ..PlannerDraft::default()
        };
        validate_draft(&draft).unwrap();
    }
}
