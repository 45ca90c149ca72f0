// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-node execution engine.

use crate::cancel::CancellationToken;
use crate::runtime::{CapabilityError, CapabilityRequest, CapabilityRuntime};
use crate::sink::EventSink;
use crate::EngineError;
use chrono::Utc;
use flex_condition::evaluate_condition;
use flex_context::RunContext;
use flex_contract::validate_payload;
use flex_core::{
    CapabilityRecord, EmitRecord, EngineSignal, EventKind, FacetCheckResult, FacetCondition,
    FlexPlan, FlexPlanNode, NodeKind, NodeStatus, PendingState, ReplanReason, RoutingResolution,
    RoutingResult, TaskEnvelope, ValidationScope,
};
use flex_policy::{
    NormalizedPolicies, PolicyAction, RuntimeEffect, evaluate_run_start_effect,
    evaluate_runtime_effect, find_post_condition_policy,
};
use flex_registry::CapabilityRegistry;
use flex_store::{HumanTaskRecord, HumanTaskStatus, NodeStatePatch, RunStore};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a run's plan executing to the end.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Composed and validated final output.
    pub final_output: Value,
    /// Goal outcomes (empty when the envelope declares no goals).
    pub goal_results: Vec<FacetCheckResult>,
    /// Buffered `emit` policy actions for the terminal event.
    pub emits: Vec<EmitRecord>,
}

/// Everything one engine pass needs.
pub struct ExecuteArgs<'a> {
    /// The plan to execute.
    pub plan: &'a FlexPlan,
    /// The caller's envelope.
    pub envelope: &'a TaskEnvelope,
    /// Normalized policies.
    pub policies: &'a NormalizedPolicies,
    /// The run's facet store.
    pub context: &'a mut RunContext,
    /// Resumable engine state; completed nodes are skipped.
    pub state: &'a mut PendingState,
    /// Event sink.
    pub sink: &'a EventSink,
    /// Cooperative cancellation.
    pub cancel: &'a CancellationToken,
}

/// The per-node scheduler.
pub struct ExecutionEngine {
    store: Arc<dyn RunStore>,
    runtime: Arc<dyn CapabilityRuntime>,
    registry: Arc<dyn CapabilityRegistry>,
}

impl ExecutionEngine {
    /// Create an engine over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        runtime: Arc<dyn CapabilityRuntime>,
        registry: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        Self {
            store,
            runtime,
            registry,
        }
    }

    /// Execute a plan's nodes in order, skipping nodes already completed
    /// in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Signal`] for every control-flow departure
    /// (replan, pauses, policy/validation failures) and real errors for
    /// capability, store, or policy infrastructure failures.
    pub async fn execute(&self, args: ExecuteArgs<'_>) -> Result<EngineOutcome, EngineError> {
        let ExecuteArgs {
            plan,
            envelope,
            policies,
            context,
            state,
            sink,
            cancel,
        } = args;
        let run_id = plan.run_id.clone();

        self.apply_run_start_policies(policies, envelope, state, sink)
            .await?;

        let mut skip_target: Option<String> = None;
        for node in &plan.nodes {
            if state.is_completed(&node.id) {
                continue;
            }
            if let Some(target) = &skip_target {
                if node.id != *target {
                    debug!(target: "flex.engine", node = %node.id, "skipped by routing decision");
                    self.store
                        .mark_node(&run_id, &node.id, NodeStatePatch::status(NodeStatus::Skipped))
                        .await?;
                    state.mark_completed(&node.id);
                    continue;
                }
                skip_target = None;
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            self.store
                .mark_node(
                    &run_id,
                    &node.id,
                    NodeStatePatch {
                        status: Some(NodeStatus::Running),
                        capability_id: node.capability_id.clone(),
                        label: Some(node.label.clone()),
                        started_at: Some(Utc::now()),
                        ..NodeStatePatch::default()
                    },
                )
                .await?;
            sink.emit(
                EventKind::NodeStart {
                    label: node.label.clone(),
                    kind: node.kind,
                    capability_id: node.capability_id.clone(),
                },
                Some(&node.id),
            )
            .await;

            let capability = node
                .capability_id
                .as_deref()
                .and_then(|id| self.registry.get(id));

            if let Some(capability) = capability.as_ref().filter(|c| c.is_human()) {
                let signal = self
                    .park_on_human(&run_id, node, capability, state, sink)
                    .await?;
                return Err(signal.into());
            }

            match node.kind {
                NodeKind::Routing => {
                    if let Some(target) = self
                        .run_routing(&run_id, node, context, state, sink)
                        .await?
                    {
                        skip_target = Some(target);
                    }
                }
                NodeKind::Branch | NodeKind::Fallback => {
                    // Structural nodes complete without a capability call.
                    self.complete_node(&run_id, node, None, None, state, sink).await?;
                }
                _ => {
                    self.run_capability_node(
                        &run_id, node, capability.as_ref(), policies, context, state, sink, cancel,
                    )
                    .await?;
                }
            }
        }

        // Everything ran; gate on the envelope's goal conditions before
        // composing and validating the final output.
        let provisional = context.compose_final_output(&envelope.output_contract, Some(plan));
        let mut goal_results = Vec::new();
        if !envelope.goal_condition.is_empty() {
            goal_results = check_goal_conditions(&envelope.goal_condition, context);
            let failed: Vec<FacetCheckResult> = goal_results
                .iter()
                .filter(|r| !r.satisfied || r.error.is_some())
                .cloned()
                .collect();
            if !failed.is_empty() {
                info!(
                    target: "flex.engine",
                    run = %run_id,
                    failed = failed.len(),
                    "goal conditions unsatisfied; requesting re-plan"
                );
                sink.emit(
                    EventKind::GoalConditionFailed {
                        results: goal_results.clone(),
                        failed: failed.clone(),
                    },
                    None,
                )
                .await;
                return Err(EngineSignal::GoalConditionFailed {
                    results: goal_results,
                    failed,
                    provisional_output: Some(provisional),
                }
                .into());
            }
        }

        let violations = validate_payload(&envelope.output_contract, &provisional)?;
        if !violations.is_empty() {
            let errors: Vec<String> = violations.iter().map(ToString::to_string).collect();
            sink.emit(
                EventKind::ValidationError {
                    scope: ValidationScope::FinalOutput.to_string(),
                    errors: errors.clone(),
                },
                None,
            )
            .await;
            return Err(EngineSignal::ValidationFailed {
                scope: ValidationScope::FinalOutput,
                errors,
            }
            .into());
        }

        Ok(EngineOutcome {
            final_output: provisional,
            goal_results,
            emits: state.emits.clone(),
        })
    }

    async fn apply_run_start_policies(
        &self,
        policies: &NormalizedPolicies,
        envelope: &TaskEnvelope,
        state: &mut PendingState,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        let projection = json!({
            "metadata": envelope.metadata,
            "inputs": envelope.inputs,
        });
        let Some(effect) =
            evaluate_run_start_effect(&policies.runtime, &projection, &state.consumed_start_policies)?
        else {
            return Ok(());
        };
        match effect {
            RuntimeEffect::Replan {
                policy_id, trigger, ..
            } => {
                state.consumed_start_policies.push(policy_id.clone());
                sink.emit(
                    EventKind::PolicyTriggered {
                        policy_id: Some(policy_id.clone()),
                        trigger: trigger.kind.as_str().into(),
                        action: "replan".into(),
                        max_retries: None,
                        post_condition_results: None,
                    },
                    None,
                )
                .await;
                Err(EngineSignal::ReplanRequested {
                    reason: ReplanReason::PolicyTriggered,
                    policy_id: Some(policy_id),
                    trigger: serde_json::to_value(&trigger).ok(),
                    goal_results: vec![],
                    provisional_output: None,
                }
                .into())
            }
            RuntimeEffect::Action { policy } => {
                state.consumed_start_policies.push(policy.id.clone());
                sink.emit(
                    EventKind::PolicyTriggered {
                        policy_id: Some(policy.id.clone()),
                        trigger: policy.trigger.kind.as_str().into(),
                        action: policy.action.type_name().into(),
                        max_retries: None,
                        post_condition_results: None,
                    },
                    None,
                )
                .await;
                match policy.action {
                    PolicyAction::Fail { message } => Err(EngineSignal::RuntimePolicyFailure {
                        policy_id: policy.id,
                        message: message
                            .unwrap_or_else(|| "run failed by start policy".to_string()),
                    }
                    .into()),
                    PolicyAction::Emit { event, payload } => {
                        state.emits.push(EmitRecord {
                            event,
                            policy_id: policy.id,
                            payload,
                        });
                        Ok(())
                    }
                    // First-match evaluation returns replans as
                    // `RuntimeEffect::Replan`.
                    PolicyAction::Replan { .. } => Ok(()),
                }
            }
        }
    }

    /// Evaluate a routing node. Returns the selected forward target, or
    /// raises the replan signal when no route matches and no `else`
    /// target exists.
    async fn run_routing(
        &self,
        run_id: &str,
        node: &FlexPlanNode,
        context: &RunContext,
        state: &mut PendingState,
        sink: &EventSink,
    ) -> Result<Option<String>, EngineError> {
        let spec = node.routing.as_ref();
        let payload = routing_payload(node, context);
        let mut selected: Option<String> = None;
        let mut resolution = RoutingResolution::Replan;

        if let Some(spec) = spec {
            for route in &spec.routes {
                let evaluation = evaluate_condition(&route.condition.json_logic, &payload)
                    .map_err(|e| EngineError::Policy(flex_policy::PolicyError::Evaluation {
                        policy_id: format!("route:{}", node.id),
                        source: e,
                    }))?;
                if evaluation.result {
                    selected = Some(route.to.clone());
                    resolution = RoutingResolution::Match;
                    break;
                }
            }
            if selected.is_none() {
                if let Some(else_to) = &spec.else_to {
                    selected = Some(else_to.clone());
                    resolution = RoutingResolution::Else;
                }
            }
        }

        let routing_result = RoutingResult {
            selected_target: selected.clone(),
            resolution,
        };
        sink.emit(
            EventKind::NodeComplete {
                label: node.label.clone(),
                kind: node.kind,
                capability_id: node.capability_id.clone(),
                output: None,
                routing_result: Some(routing_result.clone()),
                post_condition_results: None,
            },
            Some(&node.id),
        )
        .await;
        self.store
            .mark_node(
                run_id,
                &node.id,
                NodeStatePatch {
                    status: Some(NodeStatus::Completed),
                    context: serde_json::to_value(&routing_result).ok(),
                    completed_at: Some(Utc::now()),
                    ..NodeStatePatch::default()
                },
            )
            .await?;
        state.mark_completed(&node.id);

        match resolution {
            RoutingResolution::Replan => {
                warn!(target: "flex.engine", node = %node.id, "routing unresolved; requesting re-plan");
                Err(EngineSignal::ReplanRequested {
                    reason: ReplanReason::RoutingUnresolved,
                    policy_id: None,
                    trigger: serde_json::to_value(&routing_result).ok(),
                    goal_results: vec![],
                    provisional_output: None,
                }
                .into())
            }
            _ => Ok(selected),
        }
    }

    async fn park_on_human(
        &self,
        run_id: &str,
        node: &FlexPlanNode,
        capability: &CapabilityRecord,
        state: &mut PendingState,
        sink: &EventSink,
    ) -> Result<EngineSignal, EngineError> {
        let defaults = capability.assignment_defaults.clone().unwrap_or_default();
        let now = Utc::now();
        self.store
            .upsert_human_task(HumanTaskRecord {
                run_id: run_id.to_string(),
                node_id: node.id.clone(),
                capability_id: Some(capability.capability_id.clone()),
                assigned_to: defaults.assigned_to.clone(),
                role: defaults.role.clone(),
                instructions: defaults.instructions.clone(),
                status: HumanTaskStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.store
            .mark_node(run_id, &node.id, NodeStatePatch::status(NodeStatus::AwaitingHuman))
            .await?;
        state.pending_node_id = Some(node.id.clone());
        sink.emit(
            EventKind::NodeAwaitingHuman {
                capability_id: Some(capability.capability_id.clone()),
                assigned_to: defaults.assigned_to,
                role: defaults.role,
                instructions: defaults.instructions,
            },
            Some(&node.id),
        )
        .await;
        Ok(EngineSignal::AwaitingHumanInput {
            node_id: node.id.clone(),
            capability_id: Some(capability.capability_id.clone()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_capability_node(
        &self,
        run_id: &str,
        node: &FlexPlanNode,
        capability: Option<&CapabilityRecord>,
        policies: &NormalizedPolicies,
        context: &mut RunContext,
        state: &mut PendingState,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let (output, post_results) = match self
            .invoke_with_retries(run_id, node, capability, policies, context, state, sink, cancel)
            .await
        {
            Ok(pair) => pair,
            Err(EngineError::Capability { node_id, message }) => {
                sink.emit(
                    EventKind::NodeError {
                        message: message.clone(),
                    },
                    Some(&node_id),
                )
                .await;
                self.store
                    .mark_node(
                        run_id,
                        &node_id,
                        NodeStatePatch {
                            status: Some(NodeStatus::Failed),
                            error: Some(message.clone()),
                            completed_at: Some(Utc::now()),
                            ..NodeStatePatch::default()
                        },
                    )
                    .await?;
                return Err(EngineError::Capability { node_id, message });
            }
            Err(other) => return Err(other),
        };

        // Validate the node output against its contract before completing.
        let violations = validate_payload(&node.contracts.output, &output)?;
        if !violations.is_empty() {
            let errors: Vec<String> = violations.iter().map(ToString::to_string).collect();
            sink.emit(
                EventKind::ValidationError {
                    scope: ValidationScope::NodeOutput {
                        node_id: node.id.clone(),
                    }
                    .to_string(),
                    errors: errors.clone(),
                },
                Some(&node.id),
            )
            .await;
            sink.emit(
                EventKind::NodeError {
                    message: "output validation failed".into(),
                },
                Some(&node.id),
            )
            .await;
            self.store
                .mark_node(
                    run_id,
                    &node.id,
                    NodeStatePatch {
                        status: Some(NodeStatus::Failed),
                        output: Some(output),
                        error: Some(errors.join("; ")),
                        completed_at: Some(Utc::now()),
                        ..NodeStatePatch::default()
                    },
                )
                .await?;
            return Err(EngineSignal::ValidationFailed {
                scope: ValidationScope::NodeOutput {
                    node_id: node.id.clone(),
                },
                errors,
            }
            .into());
        }

        state.node_outputs.insert(node.id.clone(), output.clone());
        self.complete_node(run_id, node, Some(output), non_empty(post_results), state, sink)
            .await?;
        self.store
            .save_run_context(run_id, context.snapshot_value())
            .await?;

        // Runtime policies fire after the node's completion is visible.
        let projection = node_projection(node, context);
        if let Some(effect) = evaluate_runtime_effect(&policies.runtime, &projection)? {
            match effect {
                RuntimeEffect::Replan {
                    policy_id, trigger, ..
                } => {
                    sink.emit(
                        EventKind::PolicyTriggered {
                            policy_id: Some(policy_id.clone()),
                            trigger: trigger.kind.as_str().into(),
                            action: "replan".into(),
                            max_retries: None,
                            post_condition_results: None,
                        },
                        Some(&node.id),
                    )
                    .await;
                    return Err(EngineSignal::ReplanRequested {
                        reason: ReplanReason::PolicyTriggered,
                        policy_id: Some(policy_id),
                        trigger: serde_json::to_value(&trigger).ok(),
                        goal_results: vec![],
                        provisional_output: None,
                    }
                    .into());
                }
                RuntimeEffect::Action { policy } => {
                    sink.emit(
                        EventKind::PolicyTriggered {
                            policy_id: Some(policy.id.clone()),
                            trigger: policy.trigger.kind.as_str().into(),
                            action: policy.action.type_name().into(),
                            max_retries: None,
                            post_condition_results: None,
                        },
                        Some(&node.id),
                    )
                    .await;
                    match policy.action {
                        PolicyAction::Fail { message } => {
                            return Err(EngineSignal::RuntimePolicyFailure {
                                policy_id: policy.id,
                                message: message
                                    .unwrap_or_else(|| "run failed by runtime policy".to_string()),
                            }
                            .into());
                        }
                        PolicyAction::Emit { event, payload } => {
                            state.emits.push(EmitRecord {
                                event,
                                policy_id: policy.id,
                                payload,
                            });
                        }
                        PolicyAction::Replan { .. } => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Invoke the capability runtime, retrying under post-condition
    /// policies. Returns the accepted output and the final
    /// post-condition results.
    #[allow(clippy::too_many_arguments)]
    async fn invoke_with_retries(
        &self,
        run_id: &str,
        node: &FlexPlanNode,
        capability: Option<&CapabilityRecord>,
        policies: &NormalizedPolicies,
        context: &mut RunContext,
        state: &mut PendingState,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(Value, Vec<FacetCheckResult>), EngineError> {
        let post_conditions: Vec<FacetCondition> = capability
            .map(|c| c.post_conditions.clone())
            .unwrap_or_default();
        let mut guidance: Vec<String> = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let mut bundle = node.bundle.clone();
            bundle.run_context_snapshot = Some(context.snapshot_value());
            bundle.instructions.extend(guidance.iter().cloned());

            let response = self
                .runtime
                .invoke(CapabilityRequest {
                    run_id: run_id.to_string(),
                    node_id: node.id.clone(),
                    capability_id: node.capability_id.clone(),
                    attempt,
                    guidance: guidance.clone(),
                    bundle,
                })
                .await
                .map_err(|e| match e {
                    CapabilityError::Cancelled => EngineError::Cancelled,
                    other => EngineError::Capability {
                        node_id: node.id.clone(),
                        message: other.to_string(),
                    },
                })?;
            let output = response.output;
            context.update_from_node(node, &output);

            let results = check_post_conditions(&post_conditions, &output);
            let failed: Vec<&FacetCheckResult> = results
                .iter()
                .filter(|r| !r.satisfied || r.error.is_some())
                .collect();
            if failed.is_empty() {
                return Ok((output, results));
            }

            let capability_id = node.capability_id.as_deref().unwrap_or_default();
            let Some(policy) = find_post_condition_policy(&policies.runtime, capability_id) else {
                // No arbitration policy: default is fail.
                let message = format!(
                    "post-conditions failed for '{}': {}",
                    capability_id,
                    failed_paths(&failed).join(", ")
                );
                sink.emit(
                    EventKind::NodeError {
                        message: message.clone(),
                    },
                    Some(&node.id),
                )
                .await;
                self.mark_failed(run_id, &node.id, &message).await?;
                return Err(EngineSignal::RuntimePolicyFailure {
                    policy_id: "post_conditions".into(),
                    message,
                }
                .into());
            };

            let max_retries = policy.trigger.max_retries.unwrap_or(0);
            let attempts = state.attempts(&policy.id);
            if attempts < max_retries {
                state.bump_attempts(&policy.id);
                sink.emit(
                    EventKind::PolicyTriggered {
                        policy_id: Some(policy.id.clone()),
                        trigger: policy.trigger.kind.as_str().into(),
                        action: "retry".into(),
                        max_retries: Some(max_retries),
                        post_condition_results: Some(results.clone()),
                    },
                    Some(&node.id),
                )
                .await;
                guidance.push(format!(
                    "Previous post-condition failures: {}",
                    failed_paths(&failed).join(", ")
                ));
                attempt += 1;
                continue;
            }

            // Retry budget exhausted: interpret the policy action.
            sink.emit(
                EventKind::PolicyTriggered {
                    policy_id: Some(policy.id.clone()),
                    trigger: policy.trigger.kind.as_str().into(),
                    action: policy.action.type_name().into(),
                    max_retries: Some(max_retries),
                    post_condition_results: Some(results.clone()),
                },
                Some(&node.id),
            )
            .await;
            match &policy.action {
                PolicyAction::Replan { .. } => {
                    let message = format!(
                        "post-conditions still failing after {max_retries} retries"
                    );
                    sink.emit(
                        EventKind::NodeError {
                            message: message.clone(),
                        },
                        Some(&node.id),
                    )
                    .await;
                    self.mark_failed(run_id, &node.id, &message).await?;
                    return Err(EngineSignal::ReplanRequested {
                        reason: ReplanReason::PostConditionExhausted,
                        policy_id: Some(policy.id.clone()),
                        trigger: serde_json::to_value(&policy.trigger).ok(),
                        goal_results: vec![],
                        provisional_output: None,
                    }
                    .into());
                }
                PolicyAction::Fail { message } => {
                    let message = message.clone().unwrap_or_else(|| {
                        format!("post-conditions still failing after {max_retries} retries")
                    });
                    sink.emit(
                        EventKind::NodeError {
                            message: message.clone(),
                        },
                        Some(&node.id),
                    )
                    .await;
                    self.mark_failed(run_id, &node.id, &message).await?;
                    return Err(EngineSignal::RuntimePolicyFailure {
                        policy_id: policy.id.clone(),
                        message,
                    }
                    .into());
                }
                PolicyAction::Emit { event, payload } => {
                    // The node terminates normally; the emit rides the
                    // terminal event.
                    state.emits.push(EmitRecord {
                        event: event.clone(),
                        policy_id: policy.id.clone(),
                        payload: payload.clone(),
                    });
                    return Ok((output, results));
                }
            }
        }
    }

    async fn complete_node(
        &self,
        run_id: &str,
        node: &FlexPlanNode,
        output: Option<Value>,
        post_condition_results: Option<Vec<FacetCheckResult>>,
        state: &mut PendingState,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        self.store
            .mark_node(
                run_id,
                &node.id,
                NodeStatePatch {
                    status: Some(NodeStatus::Completed),
                    output: output.clone(),
                    completed_at: Some(Utc::now()),
                    ..NodeStatePatch::default()
                },
            )
            .await?;
        state.mark_completed(&node.id);
        sink.emit(
            EventKind::NodeComplete {
                label: node.label.clone(),
                kind: node.kind,
                capability_id: node.capability_id.clone(),
                output,
                routing_result: None,
                post_condition_results,
            },
            Some(&node.id),
        )
        .await;
        Ok(())
    }

    async fn mark_failed(
        &self,
        run_id: &str,
        node_id: &str,
        message: &str,
    ) -> Result<(), EngineError> {
        self.store
            .mark_node(
                run_id,
                node_id,
                NodeStatePatch {
                    status: Some(NodeStatus::Failed),
                    error: Some(message.to_string()),
                    completed_at: Some(Utc::now()),
                    ..NodeStatePatch::default()
                },
            )
            .await?;
        Ok(())
    }
}

fn non_empty(results: Vec<FacetCheckResult>) -> Option<Vec<FacetCheckResult>> {
    if results.is_empty() {
        None
    } else {
        Some(results)
    }
}

fn failed_paths(failed: &[&FacetCheckResult]) -> Vec<String> {
    failed.iter().map(|r| r.path.clone()).collect()
}

/// Resolve a JSON pointer, treating `""` and `"/"` as the whole value.
fn resolve_pointer<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() || path == "/" {
        return Some(value);
    }
    value.pointer(path)
}

/// Evaluate post-conditions against the facet snippet each one names
/// inside the node's output.
fn check_post_conditions(conditions: &[FacetCondition], output: &Value) -> Vec<FacetCheckResult> {
    conditions
        .iter()
        .map(|condition| {
            // The snippet base: the named output property when present,
            // otherwise the whole output (single-facet passthrough).
            let base = output.get(&condition.facet).unwrap_or(output);
            evaluate_facet_condition(condition, base)
        })
        .collect()
}

/// Evaluate goal conditions against the run-context facet store.
fn check_goal_conditions(
    conditions: &[FacetCondition],
    context: &RunContext,
) -> Vec<FacetCheckResult> {
    conditions
        .iter()
        .map(|condition| match context.get_facet(&condition.facet) {
            None => FacetCheckResult {
                facet: condition.facet.clone(),
                path: condition.path.clone(),
                expression: expression_of(condition),
                satisfied: false,
                observed_value: None,
                error: Some(format!("facet '{}' not present", condition.facet)),
            },
            Some(value) => evaluate_facet_condition(condition, value),
        })
        .collect()
}

fn evaluate_facet_condition(condition: &FacetCondition, base: &Value) -> FacetCheckResult {
    let observed = resolve_pointer(base, &condition.path);
    let expression = expression_of(condition);
    match observed {
        None => FacetCheckResult {
            facet: condition.facet.clone(),
            path: condition.path.clone(),
            expression,
            satisfied: false,
            observed_value: None,
            error: Some(format!("path '{}' not found", condition.path)),
        },
        Some(observed) => match evaluate_condition(&condition.condition.json_logic, base) {
            Ok(evaluation) => FacetCheckResult {
                facet: condition.facet.clone(),
                path: condition.path.clone(),
                expression,
                satisfied: evaluation.result,
                observed_value: Some(observed.clone()),
                error: None,
            },
            Err(e) => FacetCheckResult {
                facet: condition.facet.clone(),
                path: condition.path.clone(),
                expression,
                satisfied: false,
                observed_value: Some(observed.clone()),
                error: Some(e.to_string()),
            },
        },
    }
}

fn expression_of(condition: &FacetCondition) -> String {
    condition
        .condition
        .canonical_dsl
        .clone()
        .or_else(|| condition.condition.dsl.clone())
        .unwrap_or_else(|| condition.condition.json_logic.to_string())
}

/// Payload routing conditions evaluate against.
fn routing_payload(node: &FlexPlanNode, context: &RunContext) -> Value {
    let snapshot = context.snapshot_value();
    let mut metadata: Map<String, Value> = node
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    metadata.insert("runContextSnapshot".into(), snapshot);
    json!({
        "metadata": metadata,
        "facets": facet_values(context),
    })
}

/// Projection `onNodeComplete` policies evaluate against.
fn node_projection(node: &FlexPlanNode, context: &RunContext) -> Value {
    let mut metadata: Map<String, Value> = node
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    metadata.insert("runContextSnapshot".into(), context.snapshot_value());
    json!({
        "id": node.id,
        "capabilityId": node.capability_id,
        "kind": node.kind,
        "label": node.label,
        "metadata": metadata,
        "facets": facet_values(context),
    })
}

fn facet_values(context: &RunContext) -> Value {
    let snapshot = context.snapshot();
    Value::Object(
        snapshot
            .facets
            .into_iter()
            .map(|(name, state)| (name, state.value))
            .collect(),
    )
}
