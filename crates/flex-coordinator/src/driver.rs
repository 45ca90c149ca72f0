// SPDX-License-Identifier: MIT OR Apache-2.0
//! The spawned per-run task: one cooperative task per run, serialized
//! node execution, bounded planner attempts, and the re-plan loop.

use crate::{
    AcceptOptions, CoordinatorConfig, CoordinatorError, ResumeSubmission, RunOutcome, to_json,
};
use chrono::Utc;
use flex_context::RunContext;
use flex_contract::{FacetCatalog, contract_summary, validate_payload};
use flex_core::{
    CompleteStatus, EmitRecord, EngineSignal, EventKind, FacetCheckResult, FlexPlan,
    HitlRequestRecord, HitlRequestStatus, NodeStatus, PendingState, PlanNodeSummary, PlanPhase,
    PlanSummary, ReplanReason, ReplanSummary, RunStatus, TaskEnvelope, schema_hash,
};
use flex_engine::{
    CancellationToken, EngineError, EventSink, ExecutionEngine, HitlService,
};
use flex_planner::{
    GraphContext, PlanBuildInput, Planner, PlannerError, PlannerRequest, build_plan,
    draft_with_timeout, validate_draft,
};
use flex_policy::{NormalizedPolicies, normalize_policies};
use flex_registry::CapabilityRegistry;
use flex_store::{
    FlexRunRecord, HumanTaskStatus, NodeStatePatch, PlanSnapshotRecord, RunStore,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A step either fails the whole task (infrastructure) or just the run
/// (terminal `failed`).
enum StepError {
    Fatal(CoordinatorError),
    Terminal(String),
}

impl From<CoordinatorError> for StepError {
    fn from(e: CoordinatorError) -> Self {
        Self::Fatal(e)
    }
}

impl From<flex_store::StoreError> for StepError {
    fn from(e: flex_store::StoreError) -> Self {
        Self::Fatal(e.into())
    }
}

pub(crate) struct RunDriver {
    pub store: Arc<dyn RunStore>,
    pub registry: Arc<dyn CapabilityRegistry>,
    pub planner: Arc<dyn Planner>,
    pub hitl: Arc<dyn HitlService>,
    pub catalog: Arc<FacetCatalog>,
    pub engine: Arc<ExecutionEngine>,
    pub config: CoordinatorConfig,
    pub run_id: String,
    pub envelope: TaskEnvelope,
    pub policies: NormalizedPolicies,
    pub options: AcceptOptions,
    pub existing: Option<FlexRunRecord>,
    pub sink: EventSink,
    pub cancel: CancellationToken,
}

impl RunDriver {
    pub(crate) async fn run(mut self) -> Result<RunOutcome, CoordinatorError> {
        let resumable = self
            .existing
            .as_ref()
            .is_some_and(|r| r.status.is_resumable());
        let result = if resumable {
            let record = self.existing.take().expect("resumable record");
            self.resume(record).await
        } else {
            self.fresh().await
        };
        if let Err(e) = &result {
            error!(target: "flex.coordinator", run = %self.run_id, error = %e, "run task failed");
            self.sink
                .emit(
                    EventKind::Log {
                        level: "error".into(),
                        message: e.to_string(),
                    },
                    None,
                )
                .await;
        }
        result
    }

    /// Whether the current call gates execution behind operator approval.
    fn requires_hitl(&self) -> bool {
        self.policies.requires_hitl_approval
            || self.envelope.constraints.requires_hitl_approval == Some(true)
    }

    // ── New-run path ────────────────────────────────────────────────

    async fn fresh(&mut self) -> Result<RunOutcome, CoordinatorError> {
        let envelope = self.envelope.clone();
        let policies = self.policies.clone();
        self.sink
            .emit(
                EventKind::Start {
                    objective: envelope.objective.clone(),
                },
                None,
            )
            .await;

        let now = Utc::now();
        self.store
            .create_or_update_run(FlexRunRecord {
                run_id: self.run_id.clone(),
                thread_id: envelope
                    .metadata
                    .thread_id
                    .clone()
                    .or_else(|| envelope.constraints.thread_id.clone()),
                status: RunStatus::Pending,
                objective: Some(envelope.objective.clone()),
                envelope: to_json(&envelope)?,
                schema_hash: Some(
                    schema_hash(&envelope.output_contract)
                        .map_err(|e| CoordinatorError::Internal(e.to_string()))?,
                ),
                metadata: Some(to_json(&envelope.metadata)?),
                context_snapshot: None,
                result: None,
                plan_version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut context = RunContext::new();
        context.seed_inputs(&envelope.inputs);
        let state = PendingState::default();

        let plan = match self
            .request_plan(PlanPhase::Initial, None, &envelope, &policies)
            .await
        {
            Ok(plan) => plan,
            Err(StepError::Fatal(e)) => return Err(e),
            Err(StepError::Terminal(message)) => {
                return self.fail_run(&context, message, vec![]).await;
            }
        };
        self.persist_plan(&plan, &context, &state, &envelope).await?;
        self.sink.set_plan_version(plan.version);
        self.emit_plan_generated(&plan, &state).await;

        self.store
            .update_status(&self.run_id, RunStatus::Running)
            .await?;
        if self.requires_hitl() {
            return self.park_for_hitl(&plan, &context, &state, &envelope).await;
        }
        self.drive(plan, context, state, envelope, policies).await
    }

    // ── Resume path ─────────────────────────────────────────────────

    async fn resume(&mut self, record: FlexRunRecord) -> Result<RunOutcome, CoordinatorError> {
        // The persisted envelope is the run's contract; only the HITL
        // gate is read from the incoming call.
        let envelope: TaskEnvelope = serde_json::from_value(record.envelope.clone())
            .map_err(|e| CoordinatorError::Internal(format!("persisted envelope: {e}")))?;
        let policies = normalize_policies(&envelope.policies)?;

        self.sink
            .emit(
                EventKind::Start {
                    objective: envelope.objective.clone(),
                },
                None,
            )
            .await;

        let snapshot = self
            .store
            .load_plan_snapshot(&self.run_id, None)
            .await?
            .ok_or_else(|| {
                CoordinatorError::Resume(format!("run '{}' has no plan snapshot", self.run_id))
            })?;
        if snapshot.plan_version != record.plan_version {
            return Err(CoordinatorError::Resume(format!(
                "stale snapshot: run is at plan version {}, latest snapshot is {}",
                record.plan_version, snapshot.plan_version
            )));
        }
        let plan: FlexPlan = serde_json::from_value(snapshot.snapshot.clone())
            .map_err(|e| CoordinatorError::Internal(format!("plan snapshot: {e}")))?;
        let mut state = snapshot.pending_state.clone().unwrap_or_default();
        let mut context = match record.context_snapshot.clone() {
            Some(value) => RunContext::from_snapshot(
                serde_json::from_value(value)
                    .map_err(|e| CoordinatorError::Internal(format!("context snapshot: {e}")))?,
            ),
            None => serde_json::from_value(snapshot.facet_snapshot.clone())
                .map(RunContext::from_snapshot)
                .unwrap_or_default(),
        };
        self.sink.set_plan_version(plan.version);
        info!(
            target: "flex.coordinator",
            run = %self.run_id,
            plan_version = plan.version,
            completed = state.completed_node_ids.len(),
            "resuming run"
        );

        self.resolve_pending_hitl(&mut state).await?;

        if record.status == RunStatus::AwaitingHuman {
            let submission = self
                .options
                .resume_submission
                .clone()
                .expect("submission checked at accept");
            if let Some(outcome) = self
                .apply_submission(&plan, &mut context, &mut state, submission)
                .await?
            {
                return Ok(outcome);
            }
        }

        self.emit_plan_generated(&plan, &state).await;

        if self.requires_hitl() {
            return self.park_for_hitl(&plan, &context, &state, &envelope).await;
        }
        self.store
            .update_status(&self.run_id, RunStatus::Running)
            .await?;
        self.drive(plan, context, state, envelope, policies).await
    }

    /// Resolve every pending HITL request; at most one `hitl_resolved`
    /// per request id per run invocation.
    async fn resolve_pending_hitl(
        &self,
        state: &mut PendingState,
    ) -> Result<(), CoordinatorError> {
        let mut emitted: HashSet<String> = HashSet::new();
        for request in self.hitl.pending_for_run(&self.run_id).await? {
            let resolution = json!({"resumed": true});
            self.hitl
                .resolve(&request.id, HitlRequestStatus::Resolved, Some(resolution.clone()))
                .await?;
            // Clarifications count toward the per-run limit; denied ones
            // would not, but a resume approves what it resolves.
            if request
                .payload
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind == "clarification")
            {
                state.clarification_count += 1;
                if state.clarification_count > self.config.max_clarifications {
                    warn!(
                        target: "flex.coordinator",
                        run = %self.run_id,
                        count = state.clarification_count,
                        "clarification limit exceeded"
                    );
                }
            }
            if emitted.insert(request.id.clone()) {
                self.sink
                    .emit(
                        EventKind::HitlResolved {
                            request_id: request.id.clone(),
                            resolution: Some(resolution),
                        },
                        None,
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Apply an `awaiting_human` submission. Returns `Some(outcome)`
    /// when the submission terminates the run (decline or invalid
    /// output).
    async fn apply_submission(
        &self,
        plan: &FlexPlan,
        context: &mut RunContext,
        state: &mut PendingState,
        submission: ResumeSubmission,
    ) -> Result<Option<RunOutcome>, CoordinatorError> {
        let node_id = submission
            .node_id
            .clone()
            .or_else(|| state.pending_node_id.clone())
            .ok_or_else(|| {
                CoordinatorError::Resume("run has no pending human-assigned node".into())
            })?;
        let node = plan
            .node(&node_id)
            .ok_or_else(|| {
                CoordinatorError::Resume(format!("node '{node_id}' is not part of the plan"))
            })?
            .clone();

        if submission.decline {
            let reason = submission
                .reason
                .clone()
                .unwrap_or_else(|| "assignee declined the task".into());
            self.store
                .resolve_human_task(&self.run_id, &node_id, HumanTaskStatus::Declined)
                .await?;
            self.store
                .mark_node(
                    &self.run_id,
                    &node_id,
                    NodeStatePatch {
                        status: Some(NodeStatus::Failed),
                        error: Some(reason.clone()),
                        completed_at: Some(Utc::now()),
                        ..NodeStatePatch::default()
                    },
                )
                .await?;
            self.sink
                .emit(
                    EventKind::NodeError {
                        message: reason.clone(),
                    },
                    Some(&node_id),
                )
                .await;
            let outcome = self
                .fail_run(
                    context,
                    format!("human task on '{node_id}' declined: {reason}"),
                    state.emits.clone(),
                )
                .await?;
            return Ok(Some(outcome));
        }

        let output = submission.output.clone().ok_or_else(|| {
            CoordinatorError::Resume("resume submission must carry an output".into())
        })?;
        let violations = validate_payload(&node.contracts.output, &output)
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
        if !violations.is_empty() {
            let errors: Vec<String> = violations.iter().map(ToString::to_string).collect();
            self.sink
                .emit(
                    EventKind::ValidationError {
                        scope: format!("node:{node_id}"),
                        errors: errors.clone(),
                    },
                    Some(&node_id),
                )
                .await;
            let outcome = self
                .fail_run(
                    context,
                    format!("human submission for '{node_id}' failed validation: {}", errors.join("; ")),
                    state.emits.clone(),
                )
                .await?;
            return Ok(Some(outcome));
        }

        context.update_from_node(&node, &output);
        self.store
            .mark_node(
                &self.run_id,
                &node_id,
                NodeStatePatch {
                    status: Some(NodeStatus::Completed),
                    output: Some(output.clone()),
                    completed_at: Some(Utc::now()),
                    ..NodeStatePatch::default()
                },
            )
            .await?;
        self.store
            .resolve_human_task(&self.run_id, &node_id, HumanTaskStatus::Submitted)
            .await?;
        state.mark_completed(&node_id);
        state.pending_node_id = None;
        self.sink
            .emit(
                EventKind::NodeComplete {
                    label: node.label.clone(),
                    kind: node.kind,
                    capability_id: node.capability_id.clone(),
                    output: Some(output),
                    routing_result: None,
                    post_condition_results: None,
                },
                Some(&node_id),
            )
            .await;
        Ok(None)
    }

    // ── The execution / re-plan loop ────────────────────────────────

    async fn drive(
        &mut self,
        mut plan: FlexPlan,
        mut context: RunContext,
        mut state: PendingState,
        envelope: TaskEnvelope,
        policies: NormalizedPolicies,
    ) -> Result<RunOutcome, CoordinatorError> {
        let mut replans: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(&context).await;
            }
            let result = self
                .engine
                .execute(flex_engine::ExecuteArgs {
                    plan: &plan,
                    envelope: &envelope,
                    policies: &policies,
                    context: &mut context,
                    state: &mut state,
                    sink: &self.sink,
                    cancel: &self.cancel,
                })
                .await;

            match result {
                Ok(outcome) => {
                    return self
                        .complete(&plan, &context, &state, &envelope, outcome)
                        .await;
                }
                Err(EngineError::Signal(signal)) => match signal {
                    EngineSignal::ReplanRequested {
                        reason, policy_id, ..
                    } => {
                        replans += 1;
                        match self
                            .rebuild_plan(
                                &plan, &context, &state, reason, policy_id, vec![], replans,
                                &envelope, &policies,
                            )
                            .await
                        {
                            Ok(new_plan) => {
                                plan = new_plan;
                            }
                            Err(StepError::Fatal(e)) => return Err(e),
                            Err(StepError::Terminal(message)) => {
                                return self
                                    .fail_run(&context, message, state.emits.clone())
                                    .await;
                            }
                        }
                    }
                    EngineSignal::GoalConditionFailed {
                        results,
                        provisional_output,
                        ..
                    } => {
                        replans += 1;
                        if let Some(provisional) = provisional_output {
                            self.store
                                .record_pending_result(&self.run_id, provisional)
                                .await?;
                        }
                        match self
                            .rebuild_plan(
                                &plan,
                                &context,
                                &state,
                                ReplanReason::GoalConditionFailed,
                                None,
                                results,
                                replans,
                                &envelope,
                                &policies,
                            )
                            .await
                        {
                            Ok(new_plan) => {
                                plan = new_plan;
                            }
                            Err(StepError::Fatal(e)) => return Err(e),
                            Err(StepError::Terminal(message)) => {
                                return self
                                    .fail_run(&context, message, state.emits.clone())
                                    .await;
                            }
                        }
                    }
                    EngineSignal::HitlPause { .. } | EngineSignal::RunPaused { .. } => {
                        return self.park_for_hitl(&plan, &context, &state, &envelope).await;
                    }
                    EngineSignal::AwaitingHumanInput { node_id, .. } => {
                        return self
                            .park_for_human(&plan, &context, &state, &envelope, node_id)
                            .await;
                    }
                    EngineSignal::RuntimePolicyFailure { policy_id, message } => {
                        return self
                            .fail_run(
                                &context,
                                format!("runtime policy '{policy_id}' failed the run: {message}"),
                                state.emits.clone(),
                            )
                            .await;
                    }
                    EngineSignal::ValidationFailed { scope, errors } => {
                        return self
                            .fail_run(
                                &context,
                                format!("validation failed for {scope}: {}", errors.join("; ")),
                                state.emits.clone(),
                            )
                            .await;
                    }
                },
                Err(EngineError::Cancelled) => return self.cancelled(&context).await,
                Err(other) => {
                    return self
                        .fail_run(&context, other.to_string(), state.emits.clone())
                        .await;
                }
            }
        }
    }

    /// Checkpoint, request a replacement plan, persist it, and emit the
    /// `plan_generated` + `plan_updated` pair.
    #[allow(clippy::too_many_arguments)]
    async fn rebuild_plan(
        &self,
        previous: &FlexPlan,
        context: &RunContext,
        state: &PendingState,
        reason: ReplanReason,
        policy_id: Option<String>,
        goal_results: Vec<FacetCheckResult>,
        replans: u32,
        envelope: &TaskEnvelope,
        policies: &NormalizedPolicies,
    ) -> Result<FlexPlan, StepError> {
        if replans > self.config.max_replans {
            return Err(StepError::Terminal(format!(
                "re-plan limit of {} exceeded",
                self.config.max_replans
            )));
        }
        // Persist what the engine accomplished before planning again.
        self.store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await
            .map_err(CoordinatorError::from)?;
        self.persist_plan(previous, context, state, envelope).await?;

        let graph_context = GraphContext {
            previous_plan_version: previous.version,
            completed_node_ids: state.completed_node_ids.clone(),
            facet_snapshot: context.snapshot_value(),
            replan_reason: Some(reason.as_str().to_string()),
            goal_results,
        };
        let mut plan = self
            .request_plan(PlanPhase::Replan, Some(graph_context), envelope, policies)
            .await?;
        if plan.version <= previous.version {
            // Monotonicity is the coordinator's responsibility.
            plan.version = previous.version + 1;
        }
        self.persist_plan(&plan, context, state, envelope).await?;
        self.sink.set_plan_version(plan.version);
        self.emit_plan_generated(&plan, state).await;
        self.sink
            .emit(
                EventKind::PlanUpdated {
                    plan: self.plan_summary(&plan, state),
                    replan: ReplanSummary {
                        reason: reason.as_str().to_string(),
                        policy_id,
                    },
                },
                None,
            )
            .await;
        Ok(plan)
    }

    /// Request a plan with bounded attempts for one phase.
    async fn request_plan(
        &self,
        phase: PlanPhase,
        graph_context: Option<GraphContext>,
        envelope: &TaskEnvelope,
        policies: &NormalizedPolicies,
    ) -> Result<FlexPlan, StepError> {
        let request = PlannerRequest {
            envelope: envelope.clone(),
            policies: policies.canonical.clone(),
            capabilities: self.registry.planner_snapshot(),
            graph_context: graph_context.clone(),
        };
        let attempts = self.config.planner_attempts_per_phase;
        let mut last_errors: Vec<String> = Vec::new();
        for attempt in 1..=attempts {
            self.sink
                .emit(EventKind::PlanRequested { attempt, phase }, None)
                .await;
            let built = match draft_with_timeout(
                self.planner.as_ref(),
                request.clone(),
                self.config.planner_timeout,
            )
            .await
            .and_then(|draft| {
                validate_draft(&draft)?;
                Ok(draft)
            }) {
                Ok(draft) => build_plan(
                    &PlanBuildInput {
                        run_id: &self.run_id,
                        envelope,
                        policies,
                        registry: self.registry.as_ref(),
                        catalog: &self.catalog,
                        graph_context: graph_context.as_ref(),
                    },
                    draft,
                )
                .map_err(|e| vec![e.to_string()]),
                Err(PlannerError::DraftRejected { errors }) => Err(errors),
                Err(e) => Err(vec![e.to_string()]),
            };
            match built {
                Ok(plan) => {
                    debug!(
                        target: "flex.coordinator",
                        run = %self.run_id,
                        version = plan.version,
                        nodes = plan.nodes.len(),
                        "plan built"
                    );
                    return Ok(plan);
                }
                Err(errors) => {
                    warn!(
                        target: "flex.coordinator",
                        run = %self.run_id,
                        attempt,
                        errors = ?errors,
                        "planner draft rejected"
                    );
                    self.sink
                        .emit(
                            EventKind::PlanRejected {
                                attempt,
                                errors: errors.clone(),
                            },
                            None,
                        )
                        .await;
                    last_errors = errors;
                }
            }
        }
        Err(StepError::Terminal(format!(
            "planner failed after {attempts} attempts: {}",
            last_errors.join("; ")
        )))
    }

    // ── Terminal & pause transitions ────────────────────────────────

    async fn complete(
        &self,
        plan: &FlexPlan,
        context: &RunContext,
        state: &PendingState,
        envelope: &TaskEnvelope,
        outcome: flex_engine::EngineOutcome,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await?;
        self.persist_plan(plan, context, state, envelope).await?;
        self.store
            .record_result(
                &self.run_id,
                outcome.final_output.clone(),
                Some(outcome.goal_results.clone()),
            )
            .await?;
        self.store
            .update_status(&self.run_id, RunStatus::Completed)
            .await?;
        let status = if outcome.emits.is_empty() {
            CompleteStatus::Completed
        } else {
            CompleteStatus::PolicyAction
        };
        self.sink
            .emit(
                EventKind::Complete {
                    status,
                    output: Some(outcome.final_output.clone()),
                    error: None,
                    emits: outcome.emits.clone(),
                    goal_condition_results: if outcome.goal_results.is_empty() {
                        None
                    } else {
                        Some(outcome.goal_results.clone())
                    },
                },
                None,
            )
            .await;
        info!(target: "flex.coordinator", run = %self.run_id, "run completed");
        Ok(RunOutcome {
            status: RunStatus::Completed,
            output: Some(outcome.final_output),
            goal_results: outcome.goal_results,
            hitl_request_id: None,
            pending_node_id: None,
        })
    }

    async fn fail_run(
        &self,
        context: &RunContext,
        message: String,
        emits: Vec<EmitRecord>,
    ) -> Result<RunOutcome, CoordinatorError> {
        // Terminal guarantees: context persisted, status updated, one
        // `complete` — each best-effort so a storage hiccup cannot
        // swallow the event.
        if let Err(e) = self
            .store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await
        {
            warn!(target: "flex.coordinator", run = %self.run_id, error = %e, "context persist failed");
        }
        if let Err(e) = self
            .store
            .update_status(&self.run_id, RunStatus::Failed)
            .await
        {
            warn!(target: "flex.coordinator", run = %self.run_id, error = %e, "status update failed");
        }
        self.sink
            .emit(
                EventKind::Complete {
                    status: CompleteStatus::Failed,
                    output: None,
                    error: Some(message.clone()),
                    emits,
                    goal_condition_results: None,
                },
                None,
            )
            .await;
        info!(target: "flex.coordinator", run = %self.run_id, %message, "run failed");
        Ok(RunOutcome {
            status: RunStatus::Failed,
            output: None,
            goal_results: vec![],
            hitl_request_id: None,
            pending_node_id: None,
        })
    }

    async fn cancelled(&self, context: &RunContext) -> Result<RunOutcome, CoordinatorError> {
        let reason = self
            .cancel
            .reason()
            .map_or("cancelled", |r| r.description());
        if let Err(e) = self
            .store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await
        {
            warn!(target: "flex.coordinator", run = %self.run_id, error = %e, "context persist failed");
        }
        self.store
            .update_status(&self.run_id, RunStatus::Cancelled)
            .await?;
        // Cancelled runs end without a `complete` frame; the stream just
        // carries the log line (when anyone is still listening).
        self.sink
            .emit(
                EventKind::Log {
                    level: "info".into(),
                    message: format!("run cancelled: {reason}"),
                },
                None,
            )
            .await;
        Ok(RunOutcome {
            status: RunStatus::Cancelled,
            output: None,
            goal_results: vec![],
            hitl_request_id: None,
            pending_node_id: None,
        })
    }

    async fn park_for_hitl(
        &self,
        plan: &FlexPlan,
        context: &RunContext,
        state: &PendingState,
        envelope: &TaskEnvelope,
    ) -> Result<RunOutcome, CoordinatorError> {
        let request = self
            .hitl
            .create_request(HitlRequestRecord {
                id: Uuid::new_v4().to_string(),
                run_id: self.run_id.clone(),
                origin_agent: "coordinator".into(),
                payload: json!({"kind": "plan_approval", "planVersion": plan.version}),
                created_at: Utc::now(),
                pending_node_id: state.pending_node_id.clone(),
                operator_prompt: "Review and approve the generated plan before execution resumes."
                    .into(),
                contract_summary: Some(contract_summary(&envelope.output_contract)),
                status: HitlRequestStatus::Pending,
                resolution: None,
            })
            .await?;
        self.sink
            .emit(
                EventKind::HitlRequest {
                    request: request.clone(),
                },
                None,
            )
            .await;
        self.store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await?;
        self.persist_plan(plan, context, state, envelope).await?;
        self.store
            .update_status(&self.run_id, RunStatus::AwaitingHitl)
            .await?;
        info!(target: "flex.coordinator", run = %self.run_id, request = %request.id, "run awaiting HITL review");
        Ok(RunOutcome {
            status: RunStatus::AwaitingHitl,
            output: None,
            goal_results: vec![],
            hitl_request_id: Some(request.id),
            pending_node_id: state.pending_node_id.clone(),
        })
    }

    async fn park_for_human(
        &self,
        plan: &FlexPlan,
        context: &RunContext,
        state: &PendingState,
        envelope: &TaskEnvelope,
        node_id: String,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.store
            .save_run_context(&self.run_id, context.snapshot_value())
            .await?;
        let provisional = context.compose_final_output(&envelope.output_contract, Some(plan));
        self.store
            .record_pending_result(&self.run_id, provisional)
            .await?;
        self.persist_plan(plan, context, state, envelope).await?;
        self.store
            .update_status(&self.run_id, RunStatus::AwaitingHuman)
            .await?;
        info!(target: "flex.coordinator", run = %self.run_id, node = %node_id, "run awaiting human input");
        Ok(RunOutcome {
            status: RunStatus::AwaitingHuman,
            output: None,
            goal_results: vec![],
            hitl_request_id: None,
            pending_node_id: Some(node_id),
        })
    }

    // ── Persistence & event helpers ─────────────────────────────────

    /// Write (or rewrite) the snapshot row for `plan.version`, carrying
    /// the current pending state.
    async fn persist_plan(
        &self,
        plan: &FlexPlan,
        context: &RunContext,
        state: &PendingState,
        envelope: &TaskEnvelope,
    ) -> Result<(), CoordinatorError> {
        let now = Utc::now();
        self.store
            .save_plan_snapshot(PlanSnapshotRecord {
                run_id: self.run_id.clone(),
                plan_version: plan.version,
                snapshot: to_json(plan)?,
                facet_snapshot: context.snapshot_value(),
                schema_hash: schema_hash(&envelope.output_contract)
                    .map_err(|e| CoordinatorError::Internal(e.to_string()))?,
                pending_node_ids: plan
                    .nodes
                    .iter()
                    .filter(|n| !state.is_completed(&n.id))
                    .map(|n| n.id.clone())
                    .collect(),
                pending_state: Some(state.clone()),
                edges: Some(to_json(&plan.edges)?),
                plan_metadata: Some(to_json(&plan.metadata)?),
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }

    async fn emit_plan_generated(&self, plan: &FlexPlan, state: &PendingState) {
        self.sink
            .emit(
                EventKind::PlanGenerated {
                    plan: self.plan_summary(plan, state),
                },
                None,
            )
            .await;
    }

    fn plan_summary(&self, plan: &FlexPlan, state: &PendingState) -> PlanSummary {
        PlanSummary {
            run_id: plan.run_id.clone(),
            version: plan.version,
            nodes: plan
                .nodes
                .iter()
                .map(|node| PlanNodeSummary {
                    id: node.id.clone(),
                    capability_id: node.capability_id.clone(),
                    label: node.label.clone(),
                    kind: node.kind,
                    status: if state.is_completed(&node.id) {
                        NodeStatus::Completed
                    } else {
                        NodeStatus::Pending
                    },
                    derived_capability: node
                        .metadata
                        .get("derivedCapability")
                        .and_then(Value::as_bool)
                        .filter(|derived| *derived),
                    metadata: node.metadata.clone(),
                })
                .collect(),
            metadata: plan.metadata.clone(),
        }
    }
}
