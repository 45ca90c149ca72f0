// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-coordinator
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod driver;

use driver::RunDriver;
use flex_core::{
    EnvelopeError, EventFrame, FacetCheckResult, RunStatus, TaskEnvelope, validate_envelope,
};
use flex_contract::FacetCatalog;
use flex_engine::{
    CancellationToken, CapabilityRuntime, EventSink, ExecutionEngine, HitlError, HitlService,
};
use flex_planner::Planner;
use flex_policy::{PolicyError, normalize_policies};
use flex_registry::CapabilityRegistry;
use flex_store::{RunStore, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

/// Knobs of the coordinator, validated at construction.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-call planner timeout.
    pub planner_timeout: Duration,
    /// Planner attempts per phase (initial, each re-plan).
    pub planner_attempts_per_phase: u32,
    /// Event channel capacity per run.
    pub event_capacity: usize,
    /// Re-plan cycles after which a run fails instead of looping.
    pub max_replans: u32,
    /// HITL clarifications counted per run before new ones are declined.
    pub max_clarifications: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            planner_timeout: flex_planner::DEFAULT_PLANNER_TIMEOUT,
            planner_attempts_per_phase: 2,
            event_capacity: flex_engine::sink::DEFAULT_CAPACITY,
            max_replans: 8,
            max_clarifications: 3,
        }
    }
}

impl CoordinatorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] for zero attempt counts or a
    /// zero-length timeout.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.planner_attempts_per_phase == 0 {
            return Err(CoordinatorError::Config(
                "planner_attempts_per_phase must be at least 1".into(),
            ));
        }
        if self.planner_timeout.is_zero() {
            return Err(CoordinatorError::Config(
                "planner_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Errors surfaced by `accept` and the run task.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The envelope failed validation; nothing was persisted.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The policy payload failed normalization; nothing was persisted.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A resume request could not be honored.
    #[error("cannot resume: {0}")]
    Resume(String),

    /// A persistence call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HITL service failed.
    #[error(transparent)]
    Hitl(#[from] HitlError),

    /// Serialization of internal state failed.
    #[error("internal serialization error: {0}")]
    Internal(String),
}

/// A submission resuming a human-assigned node.
#[derive(Debug, Clone, Default)]
pub struct ResumeSubmission {
    /// Node being answered; defaults to the run's pending node.
    pub node_id: Option<String>,
    /// The produced output; required unless declining.
    pub output: Option<Value>,
    /// Decline the assignment instead of submitting output.
    pub decline: bool,
    /// Reason attached to a decline.
    pub reason: Option<String>,
}

/// Options accompanying an `accept` call.
#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    /// Required when resuming an `awaiting_human` run.
    pub resume_submission: Option<ResumeSubmission>,
    /// Cancellation token; a fresh one is created when absent.
    pub cancel: Option<CancellationToken>,
}

/// Terminal (or paused) outcome of one run invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The status the run was left in.
    pub status: RunStatus,
    /// Final output, for completed runs.
    pub output: Option<Value>,
    /// Goal outcomes recorded with the result.
    pub goal_results: Vec<FacetCheckResult>,
    /// HITL request the run parked on, for `awaiting_hitl`.
    pub hitl_request_id: Option<String>,
    /// Node the run parked on, for `awaiting_human`.
    pub pending_node_id: Option<String>,
}

/// Handle to an accepted run: id, event stream, and outcome future.
pub struct RunHandle {
    /// The resolved run id.
    pub run_id: String,
    /// Stream of lifecycle events.
    pub events: ReceiverStream<EventFrame>,
    /// Resolves when the run reaches a terminal or paused state.
    pub outcome: JoinHandle<Result<RunOutcome, CoordinatorError>>,
    /// Token cancelling the run cooperatively.
    pub cancel: CancellationToken,
}

/// The top-level state machine driving runs from accept to terminal.
pub struct RunCoordinator {
    store: Arc<dyn RunStore>,
    registry: Arc<dyn CapabilityRegistry>,
    planner: Arc<dyn Planner>,
    hitl: Arc<dyn HitlService>,
    catalog: Arc<FacetCatalog>,
    engine: Arc<ExecutionEngine>,
    config: CoordinatorConfig,
}

impl RunCoordinator {
    /// Wire a coordinator over its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] when the configuration is
    /// invalid.
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: Arc<dyn CapabilityRegistry>,
        planner: Arc<dyn Planner>,
        runtime: Arc<dyn CapabilityRuntime>,
        hitl: Arc<dyn HitlService>,
        catalog: Arc<FacetCatalog>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            runtime,
            registry.clone(),
        ));
        Ok(Self {
            store,
            registry,
            planner,
            hitl,
            catalog,
            engine,
            config,
        })
    }

    /// Accept an envelope: create a new run or resume a paused one.
    ///
    /// Returns immediately with a [`RunHandle`]; the run itself executes
    /// on a spawned task, one cooperative task per run.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] for envelope/policy rejections and
    /// resume-state violations. Failures after acceptance surface as a
    /// terminal `failed` outcome, not as an `Err` here.
    pub async fn accept(
        &self,
        envelope: TaskEnvelope,
        options: AcceptOptions,
    ) -> Result<RunHandle, CoordinatorError> {
        validate_envelope(&envelope)?;
        let policies = normalize_policies(&envelope.policies)?;

        let (run_id, existing) = self.resolve_run(&envelope).await?;

        let resuming = match &existing {
            Some(record) if record.status.is_resumable() => true,
            Some(record) if record.status.is_terminal() => {
                return Err(CoordinatorError::Resume(format!(
                    "run '{run_id}' already finished as {:?}",
                    record.status
                )));
            }
            Some(_) => {
                return Err(CoordinatorError::Resume(format!(
                    "run '{run_id}' is still executing"
                )));
            }
            None => false,
        };
        if resuming {
            let record = existing.as_ref().expect("resumable record");
            if record.status == RunStatus::AwaitingHuman && options.resume_submission.is_none() {
                return Err(CoordinatorError::Resume(
                    "resuming an awaiting_human run requires a submission".into(),
                ));
            }
        } else if envelope.constraints.resume_run_id.is_some() && existing.is_none() {
            return Err(CoordinatorError::Resume(format!(
                "run '{run_id}' not found"
            )));
        }

        let cancel = options.cancel.clone().unwrap_or_default();
        let (sink, events) = EventSink::channel(run_id.clone(), self.config.event_capacity);
        let sink = sink.cancel_on_close(cancel.clone());

        let driver = RunDriver {
            store: self.store.clone(),
            registry: self.registry.clone(),
            planner: self.planner.clone(),
            hitl: self.hitl.clone(),
            catalog: self.catalog.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            run_id: run_id.clone(),
            envelope,
            policies,
            options,
            existing,
            sink,
            cancel: cancel.clone(),
        };

        info!(target: "flex.coordinator", run = %run_id, resuming, "run accepted");
        let outcome = tokio::spawn(driver.run());

        Ok(RunHandle {
            run_id,
            events,
            outcome,
            cancel,
        })
    }

    /// Resolve the run id: explicit metadata id, resume handle, thread
    /// lookup, or a generated id. Returns the existing record when one
    /// was found.
    async fn resolve_run(
        &self,
        envelope: &TaskEnvelope,
    ) -> Result<(String, Option<flex_store::FlexRunRecord>), CoordinatorError> {
        if let Some(run_id) = envelope
            .metadata
            .run_id
            .clone()
            .or_else(|| envelope.constraints.resume_run_id.clone())
        {
            let existing = self.store.load_flex_run(&run_id).await?;
            return Ok((run_id, existing));
        }
        let thread_id = envelope
            .constraints
            .resume_thread_id
            .clone()
            .or_else(|| envelope.constraints.thread_id.clone())
            .or_else(|| envelope.metadata.thread_id.clone());
        if let Some(thread_id) = thread_id {
            if let Some(record) = self.store.find_flex_run_by_thread_id(&thread_id).await? {
                if record.status.is_resumable() {
                    return Ok((record.run_id.clone(), Some(record)));
                }
            }
        }
        Ok((Uuid::new_v4().to_string(), None))
    }
}

/// Re-exports for embedding services.
pub use flex_engine::CancellationReason;

#[doc(hidden)]
pub mod prelude {
    //! Everything an embedding service usually needs.
    pub use crate::{
        AcceptOptions, CoordinatorConfig, CoordinatorError, ResumeSubmission, RunCoordinator,
        RunHandle, RunOutcome,
    };
    pub use flex_engine::{CancellationToken, EventSink};
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, CoordinatorError> {
    serde_json::to_value(value).map_err(|e| CoordinatorError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.planner_attempts_per_phase, 2);
        assert_eq!(config.planner_timeout, Duration::from_secs(180));
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let config = CoordinatorConfig {
            planner_attempts_per_phase: 0,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = CoordinatorConfig {
            planner_timeout: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
