// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-store
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The in-memory reference store.
pub mod memory;
/// Persisted record types.
pub mod records;

pub use memory::MemoryStore;
pub use records::{
    FlexRunRecord, HumanTaskFilter, HumanTaskRecord, HumanTaskStatus, NodeStatePatch,
    NodeStateRecord, PlanSnapshotRecord, RunOutputRecord, RunOutputStatus,
};

use async_trait::async_trait;
use flex_core::{FacetCheckResult, RunStatus};
use serde_json::Value;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced run does not exist.
    #[error("run '{run_id}' not found")]
    RunNotFound {
        /// The missing run.
        run_id: String,
    },

    /// A write conflicted with existing state.
    #[error("conflict: {message}")]
    Conflict {
        /// Explanation.
        message: String,
    },

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Append-only checkpoint store for runs, plan snapshots, and node state.
///
/// All writes must be crash-safe such that, after a restart,
/// `load_flex_run` + `load_plan_snapshot` return a state from which the
/// coordinator can resume deterministically. Writes for a single run are
/// naturally serialized by the coordinator; implementations only need
/// cross-run concurrency safety.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or update a run record.
    async fn create_or_update_run(&self, record: FlexRunRecord) -> Result<(), StoreError>;

    /// Update a run's lifecycle status.
    async fn update_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError>;

    /// Persist the latest run-context snapshot.
    async fn save_run_context(&self, run_id: &str, snapshot: Value) -> Result<(), StoreError>;

    /// Persist a plan snapshot. Each `(run_id, version)` row is unique;
    /// writing the same version again updates it in place (the pending
    /// state evolves as the run progresses).
    async fn save_plan_snapshot(&self, record: PlanSnapshotRecord) -> Result<(), StoreError>;

    /// Upsert per-node state.
    async fn mark_node(
        &self,
        run_id: &str,
        node_id: &str,
        patch: NodeStatePatch,
    ) -> Result<(), StoreError>;

    /// Record the validated final output of a completed run.
    async fn record_result(
        &self,
        run_id: &str,
        final_output: Value,
        goal_condition_results: Option<Vec<FacetCheckResult>>,
    ) -> Result<(), StoreError>;

    /// Record a provisional output for a paused run.
    async fn record_pending_result(
        &self,
        run_id: &str,
        provisional_output: Value,
    ) -> Result<(), StoreError>;

    /// Load a run by id.
    async fn load_flex_run(&self, run_id: &str) -> Result<Option<FlexRunRecord>, StoreError>;

    /// Find the most recent run on a thread.
    async fn find_flex_run_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<FlexRunRecord>, StoreError>;

    /// Load a plan snapshot; `None` selects the latest version.
    async fn load_plan_snapshot(
        &self,
        run_id: &str,
        version: Option<u32>,
    ) -> Result<Option<PlanSnapshotRecord>, StoreError>;

    /// Load the recorded output of a run.
    async fn load_run_output(&self, run_id: &str) -> Result<Option<RunOutputRecord>, StoreError>;

    /// Load per-node state rows for a run, in insertion order.
    async fn load_node_states(&self, run_id: &str) -> Result<Vec<NodeStateRecord>, StoreError>;

    /// Redacted composite view of a run for debug endpoints.
    async fn load_flex_run_debug(&self, run_id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or update a pending human task.
    async fn upsert_human_task(&self, record: HumanTaskRecord) -> Result<(), StoreError>;

    /// Update a human task's status.
    async fn resolve_human_task(
        &self,
        run_id: &str,
        node_id: &str,
        status: HumanTaskStatus,
    ) -> Result<(), StoreError>;

    /// List pending human tasks matching a filter.
    async fn list_pending_human_tasks(
        &self,
        filter: HumanTaskFilter,
    ) -> Result<Vec<HumanTaskRecord>, StoreError>;
}
