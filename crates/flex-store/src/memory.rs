// SPDX-License-Identifier: MIT OR Apache-2.0
//! The in-memory reference store.

use crate::records::{
    FlexRunRecord, HumanTaskFilter, HumanTaskRecord, HumanTaskStatus, NodeStatePatch,
    NodeStateRecord, PlanSnapshotRecord, RunOutputRecord, RunOutputStatus,
};
use crate::{RunStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use flex_core::redact::redact_value;
use flex_core::{FacetCheckResult, RunStatus};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    runs: BTreeMap<String, FlexRunRecord>,
    snapshots: BTreeMap<(String, u32), PlanSnapshotRecord>,
    outputs: BTreeMap<String, RunOutputRecord>,
    // Insertion-ordered per run.
    nodes: BTreeMap<String, Vec<NodeStateRecord>>,
    human_tasks: BTreeMap<(String, String), HumanTaskRecord>,
}

/// In-memory [`RunStore`] used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs currently stored.
    pub async fn run_count(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    /// Every snapshot version stored for a run, ascending.
    pub async fn snapshot_versions(&self, run_id: &str) -> Vec<u32> {
        self.inner
            .read()
            .await
            .snapshots
            .keys()
            .filter(|(id, _)| id == run_id)
            .map(|(_, version)| *version)
            .collect()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_or_update_run(&self, mut record: FlexRunRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        record.updated_at = Utc::now();
        if let Some(existing) = inner.runs.get(&record.run_id) {
            record.created_at = existing.created_at;
        }
        debug!(target: "flex.store", run = %record.run_id, status = ?record.status, "upsert run");
        inner.runs.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn update_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_run_context(&self, run_id: &str, snapshot: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        record.context_snapshot = Some(snapshot);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_plan_snapshot(&self, mut record: PlanSnapshotRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&record.run_id) {
            return Err(StoreError::RunNotFound {
                run_id: record.run_id.clone(),
            });
        }
        let key = (record.run_id.clone(), record.plan_version);
        record.updated_at = Utc::now();
        if let Some(existing) = inner.snapshots.get(&key) {
            record.created_at = existing.created_at;
        }
        if let Some(run) = inner.runs.get_mut(&record.run_id) {
            run.plan_version = run.plan_version.max(record.plan_version);
            run.updated_at = record.updated_at;
        }
        inner.snapshots.insert(key, record);
        Ok(())
    }

    async fn mark_node(
        &self,
        run_id: &str,
        node_id: &str,
        patch: NodeStatePatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(run_id) {
            return Err(StoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        let rows = inner.nodes.entry(run_id.to_string()).or_default();
        let row = match rows.iter_mut().find(|r| r.node_id == node_id) {
            Some(row) => row,
            None => {
                rows.push(NodeStateRecord {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    capability_id: None,
                    label: None,
                    status: flex_core::NodeStatus::Pending,
                    context: None,
                    output: None,
                    error: None,
                    started_at: None,
                    completed_at: None,
                });
                rows.last_mut().expect("just pushed")
            }
        };
        if let Some(status) = patch.status {
            row.status = status;
        }
        if patch.capability_id.is_some() {
            row.capability_id = patch.capability_id;
        }
        if patch.label.is_some() {
            row.label = patch.label;
        }
        if patch.context.is_some() {
            row.context = patch.context;
        }
        if patch.output.is_some() {
            row.output = patch.output;
        }
        if patch.error.is_some() {
            row.error = patch.error;
        }
        if patch.started_at.is_some() {
            row.started_at = patch.started_at;
        }
        if patch.completed_at.is_some() {
            row.completed_at = patch.completed_at;
        }
        Ok(())
    }

    async fn record_result(
        &self,
        run_id: &str,
        final_output: Value,
        goal_condition_results: Option<Vec<FacetCheckResult>>,
    ) -> Result<(), StoreError> {
        self.record_output(run_id, final_output, RunOutputStatus::Completed, goal_condition_results)
            .await
    }

    async fn record_pending_result(
        &self,
        run_id: &str,
        provisional_output: Value,
    ) -> Result<(), StoreError> {
        self.record_output(run_id, provisional_output, RunOutputStatus::Pending, None)
            .await
    }

    async fn load_flex_run(&self, run_id: &str) -> Result<Option<FlexRunRecord>, StoreError> {
        Ok(self.inner.read().await.runs.get(run_id).cloned())
    }

    async fn find_flex_run_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<FlexRunRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .values()
            .filter(|run| run.thread_id.as_deref() == Some(thread_id))
            .max_by_key(|run| run.updated_at)
            .cloned())
    }

    async fn load_plan_snapshot(
        &self,
        run_id: &str,
        version: Option<u32>,
    ) -> Result<Option<PlanSnapshotRecord>, StoreError> {
        let inner = self.inner.read().await;
        let snapshot = match version {
            Some(version) => inner.snapshots.get(&(run_id.to_string(), version)).cloned(),
            None => inner
                .snapshots
                .iter()
                .filter(|((id, _), _)| id == run_id)
                .max_by_key(|((_, version), _)| *version)
                .map(|(_, record)| record.clone()),
        };
        Ok(snapshot)
    }

    async fn load_run_output(&self, run_id: &str) -> Result<Option<RunOutputRecord>, StoreError> {
        Ok(self.inner.read().await.outputs.get(run_id).cloned())
    }

    async fn load_node_states(&self, run_id: &str) -> Result<Vec<NodeStateRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .nodes
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_flex_run_debug(&self, run_id: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.read().await;
        let Some(run) = inner.runs.get(run_id) else {
            return Ok(None);
        };
        let snapshots: Vec<&PlanSnapshotRecord> = inner
            .snapshots
            .iter()
            .filter(|((id, _), _)| id == run_id)
            .map(|(_, record)| record)
            .collect();
        let nodes = inner.nodes.get(run_id).cloned().unwrap_or_default();
        let output = inner.outputs.get(run_id);
        let composite = json!({
            "run": run,
            "planSnapshots": snapshots,
            "nodes": nodes,
            "output": output,
        });
        Ok(Some(redact_value(&composite)))
    }

    async fn upsert_human_task(&self, mut record: HumanTaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (record.run_id.clone(), record.node_id.clone());
        record.updated_at = Utc::now();
        if let Some(existing) = inner.human_tasks.get(&key) {
            record.created_at = existing.created_at;
        }
        inner.human_tasks.insert(key, record);
        Ok(())
    }

    async fn resolve_human_task(
        &self,
        run_id: &str,
        node_id: &str,
        status: HumanTaskStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (run_id.to_string(), node_id.to_string());
        let record = inner
            .human_tasks
            .get_mut(&key)
            .ok_or_else(|| StoreError::Conflict {
                message: format!("no human task for run '{run_id}' node '{node_id}'"),
            })?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_pending_human_tasks(
        &self,
        filter: HumanTaskFilter,
    ) -> Result<Vec<HumanTaskRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .human_tasks
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

impl MemoryStore {
    async fn record_output(
        &self,
        run_id: &str,
        output: Value,
        status: RunOutputStatus,
        goal_condition_results: Option<Vec<FacetCheckResult>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get(run_id)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        let (plan_version, schema_hash, facet_snapshot) = (
            run.plan_version,
            run.schema_hash.clone(),
            run.context_snapshot.clone(),
        );
        let now = Utc::now();
        let recorded_at = inner
            .outputs
            .get(run_id)
            .map_or(now, |existing| existing.recorded_at);
        let result_value = output.clone();
        inner.outputs.insert(
            run_id.to_string(),
            RunOutputRecord {
                run_id: run_id.to_string(),
                plan_version,
                schema_hash,
                status,
                output,
                facet_snapshot,
                provenance: None,
                goal_condition_results,
                recorded_at,
                updated_at: now,
            },
        );
        if status == RunOutputStatus::Completed {
            if let Some(run) = inner.runs.get_mut(run_id) {
                run.result = Some(result_value);
                run.updated_at = now;
            }
        }
        Ok(())
    }
}
