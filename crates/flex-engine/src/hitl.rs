// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HITL service boundary and an in-memory implementation.

use async_trait::async_trait;
use flex_core::{HitlRequestRecord, HitlRequestStatus};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Errors from the HITL service.
#[derive(Debug, thiserror::Error)]
pub enum HitlError {
    /// The referenced request does not exist.
    #[error("HITL request '{request_id}' not found")]
    RequestNotFound {
        /// The missing request.
        request_id: String,
    },

    /// Backend-specific failure.
    #[error("HITL backend error: {0}")]
    Backend(String),
}

/// The small interface the core assumes of the HITL subsystem.
///
/// Implementations must be internally thread-safe; the service is shared
/// across concurrently executing runs.
#[async_trait]
pub trait HitlService: Send + Sync {
    /// Register a request and return it (ids may be assigned here).
    async fn create_request(
        &self,
        request: HitlRequestRecord,
    ) -> Result<HitlRequestRecord, HitlError>;

    /// Pending requests raised by a run.
    async fn pending_for_run(&self, run_id: &str) -> Result<Vec<HitlRequestRecord>, HitlError>;

    /// Resolve (or deny) a request with an operator payload.
    async fn resolve(
        &self,
        request_id: &str,
        status: HitlRequestStatus,
        resolution: Option<Value>,
    ) -> Result<(), HitlError>;
}

/// In-memory [`HitlService`] used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryHitlService {
    requests: RwLock<BTreeMap<String, HitlRequestRecord>>,
}

impl InMemoryHitlService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a request by id.
    pub async fn get(&self, request_id: &str) -> Option<HitlRequestRecord> {
        self.requests.read().await.get(request_id).cloned()
    }
}

#[async_trait]
impl HitlService for InMemoryHitlService {
    async fn create_request(
        &self,
        request: HitlRequestRecord,
    ) -> Result<HitlRequestRecord, HitlError> {
        self.requests
            .write()
            .await
            .insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn pending_for_run(&self, run_id: &str) -> Result<Vec<HitlRequestRecord>, HitlError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.run_id == run_id && r.status == HitlRequestStatus::Pending)
            .cloned()
            .collect())
    }

    async fn resolve(
        &self,
        request_id: &str,
        status: HitlRequestStatus,
        resolution: Option<Value>,
    ) -> Result<(), HitlError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| HitlError::RequestNotFound {
                request_id: request_id.to_string(),
            })?;
        request.status = status;
        request.resolution = resolution;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn request(id: &str, run_id: &str) -> HitlRequestRecord {
        HitlRequestRecord {
            id: id.into(),
            run_id: run_id.into(),
            origin_agent: "coordinator".into(),
            payload: json!({"kind": "plan_approval"}),
            created_at: Utc::now(),
            pending_node_id: None,
            operator_prompt: "Review the plan".into(),
            contract_summary: None,
            status: HitlRequestStatus::Pending,
            resolution: None,
        }
    }

    #[tokio::test]
    async fn create_and_list_pending() {
        let service = InMemoryHitlService::new();
        service.create_request(request("q-1", "r-1")).await.unwrap();
        service.create_request(request("q-2", "r-2")).await.unwrap();

        let pending = service.pending_for_run("r-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "q-1");
    }

    #[tokio::test]
    async fn resolve_clears_pending_and_records_payload() {
        let service = InMemoryHitlService::new();
        service.create_request(request("q-1", "r-1")).await.unwrap();
        service
            .resolve("q-1", HitlRequestStatus::Resolved, Some(json!({"approved": true})))
            .await
            .unwrap();

        assert!(service.pending_for_run("r-1").await.unwrap().is_empty());
        let stored = service.get("q-1").await.unwrap();
        assert_eq!(stored.status, HitlRequestStatus::Resolved);
        assert_eq!(stored.resolution, Some(json!({"approved": true})));
    }

    #[tokio::test]
    async fn resolving_unknown_request_errors() {
        let service = InMemoryHitlService::new();
        let err = service
            .resolve("ghost", HitlRequestStatus::Denied, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HitlError::RequestNotFound { .. }));
    }
}
