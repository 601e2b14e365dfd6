use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use plexus_core::{
    ApprovalQueue, ApprovalRequest, PlexusError, RunDefinition, RunStatus, RunStore, TraceEntry,
};

/// Everything the store knows about one run.
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub definition: RunDefinition,
    pub status: RunStatus,
    pub progress: f32,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub trace: Vec<TraceEntry>,
}

/// In-memory [`RunStore`] for development and testing.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, StoredRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_run(&self, run_id: &str) -> Option<StoredRun> {
        self.runs.read().await.get(run_id).cloned()
    }

    pub async fn trace(&self, run_id: &str) -> Vec<TraceEntry> {
        self.runs
            .read()
            .await
            .get(run_id)
            .map(|run| run.trace.clone())
            .unwrap_or_default()
    }

    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, definition: &RunDefinition) -> Result<String, PlexusError> {
        let mut runs = self.runs.write().await;
        runs.insert(
            definition.run_id.clone(),
            StoredRun {
                definition: definition.clone(),
                status: RunStatus::Pending,
                progress: 0.0,
                output: None,
                error: None,
                trace: Vec::new(),
            },
        );
        Ok(definition.run_id.clone())
    }

    async fn append_trace(&self, run_id: &str, entry: &TraceEntry) -> Result<(), PlexusError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| PlexusError::Store(format!("unknown run '{run_id}'")))?;
        run.trace.push(entry.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: f32,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), PlexusError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| PlexusError::Store(format!("unknown run '{run_id}'")))?;
        run.status = status;
        run.progress = progress;
        if output.is_some() {
            run.output = output;
        }
        if error.is_some() {
            run.error = error;
        }
        Ok(())
    }
}

/// In-memory [`ApprovalQueue`] that records every request.
#[derive(Default)]
pub struct InMemoryApprovalQueue {
    requests: RwLock<Vec<ApprovalRequest>>,
}

impl InMemoryApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl ApprovalQueue for InMemoryApprovalQueue {
    async fn create_approval_request(
        &self,
        request: &ApprovalRequest,
    ) -> Result<String, PlexusError> {
        self.requests.write().await.push(request.clone());
        Ok(request.id.clone())
    }
}
