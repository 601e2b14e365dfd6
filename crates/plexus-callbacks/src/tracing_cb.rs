use async_trait::async_trait;

use plexus_core::{CallbackHandler, PlexusError, RunEvent};

pub struct TracingCallback;

impl TracingCallback {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackHandler for TracingCallback {
    async fn on_event(&self, event: RunEvent) -> Result<(), PlexusError> {
        match event {
            RunEvent::RunStarted { run_id, graph_id } => {
                tracing::info!(run_id = %run_id, graph_id = %graph_id, "run started");
            }
            RunEvent::NodeStarted { run_id, node_id } => {
                tracing::info!(run_id = %run_id, node_id = %node_id, "node started");
            }
            RunEvent::NodeFinished {
                run_id,
                node_id,
                status,
                attempts,
            } => {
                tracing::info!(
                    run_id = %run_id,
                    node_id = %node_id,
                    status = ?status,
                    attempts = attempts,
                    "node finished"
                );
            }
            RunEvent::ApprovalRequested {
                run_id,
                node_id,
                approval_id,
            } => {
                tracing::info!(
                    run_id = %run_id,
                    node_id = %node_id,
                    approval_id = %approval_id,
                    "approval requested"
                );
            }
            RunEvent::RunFinished { run_id, output } => {
                tracing::info!(run_id = %run_id, output_len = output.to_string().len(), "run finished");
            }
            RunEvent::RunFailed { run_id, error } => {
                tracing::error!(run_id = %run_id, error = %error, "run failed");
            }
            RunEvent::RunCancelled { run_id } => {
                tracing::info!(run_id = %run_id, "run cancelled");
            }
        }
        Ok(())
    }
}
