mod tracing_cb;

pub use tracing_cb::TracingCallback;

use async_trait::async_trait;

use plexus_core::{CallbackHandler, PlexusError, RunEvent};

/// Plain-line logging of run events.
pub struct LoggingCallback;

impl LoggingCallback {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackHandler for LoggingCallback {
    async fn on_event(&self, event: RunEvent) -> Result<(), PlexusError> {
        match event {
            RunEvent::RunStarted { run_id, graph_id } => {
                tracing::info!("run started: run_id={run_id}, graph_id={graph_id}");
            }
            RunEvent::NodeStarted { run_id, node_id } => {
                tracing::info!("node started: run_id={run_id}, node_id={node_id}");
            }
            RunEvent::NodeFinished {
                run_id,
                node_id,
                status,
                attempts,
            } => {
                tracing::info!(
                    "node finished: run_id={run_id}, node_id={node_id}, status={status:?}, attempts={attempts}"
                );
            }
            RunEvent::ApprovalRequested {
                run_id,
                node_id,
                approval_id,
            } => {
                tracing::info!(
                    "approval requested: run_id={run_id}, node_id={node_id}, approval_id={approval_id}"
                );
            }
            RunEvent::RunFinished { run_id, output } => {
                tracing::info!("run finished: run_id={run_id}, output={output}");
            }
            RunEvent::RunFailed { run_id, error } => {
                tracing::error!("run failed: run_id={run_id}, error={error}");
            }
            RunEvent::RunCancelled { run_id } => {
                tracing::info!("run cancelled: run_id={run_id}");
            }
        }
        Ok(())
    }
}
