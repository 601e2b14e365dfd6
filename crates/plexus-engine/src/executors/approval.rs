use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use plexus_core::{ApprovalDecision, ApprovalRequest, PlexusError, RunEvent};
use plexus_graph::{render_template, ApprovalConfig, Node};

use super::{emit_event, ExecScope, NodeOutcome};

/// Register a human-approval request and park until a decision is
/// pushed back in or the approval timeout elapses.
pub(crate) async fn run(
    node: &Node,
    config: &ApprovalConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let request = ApprovalRequest {
        id: Uuid::new_v4().to_string(),
        run_id: scope.run_id.clone(),
        node_id: node.id.clone(),
        payload: json!({
            "message": render_template(&config.message, &scope.variables),
            "payload": config.payload,
        }),
        created_at: Utc::now(),
    };
    let approval_id = request.id.clone();

    let rx = scope.broker.register(request.clone()).await;

    if let Err(e) = scope.queue.create_approval_request(&request).await {
        scope.broker.abandon(&approval_id).await;
        return Err(PlexusError::NodeExecution {
            node: node.id.clone(),
            message: format!("approval queue: {e}"),
        });
    }

    emit_event(
        &scope.callbacks,
        RunEvent::ApprovalRequested {
            run_id: scope.run_id.clone(),
            node_id: node.id.clone(),
            approval_id: approval_id.clone(),
        },
    )
    .await;

    // Park in short slices so cancellation stays observable even
    // when no approval timeout is configured.
    let deadline = config
        .timeout_ms
        .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));
    let mut rx = rx;
    let received = loop {
        if scope.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            scope.broker.abandon(&approval_id).await;
            return Err(PlexusError::Cancelled);
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                scope.broker.abandon(&approval_id).await;
                return Err(PlexusError::ApprovalTimeout(node.id.clone()));
            }
        }
        match tokio::time::timeout(Duration::from_millis(25), &mut rx).await {
            Ok(received) => break received,
            Err(_) => continue,
        }
    };

    let decision = received.map_err(|_| PlexusError::NodeExecution {
        node: node.id.clone(),
        message: "approval channel closed before a decision arrived".to_string(),
    })?;

    match decision {
        ApprovalDecision::Approved { comment } => Ok(NodeOutcome::new(json!({
            "approved": true,
            "approval_id": approval_id,
            "comment": comment,
        }))),
        ApprovalDecision::Denied { reason } => Err(PlexusError::NodeExecution {
            node: node.id.clone(),
            message: format!("approval denied: {reason}"),
        }),
    }
}
