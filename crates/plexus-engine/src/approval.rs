use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use plexus_core::{ApprovalDecision, ApprovalRequest};

/// In-process registry of pending approvals awaiting out-of-band
/// resolution.
///
/// The approval executor registers a request and parks on the
/// returned oneshot receiver; the hosting layer pushes the decision
/// back in through [`crate::Engine::resolve_approval`].
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, (ApprovalRequest, oneshot::Sender<ApprovalDecision>)>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval; the receiver resolves when a
    /// decision is pushed in.
    pub async fn register(&self, request: ApprovalRequest) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(request.id.clone(), (request, tx));
        rx
    }

    /// Resolve a pending approval. Returns true if the request was
    /// found and the decision delivered.
    pub async fn respond(&self, approval_id: &str, decision: ApprovalDecision) -> bool {
        let entry = self.pending.lock().await.remove(approval_id);
        match entry {
            // Send failure means the waiting node timed out already.
            Some((_request, tx)) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Drop a pending request (the waiting node gave up).
    pub async fn abandon(&self, approval_id: &str) {
        self.pending.lock().await.remove(approval_id);
    }

    pub async fn pending_requests(&self) -> Vec<ApprovalRequest> {
        self.pending
            .lock()
            .await
            .values()
            .map(|(request, _)| request.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.to_string(),
            run_id: "run-1".to_string(),
            node_id: "gate".to_string(),
            payload: json!({"message": "deploy?"}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn respond_delivers_decision() {
        let broker = ApprovalBroker::new();
        let rx = broker.register(request("ap-1")).await;
        assert!(
            broker
                .respond("ap-1", ApprovalDecision::Approved { comment: None })
                .await
        );
        assert!(matches!(
            rx.await.unwrap(),
            ApprovalDecision::Approved { .. }
        ));
    }

    #[tokio::test]
    async fn respond_unknown_id_is_false() {
        let broker = ApprovalBroker::new();
        assert!(
            !broker
                .respond("ghost", ApprovalDecision::Approved { comment: None })
                .await
        );
    }

    #[tokio::test]
    async fn abandon_removes_pending() {
        let broker = ApprovalBroker::new();
        let _rx = broker.register(request("ap-2")).await;
        broker.abandon("ap-2").await;
        assert!(broker.pending_requests().await.is_empty());
    }
}
