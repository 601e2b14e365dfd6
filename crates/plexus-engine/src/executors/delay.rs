use std::time::Duration;

use serde_json::json;

use plexus_core::PlexusError;
use plexus_graph::{DelayConfig, Node};

use super::{ExecScope, NodeOutcome};

/// Cooperative sleep; batch siblings keep running.
pub(crate) async fn run(
    _node: &Node,
    config: &DelayConfig,
    _scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
    Ok(NodeOutcome::new(json!({ "delayed_ms": config.delay_ms })))
}
