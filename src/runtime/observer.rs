use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dsl::NodeStatus;
use crate::runtime::report::ExecutionResult;

/// Partial node state pushed to the UI.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl NodeUpdate {
    pub fn idle() -> Self {
        Self::status(NodeStatus::Idle)
    }

    pub fn running() -> Self {
        Self::status(NodeStatus::Running)
    }

    pub fn completed(output: Value, duration_ms: u64) -> Self {
        Self {
            output: Some(output),
            duration_ms: Some(duration_ms),
            ..Self::status(NodeStatus::Completed)
        }
    }

    pub fn error(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            error: Some(message.into()),
            duration_ms: Some(duration_ms),
            ..Self::status(NodeStatus::Error)
        }
    }

    fn status(status: NodeStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            duration_ms: None,
        }
    }
}

/// Data handed from a completed node to one of its successors.
/// Fire-and-forget animation hint; the target may not have consumed it yet.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub payload: Value,
}

/// 执行回调
pub trait ExecutionObserver: Send + Sync {
    fn on_node_update(&self, node_id: &str, update: &NodeUpdate);

    fn on_execution_complete(&self, result: &ExecutionResult);

    fn on_data_flow(&self, _flow: &DataFlow) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_node_update(&self, _node_id: &str, _update: &NodeUpdate) {}
    fn on_execution_complete(&self, _result: &ExecutionResult) {}
}

/// Fans every callback out to a caller-owned list of observers, in order.
#[derive(Default, Clone)]
pub struct Observers {
    inner: Vec<Arc<dyn ExecutionObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.inner.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.inner.push(observer);
    }
}

impl ExecutionObserver for Observers {
    fn on_node_update(&self, node_id: &str, update: &NodeUpdate) {
        for o in &self.inner {
            o.on_node_update(node_id, update);
        }
    }

    fn on_execution_complete(&self, result: &ExecutionResult) {
        for o in &self.inner {
            o.on_execution_complete(result);
        }
    }

    fn on_data_flow(&self, flow: &DataFlow) {
        for o in &self.inner {
            o.on_data_flow(flow);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    NodeUpdate { node_id: String, update: NodeUpdate },
    DataFlow(DataFlow),
    Completed(ExecutionResult),
}

/// Forwards callbacks as `ExecutionEvent`s over an unbounded channel so a
/// consumer on another task can drive a UI.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ExecutionEvent) {
        // Receiver gone means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl ExecutionObserver for ChannelObserver {
    fn on_node_update(&self, node_id: &str, update: &NodeUpdate) {
        self.send(ExecutionEvent::NodeUpdate {
            node_id: node_id.to_string(),
            update: update.clone(),
        });
    }

    fn on_execution_complete(&self, result: &ExecutionResult) {
        self.send(ExecutionEvent::Completed(result.clone()));
    }

    fn on_data_flow(&self, flow: &DataFlow) {
        self.send(ExecutionEvent::DataFlow(flow.clone()));
    }
}

/// Emits node transitions as tracing events.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ExecutionObserver for LoggingObserver {
    fn on_node_update(&self, node_id: &str, update: &NodeUpdate) {
        match update.status {
            NodeStatus::Error => {
                error!(node_id, error = update.error.as_deref().unwrap_or(""), "Node failed")
            }
            NodeStatus::Completed => {
                info!(node_id, duration_ms = update.duration_ms.unwrap_or(0), "Node completed")
            }
            NodeStatus::Running => info!(node_id, "Node running"),
            NodeStatus::Idle => debug!(node_id, "Node reset"),
        }
    }

    fn on_execution_complete(&self, result: &ExecutionResult) {
        info!(
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            errors = result.errors.len(),
            "Execution finished"
        );
    }

    fn on_data_flow(&self, flow: &DataFlow) {
        debug!(edge_id = %flow.edge_id, source = %flow.source_id, target = %flow.target_id, "Data flow");
    }
}
