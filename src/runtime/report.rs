use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::dsl::NodeStatus;
use crate::runtime::flow::FlowTracker;
use crate::runtime::observer::{DataFlow, ExecutionObserver, NodeUpdate};

/// Outcome of one run. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub node_results: BTreeMap<String, Value>,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
    /// Nodes never started because an upstream node failed or the run was cancelled.
    #[serde(default)]
    pub skipped: Vec<String>,
    /// Wall-clock time per attempted node (completed or failed).
    #[serde(default)]
    pub node_timings: BTreeMap<String, u64>,
}

impl ExecutionResult {
    /// Result of a run that failed before any node was dispatched.
    pub fn aborted(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            node_results: BTreeMap::new(),
            errors: vec![error.into()],
            execution_time_ms,
            skipped: Vec::new(),
            node_timings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_execution_time_ms: u64,
    pub node_execution_times: BTreeMap<String, u64>,
    /// Slowest attempted node.
    pub bottleneck: Option<String>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    /// Failed nodes over attempted nodes; 0 when nothing ran.
    pub error_rate: f64,
}

impl ExecutionMetrics {
    pub fn from_result(result: &ExecutionResult) -> Self {
        let attempted = result.node_timings.len();
        let failed = result
            .node_timings
            .keys()
            .filter(|id| !result.node_results.contains_key(*id))
            .count();

        let bottleneck = result
            .node_timings
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, _)| id.clone());

        Self {
            total_execution_time_ms: result.execution_time_ms,
            node_execution_times: result.node_timings.clone(),
            bottleneck,
            completed_count: result.node_results.len(),
            failed_count: failed,
            skipped_count: result.skipped.len(),
            error_count: result.errors.len(),
            error_rate: if attempted == 0 { 0.0 } else { failed as f64 / attempted as f64 },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// 运行监控视图
///
/// Observer that keeps the live per-node state of a run, the data-flow
/// bridge, and the final result for an operator view.
#[derive(Debug)]
pub struct RunMonitor {
    nodes: DashMap<String, NodeSnapshot>,
    flows: FlowTracker,
    result: Mutex<Option<ExecutionResult>>,
    violations: Mutex<Vec<String>>,
}

impl RunMonitor {
    pub fn new(flow_window: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            flows: FlowTracker::new(flow_window),
            result: Mutex::new(None),
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|s| s.status)
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeSnapshot> {
        self.nodes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn flows(&self) -> &FlowTracker {
        &self.flows
    }

    pub fn is_finished(&self) -> bool {
        self.result.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    pub fn result(&self) -> Option<ExecutionResult> {
        self.result.lock().ok().and_then(|r| r.clone())
    }

    pub fn metrics(&self) -> Option<ExecutionMetrics> {
        self.result().as_ref().map(ExecutionMetrics::from_result)
    }

    /// Status transitions that broke `idle -> running -> completed|error`.
    pub fn transition_violations(&self) -> Vec<String> {
        self.violations.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let Some(result) = self.result() else {
            let running = self
                .nodes
                .iter()
                .filter(|e| e.status == NodeStatus::Running)
                .count();
            let _ = writeln!(out, "RUNNING ({} node(s) in flight)", running);
            return out;
        };

        let metrics = ExecutionMetrics::from_result(&result);
        let badge = if result.success { "SUCCESS" } else { "FAILED" };
        let _ = writeln!(out, "{} in {} ms", badge, result.execution_time_ms);
        let _ = writeln!(
            out,
            "completed: {}  failed: {}  skipped: {}",
            metrics.completed_count, metrics.failed_count, metrics.skipped_count
        );
        if let Some(bottleneck) = &metrics.bottleneck {
            let ms = metrics.node_execution_times.get(bottleneck).copied().unwrap_or(0);
            let _ = writeln!(out, "bottleneck: {} ({} ms)", bottleneck, ms);
        }
        for (id, snapshot) in self.snapshot() {
            let ms = snapshot.duration_ms.map(|d| format!(" {} ms", d)).unwrap_or_default();
            let _ = writeln!(out, "  [{}] {}{}", snapshot.status, id, ms);
        }
        for e in &result.errors {
            let _ = writeln!(out, "error: {}", e);
        }
        out
    }
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl ExecutionObserver for RunMonitor {
    fn on_node_update(&self, node_id: &str, update: &NodeUpdate) {
        let mut entry = self.nodes.entry(node_id.to_string()).or_default();
        let previous = entry.status;
        if !previous.can_transition_to(update.status) {
            warn!(node_id, from = %previous, to = %update.status, "Illegal node status transition");
            if let Ok(mut v) = self.violations.lock() {
                v.push(format!("{}: {} -> {}", node_id, previous, update.status));
            }
        }

        if update.status == NodeStatus::Idle {
            *entry = NodeSnapshot::default();
            return;
        }
        entry.status = update.status;
        if update.output.is_some() {
            entry.output = update.output.clone();
        }
        if update.error.is_some() {
            entry.error = update.error.clone();
        }
        if update.duration_ms.is_some() {
            entry.duration_ms = update.duration_ms;
        }
    }

    fn on_execution_complete(&self, result: &ExecutionResult) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = Some(result.clone());
        }
    }

    fn on_data_flow(&self, flow: &DataFlow) {
        self.flows.mark(flow);
    }
}
