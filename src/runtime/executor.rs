use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::compiler::graph::{ExecutionPlan, NodeIndex};
use crate::dsl::{Edge, Node, NodeKind, WorkflowTemplate};
use crate::runtime::error::NodeError;
use crate::runtime::handler::{NodeContext, NodeHandlers, NodeInputs};
use crate::runtime::observer::{DataFlow, ExecutionObserver, NodeUpdate, NoopObserver};
use crate::runtime::report::ExecutionResult;
use crate::runtime::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on nodes in flight at once. `1` runs strictly sequentially.
    pub max_concurrency: usize,
    /// Per-attempt limit; `None` waits indefinitely.
    pub node_timeout: Option<Duration>,
    /// Backoff shape for all nodes. `max_retries` applies to non-tool nodes;
    /// tool nodes use their own `retryCount`.
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            node_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Stops a run from outside. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 工作流执行器
///
/// Walks a node/edge graph from its starting nodes (no incoming edge) to its
/// sinks. A node runs exactly once, after all of its predecessors completed,
/// and receives their outputs keyed by predecessor id. Independent branches
/// run concurrently up to `max_concurrency`.
///
/// A failing node never aborts the run: its error is recorded, its
/// downstream nodes are skipped, and unrelated branches carry on. `execute`
/// never returns an error; all failure is reported in the `ExecutionResult`.
///
/// One executor serves exactly one run.
pub struct WorkflowExecutor {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    handlers: NodeHandlers,
    observer: Arc<dyn ExecutionObserver>,
    config: ExecutorConfig,
    cancel: CancelHandle,
}

struct RunState {
    remaining: Vec<usize>,
    poisoned: Vec<bool>,
    settled: Vec<bool>,
    inputs: Vec<NodeInputs>,
    ready: VecDeque<NodeIndex>,
    results: BTreeMap<String, Value>,
    timings: BTreeMap<String, u64>,
    errors: Vec<String>,
    skipped: Vec<String>,
}

impl WorkflowExecutor {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, handlers: NodeHandlers) -> Self {
        Self {
            nodes,
            edges,
            handlers,
            observer: Arc::new(NoopObserver),
            config: ExecutorConfig::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn from_template(template: &WorkflowTemplate, handlers: NodeHandlers) -> Self {
        Self::new(template.nodes.clone(), template.edges.clone(), handlers)
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn execute(self) -> ExecutionResult {
        let started = Instant::now();
        info!(nodes = self.nodes.len(), edges = self.edges.len(), "Starting workflow execution");

        let result = match ExecutionPlan::build(&self.nodes, &self.edges) {
            Ok(plan) => self.run(&plan, started).await,
            Err(e) => {
                error!(error = %e, "Workflow graph rejected");
                ExecutionResult::aborted(e.to_string(), elapsed_ms(started))
            }
        };

        info!(
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            completed = result.node_results.len(),
            errors = result.errors.len(),
            "Workflow execution finished"
        );
        self.observer.on_execution_complete(&result);
        result
    }

    async fn run(&self, plan: &ExecutionPlan, started: Instant) -> ExecutionResult {
        let n = plan.len();
        for node in &self.nodes {
            self.observer.on_node_update(&node.id, &NodeUpdate::idle());
        }

        let mut state = RunState {
            remaining: (0..n).map(|i| plan.in_degree(i)).collect(),
            poisoned: vec![false; n],
            settled: vec![false; n],
            inputs: vec![NodeInputs::new(); n],
            ready: plan.starting_nodes().iter().copied().collect(),
            results: BTreeMap::new(),
            timings: BTreeMap::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        };

        let limit = self.config.max_concurrency.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut running = vec![false; n];
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // 1. Fill free slots from the ready queue
            while in_flight.len() < limit {
                let Some(idx) = state.ready.pop_front() else {
                    break;
                };
                let inputs = std::mem::take(&mut state.inputs[idx]);
                running[idx] = true;
                debug!(node_id = %self.nodes[idx].id, "Dispatching node");
                self.observer.on_node_update(&self.nodes[idx].id, &NodeUpdate::running());
                in_flight.push(self.run_node(idx, inputs));
            }

            if in_flight.is_empty() {
                break;
            }

            // 2. Wait for the next node to settle
            let (idx, outcome, elapsed) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(done) = in_flight.next() => done,
            };
            running[idx] = false;

            let ms = elapsed.as_millis() as u64;
            match outcome {
                Ok(value) => self.on_completed(plan, &mut state, idx, value, ms),
                Err(e) => self.on_failed(plan, &mut state, idx, e, ms),
            }
        }
        drop(in_flight);

        if cancelled {
            warn!("Workflow execution cancelled");
            for (idx, was_running) in running.iter().enumerate() {
                if *was_running {
                    state.settled[idx] = true;
                    let message = NodeError::Cancelled.to_string();
                    self.observer.on_node_update(&self.nodes[idx].id, &NodeUpdate::error(message, 0));
                }
            }
            for (idx, node) in self.nodes.iter().enumerate() {
                if !state.settled[idx] {
                    state.skipped.push(node.id.clone());
                }
            }
            state.errors.push("Execution cancelled".to_string());
        }

        ExecutionResult {
            success: state.errors.is_empty(),
            node_results: state.results,
            errors: state.errors,
            execution_time_ms: elapsed_ms(started),
            skipped: state.skipped,
            node_timings: state.timings,
        }
    }

    async fn run_node(&self, idx: NodeIndex, inputs: NodeInputs) -> (NodeIndex, Result<Value, NodeError>, Duration) {
        let node = &self.nodes[idx];
        let started = Instant::now();
        let policy = self.retry_policy_for(node);

        let outcome = retry_with_backoff(&policy, &node.id, |attempt| {
            let ctx = NodeContext {
                node_id: &node.id,
                inputs: &inputs,
                attempt,
            };
            self.attempt(node, ctx)
        })
        .await;

        (idx, outcome, started.elapsed())
    }

    /// One dispatch, bounded by the node timeout. Panics become node errors.
    async fn attempt(&self, node: &Node, ctx: NodeContext<'_>) -> Result<Value, NodeError> {
        let dispatch = AssertUnwindSafe(self.handlers.dispatch(&node.kind, &ctx)).catch_unwind();

        let outcome = match self.config.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(NodeError::Timeout(limit)),
            },
            None => dispatch.await,
        };

        outcome.unwrap_or_else(|panic| Err(NodeError::Panicked(panic_message(panic.as_ref()))))
    }

    fn retry_policy_for(&self, node: &Node) -> RetryPolicy {
        match &node.kind {
            NodeKind::Tool(tool) => self.config.retry.with_max_retries(tool.retry_count),
            _ => self.config.retry,
        }
    }

    fn on_completed(&self, plan: &ExecutionPlan, state: &mut RunState, idx: NodeIndex, value: Value, ms: u64) {
        let node = &self.nodes[idx];
        state.settled[idx] = true;
        state.timings.insert(node.id.clone(), ms);
        state.results.insert(node.id.clone(), value.clone());
        self.observer.on_node_update(&node.id, &NodeUpdate::completed(value.clone(), ms));

        for &(edge_idx, target) in plan.successors(idx) {
            let edge = &self.edges[edge_idx];
            self.observer.on_data_flow(&DataFlow {
                edge_id: edge.id.clone(),
                source_id: node.id.clone(),
                target_id: edge.target_node_id.clone(),
                payload: value.clone(),
            });
            state.inputs[target].insert(node.id.clone(), value.clone());
            self.release(plan, state, target);
        }
    }

    fn on_failed(&self, plan: &ExecutionPlan, state: &mut RunState, idx: NodeIndex, e: NodeError, ms: u64) {
        let node = &self.nodes[idx];
        let message = e.to_string();
        error!(node_id = %node.id, error = %message, "Node execution failed");

        state.settled[idx] = true;
        state.timings.insert(node.id.clone(), ms);
        state.errors.push(format!("Node {}: {}", node.id, message));
        self.observer.on_node_update(&node.id, &NodeUpdate::error(message, ms));

        for &(_, target) in plan.successors(idx) {
            state.poisoned[target] = true;
            self.release(plan, state, target);
        }
    }

    /// One predecessor of `target` settled. Once all have, the node is either
    /// queued or, if any predecessor failed, skipped together with everything
    /// that only becomes reachable through it.
    fn release(&self, plan: &ExecutionPlan, state: &mut RunState, target: NodeIndex) {
        state.remaining[target] -= 1;
        if state.remaining[target] > 0 {
            return;
        }
        if !state.poisoned[target] {
            state.ready.push_back(target);
            return;
        }

        let mut stack = vec![target];
        while let Some(s) = stack.pop() {
            state.settled[s] = true;
            state.skipped.push(self.nodes[s].id.clone());
            debug!(node_id = %self.nodes[s].id, "Skipping node downstream of a failure");
            for &(_, next) in plan.successors(s) {
                state.poisoned[next] = true;
                state.remaining[next] -= 1;
                if state.remaining[next] == 0 {
                    stack.push(next);
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
