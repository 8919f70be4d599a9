use async_trait::async_trait;
use karta::dsl::builder::WorkflowBuilder;
use karta::dsl::{AgentConfig, NodeStatus, ToolConfig, ToolType, WorkflowTemplate};
use karta::runtime::error::NodeError;
use karta::runtime::executor::{ExecutorConfig, WorkflowExecutor};
use karta::runtime::handler::{NodeContext, NodeExecutor, NodeHandlers, NodeInputs};
use karta::runtime::observer::{ChannelObserver, ExecutionEvent, Observers};
use karta::runtime::report::RunMonitor;
use karta::runtime::retry::RetryPolicy;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

// --- Test doubles ---

/// Records every call and echoes the node id back.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, NodeInputs)>>,
}

impl Recorder {
    fn calls_for(&self, id: &str) -> Vec<NodeInputs> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == id)
            .map(|(_, i)| i.clone())
            .collect()
    }
}

#[async_trait]
impl NodeExecutor<AgentConfig> for Recorder {
    async fn execute(&self, _config: &AgentConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.node_id.to_string(), ctx.inputs.clone()));
        Ok(json!({ "from": ctx.node_id }))
    }
}

/// Fails permanently for the listed node ids.
struct FailOn(Vec<&'static str>);

#[async_trait]
impl NodeExecutor<AgentConfig> for FailOn {
    async fn execute(&self, _config: &AgentConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        if self.0.iter().any(|id| *id == ctx.node_id) {
            return Err(NodeError::failed("boom"));
        }
        Ok(json!(ctx.node_id))
    }
}

/// Sleeps, then succeeds.
struct Sleepy(Duration);

#[async_trait]
impl NodeExecutor<AgentConfig> for Sleepy {
    async fn execute(&self, _config: &AgentConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        tokio::time::sleep(self.0).await;
        Ok(json!(ctx.node_id))
    }
}

struct Panicky;

#[async_trait]
impl NodeExecutor<AgentConfig> for Panicky {
    async fn execute(&self, _config: &AgentConfig, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        panic!("kaboom");
    }
}

/// Tool that fails `failures` times before succeeding.
struct FlakyTool {
    failures: u32,
    transient: bool,
    calls: AtomicU32,
}

impl FlakyTool {
    fn new(failures: u32, transient: bool) -> Self {
        Self {
            failures,
            transient,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExecutor<ToolConfig> for FlakyTool {
    async fn execute(&self, _config: &ToolConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(if self.transient {
                NodeError::transient("rate limited")
            } else {
                NodeError::failed("bad request")
            });
        }
        Ok(json!({ "attempt": ctx.attempt }))
    }
}

// --- Helpers ---

fn fast_retries() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..RetryPolicy::default()
        },
        ..ExecutorConfig::default()
    }
}

fn drain(rx: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

fn position_of(events: &[ExecutionEvent], id: &str, status: NodeStatus) -> usize {
    events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::NodeUpdate { node_id, update } if node_id == id && update.status == status))
        .unwrap_or_else(|| panic!("no {} event for {}", status, id))
}

fn chain(ids: &[&str]) -> WorkflowTemplate {
    let mut b = WorkflowBuilder::new("chain");
    for id in ids {
        b = b.agent(id, "test-model");
    }
    for pair in ids.windows(2) {
        b = b.connect(pair[0], pair[1]);
    }
    b.build()
}

// --- Tests ---

#[tokio::test]
async fn test_single_node_result() {
    let template = WorkflowBuilder::new("single").agent("only", "m").build();
    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin())
        .execute()
        .await;

    assert!(result.success);
    assert!(result.errors.is_empty());
    assert_eq!(result.node_results.len(), 1);
    assert!(result.node_results.contains_key("only"));
}

#[tokio::test]
async fn test_empty_graph_succeeds() {
    let result = WorkflowExecutor::new(Vec::new(), Vec::new(), NodeHandlers::builtin())
        .execute()
        .await;
    assert!(result.success);
    assert!(result.node_results.is_empty());
}

#[tokio::test]
async fn test_predecessor_completes_before_successor_runs() {
    let template = chain(&["a", "b"]);
    let (observer, mut rx) = ChannelObserver::new();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin())
        .with_observer(Arc::new(observer))
        .execute()
        .await;
    assert!(result.success);

    let events = drain(&mut rx);
    let a_done = position_of(&events, "a", NodeStatus::Completed);
    let b_running = position_of(&events, "b", NodeStatus::Running);
    assert!(a_done < b_running, "a must complete before b starts");

    // Every node is reset to idle before anything runs
    let first_running = position_of(&events, "a", NodeStatus::Running);
    assert!(position_of(&events, "b", NodeStatus::Idle) < first_running);

    assert!(matches!(events.last(), Some(ExecutionEvent::Completed(r)) if r.success));
}

#[tokio::test]
async fn test_successor_receives_predecessor_output() {
    let recorder = Arc::new(Recorder::default());
    let template = chain(&["a", "b"]);

    WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(recorder.clone()))
        .execute()
        .await;

    let b_calls = recorder.calls_for("b");
    assert_eq!(b_calls.len(), 1);
    assert_eq!(b_calls[0].get("a"), Some(&json!({ "from": "a" })));
    assert!(recorder.calls_for("a")[0].is_empty());
}

#[tokio::test]
async fn test_fan_in_executes_once_with_all_inputs() {
    let recorder = Arc::new(Recorder::default());
    let template = WorkflowBuilder::new("diamond")
        .agent("root", "m")
        .agent("left", "m")
        .agent("right", "m")
        .agent("join", "m")
        .connect("root", "left")
        .connect("root", "right")
        .connect("left", "join")
        .connect("right", "join")
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(recorder.clone()))
        .execute()
        .await;

    assert!(result.success);
    let join_calls = recorder.calls_for("join");
    assert_eq!(join_calls.len(), 1, "fan-in node must run exactly once");
    let keys: Vec<&String> = join_calls[0].keys().collect();
    assert_eq!(keys, vec!["left", "right"]);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_branch() {
    let template = WorkflowBuilder::new("isolation")
        .agent("bad", "m")
        .agent("after_bad", "m")
        .agent("good", "m")
        .agent("after_good", "m")
        .connect("bad", "after_bad")
        .connect("good", "after_good")
        .build();
    let (observer, mut rx) = ChannelObserver::new();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(FailOn(vec!["bad"]))))
        .with_observer(Arc::new(observer))
        .execute()
        .await;

    assert!(!result.success);
    assert_eq!(result.errors, vec!["Node bad: boom".to_string()]);
    assert_eq!(result.skipped, vec!["after_bad".to_string()]);
    assert!(result.node_results.contains_key("good"));
    assert!(result.node_results.contains_key("after_good"));
    assert!(!result.node_results.contains_key("bad"));

    let events = drain(&mut rx);
    position_of(&events, "bad", NodeStatus::Error);
    assert!(
        !events.iter().any(|e| matches!(e, ExecutionEvent::NodeUpdate { node_id, update } if node_id == "after_bad" && update.status == NodeStatus::Running)),
        "skipped node must never start"
    );
}

#[tokio::test]
async fn test_skip_propagates_through_join() {
    // A join with one failed input is skipped, and so is everything behind it
    let template = WorkflowBuilder::new("poisoned-join")
        .agent("bad", "m")
        .agent("ok", "m")
        .agent("join", "m")
        .agent("tail", "m")
        .connect("bad", "join")
        .connect("ok", "join")
        .connect("join", "tail")
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(FailOn(vec!["bad"]))))
        .execute()
        .await;

    assert!(result.node_results.contains_key("ok"));
    let mut skipped = result.skipped.clone();
    skipped.sort();
    assert_eq!(skipped, vec!["join".to_string(), "tail".to_string()]);
}

#[tokio::test]
async fn test_cycle_fails_the_run() {
    let template = WorkflowBuilder::new("cycle")
        .agent("a", "m")
        .agent("b", "m")
        .agent("c", "m")
        .connect("a", "b")
        .connect("b", "a")
        .connect("b", "c")
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin())
        .execute()
        .await;

    assert!(!result.success);
    assert!(result.node_results.is_empty());
    assert_eq!(result.errors, vec!["Cycle detected among nodes: a, b".to_string()]);
}

#[tokio::test]
async fn test_tool_retries_transient_failures() {
    let flaky = Arc::new(FlakyTool::new(2, true));
    let template = WorkflowBuilder::new("retry")
        .tool("search", ToolType::Search)
        .retries(2)
        .build()
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_tool(flaky.clone()))
        .with_config(fast_retries())
        .execute()
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(result.node_results["search"], json!({ "attempt": 2 }));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let flaky = Arc::new(FlakyTool::new(10, false));
    let template = WorkflowBuilder::new("no-retry")
        .tool("search", ToolType::Search)
        .retries(2)
        .build()
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_tool(flaky.clone()))
        .with_config(fast_retries())
        .execute()
        .await;

    assert!(!result.success);
    assert_eq!(flaky.calls(), 1);
    assert_eq!(result.errors, vec!["Node search: bad request".to_string()]);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let flaky = Arc::new(FlakyTool::new(10, true));
    let template = WorkflowBuilder::new("exhausted")
        .tool("search", ToolType::Search)
        .retries(1)
        .build()
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_tool(flaky.clone()))
        .with_config(fast_retries())
        .execute()
        .await;

    assert_eq!(flaky.calls(), 2);
    assert_eq!(
        result.errors,
        vec!["Node search: retries exhausted after 2 attempts: rate limited".to_string()]
    );
}

#[tokio::test]
async fn test_node_timeout() {
    let template = chain(&["slow", "next"]);
    let config = ExecutorConfig {
        node_timeout: Some(Duration::from_millis(50)),
        ..ExecutorConfig::default()
    };

    let started = Instant::now();
    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(Sleepy(Duration::from_secs(5)))))
        .with_config(config)
        .execute()
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Node slow: timed out after"), "{}", result.errors[0]);
    assert_eq!(result.skipped, vec!["next".to_string()]);
}

#[tokio::test]
async fn test_panicking_executor_becomes_node_error() {
    let template = WorkflowBuilder::new("panic").agent("p", "m").input("other", "x", 1).build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(Panicky)))
        .execute()
        .await;

    assert_eq!(result.errors, vec!["Node p: executor panicked: kaboom".to_string()]);
    assert_eq!(result.node_results.get("other"), Some(&json!(1)));
}

#[tokio::test]
async fn test_independent_branches_run_concurrently() {
    let template = WorkflowBuilder::new("parallel")
        .agent("a", "m")
        .agent("b", "m")
        .agent("c", "m")
        .build();
    let handlers = NodeHandlers::builtin().with_agent(Arc::new(Sleepy(Duration::from_millis(200))));

    let started = Instant::now();
    let result = WorkflowExecutor::from_template(&template, handlers.clone())
        .execute()
        .await;
    let parallel = started.elapsed();
    assert!(result.success);
    assert!(parallel < Duration::from_millis(500), "took {:?}", parallel);

    let started = Instant::now();
    WorkflowExecutor::from_template(&template, handlers)
        .with_config(ExecutorConfig {
            max_concurrency: 1,
            ..ExecutorConfig::default()
        })
        .execute()
        .await;
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let template = chain(&["slow", "never"]);
    let (observer, mut rx) = ChannelObserver::new();
    let executor = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(Sleepy(Duration::from_secs(10)))))
        .with_observer(Arc::new(observer));
    let handle = executor.cancel_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let result = executor.execute().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.success);
    assert_eq!(result.errors, vec!["Execution cancelled".to_string()]);
    assert_eq!(result.skipped, vec!["never".to_string()]);

    let events = drain(&mut rx);
    let running = position_of(&events, "slow", NodeStatus::Running);
    let cancelled = position_of(&events, "slow", NodeStatus::Error);
    assert!(running < cancelled);
    match &events[cancelled] {
        ExecutionEvent::NodeUpdate { update, .. } => assert_eq!(update.error.as_deref(), Some("cancelled")),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, ExecutionEvent::NodeUpdate { node_id, update } if node_id == "never" && update.status != NodeStatus::Idle)));
}

#[tokio::test]
async fn test_execution_time_matches_wall_clock() {
    let template = chain(&["nap"]);
    let executor = WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(Sleepy(Duration::from_millis(100)))));

    let started = Instant::now();
    let result = executor.execute().await;
    let wall_ms = started.elapsed().as_millis() as u64;

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.execution_time_ms >= 100, "{} ms", result.execution_time_ms);
    assert!(result.execution_time_ms <= wall_ms + 5, "{} ms vs {} ms wall", result.execution_time_ms, wall_ms);
}

#[tokio::test]
async fn test_data_flow_events_follow_edges() {
    let template = chain(&["a", "b", "c"]);
    let (observer, mut rx) = ChannelObserver::new();

    WorkflowExecutor::from_template(&template, NodeHandlers::builtin())
        .with_observer(Arc::new(observer))
        .execute()
        .await;

    let flows: Vec<(String, String)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::DataFlow(f) => Some((f.edge_id, f.target_id)),
            _ => None,
        })
        .collect();
    assert_eq!(
        flows,
        vec![("e-a-b".to_string(), "b".to_string()), ("e-b-c".to_string(), "c".to_string())]
    );
}

#[tokio::test]
async fn test_monitor_tracks_run() {
    let template = WorkflowBuilder::new("monitored")
        .agent("a", "m")
        .agent("b", "m")
        .agent("bad", "m")
        .connect("a", "b")
        .build();
    let monitor = Arc::new(RunMonitor::default());
    let (channel, _rx) = ChannelObserver::new();
    let observers = Observers::new().with(monitor.clone()).with(Arc::new(channel));

    WorkflowExecutor::from_template(&template, NodeHandlers::builtin().with_agent(Arc::new(FailOn(vec!["bad"]))))
        .with_observer(Arc::new(observers))
        .execute()
        .await;

    assert!(monitor.is_finished());
    assert!(monitor.transition_violations().is_empty());
    assert_eq!(monitor.status("b"), Some(NodeStatus::Completed));
    assert_eq!(monitor.status("bad"), Some(NodeStatus::Error));
    assert!(monitor.flows().is_flowing("e-a-b"));

    let metrics = monitor.metrics().unwrap();
    assert_eq!(metrics.completed_count, 2);
    assert_eq!(metrics.failed_count, 1);
    assert_eq!(metrics.error_count, 1);

    let summary = monitor.render_summary();
    assert!(summary.starts_with("FAILED"));
    assert!(summary.contains("error: Node bad: boom"));
}

#[tokio::test]
async fn test_builtin_handlers_end_to_end() {
    let template = WorkflowBuilder::new("pipeline")
        .input("x", "x", 21)
        .transform("double", "x * 2")
        .condition("big", "input > 40")
        .output("out", "answer")
        .connect("x", "double")
        .connect("double", "big")
        .connect("big", "out")
        .build();

    let result = WorkflowExecutor::from_template(&template, NodeHandlers::builtin())
        .execute()
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.node_results["double"], json!(42));
    assert_eq!(result.node_results["big"], json!({ "result": true }));
    assert_eq!(result.node_results["out"], json!({ "result": true }));
}
