use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::dsl::{Edge, FlowAnnotation};
use crate::runtime::observer::{DataFlow, ExecutionObserver, NodeUpdate};
use crate::runtime::report::ExecutionResult;

const PREVIEW_LIMIT: usize = 200;

#[derive(Debug, Clone)]
struct LiveEdge {
    until: Instant,
    preview: Value,
}

/// 数据流动画桥接
///
/// Marks an edge live for `window` after data flows along it, so the canvas
/// can animate it. Expired entries are dropped lazily on read.
#[derive(Debug)]
pub struct FlowTracker {
    window: Duration,
    live: DashMap<String, LiveEdge>,
}

impl FlowTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            live: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn mark(&self, flow: &DataFlow) {
        self.mark_at(flow, Instant::now());
    }

    pub fn mark_at(&self, flow: &DataFlow, now: Instant) {
        self.live.insert(
            flow.edge_id.clone(),
            LiveEdge {
                until: now + self.window,
                preview: preview(&flow.payload),
            },
        );
    }

    pub fn is_flowing(&self, edge_id: &str) -> bool {
        self.is_flowing_at(edge_id, Instant::now())
    }

    pub fn is_flowing_at(&self, edge_id: &str, now: Instant) -> bool {
        self.live.get(edge_id).is_some_and(|e| e.until > now)
    }

    /// Currently live edge ids, sorted.
    pub fn live_edges(&self) -> Vec<String> {
        let now = Instant::now();
        self.live.retain(|_, e| e.until > now);
        let mut ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Write the current flow state onto the edges' annotations.
    pub fn annotate(&self, edges: &mut [Edge]) {
        let now = Instant::now();
        for edge in edges.iter_mut() {
            edge.flow_annotation = match self.live.get(&edge.id) {
                Some(e) if e.until > now => Some(FlowAnnotation {
                    is_flowing: true,
                    payload_preview: Some(e.preview.clone()),
                }),
                _ => None,
            };
        }
    }
}

impl ExecutionObserver for FlowTracker {
    fn on_node_update(&self, _node_id: &str, _update: &NodeUpdate) {}

    fn on_execution_complete(&self, _result: &ExecutionResult) {}

    fn on_data_flow(&self, flow: &DataFlow) {
        self.mark(flow);
    }
}

fn preview(payload: &Value) -> Value {
    let text = payload.to_string();
    if text.chars().count() <= PREVIEW_LIMIT {
        return payload.clone();
    }
    let truncated: String = text.chars().take(PREVIEW_LIMIT).collect();
    Value::String(format!("{}…", truncated))
}
