use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use crate::actions::resolve_placeholders;
use crate::dsl::{AgentConfig, ToolConfig};
use crate::runtime::error::NodeError;
use crate::runtime::handler::{NodeContext, NodeExecutor};

/// Uniform artificial latency, used by the demo executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn between_ms(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    /// Bounds may arrive inverted from deserialized config; they are ordered here.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = (self.min_ms.min(self.max_ms), self.max_ms.max(self.min_ms));
        if hi == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    pub async fn wait(&self) {
        let d = self.sample();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

/// Stand-in for a language-model step. Real agents are injected by the
/// embedding application through `NodeHandlers::with_agent`.
#[derive(Debug)]
pub struct SimulatedAgent {
    latency: LatencyRange,
}

impl SimulatedAgent {
    pub fn new(latency: LatencyRange) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl NodeExecutor<AgentConfig> for SimulatedAgent {
    async fn execute(&self, config: &AgentConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        self.latency.wait().await;
        let steps = config.max_steps.min(1 + ctx.inputs.len() as u32);
        Ok(json!({
            "model": config.model,
            "temperature": config.temperature,
            "steps": steps,
            "toolsUsed": config.tools,
            "response": format!("Simulated {} response over {} input(s)", config.model, ctx.inputs.len()),
        }))
    }
}

/// Canned answers for the non-http tool types.
#[derive(Debug)]
pub struct SimulatedTool {
    latency: LatencyRange,
}

impl SimulatedTool {
    pub fn new(latency: LatencyRange) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl NodeExecutor<ToolConfig> for SimulatedTool {
    async fn execute(&self, config: &ToolConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        self.latency.wait().await;
        let params = resolve_placeholders(&config.parameters, ctx.inputs);
        let query = params.get("query").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "toolType": config.tool_type,
            "provider": config.provider,
            "query": query,
            "results": [
                { "title": "Simulated result", "snippet": "Canned tool output" }
            ],
        }))
    }
}
