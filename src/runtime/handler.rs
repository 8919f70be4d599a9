use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::actions::builtin::{DataSlotExecutor, ExpressionLogic, UiIntentExecutor};
use crate::actions::http::ToolRouter;
use crate::actions::simulated::{LatencyRange, SimulatedAgent, SimulatedTool};
use crate::dsl::{AgentConfig, DataConfig, LogicConfig, NodeKind, ToolConfig, UiConfig};
use crate::runtime::error::NodeError;

/// Outputs of a node's predecessors, keyed by predecessor id.
pub type NodeInputs = BTreeMap<String, Value>;

/// 节点执行上下文
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    pub node_id: &'a str,
    pub inputs: &'a NodeInputs,
    /// Zero-based attempt number; non-zero only on retries.
    pub attempt: u32,
}

/// 节点执行能力接口，每种节点类型各一个实现
#[async_trait]
pub trait NodeExecutor<C>: Send + Sync
where
    C: Send + Sync,
{
    async fn execute(&self, config: &C, ctx: &NodeContext<'_>) -> Result<Value, NodeError>;
}

/// One executor per node kind.
#[derive(Clone)]
pub struct NodeHandlers {
    pub agent: Arc<dyn NodeExecutor<AgentConfig>>,
    pub tool: Arc<dyn NodeExecutor<ToolConfig>>,
    pub data: Arc<dyn NodeExecutor<DataConfig>>,
    pub logic: Arc<dyn NodeExecutor<LogicConfig>>,
    pub ui: Arc<dyn NodeExecutor<UiConfig>>,
}

impl NodeHandlers {
    /// Built-in executors with no artificial latency. Agents are simulated;
    /// `http` tools perform real requests.
    pub fn builtin() -> Self {
        Self {
            agent: Arc::new(SimulatedAgent::new(LatencyRange::none())),
            tool: Arc::new(ToolRouter::new(Arc::new(SimulatedTool::new(LatencyRange::none())))),
            data: Arc::new(DataSlotExecutor),
            logic: Arc::new(ExpressionLogic),
            ui: Arc::new(UiIntentExecutor),
        }
    }

    /// Built-in executors where agents and non-http tools sleep for a random
    /// duration in `latency` before answering.
    pub fn simulated(latency: LatencyRange) -> Self {
        Self {
            agent: Arc::new(SimulatedAgent::new(latency)),
            tool: Arc::new(ToolRouter::new(Arc::new(SimulatedTool::new(latency)))),
            ..Self::builtin()
        }
    }

    pub fn with_agent(mut self, executor: Arc<dyn NodeExecutor<AgentConfig>>) -> Self {
        self.agent = executor;
        self
    }

    pub fn with_tool(mut self, executor: Arc<dyn NodeExecutor<ToolConfig>>) -> Self {
        self.tool = executor;
        self
    }

    pub fn with_data(mut self, executor: Arc<dyn NodeExecutor<DataConfig>>) -> Self {
        self.data = executor;
        self
    }

    pub fn with_logic(mut self, executor: Arc<dyn NodeExecutor<LogicConfig>>) -> Self {
        self.logic = executor;
        self
    }

    pub fn with_ui(mut self, executor: Arc<dyn NodeExecutor<UiConfig>>) -> Self {
        self.ui = executor;
        self
    }

    pub async fn dispatch(&self, kind: &NodeKind, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        match kind {
            NodeKind::Agent(config) => self.agent.execute(config, ctx).await,
            NodeKind::Tool(config) => self.tool.execute(config, ctx).await,
            NodeKind::Data(config) => self.data.execute(config, ctx).await,
            NodeKind::Logic(config) => self.logic.execute(config, ctx).await,
            NodeKind::Ui(config) => self.ui.execute(config, ctx).await,
        }
    }
}

impl Default for NodeHandlers {
    fn default() -> Self {
        Self::builtin()
    }
}
