use crate::dsl::{
    AgentConfig, DataConfig, DataSlot, Edge, LogicConfig, LogicType, Node, NodeKind,
    TemplateCategory, ToolConfig, ToolType, UiConfig, UiType, ValueType, WorkflowTemplate,
};
use serde_json::Value;

pub struct WorkflowBuilder {
    name: String,
    description: String,
    category: TemplateCategory,
    tags: Vec<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            category: TemplateCategory::Custom,
            tags: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn category(mut self, category: TemplateCategory) -> Self {
        self.category = category;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn agent(self, id: &str, model: &str) -> Self {
        self.node(Node::new(
            id,
            NodeKind::Agent(AgentConfig {
                model: model.to_string(),
                ..AgentConfig::default()
            }),
        ))
    }

    pub fn tool(self, id: &str, tool_type: ToolType) -> ToolBuilder {
        ToolBuilder {
            workflow_builder: self,
            id: id.to_string(),
            config: ToolConfig::new(tool_type),
        }
    }

    pub fn input(self, id: &str, name: &str, value: impl Into<Value>) -> Self {
        self.data(id, DataSlot::Input, name, value.into())
    }

    pub fn variable(self, id: &str, name: &str, value: impl Into<Value>) -> Self {
        self.data(id, DataSlot::Variable, name, value.into())
    }

    pub fn output(self, id: &str, name: &str) -> Self {
        self.data(id, DataSlot::Output, name, Value::Null)
    }

    fn data(self, id: &str, slot: DataSlot, name: &str, value: Value) -> Self {
        self.node(Node::new(
            id,
            NodeKind::Data(DataConfig {
                data_type: slot,
                name: name.to_string(),
                value_type: ValueType::Any,
                default_value: value,
            }),
        ))
    }

    pub fn condition(self, id: &str, expression: &str) -> Self {
        self.logic(id, LogicType::Condition, expression, None)
    }

    pub fn transform(self, id: &str, expression: &str) -> Self {
        self.logic(id, LogicType::Transform, expression, None)
    }

    pub fn repeat(self, id: &str, expression: &str, iterations: u32) -> Self {
        self.logic(id, LogicType::Loop, expression, Some(iterations))
    }

    fn logic(self, id: &str, logic_type: LogicType, expression: &str, max_iterations: Option<u32>) -> Self {
        self.node(Node::new(
            id,
            NodeKind::Logic(LogicConfig {
                logic_type,
                expression: expression.to_string(),
                max_iterations,
            }),
        ))
    }

    pub fn panel(self, id: &str, title: &str) -> Self {
        self.node(Node::new(
            id,
            NodeKind::Ui(UiConfig {
                ui_type: UiType::Panel,
                title: title.to_string(),
                panel_type: None,
                message: None,
            }),
        ))
    }

    pub fn notify(self, id: &str, message: &str) -> Self {
        self.node(Node::new(
            id,
            NodeKind::Ui(UiConfig {
                ui_type: UiType::Notification,
                title: String::new(),
                panel_type: None,
                message: Some(message.to_string()),
            }),
        ))
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    pub fn build(self) -> WorkflowTemplate {
        WorkflowTemplate {
            description: self.description,
            category: self.category,
            tags: self.tags,
            ..WorkflowTemplate::new(self.name, self.nodes, self.edges)
        }
    }
}

pub struct ToolBuilder {
    workflow_builder: WorkflowBuilder,
    id: String,
    config: ToolConfig,
}

impl ToolBuilder {
    pub fn provider(mut self, provider: &str) -> Self {
        self.config.provider = provider.to_string();
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn retries(mut self, retry_count: u32) -> Self {
        self.config.retry_count = retry_count;
        self
    }

    pub fn build(mut self) -> WorkflowBuilder {
        self.workflow_builder
            .nodes
            .push(Node::new(self.id, NodeKind::Tool(self.config)));
        self.workflow_builder
    }
}
