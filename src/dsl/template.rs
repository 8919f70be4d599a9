use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Edge, Node};

/// 可保存的工作流模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: TemplateCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub metadata: TemplateMetadata,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            category: TemplateCategory::default(),
            tags: Vec::new(),
            nodes,
            edges,
            metadata: TemplateMetadata::default(),
        }
    }

    /// Case-insensitive substring match over name, description and tags.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.name.to_lowercase().contains(&q)
            || self.description.to_lowercase().contains(&q)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&q))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    Research,
    Shopping,
    Analysis,
    Automation,
    #[default]
    Custom,
}

impl std::str::FromStr for TemplateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "shopping" => Ok(Self::Shopping),
            "analysis" => Ok(Self::Analysis),
            "automation" => Ok(Self::Automation),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown template category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub rating: f32,
}

impl Default for TemplateMetadata {
    fn default() -> Self {
        Self {
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: default_version(),
            author: String::new(),
            usage_count: 0,
            rating: 0.0,
        }
    }
}

pub(crate) fn default_version() -> String {
    "1.0.0".to_string()
}

/// 可复用组件定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    /// A component may be implemented by an embedded workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowTemplate>,
    #[serde(default)]
    pub metadata: ComponentMetadata,
}

impl ComponentDefinition {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            kind,
            description: String::new(),
            category: String::new(),
            configuration: Map::new(),
            workflow: None,
            metadata: ComponentMetadata::default(),
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.name.to_lowercase().contains(&q)
            || self.description.to_lowercase().contains(&q)
            || self.category.to_lowercase().contains(&q)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Agent,
    Tool,
    Panel,
    Logic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetadata {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
}

impl Default for ComponentMetadata {
    fn default() -> Self {
        Self {
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: default_version(),
            author: String::new(),
        }
    }
}
