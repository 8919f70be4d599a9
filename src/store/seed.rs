use chrono::Utc;

use crate::dsl::builder::WorkflowBuilder;
use crate::dsl::{TemplateCategory, ToolType, WorkflowTemplate};

pub const DEFAULT_TEMPLATE_ID: &str = "research-assistant";

/// The template an empty store is seeded with: a query flows through a web
/// search into an agent, whose answer lands in a panel.
pub fn default_template() -> WorkflowTemplate {
    let mut template = WorkflowBuilder::new("Research Assistant")
        .description("Searches the web for a question and summarizes the findings in an answer panel")
        .category(TemplateCategory::Research)
        .tag("research")
        .tag("search")
        .input("query", "query", "What is new in Rust this year?")
        .tool("search", ToolType::Search)
        .provider("tavily")
        .param("query", "${query}")
        .retries(2)
        .build()
        .agent("researcher", "gpt-4o-mini")
        .panel("answer", "Research Answer")
        .connect("query", "search")
        .connect("query", "researcher")
        .connect("search", "researcher")
        .connect("researcher", "answer")
        .build();

    let now = Utc::now();
    template.id = DEFAULT_TEMPLATE_ID.to_string();
    template.metadata.created_at = now;
    template.metadata.updated_at = now;
    template.metadata.author = "system".to_string();
    template
}
