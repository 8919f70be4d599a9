use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{InMemoryKv, KvStore, StoreError, seed};
use crate::compiler::graph::validate;
use crate::dsl::template::default_version;
use crate::dsl::{ComponentDefinition, TemplateCategory, WorkflowTemplate};

pub const TEMPLATES: &str = "templates";
pub const COMPONENTS: &str = "components";

const EVENT_CAPACITY: usize = 64;

/// Change notifications published by a `TemplateRegistry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    TemplateSaved(String),
    TemplateUpdated(String),
    TemplateLoaded(String),
    TemplateDeleted(String),
    ComponentSaved(String),
    ComponentDeleted(String),
}

/// 模板与组件仓库
///
/// Templates and components are stored as JSON text in two collections of
/// the backend. Every graph is validated before it is written.
pub struct TemplateRegistry {
    backend: Arc<dyn KvStore>,
    events: broadcast::Sender<RegistryEvent>,
}

impl TemplateRegistry {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { backend, events }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKv::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // --- Templates ---

    /// Stores `template` under a fresh id with fresh metadata.
    pub async fn save(&self, mut template: WorkflowTemplate) -> Result<WorkflowTemplate, StoreError> {
        validate(&template.nodes, &template.edges)?;

        let now = Utc::now();
        template.id = Uuid::new_v4().to_string();
        template.metadata.created_at = now;
        template.metadata.updated_at = now;
        template.metadata.version = default_version();
        template.metadata.usage_count = 0;

        self.write(TEMPLATES, &template.id, &template).await?;
        info!(id = %template.id, name = %template.name, "Template saved");
        self.publish(RegistryEvent::TemplateSaved(template.id.clone()));
        Ok(template)
    }

    /// All templates, most recently updated first. An empty store is seeded
    /// with the built-in default template.
    pub async fn list(&self) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let mut templates: Vec<WorkflowTemplate> = self.read_all(TEMPLATES).await?;
        if templates.is_empty() {
            let seeded = seed::default_template();
            self.write(TEMPLATES, &seeded.id, &seeded).await?;
            info!(id = %seeded.id, "Seeded default template");
            templates.push(seeded);
        }
        templates.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        Ok(templates)
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        self.read(TEMPLATES, id).await
    }

    /// Like `get`, but counts as a use of the template.
    pub async fn load(&self, id: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        let Some(mut template) = self.get(id).await? else {
            return Ok(None);
        };
        template.metadata.usage_count += 1;
        self.write(TEMPLATES, id, &template).await?;
        debug!(id, usage_count = template.metadata.usage_count, "Template loaded");
        self.publish(RegistryEvent::TemplateLoaded(id.to_string()));
        Ok(Some(template))
    }

    pub async fn update(&self, mut template: WorkflowTemplate) -> Result<WorkflowTemplate, StoreError> {
        validate(&template.nodes, &template.edges)?;
        let existing = self
            .get(&template.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("template {}", template.id)))?;

        template.metadata.created_at = existing.metadata.created_at;
        template.metadata.updated_at = Utc::now();

        self.write(TEMPLATES, &template.id, &template).await?;
        info!(id = %template.id, "Template updated");
        self.publish(RegistryEvent::TemplateUpdated(template.id.clone()));
        Ok(template)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.backend.delete(TEMPLATES, id).await?;
        if removed {
            info!(id, "Template deleted");
            self.publish(RegistryEvent::TemplateDeleted(id.to_string()));
        }
        Ok(removed)
    }

    pub async fn export_as_text(&self, id: &str) -> Result<Option<String>, StoreError> {
        match self.get(id).await? {
            Some(template) => Ok(Some(serde_json::to_string_pretty(&template)?)),
            None => Ok(None),
        }
    }

    /// Accepts an exported template. Returns `None` when the text is not a
    /// template; a well-formed template with an invalid graph is an error.
    pub async fn import_from_text(&self, text: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        let Some(template) = parse_import::<WorkflowTemplate>(text, &["id", "name", "nodes"]) else {
            return Ok(None);
        };
        self.save(template).await.map(Some)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let mut templates = self.list().await?;
        templates.retain(|t| t.matches(query));
        Ok(templates)
    }

    pub async fn list_by_category(&self, category: TemplateCategory) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let mut templates = self.list().await?;
        templates.retain(|t| t.category == category);
        Ok(templates)
    }

    // --- Components ---

    pub async fn save_component(&self, mut component: ComponentDefinition) -> Result<ComponentDefinition, StoreError> {
        if let Some(workflow) = &component.workflow {
            validate(&workflow.nodes, &workflow.edges)?;
        }

        let now = Utc::now();
        component.id = Uuid::new_v4().to_string();
        component.metadata.created_at = now;
        component.metadata.updated_at = now;

        self.write(COMPONENTS, &component.id, &component).await?;
        info!(id = %component.id, name = %component.name, kind = ?component.kind, "Component saved");
        self.publish(RegistryEvent::ComponentSaved(component.id.clone()));
        Ok(component)
    }

    pub async fn list_components(&self) -> Result<Vec<ComponentDefinition>, StoreError> {
        let mut components: Vec<ComponentDefinition> = self.read_all(COMPONENTS).await?;
        components.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        Ok(components)
    }

    pub async fn get_component(&self, id: &str) -> Result<Option<ComponentDefinition>, StoreError> {
        self.read(COMPONENTS, id).await
    }

    pub async fn delete_component(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.backend.delete(COMPONENTS, id).await?;
        if removed {
            info!(id, "Component deleted");
            self.publish(RegistryEvent::ComponentDeleted(id.to_string()));
        }
        Ok(removed)
    }

    pub async fn export_component(&self, id: &str) -> Result<Option<String>, StoreError> {
        match self.get_component(id).await? {
            Some(component) => Ok(Some(serde_json::to_string_pretty(&component)?)),
            None => Ok(None),
        }
    }

    pub async fn import_component(&self, text: &str) -> Result<Option<ComponentDefinition>, StoreError> {
        let Some(component) = parse_import::<ComponentDefinition>(text, &["id", "name", "type"]) else {
            return Ok(None);
        };
        self.save_component(component).await.map(Some)
    }

    pub async fn search_components(&self, query: &str) -> Result<Vec<ComponentDefinition>, StoreError> {
        let mut components = self.list_components().await?;
        components.retain(|c| c.matches(query));
        Ok(components)
    }

    // --- Backend helpers ---

    async fn read<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(collection, id).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Entries that no longer parse are logged and left out.
    async fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        for text in self.backend.values(collection).await? {
            match serde_json::from_str(&text) {
                Ok(item) => items.push(item),
                Err(e) => warn!(collection, error = %e, "Skipping unreadable entry"),
            }
        }
        Ok(items)
    }

    async fn write<T: serde::Serialize>(&self, collection: &str, id: &str, item: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(item)?;
        self.backend.put(collection, id, text).await
    }
}

fn parse_import<T: DeserializeOwned>(text: &str, required: &[&str]) -> Option<T> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Import rejected: not valid JSON");
            return None;
        }
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| value.get(*field).is_none_or(Value::is_null))
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "Import rejected: required fields missing");
        return None;
    }

    match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(error = %e, "Import rejected: malformed payload");
            None
        }
    }
}
