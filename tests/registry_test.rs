use karta::dsl::builder::WorkflowBuilder;
use karta::dsl::{ComponentDefinition, ComponentKind, TemplateCategory, ToolType, WorkflowTemplate};
use karta::store::file::FileKv;
use karta::store::seed::DEFAULT_TEMPLATE_ID;
use karta::store::{InMemoryKv, KvStore, RegistryEvent, StoreError, TemplateRegistry};
use serde_json::json;
use std::sync::Arc;

fn sample_template() -> WorkflowTemplate {
    WorkflowBuilder::new("Deal Finder")
        .description("Finds cheap laptops")
        .category(TemplateCategory::Shopping)
        .tag("deals")
        .input("q", "query", "laptop")
        .tool("shop", ToolType::Shopping)
            .param("query", "${q}")
            .build()
        .panel("results", "Deals")
        .connect("q", "shop")
        .connect("shop", "results")
        .build()
}

fn cyclic_template() -> WorkflowTemplate {
    WorkflowBuilder::new("Loop Forever")
        .agent("a", "m")
        .agent("b", "m")
        .connect("a", "b")
        .connect("b", "a")
        .build()
}

#[tokio::test]
async fn test_empty_store_lists_default_template() {
    let registry = TemplateRegistry::in_memory();

    let templates = registry.list().await.unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].id, DEFAULT_TEMPLATE_ID);
    assert_eq!(templates[0].category, TemplateCategory::Research);

    // Seeding happens once and is persisted
    let again = registry.list().await.unwrap();
    assert_eq!(again.len(), 1);
    assert!(registry.get(DEFAULT_TEMPLATE_ID).await.unwrap().is_some());
}

#[tokio::test]
async fn test_save_assigns_identity_and_metadata() {
    let registry = TemplateRegistry::in_memory();

    let saved = registry.save(sample_template()).await.unwrap();
    assert!(!saved.id.is_empty());
    assert_eq!(saved.metadata.version, "1.0.0");
    assert_eq!(saved.metadata.usage_count, 0);
    assert_eq!(saved.metadata.created_at, saved.metadata.updated_at);

    let second = registry.save(sample_template()).await.unwrap();
    assert_ne!(saved.id, second.id);

    let fetched = registry.get(&saved.id).await.unwrap().unwrap();
    assert_eq!(fetched, saved);
}

#[tokio::test]
async fn test_save_rejects_invalid_graph() {
    let registry = TemplateRegistry::in_memory();
    let err = registry.save(cyclic_template()).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidGraph(_)));
    assert_eq!(err.to_string(), "Invalid workflow graph: Cycle detected among nodes: a, b");
}

#[tokio::test]
async fn test_load_counts_usage() {
    let registry = TemplateRegistry::in_memory();
    let saved = registry.save(sample_template()).await.unwrap();

    registry.load(&saved.id).await.unwrap();
    let loaded = registry.load(&saved.id).await.unwrap().unwrap();
    assert_eq!(loaded.metadata.usage_count, 2);

    // get has no side effects
    let peeked = registry.get(&saved.id).await.unwrap().unwrap();
    assert_eq!(peeked.metadata.usage_count, 2);
    assert!(registry.load("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_bumps_timestamp() {
    let registry = TemplateRegistry::in_memory();
    let saved = registry.save(sample_template()).await.unwrap();

    let mut edited = saved.clone();
    edited.name = "Deal Finder v2".to_string();
    let updated = registry.update(edited).await.unwrap();

    assert_eq!(updated.metadata.created_at, saved.metadata.created_at);
    assert!(updated.metadata.updated_at >= saved.metadata.updated_at);
    assert_eq!(registry.get(&saved.id).await.unwrap().unwrap().name, "Deal Finder v2");

    let mut unknown = sample_template();
    unknown.id = "missing".to_string();
    assert!(matches!(registry.update(unknown).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_delete() {
    let registry = TemplateRegistry::in_memory();
    let saved = registry.save(sample_template()).await.unwrap();

    assert!(registry.delete(&saved.id).await.unwrap());
    assert!(!registry.delete(&saved.id).await.unwrap());
    assert!(registry.get(&saved.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let registry = TemplateRegistry::in_memory();
    let original = sample_template();
    let saved = registry.save(original.clone()).await.unwrap();

    let text = registry.export_as_text(&saved.id).await.unwrap().unwrap();
    assert!(text.contains('\n'), "export is pretty-printed");

    let imported = registry.import_from_text(&text).await.unwrap().unwrap();
    assert_ne!(imported.id, saved.id, "imports get a fresh id");
    assert_eq!(imported.name, original.name);
    assert_eq!(imported.nodes, original.nodes);
    assert_eq!(imported.edges, original.edges);

    assert!(registry.export_as_text("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_rejects_malformed_text() {
    let registry = TemplateRegistry::in_memory();

    assert!(registry.import_from_text("not json at all").await.unwrap().is_none());
    assert!(
        registry
            .import_from_text(&json!({ "name": "no id", "nodes": [] }).to_string())
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        registry
            .import_from_text(&json!({ "id": "x", "name": "no nodes" }).to_string())
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        registry
            .import_from_text(&json!({ "id": "x", "name": "bad", "nodes": [{ "id": "n", "kind": "warp" }] }).to_string())
            .await
            .unwrap()
            .is_none()
    );

    // Only the seed remains
    assert_eq!(registry.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_import_of_cyclic_template_is_an_error() {
    let registry = TemplateRegistry::in_memory();
    let mut cyclic = cyclic_template();
    cyclic.id = "c1".to_string();
    let text = serde_json::to_string(&cyclic).unwrap();

    assert!(matches!(
        registry.import_from_text(&text).await,
        Err(StoreError::InvalidGraph(_))
    ));
}

#[tokio::test]
async fn test_search_and_category() {
    let registry = TemplateRegistry::in_memory();
    registry.save(sample_template()).await.unwrap();

    let hits = registry.search("LAPTOP").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Deal Finder");

    assert_eq!(registry.search("deals").await.unwrap().len(), 1);
    assert!(registry.search("video").await.unwrap().is_empty());

    let shopping = registry.list_by_category(TemplateCategory::Shopping).await.unwrap();
    assert_eq!(shopping.len(), 1);
    assert!(registry.list_by_category(TemplateCategory::Automation).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let registry = TemplateRegistry::in_memory();
    let first = registry.save(sample_template()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = registry.save(sample_template()).await.unwrap();

    let ids: Vec<String> = registry.list().await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn test_components() {
    let registry = TemplateRegistry::in_memory();
    assert!(registry.list_components().await.unwrap().is_empty());

    let mut component = ComponentDefinition::new("Web Search", ComponentKind::Tool);
    component.category = "retrieval".to_string();
    component.configuration.insert("provider".to_string(), json!("tavily"));
    let saved = registry.save_component(component).await.unwrap();
    assert!(!saved.id.is_empty());

    assert_eq!(registry.list_components().await.unwrap().len(), 1);
    assert_eq!(registry.search_components("RETRIEV").await.unwrap().len(), 1);

    let text = registry.export_component(&saved.id).await.unwrap().unwrap();
    let imported = registry.import_component(&text).await.unwrap().unwrap();
    assert_ne!(imported.id, saved.id);
    assert_eq!(imported.configuration, saved.configuration);

    assert!(
        registry
            .import_component(&json!({ "id": "x", "name": "typeless" }).to_string())
            .await
            .unwrap()
            .is_none()
    );

    assert!(registry.delete_component(&saved.id).await.unwrap());
    assert!(registry.get_component(&saved.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_component_workflow_is_validated() {
    let registry = TemplateRegistry::in_memory();
    let mut component = ComponentDefinition::new("Broken", ComponentKind::Logic);
    component.workflow = Some(cyclic_template());

    assert!(matches!(
        registry.save_component(component).await,
        Err(StoreError::InvalidGraph(_))
    ));
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let registry = TemplateRegistry::in_memory();
    let mut rx = registry.subscribe();

    let saved = registry.save(sample_template()).await.unwrap();
    registry.load(&saved.id).await.unwrap();
    registry.delete(&saved.id).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), RegistryEvent::TemplateSaved(saved.id.clone()));
    assert_eq!(rx.recv().await.unwrap(), RegistryEvent::TemplateLoaded(saved.id.clone()));
    assert_eq!(rx.recv().await.unwrap(), RegistryEvent::TemplateDeleted(saved.id.clone()));
}

#[tokio::test]
async fn test_file_backend_persists_across_registries() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let saved = {
        let backend = Arc::new(FileKv::new(temp_dir.path()).await.unwrap());
        let registry = TemplateRegistry::new(backend);
        registry.save(sample_template()).await.unwrap()
    };

    let path = temp_dir.path().join("templates").join(format!("{}.json", saved.id));
    assert!(path.exists());

    let backend = Arc::new(FileKv::new(temp_dir.path()).await.unwrap());
    let registry = TemplateRegistry::new(backend);
    let reopened = registry.get(&saved.id).await.unwrap().unwrap();
    assert_eq!(reopened, saved);
    assert_eq!(registry.list().await.unwrap().len(), 1, "no seeding when templates exist");
}

#[tokio::test]
async fn test_file_backend_rejects_path_keys() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let backend = FileKv::new(temp_dir.path()).await.unwrap();

    assert!(matches!(
        backend.get("templates", "../escape").await,
        Err(StoreError::InvalidKey(_))
    ));
    assert!(backend.get("templates", "absent").await.unwrap().is_none());
    assert!(!backend.delete("templates", "absent").await.unwrap());
    assert!(backend.values("never-written").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_in_memory_backend() {
    let kv = InMemoryKv::new();
    kv.put("c", "1", "one".to_string()).await.unwrap();
    kv.put("c", "2", "two".to_string()).await.unwrap();
    kv.put("other", "1", "uno".to_string()).await.unwrap();

    assert_eq!(kv.get("c", "1").await.unwrap().as_deref(), Some("one"));
    let mut values = kv.values("c").await.unwrap();
    values.sort();
    assert_eq!(values, vec!["one".to_string(), "two".to_string()]);

    assert!(kv.delete("c", "1").await.unwrap());
    assert!(kv.get("c", "1").await.unwrap().is_none());
    assert_eq!(kv.get("other", "1").await.unwrap().as_deref(), Some("uno"));
}
