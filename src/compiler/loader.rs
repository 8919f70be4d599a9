use anyhow::{Context as AnyhowContext, Result};
use std::fs;
use std::path::Path;
use crate::dsl::WorkflowTemplate;

/// 从文件加载模板 (`.json` 按 JSON 解析，其余按 YAML)
pub fn load_template_from_file(file_path: impl AsRef<Path>) -> Result<WorkflowTemplate> {
    let path = file_path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file from {}", path.display()))?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let template: WorkflowTemplate = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to deserialize JSON content from {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize YAML content from {}", path.display()))?
    };

    Ok(template)
}
