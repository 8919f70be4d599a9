use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use crate::actions::resolve_placeholders;
use crate::dsl::{ToolConfig, ToolType};
use crate::runtime::error::NodeError;
use crate::runtime::handler::{NodeContext, NodeExecutor};

/// `http` tool: `url` (required), `method`, `body`, `headers` parameters.
/// Any parameter written as `"${node_id}"` is replaced with that
/// predecessor's output.
#[derive(Debug, Clone)]
pub struct HttpTool {
    client: Client,
}

impl HttpTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor<ToolConfig> for HttpTool {
    async fn execute(&self, config: &ToolConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        let params = resolve_placeholders(&config.parameters, ctx.inputs);

        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::InvalidConfig("missing required parameter: url".to_string()))?;

        let method_str = params.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
        let method = method_str
            .parse::<reqwest::Method>()
            .map_err(|_| NodeError::InvalidConfig(format!("invalid HTTP method: {}", method_str)))?;

        let mut builder = self.client.request(method, url);

        if let Some(body) = params.get("body") {
            builder = builder.json(body);
        }

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v_str) = v.as_str() {
                    builder = builder.header(k, v_str);
                }
            }
        }

        debug!(node_id = ctx.node_id, url, attempt = ctx.attempt, "Sending HTTP request");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                NodeError::Transient(e.to_string())
            } else {
                NodeError::Failed(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(NodeError::Transient(format!("HTTP {} from {}", status.as_u16(), url)));
        }
        if status.is_client_error() {
            return Err(NodeError::Failed(format!("HTTP {} from {}", status.as_u16(), url)));
        }

        // Non-JSON bodies come back as null data
        let data = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(json!({
            "status": status.as_u16(),
            "data": data
        }))
    }
}

/// Sends `http` tools to `HttpTool` and every other tool type to `fallback`.
pub struct ToolRouter {
    http: HttpTool,
    fallback: Arc<dyn NodeExecutor<ToolConfig>>,
}

impl ToolRouter {
    pub fn new(fallback: Arc<dyn NodeExecutor<ToolConfig>>) -> Self {
        Self {
            http: HttpTool::new(),
            fallback,
        }
    }
}

#[async_trait]
impl NodeExecutor<ToolConfig> for ToolRouter {
    async fn execute(&self, config: &ToolConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        match config.tool_type {
            ToolType::Http => self.http.execute(config, ctx).await,
            _ => self.fallback.execute(config, ctx).await,
        }
    }
}
