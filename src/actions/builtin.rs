use async_trait::async_trait;
use evalexpr::{
    Context, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode,
    build_operator_tree,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::actions::collapse_inputs;
use crate::dsl::{DataConfig, DataSlot, LogicConfig, LogicType, UiConfig, UiType};
use crate::runtime::error::NodeError;
use crate::runtime::handler::{NodeContext, NodeExecutor, NodeInputs};

type EvalValue = evalexpr::Value<DefaultNumericTypes>;
type EvalContext = HashMapContext<DefaultNumericTypes>;

const MAX_LOOP_ITERATIONS: u32 = 1000;

// --- DATA ---

/// Input/variable slots yield their default value; output slots collect
/// whatever flowed into them.
#[derive(Debug, Default)]
pub struct DataSlotExecutor;

#[async_trait]
impl NodeExecutor<DataConfig> for DataSlotExecutor {
    async fn execute(&self, config: &DataConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        let value = match config.data_type {
            DataSlot::Input | DataSlot::Variable => config.default_value.clone(),
            DataSlot::Output if ctx.inputs.is_empty() => config.default_value.clone(),
            DataSlot::Output => collapse_inputs(ctx.inputs),
        };

        if !value.is_null() && !config.value_type.accepts(&value) {
            return Err(NodeError::InvalidConfig(format!(
                "slot '{}' expects {:?}, got {}",
                config.name, config.value_type, value
            )));
        }
        Ok(value)
    }
}

// --- LOGIC ---

/// Evaluates logic nodes with `evalexpr`. Scalar predecessor outputs are bound
/// under their node id (non-identifier characters become `_`), fields of
/// object outputs are bound by field name, and a lone input is also `input`.
#[derive(Debug, Default)]
pub struct ExpressionLogic;

#[async_trait]
impl NodeExecutor<LogicConfig> for ExpressionLogic {
    async fn execute(&self, config: &LogicConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        let tree: EvalNode<DefaultNumericTypes> = build_operator_tree(&config.expression)
            .map_err(|e| NodeError::Evaluation(format!("'{}': {}", config.expression, e)))?;
        let mut eval_ctx = build_context(ctx.node_id, ctx.inputs);

        match config.logic_type {
            LogicType::Condition => {
                let result = tree
                    .eval_boolean_with_context(&eval_ctx)
                    .map_err(|e| NodeError::Evaluation(format!("'{}': {}", config.expression, e)))?;
                debug!(node_id = ctx.node_id, result, "Condition evaluated");
                Ok(json!({ "result": result }))
            }
            LogicType::Transform => {
                let result = tree
                    .eval_with_context(&eval_ctx)
                    .map_err(|e| NodeError::Evaluation(format!("'{}': {}", config.expression, e)))?;
                Ok(from_eval(result))
            }
            LogicType::Loop => {
                let iterations = config.max_iterations.unwrap_or(1).min(MAX_LOOP_ITERATIONS);
                let mut values = Vec::with_capacity(iterations as usize);
                for i in 0..iterations {
                    eval_ctx
                        .set_value("index".to_string(), EvalValue::Int(i as i64))
                        .map_err(|e| NodeError::Evaluation(e.to_string()))?;
                    let v = tree
                        .eval_with_context(&eval_ctx)
                        .map_err(|e| NodeError::Evaluation(format!("'{}' (index {}): {}", config.expression, i, e)))?;
                    values.push(from_eval(v));
                }
                Ok(json!({ "iterations": iterations, "values": values }))
            }
        }
    }
}

fn build_context(node_id: &str, inputs: &NodeInputs) -> EvalContext {
    let mut eval_ctx = EvalContext::new();
    for (id, value) in inputs {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    if let Some(ev) = to_eval(v) {
                        bind(&mut eval_ctx, node_id, id, identifier(k), ev);
                    }
                }
            }
            other => {
                if let Some(ev) = to_eval(other) {
                    bind(&mut eval_ctx, node_id, id, identifier(id), ev);
                }
            }
        }
    }
    if inputs.len() == 1 {
        if let Some((id, ev)) = inputs.iter().next().and_then(|(id, v)| to_eval(v).map(|ev| (id, ev))) {
            bind(&mut eval_ctx, node_id, id, "input".to_string(), ev);
        }
    }
    eval_ctx
}

/// First binding of a name wins; later ones are logged and dropped.
fn bind(eval_ctx: &mut EvalContext, node_id: &str, source: &str, name: String, value: EvalValue) {
    if eval_ctx.get_value(&name).is_some() {
        warn!(node_id, source, variable = %name, "Input binding shadowed by an earlier predecessor, ignoring");
        return;
    }
    if let Err(e) = eval_ctx.set_value(name.clone(), value) {
        warn!(node_id, source, variable = %name, error = %e, "Input binding rejected");
    }
}

fn identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn to_eval(v: &Value) -> Option<EvalValue> {
    match v {
        Value::String(s) => Some(EvalValue::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EvalValue::Int(i))
            } else {
                n.as_f64().map(EvalValue::Float)
            }
        }
        Value::Bool(b) => Some(EvalValue::Boolean(*b)),
        Value::Array(items) => Some(EvalValue::Tuple(items.iter().filter_map(to_eval).collect())),
        Value::Null => Some(EvalValue::Empty),
        Value::Object(_) => None,
    }
}

fn from_eval(v: EvalValue) -> Value {
    match v {
        EvalValue::String(s) => Value::String(s),
        EvalValue::Int(i) => json!(i),
        EvalValue::Float(f) => json!(f),
        EvalValue::Boolean(b) => Value::Bool(b),
        EvalValue::Tuple(items) => Value::Array(items.into_iter().map(from_eval).collect()),
        _ => Value::Null,
    }
}

// --- UI ---

/// Emits a create-panel or notification intent for the surrounding app.
#[derive(Debug, Default)]
pub struct UiIntentExecutor;

#[async_trait]
impl NodeExecutor<UiConfig> for UiIntentExecutor {
    async fn execute(&self, config: &UiConfig, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
        let intent = match config.ui_type {
            UiType::Panel => json!({
                "intent": "createPanel",
                "panelType": config.panel_type.as_deref().unwrap_or("answer"),
                "title": config.title,
                "content": collapse_inputs(ctx.inputs),
            }),
            UiType::Notification => json!({
                "intent": "notify",
                "title": config.title,
                "message": config.message.clone().unwrap_or_default(),
            }),
        };
        Ok(intent)
    }
}
