use serde_json::{Map, Value};
use crate::runtime::handler::NodeInputs;

pub mod builtin;
pub mod http;
pub mod simulated;

/// Collapse predecessor outputs into one value: nothing -> null, a single
/// input -> that value, several -> an object keyed by predecessor id.
pub fn collapse_inputs(inputs: &NodeInputs) -> Value {
    match inputs.len() {
        0 => Value::Null,
        1 => inputs.values().next().cloned().unwrap_or(Value::Null),
        _ => {
            let map: Map<String, Value> = inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Value::Object(map)
        }
    }
}

/// Replace `"${node_id}"` string parameters with that predecessor's output.
pub fn resolve_placeholders(params: &Map<String, Value>, inputs: &NodeInputs) -> Map<String, Value> {
    let mut resolved = params.clone();
    for (_, v) in resolved.iter_mut() {
        if let Some(s) = v.as_str() {
            if s.starts_with("${") && s.ends_with('}') {
                let var_name = &s[2..s.len() - 1];
                if let Some(val) = inputs.get(var_name) {
                    *v = val.clone();
                }
            }
        }
    }
    resolved
}
