// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ProgressSink, Tool, ToolCall, ToolOutput};

/// A tool schema as handed to the model.  Mirrors the model crate's shape
/// without depending on it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools.
///
/// Immutable after construction; parallel lookups are safe because every
/// method takes `&self`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Extension injection point: same as [`register`] but for boxed tools
    /// loaded outside this crate.
    pub fn register_dyn(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for all registered tools, sorted by name for stable requests.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validate against the tool's schema, then execute.
    ///
    /// Unknown tools and schema violations come back as `is_error` results;
    /// the model is expected to correct itself on the next round.  Tools
    /// that do not declare themselves interruptible run to completion even
    /// when the caller's token fires.
    pub async fn execute(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(t) => t,
            None => return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        };
        if let Err(msg) = validate_args(&tool.parameters_schema(), &call.args) {
            return ToolOutput::err(&call.id, format!("invalid arguments: {msg}"));
        }
        if let Some(preview) = tool.preview(&call.args) {
            tracing::debug!(tool = %call.name, %preview, "dispatching tool call");
        }
        let effective = if tool.interruptible() {
            cancel.clone()
        } else {
            CancellationToken::new()
        };
        tool.execute(call, &effective, progress).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Schema validation ───────────────────────────────────────────────────────

/// Check `args` against a JSON schema of the shape the built-in tools use:
/// an object with `properties`, `required`, per-property `type` and `enum`.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("expected an object, got {}", type_name(args)));
    }
    let obj = match args.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    let props = match schema.get("properties").and_then(Value::as_object) {
        Some(p) => p,
        None => return Ok(()),
    };
    for (key, value) in obj {
        let Some(prop) = props.get(key) else {
            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                return Err(format!("unknown parameter '{key}'"));
            }
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!(
                    "parameter '{key}' should be {expected}, got {}",
                    type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("parameter '{key}' must be one of {allowed:?}"));
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
