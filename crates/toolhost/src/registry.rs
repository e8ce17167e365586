//! Tool registry: name -> {definition, compiled input schema, handler}.
//!
//! The registry is built once at startup, then frozen behind an `Arc` and shared read-only by
//! every request.

use crate::error::{RegistryError, ToolError};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Body of a tool.
///
/// Handlers run inside the caller's credential context (see [`crate::credentials::current`]).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: JsonObject) -> Result<CallToolResult, ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(JsonObject) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: JsonObject) -> Result<CallToolResult, ToolError> {
        (self)(arguments).await
    }
}

/// An immutable tool definition.
pub struct ToolDefinition {
    tool: Tool,
    schema: Value,
    validator: jsonschema::Validator,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.tool.name)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Build a definition and compile its input schema.
    ///
    /// # Errors
    ///
    /// Returns an error if `input_schema` is not a JSON object or is not a valid JSON Schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let Value::Object(schema_obj) = &input_schema else {
            return Err(RegistryError::InvalidSchema {
                tool: name,
                message: "input schema must be a JSON object".to_string(),
            });
        };
        let validator =
            jsonschema::validator_for(&input_schema).map_err(|e| RegistryError::InvalidSchema {
                tool: name.clone(),
                message: e.to_string(),
            })?;

        let tool = Tool::new(name, description.into(), Arc::new(schema_obj.clone()));
        Ok(Self {
            tool,
            schema: input_schema,
            validator,
            handler: Arc::new(handler),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Protocol-facing description (name, description, input schema).
    #[must_use]
    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub(crate) fn validator(&self) -> &jsonschema::Validator {
        &self.validator
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDefinition>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if the name is already taken.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(Arc::new(definition));
        Ok(())
    }

    /// All tools in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool().clone()).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
