//! Tool registry for managing available tools.

use crate::error::ToolError;
use crate::traits::Tool;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of available tools.
///
/// Stores tools by name, provides lookup, and validates call arguments
/// against each tool's parameter schema.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Create a registry with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `args` against the named tool's parameter schema.
    pub fn validate_args(&self, name: &str, args: &serde_json::Value) -> Result<(), ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let schema = tool.parameters_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            ToolError::ExecutionError(format!("invalid parameter schema for '{name}': {e}"))
        })?;

        let mut errors = validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect::<Vec<_>>();
        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(ToolError::InvalidParameters(errors.join("; ")))
        }
    }

    /// Tool listing with schemas, for display and for LLM tool definitions.
    pub fn tool_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "label": tool.label(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema(),
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ToolContext, ToolResult};
    use async_trait::async_trait;
    use warden_policy::ActionRequest;

    struct MockTool;

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            "mock"
        }
        fn label(&self) -> &str {
            "Mock Tool"
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"],
            })
        }
        async fn prepare(
            &self,
            args: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ActionRequest, ToolError> {
            Ok(ActionRequest::Shell {
                command: args["command"].as_str().unwrap_or_default().to_string(),
            })
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("mock output"))
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool));

        assert!(registry.has("mock"));
        assert!(!registry.has("nonexistent"));
        assert_eq!(registry.len(), 1);

        let tool = registry.get("mock").unwrap();
        assert_eq!(tool.name(), "mock");
    }

    #[test]
    fn test_registry_tool_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool));

        let defs = registry.tool_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["name"], "mock");
        assert_eq!(defs[0]["description"], "A mock tool for testing");
    }

    #[test]
    fn test_validate_args() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool));

        assert!(registry
            .validate_args("mock", &serde_json::json!({"command": "ls"}))
            .is_ok());
        assert!(matches!(
            registry.validate_args("mock", &serde_json::json!({"command": 5})),
            Err(ToolError::InvalidParameters(_))
        ));
        assert!(matches!(
            registry.validate_args("mock", &serde_json::json!({})),
            Err(ToolError::InvalidParameters(_))
        ));
        assert!(matches!(
            registry.validate_args("missing", &serde_json::json!({})),
            Err(ToolError::NotFound(_))
        ));
    }

    #[test]
    fn test_builtins_registered_sorted() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["http_request", "list_dir", "read_file", "shell", "write_file"]
        );
        for name in registry.names() {
            // Every built-in schema must be usable by the validator.
            let schema = registry.get(&name).unwrap().parameters_schema();
            assert!(jsonschema::validator_for(&schema).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_registry_empty() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
