//! Name-to-tool registry and the dispatch boundary.
//!
//! Dispatch never lets an error escape to the orchestrating caller: lookups
//! that miss and tools that fail both come back as structured failure values.

use std::collections::BTreeMap;
use std::sync::Arc;
use toolpipe_core::{Error, Tool, ToolResult};

/// Read-only after startup; no interior locking is needed.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its name. Duplicate registration is a no-op: the
    /// existing tool wins. (Deliberate; callers must not rely on re-registration
    /// to replace a tool.)
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "tool already registered; keeping the existing one");
            return self;
        }
        self.tools.insert(name, tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Function-call envelopes for every registered tool, in name order.
    pub fn to_params(&self) -> Vec<serde_json::Value> {
        self.tools.values().map(|t| t.to_param()).collect()
    }

    /// Execute a tool by name, converting every failure into a [`ToolResult`].
    pub async fn dispatch(&self, name: &str, args: serde_json::Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::failure(Error::UnknownTool(name.to_string()).to_string());
        };
        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}
