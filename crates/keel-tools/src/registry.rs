use std::fmt;
use std::sync::Arc;

use crate::executor::ToolDescriptor;

/// Static description of a tool: id, one-line summary and input schema.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub id: &'static str,
    pub description: &'static str,
    pub schema: schemars::Schema,
}

/// Tools available to a session, looked up by id.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolDescriptor>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.id()))
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl ToolDescriptor + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Add a tool, replacing any tool with the same id.
    pub fn register(&mut self, tool: Arc<dyn ToolDescriptor>) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.id() == tool.id()) {
            tracing::warn!(tool = tool.id(), "replacing registered tool");
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn ToolDescriptor>> {
        self.tools.iter().find(|t| t.id() == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }
}
