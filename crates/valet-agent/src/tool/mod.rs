pub mod calendar;
pub mod gmail;

use async_trait::async_trait;
use valet_core::error::{Result, ValetError};
use valet_core::types::ToolDefinition;

/// A tool the LLM can call within a turn.
///
/// Each tool struct owns its remote client and can provide multiple tool
/// definitions (e.g. GmailTool provides search_mail, read_mail, send_mail).
/// Execution receives the bearer token the dispatcher obtained for the user.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool definitions this struct provides.
    fn definitions(&self) -> Vec<ToolDefinition>;
    /// Whether a given tool name performs an irreversible external action.
    /// Mutating tools are never retried by the dispatcher.
    fn is_mutating(&self, _name: &str) -> bool {
        false
    }
    /// Execute a tool call by name. Only called for names in definitions().
    async fn execute(&self, token: &str, name: &str, args: &serde_json::Value) -> Result<String>;
}

/// Closed registry of all declared tools. Lookup is by name over a finite
/// set — there is no dynamic discovery.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().flat_map(|t| t.definitions()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .iter()
            .any(|t| t.definitions().iter().any(|d| d.name == name))
    }

    pub fn is_mutating(&self, name: &str) -> bool {
        self.tools
            .iter()
            .filter(|t| t.definitions().iter().any(|d| d.name == name))
            .any(|t| t.is_mutating(name))
    }

    pub async fn execute(
        &self,
        token: &str,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<String> {
        for tool in &self.tools {
            if tool.definitions().iter().any(|d| d.name == name) {
                return tool.execute(token, name, args).await;
            }
        }
        Err(ValetError::UnknownTool(name.to_string()))
    }
}
