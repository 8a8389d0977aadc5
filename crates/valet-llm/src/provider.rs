use async_trait::async_trait;
use valet_core::error::Result;
use valet_core::types::{ChatRequest, ChatResponse, ToolDefinition};

/// The opaque completion capability: text plus an optional tool schema in,
/// a direct answer or a tool-call request out.
///
/// A response with a non-empty `tool_calls` is a tool-call request; an empty
/// one is a direct answer. Passing an empty `tools` slice means plain chat —
/// the provider must not advertise anything to the model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: ChatRequest, tools: &[ToolDefinition]) -> Result<ChatResponse>;

    /// Provider name for logs and error reporting.
    fn name(&self) -> &str;
}
