use async_trait::async_trait;
use valet_core::error::Result;
use valet_core::types::Message;

/// Append-only per-user message log. The storage crate implements this over
/// libsql; tests use an in-memory vector.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a message and return its id. Messages are immutable once
    /// appended.
    async fn append(&self, message: &Message) -> Result<String>;
    /// The most recent `limit` messages in ascending creation order.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Message>>;
    /// Bulk clear — the only way messages are ever deleted.
    async fn clear(&self, user_id: &str) -> Result<()>;
}
