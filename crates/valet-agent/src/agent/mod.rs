use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use valet_core::config::AgentConfig;
use valet_core::error::Result;
use valet_core::types::ConnectStatus;
use valet_google::CredentialBroker;
use valet_llm::provider::CompletionClient;

use crate::dispatch::Dispatcher;
use crate::history::HistoryStore;

mod turn;

pub use turn::TurnOutcome;

/// The per-turn orchestrator: decides tool necessity, drives the credential
/// broker and the dispatcher, talks to the completion capability, and
/// persists the exchange.
///
/// Turns for different users run fully in parallel; turns for the same user
/// are serialized here so history ordering is preserved.
pub struct Agent {
    pub(crate) history: Arc<dyn HistoryStore>,
    pub(crate) llm: Arc<dyn CompletionClient>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) broker: Arc<dyn CredentialBroker>,
    pub(crate) config: AgentConfig,
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Agent {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        llm: Arc<dyn CompletionClient>,
        dispatcher: Dispatcher,
        broker: Arc<dyn CredentialBroker>,
        config: AgentConfig,
    ) -> Self {
        Self {
            history,
            llm,
            dispatcher,
            broker,
            config,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The keyed mutex serializing turns for one user.
    pub(crate) async fn turn_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    /// Connection state for the UI. A pure read, never refreshes.
    pub async fn tool_availability(&self, user_id: &str) -> ConnectStatus {
        self.broker.status(user_id).await
    }

    /// Drop the user's entire message history.
    pub async fn clear_history(&self, user_id: &str) -> Result<()> {
        self.history.clear(user_id).await
    }
}
