use std::sync::Arc;

use valet_core::error::{Result, ValetError};
use valet_core::types::{ConnectStatus, ToolCallRequest, ToolDefinition};
use valet_google::CredentialBroker;

use crate::tool::ToolRegistry;

/// Executes tool calls behind a uniform invocation contract.
///
/// Dispatch is gated by credential validity: a user without a connected
/// credential is offered no tools, and every invocation obtains its token
/// through the credential broker. Remote failures arrive pre-normalized from
/// the clients; this layer owns the retry policy.
pub struct Dispatcher {
    registry: ToolRegistry,
    broker: Arc<dyn CredentialBroker>,
    /// Extra attempts for read-only tools on retryable failures.
    retry_max: u32,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, broker: Arc<dyn CredentialBroker>, retry_max: u32) -> Self {
        Self {
            registry,
            broker,
            retry_max,
        }
    }

    /// The tool schema subset usable right now — empty unless the user's
    /// credential is connected. Never advertise a tool the user cannot
    /// currently satisfy.
    pub async fn available_tools(&self, user_id: &str) -> Vec<ToolDefinition> {
        match self.broker.status(user_id).await {
            ConnectStatus::Connected => self.registry.definitions(),
            ConnectStatus::Absent | ConnectStatus::Revoked => Vec::new(),
        }
    }

    /// Execute one tool call for a user.
    ///
    /// Policy: unknown names fail before any token or network work; a
    /// rejected token gets one forced refresh and a single re-execution,
    /// and a second rejection is treated as a revoked credential; retryable
    /// failures are re-attempted up to `retry_max` times for read-only
    /// tools only. Mutating tools execute at most once.
    pub async fn invoke(&self, user_id: &str, call: &ToolCallRequest) -> Result<String> {
        if !self.registry.contains(&call.name) {
            return Err(ValetError::UnknownTool(call.name.clone()));
        }
        let mutating = self.registry.is_mutating(&call.name);

        let mut token = self.broker.access_token(user_id).await?;
        let mut auth_retried = false;
        let mut attempts = 0u32;

        loop {
            match self
                .registry
                .execute(&token, &call.name, &call.arguments)
                .await
            {
                Ok(output) => return Ok(output),
                Err(ValetError::RemoteAuthRejected(msg)) => {
                    if auth_retried {
                        // The token was just refreshed and still rejected:
                        // the grant itself is dead.
                        log!(" [dispatch] {} rejected a fresh token: {msg}", call.name);
                        self.broker.mark_revoked(user_id).await?;
                        return Err(ValetError::CredentialRevoked);
                    }
                    log!(" [dispatch] {} got auth rejection, forcing refresh", call.name);
                    auth_retried = true;
                    token = self.broker.force_refresh(user_id).await?;
                }
                Err(e) if e.is_retryable() && !mutating && attempts < self.retry_max => {
                    attempts += 1;
                    let delay = std::time::Duration::from_millis(500 * u64::from(attempts));
                    log!(
                        " [dispatch] {} {}, retry {attempts}/{} in {}ms",
                        call.name,
                        e.kind(),
                        self.retry_max,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
