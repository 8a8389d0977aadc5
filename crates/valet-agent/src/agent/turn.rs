use valet_core::error::{Result, ValetError};
use valet_core::types::*;

use super::Agent;

/// Result of one completed chat turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Id of the persisted assistant message.
    pub message_id: String,
    pub response: String,
}

const GENERIC_APOLOGY: &str = "Sorry, something went wrong. Please try again.";
const TIMEOUT_APOLOGY: &str = "Sorry, that took longer than expected. Please try again.";
const GOOGLE_UNAVAILABLE_NOTE: &str =
    "The user's Google account is not currently accessible, so live email and calendar \
     data is unavailable. Answer from the conversation alone and suggest reconnecting \
     Google if the request needs that data.";

impl Agent {
    /// Handle one user turn end to end.
    ///
    /// The user's message is persisted before any fallible work, so a crash
    /// mid-turn never loses their input. The assistant message is persisted
    /// exactly once, after a final answer (direct or fallback) exists. The
    /// whole turn runs under the configured deadline.
    pub async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        use_tools: bool,
    ) -> Result<TurnOutcome> {
        let lock = self.turn_lock(user_id).await;
        let _guard = lock.lock().await;

        // Bounded recent history, captured before the new message lands.
        let recent = self
            .history
            .recent(user_id, self.config.history_window)
            .await?;

        let user_msg = Message {
            id: new_id(),
            user_id: user_id.to_string(),
            role: "user".to_string(),
            content: text.to_string(),
            created_at: now_unix(),
        };
        self.history.append(&user_msg).await?;

        let deadline = std::time::Duration::from_secs(self.config.turn_timeout_secs);
        let response = match tokio::time::timeout(
            deadline,
            self.run_turn(user_id, text, &recent, use_tools),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                log!(" [turn] {}: {}", user_id, ValetError::TurnTimeout);
                TIMEOUT_APOLOGY.to_string()
            }
        };

        let assistant_msg = Message {
            id: new_id(),
            user_id: user_id.to_string(),
            role: "assistant".to_string(),
            content: response.clone(),
            created_at: now_unix(),
        };
        let message_id = self.history.append(&assistant_msg).await?;

        Ok(TurnOutcome {
            message_id,
            response,
        })
    }

    /// The turn body: at most one tool round-trip, every sub-orchestrator
    /// failure caught and classified here. Returns `Err` only for storage
    /// failures; anything else degrades to a fallback answer.
    async fn run_turn(
        &self,
        user_id: &str,
        text: &str,
        recent: &[Message],
        use_tools: bool,
    ) -> Result<String> {
        let tools = if use_tools {
            self.dispatcher.available_tools(user_id).await
        } else {
            Vec::new()
        };

        let mut messages = self.build_prompt(recent, None);
        messages.push(ChatMessage::text("user", text));

        let request = ChatRequest {
            messages: messages.clone(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(0.7),
        };

        let response = match self.llm.complete(request, &tools).await {
            Ok(r) => r,
            Err(e) => {
                log!(" [turn] completion failed: {e}");
                return Ok(GENERIC_APOLOGY.to_string());
            }
        };

        // Direct answer — turn complete.
        let Some(call) = response.tool_calls.first().cloned() else {
            return Ok(response.content);
        };

        let mut assistant_msg = ChatMessage::assistant_tool_calls(vec![call.clone()]);
        assistant_msg.content = response.content.clone();

        // Defense against the model hallucinating a tool it was never
        // offered: fail the call internally and let the model recover,
        // rather than surfacing the failure to the user.
        if !tools.iter().any(|t| t.name == call.name) {
            log!(
                " [turn] model requested unoffered tool '{}' (schema drift)",
                call.name
            );
            let synthetic = ValetError::RemoteBadRequest(format!(
                "tool '{}' is not available",
                call.name
            ));
            messages.push(assistant_msg);
            messages.push(ChatMessage::tool_result(&call.id, format!("Error: {synthetic}")));
            return Ok(self.final_answer(messages).await);
        }

        log!(" [tool] {}({})", call.name, call.arguments);
        match self.dispatcher.invoke(user_id, &call).await {
            Ok(output) => {
                log!(" [tool] {} -> {} chars", call.name, output.len());
                messages.push(assistant_msg);
                messages.push(ChatMessage::tool_result(&call.id, &output));
                Ok(self.final_answer(messages).await)
            }
            Err(ValetError::CredentialRevoked) => {
                // Degrade to plain chat instead of failing the turn; the
                // dispatcher has already flipped the stored credential state.
                log!(" [turn] credential revoked mid-turn, degrading to plain chat");
                let mut messages = self.build_prompt(recent, Some(GOOGLE_UNAVAILABLE_NOTE));
                messages.push(ChatMessage::text("user", text));
                let request = ChatRequest {
                    messages,
                    max_tokens: Some(self.config.max_tokens),
                    temperature: Some(0.7),
                };
                match self.llm.complete(request, &[]).await {
                    Ok(r) => Ok(r.content),
                    Err(e) => {
                        log!(" [turn] plain-chat fallback failed: {e}");
                        Ok(GENERIC_APOLOGY.to_string())
                    }
                }
            }
            Err(e) => {
                // The dispatcher has already spent its retry budget; an
                // UnknownTool or bad request here means schema drift.
                match &e {
                    ValetError::UnknownTool(_) | ValetError::RemoteBadRequest(_) => {
                        log!(" [turn] defect signal from {}: {e}", call.name)
                    }
                    _ => log!(" [turn] {} failed: {e}", call.name),
                }
                Ok(format!(
                    "Sorry, I couldn't reach your Google data just now ({}). Please try again in a moment.",
                    e.kind()
                ))
            }
        }
    }

    /// Second completion pass: tool output in, natural-language answer out.
    /// No tools are offered — one round-trip per turn.
    async fn final_answer(&self, messages: Vec<ChatMessage>) -> String {
        let request = ChatRequest {
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(0.7),
        };
        match self.llm.complete(request, &[]).await {
            Ok(r) if !r.content.is_empty() => r.content,
            Ok(_) => {
                log!(" [turn] final completion returned empty content");
                GENERIC_APOLOGY.to_string()
            }
            Err(e) => {
                log!(" [turn] final completion failed: {e}");
                GENERIC_APOLOGY.to_string()
            }
        }
    }

    /// System prompt with an optional status note and the recent history.
    fn build_prompt(&self, recent: &[Message], note: Option<&str>) -> Vec<ChatMessage> {
        let mut system = "You are valet, a personal assistant. When the user's Google account \
                          is connected you can read and search their Gmail and Calendar through \
                          tools. Be helpful, concise, and friendly."
            .to_string();

        if let Some(note) = note {
            system.push_str(&format!("\n\nNote: {note}"));
        }

        if !recent.is_empty() {
            system.push_str(
                "\n\n## Recent conversation (for context only — respond to the user's NEW message, not these)\n",
            );
            for msg in recent {
                let role_label = match msg.role.as_str() {
                    "user" => "User",
                    "assistant" => "Valet",
                    _ => &msg.role,
                };
                system.push_str(&format!("{role_label}: {}\n", msg.content));
            }
        }

        vec![ChatMessage::text("system", system)]
    }

    /// Consent URL for the UI to open.
    pub fn begin_google_connect(&self, user_id: &str) -> String {
        self.broker.auth_url(user_id)
    }

    /// Finish the connect flow with the authorization code from the callback.
    pub async fn complete_google_connect(&self, user_id: &str, code: &str) -> Result<ConnectStatus> {
        self.broker.exchange_code(user_id, code).await?;
        Ok(self.broker.status(user_id).await)
    }

    pub async fn disconnect_google(&self, user_id: &str) -> Result<()> {
        self.broker.disconnect(user_id).await
    }
}
