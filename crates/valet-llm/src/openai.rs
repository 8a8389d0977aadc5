use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use valet_core::error::{Result, ValetError};
use valet_core::types::{ChatRequest, ChatResponse, ToolCallRequest, ToolDefinition, Usage};

use crate::provider::CompletionClient;

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Chat completion client for OpenAI and OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` - API key sent as a bearer token
    /// * `model` - Model identifier (e.g. "gpt-4o-mini")
    /// * `base_url` - API root, e.g. "https://api.openai.com/v1"
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the messages array for the chat completions API.
    /// Handles plain text, assistant tool-call messages, and tool results.
    fn build_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();

        for m in &request.messages {
            if !m.tool_calls.is_empty() {
                let tool_calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                messages.push(json!({
                    "role": "assistant",
                    "content": m.content,
                    "tool_calls": tool_calls,
                }));
            } else if m.role == "tool" {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                    "content": m.content,
                }));
            } else {
                messages.push(json!({
                    "role": m.role,
                    "content": m.content,
                }));
            }
        }

        messages
    }

    fn err(&self, message: String) -> ValetError {
        ValetError::Llm {
            provider: "openai".to_string(),
            message,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest, tools: &[ToolDefinition]) -> Result<ChatResponse> {
        let messages = Self::build_messages(&request);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body.as_object_mut()
                .unwrap()
                .insert("max_tokens".to_string(), json!(max_tokens));
        }
        if let Some(temp) = request.temperature {
            body.as_object_mut()
                .unwrap()
                .insert("temperature".to_string(), json!(temp));
        }
        if !tools.is_empty() {
            let declarations: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body.as_object_mut()
                .unwrap()
                .insert("tools".to_string(), json!(declarations));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.err(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let response_text = response
            .text()
            .await
            .map_err(|e| self.err(format!("failed to read response body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(ValetError::Http {
                status,
                body: response_text,
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| self.err(format!("failed to parse response JSON: {e}")))?;

        let message = &parsed["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"].as_str().unwrap_or("").to_string();
                let name = call["function"]["name"].as_str().unwrap_or("").to_string();
                // Arguments arrive as a JSON-encoded string.
                let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments =
                    serde_json::from_str(raw).unwrap_or(serde_json::Value::Object(Default::default()));
                tool_calls.push(ToolCallRequest { id, name, arguments });
            }
        }

        if content.is_empty() && tool_calls.is_empty() {
            return Err(self.err("missing choices[0].message in response".to_string()));
        }

        let usage = match (
            parsed["usage"]["prompt_tokens"].as_u64(),
            parsed["usage"]["completion_tokens"].as_u64(),
        ) {
            (Some(input), Some(output)) => Some(Usage {
                input_tokens: input as u32,
                output_tokens: output as u32,
            }),
            _ => None,
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
