use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use valet_core::types::ToolDefinition;
use valet_google::gmail::GmailClient;

use crate::tool::Tool;

pub struct GmailTool {
    client: Arc<GmailClient>,
}

impl GmailTool {
    pub fn new(client: Arc<GmailClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GmailTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "search_mail".to_string(),
                description: "Search the user's Gmail inbox. Uses Gmail's search query syntax (e.g. 'from:alice subject:report is:unread').".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Gmail search query" },
                        "max_results": { "type": "integer", "description": "Max number of results (default 10)" }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "read_mail".to_string(),
                description: "Read the full content of a specific email by its message ID.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "message_id": { "type": "string", "description": "The Gmail message ID" }
                    },
                    "required": ["message_id"]
                }),
            },
            ToolDefinition {
                name: "draft_reply".to_string(),
                description: "Create a draft reply to an email in the user's drafts folder. The draft is not sent.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "message_id": { "type": "string", "description": "The Gmail message ID to reply to" },
                        "body": { "type": "string", "description": "Reply body text" }
                    },
                    "required": ["message_id", "body"]
                }),
            },
            ToolDefinition {
                name: "send_mail".to_string(),
                description: "Send an email from the user's Gmail account. Only call this when the user explicitly asked to send an email.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string", "description": "Recipient email address" },
                        "subject": { "type": "string", "description": "Email subject" },
                        "body": { "type": "string", "description": "Email body text" }
                    },
                    "required": ["to", "subject", "body"]
                }),
            },
        ]
    }

    fn is_mutating(&self, name: &str) -> bool {
        matches!(name, "send_mail" | "draft_reply")
    }

    async fn execute(
        &self,
        token: &str,
        name: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        match name {
            "search_mail" => self.handle_search(token, args).await,
            "read_mail" => self.handle_read(token, args).await,
            "draft_reply" => self.handle_draft_reply(token, args).await,
            "send_mail" => self.handle_send(token, args).await,
            _ => Err(valet_core::error::ValetError::UnknownTool(name.to_string())),
        }
    }
}

impl GmailTool {
    async fn handle_search(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let query = args["query"].as_str().unwrap_or("");
        let max = args["max_results"].as_u64().unwrap_or(10) as u32;

        let messages = self.client.search(token, query, max).await?;

        if messages.is_empty() {
            return Ok(format!("No emails found matching \"{query}\"."));
        }

        let mut result = String::new();
        for msg in &messages {
            result.push_str(&format!(
                "- **{}**\n  From: {} | Date: {}\n  {}\n  ID: {}\n",
                msg.subject, msg.from, msg.date, msg.snippet, msg.id
            ));
        }
        Ok(result.trim_end().to_string())
    }

    async fn handle_read(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let message_id = args["message_id"].as_str().unwrap_or("");
        let msg = self.client.read(token, message_id).await?;

        let body = truncate_body(&msg.body);

        Ok(format!(
            "**Subject:** {}\n**From:** {}\n**To:** {}\n**Date:** {}\n**Message ID:** {}\n\n{}",
            msg.subject, msg.from, msg.to, msg.date, msg.id, body
        ))
    }

    async fn handle_draft_reply(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let message_id = args["message_id"].as_str().unwrap_or("");
        let body = args["body"].as_str().unwrap_or("");

        let draft_id = self.client.draft_reply(token, message_id, body).await?;
        Ok(format!(
            "Draft reply created (draft ID: {draft_id}). It is saved in the user's drafts, not sent."
        ))
    }

    async fn handle_send(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let to = args["to"].as_str().unwrap_or("");
        let subject = args["subject"].as_str().unwrap_or("");
        let body = args["body"].as_str().unwrap_or("");

        let msg_id = self.client.send(token, to, subject, body).await?;
        Ok(format!(
            "Email sent (ID: {msg_id})\nTo: {to}\nSubject: {subject}"
        ))
    }
}

const BODY_LIMIT: usize = 3000;

/// Cap the email body handed to the model. The cut always lands on a char
/// boundary.
fn truncate_body(body: &str) -> String {
    if body.len() <= BODY_LIMIT {
        return body.to_string();
    }
    let mut end = BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}...\n(truncated, {} chars total)",
        &body[..end],
        body.len()
    )
}
