use base64::Engine;
use serde::{Deserialize, Serialize};
use valet_core::error::{Result, ValetError};

use crate::{classify_remote, urlencod};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub body: String,
}

/// Gmail REST client. Token acquisition belongs to the dispatcher, so every
/// call takes the bearer token it should use.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: GMAIL_API.to_string(),
        }
    }

    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn get(&self, token: &str, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail response read failed: {e}")))?;

        if status != 200 {
            return Err(classify_remote("gmail", status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail json parse failed: {e}")))
    }

    async fn post_json(
        &self,
        token: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail response read failed: {e}")))?;

        if status != 200 {
            return Err(classify_remote("gmail", status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ValetError::RemoteUnavailable(format!("gmail json parse failed: {e}")))
    }

    /// Search messages by Gmail query string (e.g. "from:alice is:unread").
    pub async fn search(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>> {
        let url = format!(
            "{}/messages?q={}&maxResults={max_results}",
            self.base_url,
            urlencod(query)
        );
        let data = self.get(token, &url).await?;
        let message_ids: Vec<String> = data["messages"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|m| m["id"].as_str().map(|s| s.to_string()))
            .collect();

        let mut summaries = Vec::new();
        for mid in message_ids.iter().take(max_results as usize) {
            let url = format!(
                "{}/messages/{mid}?format=metadata&metadataHeaders=Subject&metadataHeaders=From&metadataHeaders=Date",
                self.base_url
            );
            match self.get(token, &url).await {
                Ok(msg) => summaries.push(parse_summary(&msg)),
                Err(_) => continue,
            }
        }

        Ok(summaries)
    }

    /// Read the full content of a specific message.
    pub async fn read(&self, token: &str, message_id: &str) -> Result<MessageDetail> {
        let url = format!("{}/messages/{message_id}?format=full", self.base_url);
        let data = self.get(token, &url).await?;
        Ok(parse_detail(&data))
    }

    /// Send an email. Irreversible — callers must not retry this blindly.
    pub async fn send(&self, token: &str, to: &str, subject: &str, body: &str) -> Result<String> {
        let raw = build_raw_message(to, subject, body);
        let url = format!("{}/messages/send", self.base_url);
        let payload = serde_json::json!({ "raw": raw });

        let data = self.post_json(token, &url, &payload).await?;
        Ok(data["id"].as_str().unwrap_or_default().to_string())
    }

    /// Create a draft reply to an existing message, threaded onto the
    /// original conversation. Returns the draft id; nothing is sent.
    pub async fn draft_reply(&self, token: &str, message_id: &str, body: &str) -> Result<String> {
        let url = format!(
            "{}/messages/{message_id}?format=metadata&metadataHeaders=From&metadataHeaders=Subject&metadataHeaders=Message-ID",
            self.base_url
        );
        let original = self.get(token, &url).await?;
        let thread_id = original["threadId"].as_str().unwrap_or_default();

        let raw = build_reply_message(
            &header_value(&original, "From"),
            &header_value(&original, "Subject"),
            &header_value(&original, "Message-ID"),
            body,
        );
        let url = format!("{}/drafts", self.base_url);
        let payload = serde_json::json!({
            "message": { "raw": raw, "threadId": thread_id }
        });

        let data = self.post_json(token, &url, &payload).await?;
        Ok(data["id"].as_str().unwrap_or_default().to_string())
    }
}

fn build_raw_message(to: &str, subject: &str, body: &str) -> String {
    let message = format!(
        "To: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}"
    );
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// RFC 822 reply addressed to the original sender, with threading headers.
fn build_reply_message(to: &str, subject: &str, in_reply_to: &str, body: &str) -> String {
    let subject = if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    };
    let mut message = format!("To: {to}\r\nSubject: {subject}\r\n");
    if !in_reply_to.is_empty() {
        message.push_str(&format!(
            "In-Reply-To: {in_reply_to}\r\nReferences: {in_reply_to}\r\n"
        ));
    }
    message.push_str(&format!(
        "Content-Type: text/plain; charset=utf-8\r\n\r\n{body}"
    ));
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Case-insensitive header lookup over a message's payload headers.
fn header_value(v: &serde_json::Value, name: &str) -> String {
    v["payload"]["headers"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .find(|h| {
            h["name"]
                .as_str()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h["value"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_summary(v: &serde_json::Value) -> MessageSummary {
    MessageSummary {
        id: v["id"].as_str().unwrap_or_default().to_string(),
        thread_id: v["threadId"].as_str().unwrap_or_default().to_string(),
        subject: header_value(v, "Subject"),
        from: header_value(v, "From"),
        date: header_value(v, "Date"),
        snippet: v["snippet"].as_str().unwrap_or_default().to_string(),
    }
}

fn parse_detail(v: &serde_json::Value) -> MessageDetail {
    MessageDetail {
        id: v["id"].as_str().unwrap_or_default().to_string(),
        thread_id: v["threadId"].as_str().unwrap_or_default().to_string(),
        subject: header_value(v, "Subject"),
        from: header_value(v, "From"),
        to: header_value(v, "To"),
        date: header_value(v, "Date"),
        body: extract_body(&v["payload"]),
    }
}

fn extract_body(payload: &serde_json::Value) -> String {
    if let Some(data) = payload["body"]["data"].as_str() {
        if let Ok(bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
            if let Ok(text) = String::from_utf8(bytes) {
                return text;
            }
        }
    }

    // Multipart: prefer text/plain, fall back to text/html, recurse if nested.
    if let Some(parts) = payload["parts"].as_array() {
        for part in parts {
            if part["mimeType"].as_str() == Some("text/plain") {
                if let Some(data) = part["body"]["data"].as_str() {
                    if let Ok(bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data)
                    {
                        if let Ok(text) = String::from_utf8(bytes) {
                            return text;
                        }
                    }
                }
            }
        }
        for part in parts {
            if part["mimeType"].as_str() == Some("text/html") {
                if let Some(data) = part["body"]["data"].as_str() {
                    if let Ok(bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data)
                    {
                        if let Ok(text) = String::from_utf8(bytes) {
                            return text;
                        }
                    }
                }
            }
            if part["parts"].is_array() {
                let nested = extract_body(part);
                if !nested.is_empty() {
                    return nested;
                }
            }
        }
    }

    payload["snippet"].as_str().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_raw_message_encodes_headers() {
        let raw = build_raw_message("bob@example.com", "Hi", "Hello Bob");
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("To: bob@example.com\r\n"));
        assert!(text.contains("Subject: Hi\r\n"));
        assert!(text.ends_with("\r\n\r\nHello Bob"));
    }

    #[test]
    fn test_build_reply_message_threads_and_prefixes_subject() {
        let raw = build_reply_message(
            "alice@example.com",
            "Quarterly report",
            "<msg-1@example.com>",
            "Looks good to me.",
        );
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("To: alice@example.com\r\n"));
        assert!(text.contains("Subject: Re: Quarterly report\r\n"));
        assert!(text.contains("In-Reply-To: <msg-1@example.com>\r\n"));
        assert!(text.contains("References: <msg-1@example.com>\r\n"));
        assert!(text.ends_with("\r\n\r\nLooks good to me."));
    }

    #[test]
    fn test_build_reply_message_keeps_existing_re_prefix() {
        let raw = build_reply_message("a@b.com", "RE: hello", "", "ok");
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Subject: RE: hello\r\n"));
        assert!(!text.contains("Re: RE:"));
        assert!(!text.contains("In-Reply-To"));
    }

    #[test]
    fn test_extract_body_prefers_text_plain() {
        let encode =
            |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes());
        let payload = serde_json::json!({
            "parts": [
                { "mimeType": "text/html", "body": { "data": encode("<b>hi</b>") } },
                { "mimeType": "text/plain", "body": { "data": encode("hi") } },
            ]
        });
        assert_eq!(extract_body(&payload), "hi");
    }

    #[test]
    fn test_parse_summary_headers_case_insensitive() {
        let msg = serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "snippet": "preview",
            "payload": { "headers": [
                { "name": "subject", "value": "Invoices" },
                { "name": "FROM", "value": "alice@example.com" },
            ]}
        });
        let summary = parse_summary(&msg);
        assert_eq!(summary.subject, "Invoices");
        assert_eq!(summary.from, "alice@example.com");
        assert_eq!(summary.snippet, "preview");
    }
}
