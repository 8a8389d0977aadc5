use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use valet_core::types::ToolDefinition;
use valet_google::calendar::CalendarClient;

use crate::tool::Tool;

pub struct CalendarTool {
    client: Arc<CalendarClient>,
}

impl CalendarTool {
    pub fn new(client: Arc<CalendarClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CalendarTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "list_events".to_string(),
                description: "List the user's calendar events between two RFC3339 timestamps (e.g. today's or this week's schedule).".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "time_min": { "type": "string", "description": "Range start, RFC3339 (e.g. 2026-08-30T00:00:00Z)" },
                        "time_max": { "type": "string", "description": "Range end, RFC3339" }
                    },
                    "required": ["time_min", "time_max"]
                }),
            },
            ToolDefinition {
                name: "search_events".to_string(),
                description: "Search the user's calendar events by free text from a start time forward.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Free-text search over event fields" },
                        "time_min": { "type": "string", "description": "Search from this RFC3339 timestamp (default: now)" },
                        "max_results": { "type": "integer", "description": "Max number of results (default 10)" }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "create_event".to_string(),
                description: "Create a new event on the user's primary calendar. Only call this when the user explicitly asked to schedule something.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string", "description": "Event title" },
                        "start_time": { "type": "string", "description": "Start, RFC3339 (e.g. 2026-08-31T11:00:00Z)" },
                        "end_time": { "type": "string", "description": "End, RFC3339" },
                        "description": { "type": "string", "description": "Event description" },
                        "location": { "type": "string", "description": "Event location" }
                    },
                    "required": ["summary", "start_time", "end_time"]
                }),
            },
        ]
    }

    fn is_mutating(&self, name: &str) -> bool {
        name == "create_event"
    }

    async fn execute(
        &self,
        token: &str,
        name: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        match name {
            "list_events" => self.handle_list(token, args).await,
            "search_events" => self.handle_search(token, args).await,
            "create_event" => self.handle_create(token, args).await,
            _ => Err(valet_core::error::ValetError::UnknownTool(name.to_string())),
        }
    }
}

impl CalendarTool {
    async fn handle_list(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let time_min = args["time_min"].as_str().unwrap_or("");
        let time_max = args["time_max"].as_str().unwrap_or("");

        let events = self.client.list_events(token, time_min, time_max).await?;
        Ok(format_events(&events, "No events in that range."))
    }

    async fn handle_search(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let query = args["query"].as_str().unwrap_or("");
        let default_min = rfc3339_now();
        let time_min = args["time_min"].as_str().unwrap_or(&default_min);
        let max = args["max_results"].as_u64().unwrap_or(10) as u32;

        let events = self.client.search_events(token, query, time_min, max).await?;
        Ok(format_events(
            &events,
            &format!("No events found matching \"{query}\"."),
        ))
    }

    async fn handle_create(
        &self,
        token: &str,
        args: &serde_json::Value,
    ) -> valet_core::error::Result<String> {
        let summary = args["summary"].as_str().unwrap_or("");
        let start_time = args["start_time"].as_str().unwrap_or("");
        let end_time = args["end_time"].as_str().unwrap_or("");
        let description = args["description"].as_str();
        let location = args["location"].as_str();

        let event = self
            .client
            .create_event(token, summary, start_time, end_time, description, location)
            .await?;
        Ok(format!(
            "Event created: **{}**\n  {} to {}\n  ID: {}",
            event.summary, event.start, event.end, event.id
        ))
    }
}

fn format_events(events: &[valet_google::calendar::CalendarEvent], empty_note: &str) -> String {
    if events.is_empty() {
        return empty_note.to_string();
    }

    let mut result = String::new();
    for event in events {
        result.push_str(&format!("- **{}**\n  {} to {}\n", event.summary, event.start, event.end));
        if let Some(location) = &event.location {
            result.push_str(&format!("  Location: {location}\n"));
        }
        if !event.attendees.is_empty() {
            result.push_str(&format!("  Attendees: {}\n", event.attendees.join(", ")));
        }
    }
    result.trim_end().to_string()
}

/// Current moment as an RFC3339 UTC timestamp, no external time crate.
fn rfc3339_now() -> String {
    let secs = valet_core::types::now_unix();
    let days = secs / 86400;
    let remainder = secs % 86400;
    let (y, m, d) = unix_days_to_date(days);
    let h = remainder / 3600;
    let min = (remainder % 3600) / 60;
    let s = remainder % 60;
    format!("{y:04}-{m:02}-{d:02}T{h:02}:{min:02}:{s:02}Z")
}

/// Convert a count of days since Unix epoch to (year, month, day).
fn unix_days_to_date(days: i64) -> (i64, i64, i64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m as i64, d as i64)
}
