use serde::{Deserialize, Serialize};
use valet_core::error::{Result, ValetError};

use crate::{classify_remote, urlencod};

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: String,
    pub end: String,
    pub location: Option<String>,
    pub attendees: Vec<String>,
}

/// Google Calendar REST client over the primary calendar. Like the Gmail
/// client, the bearer token is supplied per call.
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: CALENDAR_API.to_string(),
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
            .map_err(|e| ValetError::RemoteUnavailable(format!("calendar request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            ValetError::RemoteUnavailable(format!("calendar response read failed: {e}"))
        })?;

        if status != 200 {
            return Err(classify_remote("calendar", status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ValetError::RemoteUnavailable(format!("calendar json parse failed: {e}")))
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
            .map_err(|e| ValetError::RemoteUnavailable(format!("calendar request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            ValetError::RemoteUnavailable(format!("calendar response read failed: {e}"))
        })?;

        if status != 200 {
            return Err(classify_remote("calendar", status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ValetError::RemoteUnavailable(format!("calendar json parse failed: {e}")))
    }

    /// List events between two RFC3339 timestamps, expanded and ordered by
    /// start time.
    pub async fn list_events(
        &self,
        token: &str,
        time_min: &str,
        time_max: &str,
    ) -> Result<Vec<CalendarEvent>> {
        let url = format!(
            "{}/calendars/primary/events?timeMin={}&timeMax={}\
             &singleEvents=true&orderBy=startTime&maxResults=50",
            self.base_url,
            urlencod(time_min),
            urlencod(time_max),
        );
        let data = self.get(token, &url).await?;
        let items = data["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().map(parse_event).collect())
    }

    /// Free-text event search from `time_min` forward.
    pub async fn search_events(
        &self,
        token: &str,
        query: &str,
        time_min: &str,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>> {
        let url = format!(
            "{}/calendars/primary/events?q={}&timeMin={}\
             &singleEvents=true&orderBy=startTime&maxResults={max_results}",
            self.base_url,
            urlencod(query),
            urlencod(time_min),
        );
        let data = self.get(token, &url).await?;
        let items = data["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().map(parse_event).collect())
    }

    /// Create an event on the primary calendar. Irreversible — callers must
    /// not retry this blindly.
    pub async fn create_event(
        &self,
        token: &str,
        summary: &str,
        start_time: &str,
        end_time: &str,
        description: Option<&str>,
        location: Option<&str>,
    ) -> Result<CalendarEvent> {
        let payload = event_payload(summary, start_time, end_time, description, location);
        let url = format!("{}/calendars/primary/events", self.base_url);
        let data = self.post_json(token, &url, &payload).await?;
        Ok(parse_event(&data))
    }
}

/// Request body for events.insert. Times are RFC3339; the calendar stores
/// them as UTC.
fn event_payload(
    summary: &str,
    start_time: &str,
    end_time: &str,
    description: Option<&str>,
    location: Option<&str>,
) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "summary": summary,
        "start": { "dateTime": start_time, "timeZone": "UTC" },
        "end": { "dateTime": end_time, "timeZone": "UTC" },
    });
    if let Some(description) = description {
        payload["description"] = serde_json::json!(description);
    }
    if let Some(location) = location {
        payload["location"] = serde_json::json!(location);
    }
    payload
}

fn parse_event(v: &serde_json::Value) -> CalendarEvent {
    let start = v["start"]["dateTime"]
        .as_str()
        .or_else(|| v["start"]["date"].as_str())
        .unwrap_or_default()
        .to_string();
    let end = v["end"]["dateTime"]
        .as_str()
        .or_else(|| v["end"]["date"].as_str())
        .unwrap_or_default()
        .to_string();
    let attendees = v["attendees"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a["email"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    CalendarEvent {
        id: v["id"].as_str().unwrap_or_default().to_string(),
        summary: v["summary"].as_str().unwrap_or("(no title)").to_string(),
        description: v["description"].as_str().map(|s| s.to_string()),
        start,
        end,
        location: v["location"].as_str().map(|s| s.to_string()),
        attendees,
    }
}
