pub mod calendar;
pub mod connect;
pub mod gmail;
pub mod oauth;

use async_trait::async_trait;
use valet_core::error::{Result, ValetError};
use valet_core::types::{ConnectStatus, Credential};

/// Durable mapping from user to OAuth grant. The storage layer implements
/// this; tests use an in-memory map.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<Credential>>;
    /// Upsert by user — a reconnect overwrites the prior credential.
    async fn save(&self, credential: &Credential) -> Result<()>;
}

/// The credential lifecycle surface consumed by the dispatcher and the
/// orchestrator. `GoogleAuth` is the real implementation; tests mock it.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Consent URL for the user to visit to (re)connect their account.
    fn auth_url(&self, user_id: &str) -> String;
    /// Exchange a one-time authorization code; transitions to connected.
    async fn exchange_code(&self, user_id: &str, code: &str) -> Result<()>;
    /// Best-effort upstream revoke, unconditional local revoke.
    async fn disconnect(&self, user_id: &str) -> Result<()>;
    /// Usable access token, refreshing behind a per-user single-flight guard.
    async fn access_token(&self, user_id: &str) -> Result<String>;
    /// Refresh regardless of freshness. Used after a remote 401.
    async fn force_refresh(&self, user_id: &str) -> Result<String>;
    /// Pure read — never triggers a refresh.
    async fn status(&self, user_id: &str) -> ConnectStatus;
    /// Local transition to revoked, without an upstream call.
    async fn mark_revoked(&self, user_id: &str) -> Result<()>;
}

/// Normalize a Google API failure into the typed remote error set.
///
/// Google reports quota exhaustion as 403 with a rate-limit reason in the
/// body, so 403 is split on body content.
pub fn classify_remote(service: &str, status: u16, body: &str) -> ValetError {
    match status {
        401 => ValetError::RemoteAuthRejected(format!("{service}: {status}")),
        403 => {
            if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") {
                ValetError::RemoteRateLimited(format!("{service}: {status}"))
            } else {
                ValetError::RemoteAuthRejected(format!("{service}: {status}"))
            }
        }
        429 => ValetError::RemoteRateLimited(format!("{service}: {status}")),
        400 | 404 => ValetError::RemoteBadRequest(format!("{service} ({status}): {body}")),
        _ => ValetError::RemoteUnavailable(format!("{service} ({status}): {body}")),
    }
}

/// Minimal URL encoding for query parameters.
pub(crate) fn urlencod(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace(':', "%3A")
        .replace('?', "%3F")
        .replace('#', "%23")
}
