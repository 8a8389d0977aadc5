use std::fmt;

#[derive(Debug)]
pub enum ValetError {
    Config(String),
    Storage(String),
    Llm { provider: String, message: String },
    Http { status: u16, body: String },
    /// The OAuth code exchange failed; the user must restart the connect flow.
    OAuthExchange(String),
    /// The user's Google grant is gone: absent, revoked upstream, or cleared locally.
    CredentialRevoked,
    /// A token refresh failed for a reason worth retrying (network, 5xx, 429).
    CredentialTransient(String),
    RemoteRateLimited(String),
    RemoteUnavailable(String),
    RemoteBadRequest(String),
    /// The remote service rejected the bearer token (401/403).
    RemoteAuthRejected(String),
    UnknownTool(String),
    /// The turn's overall deadline elapsed.
    TurnTimeout,
}

impl ValetError {
    /// Failures that a bounded local retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CredentialTransient(_) | Self::RemoteRateLimited(_) | Self::RemoteUnavailable(_)
        )
    }

    /// Short label for user-facing fallback messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Llm { .. } => "llm",
            Self::Http { .. } => "http",
            Self::OAuthExchange(_) => "oauth exchange",
            Self::CredentialRevoked => "credential revoked",
            Self::CredentialTransient(_) => "credential transient",
            Self::RemoteRateLimited(_) => "rate limited",
            Self::RemoteUnavailable(_) => "service unavailable",
            Self::RemoteBadRequest(_) => "bad request",
            Self::RemoteAuthRejected(_) => "auth rejected",
            Self::UnknownTool(_) => "unknown tool",
            Self::TurnTimeout => "turn timeout",
        }
    }
}

impl fmt::Display for ValetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::Llm { provider, message } => write!(f, "llm error ({provider}): {message}"),
            Self::Http { status, body } => write!(f, "http error ({status}): {body}"),
            Self::OAuthExchange(msg) => write!(f, "oauth exchange failed: {msg}"),
            Self::CredentialRevoked => write!(f, "google credential revoked or absent"),
            Self::CredentialTransient(msg) => write!(f, "credential refresh failed (transient): {msg}"),
            Self::RemoteRateLimited(msg) => write!(f, "remote rate limited: {msg}"),
            Self::RemoteUnavailable(msg) => write!(f, "remote unavailable: {msg}"),
            Self::RemoteBadRequest(msg) => write!(f, "remote bad request: {msg}"),
            Self::RemoteAuthRejected(msg) => write!(f, "remote rejected token: {msg}"),
            Self::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            Self::TurnTimeout => write!(f, "turn deadline elapsed"),
        }
    }
}

impl std::error::Error for ValetError {}

pub type Result<T> = std::result::Result<T, ValetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ValetError::RemoteRateLimited("429".into()).is_retryable());
        assert!(ValetError::RemoteUnavailable("502".into()).is_retryable());
        assert!(ValetError::CredentialTransient("timeout".into()).is_retryable());
        assert!(!ValetError::CredentialRevoked.is_retryable());
        assert!(!ValetError::RemoteBadRequest("400".into()).is_retryable());
        assert!(!ValetError::UnknownTool("nope".into()).is_retryable());
    }
}
