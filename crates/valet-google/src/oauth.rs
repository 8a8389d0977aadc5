use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use valet_core::error::{Result, ValetError};
use valet_core::types::{now_unix, ConnectStatus, Credential};

use crate::{urlencod, CredentialBroker, CredentialStore};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Scopes requested for Gmail + Calendar access.
const SCOPES: &str = "https://www.googleapis.com/auth/gmail.modify \
                       https://www.googleapis.com/auth/calendar";

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Per-user Google OAuth lifecycle: connect, refresh, revoke.
///
/// State machine per user: absent → connected → (refresh) → connected,
/// or → revoked on disconnect / irrecoverable refresh failure. Refreshes
/// for the same user are single-flight: concurrent callers wait on a keyed
/// mutex and reuse the result instead of issuing duplicate upstream
/// refreshes, which could invalidate the refresh token.
pub struct GoogleAuth {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    store: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    refresh_margin_secs: i64,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    token_url: String,
    revoke_url: String,
}

impl GoogleAuth {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        refresh_margin_secs: i64,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            store,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            refresh_margin_secs,
            refresh_locks: Mutex::new(HashMap::new()),
            token_url: TOKEN_URL.to_string(),
            revoke_url: REVOKE_URL.to_string(),
        }
    }

    /// Point the token/revoke endpoints somewhere else (loopback test servers).
    #[doc(hidden)]
    pub fn with_endpoints(mut self, token_url: String, revoke_url: String) -> Self {
        self.token_url = token_url;
        self.revoke_url = revoke_url;
        self
    }

    /// OAuth consent URL for the user to visit. The `state` parameter carries
    /// the user id so the callback can attribute the authorization code.
    pub fn auth_url(&self, user_id: &str) -> String {
        format!(
            "{AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}\
             &access_type=offline&prompt=consent&state={}",
            urlencod(&self.client_id),
            urlencod(&self.redirect_uri),
            urlencod(SCOPES),
            urlencod(user_id),
        )
    }

    /// Exchange a one-time authorization code for access + refresh tokens.
    /// Transitions absent|revoked → connected. Failures are surfaced to the
    /// user; never retried automatically.
    pub async fn exchange_code(&self, user_id: &str, code: &str) -> Result<()> {
        let params = [
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ValetError::OAuthExchange(format!("token request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ValetError::OAuthExchange(format!("token response read failed: {e}")))?;

        if status != 200 {
            return Err(ValetError::OAuthExchange(format!("({status}): {text}")));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ValetError::OAuthExchange(format!("token parse failed: {e}")))?;

        let access_token = json["access_token"]
            .as_str()
            .ok_or_else(|| ValetError::OAuthExchange("missing access_token".to_string()))?
            .to_string();
        let expires_in = json["expires_in"].as_i64().unwrap_or(3600);
        // Google omits `scope` when the grant matches the request exactly.
        let scopes: Vec<String> = match json["scope"].as_str() {
            Some(granted) => granted.split_whitespace().map(|s| s.to_string()).collect(),
            None => SCOPES.split_whitespace().map(|s| s.to_string()).collect(),
        };

        // The user can untick scopes on the consent screen. A grant missing
        // any requested scope never reaches connected.
        for required in SCOPES.split_whitespace() {
            if !scopes.iter().any(|s| s == required) {
                return Err(ValetError::OAuthExchange(format!(
                    "consent did not grant required scope {required}; reconnect and allow all requested access"
                )));
            }
        }

        // Google omits the refresh token on re-consent; keep the prior one.
        let refresh_token = match json["refresh_token"].as_str() {
            Some(r) => r.to_string(),
            None => self
                .store
                .load(user_id)
                .await?
                .map(|c| c.refresh_token)
                .unwrap_or_default(),
        };

        if refresh_token.is_empty() {
            return Err(ValetError::OAuthExchange(
                "no refresh token granted; reconnect with consent".to_string(),
            ));
        }

        let credential = Credential {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            expiry: now_unix() + expires_in,
            scopes,
            revoked: false,
        };
        self.store.save(&credential).await
    }

    /// Best-effort upstream revoke, then local transition to revoked.
    /// The local state flips regardless of the upstream outcome.
    pub async fn disconnect(&self, user_id: &str) -> Result<()> {
        let Some(mut credential) = self.store.load(user_id).await? else {
            return Ok(());
        };

        if !credential.refresh_token.is_empty() {
            let _ = self
                .http
                .post(&self.revoke_url)
                .form(&[("token", credential.refresh_token.as_str())])
                .send()
                .await;
        }

        credential.revoked = true;
        credential.access_token.clear();
        credential.refresh_token.clear();
        self.store.save(&credential).await
    }

    /// Refresh the access token using the stored refresh token, mutating the
    /// credential in place. Callers must hold the user's refresh lock.
    async fn refresh_locked(&self, mut credential: Credential) -> Result<String> {
        let params = [
            ("refresh_token", credential.refresh_token.as_str()),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ValetError::CredentialTransient(format!("refresh request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ValetError::CredentialTransient(format!("refresh read failed: {e}")))?;

        if status != 200 {
            let err = classify_refresh_failure(status, &text);
            if matches!(err, ValetError::CredentialRevoked) {
                credential.revoked = true;
                credential.access_token.clear();
                credential.refresh_token.clear();
                self.store.save(&credential).await?;
            }
            return Err(err);
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ValetError::CredentialTransient(format!("refresh parse failed: {e}")))?;

        let access_token = json["access_token"]
            .as_str()
            .ok_or_else(|| {
                ValetError::CredentialTransient("missing access_token in refresh".to_string())
            })?
            .to_string();
        let expires_in = json["expires_in"].as_i64().unwrap_or(3600);

        credential.access_token = access_token.clone();
        credential.expiry = now_unix() + expires_in;
        self.store.save(&credential).await?;

        Ok(access_token)
    }

    /// The keyed mutex guarding refreshes for one user.
    async fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    async fn token_inner(&self, user_id: &str, force: bool) -> Result<String> {
        let credential = self
            .store
            .load(user_id)
            .await?
            .ok_or(ValetError::CredentialRevoked)?;
        if credential.revoked || credential.refresh_token.is_empty() {
            return Err(ValetError::CredentialRevoked);
        }
        if !force && credential.is_fresh(now_unix(), self.refresh_margin_secs) {
            return Ok(credential.access_token);
        }

        let lock = self.refresh_lock(user_id).await;
        let _guard = lock.lock().await;

        // A concurrent caller may have refreshed while we waited; its result
        // is reused unless this is a forced refresh.
        let credential = self
            .store
            .load(user_id)
            .await?
            .ok_or(ValetError::CredentialRevoked)?;
        if credential.revoked || credential.refresh_token.is_empty() {
            return Err(ValetError::CredentialRevoked);
        }
        if !force && credential.is_fresh(now_unix(), self.refresh_margin_secs) {
            return Ok(credential.access_token);
        }

        self.refresh_locked(credential).await
    }
}

/// Map a non-200 refresh response onto the credential error taxonomy.
/// `invalid_grant` means the refresh token is dead; 429/5xx are worth
/// retrying later.
fn classify_refresh_failure(status: u16, body: &str) -> ValetError {
    if body.contains("invalid_grant") {
        return ValetError::CredentialRevoked;
    }
    match status {
        400 | 401 | 403 => ValetError::CredentialRevoked,
        _ => ValetError::CredentialTransient(format!("refresh failed ({status}): {body}")),
    }
}

#[async_trait::async_trait]
impl CredentialBroker for GoogleAuth {
    fn auth_url(&self, user_id: &str) -> String {
        GoogleAuth::auth_url(self, user_id)
    }

    async fn exchange_code(&self, user_id: &str, code: &str) -> Result<()> {
        GoogleAuth::exchange_code(self, user_id, code).await
    }

    async fn disconnect(&self, user_id: &str) -> Result<()> {
        GoogleAuth::disconnect(self, user_id).await
    }

    async fn access_token(&self, user_id: &str) -> Result<String> {
        self.token_inner(user_id, false).await
    }

    async fn force_refresh(&self, user_id: &str) -> Result<String> {
        self.token_inner(user_id, true).await
    }

    async fn status(&self, user_id: &str) -> ConnectStatus {
        match self.store.load(user_id).await {
            Ok(Some(c)) if c.revoked => ConnectStatus::Revoked,
            Ok(Some(_)) => ConnectStatus::Connected,
            Ok(None) => ConnectStatus::Absent,
            Err(_) => ConnectStatus::Absent,
        }
    }

    async fn mark_revoked(&self, user_id: &str) -> Result<()> {
        if let Some(mut credential) = self.store.load(user_id).await? {
            credential.revoked = true;
            credential.access_token.clear();
            credential.refresh_token.clear();
            self.store.save(&credential).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory CredentialStore that counts saves.
    struct MemStore {
        map: Mutex<HashMap<String, Credential>>,
        saves: AtomicUsize,
    }

    impl MemStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                map: Mutex::new(HashMap::new()),
                saves: AtomicUsize::new(0),
            })
        }

        async fn seed(&self, credential: Credential) {
            self.map
                .lock()
                .await
                .insert(credential.user_id.clone(), credential);
        }
    }

    #[async_trait::async_trait]
    impl CredentialStore for MemStore {
        async fn load(&self, user_id: &str) -> Result<Option<Credential>> {
            Ok(self.map.lock().await.get(user_id).cloned())
        }
        async fn save(&self, credential: &Credential) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.map
                .lock()
                .await
                .insert(credential.user_id.clone(), credential.clone());
            Ok(())
        }
    }

    /// Loopback HTTP responder returning a fixed status + JSON body,
    /// counting requests served.
    async fn spawn_token_server(status_line: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn auth_with(store: Arc<MemStore>, token_url: String) -> GoogleAuth {
        GoogleAuth::new(
            "cid".into(),
            "secret".into(),
            "http://localhost/cb".into(),
            60,
            store,
        )
        .with_endpoints(token_url, "http://127.0.0.1:1".into())
    }

    fn live_credential(expiry: i64) -> Credential {
        Credential {
            user_id: "u1".into(),
            access_token: "live-token".into(),
            refresh_token: "refresh".into(),
            expiry,
            scopes: vec!["gmail".into()],
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_fresh_token_never_hits_upstream() {
        let (url, hits) = spawn_token_server("200 OK", r#"{"access_token":"x"}"#).await;
        let store = MemStore::new();
        store.seed(live_credential(now_unix() + 3600)).await;
        let auth = auth_with(Arc::clone(&store), url);

        let t1 = auth.access_token("u1").await.unwrap();
        let t2 = auth.access_token("u1").await.unwrap();
        assert_eq!(t1, "live-token");
        assert_eq!(t2, "live-token");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_once_under_concurrency() {
        let (url, hits) =
            spawn_token_server("200 OK", r#"{"access_token":"fresh","expires_in":3600}"#).await;
        let store = MemStore::new();
        store.seed(live_credential(now_unix() - 10)).await;
        let auth = Arc::new(auth_with(Arc::clone(&store), url));

        let a = Arc::clone(&auth);
        let b = Arc::clone(&auth);
        let (r1, r2) = tokio::join!(a.access_token("u1"), b.access_token("u1"));
        assert_eq!(r1.unwrap(), "fresh");
        assert_eq!(r2.unwrap(), "fresh");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_grant_transitions_to_revoked() {
        let (url, _) =
            spawn_token_server("400 Bad Request", r#"{"error":"invalid_grant"}"#).await;
        let store = MemStore::new();
        store.seed(live_credential(now_unix() - 10)).await;
        let auth = auth_with(Arc::clone(&store), url);

        let err = auth.access_token("u1").await.unwrap_err();
        assert!(matches!(err, ValetError::CredentialRevoked));
        assert_eq!(auth.status("u1").await, ConnectStatus::Revoked);

        // Tokens are cleared, not just flagged.
        let stored = store.load("u1").await.unwrap().unwrap();
        assert!(stored.access_token.is_empty());
        assert!(stored.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_5xx_is_transient() {
        let (url, _) = spawn_token_server("503 Service Unavailable", "{}").await;
        let store = MemStore::new();
        store.seed(live_credential(now_unix() - 10)).await;
        let auth = auth_with(Arc::clone(&store), url);

        let err = auth.access_token("u1").await.unwrap_err();
        assert!(matches!(err, ValetError::CredentialTransient(_)));
        // Still connected — a transient failure must not revoke.
        assert_eq!(auth.status("u1").await, ConnectStatus::Connected);
    }

    #[tokio::test]
    async fn test_absent_user_yields_revoked_error_and_absent_status() {
        let store = MemStore::new();
        let auth = auth_with(Arc::clone(&store), "http://127.0.0.1:1".into());

        assert!(matches!(
            auth.access_token("nobody").await.unwrap_err(),
            ValetError::CredentialRevoked
        ));
        assert_eq!(auth.status("nobody").await, ConnectStatus::Absent);
    }

    #[tokio::test]
    async fn test_disconnect_revokes_locally_despite_upstream_failure() {
        // Revoke endpoint refuses connections; local state must still flip.
        let store = MemStore::new();
        store.seed(live_credential(now_unix() + 3600)).await;
        let auth = auth_with(Arc::clone(&store), "http://127.0.0.1:1".into());

        auth.disconnect("u1").await.unwrap();
        assert_eq!(auth.status("u1").await, ConnectStatus::Revoked);
        assert!(matches!(
            auth.access_token("u1").await.unwrap_err(),
            ValetError::CredentialRevoked
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_connects_and_overwrites() {
        let (url, _) = spawn_token_server(
            "200 OK",
            r#"{"access_token":"new-at","refresh_token":"new-rt","expires_in":3600,"scope":"https://www.googleapis.com/auth/gmail.modify https://www.googleapis.com/auth/calendar"}"#,
        )
        .await;
        let store = MemStore::new();
        let auth = auth_with(Arc::clone(&store), url);

        auth.exchange_code("u1", "one-time-code").await.unwrap();
        assert_eq!(auth.status("u1").await, ConnectStatus::Connected);
        let stored = store.load("u1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new-at");
        assert_eq!(stored.refresh_token, "new-rt");
        assert_eq!(stored.scopes.len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_code_rejects_partial_scopes() {
        // Consent screen with calendar unticked: gmail granted, calendar not.
        let (url, _) = spawn_token_server(
            "200 OK",
            r#"{"access_token":"new-at","refresh_token":"new-rt","expires_in":3600,"scope":"https://www.googleapis.com/auth/gmail.modify"}"#,
        )
        .await;
        let store = MemStore::new();
        let auth = auth_with(Arc::clone(&store), url);

        let err = auth.exchange_code("u1", "one-time-code").await.unwrap_err();
        assert!(matches!(err, ValetError::OAuthExchange(_)));
        // The partial grant must not land in connected state.
        assert_eq!(auth.status("u1").await, ConnectStatus::Absent);
    }

    #[tokio::test]
    async fn test_exchange_code_failure_is_oauth_exchange_error() {
        let (url, _) =
            spawn_token_server("400 Bad Request", r#"{"error":"invalid_request"}"#).await;
        let store = MemStore::new();
        let auth = auth_with(Arc::clone(&store), url);

        let err = auth.exchange_code("u1", "bad-code").await.unwrap_err();
        assert!(matches!(err, ValetError::OAuthExchange(_)));
        assert_eq!(auth.status("u1").await, ConnectStatus::Absent);
    }

    #[test]
    fn test_classify_refresh_failure() {
        assert!(matches!(
            classify_refresh_failure(400, r#"{"error":"invalid_grant"}"#),
            ValetError::CredentialRevoked
        ));
        assert!(matches!(
            classify_refresh_failure(401, "unauthorized"),
            ValetError::CredentialRevoked
        ));
        assert!(matches!(
            classify_refresh_failure(429, "slow down"),
            ValetError::CredentialTransient(_)
        ));
        assert!(matches!(
            classify_refresh_failure(500, ""),
            ValetError::CredentialTransient(_)
        ));
    }

    #[test]
    fn test_auth_url_carries_user_state() {
        let store = MemStore::new();
        let auth = auth_with(store, TOKEN_URL.to_string());
        let url = auth.auth_url("user-7");
        assert!(url.contains("state=user-7"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }
}
