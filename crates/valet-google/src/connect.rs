use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use valet_core::error::{Result, ValetError};

use crate::oauth::GoogleAuth;

#[derive(serde::Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    /// The user id the consent flow was started for.
    state: Option<String>,
    error: Option<String>,
}

struct AppState {
    auth: Arc<GoogleAuth>,
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OAuthCallback>,
) -> Html<String> {
    if let Some(error) = params.error {
        return Html(format!("<h1>Authorization failed</h1><p>{error}</p>"));
    }

    let (Some(code), Some(user_id)) = (params.code, params.state) else {
        return Html("<h1>Error</h1><p>Missing authorization code or state.</p>".to_string());
    };

    match state.auth.exchange_code(&user_id, &code).await {
        Ok(()) => Html(
            "<h1>Connected!</h1><p>Google account connected to valet. You can close this tab.</p>"
                .to_string(),
        ),
        Err(e) => Html(format!("<h1>Error</h1><p>Failed to connect: {e}</p>")),
    }
}

/// Start the OAuth callback listener. Runs until the process exits.
pub async fn start_callback_server(port: u16, auth: Arc<GoogleAuth>) -> Result<()> {
    let state = Arc::new(AppState { auth });

    let app = Router::new()
        .route("/oauth/callback", get(oauth_callback))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| ValetError::Config(format!("failed to bind port {port}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ValetError::Config(format!("oauth callback server error: {e}")))?;

    Ok(())
}
