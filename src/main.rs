use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use valet_agent::agent::Agent;
use valet_agent::dispatch::Dispatcher;
use valet_agent::history::HistoryStore;
use valet_agent::tool::calendar::CalendarTool;
use valet_agent::tool::gmail::GmailTool;
use valet_agent::tool::{Tool, ToolRegistry};
use valet_core::config::Config;
use valet_core::types::ConnectStatus;
use valet_google::calendar::CalendarClient;
use valet_google::gmail::GmailClient;
use valet_google::oauth::GoogleAuth;
use valet_google::{CredentialBroker, CredentialStore};
use valet_llm::openai::OpenAiClient;
use valet_llm::provider::CompletionClient;
use valet_store::Store;

const USER_ID: &str = "local";

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("VALET_CONFIG").unwrap_or_else(|_| "valet.toml".to_string());

    let config = Config::load(Path::new(&config_path)).unwrap_or_else(|e| {
        eprintln!("fatal: failed to load config: {e}");
        std::process::exit(1);
    });

    if config.llm.api_key.is_empty() {
        eprintln!("fatal: VALET_LLM_API_KEY is not set");
        std::process::exit(1);
    }

    let store = Arc::new(Store::new(&config.database.path).await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to open database: {e}");
        std::process::exit(1);
    }));

    let auth = Arc::new(GoogleAuth::new(
        config.google.client_id.clone(),
        config.google.client_secret.clone(),
        config.google.redirect_uri.clone(),
        config.agent.refresh_margin_secs,
        Arc::clone(&store) as Arc<dyn CredentialStore>,
    ));

    let llm: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.base_url.clone(),
    ));

    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(GmailTool::new(Arc::new(GmailClient::new()))),
        Box::new(CalendarTool::new(Arc::new(CalendarClient::new()))),
    ];
    let dispatcher = Dispatcher::new(
        ToolRegistry::new(tools),
        Arc::clone(&auth) as Arc<dyn CredentialBroker>,
        config.agent.remote_retry_max,
    );

    let agent = Arc::new(Agent::new(
        Arc::clone(&store) as Arc<dyn HistoryStore>,
        llm,
        dispatcher,
        Arc::clone(&auth) as Arc<dyn CredentialBroker>,
        config.agent.clone(),
    ));

    // The OAuth callback server only matters when Google is configured.
    if !config.google.client_id.is_empty() {
        let port = config.google.callback_port;
        let auth = Arc::clone(&auth);
        tokio::spawn(async move {
            if let Err(e) = valet_google::connect::start_callback_server(port, auth).await {
                eprintln!("valet: oauth callback server failed: {e}");
            }
        });
    }

    eprintln!("valet: ready ({} via {})", config.llm.model, config.llm.provider);
    eprintln!("valet: /connect /status /disconnect /clear /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await.ok();
        stdout.flush().await.ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/connect" => {
                if config.google.client_id.is_empty() {
                    println!("google is not configured (set VALET_GOOGLE_CLIENT_ID)");
                } else {
                    println!("open this URL to connect your Google account:");
                    println!("{}", agent.begin_google_connect(USER_ID));
                }
            }
            "/status" => {
                let status = agent.tool_availability(USER_ID).await;
                match status {
                    ConnectStatus::Connected => println!("google: connected"),
                    ConnectStatus::Absent => println!("google: not connected"),
                    ConnectStatus::Revoked => {
                        println!("google: access revoked, use /connect to reconnect")
                    }
                }
            }
            "/disconnect" => match agent.disconnect_google(USER_ID).await {
                Ok(()) => println!("google: disconnected"),
                Err(e) => println!("disconnect failed: {e}"),
            },
            "/clear" => match agent.clear_history(USER_ID).await {
                Ok(()) => println!("history cleared"),
                Err(e) => println!("clear failed: {e}"),
            },
            _ => match agent.send_message(USER_ID, input, true).await {
                Ok(outcome) => println!("{}", outcome.response),
                Err(e) => println!("error: {e}"),
            },
        }
    }

    eprintln!("valet: bye");
}
