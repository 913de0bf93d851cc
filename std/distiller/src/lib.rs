//! MCP server that distills newsletter email into topic digests.
//!
//! Reads the user's Gmail (read-only) and asks a language model to pick the
//! messages relevant to a topic. Gmail credentials are loaded on first use,
//! so the server starts and lists its tools before authorization happens.

use rmcp::{
    ServerHandler,
    handler::server::router::tool::ToolRouter,
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool_handler,
};
use std::{path::PathBuf, sync::Arc};

pub mod dates;
pub mod distill;
pub mod error;
pub mod gmail;
pub mod llm;
pub mod tools;

pub use error::Error;

use gmail::{GmailClient, TokenStore};
use llm::LlmClient;

/// Server settings, usually taken from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// Authorized-user token file.
    pub token: PathBuf,
    pub model: String,
    pub api_key: Option<String>,
    pub gmail_url: String,
    pub anthropic_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: "token.json".into(),
            model: llm::DEFAULT_MODEL.into(),
            api_key: None,
            gmail_url: gmail::GMAIL_API.into(),
            anthropic_url: llm::ANTHROPIC_API.into(),
        }
    }
}

/// MCP server exposing the Gmail and digest tools.
#[derive(Debug, Clone)]
pub struct DistillerServer {
    pub(crate) gmail: Arc<GmailClient>,
    pub(crate) llm: Arc<LlmClient>,
    pub(crate) tool_router: ToolRouter<Self>,
}

impl DistillerServer {
    fn clients(config: &Config) -> (Arc<GmailClient>, Arc<LlmClient>) {
        let http = reqwest::Client::new();
        let store = Arc::new(TokenStore::new(&config.token, gmail::auth::token_http()));
        let gmail = GmailClient::with_base_url(http.clone(), store, config.gmail_url.clone());
        let llm = LlmClient::new(http, config.api_key.clone(), config.model.clone())
            .with_base_url(config.anthropic_url.clone());
        (Arc::new(gmail), Arc::new(llm))
    }
}

#[tool_handler]
impl ServerHandler for DistillerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ai-news-distiller-mcp".into(),
                title: Some("AI News Distiller".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Fetch emails from Gmail with get_emails, then pass their JSON to distill_news \
                 to keep only the ones relevant to a topic."
                    .into(),
            ),
        }
    }
}
