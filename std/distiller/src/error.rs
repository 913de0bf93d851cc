use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("no Gmail token at {0}; run `distill-mcp authorize` first")]
    NoToken(PathBuf),

    #[error("credentials file {0} not found; download it from Google Cloud Console")]
    NoCredentials(PathBuf),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("unable to parse date: {0}")]
    DateParse(String),

    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("model returned no text")]
    EmptyReply,

    #[error("model reply is not a JSON list of emails: {0}")]
    MalformedReply(String),
}
