//! Read-only Gmail API client.

use crate::error::Error;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, de::DeserializeOwned};
use std::sync::Arc;

pub mod auth;
pub mod message;

pub use auth::TokenStore;
pub use message::{Email, EmailDetail, EmailSummary, Message};

/// Default Gmail API endpoint.
pub const GMAIL_API: &str = "https://gmail.googleapis.com";

/// Gmail caps `maxResults` for message listing at this value.
pub const MAX_RESULTS_LIMIT: u32 = 500;

/// Mailbox profile of the authenticated user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
    pub messages_total: Option<u64>,
    pub threads_total: Option<u64>,
    pub history_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Options for a date-range search.
#[derive(Debug, Clone)]
pub struct EmailQuery {
    pub max_results: u32,
    /// Extra Gmail search terms, e.g. `from:news@example.com`.
    pub filter: String,
    pub include_body: bool,
    /// Return [`EmailSummary`] records instead of [`EmailDetail`].
    pub basic: bool,
}

impl Default for EmailQuery {
    fn default() -> Self {
        Self {
            max_results: 100,
            filter: String::new(),
            include_body: false,
            basic: true,
        }
    }
}

/// Gmail search expression covering `start` to `end`.
pub fn date_query(start: NaiveDateTime, end: NaiveDateTime, filter: &str) -> String {
    let mut query = format!(
        "after:{} before:{}",
        start.format("%Y/%m/%d"),
        end.format("%Y/%m/%d")
    );
    let filter = filter.trim();
    if !filter.is_empty() {
        query.push(' ');
        query.push_str(filter);
    }
    query
}

/// Gmail client for the authenticated user (`users/me`).
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<TokenStore>,
}

impl GmailClient {
    pub fn with_base_url(
        http: reqwest::Client,
        auth: Arc<TokenStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(format!("{}/gmail/v1/users/me/{path}", self.base_url))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                service: "Gmail",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn profile(&self) -> Result<Profile, Error> {
        self.get("profile", &[]).await
    }

    pub async fn message(&self, id: &str) -> Result<Message, Error> {
        self.get(&format!("messages/{id}"), &[]).await
    }

    /// Emails received between `start` and `end`.
    ///
    /// Messages that fail to load are logged and skipped; a failed search
    /// is an error.
    pub async fn emails_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        opts: &EmailQuery,
    ) -> Result<Vec<Email>, Error> {
        let query = date_query(start, end, &opts.filter);
        let max = opts.max_results.clamp(1, MAX_RESULTS_LIMIT);
        tracing::info!("searching emails with query: {query}");
        let list: MessageList = self
            .get(
                "messages",
                &[("q", query.clone()), ("maxResults", max.to_string())],
            )
            .await?;
        if list.messages.is_empty() {
            tracing::warn!("no emails found for {query}");
            return Ok(Vec::new());
        }

        let total = list.messages.len();
        tracing::info!("found {total} emails, retrieving details");
        let mut emails = Vec::with_capacity(total);
        let mut failures = 0;
        for (i, msg) in list.messages.iter().enumerate() {
            match self.message(&msg.id).await {
                Ok(full) => {
                    let now = Local::now().fixed_offset();
                    emails.push(if opts.basic {
                        Email::Summary(full.summary(now))
                    } else {
                        Email::Detail(full.detail(now, opts.include_body))
                    });
                }
                Err(e) => {
                    tracing::error!("error retrieving email {}: {e}", msg.id);
                    failures += 1;
                }
            }
            if (i + 1) % 10 == 0 {
                tracing::debug!("processed {}/{total} emails", i + 1);
            }
        }
        tracing::info!("retrieved {} emails, {failures} failures", emails.len());
        Ok(emails)
    }
}
