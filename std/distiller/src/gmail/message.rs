//! Gmail message payloads and the records tools return.

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Gmail encodes part bodies as base64url, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("valid regex"));

/// A full message as returned by `users.messages.get`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub size_estimate: u64,
    #[serde(default)]
    pub payload: Part,
}

/// One MIME part; the payload itself is the root part.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
}

/// Basic email record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    /// RFC 3339.
    pub date: String,
    pub snippet: String,
}

/// Email record with recipients, labels and optionally the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailDetail {
    #[serde(flatten)]
    pub summary: EmailSummary,
    pub to: String,
    /// `YYYY-MM-DD HH:MM:SS` in the sender's offset.
    pub date_readable: String,
    pub labels: Vec<String>,
    pub size_estimate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Either record shape, serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Email {
    Summary(EmailSummary),
    Detail(EmailDetail),
}

impl Message {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Send time from the `Date` header, or `fallback` when it is missing
    /// or unparseable.
    pub fn sent_at(&self, fallback: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let Some(raw) = self.header("Date") else {
            return fallback;
        };
        // Drop a trailing zone comment such as " (UTC)".
        let raw = raw.split(" (").next().unwrap_or(raw).trim();
        DateTime::parse_from_rfc2822(raw).unwrap_or(fallback)
    }

    pub fn summary(&self, fallback: DateTime<FixedOffset>) -> EmailSummary {
        EmailSummary {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            from: self.header("From").unwrap_or("Unknown").to_string(),
            subject: self.header("Subject").unwrap_or("No Subject").to_string(),
            date: self.sent_at(fallback).to_rfc3339(),
            snippet: self.snippet.clone(),
        }
    }

    pub fn detail(&self, fallback: DateTime<FixedOffset>, include_body: bool) -> EmailDetail {
        let sent = self.sent_at(fallback);
        EmailDetail {
            summary: self.summary(fallback),
            to: self.header("To").unwrap_or("Unknown").to_string(),
            date_readable: sent.format("%Y-%m-%d %H:%M:%S").to_string(),
            labels: self.label_ids.clone(),
            size_estimate: self.size_estimate,
            body: include_body.then(|| self.body_text().map(|b| clean_html(&b)).unwrap_or_default()),
        }
    }

    /// Decoded text of the first plain-text or HTML part, depth first.
    pub fn body_text(&self) -> Option<String> {
        body_from_part(&self.payload)
    }
}

fn body_from_part(part: &Part) -> Option<String> {
    if let Some(body) = part.parts.iter().find_map(body_from_part) {
        return Some(body);
    }
    if part.mime_type != "text/plain" && part.mime_type != "text/html" {
        return None;
    }
    let data = part.body.data.as_deref().filter(|d| !d.is_empty())?;
    match BODY_ENGINE.decode(data) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()).filter(|s| !s.is_empty()),
        Err(e) => {
            tracing::warn!("undecodable {} part: {e}", part.mime_type);
            None
        }
    }
}

/// Strip tags and squeeze whitespace.
pub fn clean_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let text = TAG.replace_all(html, "");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    let text = SPACES.replace_all(&text, " ");
    text.trim().to_string()
}
