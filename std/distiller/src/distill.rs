//! Topic filtering of emails through the language model.

use crate::{error::Error, llm::LlmClient};
use serde::{Deserialize, Serialize};

const SYSTEM: &str = "You review emails and select the ones that are interesting for the topic \
at hand. Reply with a JSON array only, no prose. Each element must be an object with the string \
fields \"title\", \"sender\", \"date\" (formatted YYYY-MM-DD HH:MM:SS) and \"content\". Reply \
with [] when nothing is relevant.";

/// An email the model judged relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEmail {
    pub title: String,
    pub sender: String,
    pub date: String,
    pub content: String,
}

/// User turn listing the candidate emails.
pub fn review_prompt(emails: &[String], topic: &str, period: &str) -> String {
    let mut prompt = format!("Topic: {topic}\nPeriod: {period}\n\nEmails:\n");
    for (i, email) in emails.iter().enumerate() {
        prompt.push_str(&format!("\n--- email {} ---\n{}\n", i + 1, email.trim()));
    }
    prompt
}

/// Pull the first well-formed email array out of a model reply.
///
/// Each `[` is tried in turn, so brackets in surrounding prose are skipped.
/// Trailing text after the array is ignored.
pub fn parse_selection(reply: &str) -> Result<Vec<DigestEmail>, Error> {
    let mut last_error = None;
    for (start, _) in reply.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&reply[start..]).into_iter::<Vec<DigestEmail>>();
        match stream.next() {
            Some(Ok(selected)) => return Ok(selected),
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
    }
    Err(Error::MalformedReply(match last_error {
        Some(e) => format!("{e}: {}", truncate(reply)),
        None => truncate(reply),
    }))
}

fn truncate(s: &str) -> String {
    const MAX: usize = 200;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

/// Select the emails relevant to `topic` during `period`.
pub async fn distill(
    llm: &LlmClient,
    emails: &[String],
    topic: &str,
    period: &str,
) -> Result<Vec<DigestEmail>, Error> {
    if emails.is_empty() {
        return Ok(Vec::new());
    }
    tracing::info!(count = emails.len(), topic, period, "reviewing emails");
    let reply = llm
        .complete(Some(SYSTEM), &review_prompt(emails, topic, period), 0.0)
        .await?;
    let selected = parse_selection(&reply)?;
    tracing::info!(selected = selected.len(), "review complete");
    Ok(selected)
}
