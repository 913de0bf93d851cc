//! Tool implementations for the distiller MCP server.

use crate::{
    Config, DistillerServer, dates,
    distill::{self, DigestEmail},
    gmail::EmailQuery,
};
use rmcp::{
    handler::server::wrapper::Parameters,
    schemars::{self, JsonSchema},
    tool, tool_router,
};
use serde::Deserialize;

/// Parameters for fetching emails.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEmailsParams {
    /// Start of the period: `today`, `yesterday`, `last_week`, `last_month`,
    /// `last_year` or a date such as `2024-01-15`.
    #[serde(default = "default_start")]
    pub start_date: String,
    /// End of the period, in the same forms as `start_date`.
    #[serde(default = "default_end")]
    pub end_date: String,
    /// Maximum number of emails to return.
    #[serde(default = "default_max_emails")]
    pub max_emails: u32,
    /// Include recipients, labels and the cleaned message body.
    #[serde(default)]
    pub detailed: bool,
}

/// Parameters for distilling emails down to a topic.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DistillNewsParams {
    /// Emails to review, one string per email (e.g. JSON from get_emails).
    pub emails: Vec<String>,
    /// Topic the selected emails must be relevant to.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Period the digest covers.
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_start() -> String {
    "yesterday".into()
}

fn default_end() -> String {
    "today".into()
}

fn default_max_emails() -> u32 {
    10
}

fn default_topic() -> String {
    "AI news".into()
}

fn default_period() -> String {
    "current week".into()
}

#[tool_router]
impl DistillerServer {
    /// Create a new distiller server.
    pub fn new(config: Config) -> Self {
        let (gmail, llm) = Self::clients(&config);
        Self {
            gmail,
            llm,
            tool_router: Self::tool_router(),
        }
    }

    /// Describe the authenticated Gmail account.
    #[tool(description = "Get the user profile from the Gmail client")]
    async fn get_user_profile(&self) -> Result<String, String> {
        let profile = self.gmail.profile().await.map_err(|e| {
            tracing::error!("error getting profile: {e}");
            format!("Error getting profile: {e}")
        })?;
        let total = profile
            .messages_total
            .map(|n| n.to_string())
            .unwrap_or_else(|| "Unknown".into());
        Ok(format!(
            "Authenticated as: {}\nTotal messages in account: {total}",
            profile.email_address
        ))
    }

    /// Fetch emails received in a period.
    #[tool(
        description = "Get the emails from the period specified. If no period is specified, get the emails from yesterday to today."
    )]
    async fn get_emails(
        &self,
        Parameters(params): Parameters<GetEmailsParams>,
    ) -> Result<String, String> {
        let start = dates::parse_date(&params.start_date).map_err(|e| e.to_string())?;
        let end = dates::parse_date(&params.end_date).map_err(|e| e.to_string())?;
        let opts = EmailQuery {
            max_results: params.max_emails,
            include_body: params.detailed,
            basic: !params.detailed,
            ..Default::default()
        };
        let emails = self
            .gmail
            .emails_between(start, end, &opts)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&emails).map_err(|e| e.to_string())
    }

    /// Keep only the emails relevant to a topic.
    #[tool(
        description = "Review the emails passed and return only those relevant to the topic for the given period, as JSON with title, sender, date and content"
    )]
    async fn distill_news(
        &self,
        Parameters(params): Parameters<DistillNewsParams>,
    ) -> Result<String, String> {
        let selected: Vec<DigestEmail> =
            distill::distill(&self.llm, &params.emails, &params.topic, &params.period)
                .await
                .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&selected).map_err(|e| e.to_string())
    }

    /// One unconstrained completion, handy for checking the model setup.
    #[tool(description = "Returns a silly message from the language model")]
    async fn say_something_silly(&self) -> Result<String, String> {
        self.llm
            .complete(None, "Say something silly", 1.0)
            .await
            .map_err(|e| e.to_string())
    }
}
