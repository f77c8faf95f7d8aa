// AI digest: summarize recent mail into notifications

use crate::mail::EmailSummary;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_ENDPOINT: &str = "https://api.cerebras.ai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3.1-8b";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = r#"You are a productivity assistant for a student. You receive a JSON array of recent emails from a personal and a school account.
Pick out what needs attention: deadlines, assignments, meetings, replies that are owed. Ignore promotions and newsletters.
Respond with JSON only, in exactly this shape:
{"notifications": [{"type": "action" | "info" | "urgent", "text": "short actionable sentence", "priority": "low" | "medium" | "high"}], "today_focus": "one sentence on what to focus on today"}
Use at most 6 notifications. If nothing needs attention, return an empty notifications array."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Action,
    Info,
    Urgent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Structured summary of recent mail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub today_focus: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Client for an OpenAI-compatible chat completions endpoint
pub struct Summarizer {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl Summarizer {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(Duration::from_secs(60)).build(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, temperature: f32) -> Self {
        self.model = model.into();
        self.temperature = temperature;
        self
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Summarize `emails`. Returns None when there is nothing to summarize,
    /// no key is configured, or the request or its response is unusable.
    pub fn summarize(&self, emails: &[EmailSummary]) -> Option<Digest> {
        if emails.is_empty() {
            debug!("No emails to summarize");
            return None;
        }
        let Some(key) = self.api_key.as_deref() else {
            warn!("No AI API key configured, skipping digest");
            return None;
        };

        let content = match self.complete(key, emails) {
            Ok(content) => content,
            Err(e) => {
                error!(endpoint = %self.endpoint, error = ?e, "Digest request failed");
                return None;
            }
        };

        let digest = parse_digest(&content);
        if digest.is_none() {
            warn!(bytes = content.len(), "Digest response was not valid JSON");
        }
        digest
    }

    fn complete(&self, key: &str, emails: &[EmailSummary]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: serde_json::to_string(emails).context("Failed to serialize emails")?,
                },
            ],
        };

        debug!(model = %self.model, emails = emails.len(), "Requesting digest");
        let resp = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", key))
            .send_json(&request)
            .map_err(|e| eyre!("Chat completion request failed: {}", e))?;

        let body: ChatResponse = resp.into_json().context("Failed to parse chat completion")?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| eyre!("Chat completion returned no choices"))
    }
}

/// Parse model output into a digest
///
/// Models often wrap the object in prose or code fences, so the text between
/// the first `{` and the last `}` is what gets parsed.
pub fn parse_digest(content: &str) -> Option<Digest> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}
