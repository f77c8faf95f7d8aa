// Mail provider client: recent messages from linked accounts

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Gmail REST base for the authenticated user
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Default search: messages from the last 24 hours
pub const DEFAULT_QUERY: &str = "newer_than:1d";

/// A linked mail account and its bearer token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAccount {
    /// Label attached to every message from this account (e.g. "personal")
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// The parts of a message the summarizer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSummary {
    pub account: String,
    pub id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    /// Milliseconds since the epoch, as reported by the provider
    pub internal_date: i64,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl Message {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    fn into_summary(self, account: &str) -> EmailSummary {
        let from = self.header("from").unwrap_or("Unknown").to_string();
        let subject = self.header("subject").unwrap_or("No Subject").to_string();
        let internal_date = self
            .internal_date
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        EmailSummary {
            account: account.to_string(),
            id: self.id,
            from,
            subject,
            snippet: self.snippet,
            internal_date,
        }
    }
}

/// Client for the mail provider's REST API
pub struct MailClient {
    agent: ureq::Agent,
    base_url: String,
    query: String,
}

impl Default for MailClient {
    fn default() -> Self {
        Self::new(GMAIL_API_BASE, DEFAULT_QUERY)
    }
}

impl MailClient {
    pub fn new(base_url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(Duration::from_secs(30)).build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            query: query.into(),
        }
    }

    /// Recent messages of one account. Failures yield an empty list.
    pub fn fetch_recent(&self, account: &MailAccount) -> Vec<EmailSummary> {
        let Some(token) = account.token.as_deref().filter(|token| !token.is_empty()) else {
            debug!(account = %account.name, "No token for mail account, skipping");
            return Vec::new();
        };

        let ids = match self.list_message_ids(token, &account.name) {
            Ok(ids) => ids,
            Err(e) => {
                error!(account = %account.name, error = ?e, "Failed to list recent messages");
                return Vec::new();
            }
        };

        ids.iter()
            .filter_map(|id| match self.fetch_message(token, id) {
                Ok(message) => Some(message.into_summary(&account.name)),
                Err(e) => {
                    warn!(account = %account.name, id = %id, error = ?e, "Failed to fetch message, skipping");
                    None
                }
            })
            .collect()
    }

    /// Recent messages of every account, newest first
    ///
    /// Accounts are fetched concurrently. Accounts without a token are skipped.
    pub fn fetch_all(&self, accounts: &[MailAccount]) -> Vec<EmailSummary> {
        let mut all: Vec<EmailSummary> = thread::scope(|scope| {
            let handles: Vec<_> = accounts
                .iter()
                .map(|account| scope.spawn(move || self.fetch_recent(account)))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        error!("Mail fetch thread panicked");
                        Vec::new()
                    })
                })
                .collect()
        });

        sort_newest_first(&mut all);
        debug!(count = all.len(), "Fetched recent messages");
        all
    }

    fn list_message_ids(&self, token: &str, account: &str) -> Result<Vec<String>> {
        let response = self
            .agent
            .get(&format!("{}/messages", self.base_url))
            .query("q", &self.query)
            .set("Authorization", &format!("Bearer {}", token))
            .call();

        match response {
            Ok(resp) => {
                let list: MessageList = resp.into_json().context("Failed to parse message list")?;
                Ok(list.messages.into_iter().map(|m| m.id).collect())
            }
            Err(ureq::Error::Status(401, _)) => {
                warn!(account, "Mail token expired");
                Ok(Vec::new())
            }
            Err(ureq::Error::Status(code, _)) => Err(eyre!("Mail provider returned HTTP {}", code)),
            Err(e) => Err(eyre!("Mail request failed: {}", e)),
        }
    }

    fn fetch_message(&self, token: &str, id: &str) -> Result<Message> {
        let resp = self
            .agent
            .get(&format!("{}/messages/{}", self.base_url, id))
            .set("Authorization", &format!("Bearer {}", token))
            .call()
            .map_err(|e| eyre!("Message request failed: {}", e))?;

        resp.into_json().context("Failed to parse message")
    }
}

pub fn sort_newest_first(emails: &mut [EmailSummary]) {
    emails.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_summary_from_full_message() {
        let message = parse(
            r#"{
                "id": "m1",
                "snippet": "Submit by Friday",
                "internalDate": "1717000000000",
                "payload": {"headers": [
                    {"name": "From", "value": "Prof <prof@uni.edu>"},
                    {"name": "SUBJECT", "value": "Assignment due"},
                    {"name": "To", "value": "me@uni.edu"}
                ]}
            }"#,
        );

        let summary = message.into_summary("school");
        assert_eq!(
            summary,
            EmailSummary {
                account: "school".to_string(),
                id: "m1".to_string(),
                from: "Prof <prof@uni.edu>".to_string(),
                subject: "Assignment due".to_string(),
                snippet: "Submit by Friday".to_string(),
                internal_date: 1_717_000_000_000,
            }
        );
    }

    #[test]
    fn test_summary_defaults_for_missing_parts() {
        let summary = parse(r#"{"id": "m2"}"#).into_summary("personal");
        assert_eq!(summary.from, "Unknown");
        assert_eq!(summary.subject, "No Subject");
        assert_eq!(summary.snippet, "");
        assert_eq!(summary.internal_date, 0);
    }

    #[test]
    fn test_message_list_without_messages() {
        let list: MessageList = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());
    }

    #[test]
    fn test_sort_newest_first() {
        let mut emails: Vec<EmailSummary> = [3, 9, 1]
            .iter()
            .map(|date| EmailSummary {
                account: "personal".to_string(),
                id: date.to_string(),
                from: String::new(),
                subject: String::new(),
                snippet: String::new(),
                internal_date: *date,
            })
            .collect();

        sort_newest_first(&mut emails);
        let order: Vec<_> = emails.iter().map(|e| e.internal_date).collect();
        assert_eq!(order, vec![9, 3, 1]);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = parse(r#"{"id": "m3", "internalDate": "5"}"#).into_summary("personal");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"internalDate\":5"));
    }

    #[test]
    fn test_accounts_without_token_yield_nothing() {
        let client = MailClient::new("http://127.0.0.1:9", DEFAULT_QUERY);
        let accounts = vec![
            MailAccount {
                name: "personal".to_string(),
                token: None,
            },
            MailAccount {
                name: "school".to_string(),
                token: Some(String::new()),
            },
        ];
        assert!(client.fetch_all(&accounts).is_empty());
    }
}
