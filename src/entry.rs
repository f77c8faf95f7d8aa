// Entry model shared by every named list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// One of the four persisted collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListName {
    Monthly,
    Weekly,
    Daily,
    Reflections,
}

impl ListName {
    pub const ALL: [ListName; 4] = [
        ListName::Monthly,
        ListName::Weekly,
        ListName::Daily,
        ListName::Reflections,
    ];

    /// Fixed key used for both the local cache and the remote document
    pub fn storage_key(self) -> &'static str {
        match self {
            ListName::Monthly => "clarity_monthly_goals",
            ListName::Weekly => "clarity_weekly_goals",
            ListName::Daily => "clarity_daily_tasks",
            ListName::Reflections => "clarity_reflections",
        }
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|list| list.storage_key() == key)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListName::Monthly => "monthly",
            ListName::Weekly => "weekly",
            ListName::Daily => "daily",
            ListName::Reflections => "reflections",
        }
    }
}

impl fmt::Display for ListName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ListName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" | "month" => Ok(ListName::Monthly),
            "weekly" | "week" => Ok(ListName::Weekly),
            "daily" | "day" | "tasks" => Ok(ListName::Daily),
            "reflections" | "reflection" => Ok(ListName::Reflections),
            other => Self::from_storage_key(other).ok_or_else(|| {
                format!(
                    "unknown list '{}' (expected monthly, weekly, daily or reflections)",
                    other
                )
            }),
        }
    }
}

/// Difficulty tier for daily tasks, ordered easy < medium < hard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}' (expected easy, medium or hard)", other)),
        }
    }
}

/// A goal, task or reflection
///
/// Keys this crate does not know about (written by other clients) are kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entry {
    /// Last time this entry changed: `updated_at`, or `created_at` if never updated
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Merge free-form fields
    ///
    /// A key naming a typed field sets that field when the value has the
    /// right type and is dropped otherwise, so `extra` never shadows a
    /// serialized field. Identity and timestamps are never taken from here.
    fn merge_extra(&mut self, extra: Map<String, Value>) {
        for (key, value) in extra {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.extra.insert(key, value);
                continue;
            }
            match (key.as_str(), value) {
                ("text", Value::String(text)) => self.text = text,
                ("completed", Value::Bool(completed)) => self.completed = completed,
                ("archived", Value::Bool(archived)) => self.archived = archived,
                ("difficulty", Value::Null) => self.difficulty = None,
                ("difficulty", Value::String(raw)) => match raw.parse::<Difficulty>() {
                    Ok(difficulty) => self.difficulty = Some(difficulty),
                    Err(e) => debug!(id = %self.id, error = %e, "Dropping unknown difficulty"),
                },
                (name, _) => {
                    debug!(id = %self.id, key = name, "Dropping extra field that shadows an entry field");
                }
            }
        }
    }
}

/// JSON keys owned by `Entry`'s typed fields
const RESERVED_KEYS: [&str; 7] = ["id", "text", "completed", "archived", "createdAt", "updatedAt", "difficulty"];

/// Caller-supplied fields for a new entry; id and timestamps are generated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEntry {
    pub text: String,
    pub completed: bool,
    pub difficulty: Option<Difficulty>,
    pub extra: Map<String, Value>,
}

impl NewEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    /// Build the stored entry. Typed fields win over same-named keys in `extra`.
    pub(crate) fn into_entry(self, id: String, created_at: DateTime<Utc>) -> Entry {
        let mut entry = Entry {
            id,
            text: String::new(),
            completed: false,
            archived: false,
            created_at,
            updated_at: None,
            difficulty: None,
            extra: Map::new(),
        };
        entry.merge_extra(self.extra);
        entry.text = self.text;
        entry.completed = self.completed;
        if self.difficulty.is_some() {
            entry.difficulty = self.difficulty;
        }
        entry
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub archived: Option<bool>,
    pub difficulty: Option<Difficulty>,
    pub extra: Map<String, Value>,
}

impl EntryPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn archived() -> Self {
        Self {
            archived: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.completed.is_none()
            && self.archived.is_none()
            && self.difficulty.is_none()
            && self.extra.is_empty()
    }

    /// Merge into `entry` and stamp `updated_at`, never earlier than `created_at`
    pub(crate) fn apply(self, entry: &mut Entry, now: DateTime<Utc>) {
        entry.merge_extra(self.extra);
        if let Some(text) = self.text {
            entry.text = text;
        }
        if let Some(completed) = self.completed {
            entry.completed = completed;
        }
        if let Some(archived) = self.archived {
            entry.archived = archived;
        }
        if let Some(difficulty) = self.difficulty {
            entry.difficulty = Some(difficulty);
        }
        entry.updated_at = Some(now.max(entry.created_at));
    }
}

/// Serialize a list the way it is stored locally and remotely
pub fn serialize_list(entries: &[Entry]) -> serde_json::Result<String> {
    serde_json::to_string(entries)
}

pub fn deserialize_list(payload: &str) -> serde_json::Result<Vec<Entry>> {
    serde_json::from_str(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: &str) -> Entry {
        NewEntry::new("Write report")
            .with_difficulty(Difficulty::Hard)
            .into_entry(id.to_string(), Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
    }

    #[test]
    fn test_list_name_keys() {
        assert_eq!(ListName::Daily.storage_key(), "clarity_daily_tasks");
        assert_eq!(
            ListName::from_storage_key("clarity_reflections"),
            Some(ListName::Reflections)
        );
        assert_eq!(ListName::from_storage_key("clarity_other"), None);
    }

    #[test]
    fn test_list_name_from_str() {
        assert_eq!("weekly".parse::<ListName>().unwrap(), ListName::Weekly);
        assert_eq!("Daily".parse::<ListName>().unwrap(), ListName::Daily);
        assert_eq!(
            "clarity_monthly_goals".parse::<ListName>().unwrap(),
            ListName::Monthly
        );
        assert!("yearly".parse::<ListName>().is_err());
    }

    #[test]
    fn test_difficulty_ordering_and_serialization() {
        assert!(Difficulty::Easy < Difficulty::Medium);
        assert!(Difficulty::Medium < Difficulty::Hard);
        assert_eq!(serde_json::to_string(&Difficulty::Hard).unwrap(), "\"hard\"");
        assert_eq!("MEDIUM".parse::<Difficulty>().unwrap(), Difficulty::Medium);
    }

    #[test]
    fn test_entry_camel_case_keys() {
        let entry = sample("e1");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"createdAt\":\"2025-03-01T09:00:00Z\""));
        assert!(json.contains("\"difficulty\":\"hard\""));
        assert!(!json.contains("updatedAt"));
    }

    #[test]
    fn test_entry_keeps_unknown_fields() {
        let payload = r#"[{"id":"1","text":"Plan","completed":false,"createdAt":"2025-03-01T09:00:00Z","mood":"calm"}]"#;
        let entries = deserialize_list(payload).unwrap();
        assert_eq!(entries[0].extra.get("mood"), Some(&Value::from("calm")));
        assert!(!entries[0].archived);

        let back = serialize_list(&entries).unwrap();
        assert!(back.contains("\"mood\":\"calm\""));
    }

    #[test]
    fn test_serialize_round_trip_is_stable() {
        let mut second = sample("e2");
        EntryPatch::completed(true).apply(&mut second, Utc::now());
        let list = vec![sample("e1"), second];

        let once = serialize_list(&list).unwrap();
        let twice = serialize_list(&deserialize_list(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_stamps_updated_at_not_before_created_at() {
        let mut entry = sample("e1");
        let earlier = entry.created_at - chrono::Duration::hours(1);
        EntryPatch::completed(true).apply(&mut entry, earlier);

        assert!(entry.completed);
        assert_eq!(entry.updated_at, Some(entry.created_at));
        assert_eq!(entry.last_touched(), entry.created_at);
    }

    #[test]
    fn test_patch_merges_only_given_fields() {
        let mut entry = sample("e1");
        let patch = EntryPatch {
            text: Some("Write final report".to_string()),
            ..EntryPatch::default()
        };
        patch.apply(&mut entry, Utc::now());

        assert_eq!(entry.text, "Write final report");
        assert_eq!(entry.difficulty, Some(Difficulty::Hard));
        assert!(!entry.completed);
        assert!(EntryPatch::default().is_empty());
        assert!(!EntryPatch::archived().is_empty());
    }

    fn extra(json: &str) -> Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_patch_extra_sets_typed_fields() {
        let mut entry = sample("e1");
        let created = entry.created_at;
        let patch = EntryPatch {
            extra: extra(
                r#"{"completed": true, "difficulty": "easy", "id": "other", "createdAt": "2020-01-01T00:00:00Z", "mood": "calm"}"#,
            ),
            ..EntryPatch::default()
        };
        patch.apply(&mut entry, Utc::now());

        assert!(entry.completed);
        assert_eq!(entry.difficulty, Some(Difficulty::Easy));
        assert_eq!(entry.id, "e1");
        assert_eq!(entry.created_at, created);
        assert_eq!(entry.extra.len(), 1);
        assert_eq!(entry.extra.get("mood"), Some(&Value::from("calm")));

        let payload = serialize_list(&[entry]).unwrap();
        assert_eq!(payload.matches("\"completed\"").count(), 1);
        assert_eq!(deserialize_list(&payload).unwrap().len(), 1);
    }

    #[test]
    fn test_patch_typed_field_wins_over_extra() {
        let mut entry = sample("e1");
        let patch = EntryPatch {
            completed: Some(false),
            extra: extra(r#"{"completed": true, "archived": "yes"}"#),
            ..EntryPatch::default()
        };
        patch.apply(&mut entry, Utc::now());

        assert!(!entry.completed);
        assert!(!entry.archived);
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn test_new_entry_extra_never_shadows_fields() {
        let new = NewEntry {
            text: "Stretch".to_string(),
            extra: extra(r#"{"text": "ignored", "updatedAt": "2020-01-01T00:00:00Z", "streakGoal": 5}"#),
            ..NewEntry::default()
        };
        let entry = new.into_entry("e3".to_string(), Utc::now());

        assert_eq!(entry.text, "Stretch");
        assert!(entry.updated_at.is_none());
        assert_eq!(entry.extra.get("streakGoal"), Some(&Value::from(5)));

        let payload = serialize_list(&[entry]).unwrap();
        assert_eq!(payload.matches("\"text\"").count(), 1);
        assert_eq!(deserialize_list(&payload).unwrap()[0].text, "Stretch");
    }
}
