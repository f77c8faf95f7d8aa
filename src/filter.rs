// Query filtering over list entries

use crate::entry::{Difficulty, Entry};

/// Filter for reading a list
#[derive(Debug, Clone)]
pub struct Filter {
    /// Entry field to filter on
    pub field: Field,
    /// Comparison operator
    pub op: FilterOp,
    /// Value to compare against
    pub value: FieldValue,
}

/// Entry fields that can be filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Text,
    Completed,
    Archived,
    Difficulty,
}

/// Comparison operators for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,       // ==
    Ne,       // !=
    Gt,       // >
    Lt,       // <
    Gte,      // >=
    Lte,      // <=
    Contains, // case-insensitive substring
}

/// Values an entry field can be compared against
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Difficulty(Difficulty),
}

impl Filter {
    pub fn new(field: Field, op: FilterOp, value: FieldValue) -> Self {
        Self { field, op, value }
    }

    /// Entries that are not archived
    pub fn active() -> Self {
        Self::new(Field::Archived, FilterOp::Eq, FieldValue::Bool(false))
    }

    pub fn completed(completed: bool) -> Self {
        Self::new(Field::Completed, FilterOp::Eq, FieldValue::Bool(completed))
    }

    pub fn text_contains(needle: impl Into<String>) -> Self {
        Self::new(Field::Text, FilterOp::Contains, FieldValue::String(needle.into()))
    }

    /// Check one entry. Mismatched value types never match.
    pub fn matches(&self, entry: &Entry) -> bool {
        match (self.field, &self.value) {
            (Field::Text, FieldValue::String(needle)) => match self.op {
                FilterOp::Contains => entry.text.to_lowercase().contains(&needle.to_lowercase()),
                op => op.compare(entry.text.as_str(), needle.as_str()),
            },
            (Field::Completed, FieldValue::Bool(b)) => self.op.compare(&entry.completed, b),
            (Field::Archived, FieldValue::Bool(b)) => self.op.compare(&entry.archived, b),
            // Entries without a tier rank as easy
            (Field::Difficulty, FieldValue::Difficulty(d)) => self
                .op
                .compare(&entry.difficulty.unwrap_or(Difficulty::Easy), d),
            _ => false,
        }
    }
}

/// True when `entry` passes every filter
pub fn matches_all(entry: &Entry, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| filter.matches(entry))
}

impl FilterOp {
    fn compare<T: PartialOrd + ?Sized>(self, left: &T, right: &T) -> bool {
        match self {
            FilterOp::Eq | FilterOp::Contains => left == right,
            FilterOp::Ne => left != right,
            FilterOp::Gt => left > right,
            FilterOp::Lt => left < right,
            FilterOp::Gte => left >= right,
            FilterOp::Lte => left <= right,
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterOp::Eq => write!(f, "="),
            FilterOp::Ne => write!(f, "!="),
            FilterOp::Gt => write!(f, ">"),
            FilterOp::Lt => write!(f, "<"),
            FilterOp::Gte => write!(f, ">="),
            FilterOp::Lte => write!(f, "<="),
            FilterOp::Contains => write!(f, "contains"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NewEntry;
    use chrono::Utc;

    fn entry(text: &str, difficulty: Option<Difficulty>) -> Entry {
        let mut new = NewEntry::new(text);
        new.difficulty = difficulty;
        new.into_entry(text.to_string(), Utc::now())
    }

    #[test]
    fn test_filter_creation() {
        let filter = Filter::active();
        assert_eq!(filter.field, Field::Archived);
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.value, FieldValue::Bool(false));
    }

    #[test]
    fn test_active_filter_skips_archived() {
        let mut archived = entry("old", None);
        archived.archived = true;

        assert!(Filter::active().matches(&entry("new", None)));
        assert!(!Filter::active().matches(&archived));
    }

    #[test]
    fn test_difficulty_comparison() {
        let at_least_medium = Filter::new(
            Field::Difficulty,
            FilterOp::Gte,
            FieldValue::Difficulty(Difficulty::Medium),
        );

        assert!(at_least_medium.matches(&entry("a", Some(Difficulty::Hard))));
        assert!(at_least_medium.matches(&entry("b", Some(Difficulty::Medium))));
        assert!(!at_least_medium.matches(&entry("c", Some(Difficulty::Easy))));
        assert!(!at_least_medium.matches(&entry("d", None)));
    }

    #[test]
    fn test_text_contains_is_case_insensitive() {
        let filter = Filter::text_contains("REPORT");
        assert!(filter.matches(&entry("Write report", None)));
        assert!(!filter.matches(&entry("Call mom", None)));
    }

    #[test]
    fn test_mismatched_value_never_matches() {
        let filter = Filter::new(Field::Completed, FilterOp::Eq, FieldValue::String("true".into()));
        assert!(!filter.matches(&entry("a", None)));
    }

    #[test]
    fn test_matches_all() {
        let mut done = entry("Write report", None);
        done.completed = true;
        let filters = vec![Filter::active(), Filter::completed(true)];

        assert!(matches_all(&done, &filters));
        assert!(!matches_all(&entry("Write report", None), &filters));
        assert!(matches_all(&done, &[]));
    }

    #[test]
    fn test_filter_op_display() {
        assert_eq!(FilterOp::Eq.to_string(), "=");
        assert_eq!(FilterOp::Ne.to_string(), "!=");
        assert_eq!(FilterOp::Contains.to_string(), "contains");
    }
}
