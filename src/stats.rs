// Completion analytics over stored lists

use crate::entry::{Difficulty, Entry};
use chrono::{Days, NaiveDate, TimeZone};
use std::collections::{BTreeMap, HashSet};

/// Consecutive days with at least one completed entry, counted back from
/// `today`. A day without completions yet does not break the streak until
/// it is over, so counting starts from yesterday in that case.
///
/// Days are taken from `created_at` in `tz`.
pub fn streak<Tz: TimeZone>(entries: &[Entry], today: NaiveDate, tz: &Tz) -> u32 {
    let days: HashSet<NaiveDate> = entries
        .iter()
        .filter(|entry| entry.completed)
        .map(|entry| entry.created_at.with_timezone(tz).date_naive())
        .collect();
    if days.is_empty() {
        return 0;
    }

    let mut cursor = today;
    if !days.contains(&cursor) {
        match cursor.checked_sub_days(Days::new(1)) {
            Some(yesterday) => cursor = yesterday,
            None => return 0,
        }
    }

    let mut count = 0;
    while days.contains(&cursor) {
        count += 1;
        match cursor.checked_sub_days(Days::new(1)) {
            Some(previous) => cursor = previous,
            None => break,
        }
    }
    count
}

/// Completed entries per day, keyed by the day they were last touched
pub fn completions_by_day<Tz: TimeZone>(entries: &[Entry], tz: &Tz) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries.iter().filter(|entry| entry.completed) {
        let day = entry.last_touched().with_timezone(tz).date_naive();
        *counts.entry(day).or_insert(0) += 1;
    }
    counts
}

/// Completion counts for `days` consecutive days starting at `start`,
/// zero-filled
pub fn completions_in_range<Tz: TimeZone>(
    entries: &[Entry],
    start: NaiveDate,
    days: u32,
    tz: &Tz,
) -> Vec<(NaiveDate, usize)> {
    let counts = completions_by_day(entries, tz);
    start
        .iter_days()
        .take(days as usize)
        .map(|day| (day, counts.get(&day).copied().unwrap_or(0)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifficultyCounts {
    pub easy: usize,
    pub medium: usize,
    pub hard: usize,
}

/// Entries per difficulty tier; entries without one count as easy
pub fn difficulty_breakdown(entries: &[Entry]) -> DifficultyCounts {
    let mut counts = DifficultyCounts::default();
    for entry in entries {
        match entry.difficulty.unwrap_or(Difficulty::Easy) {
            Difficulty::Easy => counts.easy += 1,
            Difficulty::Medium => counts.medium += 1,
            Difficulty::Hard => counts.hard += 1,
        }
    }
    counts
}
