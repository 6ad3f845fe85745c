use chrono::{DateTime, Local};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{Catalog, Category, HymnNumber};
use crate::equivalence::{EquivalenceResolver, EquivalenceRule};
use crate::stats::{StatEntry, StatisticsStore, now_secs};

/// Everything the browser shows about one hymn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HymnInfo {
    pub title: String,
    pub number: Option<HymnNumber>,
    pub equivalent_title: String,
    pub equivalent_number: Option<HymnNumber>,
    pub category: Option<Category>,
    pub equivalent_category: Option<Category>,
    pub equivalence_index: Option<usize>,
    pub queries: u64,
    pub launches: u64,
    pub last_accessed: f64,
    pub last_opened: String,
    pub last_accessed_relative: String,
    pub ready: bool,
}

impl HymnInfo {
    fn placeholder(number: HymnNumber) -> Self {
        Self {
            number: Some(number),
            ..Self::default()
        }
    }

    /// `"NNN Title"`, the form used by suggestions and the recent list.
    pub fn label(&self) -> String {
        match self.number {
            Some(n) => format!("{n} {}", self.title),
            None => String::new(),
        }
    }
}

pub struct QueryFacade<'a> {
    catalog: &'a Catalog,
    stats: &'a StatisticsStore,
    rule: &'a dyn EquivalenceRule,
}

impl<'a> QueryFacade<'a> {
    pub fn new(catalog: &'a Catalog, stats: &'a StatisticsStore, rule: &'a dyn EquivalenceRule) -> Self {
        Self {
            catalog,
            stats,
            rule,
        }
    }

    /// Picks the hymn number out of what the user typed. When the typed text
    /// has no usable number, the completion's number stands in, unless that
    /// hymn is missing from the archive.
    pub fn resolve_input(&self, raw: &str, completion: Option<&str>) -> Option<HymnNumber> {
        if let Some(number) = HymnNumber::parse_prefix(raw) {
            return Some(number);
        }
        if raw.is_empty() {
            return None;
        }
        let fallback = completion.and_then(HymnNumber::parse_prefix)?;
        if self.catalog.is_missing(fallback) {
            return None;
        }
        Some(fallback)
    }

    pub fn query(&self, raw: &str, completion: Option<&str>) -> HymnInfo {
        match self.resolve_input(raw, completion) {
            Some(number) => self.info(number),
            None => {
                debug!("No hymn number in {raw:?}");
                HymnInfo::default()
            }
        }
    }

    pub fn info(&self, number: HymnNumber) -> HymnInfo {
        self.compose(number, self.stats.entry(number), now_secs())
    }

    fn compose(&self, number: HymnNumber, entry: StatEntry, now: f64) -> HymnInfo {
        if number.get() > self.catalog.max_hymns() {
            info!("Hymn #{number} is beyond the hymnal's {} hymns", self.catalog.max_hymns());
            return HymnInfo::placeholder(number);
        }
        if self.catalog.is_missing(number) {
            info!("Hymn #{number} is missing from the archive");
            return HymnInfo::placeholder(number);
        }

        let resolution = EquivalenceResolver::new(self.catalog, self.rule).resolve(number, None);
        let ready = resolution.is_match();
        HymnInfo {
            title: resolution.title,
            number: Some(number),
            equivalent_title: resolution.equivalent_title,
            equivalent_number: resolution.equivalent_number,
            category: resolution.category,
            equivalent_category: resolution.equivalent_category,
            equivalence_index: resolution.equivalence_index,
            queries: entry.queries,
            launches: entry.launches,
            last_accessed: entry.last_accessed,
            last_opened: last_opened_text(entry.last_accessed),
            last_accessed_relative: humanize_elapsed(entry.last_accessed, now),
            ready,
        }
    }

    /// Case-insensitive substring search over the sorted `"NNN Title"` list.
    pub fn suggestions(&self, text: &str, limit: usize) -> Vec<&'a str> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.catalog
            .all_entries()
            .iter()
            .filter(|entry| entry.to_lowercase().contains(&needle))
            .take(limit)
            .map(String::as_str)
            .collect()
    }

    /// Next or previous hymn as a `"NNN Title"` label, staying inside `[1, MAX]`.
    pub fn step(&self, current: Option<HymnNumber>, forward: bool) -> Option<String> {
        let current = current.unwrap_or(HymnNumber(1)).get();
        let max = self.catalog.max_hymns();
        let target = if forward {
            (current < max).then(|| current + 1)?
        } else if current > max {
            max
        } else {
            (current >= 2).then(|| current - 1)?
        };
        let number = HymnNumber(target);
        Some(format!("{number} {}", self.info(number).title))
    }

    /// One row per hymn number, built in parallel from a single statistics snapshot.
    pub fn table(&self) -> Vec<HymnInfo> {
        let snapshot = self.stats.snapshot();
        let now = now_secs();
        (1..=self.catalog.max_hymns())
            .into_par_iter()
            .map(HymnNumber)
            .map(|number| {
                let entry = snapshot
                    .get(&number.to_string())
                    .copied()
                    .unwrap_or_default();
                self.compose(number, entry, now)
            })
            .collect()
    }
}

pub fn last_opened_text(last_accessed: f64) -> String {
    if last_accessed <= 0.0 {
        return String::new();
    }
    DateTime::from_timestamp(last_accessed as i64, 0)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("Last opened: %b %d, %Y at %I:%M %p")
                .to_string()
        })
        .unwrap_or_default()
}

/// "3 minutes ago" style rendering; empty for a hymn that was never opened.
pub fn humanize_elapsed(last_accessed: f64, now: f64) -> String {
    if last_accessed <= 0.0 {
        return String::new();
    }
    let secs = (now - last_accessed).max(0.0) as u64;
    let (count, unit) = match secs {
        0..=9 => return "now".to_string(),
        10..=59 => (secs, "second"),
        60..=3_599 => (secs / 60, "minute"),
        3_600..=86_399 => (secs / 3_600, "hour"),
        86_400..=2_591_999 => (secs / 86_400, "day"),
        2_592_000..=31_535_999 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };
    match count {
        1 if unit == "hour" => "an hour ago".to_string(),
        1 => format!("a {unit} ago"),
        n => format!("{n} {unit}s ago"),
    }
}
