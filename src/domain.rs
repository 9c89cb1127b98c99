use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Source-assigned recall notice identifier; the natural key across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nid(i64);

impl Nid {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Nid {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        // CSV exports from spreadsheet tools sometimes render integers as "12345.0".
        let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        match digits.parse::<i64>() {
            Ok(parsed) if parsed > 0 => Ok(Self(parsed)),
            _ => Err(ParseError::new(
                Some(value),
                None,
                format!("NID {value:?} is not a positive integer"),
            )),
        }
    }
}

/// Recall severity. `Class1` is the most severe; `Class3` the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecallClass {
    #[serde(rename = "Class 1")]
    Class1,
    #[serde(rename = "Class 2")]
    Class2,
    #[serde(rename = "Class 3")]
    Class3,
}

impl RecallClass {
    pub const LOWEST_SEVERITY: RecallClass = RecallClass::Class3;

    pub fn as_str(self) -> &'static str {
        match self {
            RecallClass::Class1 => "Class 1",
            RecallClass::Class2 => "Class 2",
            RecallClass::Class3 => "Class 3",
        }
    }
}

impl fmt::Display for RecallClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecallClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Class 1" => Ok(RecallClass::Class1),
            "Class 2" => Ok(RecallClass::Class2),
            "Class 3" => Ok(RecallClass::Class3),
            other => Err(format!("unknown recall class {other:?}")),
        }
    }
}

/// A record as scraped: loosely typed, keyed by canonical column name.
///
/// Column names are folded to lowercase ASCII alphanumerics so that
/// `"Last updated"`, `"LastUpdated"` and `"\u{feff}last_updated"` all land on
/// the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecallRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecallRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::new();
        for (key, value) in pairs {
            record.insert(key.as_ref(), value);
        }
        record
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        self.fields.insert(canonical_column(column), value.into());
    }

    /// First non-empty value among the given column aliases.
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(&canonical_column(alias)))
            .map(|value| value.as_str())
            .find(|value| !value.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub fn canonical_column(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Output of the normalizer; input to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecall {
    pub nid: Nid,
    pub title: String,
    pub url: String,
    pub product: String,
    /// May be empty; the classifier falls back to its defaults.
    pub issue: String,
    /// Raw recall class text, e.g. `"Class 1 - Class 2"` or `"Type II"`.
    pub class_text: String,
    pub last_updated: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: String,
    pub main_issue: Option<String>,
    pub secondary_issue: Option<String>,
    pub bacteria_subtype: Option<String>,
    pub class: RecallClass,
}

/// Canonical recall row as written by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecallRecord {
    pub nid: Nid,
    pub title: String,
    pub url: String,
    pub product: String,
    pub issue: String,
    pub main_issue: Option<String>,
    pub secondary_issue: Option<String>,
    pub bacteria_subtype: Option<String>,
    pub category: String,
    pub class: RecallClass,
    pub last_updated: NaiveDate,
}

/// Placeholder stored in `Issue` when the source left it blank.
pub const UNSPECIFIED_ISSUE: &str = "Unspecified";

impl RecallRecord {
    pub fn from_parts(normalized: NormalizedRecall, classification: Classification) -> Self {
        let issue = if normalized.issue.is_empty() {
            UNSPECIFIED_ISSUE.to_string()
        } else {
            normalized.issue
        };
        Self {
            nid: normalized.nid,
            title: normalized.title,
            url: normalized.url,
            product: normalized.product,
            issue,
            main_issue: classification.main_issue,
            secondary_issue: classification.secondary_issue,
            bacteria_subtype: classification.bacteria_subtype,
            category: classification.category,
            class: classification.class,
            last_updated: normalized.last_updated,
        }
    }
}

/// A stored row: the canonical record plus the loader-owned lifecycle columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecall {
    #[serde(flatten)]
    pub record: RecallRecord,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}
