//! Core data models for the tag synchronizer.
//!
//! This module contains the type definitions shared across the pipeline:
//! update classification, the tracknumber sentinel type, normalized row
//! images and the run statistics struct.

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::Serialize;
use std::cmp::Ordering;

// ============================================================================
// Update Classification
// ============================================================================

/// How an event pair mutates the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Insert,
    Update,
    Delete,
}

impl UpdateType {
    /// Parse the single-letter code carried on update rows.
    pub fn from_code(code: &str) -> Option<UpdateType> {
        match code {
            "I" => Some(UpdateType::Insert),
            "U" => Some(UpdateType::Update),
            "D" => Some(UpdateType::Delete),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            UpdateType::Insert => "I",
            UpdateType::Update => "U",
            UpdateType::Delete => "D",
        }
    }

    /// The before image is meaningful for updates and deletes.
    pub fn has_old_image(self) -> bool {
        !matches!(self, UpdateType::Insert)
    }

    /// The after image is meaningful for inserts and updates.
    pub fn has_new_image(self) -> bool {
        !matches!(self, UpdateType::Delete)
    }
}

// ============================================================================
// Tracknumber Sentinel
// ============================================================================

/// A track number that may be absent. Inside an album's `tracknumbers`
/// list the absent case is serialized as the literal `n`, which sorts
/// after every integer so that missing numbers never win the
/// lowest-track selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracknumber {
    Present(i64),
    Missing,
}

impl Tracknumber {
    /// Parse an adjusted tracknumber string; blank means missing.
    pub fn parse(s: &str) -> Tracknumber {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Tracknumber::Missing;
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Tracknumber::Present(n),
            Err(_) => Tracknumber::Missing,
        }
    }

    /// Parse a token from a stored `tracknumbers` list (`n` = missing).
    pub fn from_list_token(token: &str) -> Tracknumber {
        if token == "n" {
            Tracknumber::Missing
        } else {
            Tracknumber::parse(token)
        }
    }

    /// The token this number contributes to a `tracknumbers` list.
    pub fn to_list_token(self) -> String {
        match self {
            Tracknumber::Present(n) => n.to_string(),
            Tracknumber::Missing => "n".to_string(),
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Tracknumber::Missing)
    }
}

impl Default for Tracknumber {
    fn default() -> Self {
        Tracknumber::Missing
    }
}

impl Ord for Tracknumber {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Tracknumber::Present(a), Tracknumber::Present(b)) => a.cmp(b),
            (Tracknumber::Present(_), Tracknumber::Missing) => Ordering::Less,
            (Tracknumber::Missing, Tracknumber::Present(_)) => Ordering::Greater,
            (Tracknumber::Missing, Tracknumber::Missing) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Tracknumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ToSql for Tracknumber {
    // Missing numbers are stored as the empty string, matching what the
    // scanner delivers for blank tags.
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Tracknumber::Present(n) => Ok(ToSqlOutput::Owned(Value::Integer(*n))),
            Tracknumber::Missing => Ok(ToSqlOutput::Owned(Value::Text(String::new()))),
        }
    }
}

/// Sort the tokens of a `tracknumbers` list in place (`n` last).
pub fn sort_tracknumber_tokens(tokens: &mut [String]) {
    tokens.sort_by(|a, b| Tracknumber::from_list_token(a).cmp(&Tracknumber::from_list_token(b)));
}

// ============================================================================
// Numeric Fields
// ============================================================================

/// A numeric tag field that keeps the scanner's "blank stays blank"
/// convention at the storage boundary: present values bind as integers,
/// absent ones as the empty string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlNum(pub Option<i64>);

impl ToSql for SqlNum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self.0 {
            Some(n) => Ok(ToSqlOutput::Owned(Value::Integer(n))),
            None => Ok(ToSqlOutput::Owned(Value::Text(String::new()))),
        }
    }
}

// ============================================================================
// Multi-Valued Fields
// ============================================================================

/// The three renditions of a multi-valued tag produced by normalization:
/// the full concatenated display form (before 'the' rewriting), the
/// filtered concatenated form (after inclusion policy and 'the'
/// rewriting), and the filtered list form used for lookup fanout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValue {
    pub full: String,
    pub filtered: String,
    pub list: Vec<String>,
}

impl MultiValue {
    /// The list form, or a singleton empty string when the list is empty.
    /// Cartesian-product expansion treats an empty list as one blank value.
    pub fn list_or_blank(&self) -> Vec<String> {
        if self.list.is_empty() {
            vec![String::new()]
        } else {
            self.list.clone()
        }
    }
}

// ============================================================================
// Run Statistics
// ============================================================================

/// Counters for one synchronizer run.
/// Logged to stderr per scan and optionally exported to JSON.
#[derive(Default, Debug, Clone, Serialize)]
pub struct SyncStats {
    pub scans_processed: usize,
    pub pairs_processed: usize,
    pub pairs_skipped: usize,

    pub tracks_inserted: usize,
    pub tracks_updated: usize,
    pub tracks_deleted: usize,
    pub duplicates_assigned: usize,

    pub albums_inserted: usize,
    pub albums_updated: usize,
    pub albums_deleted: usize,

    pub lookups_inserted: usize,
    pub lookups_deleted: usize,
    pub entities_inserted: usize,
    pub entities_deleted: usize,

    pub albumsonly_upserted: usize,
    pub albumsonly_deleted: usize,

    pub warnings: usize,
    pub row_errors: usize,

    pub elapsed_seconds: f64,
}

impl SyncStats {
    /// Log stats to stderr in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracknumber_ordering() {
        assert!(Tracknumber::Present(1) < Tracknumber::Present(2));
        assert!(Tracknumber::Present(99) < Tracknumber::Missing);
        assert_eq!(Tracknumber::Missing, Tracknumber::Missing);
    }

    #[test]
    fn test_tracknumber_tokens() {
        assert_eq!(Tracknumber::Present(7).to_list_token(), "7");
        assert_eq!(Tracknumber::Missing.to_list_token(), "n");
        assert_eq!(Tracknumber::from_list_token("n"), Tracknumber::Missing);
        assert_eq!(Tracknumber::from_list_token("12"), Tracknumber::Present(12));
    }

    #[test]
    fn test_sort_tracknumber_tokens_places_n_last() {
        let mut tokens = vec![
            "n".to_string(),
            "10".to_string(),
            "2".to_string(),
            "n".to_string(),
            "1".to_string(),
        ];
        sort_tracknumber_tokens(&mut tokens);
        assert_eq!(tokens, vec!["1", "2", "10", "n", "n"]);
    }

    #[test]
    fn test_multivalue_blank_fallback() {
        let empty = MultiValue::default();
        assert_eq!(empty.list_or_blank(), vec![String::new()]);

        let filled = MultiValue {
            full: "A\nB".to_string(),
            filtered: "A\nB".to_string(),
            list: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(filled.list_or_blank(), vec!["A", "B"]);
    }

    #[test]
    fn test_update_type_codes() {
        assert_eq!(UpdateType::from_code("I"), Some(UpdateType::Insert));
        assert_eq!(UpdateType::from_code("X"), None);
        assert!(UpdateType::Delete.has_old_image());
        assert!(!UpdateType::Delete.has_new_image());
        assert!(UpdateType::Update.has_old_image());
        assert!(UpdateType::Update.has_new_image());
    }
}
