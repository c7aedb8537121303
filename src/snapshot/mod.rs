//! Current-state snapshot: one row per tracked URL, rewritten in full after
//! every batch.

pub mod file;
pub mod merge;

use std::collections::BTreeMap;

use serde::Serialize;

pub use file::{load_snapshot, save_snapshot};
pub use merge::{merge, MergeStats};

/// Core columns, in file order. Anything else in a snapshot file is an extra.
pub const SNAPSHOT_COLUMNS: [&str; 7] =
    ["Time", "Title", "Date", "Location", "Price", "AllTimeLow", "URL"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRow {
    pub url: String,
    pub last_updated: String,
    pub title: String,
    pub event_date: String,
    pub location: String,
    pub price: String,
    pub all_time_low: String,
    /// Caller-added columns, carried through merges untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl SnapshotRow {
    pub fn extra(&self, column: &str) -> &str {
        self.extra.get(column).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotTable {
    /// Extra column names in the order they appeared in the file.
    pub extra_columns: Vec<String>,
    pub rows: Vec<SnapshotRow>,
}

impl SnapshotTable {
    /// Non-empty URLs in row order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(|r| r.url.as_str())
            .filter(|u| !u.is_empty())
    }

    pub fn row(&self, url: &str) -> Option<&SnapshotRow> {
        self.rows.iter().find(|r| r.url == url)
    }
}
