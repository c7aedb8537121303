//! Append-only scrape history.
//!
//! Every attempt lands here exactly once, in attempt order. Nothing is ever
//! rewritten; aggregates are recomputed from a full scan.

pub mod file;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ScrapeResult;

pub use file::CsvHistory;
pub use sqlite::SqliteHistory;

/// Fixed column layout of the history file.
pub const HISTORY_COLUMNS: [&str; 6] = ["Time", "Title", "Date", "Location", "Price", "URL"];

/// One persisted row, as text. Price stays in its rendered form
/// (`$1,234.56`, `Sold Out`, `N/A`, `Error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub time: String,
    pub title: String,
    pub date: String,
    pub location: String,
    pub price: String,
    pub url: String,
}

impl HistoryRecord {
    pub fn as_row(&self) -> [&str; 6] {
        [
            self.time.as_str(),
            self.title.as_str(),
            self.date.as_str(),
            self.location.as_str(),
            self.price.as_str(),
            self.url.as_str(),
        ]
    }
}

impl From<&ScrapeResult> for HistoryRecord {
    fn from(r: &ScrapeResult) -> Self {
        Self {
            time: r.time_label(),
            title: r.title.clone(),
            date: r.event_date.clone(),
            location: r.location.clone(),
            price: r.price.to_string(),
            url: r.url.clone(),
        }
    }
}

/// Result of one pass over the history.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub records: usize,
    /// Rows that could not be decoded at all.
    pub skipped: usize,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record as a single write. Safe to call from many tasks.
    async fn append(&self, result: &ScrapeResult) -> Result<()>;

    /// Feed every stored record to `visit`, oldest first, without loading
    /// the whole history. Each call starts again from the first record.
    async fn scan(&self, visit: &mut (dyn FnMut(HistoryRecord) + Send)) -> Result<ScanStats>;
}

/// Latest `limit` records for `url`, newest first.
pub async fn recent_for_url(
    store: &dyn HistoryStore,
    url: &str,
    limit: usize,
) -> Result<Vec<HistoryRecord>> {
    let mut matching = Vec::new();
    store
        .scan(&mut |record: HistoryRecord| {
            if record.url == url {
                matching.push(record);
            }
        })
        .await?;
    matching.reverse();
    matching.truncate(limit);
    Ok(matching)
}
