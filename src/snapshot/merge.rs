use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::aggregate::AllTimeLows;
use crate::snapshot::{SnapshotRow, SnapshotTable};
use crate::types::{ScrapeResult, NOT_AVAILABLE};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub updated: usize,
    pub inserted: usize,
    /// Existing rows with no fresh result this batch.
    pub untouched: usize,
    /// Fresh `Error` results that left a previous price in place.
    pub price_kept: usize,
    /// Later rows repeating an earlier URL, carried through as they were.
    pub duplicates_kept: usize,
}

/// Reconcile a batch of fresh results into the snapshot.
///
/// - existing rows keep their position; a fresh result overwrites the scraped
///   fields, except that an `Error` outcome never replaces the price
/// - rows without a fresh result keep every scraped field
/// - a later row repeating an earlier URL is kept but never updated
/// - URLs seen for the first time are appended, sorted by URL
/// - every row gets its all-time low, or `N/A` when none is known
/// - extra columns pass through unchanged
///
/// Pure and idempotent: the same inputs always give the same table.
pub fn merge<'a>(
    existing: &SnapshotTable,
    fresh: impl IntoIterator<Item = &'a ScrapeResult>,
    lows: &AllTimeLows,
) -> (SnapshotTable, MergeStats) {
    let mut stats = MergeStats::default();

    // Latest attempt per URL.
    let mut latest: HashMap<&str, &ScrapeResult> = HashMap::new();
    for result in fresh {
        latest
            .entry(result.url.as_str())
            .and_modify(|cur| {
                if result.timestamp >= cur.timestamp {
                    *cur = result;
                }
            })
            .or_insert(result);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut rows = Vec::with_capacity(existing.rows.len() + latest.len());
    for row in &existing.rows {
        let duplicate = !row.url.is_empty() && !seen.insert(row.url.as_str());
        let mut row = row.clone();
        if duplicate {
            warn!(url = %row.url, "[MERGE] duplicate snapshot row left as is");
            stats.duplicates_kept += 1;
            row.all_time_low = low_for(lows, &row.url);
            rows.push(row);
            continue;
        }

        match latest.remove(row.url.as_str()) {
            Some(result) => {
                if apply(&mut row, result) {
                    stats.price_kept += 1;
                }
                stats.updated += 1;
            }
            None => stats.untouched += 1,
        }
        row.all_time_low = low_for(lows, &row.url);
        rows.push(row);
    }

    let mut new_urls: Vec<&str> = latest.keys().copied().collect();
    new_urls.sort_unstable();
    for url in new_urls {
        let result = latest[url];
        let mut row = SnapshotRow {
            url: url.to_string(),
            last_updated: String::new(),
            title: String::new(),
            event_date: String::new(),
            location: String::new(),
            price: String::new(),
            all_time_low: low_for(lows, url),
            extra: BTreeMap::new(),
        };
        apply(&mut row, result);
        row.price = result.price.to_string();
        debug!(url = %url, "[MERGE] new row");
        rows.push(row);
        stats.inserted += 1;
    }

    info!(
        updated = stats.updated,
        inserted = stats.inserted,
        untouched = stats.untouched,
        price_kept = stats.price_kept,
        "[MERGE] snapshot merged",
    );

    let table = SnapshotTable {
        extra_columns: existing.extra_columns.clone(),
        rows,
    };
    (table, stats)
}

/// Copy a fresh result onto a row. Returns true when an `Error` outcome left
/// the previous price alone.
fn apply(row: &mut SnapshotRow, result: &ScrapeResult) -> bool {
    row.last_updated = result.time_label();
    row.title = result.title.clone();
    row.event_date = result.event_date.clone();
    row.location = result.location.clone();
    if result.price.is_error() {
        debug!(url = %row.url, kept = %row.price, "[MERGE] error attempt, keeping previous price");
        return true;
    }
    row.price = result.price.to_string();
    false
}

fn low_for(lows: &AllTimeLows, url: &str) -> String {
    lows.get(url)
        .map(|m| m.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}
