//! All-time lows, recomputed from a full history scan every time.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::history::{HistoryRecord, HistoryStore};
use crate::types::{Money, PriceOutcome};

/// A history row whose Price cell looked numeric but did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub url: String,
    pub time: String,
    pub price: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AllTimeLows {
    lows: HashMap<String, Money>,
    pub anomalies: Vec<Anomaly>,
}

impl AllTimeLows {
    /// Fold one record in. Only `Money` outcomes count.
    pub fn observe(&mut self, record: &HistoryRecord) {
        let url = record.url.trim();
        if url.is_empty() {
            return;
        }
        match PriceOutcome::from_cell(&record.price) {
            Ok(PriceOutcome::Money(price)) => {
                self.lows
                    .entry(url.to_string())
                    .and_modify(|low| *low = (*low).min(price))
                    .or_insert(price);
            }
            Ok(_) => {}
            Err(e) => self.anomalies.push(Anomaly {
                url: url.to_string(),
                time: record.time.clone(),
                price: record.price.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn get(&self, url: &str) -> Option<Money> {
        self.lows.get(url).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lows.is_empty()
    }

    /// URL → rendered low, sorted by URL.
    pub fn rendered(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .lows
            .iter()
            .map(|(url, low)| (url.clone(), low.to_string()))
            .collect();
        out.sort();
        out
    }
}

pub fn compute_all_time_lows<'a>(records: impl IntoIterator<Item = &'a HistoryRecord>) -> AllTimeLows {
    let mut lows = AllTimeLows::default();
    for record in records {
        lows.observe(record);
    }
    lows
}

/// Stream the whole store through [`AllTimeLows::observe`].
pub async fn scan_all_time_lows(store: &dyn HistoryStore) -> Result<AllTimeLows> {
    let mut lows = AllTimeLows::default();
    let stats = store.scan(&mut |record: HistoryRecord| lows.observe(&record)).await?;

    for a in &lows.anomalies {
        warn!(url = %a.url, price = %a.price, "[HISTORY] unparseable price skipped: {}", a.reason);
    }
    if stats.skipped > 0 {
        warn!(skipped = stats.skipped, "[HISTORY] unreadable rows skipped during scan");
    }
    Ok(lows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(url: &str, price: &str) -> HistoryRecord {
        HistoryRecord {
            time: "2026-01-01 10:00:00".to_string(),
            title: "Hamilton".to_string(),
            date: "N/A".to_string(),
            location: "N/A".to_string(),
            price: price.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn only_money_outcomes_count() {
        let history = vec![
            rec("https://a", "$150.00"),
            rec("https://a", "Sold Out"),
            rec("https://a", "Error"),
            rec("https://a", "N/A"),
            rec("https://a", "$1,120.00"),
            rec("https://a", "$99.50"),
            rec("https://b", "Error"),
        ];
        let lows = compute_all_time_lows(&history);
        assert_eq!(lows.get("https://a"), Some(Money::from_cents(9_950)));
        assert_eq!(lows.get("https://b"), None);
        assert_eq!(lows.len(), 1);
        assert!(lows.anomalies.is_empty());
    }

    #[test]
    fn malformed_prices_become_anomalies() {
        let history = vec![rec("https://a", "$12.x0"), rec("https://a", "$30.00")];
        let lows = compute_all_time_lows(&history);
        assert_eq!(lows.get("https://a"), Some(Money::from_cents(3_000)));
        assert_eq!(lows.anomalies.len(), 1);
        assert_eq!(lows.anomalies[0].price, "$12.x0");
    }

    #[test]
    fn result_is_independent_of_scan_order() {
        let mut history = vec![
            rec("https://a", "$80"),
            rec("https://b", "$300.25"),
            rec("https://a", "$75.10"),
            rec("https://b", "$299.99"),
        ];
        let forward = compute_all_time_lows(&history);
        history.reverse();
        let backward = compute_all_time_lows(&history);
        assert_eq!(forward, backward);
        assert_eq!(forward, compute_all_time_lows(&history));
        assert_eq!(
            forward.rendered(),
            vec![
                ("https://a".to_string(), "$75.10".to_string()),
                ("https://b".to_string(), "$299.99".to_string()),
            ]
        );
    }

    #[test]
    fn records_without_url_are_ignored() {
        let lows = compute_all_time_lows(&[rec("", "$5.00")]);
        assert!(lows.is_empty());
    }

    #[tokio::test]
    async fn scans_a_csv_history() {
        use crate::history::CsvHistory;
        use crate::types::{FailureKind, ScrapeResult};

        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistory::new(dir.path().join("prices.csv"));
        for cents in [20_000, 15_000, 17_500] {
            let r = ScrapeResult {
                price: PriceOutcome::Money(Money::from_cents(cents)),
                failure: None,
                ..ScrapeResult::failed("https://a", FailureKind::Cancelled)
            };
            store.append(&r).await.unwrap();
        }
        store
            .append(&ScrapeResult::failed("https://a", FailureKind::PageUnavailable))
            .await
            .unwrap();

        let lows = scan_all_time_lows(&store).await.unwrap();
        assert_eq!(lows.get("https://a"), Some(Money::from_cents(15_000)));
    }
}
