use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::history::{HistoryRecord, HistoryStore, ScanStats, HISTORY_COLUMNS};
use crate::types::ScrapeResult;

/// Records handed from the reader thread to the visitor at a time.
const SCAN_BUFFER: usize = 256;

/// History kept as a CSV file with a `Time,Title,Date,Location,Price,URL` header.
/// File I/O runs on the blocking pool.
pub struct CsvHistory {
    path: Arc<PathBuf>,
    /// Serializes appends and keeps scans from seeing a half-written row.
    io_lock: Mutex<()>,
}

impl CsvHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            io_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl HistoryStore for CsvHistory {
    async fn append(&self, result: &ScrapeResult) -> Result<()> {
        let record = HistoryRecord::from(result);
        let (url, price) = (record.url.clone(), record.price.clone());
        let path = Arc::clone(&self.path);

        let _guard = self.io_lock.lock().await;
        tokio::task::spawn_blocking(move || append_record(&path, &record))
            .await
            .map_err(|e| AppError::Persistence(format!("history append task failed: {e}")))??;

        debug!(url = %url, price = %price, "[HISTORY] appended");
        Ok(())
    }

    async fn scan(&self, visit: &mut (dyn FnMut(HistoryRecord) + Send)) -> Result<ScanStats> {
        let _guard = self.io_lock.lock().await;
        let path = Arc::clone(&self.path);
        let (tx, mut rx) = mpsc::channel(SCAN_BUFFER);
        let reader = tokio::task::spawn_blocking(move || read_records(&path, &tx));

        while let Some(record) = rx.recv().await {
            visit(record);
        }
        reader
            .await
            .map_err(|e| AppError::Persistence(format!("history scan task failed: {e}")))?
    }
}

fn append_record(path: &Path, record: &HistoryRecord) -> Result<()> {
    let existing = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    if existing > 0 && !has_fixed_layout(path)? {
        widen_layout(path)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();

    let mut buf = Vec::new();
    if len > 0 && !ends_with_line_break(path)? {
        buf.push(b'\n');
    }
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        if len == 0 {
            writer.write_record(HISTORY_COLUMNS)?;
        }
        writer.write_record(record.as_row())?;
        writer.flush()?;
    }
    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

fn ends_with_line_break(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(matches!(last[0], b'\n' | b'\r'))
}

fn has_fixed_layout(path: &Path) -> Result<bool> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?;
    Ok(headers.len() == HISTORY_COLUMNS.len()
        && headers
            .iter()
            .zip(HISTORY_COLUMNS)
            .all(|(h, c)| h.trim().eq_ignore_ascii_case(c)))
}

/// Rewrite an older file (e.g. `Time,Price`) under the fixed header. Values
/// and row order are kept; columns outside the fixed set refuse the rewrite.
fn widen_layout(path: &Path) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let unknown: Vec<&str> = headers
        .iter()
        .map(str::trim)
        .filter(|h| !h.is_empty() && !HISTORY_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(h)))
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::Persistence(format!(
            "{} has columns {unknown:?} outside {HISTORY_COLUMNS:?}; move it aside to start a new history",
            path.display()
        )));
    }
    let columns = ColumnIndex::new(&headers);

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut rows = 0usize;
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(HISTORY_COLUMNS)?;
        for row in reader.byte_records() {
            let row = csv::StringRecord::from_byte_record_lossy(row?);
            writer.write_record(columns.record(&row).as_row())?;
            rows += 1;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        AppError::Persistence(format!("could not replace {}: {e}", path.display()))
    })?;

    info!(path = %path.display(), rows, "[HISTORY] widened legacy header to the fixed columns");
    Ok(())
}

/// Stream every row to `tx`. Stops early once the receiver is gone.
fn read_records(path: &Path, tx: &mpsc::Sender<HistoryRecord>) -> Result<ScanStats> {
    let mut stats = ScanStats::default();
    if !path.exists() {
        return Ok(stats);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let columns = ColumnIndex::new(reader.headers()?);

    for row in reader.records() {
        match row {
            Ok(row) => {
                stats.records += 1;
                if tx.blocking_send(columns.record(&row)).is_err() {
                    break;
                }
            }
            Err(e) => {
                stats.skipped += 1;
                warn!(path = %path.display(), error = %e, "[HISTORY] skipping unreadable row");
            }
        }
    }
    Ok(stats)
}

/// Header name → position, so older files with fewer or reordered columns still read.
struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(headers: &csv::StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
            .collect();
        Self { positions }
    }

    fn field(&self, row: &csv::StringRecord, name: &str) -> String {
        self.positions
            .get(&name.to_ascii_lowercase())
            .and_then(|&i| row.get(i))
            .unwrap_or("")
            .trim()
            .to_string()
    }

    fn record(&self, row: &csv::StringRecord) -> HistoryRecord {
        HistoryRecord {
            time: self.field(row, "Time"),
            title: self.field(row, "Title"),
            date: self.field(row, "Date"),
            location: self.field(row, "Location"),
            price: self.field(row, "Price"),
            url: self.field(row, "URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregate::scan_all_time_lows;
    use crate::types::{FailureKind, Money, PriceOutcome};

    fn result(url: &str, price: PriceOutcome) -> ScrapeResult {
        ScrapeResult {
            price,
            title: "Hamilton, the \"Musical\"".to_string(),
            ..ScrapeResult::failed(url, FailureKind::Cancelled)
        }
    }

    async fn collect(store: &CsvHistory) -> Vec<HistoryRecord> {
        let mut out = Vec::new();
        store.scan(&mut |r| out.push(r)).await.unwrap();
        out
    }

    #[tokio::test]
    async fn first_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let store = CsvHistory::new(&path);

        store
            .append(&result("https://a", PriceOutcome::Money(Money::from_cents(123_456))))
            .await
            .unwrap();
        store.append(&result("https://b", PriceOutcome::SoldOut)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Time,Title,Date,Location,Price,URL").count(), 1);
        assert!(text.contains("\"$1,234.56\""));

        let records = collect(&store).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://a");
        assert_eq!(records[0].price, "$1,234.56");
        assert_eq!(records[0].title, "Hamilton, the \"Musical\"");
        assert_eq!(records[1].price, "Sold Out");
    }

    #[tokio::test]
    async fn scan_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistory::new(dir.path().join("nope.csv"));
        let mut seen = 0;
        let stats = store.scan(&mut |_| seen += 1).await.unwrap();
        assert_eq!(stats, ScanStats::default());
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn scan_is_restartable_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistory::new(dir.path().join("h.csv"));
        for i in 0..5 {
            store
                .append(&result(&format!("https://e/{i}"), PriceOutcome::Unknown))
                .await
                .unwrap();
        }
        let first: Vec<_> = collect(&store).await.into_iter().map(|r| r.url).collect();
        let second: Vec<_> = collect(&store).await.into_iter().map(|r| r.url).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "https://e/0");
        assert_eq!(first[4], "https://e/4");
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CsvHistory::new(dir.path().join("h.csv")));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append(&result(&format!("https://e/{i}"), PriceOutcome::Error))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let records = collect(&store).await;
        assert_eq!(records.len(), 32);
        assert!(records.iter().all(|r| r.price == "Error" && r.url.starts_with("https://e/")));
    }

    #[tokio::test]
    async fn legacy_two_column_file_still_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(&path, "Time,Price\n2024-01-01 10:00:00,$80\n").unwrap();
        let store = CsvHistory::new(&path);
        let records = collect(&store).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, "$80");
        assert_eq!(records[0].url, "");
    }

    #[tokio::test]
    async fn append_to_legacy_file_widens_header_and_counts_toward_low() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        std::fs::write(&path, "Time,Price\n2024-01-01 10:00:00,$80\n").unwrap();
        let store = CsvHistory::new(&path);

        store
            .append(&result("https://a", PriceOutcome::Money(Money::from_cents(5_000))))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time,Title,Date,Location,Price,URL\n"));
        let records = collect(&store).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, "2024-01-01 10:00:00");
        assert_eq!(records[0].price, "$80");
        assert_eq!(records[1].url, "https://a");

        let lows = scan_all_time_lows(&store).await.unwrap();
        assert_eq!(lows.get("https://a"), Some(Money::from_cents(5_000)));
        assert!(lows.anomalies.is_empty());
    }

    #[tokio::test]
    async fn legacy_file_with_unknown_columns_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let original = "Time,Price,Notes\n2024-01-01 10:00:00,$80,keep me\n";
        std::fs::write(&path, original).unwrap();
        let store = CsvHistory::new(&path);

        let err = store
            .append(&result("https://a", PriceOutcome::SoldOut))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn append_after_missing_final_newline_starts_a_new_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        std::fs::write(
            &path,
            "Time,Title,Date,Location,Price,URL\n2026-01-01 10:00:00,Wicked,N/A,N/A,$80.00,https://b",
        )
        .unwrap();
        let store = CsvHistory::new(&path);

        store
            .append(&result("https://a", PriceOutcome::Money(Money::from_cents(5_000))))
            .await
            .unwrap();

        let records = collect(&store).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://b");
        assert_eq!(records[0].price, "$80.00");
        assert_eq!(records[1].url, "https://a");
        assert_eq!(records[1].price, "$50.00");
    }
}
