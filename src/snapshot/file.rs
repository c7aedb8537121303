use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::snapshot::{SnapshotRow, SnapshotTable, SNAPSHOT_COLUMNS};
use crate::types::NOT_AVAILABLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Core {
    Time,
    Title,
    Date,
    Location,
    Price,
    AllTimeLow,
    Url,
}

fn core_column(header: &str) -> Option<Core> {
    let key: String = header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match key.as_str() {
        "time" | "lastupdated" => Some(Core::Time),
        "title" => Some(Core::Title),
        "date" | "eventdate" => Some(Core::Date),
        "location" | "venue" => Some(Core::Location),
        "price" => Some(Core::Price),
        "alltimelow" => Some(Core::AllTimeLow),
        "url" => Some(Core::Url),
        _ => None,
    }
}

/// Read the snapshot file. A missing file is an empty table.
pub fn load_snapshot(path: &Path) -> Result<SnapshotTable> {
    if !path.exists() {
        return Ok(SnapshotTable::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let layout: Vec<Option<Core>> = headers.iter().map(|h| core_column(h)).collect();
    let mut extra_columns = Vec::new();
    for (name, core) in headers.iter().zip(&layout) {
        if core.is_none() && !name.is_empty() && !extra_columns.contains(name) {
            extra_columns.push(name.clone());
        }
    }

    let mut table = SnapshotTable {
        extra_columns,
        rows: Vec::new(),
    };
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), row = line + 1, error = %e, "[MERGE] skipping unreadable snapshot row");
                continue;
            }
        };

        let mut row = SnapshotRow {
            url: String::new(),
            last_updated: String::new(),
            title: NOT_AVAILABLE.to_string(),
            event_date: NOT_AVAILABLE.to_string(),
            location: NOT_AVAILABLE.to_string(),
            price: NOT_AVAILABLE.to_string(),
            all_time_low: NOT_AVAILABLE.to_string(),
            extra: BTreeMap::new(),
        };
        for (i, value) in record.iter().enumerate() {
            let value = value.trim().to_string();
            match layout.get(i).copied().flatten() {
                Some(Core::Time) => row.last_updated = value,
                Some(Core::Title) => row.title = value,
                Some(Core::Date) => row.event_date = value,
                Some(Core::Location) => row.location = value,
                Some(Core::Price) => row.price = value,
                Some(Core::AllTimeLow) => row.all_time_low = value,
                Some(Core::Url) => row.url = value,
                None => {
                    if let Some(name) = headers.get(i).filter(|n| !n.is_empty()) {
                        row.extra.entry(name.clone()).or_insert(value);
                    }
                }
            }
        }
        table.rows.push(row);
    }
    Ok(table)
}

/// Replace the snapshot file with `table`. Written to a sibling temp file
/// first, then renamed over the old file.
pub fn save_snapshot(path: &Path, table: &SnapshotTable) -> Result<()> {
    let tmp = temp_path(path)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        let header: Vec<&str> = SNAPSHOT_COLUMNS
            .iter()
            .copied()
            .chain(table.extra_columns.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;

        for row in &table.rows {
            let mut fields: Vec<&str> = vec![
                row.last_updated.as_str(),
                row.title.as_str(),
                row.event_date.as_str(),
                row.location.as_str(),
                row.price.as_str(),
                row.all_time_low.as_str(),
                row.url.as_str(),
            ];
            fields.extend(table.extra_columns.iter().map(|c| row.extra(c)));
            writer.write_record(&fields)?;
        }
        writer.flush()?;
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        AppError::Persistence(format!("could not replace {}: {e}", path.display()))
    })?;
    info!(path = %path.display(), rows = table.rows.len(), "[MERGE] snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| AppError::Persistence(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = load_snapshot(&dir.path().join("snapshot.csv")).unwrap();
        assert!(table.rows.is_empty());
        assert!(table.extra_columns.is_empty());
    }

    #[test]
    fn extras_and_column_order_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.csv");
        fs::write(
            &path,
            "URL,Notes,Price,Time,Title,Date,Location,All Time Low,Seat\n\
             https://a,watch this,\"$1,200.00\",2026-01-01 09:00:00,Hamilton,Nov 7,NYC,$900.00,B12\n\
             https://b,,Sold Out,2026-01-01 09:00:00,Wicked,N/A,N/A,N/A,\n",
        )
        .unwrap();

        let table = load_snapshot(&path).unwrap();
        assert_eq!(table.extra_columns, vec!["Notes", "Seat"]);
        assert_eq!(table.rows.len(), 2);
        let a = table.row("https://a").unwrap();
        assert_eq!(a.price, "$1,200.00");
        assert_eq!(a.all_time_low, "$900.00");
        assert_eq!(a.extra("Notes"), "watch this");
        assert_eq!(a.extra("Seat"), "B12");

        save_snapshot(&path, &table).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time,Title,Date,Location,Price,AllTimeLow,URL,Notes,Seat\n"));
        assert!(!dir.path().join("snapshot.csv.tmp").exists());

        let reread = load_snapshot(&path).unwrap();
        assert_eq!(reread, table);
    }

    #[test]
    fn short_rows_default_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.csv");
        fs::write(&path, "URL,Price\nhttps://a\n").unwrap();
        let table = load_snapshot(&path).unwrap();
        let a = table.row("https://a").unwrap();
        assert_eq!(a.price, NOT_AVAILABLE);
        assert_eq!(a.all_time_low, NOT_AVAILABLE);
    }
}
