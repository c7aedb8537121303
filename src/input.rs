use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::snapshot::SnapshotTable;

/// Parse a line-delimited URL list. Blank lines and `#` comments are ignored.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let urls = parse_url_list(&text);
    debug!(path = %path.display(), count = urls.len(), "URL list loaded");
    Ok(urls)
}

/// Everything to scrape this batch: direct arguments first, then the URL
/// file, then URLs already tracked in the snapshot. First occurrence wins.
pub fn collect_urls(direct: &[String], listed: &[String], snapshot: &SnapshotTable) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let candidates = direct
        .iter()
        .map(String::as_str)
        .chain(listed.iter().map(String::as_str))
        .chain(snapshot.urls());
    for url in candidates {
        let url = url.trim();
        if url.is_empty() || out.iter().any(|u| u == url) {
            continue;
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            warn!(url = %url, "URL has no http(s) scheme, scraping anyway");
        }
        out.push(url.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::snapshot::SnapshotRow;

    fn snapshot(urls: &[&str]) -> SnapshotTable {
        SnapshotTable {
            extra_columns: vec![],
            rows: urls
                .iter()
                .map(|u| SnapshotRow {
                    url: u.to_string(),
                    last_updated: String::new(),
                    title: String::new(),
                    event_date: String::new(),
                    location: String::new(),
                    price: String::new(),
                    all_time_low: String::new(),
                    extra: BTreeMap::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn list_skips_blanks_and_comments() {
        let urls = parse_url_list("# tracked events\nhttps://a\n\n   \n  https://b  \n#https://c\n");
        assert_eq!(urls, vec!["https://a", "https://b"]);
    }

    #[test]
    fn sources_are_merged_in_order_without_duplicates() {
        let direct = vec!["https://b".to_string(), " ".to_string()];
        let listed = vec!["https://a".to_string(), "https://b".to_string()];
        let urls = collect_urls(&direct, &listed, &snapshot(&["https://c", "", "https://a"]));
        assert_eq!(urls, vec!["https://b", "https://a", "https://c"]);
    }

    #[test]
    fn url_file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "https://x\nhttps://y\n").unwrap();
        assert_eq!(read_url_file(&path).unwrap(), vec!["https://x", "https://y"]);
    }
}
