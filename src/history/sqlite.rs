use std::path::Path;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;
use crate::history::{HistoryRecord, HistoryStore, ScanStats};
use crate::types::ScrapeResult;

/// History kept in a SQLite table, one row per attempt, ordered by rowid.
pub struct SqliteHistory {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    recorded_at: String,
    title: String,
    event_date: String,
    location: String,
    price: String,
    url: String,
}

impl From<HistoryRow> for HistoryRecord {
    fn from(row: HistoryRow) -> Self {
        Self {
            time: row.recorded_at,
            title: row.title,
            date: row.event_date,
            location: row.location,
            price: row.price,
            url: row.url,
        }
    }
}

impl SqliteHistory {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("[HISTORY] SQLite history ready at {}", path.display());
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection, since each SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, result: &ScrapeResult) -> Result<()> {
        let record = HistoryRecord::from(result);
        let failure = result.failure.as_ref().map(|f| f.to_string());

        sqlx::query(
            r#"
            INSERT INTO history (recorded_at, title, event_date, location, price, url, failure)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.time)
        .bind(&record.title)
        .bind(&record.date)
        .bind(&record.location)
        .bind(&record.price)
        .bind(&record.url)
        .bind(failure)
        .execute(&self.pool)
        .await?;

        debug!(url = %record.url, price = %record.price, "[HISTORY] appended");
        Ok(())
    }

    async fn scan(&self, visit: &mut (dyn FnMut(HistoryRecord) + Send)) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT recorded_at, title, event_date, location, price, url FROM history ORDER BY id",
        )
        .fetch(&self.pool);

        while let Some(row) = rows.try_next().await? {
            stats.records += 1;
            visit(row.into());
        }
        Ok(stats)
    }
}
