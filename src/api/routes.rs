use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::{scan_all_time_lows, Anomaly};
use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::error::AppError;
use crate::history::{recent_for_url, HistoryRecord, HistoryStore};
use crate::snapshot::{load_snapshot, SnapshotTable};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct ApiState {
    pub snapshot_path: PathBuf,
    pub history: Arc<dyn HistoryStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/snapshot", get(get_snapshot))
        .route("/lows", get(get_lows))
        .route("/history", get(get_history))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub url: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct LowEntry {
    pub url: String,
    pub all_time_low: String,
}

#[derive(Serialize)]
pub struct LowsResponse {
    pub lows: Vec<LowEntry>,
    pub anomalies: Vec<Anomaly>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_snapshot(State(state): State<ApiState>) -> Result<Json<SnapshotTable>, AppError> {
    let path = state.snapshot_path.clone();
    let table = tokio::task::spawn_blocking(move || load_snapshot(&path))
        .await
        .map_err(|e| AppError::Persistence(format!("snapshot reader task failed: {e}")))??;
    Ok(Json(table))
}

async fn get_lows(State(state): State<ApiState>) -> Result<Json<LowsResponse>, AppError> {
    let lows = scan_all_time_lows(state.history.as_ref()).await?;
    let entries = lows
        .rendered()
        .into_iter()
        .map(|(url, all_time_low)| LowEntry { url, all_time_low })
        .collect();
    Ok(Json(LowsResponse {
        lows: entries,
        anomalies: lows.anomalies,
    }))
}

async fn get_history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::Config("query parameter `url` is required".to_string()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let records = recent_for_url(state.history.as_ref(), url.trim(), limit).await?;
    Ok(Json(records))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::history::CsvHistory;
    use crate::types::{FailureKind, Money, PriceOutcome, ScrapeResult};

    async fn state() -> (tempfile::TempDir, ApiState) {
        let dir = tempfile::tempdir().unwrap();
        let history = CsvHistory::new(dir.path().join("prices.csv"));
        for (url, cents) in [("https://a", 5_000), ("https://a", 4_000), ("https://b", 9_000)] {
            let r = ScrapeResult {
                price: PriceOutcome::Money(Money::from_cents(cents)),
                failure: None,
                ..ScrapeResult::failed(url, FailureKind::Cancelled)
            };
            history.append(&r).await.unwrap();
        }
        let state = ApiState {
            snapshot_path: dir.path().join("snapshot.csv"),
            history: Arc::new(history),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
        };
        (dir, state)
    }

    #[tokio::test]
    async fn lows_are_recomputed_from_history() {
        let (_dir, state) = state().await;
        let Json(body) = get_lows(State(state)).await.unwrap();
        assert_eq!(body.lows.len(), 2);
        assert_eq!(body.lows[0].url, "https://a");
        assert_eq!(body.lows[0].all_time_low, "$40.00");
        assert!(body.anomalies.is_empty());
    }

    #[tokio::test]
    async fn history_returns_newest_first_with_limit() {
        let (_dir, state) = state().await;
        let query = HistoryQuery {
            url: Some("https://a".to_string()),
            limit: Some(1),
        };
        let Json(records) = get_history(State(state), Query(query)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, "$40.00");
    }

    #[tokio::test]
    async fn history_without_url_is_rejected() {
        let (_dir, state) = state().await;
        let query = HistoryQuery {
            url: None,
            limit: None,
        };
        let err = get_history(State(state), Query(query)).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_empty_table() {
        let (_dir, state) = state().await;
        let Json(table) = get_snapshot(State(state)).await.unwrap();
        assert!(table.rows.is_empty());
    }

    #[tokio::test]
    async fn latency_summary_reports_samples() {
        let (_dir, state) = state().await;
        state.latency.record(Duration::from_millis(250));
        let Json(summary) = get_stats_latency(State(state)).await;
        assert_eq!(summary.samples, 1);
    }
}
