//! One batch end to end, and the repeating watch loop around it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn, Instrument};

use crate::aggregate::scan_all_time_lows;
use crate::api::health::HealthState;
use crate::cancel::{cancel_pair, CancelSignal};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::history::HistoryStore;
use crate::input::{collect_urls, read_url_file};
use crate::pool::WorkerPool;
use crate::snapshot::{load_snapshot, merge, save_snapshot, MergeStats};
use crate::types::{FailureKind, Money, PriceOutcome, ScrapeResult};

/// Run-scoped state handed to every step of a batch.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: u64,
    pub started_at: DateTime<Local>,
    pub started: Instant,
    pub cancel: CancelSignal,
}

impl RunContext {
    pub fn new(run_id: u64, cancel: CancelSignal) -> Self {
        Self {
            run_id,
            started_at: Local::now(),
            started: Instant::now(),
            cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceAlert {
    pub url: String,
    pub title: String,
    pub price: String,
    pub target: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub run_id: u64,
    pub urls: usize,
    pub money: usize,
    pub sold_out: usize,
    pub unknown: usize,
    pub errors: usize,
    pub page_unavailable: usize,
    pub cancelled: usize,
    pub alerts: Vec<PriceAlert>,
    pub persistence_warnings: Vec<String>,
    pub history_anomalies: usize,
    pub rows_updated: usize,
    pub rows_inserted: usize,
    pub duration_ms: u64,
}

impl RunReport {
    fn count(&mut self, results: &HashMap<String, ScrapeResult>) {
        self.urls = results.len();
        for r in results.values() {
            match r.price {
                PriceOutcome::Money(_) => self.money += 1,
                PriceOutcome::SoldOut => self.sold_out += 1,
                PriceOutcome::Unknown => self.unknown += 1,
                PriceOutcome::Error => self.errors += 1,
            }
            match r.failure {
                Some(FailureKind::PageUnavailable) => self.page_unavailable += 1,
                Some(FailureKind::Cancelled) => self.cancelled += 1,
                _ => {}
            }
        }
    }

    fn apply_merge(&mut self, stats: &MergeStats) {
        self.rows_updated = stats.updated;
        self.rows_inserted = stats.inserted;
    }

    pub fn log(&self) {
        info!(
            run_id = self.run_id,
            urls = self.urls,
            money = self.money,
            sold_out = self.sold_out,
            unknown = self.unknown,
            errors = self.errors,
            alerts = self.alerts.len(),
            duration_ms = self.duration_ms,
            "Batch {} complete: {} URLs | {} priced | {} sold out | {} unknown | {} errors | {} alerts | {:.1}s",
            self.run_id,
            self.urls,
            self.money,
            self.sold_out,
            self.unknown,
            self.errors,
            self.alerts.len(),
            self.duration_ms as f64 / 1000.0,
        );
        for w in &self.persistence_warnings {
            warn!(run_id = self.run_id, "[HISTORY] {w}");
        }
    }
}

/// Every fresh priced result at or below `target`.
pub fn price_alerts<'a>(
    results: impl IntoIterator<Item = &'a ScrapeResult>,
    target: Money,
) -> Vec<PriceAlert> {
    let mut alerts: Vec<PriceAlert> = results
        .into_iter()
        .filter_map(|r| {
            let price = r.price.money()?;
            (price <= target).then(|| PriceAlert {
                url: r.url.clone(),
                title: r.title.clone(),
                price: price.to_string(),
                target: target.to_string(),
            })
        })
        .collect();
    alerts.sort_by(|a, b| a.url.cmp(&b.url));
    alerts
}

/// Batch-level settings, split out of [`Config`].
#[derive(Debug, Clone, Default)]
pub struct TrackerSettings {
    pub snapshot_path: PathBuf,
    pub urls_file: Option<PathBuf>,
    /// URLs given on the command line.
    pub direct_urls: Vec<String>,
    pub target_price: Option<Money>,
    pub run_deadline: Option<Duration>,
}

impl TrackerSettings {
    pub fn from_config(cfg: &Config, direct_urls: Vec<String>) -> Self {
        Self {
            snapshot_path: cfg.snapshot_path.clone(),
            urls_file: cfg.urls_file.clone(),
            direct_urls,
            target_price: cfg.target_price,
            run_deadline: cfg.run_deadline,
        }
    }
}

pub struct Tracker {
    pool: WorkerPool,
    history: Arc<dyn HistoryStore>,
    settings: TrackerSettings,
    health: Arc<HealthState>,
    next_run_id: AtomicU64,
}

impl Tracker {
    pub fn new(
        pool: WorkerPool,
        history: Arc<dyn HistoryStore>,
        settings: TrackerSettings,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            pool,
            history,
            settings,
            health,
            next_run_id: AtomicU64::new(0),
        }
    }

    /// One batch with its own cancel signal. The signal fires on `shutdown`
    /// or when the configured deadline passes.
    pub async fn run(&self, shutdown: &CancelSignal) -> Result<RunReport> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (handle, signal) = cancel_pair();
        let ctx = RunContext::new(run_id, signal);

        let mut timers = Vec::new();
        if let Some(deadline) = self.settings.run_deadline {
            timers.push(handle.cancel_after(deadline));
        }
        {
            let handle = handle.clone();
            let shutdown = shutdown.clone();
            timers.push(tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.cancel();
            }));
        }

        self.health.batch_started();
        let result = self
            .run_batch(&ctx)
            .instrument(tracing::info_span!("batch", run_id))
            .await;
        for t in timers {
            t.abort();
        }

        match &result {
            Ok(report) => self.health.batch_finished(
                report.urls,
                report.persistence_warnings.len(),
                Local::now().timestamp(),
            ),
            Err(e) => self
                .health
                .batch_failed(matches!(e, AppError::Persistence(_))),
        }
        result
    }

    /// Collect URLs, scrape, then fold the batch into the snapshot.
    pub async fn run_batch(&self, ctx: &RunContext) -> Result<RunReport> {
        info!(run_id = ctx.run_id, started_at = %ctx.started_at.format(crate::types::TIME_FORMAT), "Batch starting");
        let mut report = RunReport {
            run_id: ctx.run_id,
            ..RunReport::default()
        };

        let snapshot_path = self.settings.snapshot_path.clone();
        let snapshot = {
            let path = snapshot_path.clone();
            blocking("snapshot read", move || load_snapshot(&path))
                .await
                .map_err(|e| {
                    AppError::Persistence(format!("reading snapshot {}: {e}", snapshot_path.display()))
                })?
        };
        let listed = match self.settings.urls_file.clone() {
            Some(path) => blocking("URL list read", {
                let path = path.clone();
                move || read_url_file(&path)
            })
            .await
            .map_err(|e| AppError::Config(format!("reading URL list {}: {e}", path.display())))?,
            None => Vec::new(),
        };

        let urls = collect_urls(&self.settings.direct_urls, &listed, &snapshot);
        if urls.is_empty() {
            warn!("No URLs to track: pass them as arguments, set URLS_FILE, or add rows to the snapshot");
            report.duration_ms = ctx.started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let outcome = self.pool.run(&urls, &ctx.cancel).await;
        report.count(&outcome.results);
        report.persistence_warnings = outcome
            .persistence_failures
            .iter()
            .map(|f| format!("history append failed for {}: {}", f.url, f.message))
            .collect();

        let lows = scan_all_time_lows(self.history.as_ref())
            .await
            .map_err(|e| AppError::Persistence(format!("scanning history: {e}")))?;
        report.history_anomalies = lows.anomalies.len();

        let (merged, stats) = merge(&snapshot, outcome.results.values(), &lows);
        report.apply_merge(&stats);
        {
            let path = snapshot_path.clone();
            blocking("snapshot write", move || save_snapshot(&path, &merged))
                .await
                .map_err(|e| {
                    AppError::Persistence(format!("writing snapshot {}: {e}", snapshot_path.display()))
                })?;
        }

        if let Some(target) = self.settings.target_price {
            report.alerts = price_alerts(outcome.results.values(), target);
            for a in &report.alerts {
                warn!(
                    url = %a.url,
                    price = %a.price,
                    target = %a.target,
                    "[ALERT] {} is at {} (target {})",
                    a.title,
                    a.price,
                    a.target,
                );
            }
        }

        report.duration_ms = ctx.started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Repeat batches every `every`, starting now, until `shutdown` fires.
    /// A failed batch is logged and the loop carries on.
    pub async fn watch(&self, every: Duration, shutdown: &CancelSignal) {
        if every.is_zero() {
            error!("Watch interval must be greater than zero, not starting");
            return;
        }
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            match self.run(shutdown).await {
                Ok(report) => report.log(),
                Err(e) => error!("Batch failed: {e}"),
            }
            if shutdown.is_cancelled() {
                break;
            }
        }
        info!("Watch loop stopped");
    }
}

/// Run file work on the blocking pool.
async fn blocking<T, F>(what: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Persistence(format!("{what} task failed: {e}")))?
}
