//! Bounded fan-out of one extraction task per URL.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::api::latency::LatencyStats;
use crate::cancel::CancelSignal;
use crate::extractor::Extractor;
use crate::history::HistoryStore;
use crate::session::SessionFactory;
use crate::types::{FailureKind, ScrapeResult};

/// A history append that failed. The result itself is still returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceFailure {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Exactly one result per submitted URL.
    pub results: HashMap<String, ScrapeResult>,
    pub persistence_failures: Vec<PersistenceFailure>,
}

pub struct WorkerPool {
    factory: Arc<dyn SessionFactory>,
    extractor: Arc<Extractor>,
    history: Arc<dyn HistoryStore>,
    latency: Arc<LatencyStats>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        extractor: Arc<Extractor>,
        history: Arc<dyn HistoryStore>,
        latency: Arc<LatencyStats>,
        concurrency: usize,
    ) -> Self {
        Self {
            factory,
            extractor,
            history,
            latency,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every URL with at most `concurrency` sessions open at once.
    /// Duplicate URLs are collapsed. Results come back keyed by URL.
    pub async fn run(&self, urls: &[String], cancel: &CancelSignal) -> BatchOutcome {
        let mut unique: Vec<&String> = Vec::with_capacity(urls.len());
        for url in urls {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let results: Arc<DashMap<String, ScrapeResult>> = Arc::new(DashMap::new());
        let failures: Arc<DashMap<String, String>> = Arc::new(DashMap::new());

        info!(
            urls = unique.len(),
            concurrency = self.concurrency,
            "[POOL] starting {} tasks, {} at a time",
            unique.len(),
            self.concurrency,
        );

        let mut handles = Vec::with_capacity(unique.len());
        for url in &unique {
            let task = UrlTask {
                url: (*url).clone(),
                factory: Arc::clone(&self.factory),
                extractor: Arc::clone(&self.extractor),
                history: Arc::clone(&self.history),
                latency: Arc::clone(&self.latency),
                cancel: cancel.clone(),
                results: Arc::clone(&results),
                failures: Arc::clone(&failures),
            };
            let semaphore = Arc::clone(&semaphore);
            let span = tracing::info_span!("scrape", url = %url);
            handles.push(tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    task.run().await;
                }
                .instrument(span),
            ));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("[POOL] task join error: {e}");
            }
        }

        let mut outcome = BatchOutcome::default();
        for url in unique {
            let result = match results.remove(url) {
                Some((_, r)) => r,
                None => {
                    warn!(url = %url, "[POOL] no result recorded, synthesizing Error");
                    let r = ScrapeResult::failed(url.as_str(), FailureKind::Session("task aborted".to_string()));
                    if let Err(message) = self.append_backfill(&r).await {
                        warn!(url = %url, error = %message, "[HISTORY] append failed");
                        failures.insert(url.clone(), message);
                    }
                    r
                }
            };
            outcome.results.insert(url.clone(), result);
        }
        let mut persistence_failures: Vec<PersistenceFailure> = failures
            .iter()
            .map(|e| PersistenceFailure {
                url: e.key().clone(),
                message: e.value().clone(),
            })
            .collect();
        persistence_failures.sort_by(|a, b| a.url.cmp(&b.url));
        outcome.persistence_failures = persistence_failures;

        info!(
            results = outcome.results.len(),
            persistence_failures = outcome.persistence_failures.len(),
            "[POOL] batch finished",
        );
        outcome
    }
}

impl WorkerPool {
    /// History append for a result the task never got to record itself.
    async fn append_backfill(&self, result: &ScrapeResult) -> std::result::Result<(), String> {
        match AssertUnwindSafe(self.history.append(result)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("panic: {}", panic_message(panic.as_ref()))),
        }
    }
}

/// Everything one spawned task needs, owned.
struct UrlTask {
    url: String,
    factory: Arc<dyn SessionFactory>,
    extractor: Arc<Extractor>,
    history: Arc<dyn HistoryStore>,
    latency: Arc<LatencyStats>,
    cancel: CancelSignal,
    results: Arc<DashMap<String, ScrapeResult>>,
    failures: Arc<DashMap<String, String>>,
}

impl UrlTask {
    async fn run(self) {
        let started = Instant::now();
        let result = self.scrape().await;
        self.latency.record(started.elapsed());

        debug!(url = %self.url, price = %result.price, "[POOL] attempt finished");
        if let Err(e) = self.history.append(&result).await {
            warn!(url = %self.url, error = %e, "[HISTORY] append failed");
            self.failures.insert(self.url.clone(), e.to_string());
        }
        self.results.insert(self.url.clone(), result);
    }

    /// Open a session, extract, and always close the session again.
    async fn scrape(&self) -> ScrapeResult {
        if self.cancel.is_cancelled() {
            return ScrapeResult::failed(self.url.as_str(), FailureKind::Cancelled);
        }

        let session = match self.factory.open().await {
            Ok(s) => s,
            Err(e) => {
                warn!(url = %self.url, error = %e, "[POOL] could not open session");
                return ScrapeResult::failed(self.url.as_str(), FailureKind::Session(e.to_string()));
            }
        };

        let attempt = AssertUnwindSafe(self.extractor.extract(session.as_ref(), &self.url, &self.cancel))
            .catch_unwind()
            .await;

        let result = match attempt {
            Ok(r) => r,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(url = %self.url, "[POOL] extraction panicked: {msg}");
                ScrapeResult::failed(self.url.as_str(), FailureKind::Session(format!("panic: {msg}")))
            }
        };

        if let Err(e) = session.close().await {
            warn!(url = %self.url, error = %e, "[POOL] session close failed");
        }
        result
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
