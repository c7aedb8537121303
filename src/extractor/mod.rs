//! Staged-wait extraction of one listing page.
//!
//! Stages run strictly in order, each with its own budget:
//! ready state → listings visible → detail fields → overlay → price.
//! Only the listings stage can end the attempt early.

pub mod price;
pub mod wait;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::{Selectors, StageTimeouts};
use crate::session::{PageSession, SessionError};
use crate::types::{FailureKind, Money, PriceOutcome, ScrapeResult, NOT_AVAILABLE};

use self::price::{first_price, is_sold_out};
use self::wait::{wait_until, Wait};

/// Marker for an attempt interrupted by the batch cancel signal.
struct Cancelled;

pub struct Extractor {
    timeouts: StageTimeouts,
    selectors: Selectors,
}

impl Extractor {
    pub fn new(timeouts: StageTimeouts, selectors: Selectors) -> Self {
        Self { timeouts, selectors }
    }

    /// Run every stage against `session`. Always yields exactly one result.
    pub async fn extract(
        &self,
        session: &dyn PageSession,
        url: &str,
        cancel: &CancelSignal,
    ) -> ScrapeResult {
        let timestamp = Local::now();

        let navigated = tokio::select! {
            r = session.navigate(url) => r,
            _ = cancel.cancelled() => return ScrapeResult::failed(url, FailureKind::Cancelled),
        };
        if let Err(e) = navigated {
            warn!(url = %url, error = %e, "[STAGE] navigation failed");
            return ScrapeResult::failed(url, FailureKind::Session(e.to_string()));
        }

        // Stage 1: document ready. Never fatal.
        match self.wait_ready(session, cancel).await {
            Wait::Ready(()) => debug!(url = %url, "[STAGE] ready"),
            Wait::TimedOut => info!(url = %url, stage = "ready", "[STAGE] timed out, continuing"),
            Wait::Failed(e) => {
                info!(url = %url, stage = "ready", error = %e, "[STAGE] ready state unreadable, continuing")
            }
            Wait::Cancelled => return ScrapeResult::failed(url, FailureKind::Cancelled),
        }

        // Stage 2: listings region. Gate for everything after it.
        match self.wait_listings(session, cancel).await {
            Wait::Ready(()) => debug!(url = %url, "[STAGE] listings visible"),
            Wait::TimedOut => {
                warn!(
                    url = %url,
                    stage = "listings",
                    "[STAGE] listings never became visible within {:?}, page unavailable",
                    self.timeouts.listings
                );
                return ScrapeResult::unavailable(url);
            }
            Wait::Failed(e) => {
                warn!(url = %url, stage = "listings", error = %e, "[STAGE] session failed");
                return ScrapeResult::failed(url, FailureKind::Session(e.to_string()));
            }
            Wait::Cancelled => return ScrapeResult::failed(url, FailureKind::Cancelled),
        }

        // Stage 3: detail fields, independent of each other.
        let (title, event_date, location) = tokio::join!(
            self.detail_field(session, url, "title", &self.selectors.title, cancel),
            self.detail_field(session, url, "date", &self.selectors.date, cancel),
            self.detail_field(session, url, "location", &self.selectors.location, cancel),
        );
        if cancel.is_cancelled() {
            return ScrapeResult::failed(url, FailureKind::Cancelled);
        }

        // Stage 4: overlay that can cover the price list. Usually absent.
        self.dismiss_overlay(session, url, cancel).await;

        // Stage 5: price.
        let price = match self.resolve_price(session, url, cancel).await {
            Ok(p) => p,
            Err(Cancelled) => return ScrapeResult::failed(url, FailureKind::Cancelled),
        };

        info!(url = %url, price = %price, title = %title, "[STAGE] extraction complete");

        ScrapeResult {
            url: url.to_string(),
            timestamp,
            title,
            event_date,
            location,
            price,
            failure: None,
        }
    }

    async fn wait_ready(&self, session: &dyn PageSession, cancel: &CancelSignal) -> Wait<()> {
        wait_until(self.timeouts.ready, self.timeouts.poll, cancel, move || async move {
            session
                .ready_state()
                .await
                .map(|state| (state.as_deref() == Some("complete")).then_some(()))
        })
        .await
    }

    async fn wait_listings(&self, session: &dyn PageSession, cancel: &CancelSignal) -> Wait<()> {
        let selector = self.selectors.listings.as_str();
        wait_until(self.timeouts.listings, self.timeouts.poll, cancel, move || async move {
            session.is_visible(selector).await.map(|shown| shown.then_some(()))
        })
        .await
    }

    /// Text of one detail field, or "N/A" on any timeout or failure.
    async fn detail_field(
        &self,
        session: &dyn PageSession,
        url: &str,
        field: &'static str,
        selector: &str,
        cancel: &CancelSignal,
    ) -> String {
        match wait_until(self.timeouts.detail, self.timeouts.poll, cancel, move || {
            session.text_of(selector)
        })
        .await
        {
            Wait::Ready(text) => text,
            Wait::TimedOut => {
                info!(url = %url, stage = field, "[STAGE] field not found, defaulting to N/A");
                NOT_AVAILABLE.to_string()
            }
            Wait::Failed(e) => {
                info!(url = %url, stage = field, error = %e, "[STAGE] field unreadable, defaulting to N/A");
                NOT_AVAILABLE.to_string()
            }
            Wait::Cancelled => NOT_AVAILABLE.to_string(),
        }
    }

    async fn dismiss_overlay(&self, session: &dyn PageSession, url: &str, cancel: &CancelSignal) {
        let selector = self.selectors.modal_dismiss.as_str();
        match wait_until(self.timeouts.modal, self.timeouts.poll, cancel, move || async move {
            session.click(selector).await.map(|clicked| clicked.then_some(()))
        })
        .await
        {
            Wait::Ready(()) => debug!(url = %url, "[STAGE] overlay dismissed"),
            Wait::Failed(e) => debug!(url = %url, error = %e, "[STAGE] overlay click failed"),
            Wait::TimedOut | Wait::Cancelled => {}
        }
    }

    async fn resolve_price(
        &self,
        session: &dyn PageSession,
        url: &str,
        cancel: &CancelSignal,
    ) -> Result<PriceOutcome, Cancelled> {
        let region = self.selectors.listings.as_str();
        let waited = wait_until(self.timeouts.price, self.timeouts.poll, cancel, move || async move {
            let text = match session.text_of(region).await {
                Ok(Some(text)) => text,
                other => return other.map(|_| None),
            };
            let found: Result<Option<Money>, SessionError> = match first_price(&text) {
                Some(Ok(money)) => Ok(Some(money)),
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "[STAGE] price matched but did not parse");
                    Ok(None)
                }
                None => Ok(None),
            };
            found
        })
        .await;

        match waited {
            Wait::Ready(money) => return Ok(PriceOutcome::Money(money)),
            Wait::Cancelled => return Err(Cancelled),
            Wait::TimedOut => debug!(url = %url, "[STAGE] no price within budget, reading region once more"),
            Wait::Failed(e) => info!(url = %url, error = %e, "[STAGE] price region unreadable"),
        }

        let fallback = tokio::select! {
            r = session.text_of(region) => r,
            _ = cancel.cancelled() => return Err(Cancelled),
        };
        match fallback {
            Ok(Some(text)) if is_sold_out(&text) => Ok(PriceOutcome::SoldOut),
            Ok(_) => Ok(PriceOutcome::Unknown),
            Err(e) => {
                info!(url = %url, error = %e, "[STAGE] fallback read failed");
                Ok(PriceOutcome::Unknown)
            }
        }
    }
}
