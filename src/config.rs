use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Money;

/// History file name used by the first versions of the tracker.
pub const HISTORY_PATH: &str = "prices.csv";
pub const HISTORY_DB_PATH: &str = "history.db";
pub const SNAPSHOT_PATH: &str = "snapshot.csv";

/// Parallel extraction tasks. Each one holds a full page session, so keep it small.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Delay between batches in watch mode (seconds).
pub const WATCH_INTERVAL_SECS: u64 = 1800;

pub const API_PORT: u16 = 3000;

/// Whole-request timeout for the plain HTTP session driver (seconds).
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Per-stage wait budgets for the extractor (milliseconds).
pub mod stage_timeouts {
    /// Stage 1: document.readyState == "complete". Non-fatal.
    pub const READY_MS: u64 = 10_000;
    /// Stage 2: listings region visible. Fatal for the attempt.
    pub const LISTINGS_MS: u64 = 15_000;
    /// Stage 3: title / date / location, each independently.
    pub const DETAIL_MS: u64 = 5_000;
    /// Stage 4: optional overlay dismissal. Kept short, it is usually absent.
    pub const MODAL_MS: u64 = 2_000;
    /// Stage 5: currency pattern inside the listings region.
    pub const PRICE_MS: u64 = 10_000;
    /// Poll interval shared by every stage.
    pub const POLL_MS: u64 = 250;
}

/// Default CSS locators for the listing page.
pub mod selectors {
    pub const LISTINGS: &str = "#listings-container";
    pub const TITLE: &str = "h1";
    pub const DATE: &str = "[data-testid='event-date'], time";
    pub const LOCATION: &str = "[data-testid='venue-name'], [itemprop='location']";
    pub const MODAL_DISMISS: &str = "[aria-label='Close'], button[data-testid='modal-close']";
}

/// Which HistoryStore implementation backs the append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryBackend {
    Csv,
    Sqlite,
}

impl FromStr for HistoryBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(HistoryBackend::Csv),
            "sqlite" => Ok(HistoryBackend::Sqlite),
            other => Err(AppError::Config(format!(
                "HISTORY_BACKEND must be csv or sqlite, got {other:?}"
            ))),
        }
    }
}

/// Which PageSession driver the worker pool opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDriver {
    Http,
    Chrome,
}

impl FromStr for SessionDriver {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(SessionDriver::Http),
            "chrome" | "browser" => Ok(SessionDriver::Chrome),
            other => Err(AppError::Config(format!(
                "SESSION_DRIVER must be http or chrome, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub ready: Duration,
    pub listings: Duration,
    pub detail: Duration,
    pub modal: Duration,
    pub price: Duration,
    pub poll: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        use stage_timeouts::*;
        Self {
            ready: Duration::from_millis(READY_MS),
            listings: Duration::from_millis(LISTINGS_MS),
            detail: Duration::from_millis(DETAIL_MS),
            modal: Duration::from_millis(MODAL_MS),
            price: Duration::from_millis(PRICE_MS),
            poll: Duration::from_millis(POLL_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selectors {
    pub listings: String,
    pub title: String,
    pub date: String,
    pub location: String,
    pub modal_dismiss: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            listings: selectors::LISTINGS.to_string(),
            title: selectors::TITLE.to_string(),
            date: selectors::DATE.to_string(),
            location: selectors::LOCATION.to_string(),
            modal_dismiss: selectors::MODAL_DISMISS.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub history_backend: HistoryBackend,
    /// CSV history file (HISTORY_PATH)
    pub history_path: PathBuf,
    /// SQLite history database (HISTORY_DB_PATH), used when HISTORY_BACKEND=sqlite
    pub history_db_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Line-delimited URL list (URLS_FILE). Optional.
    pub urls_file: Option<PathBuf>,
    pub concurrency: usize,
    /// Cancel a batch still running after this long (RUN_DEADLINE_SECS). Optional.
    pub run_deadline: Option<Duration>,
    pub watch_interval: Duration,
    pub api_port: u16,
    /// Alert when a fresh price is at or below this (TARGET_PRICE, e.g. "150" or "$1,200.00").
    pub target_price: Option<Money>,
    pub session_driver: SessionDriver,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub timeouts: StageTimeouts,
    pub selectors: Selectors,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let concurrency: usize = env_parse("CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(AppError::Config("CONCURRENCY must be at least 1".to_string()));
        }

        let target_price = match env_opt("TARGET_PRICE") {
            Some(raw) => Some(Money::parse(&raw).map_err(|e| {
                AppError::Config(format!("TARGET_PRICE must be a price: {e}"))
            })?),
            None => None,
        };

        let defaults = StageTimeouts::default();
        let timeouts = StageTimeouts {
            ready: env_millis("STAGE_READY_MS", defaults.ready)?,
            listings: env_millis("STAGE_LISTINGS_MS", defaults.listings)?,
            detail: env_millis("STAGE_DETAIL_MS", defaults.detail)?,
            modal: env_millis("STAGE_MODAL_MS", defaults.modal)?,
            price: env_millis("STAGE_PRICE_MS", defaults.price)?,
            poll: nonzero("STAGE_POLL_MS", env_millis("STAGE_POLL_MS", defaults.poll)?)?,
        };

        let selectors = Selectors {
            listings: env_or("SELECTOR_LISTINGS", selectors::LISTINGS),
            title: env_or("SELECTOR_TITLE", selectors::TITLE),
            date: env_or("SELECTOR_DATE", selectors::DATE),
            location: env_or("SELECTOR_LOCATION", selectors::LOCATION),
            modal_dismiss: env_or("SELECTOR_MODAL_DISMISS", selectors::MODAL_DISMISS),
        };

        Ok(Self {
            log_level: env_or("LOG_LEVEL", "info"),
            history_backend: env_or("HISTORY_BACKEND", "csv").parse()?,
            history_path: PathBuf::from(env_or("HISTORY_PATH", HISTORY_PATH)),
            history_db_path: PathBuf::from(env_or("HISTORY_DB_PATH", HISTORY_DB_PATH)),
            snapshot_path: PathBuf::from(env_or("SNAPSHOT_PATH", SNAPSHOT_PATH)),
            urls_file: env_opt("URLS_FILE").map(PathBuf::from),
            concurrency,
            run_deadline: env_opt("RUN_DEADLINE_SECS")
                .map(|s| {
                    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                        AppError::Config("RUN_DEADLINE_SECS must be a whole number".to_string())
                    })
                })
                .transpose()?,
            watch_interval: watch_interval(env_parse("WATCH_INTERVAL_SECS", WATCH_INTERVAL_SECS)?)?,
            api_port: env_parse("API_PORT", API_PORT)
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            target_price,
            session_driver: env_or("SESSION_DRIVER", "http").parse()?,
            chrome_path: env_opt("CHROME_PATH").map(PathBuf::from),
            headless: env_parse("HEADLESS", true)?,
            timeouts,
            selectors,
        })
    }
}

/// Watch interval from a seconds count. Zero is rejected.
pub fn watch_interval(secs: u64) -> Result<Duration> {
    nonzero("WATCH_INTERVAL_SECS", Duration::from_secs(secs))
}

fn nonzero(key: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    match env_opt(key) {
        Some(_) => env_parse::<u64>(key, 0).map(Duration::from_millis),
        None => Ok(default),
    }
}
