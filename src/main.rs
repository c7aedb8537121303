mod aggregate;
mod api;
mod cancel;
mod config;
mod error;
mod extractor;
mod history;
mod input;
mod pool;
mod run;
mod session;
mod snapshot;
mod types;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::cancel::{cancel_pair, CancelHandle, CancelSignal};
use crate::config::{Config, HistoryBackend, SessionDriver, HTTP_REQUEST_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::extractor::Extractor;
use crate::history::{CsvHistory, HistoryStore, SqliteHistory};
use crate::pool::WorkerPool;
use crate::run::{Tracker, TrackerSettings};
use crate::session::{HttpSessionFactory, SessionFactory};

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Event ticket price tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every tracked URL once and rewrite the snapshot
    Run {
        /// Listing URLs, in addition to URLS_FILE and the snapshot
        urls: Vec<String>,
    },

    /// Scrape on a fixed interval and serve the status API
    Watch {
        urls: Vec<String>,
        /// Seconds between batches (overrides WATCH_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
        /// Do not start the status API
        #[arg(long)]
        no_api: bool,
    },

    /// Serve the status API over the existing history and snapshot
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cli, cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    let (shutdown_handle, shutdown) = cancel_pair();
    spawn_ctrl_c(shutdown_handle);

    let history = open_history(&cfg).await?;
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let api_state = ApiState {
        snapshot_path: cfg.snapshot_path.clone(),
        history: Arc::clone(&history),
        health: Arc::clone(&health),
        latency: Arc::clone(&latency),
    };

    match cli.command {
        Commands::Serve => serve_api(api_state, cfg.api_port, shutdown).await,
        Commands::Run { urls } => {
            let drivers = Drivers::open(&cfg).await?;
            let tracker = build_tracker(&cfg, urls, &drivers, history, health, latency);
            let outcome = tracker.run(&shutdown).await;
            drivers.shutdown().await;
            let report = outcome?;
            report.log();
            Ok(())
        }
        Commands::Watch {
            urls,
            interval_secs,
            no_api,
        } => {
            let every = match interval_secs {
                Some(secs) => config::watch_interval(secs)?,
                None => cfg.watch_interval,
            };
            let drivers = Drivers::open(&cfg).await?;
            let tracker = build_tracker(&cfg, urls, &drivers, history, health, latency);

            let api = (!no_api).then(|| {
                let shutdown = shutdown.clone();
                let port = cfg.api_port;
                tokio::spawn(async move { serve_api(api_state, port, shutdown).await })
            });

            info!("Watching every {every:?}");
            tracker.watch(every, &shutdown).await;
            drivers.shutdown().await;

            if let Some(api) = api {
                match api.await {
                    Ok(result) => result?,
                    Err(e) => error!("API task join error: {e}"),
                }
            }
            Ok(())
        }
    }
}

fn spawn_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl-C received, cancelling in-flight work");
                handle.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {e}"),
        }
    });
}

async fn open_history(cfg: &Config) -> Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = match cfg.history_backend {
        HistoryBackend::Csv => {
            info!("History file at {}", cfg.history_path.display());
            Arc::new(CsvHistory::new(&cfg.history_path))
        }
        HistoryBackend::Sqlite => Arc::new(SqliteHistory::open(&cfg.history_db_path).await?),
    };
    Ok(store)
}

/// Session factory for the configured driver, plus whatever must be shut down after.
struct Drivers {
    factory: Arc<dyn SessionFactory>,
    #[cfg(feature = "browser")]
    chrome: Option<Arc<crate::session::ChromeSessionFactory>>,
}

impl Drivers {
    async fn open(cfg: &Config) -> Result<Self> {
        match cfg.session_driver {
            SessionDriver::Http => Ok(Self {
                factory: Arc::new(HttpSessionFactory::new(Duration::from_secs(
                    HTTP_REQUEST_TIMEOUT_SECS,
                ))?),
                #[cfg(feature = "browser")]
                chrome: None,
            }),
            #[cfg(feature = "browser")]
            SessionDriver::Chrome => {
                let chrome = Arc::new(
                    crate::session::ChromeSessionFactory::launch(cfg.chrome_path.clone(), cfg.headless)
                        .await?,
                );
                Ok(Self {
                    factory: Arc::clone(&chrome) as Arc<dyn SessionFactory>,
                    chrome: Some(chrome),
                })
            }
            #[cfg(not(feature = "browser"))]
            SessionDriver::Chrome => Err(AppError::Config(
                "SESSION_DRIVER=chrome needs a build with `--features browser`".to_string(),
            )),
        }
    }

    async fn shutdown(&self) {
        #[cfg(feature = "browser")]
        {
            if let Some(chrome) = &self.chrome {
                chrome.shutdown().await;
            }
        }
    }
}

fn build_tracker(
    cfg: &Config,
    urls: Vec<String>,
    drivers: &Drivers,
    history: Arc<dyn HistoryStore>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
) -> Tracker {
    let extractor = Arc::new(Extractor::new(cfg.timeouts.clone(), cfg.selectors.clone()));
    let pool = WorkerPool::new(
        Arc::clone(&drivers.factory),
        extractor,
        Arc::clone(&history),
        latency,
        cfg.concurrency,
    );
    info!(
        concurrency = cfg.concurrency,
        driver = ?cfg.session_driver,
        snapshot = %cfg.snapshot_path.display(),
        "Tracker ready",
    );
    Tracker::new(pool, history, TrackerSettings::from_config(cfg, urls), health)
}

async fn serve_api(state: ApiState, port: u16, shutdown: CancelSignal) -> Result<()> {
    let app = router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
