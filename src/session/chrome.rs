//! Chrome DevTools page session.
//!
//! One shared browser process, one fresh page per session. Needs a local
//! Chrome/Chromium install (or CHROME_PATH).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::session::{normalize_text, PageSession, SessionError, SessionFactory};

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

pub struct ChromeSessionFactory {
    browser: Arc<Mutex<Browser>>,
}

impl ChromeSessionFactory {
    pub async fn launch(
        chrome_path: Option<PathBuf>,
        headless: bool,
    ) -> Result<Self, SessionError> {
        let executable = match chrome_path {
            Some(p) => p,
            None => find_chrome().ok_or_else(|| {
                SessionError::Driver(
                    "Chrome/Chromium not found; install it or set CHROME_PATH".to_string(),
                )
            })?,
        };
        info!("Launching browser at {} (headless={headless})", executable.display());

        let mut builder = BrowserConfig::builder().chrome_executable(executable);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .map_err(SessionError::Driver)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Driver(format!("failed to launch browser: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
        })
    }

    pub async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Browser shutdown failed: {e}");
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Driver(format!("failed to open page: {e}")))?;
        Ok(Box::new(ChromeSession { page }))
    }
}

pub struct ChromeSession {
    page: Page,
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>, SessionError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        let text = element
            .inner_text()
            .await
            .map_err(|e| SessionError::Driver(e.to_string()))?;
        Ok(text.as_deref().and_then(normalize_text))
    }

    async fn click(&self, selector: &str) -> Result<bool, SessionError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        element
            .click()
            .await
            .map_err(|e| SessionError::Driver(e.to_string()))?;
        debug!(selector, "[SESSION] clicked");
        Ok(true)
    }

    async fn eval_script(
        &self,
        body: &str,
        args: &[serde_json::Value],
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let args = serde_json::to_string(args).map_err(|e| SessionError::Script(e.to_string()))?;
        let expression = format!("(function(args) {{ {body} }})({args})");
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| SessionError::Script(e.to_string()))?;
        Ok(result.value().cloned())
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.page
            .close()
            .await
            .map_err(|e| SessionError::Driver(e.to_string()))
    }
}

fn find_chrome() -> Option<PathBuf> {
    CHROME_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}
