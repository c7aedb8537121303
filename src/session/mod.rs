//! Page session boundary.
//!
//! The extractor only ever talks to a page through [`PageSession`]. Every call
//! may fail or come back empty; callers treat both as normal.

pub mod http;
#[cfg(feature = "browser")]
pub mod chrome;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpSessionFactory;
#[cfg(feature = "browser")]
pub use chrome::ChromeSessionFactory;

/// Script bodies receive their arguments as `args` and `return` a JSON value.
pub const READY_STATE_SCRIPT: &str = "return document.readyState;";

pub const VISIBILITY_SCRIPT: &str = r#"
    const el = document.querySelector(args[0]);
    if (!el) return false;
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none';
"#;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("driver failure: {0}")]
    Driver(String),

    #[error("session already closed")]
    Closed,

    #[error("not supported by this driver: {0}")]
    Unsupported(&'static str),
}

/// One navigable page, exclusively owned by one extraction task.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Rendered text of the first node matching `selector`, `None` when absent or empty.
    async fn text_of(&self, selector: &str) -> Result<Option<String>, SessionError>;

    /// Activate the first node matching `selector`. `Ok(false)` when there is nothing to click.
    async fn click(&self, selector: &str) -> Result<bool, SessionError>;

    async fn eval_script(
        &self,
        body: &str,
        args: &[serde_json::Value],
    ) -> Result<Option<serde_json::Value>, SessionError>;

    async fn ready_state(&self) -> Result<Option<String>, SessionError> {
        let value = self.eval_script(READY_STATE_SCRIPT, &[]).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, SessionError> {
        let value = self
            .eval_script(VISIBILITY_SCRIPT, &[serde_json::Value::from(selector)])
            .await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Release the underlying page. Called exactly once, on every exit path.
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Opens fresh, isolated sessions for the worker pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError>;
}

/// Collapse runs of whitespace and drop empty text.
pub fn normalize_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}
