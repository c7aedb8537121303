//! Plain HTTP page session.
//!
//! Fetches the document once per navigation and answers locator queries from
//! the parsed HTML. Nothing is executed, so it only sees server-rendered
//! content, but it needs no browser and is cheap to open.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::Result;
use crate::session::{normalize_text, PageSession, SessionError, SessionFactory};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct HttpSessionFactory {
    client: reqwest::Client,
}

impl HttpSessionFactory {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> std::result::Result<Box<dyn PageSession>, SessionError> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            state: Mutex::new(PageState::Blank),
        }))
    }
}

enum PageState {
    Blank,
    Loaded(String),
    Closed,
}

pub struct HttpSession {
    client: reqwest::Client,
    state: Mutex<PageState>,
}

impl HttpSession {
    fn document(&self) -> std::result::Result<Option<String>, SessionError> {
        let state = self
            .state
            .lock()
            .map_err(|_| SessionError::Driver("page state lock poisoned".to_string()))?;
        match &*state {
            PageState::Blank => Ok(None),
            PageState::Loaded(html) => Ok(Some(html.clone())),
            PageState::Closed => Err(SessionError::Closed),
        }
    }

    fn set_state(&self, next: PageState) -> std::result::Result<(), SessionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SessionError::Driver("page state lock poisoned".to_string()))?;
        if matches!(*state, PageState::Closed) {
            return Err(SessionError::Closed);
        }
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&self, url: &str) -> std::result::Result<(), SessionError> {
        self.set_state(PageState::Blank)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Navigation(format!("HTTP {status} for {url}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        debug!(url = %url, bytes = body.len(), "[SESSION] page fetched");
        self.set_state(PageState::Loaded(body))
    }

    async fn text_of(&self, selector: &str) -> std::result::Result<Option<String>, SessionError> {
        match self.document()? {
            Some(html) => select_text(&html, selector),
            None => Ok(None),
        }
    }

    async fn click(&self, _selector: &str) -> std::result::Result<bool, SessionError> {
        // Static documents have no live overlays to dismiss.
        self.document()?;
        Ok(false)
    }

    async fn eval_script(
        &self,
        _body: &str,
        _args: &[serde_json::Value],
    ) -> std::result::Result<Option<serde_json::Value>, SessionError> {
        Err(SessionError::Unsupported("script evaluation"))
    }

    async fn ready_state(&self) -> std::result::Result<Option<String>, SessionError> {
        Ok(self.document()?.map(|_| "complete".to_string()))
    }

    async fn is_visible(&self, selector: &str) -> std::result::Result<bool, SessionError> {
        match self.document()? {
            Some(html) => Ok(select_first(&html, selector)?),
            None => Ok(false),
        }
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), SessionError> {
        self.set_state(PageState::Closed)
    }
}

fn parse_selector(selector: &str) -> std::result::Result<Selector, SessionError> {
    Selector::parse(selector)
        .map_err(|e| SessionError::Script(format!("bad selector {selector:?}: {e:?}")))
}

fn select_first(html: &str, selector: &str) -> std::result::Result<bool, SessionError> {
    let selector = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let found = doc.select(&selector).next().is_some();
    Ok(found)
}

fn select_text(html: &str, selector: &str) -> std::result::Result<Option<String>, SessionError> {
    let selector = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let text = doc
        .select(&selector)
        .next()
        .and_then(|el| normalize_text(&el.text().collect::<Vec<_>>().join(" ")));
    Ok(text)
}
