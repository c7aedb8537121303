//! In-memory page session for tests. Each page is a timeline: nodes become
//! visible and text appears after fixed delays measured from navigation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::Selectors;
use crate::session::{PageSession, SessionError, SessionFactory};

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    /// `None` means the document never reports "complete".
    pub ready_after: Option<Duration>,
    pub visible: HashMap<String, Duration>,
    pub texts: HashMap<String, (Duration, String)>,
    pub clickable: HashSet<String>,
    pub navigate_error: bool,
    pub visibility_error: bool,
    pub panic_on_read: bool,
    /// Time spent inside `navigate`.
    pub load_time: Duration,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self {
            ready_after: Some(Duration::ZERO),
            ..Self::default()
        }
    }

    /// A healthy listing page: everything present right away.
    pub fn listing(listings_text: &str) -> Self {
        let sel = Selectors::default();
        Self::new()
            .visible(&sel.listings, Duration::ZERO)
            .text(&sel.listings, Duration::ZERO, listings_text)
            .text(&sel.title, Duration::ZERO, "Hamilton")
            .text(&sel.date, Duration::ZERO, "Sat, Nov 7 8:00 PM")
            .text(&sel.location, Duration::ZERO, "Richard Rodgers Theatre")
    }

    pub fn visible(mut self, selector: &str, after: Duration) -> Self {
        self.visible.insert(selector.to_string(), after);
        self
    }

    pub fn text(mut self, selector: &str, after: Duration, text: &str) -> Self {
        self.texts
            .insert(selector.to_string(), (after, text.to_string()));
        self
    }

    pub fn without_text(mut self, selector: &str) -> Self {
        self.texts.remove(selector);
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    pub fn clickable(mut self, selector: &str) -> Self {
        self.clickable.insert(selector.to_string());
        self
    }

    pub fn load_time(mut self, d: Duration) -> Self {
        self.load_time = d;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.navigate_error = true;
        self
    }

    pub fn failing_visibility(mut self) -> Self {
        self.visibility_error = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_read = true;
        self
    }
}

/// Counters shared by a factory and every session it opened.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub clicks: AtomicUsize,
}

pub struct ScriptedFactory {
    pages: Arc<HashMap<String, ScriptedPage>>,
    pub counters: Arc<SessionCounters>,
}

impl ScriptedFactory {
    pub fn new(pages: HashMap<String, ScriptedPage>) -> Self {
        Self {
            pages: Arc::new(pages),
            counters: Arc::new(SessionCounters::default()),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession::new(
            Arc::clone(&self.pages),
            Arc::clone(&self.counters),
        )))
    }
}

pub struct ScriptedSession {
    pages: Arc<HashMap<String, ScriptedPage>>,
    counters: Arc<SessionCounters>,
    current: Mutex<Option<(ScriptedPage, Instant)>>,
}

impl ScriptedSession {
    pub fn new(pages: Arc<HashMap<String, ScriptedPage>>, counters: Arc<SessionCounters>) -> Self {
        Self {
            pages,
            counters,
            current: Mutex::new(None),
        }
    }

    /// A single-page session, for extractor tests.
    pub fn with_page(url: &str, page: ScriptedPage) -> Self {
        let pages = HashMap::from([(url.to_string(), page)]);
        Self::new(Arc::new(pages), Arc::new(SessionCounters::default()))
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    fn page(&self) -> Option<(ScriptedPage, Duration)> {
        let current = self.current.lock().unwrap();
        current
            .as_ref()
            .map(|(page, at)| (page.clone(), at.elapsed()))
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| SessionError::Navigation(format!("no scripted page for {url}")))?;
        tokio::time::sleep(page.load_time).await;
        if page.navigate_error {
            return Err(SessionError::Navigation(format!("connection reset for {url}")));
        }
        *self.current.lock().unwrap() = Some((page, Instant::now()));
        Ok(())
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>, SessionError> {
        let Some((page, elapsed)) = self.page() else {
            return Ok(None);
        };
        if page.panic_on_read {
            panic!("scripted page exploded reading {selector}");
        }
        Ok(page
            .texts
            .get(selector)
            .filter(|(after, _)| elapsed >= *after)
            .map(|(_, text)| text.clone()))
    }

    async fn click(&self, selector: &str) -> Result<bool, SessionError> {
        let Some((page, _)) = self.page() else {
            return Ok(false);
        };
        let hit = page.clickable.contains(selector);
        if hit {
            self.counters.clicks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(hit)
    }

    async fn eval_script(
        &self,
        _body: &str,
        _args: &[serde_json::Value],
    ) -> Result<Option<serde_json::Value>, SessionError> {
        Err(SessionError::Unsupported("script evaluation"))
    }

    async fn ready_state(&self) -> Result<Option<String>, SessionError> {
        let Some((page, elapsed)) = self.page() else {
            return Ok(None);
        };
        let ready = page.ready_after.is_some_and(|after| elapsed >= after);
        Ok(Some(if ready { "complete" } else { "loading" }.to_string()))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, SessionError> {
        let Some((page, elapsed)) = self.page() else {
            return Ok(false);
        };
        if page.visibility_error {
            return Err(SessionError::Driver("target crashed".to_string()));
        }
        Ok(page
            .visible
            .get(selector)
            .is_some_and(|after| elapsed >= *after))
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
