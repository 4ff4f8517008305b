//! In-memory browser for pipeline tests.
//!
//! `FakeWeb` maps URLs to scripted pages. Sessions opened by `FakeSessionFactory`
//! serve those pages and record every navigation, open and close.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use isinfinder::batch::BatchSettings;
use isinfinder::browser::{
    BrowserError, BrowserSession, NavigationSettings, SessionFactory, TextTarget, WaitPolicy, OUTER_HTML_SCRIPT,
};
use isinfinder::locator::{search_url, LocatorSettings};

pub const SEARCH_TEMPLATE: &str = "https://stocks.test/search?s={query}";

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub html: String,
    pub text: String,
    /// Text content per CSS selector
    pub nodes: HashMap<String, Vec<String>>,
}

impl FakePage {
    pub fn with_text(text: &str) -> Self {
        Self {
            html: format!("<html><body><p>{}</p></body></html>", text),
            text: text.to_string(),
            nodes: HashMap::new(),
        }
    }

    pub fn with_nodes(mut self, selector: &str, nodes: &[&str]) -> Self {
        self.nodes
            .insert(selector.to_string(), nodes.iter().map(|n| n.to_string()).collect());
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeWeb {
    pages: HashMap<String, FakePage>,
    failing: HashSet<String>,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// A search results page for `company` listing `stock_paths` under a "Stocks" heading
    pub fn search_results(self, company: &str, stock_paths: &[&str]) -> Self {
        let rows: String = stock_paths
            .iter()
            .map(|path| format!(r#"<tr><td><a href="{}">{}</a></td></tr>"#, path, company))
            .collect();
        let html = if stock_paths.is_empty() {
            "<html><body><p>No results found.</p></body></html>".to_string()
        } else {
            format!("<html><body><h3>Stocks</h3><table>{}</table></body></html>", rows)
        };
        let url = search_url(SEARCH_TEMPLATE, company);
        self.page(&url, FakePage { html, text: String::new(), nodes: HashMap::new() })
    }

    /// Any navigation to `url` fails
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Make the search for `company` fail
    pub fn failing_search(self, company: &str) -> Self {
        let url = search_url(SEARCH_TEMPLATE, company);
        self.failing(&url)
    }
}

#[derive(Debug, Default)]
pub struct BrowserLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
}

impl BrowserLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

pub struct FakeSession {
    web: Arc<FakeWeb>,
    log: Arc<BrowserLog>,
    current: Option<FakePage>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str, _wait: WaitPolicy, timeout: Duration) -> Result<(), BrowserError> {
        self.log.navigations.lock().unwrap().push(url.to_string());
        self.current = None;

        if self.web.failing.contains(url) {
            return Err(BrowserError::Timeout { url: url.to_string(), timeout });
        }
        match self.web.pages.get(url) {
            Some(page) => {
                self.current = Some(page.clone());
                Ok(())
            }
            None => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            }),
        }
    }

    async fn extract_text(&mut self, target: TextTarget<'_>) -> Result<Vec<String>, BrowserError> {
        let page = self
            .current
            .as_ref()
            .ok_or_else(|| BrowserError::Evaluation("no page loaded".to_string()))?;
        Ok(match target {
            TextTarget::WholePage => vec![page.text.clone()],
            TextTarget::Selector(selector) => page.nodes.get(selector).cloned().unwrap_or_default(),
        })
    }

    async fn evaluate_in_page(&mut self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let page = self
            .current
            .as_ref()
            .ok_or_else(|| BrowserError::Evaluation("no page loaded".to_string()))?;
        if script == OUTER_HTML_SCRIPT {
            Ok(serde_json::Value::String(page.html.clone()))
        } else {
            Err(BrowserError::Evaluation(format!("unsupported script: {}", script)))
        }
    }

    async fn close_session(self: Box<Self>) -> Result<(), BrowserError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSessionFactory {
    web: Arc<FakeWeb>,
    log: Arc<BrowserLog>,
    refuse_sessions: bool,
}

impl FakeSessionFactory {
    pub fn new(web: FakeWeb) -> (Self, Arc<BrowserLog>) {
        let log = Arc::new(BrowserLog::default());
        let factory = Self {
            web: Arc::new(web),
            log: Arc::clone(&log),
            refuse_sessions: false,
        };
        (factory, log)
    }

    /// A factory whose every session launch fails
    pub fn refusing() -> (Self, Arc<BrowserLog>) {
        let (mut factory, log) = Self::new(FakeWeb::new());
        factory.refuse_sessions = true;
        (factory, log)
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn new_isolated_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if self.refuse_sessions {
            return Err(BrowserError::Launch("Chrome binary not found".to_string()));
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            web: Arc::clone(&self.web),
            log: Arc::clone(&self.log),
            current: None,
        }))
    }
}

pub fn locator_settings() -> LocatorSettings {
    LocatorSettings {
        search_url_template: SEARCH_TEMPLATE.to_string(),
        stock_path_marker: "/stock/".to_string(),
        navigation: NavigationSettings {
            wait: WaitPolicy::Load,
            timeout: Duration::from_secs(5),
        },
    }
}

/// Batch settings without inter-record delay
pub fn fast_batch_settings() -> BatchSettings {
    BatchSettings {
        request_delay: Duration::ZERO,
        ..BatchSettings::default()
    }
}
