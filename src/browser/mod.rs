//! Narrow browser-automation surface consumed by the matching pipeline.
//!
//! The pipeline only ever navigates, reads text, evaluates a script in the
//! page, and opens/closes isolated sessions. Everything else about the
//! automation layer stays behind these two traits so the locator, extractor
//! and batch driver can run against a scripted fake in tests.

pub mod chrome;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use chrome::{ChromeSessionFactory, LaunchSettings};

/// Script returning the serialized DOM of the current page.
pub const OUTER_HTML_SCRIPT: &str = "document.documentElement ? document.documentElement.outerHTML : ''";

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Failed to navigate to {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Navigation to {url} timed out after {}s", .timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("In-page evaluation failed: {0}")]
    Evaluation(String),

    #[error("Browser session is closed")]
    Closed,
}

impl BrowserError {
    /// Whether this error came from loading a page (as opposed to reading it)
    pub fn is_navigation_failure(&self) -> bool {
        matches!(self, BrowserError::Navigation { .. } | BrowserError::Timeout { .. })
    }
}

/// How long `navigate` waits after the load event before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait for the page load event
    Load,
    /// Wait for load, then give client-side rendering a fixed grace period
    LoadThenSettle(Duration),
}

/// Wait policy and upper bound applied to every page load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationSettings {
    pub wait: WaitPolicy,
    pub timeout: Duration,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::Load,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What to read text from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTarget<'a> {
    /// Rendered text of the whole document body
    WholePage,
    /// Text content of every element matching a CSS selector, in document order
    Selector(&'a str),
}

/// One live browsing context (tab, cookies, storage)
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy, timeout: Duration) -> Result<(), BrowserError>;

    async fn extract_text(&mut self, target: TextTarget<'_>) -> Result<Vec<String>, BrowserError>;

    async fn evaluate_in_page(&mut self, script: &str) -> Result<serde_json::Value, BrowserError>;

    async fn close_session(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Source of fresh, isolated browsing sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn new_isolated_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Read the current page's HTML through `evaluate_in_page`
pub async fn page_html(session: &mut dyn BrowserSession) -> Result<String, BrowserError> {
    match session.evaluate_in_page(OUTER_HTML_SCRIPT).await? {
        serde_json::Value::String(html) => Ok(html),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(BrowserError::Evaluation(format!(
            "expected page HTML as a string, got {}",
            other
        ))),
    }
}
