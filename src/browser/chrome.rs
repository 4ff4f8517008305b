//! headless_chrome-backed browser sessions.
//!
//! Each isolated session is its own Chrome process with a single tab, so
//! closing a session discards cookies and storage along with it. The
//! headless_chrome API is blocking; every call is moved onto the blocking
//! pool so the driver's awaits stay honest suspension points.

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BrowserError, BrowserSession, SessionFactory, TextTarget, WaitPolicy};

/// Extra time allowed on top of the tab's own timeout before giving up on a blocking call.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Chrome launch settings resolved from config and CLI
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub window_size: Option<(u32, u32)>,
    /// Upper bound for blocking calls other than navigation
    pub command_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            window_size: None,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// True inside Docker or when ISINFINDER_CONTAINER is set; Chrome needs --no-sandbox there.
fn is_container() -> bool {
    std::env::var("ISINFINDER_CONTAINER").is_ok() || Path::new("/.dockerenv").exists()
}

/// Find a Chrome binary: explicit setting, then CHROME_PATH, then the WSL Windows install.
fn resolve_chrome_path(configured: Option<&Path>) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("CHROME_PATH").ok().map(PathBuf::from))
        .or_else(|| {
            let wsl_path = Path::new("/mnt/c/Program Files/Google/Chrome/Application/chrome.exe");
            if wsl_path.exists() { Some(wsl_path.to_path_buf()) } else { None }
        })
}

/// Launch a Chrome process. Blocking.
pub fn launch_browser(settings: &LaunchSettings) -> Result<Browser, BrowserError> {
    let chrome_path = resolve_chrome_path(settings.chrome_path.as_deref());

    let options = LaunchOptions::default_builder()
        .headless(settings.headless)
        .sandbox(!is_container())
        .path(chrome_path)
        .window_size(settings.window_size)
        .build()
        .map_err(|e| BrowserError::Launch(format!("invalid Chrome launch options: {}", e)))?;

    Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))
}

/// Opens one Chrome process per isolated session
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    settings: LaunchSettings,
}

impl ChromeSessionFactory {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn new_isolated_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let settings = self.settings.clone();
        let session = tokio::task::spawn_blocking(move || -> Result<ChromeSession, BrowserError> {
            let browser = launch_browser(&settings)?;
            let tab = browser
                .new_tab()
                .map_err(|e| BrowserError::Launch(format!("failed to create tab: {}", e)))?;
            tab.set_default_timeout(settings.command_timeout);
            Ok(ChromeSession {
                browser: Some(browser),
                tab,
                command_timeout: settings.command_timeout,
            })
        })
        .await
        .map_err(|e| BrowserError::Launch(format!("launch task failed: {}", e)))??;

        debug!(headless = self.settings.headless, "Opened isolated Chrome session");
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    /// Dropping the last handle kills the Chrome process.
    browser: Option<Browser>,
    tab: Arc<Tab>,
    command_timeout: Duration,
}

impl ChromeSession {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.browser.is_some() { Ok(()) } else { Err(BrowserError::Closed) }
    }

    /// Tab handle for a blocking call; fails once the session is closed.
    fn live_tab(&self) -> Result<Arc<Tab>, BrowserError> {
        self.ensure_open()?;
        Ok(self.tab.clone())
    }

    /// Continue in a fresh tab from the same browser and close the current one.
    ///
    /// If no fresh tab can be opened the browser is released and the session reports `Closed`.
    async fn replace_tab(&mut self) {
        let Some(browser) = self.browser.clone() else {
            return;
        };
        let stale = self.tab.clone();
        let command_timeout = self.command_timeout;
        let task = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>, String> {
            let tab = browser.new_tab().map_err(|e| e.to_string())?;
            tab.set_default_timeout(command_timeout);
            if let Err(e) = stale.close(false) {
                debug!("Stale tab close failed: {}", e);
            }
            Ok(tab)
        });

        let reason = match tokio::time::timeout(command_timeout + TIMEOUT_GRACE, task).await {
            Ok(Ok(Ok(tab))) => {
                self.tab = tab;
                debug!("Replaced tab after failed navigation");
                return;
            }
            Ok(Ok(Err(reason))) => reason,
            Ok(Err(join)) => join.to_string(),
            Err(_) => format!("no new tab within {}s", command_timeout.as_secs()),
        };

        warn!("Browser session unusable after failed navigation: {}", reason);
        if let Some(browser) = self.browser.take() {
            tokio::task::spawn_blocking(move || drop(browser));
        }
    }
}

/// Run a script on the blocking pool, bounded by `command_timeout` plus grace.
async fn evaluate_on(tab: Arc<Tab>, command_timeout: Duration, script: String) -> Result<serde_json::Value, BrowserError> {
    let task = tokio::task::spawn_blocking(move || {
        tab.evaluate(&script, false)
            .map(|remote| remote.value.unwrap_or(serde_json::Value::Null))
            .map_err(|e| e.to_string())
    });

    match tokio::time::timeout(command_timeout + TIMEOUT_GRACE, task).await {
        Err(_) => Err(BrowserError::Evaluation(format!(
            "script did not finish within {}s",
            command_timeout.as_secs()
        ))),
        Ok(Err(join)) => Err(BrowserError::Evaluation(join.to_string())),
        Ok(Ok(result)) => result.map_err(BrowserError::Evaluation),
    }
}

/// Script returning every matching element's textContent as a JSON string array.
fn selector_text_script(selector: &str) -> Result<String, BrowserError> {
    let quoted = serde_json::to_string(selector)
        .map_err(|e| BrowserError::Evaluation(format!("unencodable selector: {}", e)))?;
    Ok(format!(
        "JSON.stringify(Array.from(document.querySelectorAll({})).map(e => e.textContent || ''))",
        quoted
    ))
}

const BODY_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy, timeout: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let tab = self.tab.clone();
        let target = url.to_string();

        let task = tokio::task::spawn_blocking(move || -> Result<(), String> {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&target).map_err(|e| e.to_string())?;
            tab.wait_until_navigated().map_err(|e| e.to_string())?;
            Ok(())
        });

        let outcome = tokio::time::timeout(timeout + TIMEOUT_GRACE, task).await;
        // Restore the shorter bound for reads.
        self.tab.set_default_timeout(self.command_timeout);

        let failure = match outcome {
            Err(_) => BrowserError::Timeout { url: url.to_string(), timeout },
            Ok(Err(join)) => BrowserError::Navigation { url: url.to_string(), reason: join.to_string() },
            Ok(Ok(Err(reason))) => BrowserError::Navigation { url: url.to_string(), reason },
            Ok(Ok(Ok(()))) => {
                if let WaitPolicy::LoadThenSettle(settle) = wait {
                    tokio::time::sleep(settle).await;
                }
                return Ok(());
            }
        };

        // The abandoned load may still be running on this tab
        self.replace_tab().await;
        Err(failure)
    }

    async fn extract_text(&mut self, target: TextTarget<'_>) -> Result<Vec<String>, BrowserError> {
        match target {
            TextTarget::WholePage => {
                let value = evaluate_on(self.live_tab()?, self.command_timeout, BODY_TEXT_SCRIPT.to_string()).await?;
                Ok(vec![value.as_str().unwrap_or_default().to_string()])
            }
            TextTarget::Selector(selector) => {
                let script = selector_text_script(selector)?;
                let value = evaluate_on(self.live_tab()?, self.command_timeout, script).await?;
                let encoded = value.as_str().unwrap_or("[]");
                serde_json::from_str(encoded)
                    .map_err(|e| BrowserError::Evaluation(format!("unexpected text list for '{}': {}", selector, e)))
            }
        }
    }

    async fn evaluate_in_page(&mut self, script: &str) -> Result<serde_json::Value, BrowserError> {
        evaluate_on(self.live_tab()?, self.command_timeout, script.to_string()).await
    }

    async fn close_session(self: Box<Self>) -> Result<(), BrowserError> {
        let mut this = self;
        let Some(browser) = this.browser.take() else {
            return Ok(());
        };
        let tab = this.tab.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = tab.close(true) {
                debug!("Tab close failed, killing browser anyway: {}", e);
            }
            drop(browser);
        })
        .await
        .map_err(|e| BrowserError::Launch(format!("session teardown failed: {}", e)))?;
        debug!("Closed Chrome session");
        Ok(())
    }
}
