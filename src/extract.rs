//! ISIN extraction from unstructured page text
//!
//! Extraction is an ordered fallback chain, stopping at the first tier that
//! yields a code:
//! 1. Labeled: `ISIN: <code>` (label case-insensitive, code uppercase)
//! 2. Bare: first standalone code anywhere in the rendered page text
//! 3. Element scan: text content of table cells, divs, spans, then paragraphs
//!
//! The element scan reads `textContent`, which includes nodes the rendered
//! `innerText` of tier 2 leaves out (collapsed panels, hidden tabs).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::browser::{BrowserError, BrowserSession, NavigationSettings, TextTarget};
use crate::matcher::IdentifierSource;
use crate::record::Candidate;

static LABELED_ISIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?i:ISIN)\s*:\s*([A-Z]{2}[A-Z0-9]{10})\b").expect("valid labeled ISIN regex")
});

static BARE_ISIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{2}[A-Z0-9]{10})\b").expect("valid bare ISIN regex"));

/// Element selectors scanned by the last tier, highest priority first
pub const ELEMENT_SELECTORS: [&str; 4] = ["td", "div", "span", "p"];

/// Which tier of the fallback chain produced an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Labeled,
    Bare,
    ElementScan,
}

impl ExtractionTier {
    /// Tiers in evaluation order
    pub const ORDER: [ExtractionTier; 3] =
        [ExtractionTier::Labeled, ExtractionTier::Bare, ExtractionTier::ElementScan];
}

impl std::fmt::Display for ExtractionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionTier::Labeled => write!(f, "labeled"),
            ExtractionTier::Bare => write!(f, "bare"),
            ExtractionTier::ElementScan => write!(f, "element_scan"),
        }
    }
}

/// An identifier pulled from a page, with the tier that found it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub isin: String,
    pub tier: ExtractionTier,
}

pub fn extract_labeled(text: &str) -> Option<String> {
    LABELED_ISIN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn extract_bare(text: &str) -> Option<String> {
    BARE_ISIN.find(text).map(|m| m.as_str().to_string())
}

/// First code found in a list of element texts, checking nodes in order
pub fn extract_from_elements<S: AsRef<str>>(nodes: &[S]) -> Option<String> {
    nodes.iter().find_map(|node| extract_bare(node.as_ref()))
}

/// Run the text-only tiers (labeled, then bare) over whole-page text
pub fn extract_from_text(text: &str) -> Option<Extraction> {
    if let Some(isin) = extract_labeled(text) {
        return Some(Extraction { isin, tier: ExtractionTier::Labeled });
    }
    extract_bare(text).map(|isin| Extraction { isin, tier: ExtractionTier::Bare })
}

/// Scan element text nodes selector by selector; a failed read skips that selector.
async fn scan_elements(session: &mut dyn BrowserSession) -> Option<String> {
    for selector in ELEMENT_SELECTORS {
        match session.extract_text(TextTarget::Selector(selector)).await {
            Ok(nodes) => {
                if let Some(isin) = extract_from_elements(&nodes) {
                    debug!("Element scan found {} in <{}>", isin, selector);
                    return Some(isin);
                }
            }
            Err(e) => debug!("Element scan could not read '{}': {}", selector, e),
        }
    }
    None
}

/// Run the full chain against the page currently loaded in `session`
pub async fn extract_from_page(session: &mut dyn BrowserSession) -> Result<Option<Extraction>, BrowserError> {
    let page_text = session.extract_text(TextTarget::WholePage).await?.join("\n");

    for tier in ExtractionTier::ORDER {
        let found = match tier {
            ExtractionTier::Labeled => extract_labeled(&page_text),
            ExtractionTier::Bare => extract_bare(&page_text),
            ExtractionTier::ElementScan => scan_elements(session).await,
        };
        if let Some(isin) = found {
            return Ok(Some(Extraction { isin, tier }));
        }
    }
    Ok(None)
}

/// Log line prefix for a candidate page that yielded nothing because of a browser error
fn candidate_failure_cause(error: &BrowserError) -> &'static str {
    if error.is_navigation_failure() {
        "Could not load candidate page"
    } else {
        "Browser error on candidate page"
    }
}

/// Unreachable pages are routine; any other browser failure points at the session itself.
fn log_candidate_failure(url: &str, err: &BrowserError) {
    let cause = candidate_failure_cause(err);
    if err.is_navigation_failure() {
        warn!("{} {}: {}", cause, url, err);
    } else {
        error!("{} {}: {}", cause, url, err);
    }
}

/// Loads candidate pages in a browser session and extracts their ISIN
pub struct PageExtractor<'s> {
    session: &'s mut dyn BrowserSession,
    navigation: NavigationSettings,
}

impl<'s> PageExtractor<'s> {
    pub fn new(session: &'s mut dyn BrowserSession, navigation: NavigationSettings) -> Self {
        Self { session, navigation }
    }
}

#[async_trait]
impl IdentifierSource for PageExtractor<'_> {
    /// Navigation and read failures count as "no identifier"; they are logged, never raised.
    async fn extract(&mut self, candidate: &Candidate) -> Option<String> {
        if let Err(e) = self
            .session
            .navigate(&candidate.url, self.navigation.wait, self.navigation.timeout)
            .await
        {
            log_candidate_failure(&candidate.url, &e);
            return None;
        }

        match extract_from_page(&mut *self.session).await {
            Ok(Some(extraction)) => {
                debug!("Extracted {} from {} via {} tier", extraction.isin, candidate.url, extraction.tier);
                Some(extraction.isin)
            }
            Ok(None) => {
                debug!("No ISIN found on {}", candidate.url);
                None
            }
            Err(e) => {
                log_candidate_failure(&candidate.url, &e);
                None
            }
        }
    }
}
