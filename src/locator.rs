//! Search-result link selection
//!
//! Runs a company-name search and picks which result links are plausible
//! stock-detail pages. Selection is a fallback chain over the search page's
//! HTML, first non-empty tier wins:
//! 1. Stocks region: the table belonging to a "Stocks" heading or a tagged stocks section
//! 2. Stock table: the first table holding at least one stock-path link
//! 3. Row links: stock-path links inside table rows or cells, including ARIA grid rows
//!
//! Candidates keep document order and are de-duplicated by resolved URL.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

use crate::browser::{page_html, BrowserError, BrowserSession, NavigationSettings};
use crate::record::Candidate;

/// Placeholder replaced by the URL-encoded company name in the search template
pub const QUERY_PLACEHOLDER: &str = "{query}";

static HEADING_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"h1, h2, h3, h4, h5, h6, th, caption, [role="heading"]"#).expect("valid heading selector")
});
static TAGGED_SECTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-section="stocks"], #stocks, .stocks, [aria-label="Stocks"]"#)
        .expect("valid stocks section selector")
});
static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid table selector"));
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));
// ARIA grid roles cover result lists rendered as div-based tables
static ROW_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"tr a[href], td a[href], [role="row"] a[href], [role="cell"] a[href], [role="gridcell"] a[href]"#,
    )
    .expect("valid row link selector")
});

/// Which tier of the selection chain produced the candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    StocksRegion,
    StockTable,
    RowLinks,
}

impl SelectionTier {
    /// Tiers in evaluation order
    pub const ORDER: [SelectionTier; 3] =
        [SelectionTier::StocksRegion, SelectionTier::StockTable, SelectionTier::RowLinks];
}

impl std::fmt::Display for SelectionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionTier::StocksRegion => write!(f, "stocks_region"),
            SelectionTier::StockTable => write!(f, "stock_table"),
            SelectionTier::RowLinks => write!(f, "row_links"),
        }
    }
}

/// Where and how to search
#[derive(Debug, Clone)]
pub struct LocatorSettings {
    /// Search endpoint containing `{query}`
    pub search_url_template: String,
    /// Path fragment identifying stock-detail pages, e.g. `/stock/`
    pub stock_path_marker: String,
    pub navigation: NavigationSettings,
}

/// Build the search URL for a company name
pub fn search_url(template: &str, company_name: &str) -> String {
    template.replace(QUERY_PLACEHOLDER, &urlencoding::encode(company_name.trim()))
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef) -> String {
    normalize_ws(&element.text().collect::<String>())
}

/// Resolve an href against the page URL, keeping only http(s) targets.
fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Collects candidates in document order, skipping repeats of the same URL.
struct CandidateList<'a> {
    base: &'a Url,
    seen: HashSet<String>,
    candidates: Vec<Candidate>,
}

impl<'a> CandidateList<'a> {
    fn new(base: &'a Url) -> Self {
        Self { base, seen: HashSet::new(), candidates: Vec::new() }
    }

    /// Add a link; when `marker` is set the link's path must contain it.
    fn push_link(&mut self, link: ElementRef, marker: Option<&str>) {
        let Some(url) = link.value().attr("href").and_then(|href| resolve_href(self.base, href)) else {
            return;
        };
        if let Some(marker) = marker {
            if !url.path().contains(marker) {
                return;
            }
        }
        let url = url.to_string();
        if self.seen.insert(url.clone()) {
            self.candidates.push(Candidate::new(url, element_text(&link)));
        }
    }

    fn into_non_empty(self) -> Option<Vec<Candidate>> {
        if self.candidates.is_empty() { None } else { Some(self.candidates) }
    }
}

fn is_stocks_heading(element: &ElementRef) -> bool {
    element_text(element).eq_ignore_ascii_case("stocks")
}

fn enclosing_table<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "table")
}

/// Rank of a section heading, 1 being the highest. `None` for non-section headings such as `th`.
fn heading_level(element: &ElementRef) -> Option<u8> {
    let name = element.value().name();
    if let Some(level) = name.strip_prefix('h').and_then(|n| n.parse::<u8>().ok()) {
        return (1..=6).contains(&level).then_some(level);
    }
    if element.value().attr("role") == Some("heading") {
        // ARIA headings default to level 2
        return Some(
            element
                .value()
                .attr("aria-level")
                .and_then(|level| level.trim().parse().ok())
                .unwrap_or(2),
        );
    }
    None
}

/// First table in the region a section heading opens.
///
/// The region is the heading's following siblings, up to the next heading of the same
/// or higher rank or the end of the parent. Tables past that boundary belong to other sections.
fn table_in_heading_region<'a>(heading: &ElementRef<'a>, level: u8) -> Option<ElementRef<'a>> {
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
        for element in sibling.descendants().filter_map(ElementRef::wrap) {
            if heading_level(&element).is_some_and(|other| other <= level) {
                return None;
            }
            if element.value().name() == "table" {
                return Some(element);
            }
        }
    }
    None
}

/// Table scoping a stocks heading: the one enclosing it, else the first one in its region
fn table_for_heading<'a>(heading: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    enclosing_table(heading)
        .or_else(|| heading_level(heading).and_then(|level| table_in_heading_region(heading, level)))
}

/// Table scoping a tagged stocks section: itself, else the first table inside it
fn table_for_section<'a>(section: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    if section.value().name() == "table" {
        return Some(*section);
    }
    section.select(&TABLE_SELECTOR).next()
}

fn select_stocks_region(document: &Html, base: &Url) -> Option<Vec<Candidate>> {
    let heading_tables = document
        .select(&HEADING_SELECTOR)
        .filter(is_stocks_heading)
        .filter_map(|heading| table_for_heading(&heading));
    let section_tables = document
        .select(&TAGGED_SECTION_SELECTOR)
        .filter_map(|section| table_for_section(&section));

    for table in heading_tables.chain(section_tables) {
        let mut list = CandidateList::new(base);
        for link in table.select(&LINK_SELECTOR) {
            list.push_link(link, None);
        }
        if let Some(candidates) = list.into_non_empty() {
            return Some(candidates);
        }
    }
    None
}

fn select_stock_table(document: &Html, base: &Url, marker: &str) -> Option<Vec<Candidate>> {
    document.select(&TABLE_SELECTOR).find_map(|table| {
        let mut list = CandidateList::new(base);
        for link in table.select(&LINK_SELECTOR) {
            list.push_link(link, Some(marker));
        }
        list.into_non_empty()
    })
}

fn select_row_links(document: &Html, base: &Url, marker: &str) -> Option<Vec<Candidate>> {
    let mut list = CandidateList::new(base);
    for link in document.select(&ROW_LINK_SELECTOR) {
        list.push_link(link, Some(marker));
    }
    list.into_non_empty()
}

/// Run the selection chain over a search page's HTML.
///
/// Returns the winning tier with its candidates, or `None` when no tier finds any link.
pub fn select_candidates(html: &str, base: &Url, marker: &str) -> Option<(SelectionTier, Vec<Candidate>)> {
    let document = Html::parse_document(html);

    SelectionTier::ORDER.into_iter().find_map(|tier| {
        let found = match tier {
            SelectionTier::StocksRegion => select_stocks_region(&document, base),
            SelectionTier::StockTable => select_stock_table(&document, base, marker),
            SelectionTier::RowLinks => select_row_links(&document, base, marker),
        };
        found.map(|candidates| (tier, candidates))
    })
}

/// Search for a company and return the stock-page candidates in document order.
///
/// A failed search navigation is returned as an error; an empty list means no results.
pub async fn locate_candidates(
    session: &mut dyn BrowserSession,
    settings: &LocatorSettings,
    company_name: &str,
) -> Result<Vec<Candidate>, BrowserError> {
    let url = search_url(&settings.search_url_template, company_name);
    debug!("Searching for '{}': {}", company_name, url);

    session
        .navigate(&url, settings.navigation.wait, settings.navigation.timeout)
        .await?;
    let html = page_html(session).await?;

    let base = Url::parse(&url).map_err(|e| BrowserError::Navigation {
        url: url.clone(),
        reason: format!("search URL is not absolute: {}", e),
    })?;

    match select_candidates(&html, &base, &settings.stock_path_marker) {
        Some((tier, candidates)) => {
            info!("Found {} candidate(s) for '{}' via {} tier", candidates.len(), company_name, tier);
            Ok(candidates)
        }
        None => {
            info!("No stock candidates found for '{}'", company_name);
            Ok(Vec::new())
        }
    }
}
