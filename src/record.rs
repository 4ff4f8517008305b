//! Records flowing through the matching pipeline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Full-string shape of an ISIN: two uppercase letters then ten uppercase letters or digits.
static ISIN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{10}$").expect("valid ISIN shape regex"));

/// Check whether a string is a well-formed 12-character identifier
pub fn is_well_formed_isin(code: &str) -> bool {
    ISIN_SHAPE.is_match(code)
}

/// A company to look up, loaded once from the input file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputRecord {
    pub company_name: String,
    pub expected_isin: String,
}

impl InputRecord {
    pub fn new(company_name: impl Into<String>, expected_isin: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            expected_isin: expected_isin.into(),
        }
    }
}

/// A search-result link hypothesized to lead to the company's stock page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub display_text: String,
}

impl Candidate {
    pub fn new(url: impl Into<String>, display_text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_text: display_text.into(),
        }
    }
}

/// Outcome classification of one input record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Not yet processed. Never written to final output.
    #[default]
    Pending,
    Matched,
    NoMatch,
    NoResults,
    Error,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Matched => "matched",
            MatchStatus::NoMatch => "no_match",
            MatchStatus::NoResults => "no_results",
            MatchStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Finalized outcome of resolving one input record against the search site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub company_name: String,
    pub expected_isin: String,
    pub found_isin: Option<String>,
    pub matching_url: Option<String>,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_detail: Option<String>,
}

impl MatchRecord {
    /// Start a record for an input, in the pending state
    pub fn pending(input: &InputRecord) -> Self {
        Self {
            company_name: input.company_name.clone(),
            expected_isin: input.expected_isin.clone(),
            found_isin: None,
            matching_url: None,
            status: MatchStatus::Pending,
            error_detail: None,
        }
    }

    /// Finalize as a processing failure, keeping whatever was found so far
    pub fn fail(mut self, detail: impl Into<String>) -> Self {
        self.status = MatchStatus::Error;
        self.matching_url = None;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn is_matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}

/// Per-status tallies over a result set
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub matched: usize,
    pub no_match: usize,
    pub no_results: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn tally(records: &[MatchRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.record(record.status);
        }
        counts
    }

    pub fn record(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Matched => self.matched += 1,
            MatchStatus::NoMatch => self.no_match += 1,
            MatchStatus::NoResults => self.no_results += 1,
            MatchStatus::Error => self.error += 1,
            MatchStatus::Pending => {}
        }
    }

    pub fn total(&self) -> usize {
        self.matched + self.no_match + self.no_results + self.error
    }
}
