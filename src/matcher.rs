//! Match evaluation and the per-record pipeline.
//!
//! `evaluate_candidates` walks candidates in order and stops at the first page
//! whose extracted ISIN equals the expected one. A wrong ISIN on one candidate
//! never aborts the walk; multi-result search pages routinely lead with the
//! wrong listing.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::BrowserSession;
use crate::extract::PageExtractor;
use crate::locator::{locate_candidates, LocatorSettings};
use crate::record::{Candidate, InputRecord, MatchRecord, MatchStatus};

/// Anything that can produce an ISIN for a candidate page
#[async_trait]
pub trait IdentifierSource: Send {
    async fn extract(&mut self, candidate: &Candidate) -> Option<String>;
}

/// Terminal decision for one record's candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: MatchStatus,
    /// The matching ISIN, or the last one seen on a non-matching candidate
    pub found_isin: Option<String>,
    /// Set only when `status` is `Matched`
    pub matching_url: Option<String>,
}

impl Evaluation {
    /// Copy the decision into a pending record, finalizing it
    pub fn finalize(self, mut record: MatchRecord) -> MatchRecord {
        record.status = self.status;
        record.found_isin = self.found_isin;
        record.matching_url = self.matching_url;
        record
    }
}

/// Decide a record's status from its candidates.
///
/// Comparison is exact, case-sensitive, full-string equality.
pub async fn evaluate_candidates(
    expected_isin: &str,
    candidates: &[Candidate],
    source: &mut dyn IdentifierSource,
) -> Evaluation {
    if candidates.is_empty() {
        return Evaluation { status: MatchStatus::NoResults, found_isin: None, matching_url: None };
    }

    let mut last_found: Option<String> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let Some(found) = source.extract(candidate).await else {
            debug!("Candidate {}/{} yielded no ISIN: {}", index + 1, candidates.len(), candidate.url);
            continue;
        };

        if found == expected_isin {
            return Evaluation {
                status: MatchStatus::Matched,
                found_isin: Some(found),
                matching_url: Some(candidate.url.clone()),
            };
        }

        debug!(
            "Candidate {}/{} has ISIN {} (expected {}): {}",
            index + 1,
            candidates.len(),
            found,
            expected_isin,
            candidate.url
        );
        last_found = Some(found);
    }

    Evaluation { status: MatchStatus::NoMatch, found_isin: last_found, matching_url: None }
}

/// Resolve one input record end to end: search, extract from each candidate, evaluate.
///
/// Never fails: a failed search is returned as an `Error` record.
pub async fn process_record(
    session: &mut dyn BrowserSession,
    settings: &LocatorSettings,
    input: &InputRecord,
) -> MatchRecord {
    let record = MatchRecord::pending(input);

    let candidates = match locate_candidates(&mut *session, settings, &input.company_name).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Search failed for '{}': {}", input.company_name, e);
            return record.fail(format!("search failed: {}", e));
        }
    };

    let mut extractor = PageExtractor::new(session, settings.navigation);
    let record = evaluate_candidates(&input.expected_isin, &candidates, &mut extractor)
        .await
        .finalize(record);

    match record.status {
        MatchStatus::Matched => info!(
            "MATCH {} -> {} ({})",
            record.company_name,
            record.expected_isin,
            record.matching_url.as_deref().unwrap_or_default()
        ),
        status => info!("{} {} (expected {})", status, record.company_name, record.expected_isin),
    }
    record
}
