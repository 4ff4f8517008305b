//! Batch matching of company records
//!
//! Supports:
//! - CSV input with a header line and two columns (company name, expected ISIN)
//! - Sequential processing, one record fully resolved before the next starts
//! - A fixed delay between records and optional per-record browser isolation
//! - Rewriting the matches-so-far file every N records
//! - Stopping at a record boundary when interrupted

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserSession, SessionFactory};
use crate::export;
use crate::locator::LocatorSettings;
use crate::logger::RunLogger;
use crate::matcher::process_record;
use crate::record::{is_well_formed_isin, InputRecord, MatchRecord, StatusCounts};

/// Load input records from a CSV file. Any read or parse failure is fatal.
pub fn load_input_records(path: &Path) -> Result<Vec<InputRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    parse_input_csv(&content)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))
}

/// Parse input records from CSV content
///
/// The first line is a header and is discarded. Rows with an empty company
/// name or ISIN are skipped, as are rows whose ISIN is not well-formed.
pub fn parse_input_csv(content: &str) -> Result<Vec<InputRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.context("Failed to parse CSV record")?;
        let company_name = row.get(0).unwrap_or_default();
        let expected_isin = row.get(1).unwrap_or_default();

        if company_name.is_empty() || expected_isin.is_empty() {
            continue;
        }

        if !is_well_formed_isin(expected_isin) {
            // +2: one for the header, one for 1-based line numbers
            warn!("Skipping line {}: '{}' is not a valid ISIN for '{}'", index + 2, expected_isin, company_name);
            continue;
        }

        records.push(InputRecord::new(company_name, expected_isin));
    }

    Ok(records)
}

/// Knobs for a batch run
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Pause between consecutive records
    pub request_delay: Duration,
    /// Discard and recreate the browser session between records
    pub isolate_sessions: bool,
    /// Rewrite the matches-so-far file every this many records (0 disables)
    pub flush_interval: usize,
    /// Process only the first N records
    pub limit: Option<usize>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(2),
            isolate_sessions: true,
            flush_interval: 10,
            limit: None,
        }
    }
}

/// Result of a batch run
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One finalized record per processed input, in input order
    pub records: Vec<MatchRecord>,
    pub counts: StatusCounts,
    /// Records left unprocessed because of an interrupt
    pub skipped: usize,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn matched(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.iter().filter(|r| r.is_matched())
    }

    pub fn was_interrupted(&self) -> bool {
        self.skipped > 0
    }
}

/// Drives records through search, extraction and evaluation, one at a time
pub struct BatchDriver<F: SessionFactory> {
    factory: F,
    locator: LocatorSettings,
    settings: BatchSettings,
    partial_output: Option<PathBuf>,
    interrupt: Option<Arc<AtomicBool>>,
    logger: Option<Arc<RunLogger>>,
}

impl<F: SessionFactory> BatchDriver<F> {
    pub fn new(factory: F, locator: LocatorSettings, settings: BatchSettings) -> Self {
        Self {
            factory,
            locator,
            settings,
            partial_output: None,
            interrupt: None,
            logger: None,
        }
    }

    /// Rewrite this CSV with the matches so far every `flush_interval` records
    pub fn with_partial_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.partial_output = Some(path.into());
        self
    }

    /// Stop before the next record once this flag is set
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn with_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Borrow the live session, opening a fresh one if the slot is empty.
    async fn acquire_session<'a>(
        &self,
        slot: &'a mut Option<Box<dyn BrowserSession>>,
    ) -> Result<&'a mut dyn BrowserSession, BrowserError> {
        let session = match slot.take() {
            Some(session) => session,
            None => self.factory.new_isolated_session().await?,
        };
        Ok(&mut **slot.insert(session))
    }

    async fn release_session(slot: &mut Option<Box<dyn BrowserSession>>) {
        if let Some(session) = slot.take() {
            if let Err(e) = session.close_session().await {
                warn!("Failed to close browser session: {}", e);
            }
        }
    }

    fn flush_partial(&self, records: &[MatchRecord]) {
        let Some(path) = &self.partial_output else {
            return;
        };
        match export::write_matches_csv(records, path) {
            Ok(count) => debug!("Saved {} match(es) so far to {}", count, path.display()),
            Err(e) => warn!("Failed to save partial matches to {}: {:#}", path.display(), e),
        }
    }

    /// Process records in order, returning one finalized record per processed input
    pub async fn run(&self, records: &[InputRecord]) -> BatchOutcome {
        let started = Instant::now();
        let selected = match self.settings.limit {
            Some(limit) => &records[..limit.min(records.len())],
            None => records,
        };

        info!("Processing {} of {} record(s)", selected.len(), records.len());
        if let Some(logger) = &self.logger {
            logger.start_progress(selected.len() as u64).await;
        }

        let mut results: Vec<MatchRecord> = Vec::with_capacity(selected.len());
        let mut counts = StatusCounts::default();
        let mut session: Option<Box<dyn BrowserSession>> = None;

        for (index, input) in selected.iter().enumerate() {
            if self.interrupted() {
                warn!("Interrupted; stopping before record {} of {}", index + 1, selected.len());
                break;
            }

            if index > 0 {
                if self.settings.isolate_sessions {
                    Self::release_session(&mut session).await;
                }
                tokio::time::sleep(self.settings.request_delay).await;
            }

            if let Some(logger) = &self.logger {
                logger
                    .update_progress(&format!("[{}/{}] {}", index + 1, selected.len(), input.company_name))
                    .await;
            }

            let record = match self.acquire_session(&mut session).await {
                Ok(active) => process_record(active, &self.locator, input).await,
                Err(e) => {
                    warn!("Could not open browser session for '{}': {}", input.company_name, e);
                    MatchRecord::pending(input).fail(format!("browser session unavailable: {}", e))
                }
            };

            counts.record(record.status);
            if let Some(logger) = &self.logger {
                logger.log_record_outcome(index + 1, selected.len(), &record);
                logger.advance_progress(1).await;
            }
            results.push(record);

            if self.settings.flush_interval > 0 && results.len() % self.settings.flush_interval == 0 {
                self.flush_partial(&results);
            }
        }

        Self::release_session(&mut session).await;

        let skipped = selected.len() - results.len();
        if let Some(logger) = &self.logger {
            let message = if skipped > 0 {
                format!("Stopped after {} record(s); {} not processed", results.len(), skipped)
            } else {
                format!("Processed {} record(s)", results.len())
            };
            logger.finish_progress(&message).await;
        }

        BatchOutcome {
            records: results,
            counts,
            skipped,
            elapsed: started.elapsed(),
        }
    }
}
