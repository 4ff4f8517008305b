use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::batch::BatchOutcome;
use crate::record::{MatchRecord, StatusCounts};

/// Header of the matches CSV
pub const MATCHES_CSV_HEADER: [&str; 3] = ["Company Name", "ISIN Code", "GuruFocus URL"];

/// Replace `path` with `bytes` via a temp file and rename, so readers never see a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Render matched records as CSV: header plus one row per match.
pub fn render_matches_csv(records: &[MatchRecord]) -> Result<Vec<u8>> {
    let mut wtr = Writer::from_writer(Vec::new());
    wtr.write_record(MATCHES_CSV_HEADER)?;

    for record in records.iter().filter(|r| r.is_matched()) {
        wtr.write_record([
            record.company_name.as_str(),
            record.found_isin.as_deref().unwrap_or(&record.expected_isin),
            record.matching_url.as_deref().unwrap_or_default(),
        ])?;
    }

    wtr.into_inner().map_err(|e| anyhow::anyhow!("Failed to finish CSV buffer: {}", e))
}

/// Write the matches CSV, replacing the whole file. Returns the number of data rows.
pub fn write_matches_csv(records: &[MatchRecord], output_path: &Path) -> Result<usize> {
    let bytes = render_matches_csv(records)?;
    write_atomic(output_path, &bytes)?;
    let count = records.iter().filter(|r| r.is_matched()).count();
    debug!("Wrote {} match row(s) to {}", count, output_path.display());
    Ok(count)
}

/// Structured dump of a full run
#[derive(Debug, Serialize)]
pub struct ResultsDump<'a> {
    pub timestamp: DateTime<Utc>,
    pub total_processed: usize,
    pub counts: StatusCounts,
    pub results: &'a [MatchRecord],
}

impl<'a> ResultsDump<'a> {
    pub fn new(records: &'a [MatchRecord]) -> Self {
        let counts = StatusCounts::tally(records);
        Self {
            timestamp: Utc::now(),
            total_processed: records.len(),
            counts,
            results: records,
        }
    }
}

pub fn write_results_json(records: &[MatchRecord], output_path: &Path) -> Result<()> {
    let dump = ResultsDump::new(records);
    let json = serde_json::to_string_pretty(&dump).context("Failed to serialize results")?;
    write_atomic(output_path, json.as_bytes())?;
    debug!("Wrote {} result(s) to {}", records.len(), output_path.display());
    Ok(())
}

/// Where final outputs go
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub results_json: PathBuf,
    pub matches_csv: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path, results_json: &str, matches_csv: &str) -> Self {
        Self {
            results_json: dir.join(results_json),
            matches_csv: dir.join(matches_csv),
        }
    }
}

/// Which final outputs were written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistReport {
    pub results_json: bool,
    pub matches_csv: bool,
}

/// Write both final outputs. Failures are logged and reported, never raised.
pub fn persist_outcome(outcome: &BatchOutcome, paths: &OutputPaths) -> PersistReport {
    let results_json = match write_results_json(&outcome.records, &paths.results_json) {
        Ok(()) => {
            info!("Saved results to {}", paths.results_json.display());
            true
        }
        Err(e) => {
            warn!("Failed to save results to {}: {:#}", paths.results_json.display(), e);
            false
        }
    };

    let matches_csv = match write_matches_csv(&outcome.records, &paths.matches_csv) {
        Ok(count) => {
            info!("Saved {} match(es) to {}", count, paths.matches_csv.display());
            true
        }
        Err(e) => {
            warn!("Failed to save matches to {}: {:#}", paths.matches_csv.display(), e);
            false
        }
    };

    PersistReport { results_json, matches_csv }
}
