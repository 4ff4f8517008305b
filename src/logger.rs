use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing_subscriber::fmt::MakeWriter;

use crate::batch::BatchOutcome;
use crate::record::{MatchRecord, MatchStatus};

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,   // Only progress bar and final summary
    Summary = 1,  // One line per record (default)
    Detailed = 2, // Per-record details and warnings
    Debug = 3,    // Everything
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default `tracing` filter directive for this level
    pub fn tracing_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "error",
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

/// Console reporting for a batch run: progress bar, per-record lines,
/// an optional log file and the final summary.
#[derive(Clone)]
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    run_metadata: Arc<Mutex<RunMetadata>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<PathBuf>,
}

#[derive(Default, Clone)]
struct RunMetadata {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    output_files: Vec<PathBuf>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            run_metadata: Arc::new(Mutex::new(RunMetadata::default())),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: Some(log_file_path.into()),
            ..Self::new(verbosity)
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    /// Errors are shown at every verbosity
    pub fn error(&self, message: &str) {
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let msg = format!("[{}] {}: {}", timestamp, level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        // Print above an active progress bar so it keeps its position
        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub async fn start_progress(&self, total_records: u64) {
        let pb = if self.verbosity == VerbosityLevel::Debug {
            // Debug output scrolls too fast for a bar to be useful
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total_records)
        };

        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message("Starting...");

        *self.progress_bar.write().await = Some(pb);

        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.start_time = Some(Instant::now());
        }
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self, steps: u64) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(steps);
        }
    }

    pub async fn finish_progress(&self, final_message: &str) {
        if let Some(pb) = self.progress_bar.write().await.take() {
            pb.finish_and_clear();
        }

        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.end_time = Some(Instant::now());
        }

        self.info(final_message);
    }

    /// One line per finalized record; matches at the default level, the rest with -v
    pub fn log_record_outcome(&self, position: usize, total: usize, record: &MatchRecord) {
        let prefix = format!("[{}/{}] {}", position, total, record.company_name);
        match record.status {
            MatchStatus::Matched => self.info(&format!(
                "{}: matched {} at {}",
                prefix,
                record.expected_isin,
                record.matching_url.as_deref().unwrap_or_default()
            )),
            MatchStatus::NoMatch => match &record.found_isin {
                Some(found) => self.warn(&format!(
                    "{}: no match (expected {}, last seen {})",
                    prefix, record.expected_isin, found
                )),
                None => self.warn(&format!("{}: no match (no ISIN found on any candidate)", prefix)),
            },
            MatchStatus::NoResults => self.warn(&format!("{}: no search results", prefix)),
            MatchStatus::Error => self.error(&format!(
                "{}: {}",
                prefix,
                record.error_detail.as_deref().unwrap_or("unknown error")
            )),
            MatchStatus::Pending => self.debug(&format!("{}: still pending", prefix)),
        }
    }

    pub fn record_output_file(&self, path: &Path) {
        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.output_files.push(path.to_path_buf());
        }
    }

    /// Writer for the `tracing` subscriber that shares this logger's progress bar
    pub fn tracing_writer(&self) -> ProgressAwareWriter {
        ProgressAwareWriter { progress_bar: Arc::clone(&self.progress_bar) }
    }

    fn run_duration(&self) -> Option<Duration> {
        let metadata = self.run_metadata.lock().ok()?;
        match (metadata.start_time, metadata.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Final summary, printed to stdout at every verbosity
    pub fn print_final_summary(&self, outcome: &BatchOutcome) {
        let counts = &outcome.counts;

        // Clear any leftover progress bar line
        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== ISIN MATCHING SUMMARY ===");
        let duration = self.run_duration().unwrap_or(outcome.elapsed);
        println!("Run Duration: {:.2}s", duration.as_secs_f64());
        println!("Records Processed: {}", counts.total());
        println!("  Matched:    {}", counts.matched);
        println!("  No Match:   {}", counts.no_match);
        println!("  No Results: {}", counts.no_results);
        println!("  Errors:     {}", counts.error);
        if outcome.was_interrupted() {
            println!("Not Processed (interrupted): {}", outcome.skipped);
        }

        let matched: Vec<&MatchRecord> = outcome.matched().collect();
        if !matched.is_empty() {
            println!("\nMatches:");
            for record in matched {
                println!(
                    "  {} -> {} ({})",
                    record.company_name,
                    record.expected_isin,
                    record.matching_url.as_deref().unwrap_or_default()
                );
            }
        }

        if let Ok(metadata) = self.run_metadata.lock() {
            for path in &metadata.output_files {
                println!("Results Exported: {}", path.display());
            }
        }

        println!("=============================\n");

        if counts.matched > 0 {
            println!("✅ Run completed. {} of {} companies matched.", counts.matched, counts.total());
        } else {
            println!("✅ Run completed. No companies matched.");
        }
    }

    /// Write every buffered message to the log file, if one was requested
    pub fn export_logs(&self) -> io::Result<()> {
        let Some(log_file_path) = &self.log_file_path else {
            return Ok(());
        };
        let Ok(buffer) = self.log_buffer.lock() else {
            return Ok(());
        };

        if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file_path)?;

        for log_entry in buffer.iter() {
            writeln!(file, "{}", log_entry)?;
        }
        file.flush()
    }
}

/// `tracing` output that keeps a drawing progress bar intact.
///
/// Each event is buffered and written to stderr once complete, with the bar
/// suspended while the line is printed.
#[derive(Clone)]
pub struct ProgressAwareWriter {
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
}

impl<'a> MakeWriter<'a> for ProgressAwareWriter {
    type Writer = ProgressAwareLine;

    fn make_writer(&'a self) -> Self::Writer {
        let progress_bar = self.progress_bar.try_read().ok().and_then(|guard| guard.as_ref().cloned());
        ProgressAwareLine { progress_bar, buffer: Vec::new() }
    }
}

/// One buffered `tracing` event
pub struct ProgressAwareLine {
    progress_bar: Option<ProgressBar>,
    buffer: Vec<u8>,
}

impl Write for ProgressAwareLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ProgressAwareLine {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let _ = emit_line(self.progress_bar.as_ref(), &self.buffer, &mut io::stderr());
    }
}

fn emit_line(progress_bar: Option<&ProgressBar>, line: &[u8], out: &mut impl Write) -> io::Result<()> {
    match progress_bar {
        Some(pb) => pb.suspend(|| out.write_all(line).and_then(|_| out.flush())),
        None => out.write_all(line).and_then(|_| out.flush()),
    }
}
