use clap::Parser;
use std::path::PathBuf;

use crate::config::{AppConfig, CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "isinfinder")]
#[command(about = "Match company names to their stock pages by verifying the ISIN shown on each page")]
#[command(version)]
pub struct Cli {
    /// Number of records to process (0 processes all)
    #[arg(value_name = "COUNT", required_unless_present = "init")]
    pub count: Option<usize>,

    /// Input CSV with a header line and columns: company name, expected ISIN
    #[arg(short, long, value_name = "FILE", default_value = "companies.csv")]
    pub input: PathBuf,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Directory for the results JSON and matches CSV (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Delay between records in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Reuse one browser session for every record
    #[arg(long)]
    pub no_isolate: bool,

    /// Write all log messages to this file as well
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Verbose logging (use -v for per-record details, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Create the default configuration file and exit
    #[arg(long)]
    pub init: bool,
}

impl Cli {
    /// Record cap for the batch driver; 0 or absent means no cap
    pub fn record_limit(&self) -> Option<usize> {
        self.count.filter(|&count| count > 0)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply command-line overrides on top of file configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if self.headed {
            config.browser.headless = false;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.batch.request_delay_ms = delay_ms;
        }
        if self.no_isolate {
            config.batch.isolate_sessions = false;
        }
    }
}
