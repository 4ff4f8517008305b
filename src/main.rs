use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use isinfinder::batch::{load_input_records, BatchDriver};
use isinfinder::browser::ChromeSessionFactory;
use isinfinder::cli::Cli;
use isinfinder::config::{AppConfig, ConfigError};
use isinfinder::export::{persist_outcome, OutputPaths};
use isinfinder::logger::{RunLogger, VerbosityLevel};

fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            // Usage errors exit 1 rather than clap's default 2
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> AppConfig {
    match AppConfig::load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(ConfigError::FileNotFound(path)) => match AppConfig::prompt_create_config(&path) {
            Ok(Some(created_path)) => {
                println!("✅ Created default configuration file at: {}", created_path.display());
                AppConfig::load_from_path(&created_path).unwrap_or_else(|e| {
                    eprintln!("❌ Configuration error: {}", e);
                    std::process::exit(1);
                })
            }
            Ok(None) => {
                eprintln!("⚠️  Configuration file not found at {}; using built-in defaults.", path.display());
                eprintln!("   Run with --init to create a default configuration file.");
                AppConfig::embedded_default().unwrap_or_else(|e| {
                    eprintln!("❌ Built-in configuration is invalid: {}", e);
                    std::process::exit(1);
                })
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli();

    if cli.init {
        match AppConfig::create_default_config_at(&cli.config) {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run isinfinder again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let logger = Arc::new(match &cli.log_file {
        Some(log_file_path) => RunLogger::with_log_file(verbosity, log_file_path.clone()),
        None => RunLogger::new(verbosity),
    });

    // Events print above the progress bar instead of through it
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity.tracing_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(logger.tracing_writer())
        .init();

    let mut app_config = load_config(&cli);
    cli.apply_overrides(&mut app_config);

    // First Ctrl-C stops at the next record boundary; a second one exits immediately
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            eprintln!("\n⚠️  Force exiting (results for this run were not saved).");
            std::process::exit(130); // 128 + SIGINT
        }
        eprintln!("\n⚠️  Interrupt received. Finishing the current record, then saving results...");
    })
    .unwrap_or_else(|e| {
        eprintln!("⚠️  Warning: Failed to set Ctrl-C handler: {}. Interrupt signals may not be handled gracefully.", e);
    });

    let records = match load_input_records(&cli.input) {
        Ok(records) => records,
        Err(e) => {
            logger.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };
    if records.is_empty() {
        logger.info(&format!("No usable records in {}", cli.input.display()));
    }

    let paths = OutputPaths::in_dir(
        &cli.output_dir(),
        &app_config.output.results_json,
        &app_config.output.matches_csv,
    );

    logger.info(&format!(
        "Matching {} record(s) from {} ({} browser)",
        cli.record_limit().map_or(records.len(), |limit| limit.min(records.len())),
        cli.input.display(),
        if app_config.browser.headless { "headless" } else { "headed" }
    ));

    let factory = ChromeSessionFactory::new(app_config.launch_settings());
    let driver = BatchDriver::new(
        factory,
        app_config.locator_settings(),
        app_config.batch_settings(cli.record_limit()),
    )
    .with_partial_output(paths.matches_csv.clone())
    .with_interrupt(Arc::clone(&interrupted))
    .with_logger(Arc::clone(&logger));

    let outcome = driver.run(&records).await;

    let report = persist_outcome(&outcome, &paths);
    if report.results_json {
        logger.record_output_file(&paths.results_json);
    }
    if report.matches_csv {
        logger.record_output_file(&paths.matches_csv);
    }

    logger.print_final_summary(&outcome);

    if let Err(e) = logger.export_logs() {
        eprintln!("⚠️  Failed to write log file: {}", e);
    }

    if outcome.was_interrupted() {
        std::process::exit(130);
    }
    Ok(())
}
