//! End-to-end batch runs against the in-memory browser.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use common::{fast_batch_settings, locator_settings, FakePage, FakeSessionFactory, FakeWeb};
use isinfinder::batch::{parse_input_csv, BatchDriver, BatchSettings};
use isinfinder::export::write_matches_csv;
use isinfinder::{InputRecord, MatchStatus};

fn acme_beta_web() -> FakeWeb {
    FakeWeb::new()
        .search_results("Acme Corp", &["/stock/ACME/summary"])
        .page(
            "https://stocks.test/stock/ACME/summary",
            FakePage::with_text("Acme Corp (ACME)\nExchange NYSE\nISIN: US0000011111"),
        )
        .search_results("Beta Inc", &[])
}

fn acme_beta_input() -> Vec<InputRecord> {
    vec![
        InputRecord::new("Acme Corp", "US0000011111"),
        InputRecord::new("Beta Inc", "GB0000022222"),
    ]
}

#[tokio::test]
async fn test_acme_matches_and_beta_has_no_results() {
    let (factory, _log) = FakeSessionFactory::new(acme_beta_web());
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let outcome = driver.run(&acme_beta_input()).await;

    assert_eq!(outcome.records.len(), 2);
    let acme = &outcome.records[0];
    assert_eq!(acme.status, MatchStatus::Matched);
    assert_eq!(acme.found_isin.as_deref(), Some("US0000011111"));
    assert_eq!(acme.matching_url.as_deref(), Some("https://stocks.test/stock/ACME/summary"));

    let beta = &outcome.records[1];
    assert_eq!(beta.status, MatchStatus::NoResults);
    assert!(beta.found_isin.is_none());
    assert!(beta.matching_url.is_none());

    assert_eq!(outcome.counts.matched, 1);
    assert_eq!(outcome.counts.no_results, 1);
    assert!(!outcome.was_interrupted());

    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("matches.csv");
    assert_eq!(write_matches_csv(&outcome.records, &csv_path).unwrap(), 1);
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Company Name,ISIN Code,GuruFocus URL");
    assert!(lines[1].starts_with("Acme Corp,US0000011111,"));
}

#[tokio::test]
async fn test_rerun_gives_identical_decisions() {
    let (factory, _log) = FakeSessionFactory::new(acme_beta_web());
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let first = driver.run(&acme_beta_input()).await;
    let second = driver.run(&acme_beta_input()).await;

    let decisions = |records: &[isinfinder::MatchRecord]| -> Vec<(MatchStatus, Option<String>)> {
        records.iter().map(|r| (r.status, r.found_isin.clone())).collect()
    };
    assert_eq!(decisions(&first.records), decisions(&second.records));
}

#[tokio::test]
async fn test_wrong_listing_first_then_match() {
    let web = FakeWeb::new()
        .search_results("Acme Corp", &["/stock/ACME.L/summary", "/stock/ACME.X/summary", "/stock/ACME/summary"])
        .page(
            "https://stocks.test/stock/ACME.L/summary",
            FakePage::with_text("Acme Corp London\nISIN: GB0000099999"),
        )
        .failing("https://stocks.test/stock/ACME.X/summary")
        .page(
            "https://stocks.test/stock/ACME/summary",
            FakePage::with_text("Acme Corp\nidentifier US0000011111 listed"),
        );
    let (factory, log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let outcome = driver.run(&[InputRecord::new("Acme Corp", "US0000011111")]).await;

    let record = &outcome.records[0];
    assert_eq!(record.status, MatchStatus::Matched);
    assert_eq!(record.matching_url.as_deref(), Some("https://stocks.test/stock/ACME/summary"));
    assert_eq!(
        log.navigations(),
        vec![
            "https://stocks.test/search?s=Acme%20Corp",
            "https://stocks.test/stock/ACME.L/summary",
            "https://stocks.test/stock/ACME.X/summary",
            "https://stocks.test/stock/ACME/summary",
        ]
    );
}

#[tokio::test]
async fn test_no_match_reports_last_seen_isin() {
    let web = FakeWeb::new()
        .search_results("Gamma AG", &["/stock/GAM1/summary", "/stock/GAM2/summary"])
        .page("https://stocks.test/stock/GAM1/summary", FakePage::with_text("ISIN: DE0000055555"))
        .page("https://stocks.test/stock/GAM2/summary", FakePage::with_text("No identifiers here"));
    let (factory, _log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let outcome = driver.run(&[InputRecord::new("Gamma AG", "DE0000033333")]).await;

    let record = &outcome.records[0];
    assert_eq!(record.status, MatchStatus::NoMatch);
    assert_eq!(record.found_isin.as_deref(), Some("DE0000055555"));
    assert!(record.matching_url.is_none());
}

#[tokio::test]
async fn test_element_scan_finds_isin_missing_from_rendered_text() {
    let web = FakeWeb::new()
        .search_results("Delta plc", &["/stock/DLT/summary"])
        .page(
            "https://stocks.test/stock/DLT/summary",
            FakePage::with_text("Delta plc\nOverview")
                .with_nodes("td", &["Market cap", "1.2B"])
                .with_nodes("div", &["Identifiers", "GB0000044444"]),
        );
    let (factory, _log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let outcome = driver.run(&[InputRecord::new("Delta plc", "GB0000044444")]).await;

    assert_eq!(outcome.records[0].status, MatchStatus::Matched);
}

#[tokio::test]
async fn test_failed_search_is_error_and_run_continues() {
    let web = acme_beta_web().failing_search("Beta Inc");
    let (factory, _log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let input = vec![
        InputRecord::new("Beta Inc", "GB0000022222"),
        InputRecord::new("Acme Corp", "US0000011111"),
    ];
    let outcome = driver.run(&input).await;

    assert_eq!(outcome.records[0].status, MatchStatus::Error);
    assert!(outcome.records[0]
        .error_detail
        .as_deref()
        .unwrap_or_default()
        .starts_with("search failed"));
    assert_eq!(outcome.records[1].status, MatchStatus::Matched);
    assert_eq!(outcome.counts.error, 1);
}

#[tokio::test]
async fn test_unavailable_browser_marks_every_record_as_error() {
    let (factory, log) = FakeSessionFactory::refusing();
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    let outcome = driver.run(&acme_beta_input()).await;

    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records.iter().all(|r| r.status == MatchStatus::Error));
    assert!(outcome.records[0]
        .error_detail
        .as_deref()
        .unwrap_or_default()
        .contains("browser session unavailable"));
    assert_eq!(log.opened(), 0);
}

#[tokio::test]
async fn test_isolated_sessions_are_recreated_per_record() {
    let (factory, log) = FakeSessionFactory::new(acme_beta_web());
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings());

    driver.run(&acme_beta_input()).await;

    assert_eq!(log.opened(), 2);
    assert_eq!(log.closed(), 2);
}

#[tokio::test]
async fn test_shared_session_when_isolation_disabled() {
    let (factory, log) = FakeSessionFactory::new(acme_beta_web());
    let settings = BatchSettings {
        isolate_sessions: false,
        ..fast_batch_settings()
    };
    let driver = BatchDriver::new(factory, locator_settings(), settings);

    driver.run(&acme_beta_input()).await;

    assert_eq!(log.opened(), 1);
    assert_eq!(log.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_delay_separates_records() {
    let web = acme_beta_web().search_results("Gamma AG", &[]);
    let input = vec![
        InputRecord::new("Acme Corp", "US0000011111"),
        InputRecord::new("Beta Inc", "GB0000022222"),
        InputRecord::new("Gamma AG", "DE0000033333"),
    ];
    let delay = Duration::from_secs(2);
    let settings = BatchSettings {
        request_delay: delay,
        ..BatchSettings::default()
    };
    let (factory, log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), settings);

    let started = Instant::now();
    let outcome = driver.run(&input).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.records.len(), 3);
    assert_eq!(log.opened(), 3);
    // Two gaps for three records, none before the first or after the last
    assert!(elapsed >= delay * 2, "elapsed {:?}", elapsed);
    assert!(elapsed < delay * 3, "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_single_record_runs_without_delay() {
    let settings = BatchSettings {
        request_delay: Duration::from_secs(2),
        ..BatchSettings::default()
    };
    let (factory, _log) = FakeSessionFactory::new(acme_beta_web());
    let driver = BatchDriver::new(factory, locator_settings(), settings);

    let started = Instant::now();
    let outcome = driver.run(&[InputRecord::new("Acme Corp", "US0000011111")]).await;

    assert_eq!(outcome.records[0].status, MatchStatus::Matched);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_limit_caps_processed_records() {
    let (factory, log) = FakeSessionFactory::new(acme_beta_web());
    let settings = BatchSettings {
        limit: Some(1),
        ..fast_batch_settings()
    };
    let driver = BatchDriver::new(factory, locator_settings(), settings);

    let outcome = driver.run(&acme_beta_input()).await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].company_name, "Acme Corp");
    assert!(!outcome.was_interrupted());
    assert!(!log.navigations().iter().any(|url| url.contains("Beta")));
}

#[tokio::test]
async fn test_interrupt_stops_before_next_record() {
    let (factory, log) = FakeSessionFactory::new(acme_beta_web());
    let flag = Arc::new(AtomicBool::new(true));
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings()).with_interrupt(flag);

    let outcome = driver.run(&acme_beta_input()).await;

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.was_interrupted());
    assert_eq!(log.opened(), 0);
}

#[tokio::test]
async fn test_partial_matches_flushed_every_ten_records() {
    let mut web = FakeWeb::new();
    let mut csv = String::from("Company Name,ISIN\n");
    for i in 0..12 {
        let company = format!("Company {:02}", i);
        let isin = format!("US00000{:05}", i);
        let path = format!("/stock/C{:02}/summary", i);
        web = web.search_results(&company, &[path.as_str()]).page(
            &format!("https://stocks.test{}", path),
            FakePage::with_text(&format!("ISIN: {}", isin)),
        );
        csv.push_str(&format!("{},{}\n", company, isin));
    }
    let input = parse_input_csv(&csv).unwrap();
    assert_eq!(input.len(), 12);

    let dir = TempDir::new().unwrap();
    let partial = dir.path().join("partial.csv");
    let (factory, _log) = FakeSessionFactory::new(web);
    let driver = BatchDriver::new(factory, locator_settings(), fast_batch_settings()).with_partial_output(&partial);

    let outcome = driver.run(&input).await;
    assert_eq!(outcome.counts.matched, 12);

    // Flushed after record 10 only; the final write belongs to the caller
    let content = std::fs::read_to_string(&partial).unwrap();
    assert_eq!(content.lines().count(), 11);
    assert!(content.contains("Company 09"));
    assert!(!content.contains("Company 10"));
}
