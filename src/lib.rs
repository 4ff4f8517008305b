//! isinfinder: match company names to stock-detail pages by the ISIN each page shows.
//!
//! A record flows search page → candidate links ([`locator`]) → per-candidate
//! ISIN extraction ([`extract`]) → decision ([`matcher`]), driven one record
//! at a time by [`batch`].

pub mod batch;
pub mod browser;
pub mod cli;
pub mod config;
pub mod export;
pub mod extract;
pub mod locator;
pub mod logger;
pub mod matcher;
pub mod record;

pub use batch::{BatchDriver, BatchOutcome, BatchSettings};
pub use record::{Candidate, InputRecord, MatchRecord, MatchStatus};
