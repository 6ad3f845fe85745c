//! # hymnal
//!
//! Indexes a hymnal slide-deck archive and keeps per-hymn usage statistics.
//!
//! ## Architecture
//!
//! - **catalog**: Archive enumeration and the per-category hymn index
//! - **equivalence**: Pairing of English and Tagalog editions of a hymn
//! - **stats**: Self-healing JSON statistics file
//! - **query**: Search input → hymn details, suggestions, stepping and the statistics table
//! - **recorder**: Background thread that debounces query recording
//! - **extract**: Copies a hymn's presentation out of the archive
//! - **recent**: Housekeeping of extracted presentations
//! - **report**: Database summary and CSV export
//! - **session**: Catalog, statistics and equivalence rule bundled for one run

pub mod catalog;
pub mod cli;
pub mod config;
pub mod equivalence;
pub mod error;
pub mod extract;
pub mod query;
pub mod recent;
pub mod recorder;
pub mod report;
pub mod session;
pub mod stats;
