//! Merge-and-deduplicate persistence for scraped media catalogs.
//!
//! Scrapers hand over loosely shaped records; this crate canonicalizes them,
//! reconciles them with the last persisted collection by natural key, and
//! writes the result back without ever losing known-good data.

pub mod config;
pub mod error;
pub mod extract;
pub mod flags;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod scraper;
pub mod store;
pub mod utils;

pub use merge::{MergeOptions, MergeOutcome, MergeReport, Merger};
pub use models::{KeySpec, MediaKind, NaturalKey, Record, RecordSchema};
pub use normalize::{canonicalize, normalize_collection, normalize_objects};
