//! Proxy module for validating proxies
//!
//! This module provides functionality for:
//! - Probing a candidate across an ordered list of protocols with retries
//! - Validating large candidate sets under a global concurrency ceiling
//! - Persisting valid proxies atomically while probing is still running
//! - Running complete validation cycles over file or scraped candidates

pub mod crawler;
pub mod cycle;
pub mod engine;
pub mod models;
pub mod parser;
pub mod probe;
pub mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use crawler::{CrawlerConfig, ProxyCrawler, ScrapeSource};
pub use cycle::{CandidateSource, CycleController, CycleReport};
pub use engine::{BatchSummary, EngineCounters, Progress, ValidationEngine};
pub use models::{Candidate, ProbeOutcome, ProtocolFilter, ProtocolKind};
pub use parser::{CandidateParser, FileSource};
pub use probe::{HttpTransport, ProbeConfig, ProbeExecutor, ProbeTransport};
pub use store::{PersistedResultSet, ResultStore, RunLogs};
