//! Registry Health Scanner Library
//!
//! Extracts active companies from a public company registry, parses their
//! balance-sheet history and ranks them by a composite financial-health score.
//!
//! # Modules
//!
//! - `core`: Parsing and scoring, free of I/O.
//! - `integrations`: Registry API access.
//! - `checkpoint`: Persisted run state for resuming.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `extraction`: Search and detail-fetch workflow.
//! - `financials`: Balance-sheet parsing.
//! - `models`: Core data models.
//! - `quota`: Monthly request budget.
//! - `registry_client`: Registry HTTP client with retry and backoff.
//! - `reporting`: CSV, summary and error-log outputs.
//! - `retry`: Backoff policy.
//! - `scoring`: Composite health scoring.

pub mod core;
pub mod integrations;

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod extraction;
pub mod financials;
pub mod models;
pub mod quota;
pub mod registry_client;
pub mod reporting;
pub mod retry;
pub mod scoring;
