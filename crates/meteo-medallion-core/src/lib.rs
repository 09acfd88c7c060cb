//! Core engine for a medallion pipeline over environmental time series.
//!
//! This crate provides:
//!
//! - A transactional, partition-aware table store over Parquet files with an
//!   append-only commit log and version-guard optimistic concurrency
//!   (`transaction_log`, `table` and `storage` modules).
//! - Idempotent load strategies (merge-upsert, delete-insert,
//!   insert-overwrite) bound to a medallion layer (`load` module).
//! - HTTP extractors for hourly weather, air quality and nearby stations
//!   (`extract` module).
//! - Pure aggregations from raw observations to daily summaries, hourly
//!   profiles and scored forecasts (`aggregate` module).
//! - The orchestrator running the raw, enriched and curated layers per city
//!   with bounded concurrency, retries and per-dataset reporting
//!   (`pipeline` module).
//!
//! The CLI crate only parses configuration and calls into [`pipeline`].
#![deny(missing_docs)]
pub mod aggregate;
pub mod batch;
pub mod config;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod predicate;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod table;
pub mod transaction_log;
