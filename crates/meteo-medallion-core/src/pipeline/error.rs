use std::time::Duration;

use snafu::{Backtrace, prelude::*};

use crate::{
    aggregate::AggregateError, config::ConfigError, extract::ExtractError, load::LoadError,
    table::TableError,
};

/// Errors surfaced by a pipeline step.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// Fetching a raw dataset failed.
    #[snafu(display("Extracting {dataset} for {city} failed: {source}"))]
    Extract {
        /// Raw dataset.
        dataset: String,
        /// City requested.
        city: String,
        /// Underlying extraction error.
        #[snafu(source, backtrace)]
        source: ExtractError,
    },

    /// Writing a dataset failed.
    #[snafu(display("Loading {dataset} for {city} failed: {source}"))]
    Load {
        /// Destination dataset.
        dataset: String,
        /// City written.
        city: String,
        /// Underlying load error.
        #[snafu(source, backtrace)]
        source: LoadError,
    },

    /// Reading an upstream dataset failed.
    #[snafu(display("Reading {path} failed: {source}"))]
    Read {
        /// Table path read.
        path: String,
        /// Underlying table error.
        #[snafu(source, backtrace)]
        source: TableError,
    },

    /// An aggregation step failed.
    #[snafu(display("Building {dataset} for {city} failed: {source}"))]
    Aggregate {
        /// Dataset being built.
        dataset: String,
        /// City processed.
        city: String,
        /// Underlying aggregation error.
        #[snafu(source, backtrace)]
        source: AggregateError,
    },

    /// Tagging or filtering a batch failed.
    #[snafu(display("Preparing {dataset} for {city} failed: {source}"))]
    Prepare {
        /// Dataset being prepared.
        dataset: String,
        /// City processed.
        city: String,
        /// Underlying Arrow error.
        source: arrow::error::ArrowError,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },

    /// An operation exceeded its time budget.
    #[snafu(display("{operation} timed out after {timeout:?}"))]
    TimedOut {
        /// What was running.
        operation: String,
        /// Budget that expired.
        timeout: Duration,
    },

    /// The extractors could not be set up.
    #[snafu(display("Failed to set up extractors: {source}"))]
    Setup {
        /// Underlying extraction error.
        source: ExtractError,
    },

    /// The pipeline could not be configured.
    #[snafu(display("Invalid pipeline configuration: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },
}

impl PipelineError {
    /// Concurrent-write conflicts and transient upstream failures are worth
    /// another attempt; everything else, timeouts included, is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Extract { source, .. } => source.is_retryable(),
            PipelineError::Load { source, .. } => source.is_retryable(),
            PipelineError::Read { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
