//! Per-city, per-dataset outcomes of a pipeline run.
use std::fmt;

use crate::{load::Layer, pipeline::PipelineError};

/// What happened to one dataset for one city.
#[derive(Debug)]
pub enum OutcomeStatus {
    /// Rows were committed.
    Written {
        /// Table version after the write.
        version: u64,
        /// Rows written.
        rows: usize,
    },
    /// Nothing to write; not an error.
    Skipped {
        /// Why the write was skipped.
        reason: String,
    },
    /// The step failed after any retries.
    Failed(PipelineError),
}

impl OutcomeStatus {
    /// True for [`OutcomeStatus::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, OutcomeStatus::Failed(_))
    }
}

/// One line of a [`RunReport`].
#[derive(Debug)]
pub struct DatasetOutcome {
    /// Layer written.
    pub layer: Layer,
    /// City processed.
    pub city: String,
    /// Dataset (location) written.
    pub dataset: String,
    /// Attempts made, retries included.
    pub attempts: u32,
    /// Final status.
    pub status: OutcomeStatus,
}

impl fmt::Display for DatasetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} [{}] ", self.layer, self.dataset, self.city)?;
        match &self.status {
            OutcomeStatus::Written { version, rows } => {
                write!(f, "written: {rows} rows at version {version}")?
            }
            OutcomeStatus::Skipped { reason } => write!(f, "skipped: {reason}")?,
            OutcomeStatus::Failed(e) => write!(f, "FAILED: {e}")?,
        }
        if self.attempts > 1 {
            write!(f, " ({} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

/// Outcomes of a run, ordered by layer, city and dataset.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<DatasetOutcome>,
}

impl RunReport {
    /// Add outcomes, keeping the report ordered.
    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = DatasetOutcome>) {
        self.outcomes.extend(outcomes);
        self.outcomes.sort_by(|a, b| {
            (a.layer, &a.city, &a.dataset).cmp(&(b.layer, &b.city, &b.dataset))
        });
    }

    /// Append another report.
    pub fn absorb(&mut self, other: RunReport) {
        self.extend(other.outcomes);
    }

    /// All outcomes.
    pub fn outcomes(&self) -> &[DatasetOutcome] {
        &self.outcomes
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &DatasetOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failed())
    }

    /// True when any dataset failed.
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Outcome for a given layer, city and dataset.
    pub fn find(&self, layer: Layer, city: &str, dataset: &str) -> Option<&DatasetOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.layer == layer && o.city == city && o.dataset == dataset)
    }

    /// Counts of written, skipped and failed outcomes.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.outcomes
            .iter()
            .fold((0, 0, 0), |(w, s, f), o| match o.status {
                OutcomeStatus::Written { .. } => (w + 1, s, f),
                OutcomeStatus::Skipped { .. } => (w, s + 1, f),
                OutcomeStatus::Failed(_) => (w, s, f + 1),
            })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{outcome}")?;
        }
        let (written, skipped, failed) = self.counts();
        write!(f, "{written} written, {skipped} skipped, {failed} failed")
    }
}
