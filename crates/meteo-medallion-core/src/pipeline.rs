//! Medallion pipeline orchestration.
//!
//! A run walks the layers in order (raw, enriched, curated). Within a layer,
//! cities are processed concurrently up to `max_concurrency`; every city's
//! datasets are independent tables or disjoint partitions, so no cross-city
//! locking is needed. A layer finishes for every city before the next layer
//! starts, because each layer reads what the previous one committed.
//!
//! Failures are recorded per city and dataset in a [`RunReport`] and never
//! abort the other cities.
use std::{fmt, future::Future, sync::Arc, time::Duration};

use arrow::array::RecordBatch;
use chrono::NaiveDate;
use futures::{StreamExt, stream};
use log::{info, warn};
use snafu::prelude::*;

use crate::{
    batch,
    config::PipelineConfig,
    extract::{
        Extractor, NearestStationsExtractor, OpenMeteoEndpoint, OpenMeteoExtractor, http_client,
    },
    load::{Layer, LoadReport, Loader},
    predicate::Predicate,
    registry::City,
    schema::CITY,
    table::TableStore,
};

mod curated;
mod enriched;
mod error;
mod raw;
mod report;
mod retry;

pub use error::PipelineError;
pub(crate) use error::{
    AggregateSnafu, ConfigSnafu, ExtractSnafu, LoadSnafu, PrepareSnafu, ReadSnafu, SetupSnafu,
    TimedOutSnafu,
};
pub use report::{DatasetOutcome, OutcomeStatus, RunReport};
pub use retry::{RetryPolicy, with_retry};

/// Default time budget of one extraction, read or load attempt.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Which layers a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Extract and land raw observations.
    Raw,
    /// Aggregate raw observations into daily and hourly summaries.
    Enriched,
    /// Join and score the enriched forecasts.
    Curated,
    /// Raw, then enriched, then curated.
    All,
}

impl Stage {
    /// Layers covered, in execution order.
    pub fn layers(self) -> &'static [Layer] {
        match self {
            Stage::Raw => &[Layer::Raw],
            Stage::Enriched => &[Layer::Enriched],
            Stage::Curated => &[Layer::Curated],
            Stage::All => &[Layer::Raw, Layer::Enriched, Layer::Curated],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Raw => f.write_str("raw"),
            Stage::Enriched => f.write_str("enriched"),
            Stage::Curated => f.write_str("curated"),
            Stage::All => f.write_str("all"),
        }
    }
}

/// The pipeline: configuration, table store and raw extractors.
pub struct Pipeline {
    config: PipelineConfig,
    store: TableStore,
    extractors: Vec<Arc<dyn Extractor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field(
                "extractors",
                &self.extractors.iter().map(|e| e.dataset()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    /// Pipeline with the production extractors.
    ///
    /// The station extractor is only registered when station API
    /// credentials are configured.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = http_client(config.request_timeout).context(SetupSnafu)?;

        let mut extractors: Vec<Arc<dyn Extractor>> = [
            OpenMeteoEndpoint::Forecast,
            OpenMeteoEndpoint::Historical,
            OpenMeteoEndpoint::AirQuality,
        ]
        .into_iter()
        .map(|endpoint| {
            Arc::new(OpenMeteoExtractor::new(endpoint, client.clone())) as Arc<dyn Extractor>
        })
        .collect();

        match &config.stations {
            Some(api) => extractors.push(Arc::new(
                NearestStationsExtractor::new(client, &api.host).with_auth(api.auth()),
            )),
            None => warn!("no station API credentials configured; nearest_stations is disabled"),
        }

        Self::with_extractors(config, extractors)
    }

    /// Pipeline with caller-supplied extractors.
    pub fn with_extractors(
        config: PipelineConfig,
        extractors: Vec<Arc<dyn Extractor>>,
    ) -> Result<Self, PipelineError> {
        config.validate().context(ConfigSnafu)?;
        let store = TableStore::new(config.storage.clone());
        Ok(Self {
            config,
            store,
            extractors,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Table store the layers live in.
    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Run `stage`; `today` stamps raw extractions.
    pub async fn run(&self, stage: Stage, today: NaiveDate) -> RunReport {
        let mut report = RunReport::default();
        for layer in stage.layers() {
            let layer_report = match layer {
                Layer::Raw => self.run_raw(today).await,
                Layer::Enriched => self.run_enriched().await,
                Layer::Curated => self.run_curated().await,
            };
            report.absorb(layer_report);
        }
        report
    }

    /// Extract every dataset for every city and land it in the raw layer.
    pub async fn run_raw(&self, today: NaiveDate) -> RunReport {
        self.for_each_city(Layer::Raw, |city| self.raw_city(city, today))
            .await
    }

    /// Rebuild the enriched layer from the raw layer.
    pub async fn run_enriched(&self) -> RunReport {
        self.for_each_city(Layer::Enriched, |city| self.enriched_city(city))
            .await
    }

    /// Rebuild the curated layer from the enriched layer.
    pub async fn run_curated(&self) -> RunReport {
        self.for_each_city(Layer::Curated, |city| self.curated_city(city))
            .await
    }

    async fn for_each_city<'a, F, Fut>(&'a self, layer: Layer, per_city: F) -> RunReport
    where
        F: Fn(&'a City) -> Fut,
        Fut: Future<Output = Vec<DatasetOutcome>> + 'a,
    {
        info!(
            "{layer} layer: processing {} cities, up to {} at a time",
            self.config.cities.len(),
            self.config.max_concurrency
        );
        let per_city: Vec<Vec<DatasetOutcome>> = stream::iter(&self.config.cities)
            .map(per_city)
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        let mut report = RunReport::default();
        report.extend(per_city.into_iter().flatten());
        let (written, skipped, failed) = report.counts();
        info!("{layer} layer done: {written} written, {skipped} skipped, {failed} failed");
        report
    }

    fn loader(&self, layer: Layer) -> Loader {
        Loader::new(self.store.clone(), layer)
    }

    /// Bound `fut` by the configured operation timeout.
    ///
    /// Table commits inside `fut` run on their own task and still finish when
    /// the timeout fires.
    async fn timed<T>(
        &self,
        operation: impl Into<String>,
        fut: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        let timeout = self.config.operation_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => TimedOutSnafu {
                operation: operation.into(),
                timeout,
            }
            .fail(),
        }
    }

    /// Rows of `{layer}/{dataset}` belonging to `city`.
    async fn read_city(
        &self,
        layer: Layer,
        dataset: &str,
        city: &City,
    ) -> (Result<RecordBatch, PipelineError>, u32) {
        let path = layer.table_path(dataset);
        with_retry(&self.config.retry, &format!("read {path}"), || async {
            let table = self
                .timed(format!("read {path}"), async {
                    self.store
                        .read(&path)
                        .await
                        .context(ReadSnafu { path: path.clone() })
                })
                .await?;
            batch::filter_eq(&table, CITY, city.name.as_str()).context(PrepareSnafu {
                dataset,
                city: city.name.as_str(),
            })
        })
        .await
    }

    /// Merge-upsert `batch` into `{layer}/{dataset}` on `keys`, scoped to
    /// the city's partition.
    async fn merge_into(
        &self,
        layer: Layer,
        city: &City,
        dataset: &str,
        batch: &RecordBatch,
        keys: &[&str],
    ) -> (Result<LoadReport, PipelineError>, u32) {
        let loader = self.loader(layer);
        let predicate = Predicate::eq(CITY, city.name.as_str()).and(Predicate::on_keys(keys));
        let what = format!("merge into {}", layer.table_path(dataset));
        with_retry(&self.config.retry, &what, || {
            self.timed(what.clone(), async {
                loader
                    .merge_upsert(dataset, batch, &[CITY], &predicate)
                    .await
                    .context(LoadSnafu {
                        dataset,
                        city: city.name.as_str(),
                    })
            })
        })
        .await
    }

    /// Outcome for a finished load.
    fn outcome(
        layer: Layer,
        city: &City,
        dataset: &str,
        attempts: u32,
        result: Result<LoadReport, PipelineError>,
    ) -> DatasetOutcome {
        let status = match result {
            Ok(report) => OutcomeStatus::Written {
                version: report.version,
                rows: report.rows_written,
            },
            Err(e) => {
                warn!("{layer}/{dataset} for {}: {e}", city.name);
                OutcomeStatus::Failed(e)
            }
        };
        DatasetOutcome {
            layer,
            city: city.name.clone(),
            dataset: dataset.to_string(),
            attempts,
            status,
        }
    }

    fn skipped(
        layer: Layer,
        city: &City,
        dataset: &str,
        attempts: u32,
        reason: &str,
    ) -> DatasetOutcome {
        info!("{layer}/{dataset} for {}: skipped ({reason})", city.name);
        DatasetOutcome {
            layer,
            city: city.name.clone(),
            dataset: dataset.to_string(),
            attempts,
            status: OutcomeStatus::Skipped {
                reason: reason.to_string(),
            },
        }
    }
}
