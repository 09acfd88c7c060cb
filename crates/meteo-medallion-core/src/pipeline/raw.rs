use arrow::array::RecordBatch;
use chrono::NaiveDate;
use futures::future::join_all;
use snafu::prelude::*;

use crate::{
    batch,
    extract::{DateWindow, ExtractRequest, Extractor},
    load::{Layer, LoadReport, Loader},
    pipeline::{
        DatasetOutcome, ExtractSnafu, LoadSnafu, Pipeline, PipelineError, PrepareSnafu,
        with_retry,
    },
    registry::City,
    schema::{CITY, DATE_RETRIEVED},
};

/// Raw tables are partitioned by snapshot day and city; each load replaces
/// exactly that partition.
const RAW_PARTITIONS: [&str; 2] = [DATE_RETRIEVED, CITY];

impl Pipeline {
    pub(super) async fn raw_city(&self, city: &City, today: NaiveDate) -> Vec<DatasetOutcome> {
        let request = ExtractRequest::new(city.clone(), today)
            .with_window(DateWindow::lookback(today, self.config.lookback_days));

        let fetched = join_all(
            self.extractors
                .iter()
                .map(|extractor| self.extract(extractor.as_ref(), &request)),
        )
        .await;

        let loader = self.loader(Layer::Raw);
        let mut outcomes = Vec::with_capacity(fetched.len());
        for (extractor, (result, extract_attempts)) in self.extractors.iter().zip(fetched) {
            let dataset = extractor.dataset();
            let outcome = match result {
                Err(e) => Self::outcome(Layer::Raw, city, dataset, extract_attempts, Err(e)),
                Ok(batch) if batch.num_rows() == 0 => Self::skipped(
                    Layer::Raw,
                    city,
                    dataset,
                    extract_attempts,
                    "upstream returned no rows",
                ),
                Ok(batch) => {
                    let (result, load_attempts) =
                        self.load_raw(&loader, city, dataset, &batch).await;
                    Self::outcome(
                        Layer::Raw,
                        city,
                        dataset,
                        extract_attempts.max(load_attempts),
                        result,
                    )
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn extract(
        &self,
        extractor: &dyn Extractor,
        request: &ExtractRequest,
    ) -> (Result<RecordBatch, PipelineError>, u32) {
        let dataset = extractor.dataset();
        let what = format!("extract {dataset} for {}", request.city.name);
        with_retry(&self.config.retry, &what, || {
            self.timed(what.clone(), async {
                extractor.extract(request).await.context(ExtractSnafu {
                    dataset,
                    city: request.city.name.as_str(),
                })
            })
        })
        .await
    }

    async fn load_raw(
        &self,
        loader: &Loader,
        city: &City,
        dataset: &str,
        batch: &RecordBatch,
    ) -> (Result<LoadReport, PipelineError>, u32) {
        let tagged = match batch::with_constant_utf8(batch, CITY, &city.name).context(
            PrepareSnafu {
                dataset,
                city: city.name.as_str(),
            },
        ) {
            Ok(tagged) => tagged,
            Err(e) => return (Err(e), 1),
        };

        let what = format!("load {}", Layer::Raw.table_path(dataset));
        with_retry(&self.config.retry, &what, || {
            self.timed(what.clone(), async {
                loader
                    .insert_overwrite(dataset, &tagged, &RAW_PARTITIONS, &RAW_PARTITIONS)
                    .await
                    .context(LoadSnafu {
                        dataset,
                        city: city.name.as_str(),
                    })
            })
        })
        .await
    }
}
