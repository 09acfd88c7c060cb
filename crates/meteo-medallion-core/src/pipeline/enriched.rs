use arrow::array::RecordBatch;
use snafu::prelude::*;

use crate::{
    aggregate::{
        AggregateError, air_quality_daily, hourly_historical_analysis, latest_retrieval,
        weather_daily_summary,
    },
    load::Layer,
    pipeline::{AggregateSnafu, DatasetOutcome, Pipeline},
    registry::City,
    schema::{self, CITY},
};

/// One enriched dataset and how it is derived from a raw one.
struct EnrichJob {
    output: &'static str,
    source: &'static str,
    keys: &'static [&'static str],
    aggregate: fn(&RecordBatch) -> Result<RecordBatch, AggregateError>,
}

const DAILY_KEYS: &[&str] = &["date", CITY];
const HOURLY_KEYS: &[&str] = &["hour", CITY];

const ENRICH_JOBS: [EnrichJob; 4] = [
    EnrichJob {
        output: schema::WEATHER_SUMMARY,
        source: schema::HISTORICAL,
        keys: DAILY_KEYS,
        aggregate: weather_daily_summary,
    },
    EnrichJob {
        output: schema::WEATHER_FORECAST,
        source: schema::FORECAST,
        keys: DAILY_KEYS,
        aggregate: weather_daily_summary,
    },
    EnrichJob {
        output: schema::AIR_QUALITY_DAILY,
        source: schema::AIR_QUALITY,
        keys: DAILY_KEYS,
        aggregate: air_quality_daily,
    },
    EnrichJob {
        output: schema::HOURLY_HISTORICAL_ANALYSIS,
        source: schema::HISTORICAL,
        keys: HOURLY_KEYS,
        aggregate: hourly_historical_analysis,
    },
];

impl Pipeline {
    pub(super) async fn enriched_city(&self, city: &City) -> Vec<DatasetOutcome> {
        let mut outcomes = Vec::with_capacity(ENRICH_JOBS.len());
        for job in &ENRICH_JOBS {
            outcomes.push(self.enrich(city, job).await);
        }
        outcomes
    }

    async fn enrich(&self, city: &City, job: &EnrichJob) -> DatasetOutcome {
        let layer = Layer::Enriched;
        let (raw, read_attempts) = self.read_city(Layer::Raw, job.source, city).await;
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => return Self::outcome(layer, city, job.output, read_attempts, Err(e)),
        };

        let built = latest_retrieval(&raw, &["time", CITY])
            .and_then(|latest| (job.aggregate)(&latest))
            .context(AggregateSnafu {
                dataset: job.output,
                city: city.name.as_str(),
            });
        match built {
            Err(e) => Self::outcome(layer, city, job.output, read_attempts, Err(e)),
            Ok(batch) if batch.num_rows() == 0 => Self::skipped(
                layer,
                city,
                job.output,
                read_attempts,
                "no raw rows for the city",
            ),
            Ok(batch) => {
                let (result, attempts) = self
                    .merge_into(layer, city, job.output, &batch, job.keys)
                    .await;
                Self::outcome(layer, city, job.output, attempts.max(read_attempts), result)
            }
        }
    }
}
