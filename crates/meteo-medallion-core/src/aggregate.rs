//! Pure transformations from raw observations to enriched and curated rows.
//!
//! Every aggregator takes a [`RecordBatch`] and returns a new one with the
//! matching layout from [`crate::schema`]. An empty input yields an empty,
//! schema-correct batch so callers can treat "no rows" as a skip signal.
//!
//! Nulls follow the usual dataframe rules:
//! - min/max/mean skip nulls and are null for an all-null group,
//! - a sum over only nulls is `0`,
//! - rows with a null group key are dropped,
//! - comparisons against a null are false.
use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray, StructArray},
    compute::filter_record_batch,
    datatypes::SchemaRef,
    error::ArrowError,
    row::{RowConverter, SortField},
};
use chrono::{NaiveDate, NaiveDateTime};
use snafu::{Backtrace, prelude::*};

use crate::{batch::column_as, schema::DATE_RETRIEVED};

mod air_quality;
mod combined;
pub mod geohash;
mod hourly;
mod stats;
mod weather;

pub use air_quality::air_quality_daily;
pub use combined::{allergy_risk, forecast_combined, health_alert, outdoor_score};
pub use hourly::hourly_historical_analysis;
pub use weather::weather_daily_summary;

/// Geohash precision used for every daily summary.
pub const GEOHASH_PRECISION: usize = 7;

/// Errors from the aggregation engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AggregateError {
    /// A required column is missing or has an unexpected type.
    #[snafu(display("Arrow error while aggregating: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },

    /// An observation timestamp could not be parsed.
    #[snafu(display("Invalid observation time {value:?}: {source}"))]
    InvalidTime {
        /// The offending value.
        value: String,
        /// Underlying parse error.
        source: chrono::ParseError,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },
}

/// Observation timestamps as sent by the upstream API (`2024-01-01T13:00`).
pub(crate) fn parse_time(value: &str) -> Result<NaiveDateTime, AggregateError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .context(InvalidTimeSnafu { value })
}

pub(crate) fn date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn value(array: &Float64Array, row: usize) -> Option<f64> {
    array.is_valid(row).then(|| array.value(row))
}

pub(crate) fn text(array: &StringArray, row: usize) -> Option<&str> {
    array.is_valid(row).then(|| array.value(row))
}

pub(crate) fn float_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a Float64Array, AggregateError> {
    column_as::<Float64Array>(batch, name).context(ArrowSnafu)
}

pub(crate) fn text_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a StringArray, AggregateError> {
    column_as::<StringArray>(batch, name).context(ArrowSnafu)
}

/// A `Struct{latitude, longitude}` column.
pub(crate) struct CoordinateColumn<'a> {
    parent: &'a StructArray,
    latitude: &'a Float64Array,
    longitude: &'a Float64Array,
}

impl<'a> CoordinateColumn<'a> {
    pub(crate) fn from_batch(batch: &'a RecordBatch, name: &str) -> Result<Self, AggregateError> {
        let parent = column_as::<StructArray>(batch, name).context(ArrowSnafu)?;
        let child = |field: &str| {
            parent
                .column_by_name(field)
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| {
                    ArrowError::SchemaError(format!("{name} has no Float64 field {field}"))
                })
                .context(ArrowSnafu)
        };
        Ok(Self {
            parent,
            latitude: child("latitude")?,
            longitude: child("longitude")?,
        })
    }

    pub(crate) fn latitude(&self, row: usize) -> Option<f64> {
        if self.parent.is_null(row) {
            return None;
        }
        value(self.latitude, row)
    }

    pub(crate) fn longitude(&self, row: usize) -> Option<f64> {
        if self.parent.is_null(row) {
            return None;
        }
        value(self.longitude, row)
    }

    /// Geohash of the point at `row`, or `None` when a coordinate is missing.
    pub(crate) fn geohash(&self, row: usize) -> Option<String> {
        geohash::encode(self.latitude(row)?, self.longitude(row)?, GEOHASH_PRECISION)
    }
}

pub(crate) fn floats(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub(crate) fn strings(values: Vec<Option<String>>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

pub(crate) fn build(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<RecordBatch, AggregateError> {
    RecordBatch::try_new(schema, columns).context(ArrowSnafu)
}

/// Keep, for every distinct combination of `keys`, only the rows retrieved
/// on the most recent `date_retrieved`.
///
/// Raw snapshots taken on consecutive days overlap (a forecast fetched today
/// and yesterday covers mostly the same hours); dropping older snapshots
/// stops the same hour from being counted twice. Rows whose retrieval date
/// is null lose against any dated row.
pub fn latest_retrieval(batch: &RecordBatch, keys: &[&str]) -> Result<RecordBatch, AggregateError> {
    if batch.num_rows() == 0 {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let mut key_columns = Vec::with_capacity(keys.len());
    let mut sort_fields = Vec::with_capacity(keys.len());
    for key in keys {
        let idx = schema.index_of(key).context(ArrowSnafu)?;
        key_columns.push(Arc::clone(batch.column(idx)));
        sort_fields.push(SortField::new(schema.field(idx).data_type().clone()));
    }
    let converter = RowConverter::new(sort_fields).context(ArrowSnafu)?;
    let rows = converter.convert_columns(&key_columns).context(ArrowSnafu)?;
    let retrieved = text_column(batch, DATE_RETRIEVED)?;

    let mut latest: HashMap<_, Option<&str>> = HashMap::new();
    for row in 0..batch.num_rows() {
        let candidate = text(retrieved, row);
        latest
            .entry(rows.row(row))
            .and_modify(|best: &mut Option<&str>| {
                if candidate > *best {
                    *best = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mask: BooleanArray = (0..batch.num_rows())
        .map(|row| Some(latest.get(&rows.row(row)) == Some(&text(retrieved, row))))
        .collect();
    filter_record_batch(batch, &mask).context(ArrowSnafu)
}
