//! Forecast weather joined with daily air quality, plus derived scores.
use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array},
    compute::take,
    error::ArrowError,
};
use snafu::prelude::*;

use crate::{
    aggregate::{AggregateError, ArrowSnafu, build, text, text_column, value},
    schema::{self, CITY, DATE_RETRIEVED},
};

fn above(v: Option<f64>, threshold: f64) -> bool {
    v.is_some_and(|v| v > threshold)
}

fn below(v: Option<f64>, threshold: f64) -> bool {
    v.is_some_and(|v| v < threshold)
}

fn at_least(v: Option<f64>, threshold: f64) -> bool {
    v.is_some_and(|v| v >= threshold)
}

/// Health alert level for a day.
///
/// - `HIGH_ALERT`: AQI of at least 75.
/// - `MODERATE_ALERT`: AQI of at least 50 on a hot (> 30) or cold (< 10) day.
/// - `LOW_ALERT`: AQI of at least 50, or an extreme temperature (> 35, < 5).
/// - `GOOD` otherwise.
pub fn health_alert(aqi: Option<f64>, temp_avg: Option<f64>) -> &'static str {
    if at_least(aqi, 75.0) {
        "HIGH_ALERT"
    } else if at_least(aqi, 50.0) && (above(temp_avg, 30.0) || below(temp_avg, 10.0)) {
        "MODERATE_ALERT"
    } else if at_least(aqi, 50.0) || above(temp_avg, 35.0) || below(temp_avg, 5.0) {
        "LOW_ALERT"
    } else {
        "GOOD"
    }
}

/// Allergy risk from particulate levels and wind.
pub fn allergy_risk(
    pm2_5_avg: Option<f64>,
    pm10_avg: Option<f64>,
    windspeed: Option<f64>,
) -> &'static str {
    if above(pm10_avg, 50.0) && above(windspeed, 20.0) {
        "HIGH"
    } else if above(pm2_5_avg, 15.0) || (above(pm10_avg, 30.0) && above(windspeed, 10.0)) {
        "MODERATE"
    } else {
        "LOW"
    }
}

/// Outdoor activity score in `0..=100`, higher is better.
///
/// Starts at 100 and subtracts half the AQI, a temperature penalty outside
/// `15..=30`, up to 20 for precipitation and the wind speed above 30.
/// Missing inputs contribute nothing. The result is truncated toward zero
/// before clamping.
pub fn outdoor_score(
    aqi: Option<f64>,
    temp_avg: Option<f64>,
    total_precipitation: Option<f64>,
    windspeed: Option<f64>,
) -> i64 {
    let mut score = 100.0;

    if let Some(aqi) = aqi.filter(|a| !a.is_nan()) {
        score -= aqi * 0.5;
    }

    match temp_avg {
        Some(t) if t > 30.0 => score -= (t - 30.0) * 2.0,
        Some(t) if t < 15.0 => score -= (15.0 - t) * 1.5,
        _ => {}
    }

    if let Some(p) = total_precipitation.filter(|p| *p > 0.0) {
        score -= (p * 10.0).min(20.0);
    }

    if let Some(w) = windspeed.filter(|w| *w > 30.0) {
        score -= w - 30.0;
    }

    (score.trunc() as i64).clamp(0, 100)
}

fn take_column(
    batch: &RecordBatch,
    name: &str,
    indices: &UInt32Array,
) -> Result<ArrayRef, AggregateError> {
    let idx = batch.schema().index_of(name).context(ArrowSnafu)?;
    take(batch.column(idx).as_ref(), indices, None).context(ArrowSnafu)
}

fn float_at(columns: &[ArrayRef], i: usize) -> Result<&Float64Array, AggregateError> {
    columns[i]
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| ArrowError::CastError(format!("joined column {i} is not Float64")))
        .context(ArrowSnafu)
}

/// Row kept for each `(date, city)`: the newest `date_retrieved`, the first
/// such row on ties.
fn newest_per_day(batch: &RecordBatch) -> Result<HashMap<(&str, &str), usize>, AggregateError> {
    let dates = text_column(batch, "date")?;
    let cities = text_column(batch, CITY)?;
    let retrieved = text_column(batch, DATE_RETRIEVED)?;

    let mut keep: HashMap<(&str, &str), usize> = HashMap::new();
    for row in 0..batch.num_rows() {
        let (Some(d), Some(c)) = (text(dates, row), text(cities, row)) else {
            continue;
        };
        keep.entry((d, c))
            .and_modify(|best| {
                if text(retrieved, row) > text(retrieved, *best) {
                    *best = row;
                }
            })
            .or_insert(row);
    }
    Ok(keep)
}

/// Inner join of daily forecast weather and daily air quality on
/// `(date, city)`, with `health_alert`, `allergy_risk` and `outdoor_score`.
///
/// Each side contributes at most one row per key, the one from the newest
/// retrieval, so the output has unique `(date, city)` pairs. Location columns
/// (`geohash`, `latitude`, `longitude`, `date_retrieved`) come from the
/// weather side. Output rows follow the weather rows' order.
pub fn forecast_combined(
    weather: &RecordBatch,
    air_quality: &RecordBatch,
) -> Result<RecordBatch, AggregateError> {
    if weather.num_rows() == 0 || air_quality.num_rows() == 0 {
        return Ok(RecordBatch::new_empty(schema::forecast_combined()));
    }

    let row_index = |row: usize| {
        u32::try_from(row)
            .map_err(|e| ArrowError::ExternalError(Box::new(e)))
            .context(ArrowSnafu)
    };
    let air_rows = newest_per_day(air_quality)?;
    let weather_rows = newest_per_day(weather)?;

    let weather_date = text_column(weather, "date")?;
    let weather_city = text_column(weather, CITY)?;
    let mut left = Vec::new();
    let mut right = Vec::new();
    for row in 0..weather.num_rows() {
        let (Some(d), Some(c)) = (text(weather_date, row), text(weather_city, row)) else {
            continue;
        };
        if weather_rows.get(&(d, c)) != Some(&row) {
            continue;
        }
        if let Some(&m) = air_rows.get(&(d, c)) {
            left.push(row_index(row)?);
            right.push(row_index(m)?);
        }
    }
    let left = UInt32Array::from(left);
    let right = UInt32Array::from(right);

    let mut columns = Vec::with_capacity(19);
    for name in [
        "date",
        CITY,
        "geohash",
        "temp_min",
        "temp_max",
        "temp_avg",
        "temp_range",
        "total_precipitation",
        "avg_windspeed",
    ] {
        columns.push(take_column(weather, name, &left)?);
    }
    for name in ["pm10_avg", "pm2_5_avg", "co_avg", "aqi_simplified"] {
        columns.push(take_column(air_quality, name, &right)?);
    }
    for name in ["latitude", "longitude", DATE_RETRIEVED] {
        columns.push(take_column(weather, name, &left)?);
    }

    let temp_avg = float_at(&columns, 5)?;
    let precipitation = float_at(&columns, 7)?;
    let windspeed = float_at(&columns, 8)?;
    let pm10 = float_at(&columns, 9)?;
    let pm2_5 = float_at(&columns, 10)?;
    let aqi = float_at(&columns, 12)?;

    let rows = left.len();
    let alerts: StringArray = (0..rows)
        .map(|r| Some(health_alert(value(aqi, r), value(temp_avg, r))))
        .collect();
    let allergy: StringArray = (0..rows)
        .map(|r| Some(allergy_risk(value(pm2_5, r), value(pm10, r), value(windspeed, r))))
        .collect();
    let scores: Int64Array = (0..rows)
        .map(|r| {
            Some(outdoor_score(
                value(aqi, r),
                value(temp_avg, r),
                value(precipitation, r),
                value(windspeed, r),
            ))
        })
        .collect();

    columns.push(Arc::new(alerts));
    columns.push(Arc::new(allergy));
    columns.push(Arc::new(scores));
    build(schema::forecast_combined(), columns)
}
