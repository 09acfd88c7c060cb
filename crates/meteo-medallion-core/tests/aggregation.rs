//! Integration tests for the aggregation engine.
//!
//! These tests validate the enriched and curated transformations on batches
//! shaped like raw tables (observation columns plus `city`):
//! - Daily weather and air-quality statistics with null handling,
//! - Hour-of-day profiles with distinct day counts,
//! - The forecast join with its alert and score columns,
//! - Empty inputs producing empty, schema-correct batches.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};

use meteo_medallion_core::aggregate::{
    GEOHASH_PRECISION, air_quality_daily, forecast_combined, health_alert,
    hourly_historical_analysis, latest_retrieval, outdoor_score, weather_daily_summary,
};
use meteo_medallion_core::batch::column_as;
use meteo_medallion_core::schema;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const CORDOBA: (f64, f64) = (-31.4135, -64.18105);

// =============================================================================
// Test Helpers
// =============================================================================

/// `(time, temperature_2m, precipitation, windspeed_10m)`
type WeatherRow = (&'static str, Option<f64>, Option<f64>, Option<f64>);

/// `(time, pm10, pm2_5, carbon_monoxide)`
type AirRow = (&'static str, Option<f64>, Option<f64>, Option<f64>);

fn constant(value: &str, n: usize) -> ArrayRef {
    Arc::new(StringArray::from(vec![value; n]))
}

fn station(n: usize) -> ArrayRef {
    Arc::new(schema::coordinates_array(&vec![Some(CORDOBA); n]))
}

fn raw_weather(city: &str, retrieved: &str, rows: &[WeatherRow]) -> RecordBatch {
    let n = rows.len();
    RecordBatch::try_new(
        schema::with_city(&schema::weather_observations()),
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.2))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.3))),
            station(n),
            station(n),
            constant(retrieved, n),
            constant(city, n),
        ],
    )
    .expect("valid weather batch")
}

fn raw_air(city: &str, retrieved: &str, rows: &[AirRow]) -> RecordBatch {
    let n = rows.len();
    RecordBatch::try_new(
        schema::with_city(&schema::air_quality_observations()),
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.2))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.3))),
            station(n),
            station(n),
            constant(retrieved, n),
            constant(city, n),
        ],
    )
    .expect("valid air-quality batch")
}

fn floats(batch: &RecordBatch, name: &str) -> Vec<Option<f64>> {
    column_as::<Float64Array>(batch, name)
        .expect("float column")
        .iter()
        .collect()
}

fn texts(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
    column_as::<StringArray>(batch, name)
        .expect("text column")
        .iter()
        .map(|v| v.map(str::to_string))
        .collect()
}

// =============================================================================
// Daily weather
// =============================================================================

#[test]
fn weather_summary_groups_hourly_rows_by_day() -> TestResult {
    let raw = raw_weather(
        "cordoba",
        "2024-01-03",
        &[
            ("2024-01-01T00:00", Some(10.0), Some(0.5), Some(4.0)),
            ("2024-01-01T12:00", Some(20.0), Some(1.0), Some(8.0)),
            ("2024-01-01T18:00", None, None, None),
            ("2024-01-02T00:00", Some(5.0), None, Some(2.0)),
        ],
    );

    let summary = weather_daily_summary(&raw)?;

    assert_eq!(summary.schema(), schema::weather_summary());
    assert_eq!(summary.num_rows(), 2);
    assert_eq!(
        texts(&summary, "date"),
        vec![Some("2024-01-01".to_string()), Some("2024-01-02".to_string())]
    );
    assert_eq!(floats(&summary, "temp_min"), vec![Some(10.0), Some(5.0)]);
    assert_eq!(floats(&summary, "temp_max"), vec![Some(20.0), Some(5.0)]);
    assert_eq!(floats(&summary, "temp_avg"), vec![Some(15.0), Some(5.0)]);
    assert_eq!(floats(&summary, "temp_range"), vec![Some(10.0), Some(0.0)]);
    assert_eq!(floats(&summary, "total_precipitation"), vec![Some(1.5), Some(0.0)]);
    assert_eq!(floats(&summary, "avg_windspeed"), vec![Some(6.0), Some(2.0)]);
    assert_eq!(floats(&summary, "latitude"), vec![Some(CORDOBA.0); 2]);

    let geohashes = texts(&summary, "geohash");
    let first = geohashes[0].as_deref().expect("geohash");
    assert_eq!(first.len(), GEOHASH_PRECISION);
    assert_eq!(geohashes[0], geohashes[1]);
    Ok(())
}

#[test]
fn latest_retrieval_keeps_the_newest_snapshot_per_hour() -> TestResult {
    let older = raw_weather(
        "cordoba",
        "2024-01-01",
        &[("2024-01-02T00:00", Some(10.0), None, None)],
    );
    let newer = raw_weather(
        "cordoba",
        "2024-01-02",
        &[("2024-01-02T00:00", Some(12.0), None, None)],
    );
    let both = arrow::compute::concat_batches(&older.schema(), [&older, &newer])?;

    let latest = latest_retrieval(&both, &["time", schema::CITY])?;

    assert_eq!(latest.num_rows(), 1);
    assert_eq!(floats(&latest, "temperature_2m"), vec![Some(12.0)]);
    assert_eq!(
        texts(&latest, schema::DATE_RETRIEVED),
        vec![Some("2024-01-02".to_string())]
    );
    Ok(())
}

// =============================================================================
// Daily air quality
// =============================================================================

#[test]
fn aqi_is_a_capped_pm2_5_proxy() -> TestResult {
    let raw = raw_air(
        "rosario",
        "2024-01-03",
        &[
            ("2024-01-01T00:00", Some(20.0), Some(25.0), Some(200.0)),
            ("2024-01-02T00:00", Some(40.0), Some(50.0), Some(300.0)),
            ("2024-01-03T00:00", Some(10.0), Some(12.5), None),
        ],
    );

    let daily = air_quality_daily(&raw)?;

    assert_eq!(daily.schema(), schema::air_quality_daily());
    assert_eq!(
        floats(&daily, "aqi_simplified"),
        vec![Some(100.0), Some(100.0), Some(50.0)]
    );
    assert_eq!(floats(&daily, "co_avg"), vec![Some(200.0), Some(300.0), None]);
    assert_eq!(texts(&daily, schema::CITY), vec![Some("rosario".to_string()); 3]);
    Ok(())
}

// =============================================================================
// Hourly profile
// =============================================================================

#[test]
fn hourly_profile_counts_distinct_days() -> TestResult {
    let raw = raw_weather(
        "cordoba",
        "2024-01-03",
        &[
            ("2024-01-01T00:00", Some(10.0), Some(0.0), Some(4.0)),
            ("2024-01-02T00:00", Some(14.0), Some(2.0), Some(6.0)),
            ("2024-01-02T13:00", Some(30.0), Some(0.0), Some(12.0)),
        ],
    );

    let profile = hourly_historical_analysis(&raw)?;

    assert_eq!(profile.schema(), schema::hourly_historical_analysis());
    let hours: Vec<Option<i32>> = column_as::<Int32Array>(&profile, "hour")?.iter().collect();
    let days: Vec<Option<i64>> = column_as::<Int64Array>(&profile, "days_count")?
        .iter()
        .collect();
    assert_eq!(hours, vec![Some(0), Some(13)]);
    assert_eq!(days, vec![Some(2), Some(1)]);
    assert_eq!(floats(&profile, "temp_avg"), vec![Some(12.0), Some(30.0)]);
    assert_eq!(floats(&profile, "precipitation_avg"), vec![Some(1.0), Some(0.0)]);
    Ok(())
}

// =============================================================================
// Forecast join and scoring
// =============================================================================

#[test]
fn outdoor_score_penalizes_heat_linearly() {
    assert_eq!(outdoor_score(None, Some(30.0), Some(0.0), Some(0.0)), 100);
    assert_eq!(outdoor_score(None, Some(40.0), Some(0.0), Some(0.0)), 80);
    assert_eq!(outdoor_score(Some(100.0), Some(5.0), Some(5.0), Some(60.0)), 0);
}

#[test]
fn health_alert_levels() {
    assert_eq!(health_alert(Some(80.0), Some(20.0)), "HIGH_ALERT");
    assert_eq!(health_alert(Some(60.0), Some(32.0)), "MODERATE_ALERT");
    assert_eq!(health_alert(Some(60.0), Some(20.0)), "LOW_ALERT");
    assert_eq!(health_alert(Some(10.0), Some(36.0)), "LOW_ALERT");
    assert_eq!(health_alert(Some(10.0), Some(20.0)), "GOOD");
    assert_eq!(health_alert(None, None), "GOOD");
}

#[test]
fn forecast_combined_joins_days_present_on_both_sides() -> TestResult {
    let weather = weather_daily_summary(&raw_weather(
        "cordoba",
        "2024-01-01",
        &[
            ("2024-01-01T12:00", Some(40.0), Some(0.0), Some(10.0)),
            ("2024-01-02T12:00", Some(20.0), Some(0.0), Some(10.0)),
        ],
    ))?;
    let air = air_quality_daily(&raw_air(
        "cordoba",
        "2024-01-01",
        &[("2024-01-01T12:00", Some(10.0), Some(12.5), Some(100.0))],
    ))?;

    let combined = forecast_combined(&weather, &air)?;

    assert_eq!(combined.schema(), schema::forecast_combined());
    assert_eq!(combined.num_rows(), 1);
    assert_eq!(texts(&combined, "date"), vec![Some("2024-01-01".to_string())]);
    assert_eq!(floats(&combined, "aqi_simplified"), vec![Some(50.0)]);
    assert_eq!(floats(&combined, "temp_range"), vec![Some(0.0)]);
    assert_eq!(
        texts(&combined, "health_alert"),
        vec![Some("MODERATE_ALERT".to_string())]
    );
    assert_eq!(texts(&combined, "allergy_risk"), vec![Some("LOW".to_string())]);
    let scores: Vec<Option<i64>> = column_as::<Int64Array>(&combined, "outdoor_score")?
        .iter()
        .collect();
    // 100 - 50 / 2 - (40 - 30) * 2
    assert_eq!(scores, vec![Some(55)]);
    Ok(())
}

#[test]
fn forecast_combined_keeps_one_row_per_day_and_city() -> TestResult {
    let older = weather_daily_summary(&raw_weather(
        "cordoba",
        "2024-01-01",
        &[("2024-01-02T12:00", Some(20.0), Some(0.0), Some(10.0))],
    ))?;
    let newer = weather_daily_summary(&raw_weather(
        "cordoba",
        "2024-01-02",
        &[("2024-01-02T12:00", Some(40.0), Some(0.0), Some(10.0))],
    ))?;
    let weather = arrow::compute::concat_batches(&older.schema(), [&older, &newer])?;
    let air_day = air_quality_daily(&raw_air(
        "cordoba",
        "2024-01-02",
        &[("2024-01-02T12:00", Some(10.0), Some(12.5), Some(100.0))],
    ))?;
    let air = arrow::compute::concat_batches(&air_day.schema(), [&air_day, &air_day])?;

    let combined = forecast_combined(&weather, &air)?;

    assert_eq!(combined.num_rows(), 1);
    assert_eq!(
        texts(&combined, schema::DATE_RETRIEVED),
        vec![Some("2024-01-02".to_string())]
    );
    assert_eq!(floats(&combined, "temp_avg"), vec![Some(40.0)]);
    let scores: Vec<Option<i64>> = column_as::<Int64Array>(&combined, "outdoor_score")?
        .iter()
        .collect();
    assert_eq!(scores, vec![Some(55)]);
    Ok(())
}

// =============================================================================
// Empty inputs
// =============================================================================

#[test]
fn empty_inputs_yield_empty_schema_correct_batches() -> TestResult {
    let weather = RecordBatch::new_empty(schema::with_city(&schema::weather_observations()));
    let air = RecordBatch::new_empty(schema::with_city(&schema::air_quality_observations()));

    let summary = weather_daily_summary(&weather)?;
    let daily = air_quality_daily(&air)?;
    let hourly = hourly_historical_analysis(&weather)?;
    let combined = forecast_combined(&summary, &daily)?;

    for (batch, expected) in [
        (&summary, schema::weather_summary()),
        (&daily, schema::air_quality_daily()),
        (&hourly, schema::hourly_historical_analysis()),
        (&combined, schema::forecast_combined()),
    ] {
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), expected);
    }
    Ok(())
}
