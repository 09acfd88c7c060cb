//! Column layouts of every medallion dataset.
//!
//! Raw schemas describe what the extractors produce (before the pipeline
//! tags rows with `city`); enriched and curated schemas are the outputs of
//! the aggregation engine. All fields are nullable: upstream APIs return
//! `null` for missing readings.
use std::sync::Arc;

use arrow::{
    array::{ArrayRef, Float64Array, StructArray},
    buffer::NullBuffer,
    datatypes::{DataType, Field, Fields, Schema, SchemaRef},
};

/// Raw forecast dataset (`bronze/forecast`).
pub const FORECAST: &str = "forecast";
/// Raw historical weather dataset (`bronze/historical`).
pub const HISTORICAL: &str = "historical";
/// Raw air-quality dataset (`bronze/air_quality`).
pub const AIR_QUALITY: &str = "air_quality";
/// Raw nearby-stations dataset (`bronze/nearest_stations`).
pub const NEAREST_STATIONS: &str = "nearest_stations";

/// Daily historical weather (`silver/weather_summary`).
pub const WEATHER_SUMMARY: &str = "weather_summary";
/// Daily forecast weather (`silver/weather_forecast`).
pub const WEATHER_FORECAST: &str = "weather_forecast";
/// Daily air quality (`silver/air_quality_daily`).
pub const AIR_QUALITY_DAILY: &str = "air_quality_daily";
/// Hour-of-day historical profile (`silver/hourly_historical_analysis`).
pub const HOURLY_HISTORICAL_ANALYSIS: &str = "hourly_historical_analysis";

/// Joined and scored forecast (`gold/forecast_combined`).
pub const FORECAST_COMBINED: &str = "forecast_combined";

/// Column tagging every row with its city.
pub const CITY: &str = "city";
/// Column holding the retrieval date (`YYYY-MM-DD`) of a raw snapshot.
pub const DATE_RETRIEVED: &str = "date_retrieved";

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, true)
}

fn float(name: &str) -> Field {
    Field::new(name, DataType::Float64, true)
}

/// `Struct{latitude: Float64, longitude: Float64}`
pub fn coordinates_type() -> DataType {
    DataType::Struct(coordinate_fields())
}

fn coordinate_fields() -> Fields {
    Fields::from(vec![float("latitude"), float("longitude")])
}

/// Build a coordinates column; `None` entries become null structs.
pub fn coordinates_array(points: &[Option<(f64, f64)>]) -> StructArray {
    let latitude: ArrayRef = Arc::new(Float64Array::from(
        points.iter().map(|p| p.map(|(lat, _)| lat)).collect::<Vec<_>>(),
    ));
    let longitude: ArrayRef = Arc::new(Float64Array::from(
        points.iter().map(|p| p.map(|(_, lon)| lon)).collect::<Vec<_>>(),
    ));
    let nulls = NullBuffer::from(points.iter().map(Option::is_some).collect::<Vec<_>>());
    StructArray::new(coordinate_fields(), vec![latitude, longitude], Some(nulls))
}

fn coordinates(name: &str) -> Field {
    Field::new(name, coordinates_type(), true)
}

/// Hourly weather readings from the forecast and archive endpoints.
pub fn weather_observations() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("time"),
        float("temperature_2m"),
        float("precipitation"),
        float("windspeed_10m"),
        coordinates("station_coordinates"),
        coordinates("requested_coordinates"),
        utf8(DATE_RETRIEVED),
    ]))
}

/// Hourly pollutant readings from the air-quality endpoint.
pub fn air_quality_observations() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("time"),
        float("pm10"),
        float("pm2_5"),
        float("carbon_monoxide"),
        coordinates("station_coordinates"),
        coordinates("requested_coordinates"),
        utf8(DATE_RETRIEVED),
    ]))
}

/// Weather stations near a coordinate.
pub fn stations() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("id"),
        utf8("name"),
        utf8("name_language"),
        float("distance"),
        float("latitude"),
        float("longitude"),
        utf8("generated_at"),
        coordinates("query_coordinates"),
        utf8(DATE_RETRIEVED),
    ]))
}

/// `schema` with a trailing `city` column, as stored in the raw layer.
pub fn with_city(schema: &Schema) -> SchemaRef {
    let mut fields: Vec<Field> = schema
        .fields()
        .iter()
        .filter(|f| f.name() != CITY)
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(utf8(CITY));
    Arc::new(Schema::new(fields))
}

/// Daily weather summary (historical and forecast).
pub fn weather_summary() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("date"),
        utf8(CITY),
        utf8("geohash"),
        float("temp_min"),
        float("temp_max"),
        float("temp_avg"),
        float("total_precipitation"),
        float("avg_windspeed"),
        float("latitude"),
        float("longitude"),
        utf8(DATE_RETRIEVED),
        float("temp_range"),
    ]))
}

/// Daily air-quality summary.
pub fn air_quality_daily() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("date"),
        utf8(CITY),
        utf8("geohash"),
        float("pm10_min"),
        float("pm10_max"),
        float("pm10_avg"),
        float("pm2_5_min"),
        float("pm2_5_max"),
        float("pm2_5_avg"),
        float("co_min"),
        float("co_max"),
        float("co_avg"),
        float("latitude"),
        float("longitude"),
        utf8(DATE_RETRIEVED),
        float("aqi_simplified"),
    ]))
}

/// Hour-of-day historical profile.
pub fn hourly_historical_analysis() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("hour", DataType::Int32, true),
        utf8(CITY),
        float("temp_min"),
        float("temp_max"),
        float("temp_avg"),
        float("precipitation_avg"),
        float("windspeed_avg"),
        Field::new("days_count", DataType::Int64, true),
    ]))
}

/// Joined forecast with health alerts and scores.
pub fn forecast_combined() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("date"),
        utf8(CITY),
        utf8("geohash"),
        float("temp_min"),
        float("temp_max"),
        float("temp_avg"),
        float("temp_range"),
        float("total_precipitation"),
        float("avg_windspeed"),
        float("pm10_avg"),
        float("pm2_5_avg"),
        float("co_avg"),
        float("aqi_simplified"),
        float("latitude"),
        float("longitude"),
        utf8(DATE_RETRIEVED),
        utf8("health_alert"),
        utf8("allergy_risk"),
        Field::new("outdoor_score", DataType::Int64, true),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_city_appends_a_single_city_column() {
        let tagged = with_city(&weather_observations());
        let again = with_city(&tagged);

        assert_eq!(tagged.fields().len(), weather_observations().fields().len() + 1);
        assert_eq!(tagged.field(tagged.fields().len() - 1).name(), CITY);
        assert_eq!(again, tagged);
    }

    #[test]
    fn missing_points_become_null_structs() {
        use arrow::array::Array;

        let coords = coordinates_array(&[Some((-31.4, -64.2)), None]);

        assert_eq!(coords.data_type(), &coordinates_type());
        assert!(coords.is_valid(0));
        assert!(coords.is_null(1));
    }
}
