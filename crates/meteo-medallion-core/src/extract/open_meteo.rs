//! Open-Meteo forecast, archive and air-quality endpoints.
use std::{collections::HashMap, sync::Arc};

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use snafu::prelude::*;

use crate::{
    extract::{
        BatchSnafu, ExtractError, ExtractRequest, Extractor, MalformedSnafu, fetch_json,
    },
    schema::{self, coordinates_array},
};

/// One of the hourly Open-Meteo endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMeteoEndpoint {
    /// Seven-day hourly weather forecast.
    Forecast,
    /// Hourly weather archive over the request window.
    Historical,
    /// Hourly pollutant forecast.
    AirQuality,
}

impl OpenMeteoEndpoint {
    /// Production URL of the endpoint.
    pub fn default_url(&self) -> &'static str {
        match self {
            OpenMeteoEndpoint::Forecast => "https://api.open-meteo.com/v1/forecast",
            OpenMeteoEndpoint::Historical => "https://archive-api.open-meteo.com/v1/archive",
            OpenMeteoEndpoint::AirQuality => {
                "https://air-quality-api.open-meteo.com/v1/air-quality"
            }
        }
    }

    /// Hourly variables requested, in output column order.
    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            OpenMeteoEndpoint::Forecast | OpenMeteoEndpoint::Historical => {
                &["temperature_2m", "precipitation", "windspeed_10m"]
            }
            OpenMeteoEndpoint::AirQuality => &["pm10", "pm2_5", "carbon_monoxide"],
        }
    }

    /// Raw dataset fed by the endpoint.
    pub fn dataset(&self) -> &'static str {
        match self {
            OpenMeteoEndpoint::Forecast => schema::FORECAST,
            OpenMeteoEndpoint::Historical => schema::HISTORICAL,
            OpenMeteoEndpoint::AirQuality => schema::AIR_QUALITY,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HourlyResponse {
    latitude: f64,
    longitude: f64,
    hourly: Hourly,
}

#[derive(Debug, Deserialize)]
struct Hourly {
    time: Vec<String>,
    #[serde(flatten)]
    series: HashMap<String, Vec<Option<f64>>>,
}

/// Extractor for an [`OpenMeteoEndpoint`].
#[derive(Debug, Clone)]
pub struct OpenMeteoExtractor {
    endpoint: OpenMeteoEndpoint,
    client: Client,
    url: String,
}

impl OpenMeteoExtractor {
    /// Extractor hitting the production URL of `endpoint`.
    pub fn new(endpoint: OpenMeteoEndpoint, client: Client) -> Self {
        Self {
            endpoint,
            client,
            url: endpoint.default_url().to_string(),
        }
    }

    /// Point the extractor at another base URL (mirrors, test servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// The endpoint served.
    pub fn endpoint(&self) -> OpenMeteoEndpoint {
        self.endpoint
    }

    fn query(&self, request: &ExtractRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("latitude", request.city.latitude.to_string()),
            ("longitude", request.city.longitude.to_string()),
            ("hourly", self.endpoint.variables().join(",")),
        ];
        if self.endpoint == OpenMeteoEndpoint::Historical {
            query.push(("start_date", request.window.start().format("%Y-%m-%d").to_string()));
            query.push(("end_date", request.window.end().format("%Y-%m-%d").to_string()));
        }
        query
    }

    /// Turn a decoded response into a raw batch (without `city`).
    pub(crate) fn wrangle(
        &self,
        response: HourlyResponse,
        request: &ExtractRequest,
    ) -> Result<RecordBatch, ExtractError> {
        let HourlyResponse {
            latitude,
            longitude,
            hourly: Hourly { time, mut series },
        } = response;
        let rows = time.len();

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(7);
        columns.push(Arc::new(StringArray::from(time)));
        for name in self.endpoint.variables() {
            let values = series.remove(*name).context(MalformedSnafu {
                url: self.url.as_str(),
                detail: format!("hourly.{name} is missing"),
            })?;
            ensure!(
                values.len() == rows,
                MalformedSnafu {
                    url: self.url.as_str(),
                    detail: format!(
                        "hourly.{name} has {} values for {rows} timestamps",
                        values.len()
                    ),
                }
            );
            columns.push(Arc::new(Float64Array::from(values)));
        }

        let station = Some((latitude, longitude));
        let requested = Some((request.city.latitude, request.city.longitude));
        columns.push(Arc::new(coordinates_array(&vec![station; rows])));
        columns.push(Arc::new(coordinates_array(&vec![requested; rows])));
        columns.push(Arc::new(StringArray::from(vec![
            request.date_retrieved();
            rows
        ])));

        let schema = match self.endpoint {
            OpenMeteoEndpoint::AirQuality => schema::air_quality_observations(),
            _ => schema::weather_observations(),
        };
        RecordBatch::try_new(schema, columns).context(BatchSnafu)
    }
}

#[async_trait]
impl Extractor for OpenMeteoExtractor {
    fn dataset(&self) -> &'static str {
        self.endpoint.dataset()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<RecordBatch, ExtractError> {
        debug!(
            "fetching {} for {} from {}",
            self.dataset(),
            request.city.name,
            self.url
        );
        let http = self.client.get(&self.url).query(&self.query(request));
        let response: HourlyResponse = fetch_json(http, &self.url).await?;
        self.wrangle(response, request)
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Array;
    use chrono::NaiveDate;

    use super::*;
    use crate::{batch::column_as, extract::DateWindow, registry::City};

    fn request() -> ExtractRequest {
        let day = NaiveDate::from_ymd_opt(2024, 3, 8).expect("valid date");
        ExtractRequest::new(City::new("rosario", -32.944242, -60.639321), day)
    }

    fn extractor(endpoint: OpenMeteoEndpoint) -> OpenMeteoExtractor {
        OpenMeteoExtractor::new(endpoint, Client::new())
    }

    #[test]
    fn forecast_response_becomes_weather_batch() -> Result<(), Box<dyn std::error::Error>> {
        let response: HourlyResponse = serde_json::from_str(
            r#"{
                "latitude": -32.94,
                "longitude": -60.62,
                "generationtime_ms": 0.1,
                "hourly_units": {"time": "iso8601"},
                "hourly": {
                    "time": ["2024-03-08T00:00", "2024-03-08T01:00"],
                    "temperature_2m": [21.5, null],
                    "precipitation": [0.0, 0.2],
                    "windspeed_10m": [10.1, 12.3]
                }
            }"#,
        )?;

        let batch = extractor(OpenMeteoEndpoint::Forecast).wrangle(response, &request())?;

        assert_eq!(batch.schema(), schema::weather_observations());
        assert_eq!(batch.num_rows(), 2);
        let temperature = column_as::<Float64Array>(&batch, "temperature_2m")?;
        assert!(temperature.is_null(1));
        let retrieved = column_as::<StringArray>(&batch, "date_retrieved")?;
        assert_eq!(retrieved.value(0), "2024-03-08");
        Ok(())
    }

    #[test]
    fn missing_series_is_malformed() -> Result<(), Box<dyn std::error::Error>> {
        let response: HourlyResponse = serde_json::from_str(
            r#"{"latitude": 0.0, "longitude": 0.0,
                "hourly": {"time": ["2024-03-08T00:00"], "pm10": [1.0], "pm2_5": [2.0]}}"#,
        )?;

        let err = extractor(OpenMeteoEndpoint::AirQuality)
            .wrangle(response, &request())
            .expect_err("carbon_monoxide is missing");

        assert!(matches!(err, ExtractError::Malformed { .. }));
        Ok(())
    }

    #[test]
    fn archive_query_carries_the_window() -> Result<(), Box<dyn std::error::Error>> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).ok_or("date")?;
        let end = NaiveDate::from_ymd_opt(2024, 3, 3).ok_or("date")?;
        let request = request().with_window(DateWindow::new(start, end)?);

        let query = extractor(OpenMeteoEndpoint::Historical).query(&request);
        let forecast = extractor(OpenMeteoEndpoint::Forecast).query(&request);

        assert!(query.contains(&("start_date", "2024-03-01".to_string())));
        assert!(query.contains(&("end_date", "2024-03-03".to_string())));
        assert!(!forecast.iter().any(|(k, _)| *k == "start_date"));
        Ok(())
    }
}
