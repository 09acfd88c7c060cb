//! Nearby weather stations from the Meteostat API (via RapidAPI).
use std::{collections::BTreeMap, fmt, sync::Arc};

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use snafu::prelude::*;

use crate::{
    extract::{BatchSnafu, ExtractError, ExtractRequest, Extractor, fetch_json},
    schema::{self, coordinates_array},
};

/// Maximum number of stations returned per request.
const STATION_LIMIT: u32 = 50;
/// Search radius in meters.
const SEARCH_RADIUS_M: u32 = 100_000;

/// Adds credentials to an outgoing request.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Decorate `request` with whatever the upstream expects.
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder;
}

/// RapidAPI header authentication.
#[derive(Clone)]
pub struct RapidApiAuth {
    host: String,
    api_key: String,
}

impl RapidApiAuth {
    /// Credentials for `host`.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
        }
    }

    /// The RapidAPI host.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Debug for RapidApiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RapidApiAuth")
            .field("host", &self.host)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Authenticator for RapidApiAuth {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-RapidAPI-Host", &self.host)
            .header("X-RapidAPI-Key", &self.api_key)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StationsResponse {
    meta: Meta,
    #[serde(default)]
    data: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    generated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Point {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Station {
    id: Option<String>,
    /// Station name keyed by language code.
    #[serde(default)]
    name: BTreeMap<String, String>,
    distance: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location: Option<Point>,
}

impl Station {
    /// English name when present, otherwise the first language listed.
    fn display_name(&self) -> Option<(&str, &str)> {
        self.name
            .get_key_value("en")
            .or_else(|| self.name.iter().next())
            .map(|(lang, name)| (lang.as_str(), name.as_str()))
    }

    fn latitude(&self) -> Option<f64> {
        self.latitude
            .or_else(|| self.location.as_ref().and_then(|p| p.latitude))
    }

    fn longitude(&self) -> Option<f64> {
        self.longitude
            .or_else(|| self.location.as_ref().and_then(|p| p.longitude))
    }
}

/// Weather stations within 100 km of the requested city.
#[derive(Debug)]
pub struct NearestStationsExtractor {
    client: Client,
    url: String,
    auth: Option<Box<dyn Authenticator>>,
}

impl NearestStationsExtractor {
    /// Extractor for `https://{host}/stations/nearby`.
    pub fn new(client: Client, host: &str) -> Self {
        Self {
            client,
            url: format!("https://{host}/stations/nearby"),
            auth: None,
        }
    }

    /// Attach credentials sent with every request.
    pub fn with_auth(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Box::new(auth));
        self
    }

    /// Point the extractor at another URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request(&self, request: &ExtractRequest) -> RequestBuilder {
        let http = self.client.get(&self.url).query(&[
            ("lat", request.city.latitude.to_string()),
            ("lon", request.city.longitude.to_string()),
            ("limit", STATION_LIMIT.to_string()),
            ("radius", SEARCH_RADIUS_M.to_string()),
        ]);
        match &self.auth {
            Some(auth) => auth.authenticate(http),
            None => http,
        }
    }

    pub(crate) fn wrangle(
        &self,
        response: StationsResponse,
        request: &ExtractRequest,
    ) -> Result<RecordBatch, ExtractError> {
        let rows = response.data.len();
        let names: Vec<Option<(&str, &str)>> =
            response.data.iter().map(Station::display_name).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(
                response.data.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                names.iter().map(|n| n.map(|(_, name)| name)).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                names.iter().map(|n| n.map(|(lang, _)| lang)).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                response.data.iter().map(|s| s.distance).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                response.data.iter().map(Station::latitude).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                response.data.iter().map(Station::longitude).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(vec![response.meta.generated.clone(); rows])),
            Arc::new(coordinates_array(&vec![
                Some((request.city.latitude, request.city.longitude));
                rows
            ])),
            Arc::new(StringArray::from(vec![request.date_retrieved(); rows])),
        ];
        RecordBatch::try_new(schema::stations(), columns).context(BatchSnafu)
    }
}

#[async_trait]
impl Extractor for NearestStationsExtractor {
    fn dataset(&self) -> &'static str {
        schema::NEAREST_STATIONS
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<RecordBatch, ExtractError> {
        debug!("fetching stations near {}", request.city);
        let response: StationsResponse = fetch_json(self.request(request), &self.url).await?;
        self.wrangle(response, request)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{batch::column_as, registry::City};

    fn request() -> ExtractRequest {
        let day = NaiveDate::from_ymd_opt(2024, 3, 8).expect("valid date");
        ExtractRequest::new(City::new("cordoba", -31.4135, -64.181056), day)
    }

    #[test]
    fn stations_response_is_flattened() -> Result<(), Box<dyn std::error::Error>> {
        let response: StationsResponse = serde_json::from_str(
            r#"{
                "meta": {"generated": "2024-03-08 10:00:00"},
                "data": [
                    {"id": "87344", "name": {"en": "Cordoba Airport"}, "distance": 9500.2,
                     "location": {"latitude": -31.3167, "longitude": -64.2167}},
                    {"id": "87345", "name": {"es": "Cordoba Observatorio"}, "distance": 1200.0}
                ]
            }"#,
        )?;
        let extractor = NearestStationsExtractor::new(Client::new(), "meteostat.p.rapidapi.com");

        let batch = extractor.wrangle(response, &request())?;

        assert_eq!(batch.schema(), schema::stations());
        let names = column_as::<StringArray>(&batch, "name")?;
        let languages = column_as::<StringArray>(&batch, "name_language")?;
        assert_eq!(names.value(1), "Cordoba Observatorio");
        assert_eq!(languages.value(1), "es");
        let latitude = column_as::<Float64Array>(&batch, "latitude")?;
        assert_eq!(latitude.value(0), -31.3167);
        let generated = column_as::<StringArray>(&batch, "generated_at")?;
        assert_eq!(generated.value(1), "2024-03-08 10:00:00");
        Ok(())
    }

    #[test]
    fn rapidapi_headers_are_attached_and_key_is_not_logged() -> Result<(), Box<dyn std::error::Error>>
    {
        let auth = RapidApiAuth::new("meteostat.p.rapidapi.com", "secret");
        let extractor =
            NearestStationsExtractor::new(Client::new(), auth.host()).with_auth(auth.clone());

        let built = extractor.request(&request()).build()?;

        assert_eq!(built.headers()["X-RapidAPI-Key"], "secret");
        assert!(built.url().as_str().contains("radius=100000"));
        assert!(!format!("{auth:?}").contains("secret"));
        Ok(())
    }
}
