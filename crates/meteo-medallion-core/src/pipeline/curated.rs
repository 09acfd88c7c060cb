use snafu::prelude::*;

use crate::{
    aggregate::forecast_combined,
    load::Layer,
    pipeline::{AggregateSnafu, DatasetOutcome, Pipeline},
    registry::City,
    schema::{AIR_QUALITY_DAILY, CITY, FORECAST_COMBINED, WEATHER_FORECAST},
};

impl Pipeline {
    pub(super) async fn curated_city(&self, city: &City) -> Vec<DatasetOutcome> {
        let layer = Layer::Curated;
        let (weather, weather_attempts) = self
            .read_city(Layer::Enriched, WEATHER_FORECAST, city)
            .await;
        let (air, air_attempts) = self
            .read_city(Layer::Enriched, AIR_QUALITY_DAILY, city)
            .await;
        let read_attempts = weather_attempts.max(air_attempts);

        let (weather, air) = match (weather, air) {
            (Ok(weather), Ok(air)) => (weather, air),
            (Err(e), _) | (_, Err(e)) => {
                return vec![Self::outcome(
                    layer,
                    city,
                    FORECAST_COMBINED,
                    read_attempts,
                    Err(e),
                )];
            }
        };

        let outcome = match forecast_combined(&weather, &air).context(AggregateSnafu {
            dataset: FORECAST_COMBINED,
            city: city.name.as_str(),
        }) {
            Err(e) => Self::outcome(layer, city, FORECAST_COMBINED, read_attempts, Err(e)),
            Ok(batch) if batch.num_rows() == 0 => Self::skipped(
                layer,
                city,
                FORECAST_COMBINED,
                read_attempts,
                "no forecast day has both weather and air quality",
            ),
            Ok(batch) => {
                let (result, attempts) = self
                    .merge_into(layer, city, FORECAST_COMBINED, &batch, &["date", CITY])
                    .await;
                Self::outcome(
                    layer,
                    city,
                    FORECAST_COMBINED,
                    attempts.max(read_attempts),
                    result,
                )
            }
        };
        vec![outcome]
    }
}
