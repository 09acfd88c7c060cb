use std::collections::BTreeMap;

use arrow::array::RecordBatch;

use crate::{
    aggregate::{
        AggregateError, CoordinateColumn, build, date_string, float_column, floats, parse_time,
        stats::{First, Stats},
        strings, text, text_column, value,
    },
    schema::{self, CITY, DATE_RETRIEVED},
};

#[derive(Default)]
struct DailyWeather {
    temperature: Stats,
    precipitation: Stats,
    windspeed: Stats,
    latitude: First<f64>,
    longitude: First<f64>,
    date_retrieved: First<String>,
}

/// Daily summary of hourly weather readings.
///
/// Groups by `(date, city, geohash)` where `date` is the calendar day of
/// `time` and `geohash` encodes the station coordinates. Used for both the
/// historical archive and the forecast.
pub fn weather_daily_summary(batch: &RecordBatch) -> Result<RecordBatch, AggregateError> {
    if batch.num_rows() == 0 {
        return Ok(RecordBatch::new_empty(schema::weather_summary()));
    }

    let time = text_column(batch, "time")?;
    let city = text_column(batch, CITY)?;
    let retrieved = text_column(batch, DATE_RETRIEVED)?;
    let temperature = float_column(batch, "temperature_2m")?;
    let precipitation = float_column(batch, "precipitation")?;
    let windspeed = float_column(batch, "windspeed_10m")?;
    let station = CoordinateColumn::from_batch(batch, "station_coordinates")?;

    let mut groups: BTreeMap<(String, String, String), DailyWeather> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let (Some(t), Some(c), Some(geohash)) = (text(time, row), text(city, row), station.geohash(row))
        else {
            continue;
        };
        let date = date_string(parse_time(t)?.date());
        let day = groups.entry((date, c.to_string(), geohash)).or_default();
        day.temperature.push(value(temperature, row));
        day.precipitation.push(value(precipitation, row));
        day.windspeed.push(value(windspeed, row));
        day.latitude.push(station.latitude(row));
        day.longitude.push(station.longitude(row));
        day.date_retrieved.push(text(retrieved, row).map(str::to_string));
    }

    let n = groups.len();
    let mut dates = Vec::with_capacity(n);
    let mut cities = Vec::with_capacity(n);
    let mut geohashes = Vec::with_capacity(n);
    let mut temp_min = Vec::with_capacity(n);
    let mut temp_max = Vec::with_capacity(n);
    let mut temp_avg = Vec::with_capacity(n);
    let mut total_precipitation = Vec::with_capacity(n);
    let mut avg_windspeed = Vec::with_capacity(n);
    let mut latitude = Vec::with_capacity(n);
    let mut longitude = Vec::with_capacity(n);
    let mut date_retrieved = Vec::with_capacity(n);
    let mut temp_range = Vec::with_capacity(n);

    for ((date, city, geohash), day) in groups {
        dates.push(Some(date));
        cities.push(Some(city));
        geohashes.push(Some(geohash));
        temp_min.push(day.temperature.min());
        temp_max.push(day.temperature.max());
        temp_avg.push(day.temperature.mean());
        total_precipitation.push(Some(day.precipitation.sum()));
        avg_windspeed.push(day.windspeed.mean());
        latitude.push(day.latitude.into_inner());
        longitude.push(day.longitude.into_inner());
        date_retrieved.push(day.date_retrieved.into_inner());
        temp_range.push(day.temperature.range());
    }

    build(
        schema::weather_summary(),
        vec![
            strings(dates),
            strings(cities),
            strings(geohashes),
            floats(temp_min),
            floats(temp_max),
            floats(temp_avg),
            floats(total_precipitation),
            floats(avg_windspeed),
            floats(latitude),
            floats(longitude),
            strings(date_retrieved),
            floats(temp_range),
        ],
    )
}
