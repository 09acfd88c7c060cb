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

/// PM2.5 concentration (µg/m³) that maps to a simplified AQI of 100.
const PM2_5_REFERENCE: f64 = 25.0;

#[derive(Default)]
struct DailyAirQuality {
    pm10: Stats,
    pm2_5: Stats,
    co: Stats,
    latitude: First<f64>,
    longitude: First<f64>,
    date_retrieved: First<String>,
}

/// Linear PM2.5 proxy, capped at 100.
pub(crate) fn aqi_simplified(pm2_5_avg: Option<f64>) -> Option<f64> {
    pm2_5_avg.map(|pm| (pm / PM2_5_REFERENCE * 100.0).min(100.0))
}

/// Daily pollutant statistics grouped by `(date, city, geohash)`.
pub fn air_quality_daily(batch: &RecordBatch) -> Result<RecordBatch, AggregateError> {
    if batch.num_rows() == 0 {
        return Ok(RecordBatch::new_empty(schema::air_quality_daily()));
    }

    let time = text_column(batch, "time")?;
    let city = text_column(batch, CITY)?;
    let retrieved = text_column(batch, DATE_RETRIEVED)?;
    let pm10 = float_column(batch, "pm10")?;
    let pm2_5 = float_column(batch, "pm2_5")?;
    let co = float_column(batch, "carbon_monoxide")?;
    let station = CoordinateColumn::from_batch(batch, "station_coordinates")?;

    let mut groups: BTreeMap<(String, String, String), DailyAirQuality> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let (Some(t), Some(c), Some(geohash)) = (text(time, row), text(city, row), station.geohash(row))
        else {
            continue;
        };
        let date = date_string(parse_time(t)?.date());
        let day = groups.entry((date, c.to_string(), geohash)).or_default();
        day.pm10.push(value(pm10, row));
        day.pm2_5.push(value(pm2_5, row));
        day.co.push(value(co, row));
        day.latitude.push(station.latitude(row));
        day.longitude.push(station.longitude(row));
        day.date_retrieved.push(text(retrieved, row).map(str::to_string));
    }

    let n = groups.len();
    let mut keys = (Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n));
    let mut stats: [Vec<Option<f64>>; 9] = Default::default();
    let mut latitude = Vec::with_capacity(n);
    let mut longitude = Vec::with_capacity(n);
    let mut date_retrieved = Vec::with_capacity(n);
    let mut aqi = Vec::with_capacity(n);

    for ((date, city, geohash), day) in groups {
        keys.0.push(Some(date));
        keys.1.push(Some(city));
        keys.2.push(Some(geohash));
        for (i, s) in [&day.pm10, &day.pm2_5, &day.co].into_iter().enumerate() {
            stats[i * 3].push(s.min());
            stats[i * 3 + 1].push(s.max());
            stats[i * 3 + 2].push(s.mean());
        }
        aqi.push(aqi_simplified(day.pm2_5.mean()));
        latitude.push(day.latitude.into_inner());
        longitude.push(day.longitude.into_inner());
        date_retrieved.push(day.date_retrieved.into_inner());
    }

    let mut columns = vec![strings(keys.0), strings(keys.1), strings(keys.2)];
    columns.extend(stats.into_iter().map(floats));
    columns.extend([
        floats(latitude),
        floats(longitude),
        strings(date_retrieved),
        floats(aqi),
    ]);
    build(schema::air_quality_daily(), columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aqi_is_linear_up_to_the_cap() {
        assert_eq!(aqi_simplified(Some(12.5)), Some(50.0));
        assert_eq!(aqi_simplified(Some(25.0)), Some(100.0));
        assert_eq!(aqi_simplified(Some(50.0)), Some(100.0));
        assert_eq!(aqi_simplified(None), None);
    }
}
