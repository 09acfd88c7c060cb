use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use arrow::array::{Int32Array, Int64Array, RecordBatch};
use chrono::{NaiveDate, Timelike};

use crate::{
    aggregate::{
        AggregateError, build, float_column, floats, parse_time, stats::Stats, strings, text,
        text_column, value,
    },
    schema::{self, CITY},
};

#[derive(Default)]
struct HourProfile {
    temperature: Stats,
    precipitation: Stats,
    windspeed: Stats,
    days: BTreeSet<NaiveDate>,
}

/// Hour-of-day profile of historical weather, grouped by `(hour, city)`.
///
/// `days_count` is the number of distinct calendar days contributing to the
/// hour.
pub fn hourly_historical_analysis(batch: &RecordBatch) -> Result<RecordBatch, AggregateError> {
    if batch.num_rows() == 0 {
        return Ok(RecordBatch::new_empty(schema::hourly_historical_analysis()));
    }

    let time = text_column(batch, "time")?;
    let city = text_column(batch, CITY)?;
    let temperature = float_column(batch, "temperature_2m")?;
    let precipitation = float_column(batch, "precipitation")?;
    let windspeed = float_column(batch, "windspeed_10m")?;

    let mut groups: BTreeMap<(u32, String), HourProfile> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let (Some(t), Some(c)) = (text(time, row), text(city, row)) else {
            continue;
        };
        let at = parse_time(t)?;
        let profile = groups.entry((at.hour(), c.to_string())).or_default();
        profile.temperature.push(value(temperature, row));
        profile.precipitation.push(value(precipitation, row));
        profile.windspeed.push(value(windspeed, row));
        profile.days.insert(at.date());
    }

    let n = groups.len();
    let mut hours = Vec::with_capacity(n);
    let mut cities = Vec::with_capacity(n);
    let mut temp_min = Vec::with_capacity(n);
    let mut temp_max = Vec::with_capacity(n);
    let mut temp_avg = Vec::with_capacity(n);
    let mut precipitation_avg = Vec::with_capacity(n);
    let mut windspeed_avg = Vec::with_capacity(n);
    let mut days_count = Vec::with_capacity(n);

    for ((hour, city), profile) in groups {
        // chrono hours are 0..24
        hours.push(i32::try_from(hour).ok());
        cities.push(Some(city));
        temp_min.push(profile.temperature.min());
        temp_max.push(profile.temperature.max());
        temp_avg.push(profile.temperature.mean());
        precipitation_avg.push(profile.precipitation.mean());
        windspeed_avg.push(profile.windspeed.mean());
        days_count.push(i64::try_from(profile.days.len()).ok());
    }

    build(
        schema::hourly_historical_analysis(),
        vec![
            Arc::new(Int32Array::from(hours)),
            strings(cities),
            floats(temp_min),
            floats(temp_max),
            floats(temp_avg),
            floats(precipitation_avg),
            floats(windspeed_avg),
            Arc::new(Int64Array::from(days_count)),
        ],
    )
}
