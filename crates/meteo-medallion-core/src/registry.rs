//! Static registry of the cities the pipelines run for.
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named location with WGS84 coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    /// Identifier used in the `city` column and in partition paths.
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl City {
    /// Build a city from its parts.
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.latitude, self.longitude)
    }
}

const CITIES: [(&str, f64, f64); 3] = [
    ("buenos_aires", -34.611778, -58.417309),
    ("cordoba", -31.4135, -64.181056),
    ("rosario", -32.944242, -60.639321),
];

/// Every registered city, in a stable order.
pub fn cities() -> Vec<City> {
    CITIES
        .iter()
        .map(|&(name, lat, lon)| City::new(name, lat, lon))
        .collect()
}

/// Look a city up by name.
pub fn find(name: &str) -> Option<City> {
    cities().into_iter().find(|c| c.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_the_three_cities() {
        let names: Vec<String> = cities().into_iter().map(|c| c.name).collect();

        assert_eq!(names, ["buenos_aires", "cordoba", "rosario"]);
        assert_eq!(find("cordoba").map(|c| c.latitude), Some(-31.4135));
        assert!(find("mendoza").is_none());
    }
}
