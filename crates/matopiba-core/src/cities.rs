//! Static registry of the 337 MATOPIBA municipalities.
//!
//! The city table is bundled into the binary and loaded once at process
//! start. Startup fails if the table does not contain exactly the expected
//! number of rows or if any row carries an invalid coordinate.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Number of municipalities the bundled table must contain.
pub const EXPECTED_CITY_COUNT: usize = 337;

const CITIES_CSV: &str = include_str!("../data/cities_matopiba_337.csv");

/// Brazilian state the municipality belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCode {
    #[serde(rename = "MA")]
    Ma,
    #[serde(rename = "TO")]
    To,
    #[serde(rename = "PI")]
    Pi,
    #[serde(rename = "BA")]
    Ba,
}

impl StateCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ma => "MA",
            Self::To => "TO",
            Self::Pi => "PI",
            Self::Ba => "BA",
        }
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One municipality in the static registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRef {
    pub code: String,
    pub name: String,
    pub state: StateCode,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
}

/// Immutable registry of all municipalities, indexed by city code.
#[derive(Debug)]
pub struct CityRegistry {
    cities: Vec<CityRef>,
    by_code: HashMap<String, usize>,
}

impl CityRegistry {
    /// Load the bundled city table, validating it for use at startup.
    pub fn load_bundled() -> ForecastResult<Self> {
        Self::parse_csv(CITIES_CSV)
    }

    fn parse_csv(text: &str) -> ForecastResult<Self> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let mut cities = Vec::with_capacity(EXPECTED_CITY_COUNT);

        for (line, record) in reader.deserialize::<CityRef>().enumerate() {
            let city = record.map_err(|e| {
                ForecastError::CityListInvalid(format!("row {}: {}", line + 1, e))
            })?;

            if !city.latitude.is_finite() || !city.longitude.is_finite() {
                return Err(ForecastError::CityListInvalid(format!(
                    "city {} has a non-finite coordinate",
                    city.code
                )));
            }
            if !(-90.0..=90.0).contains(&city.latitude)
                || !(-180.0..=180.0).contains(&city.longitude)
            {
                return Err(ForecastError::CityListInvalid(format!(
                    "city {} coordinate out of range",
                    city.code
                )));
            }

            cities.push(city);
        }

        if cities.len() != EXPECTED_CITY_COUNT {
            return Err(ForecastError::CityListInvalid(format!(
                "expected {} cities, found {}",
                EXPECTED_CITY_COUNT,
                cities.len()
            )));
        }

        let mut by_code = HashMap::with_capacity(cities.len());
        for (idx, city) in cities.iter().enumerate() {
            if by_code.insert(city.code.clone(), idx).is_some() {
                return Err(ForecastError::CityListInvalid(format!(
                    "duplicate city code {}",
                    city.code
                )));
            }
        }

        Ok(Self { cities, by_code })
    }

    pub fn cities(&self) -> &[CityRef] {
        &self.cities
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&CityRef> {
        self.by_code.get(code).map(|&idx| &self.cities[idx])
    }

    /// Fixed-size batches for the provider's multi-coordinate requests.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = &[CityRef]> {
        self.cities.chunks(size)
    }
}
