//! Common types and domain logic shared across the MATOPIBA forecast services.

pub mod cities;
pub mod error;
pub mod eto;
pub mod model;
pub mod validation;

pub use cities::{CityRef, CityRegistry, StateCode, EXPECTED_CITY_COUNT};
pub use error::{ForecastError, ForecastResult};
pub use model::{
    CityFailure, CityForecast, DailyForecast, HourlySeries, Quality, RunMetadata, RunReport,
    Snapshot, ValidationMetrics,
};
pub use validation::validate;
