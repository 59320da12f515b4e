//! FAO-56 Penman-Monteith reference evapotranspiration on hourly arrays.
//!
//! The kernel operates column-wise: every step except extraterrestrial
//! radiation is a whole-array operation over the hour axis. Extraterrestrial
//! radiation iterates hour by hour because of its datetime dependency.
//!
//! Hourly coefficients follow the ASCE-EWRI standardized reference surface:
//! `Cn=37, Cd=0.24` for daylit hours and `Cn=6, Cd=0.96` at night. The night
//! switch is mandatory; without it nighttime ETo inflates and the daily sum
//! no longer agrees with the provider.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::America::Sao_Paulo;

use crate::error::{ForecastError, ForecastResult};
use crate::model::{DailyForecast, HourlySeries};

/// Solar constant, MJ m⁻² min⁻¹ (FAO-56 Eq. 28).
const SOLAR_CONSTANT: f64 = 0.0820;

/// Stefan-Boltzmann constant for hourly periods, MJ m⁻² h⁻¹ K⁻⁴.
const SIGMA_HOURLY: f64 = 2.043e-10;

/// Reference grass albedo.
const ALBEDO: f64 = 0.23;

/// Standardized hourly coefficients, daytime.
const DAY_CN: f64 = 37.0;
const DAY_CD: f64 = 0.24;

/// Standardized hourly coefficients, nighttime.
const NIGHT_CN: f64 = 6.0;
const NIGHT_CD: f64 = 0.96;

/// Minimum number of hourly records the kernel accepts.
pub const MIN_HOURS: usize = 24;

/// Hourly kernel output.
#[derive(Debug, Clone)]
pub struct HourlyEto {
    pub eto_mm_h: Vec<f64>,
    /// Cells where a non-finite result was replaced with 0.
    pub non_finite_substituted: usize,
}

/// Solar declination in radians (FAO-56 Eq. 24).
pub fn declination(day_of_year: u32) -> f64 {
    0.409 * (2.0 * PI * day_of_year as f64 / 365.0 - 1.39).sin()
}

/// Inverse relative Earth-Sun distance (FAO-56 Eq. 23).
pub fn inverse_relative_distance(day_of_year: u32) -> f64 {
    1.0 + 0.033 * (2.0 * PI * day_of_year as f64 / 365.0).cos()
}

/// Seasonal correction for solar time in hours (FAO-56 Eq. 32).
fn seasonal_correction(day_of_year: u32) -> f64 {
    let b = 2.0 * PI * (day_of_year as f64 - 81.0) / 364.0;
    0.1645 * (2.0 * b).sin() - 0.1255 * b.cos() - 0.025 * b.sin()
}

/// Saturation vapour pressure in kPa at temperature `t` °C (FAO-56 Eq. 11).
pub fn saturation_vapor_pressure(t: f64) -> f64 {
    0.6108 * ((17.27 * t) / (t + 237.3)).exp()
}

/// Extraterrestrial radiation for the hour starting at `ts_utc`,
/// in MJ m⁻² h⁻¹ (FAO-56 Eq. 28).
///
/// The solar time angle is evaluated at the midpoint of the hour.
pub fn extraterrestrial_radiation(ts_utc: DateTime<Utc>, latitude_deg: f64, longitude_deg: f64) -> f64 {
    let midpoint = ts_utc + Duration::minutes(30);
    let doy = midpoint.ordinal();

    let delta = declination(doy);
    let dr = inverse_relative_distance(doy);
    let sc = seasonal_correction(doy);
    let phi = latitude_deg.to_radians();

    // Clock time in fractional UTC hours; longitude shifts it to solar time.
    let t = midpoint.hour() as f64 + midpoint.minute() as f64 / 60.0;
    let solar_time = t + longitude_deg / 15.0 + sc;

    let mut omega = PI / 12.0 * (solar_time - 12.0);
    if omega < -PI {
        omega += 2.0 * PI;
    } else if omega > PI {
        omega -= 2.0 * PI;
    }

    let omega_s = (-phi.tan() * delta.tan()).clamp(-1.0, 1.0).acos();
    let omega1 = (omega - PI / 24.0).clamp(-omega_s, omega_s);
    let omega2 = (omega + PI / 24.0).clamp(-omega_s, omega_s);
    if omega1 >= omega2 {
        return 0.0;
    }

    let ra = 12.0 * 60.0 / PI
        * SOLAR_CONSTANT
        * dr
        * ((omega2 - omega1) * phi.sin() * delta.sin()
            + phi.cos() * delta.cos() * (omega2.sin() - omega1.sin()));
    ra.max(0.0)
}

/// Compute hourly reference evapotranspiration for one station.
pub fn compute_hourly_eto(
    series: &HourlySeries,
    latitude_deg: f64,
    longitude_deg: f64,
    elevation_m: f64,
) -> ForecastResult<HourlyEto> {
    series.check_columns()?;
    let n = series.len();
    if n < MIN_HOURS {
        return Err(ForecastError::InsufficientHours { got: n, need: MIN_HOURS });
    }

    // 1. Wind 10 m → 2 m log-profile adjustment; stalled readings floor at 0.5 m/s.
    let wind_factor = 4.87 / (67.8_f64 * 10.0 - 5.42).ln();
    let u2: Vec<f64> = series
        .wind_speed_10m_ms
        .iter()
        .map(|&u10| (if u10 <= 0.0 { 0.5 } else { u10 }) * wind_factor)
        .collect();

    // 2-3. Atmospheric pressure and psychrometric constant.
    let pressure = 101.3 * ((293.0 - 0.0065 * elevation_m) / 293.0).powf(5.26);
    let gamma = 0.000665 * pressure;

    // 4-7. Vapour pressure terms and slope of the saturation curve.
    let es: Vec<f64> = series.temp_c.iter().map(|&t| saturation_vapor_pressure(t)).collect();
    let ea: Vec<f64> = series
        .temp_c
        .iter()
        .zip(&series.dew_point_c)
        .map(|(&t, td)| saturation_vapor_pressure(td.unwrap_or(t - 5.0)))
        .collect();
    let vpd: Vec<f64> = es.iter().zip(&ea).map(|(&e, &a)| (e - a).max(0.0)).collect();
    let slope: Vec<f64> = series
        .temp_c
        .iter()
        .zip(&es)
        .map(|(&t, &e)| 4098.0 * e / (t + 237.3).powi(2))
        .collect();

    // 8. Shortwave W/m² → MJ m⁻² h⁻¹.
    let rs: Vec<f64> = series
        .shortwave_radiation_wm2
        .iter()
        .map(|&w| w * 3600.0 / 1.0e6)
        .collect();

    // 9. Extraterrestrial radiation, per hour.
    let ra: Vec<f64> = series
        .timestamps_utc
        .iter()
        .map(|&ts| extraterrestrial_radiation(ts, latitude_deg, longitude_deg))
        .collect();
    let rso: Vec<f64> = ra.iter().map(|&r| (0.75 + 2.0e-5 * elevation_m) * r).collect();

    // Cloudiness ratio for longwave; night hours carry the last daylit value.
    let mut ratio = Vec::with_capacity(n);
    let mut last_ratio = 0.5;
    for (&r_s, &r_so) in rs.iter().zip(&rso) {
        if r_so > 0.05 {
            last_ratio = (r_s / r_so).clamp(0.3, 1.0);
        }
        ratio.push(last_ratio);
    }

    // 10. Day/night switch keys off measured shortwave.
    let is_night: Vec<bool> = series
        .shortwave_radiation_wm2
        .iter()
        .map(|&w| w == 0.0)
        .collect();

    // 8 (cont). Net radiation and soil heat flux. G is zero while the sun is
    // up; at night it is the FAO-56 fraction of the (negative) net radiation.
    let rnl: Vec<f64> = series
        .temp_c
        .iter()
        .zip(ea.iter().zip(&ratio))
        .map(|(&t, (&a, &f))| {
            SIGMA_HOURLY
                * (t + 273.16).powi(4)
                * (0.34 - 0.14 * a.max(0.0).sqrt())
                * (1.35 * f - 0.35)
        })
        .collect();
    let rn: Vec<f64> = rs.iter().zip(&rnl).map(|(&s, &l)| (1.0 - ALBEDO) * s - l).collect();
    let g: Vec<f64> = rn
        .iter()
        .zip(&is_night)
        .map(|(&r, &night)| if night { 0.5 * r } else { 0.0 })
        .collect();

    // 11. Standardized hourly Penman-Monteith over the assembled columns.
    let mut eto_mm_h = Vec::with_capacity(n);
    let mut non_finite = 0usize;
    for i in 0..n {
        let (cn, cd) = if is_night[i] { (NIGHT_CN, NIGHT_CD) } else { (DAY_CN, DAY_CD) };
        let numerator = 0.408 * slope[i] * (rn[i] - g[i])
            + gamma * (cn / (series.temp_c[i] + 273.0)) * u2[i] * vpd[i];
        let denominator = slope[i] + gamma * (1.0 + cd * u2[i]);
        let mut value = if denominator > 0.0 { numerator / denominator } else { 0.0 };
        if !value.is_finite() {
            non_finite += 1;
            value = 0.0;
        }
        eto_mm_h.push(value.max(0.0));
    }

    Ok(HourlyEto { eto_mm_h, non_finite_substituted: non_finite })
}

/// Aggregate an hourly series to daily values, grouping by the
/// America/Sao_Paulo calendar date. Only complete 24-hour days are kept.
pub fn aggregate_daily(series: &HourlySeries, eto_mm_h: &[f64]) -> Vec<DailyForecast> {
    let mut groups: BTreeMap<chrono::NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, ts) in series.timestamps_utc.iter().enumerate() {
        let local_date = ts.with_timezone(&Sao_Paulo).date_naive();
        groups.entry(local_date).or_default().push(i);
    }

    groups
        .into_iter()
        .filter(|(_, idx)| idx.len() == 24)
        .map(|(date, idx)| {
            let temp = || idx.iter().map(|&i| series.temp_c[i]);
            DailyForecast {
                date,
                t_max_c: temp().fold(f64::MIN, f64::max),
                t_min_c: temp().fold(f64::MAX, f64::min),
                t_mean_c: mean(temp()),
                rh_mean_pct: mean(idx.iter().map(|&i| series.relative_humidity_pct[i])),
                ws_mean_ms: mean(idx.iter().map(|&i| series.wind_speed_10m_ms[i])),
                radiation_sum_mj_m2: idx
                    .iter()
                    .map(|&i| series.shortwave_radiation_wm2[i] * 3600.0 / 1.0e6)
                    .sum(),
                precipitation_sum_mm: idx.iter().map(|&i| series.precipitation_mm[i]).sum(),
                eto_model_mm_day: idx.iter().map(|&i| eto_mm_h[i]).sum(),
                eto_provider_mm_day: idx.iter().map(|&i| series.provider_eto_mm_h[i]).sum(),
            }
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}
