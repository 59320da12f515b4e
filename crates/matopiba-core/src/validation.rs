//! Model-vs-provider agreement metrics over a run's daily forecasts.
//!
//! Validation is diagnostic only: a degraded quality label never blocks the
//! snapshot write. The pipeline logs degraded runs at WARN and records the
//! label in the run metadata and the audit row.

use crate::model::{Quality, ValidationMetrics};

/// Quality thresholds; both criteria must hold for a class.
const EXCELLENT_R2: f64 = 0.75;
const EXCELLENT_RMSE: f64 = 1.2;
const ACCEPTABLE_R2: f64 = 0.65;
const ACCEPTABLE_RMSE: f64 = 1.5;

/// Compute global agreement metrics between computed and provider daily ETo.
///
/// Pairs where either value is non-finite are skipped. An empty (or fully
/// skipped) input yields `n_samples = 0` and `BELOW_EXPECTED`.
pub fn validate(model: &[f64], provider: &[f64]) -> ValidationMetrics {
    let pairs: Vec<(f64, f64)> = model
        .iter()
        .zip(provider)
        .filter(|(m, p)| m.is_finite() && p.is_finite())
        .map(|(&m, &p)| (m, p))
        .collect();

    let n = pairs.len();
    if n == 0 {
        return ValidationMetrics::empty();
    }
    let nf = n as f64;

    let bias = pairs.iter().map(|(m, p)| m - p).sum::<f64>() / nf;
    let mae = pairs.iter().map(|(m, p)| (m - p).abs()).sum::<f64>() / nf;
    let rmse = (pairs.iter().map(|(m, p)| (m - p).powi(2)).sum::<f64>() / nf).sqrt();

    let provider_mean = pairs.iter().map(|(_, p)| p).sum::<f64>() / nf;
    let ss_res = pairs.iter().map(|(m, p)| (m - p).powi(2)).sum::<f64>();
    let ss_tot = pairs.iter().map(|(_, p)| (p - provider_mean).powi(2)).sum::<f64>();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { f64::NAN };

    ValidationMetrics {
        r2: if r2.is_finite() { Some(r2) } else { None },
        rmse_mm_day: Some(rmse),
        bias_mm_day: Some(bias),
        mae_mm_day: Some(mae),
        n_samples: n,
        quality: classify(r2, rmse),
    }
}

/// Classify a run's agreement quality. A NaN r² never qualifies.
pub fn classify(r2: f64, rmse: f64) -> Quality {
    if r2 >= EXCELLENT_R2 && rmse <= EXCELLENT_RMSE {
        Quality::Excellent
    } else if r2 >= ACCEPTABLE_R2 && rmse <= ACCEPTABLE_RMSE {
        Quality::Acceptable
    } else {
        Quality::BelowExpected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_agreement_is_excellent() {
        let provider = [3.1, 4.5, 5.2, 6.0, 4.8, 3.9];
        let metrics = validate(&provider, &provider);
        assert_eq!(metrics.n_samples, 6);
        assert!((metrics.r2.unwrap() - 1.0).abs() < 1e-12);
        assert!(metrics.rmse_mm_day.unwrap() < 1e-12);
        assert!(metrics.bias_mm_day.unwrap().abs() < 1e-12);
        assert_eq!(metrics.quality, Quality::Excellent);
    }

    #[test]
    fn test_large_bias_is_below_expected() {
        let provider = [3.0, 4.0, 5.0, 6.0, 4.5, 3.5];
        let model: Vec<f64> = provider.iter().map(|p| p + 3.0).collect();
        let metrics = validate(&model, &provider);
        assert!((metrics.bias_mm_day.unwrap() - 3.0).abs() < 1e-12);
        assert!(metrics.rmse_mm_day.unwrap() > 1.5);
        assert_eq!(metrics.quality, Quality::BelowExpected);
    }

    #[test]
    fn test_moderate_error_is_acceptable() {
        // Offsets alternating ±0.6 around the provider track r² well but
        // push RMSE past the excellent bound given this small spread.
        let provider = [2.0, 3.5, 5.0, 6.5, 8.0, 9.5, 2.5, 4.0, 5.5, 7.0];
        let model: Vec<f64> = provider
            .iter()
            .enumerate()
            .map(|(i, p)| if i % 2 == 0 { p + 1.25 } else { p - 1.25 })
            .collect();
        let metrics = validate(&model, &provider);
        assert_eq!(metrics.quality, Quality::Acceptable);
    }

    #[test]
    fn test_empty_input_is_below_expected() {
        let metrics = validate(&[], &[]);
        assert_eq!(metrics.n_samples, 0);
        assert!(metrics.r2.is_none());
        assert!(metrics.rmse_mm_day.is_none());
        assert_eq!(metrics.quality, Quality::BelowExpected);
    }

    #[test]
    fn test_non_finite_pairs_are_skipped() {
        let provider = [3.0, f64::NAN, 5.0, 6.0];
        let model = [3.1, 4.2, f64::INFINITY, 5.9];
        let metrics = validate(&model, &provider);
        assert_eq!(metrics.n_samples, 2);
    }

    #[test]
    fn test_zero_provider_variance_yields_no_r2() {
        let provider = [5.0; 8];
        let model = [5.1; 8];
        let metrics = validate(&model, &provider);
        assert!(metrics.r2.is_none());
        assert_eq!(metrics.quality, Quality::BelowExpected);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(0.75, 1.2), Quality::Excellent);
        assert_eq!(classify(0.74, 1.0), Quality::Acceptable);
        assert_eq!(classify(0.80, 1.3), Quality::Acceptable);
        assert_eq!(classify(0.65, 1.5), Quality::Acceptable);
        assert_eq!(classify(0.64, 1.0), Quality::BelowExpected);
        assert_eq!(classify(0.90, 1.6), Quality::BelowExpected);
        assert_eq!(classify(f64::NAN, 0.5), Quality::BelowExpected);
    }
}
