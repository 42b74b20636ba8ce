//! Input guards and the suspicious-value filter.
//!
//! Pure syntactic sanity, run before anything else touches a point:
//! finiteness, a plausible timestamp window, and a numeric series id on the
//! legacy path. Suspicious exact zeros are flagged with context but never
//! rejected; downstream analysis decides what they mean.

use types::DataPoint;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Oldest accepted timestamp relative to now (seconds).
    pub max_age_secs: f64,
    /// Tolerated future clock skew (seconds).
    pub max_future_skew_secs: f64,
    /// Prior magnitude above which an exact zero is suspicious.
    pub suspicious_zero_threshold: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 24.0 * 3600.0,
            max_future_skew_secs: 60.0,
            suspicious_zero_threshold: 5.0,
        }
    }
}

/// Reject syntactically broken points. The reason code is always
/// `guards_failed`; the detail names the specific check.
pub fn check_point(point: &DataPoint, now: f64, cfg: &GuardConfig) -> Result<()> {
    if !point.value.is_finite() {
        return Err(GatewayError::invalid_input(
            "guards_failed",
            format!("non-finite value {}", point.value),
        ));
    }

    if point.domain.is_legacy() {
        match point.legacy_sensor_id() {
            Some(id) if id > 0 => {}
            _ => {
                return Err(GatewayError::invalid_input(
                    "guards_failed",
                    format!("legacy series id must be a positive integer: {:?}", point.series_id),
                ))
            }
        }
    }

    let age = now - point.timestamp;
    if age > cfg.max_age_secs {
        return Err(GatewayError::invalid_input(
            "guards_failed",
            format!("timestamp {:.6} is {age:.1}s old", point.timestamp),
        ));
    }
    if -age > cfg.max_future_skew_secs {
        return Err(GatewayError::invalid_input(
            "guards_failed",
            format!("timestamp {:.6} is {:.1}s in the future", point.timestamp, -age),
        ));
    }

    Ok(())
}

/// An exact zero whose previous neighbour was far from zero. Flag, never
/// reject: a dead wire and a real zero look identical at this layer.
pub fn is_suspicious_zero(value: f64, prev_value: Option<f64>, threshold: f64) -> bool {
    value == 0.0 && prev_value.map(|p| p.abs() >= threshold).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Domain;

    const NOW: f64 = 1_700_000_000.0;

    fn point(value: f64, ts: f64) -> DataPoint {
        DataPoint::new("generic/a/b", value, ts, Domain::Generic)
    }

    #[test]
    fn rejects_non_finite_values() {
        let cfg = GuardConfig::default();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(check_point(&point(bad, NOW), NOW, &cfg).is_err());
        }
        assert!(check_point(&point(0.0, NOW), NOW, &cfg).is_ok());
    }

    #[test]
    fn age_window_boundaries() {
        let cfg = GuardConfig::default();
        let day = 24.0 * 3600.0;
        // One microsecond inside the window: accepted.
        assert!(check_point(&point(1.0, NOW - day + 1e-6), NOW, &cfg).is_ok());
        // One microsecond outside: rejected.
        assert!(check_point(&point(1.0, NOW - day - 1e-6), NOW, &cfg).is_err());
    }

    #[test]
    fn future_skew_tolerance() {
        let cfg = GuardConfig::default();
        assert!(check_point(&point(1.0, NOW + 59.0), NOW, &cfg).is_ok());
        assert!(check_point(&point(1.0, NOW + 61.0), NOW, &cfg).is_err());
    }

    #[test]
    fn legacy_series_must_be_numeric_and_positive() {
        let cfg = GuardConfig::default();
        let ok = DataPoint::legacy(42, 1.0, NOW);
        assert!(check_point(&ok, NOW, &cfg).is_ok());

        for bad in ["0", "-3", "abc"] {
            let p = DataPoint::new(bad, 1.0, NOW, Domain::Iot);
            assert!(check_point(&p, NOW, &cfg).is_err());
        }
    }

    #[test]
    fn suspicious_zero_is_flag_only() {
        // Prior far from zero: suspicious.
        assert!(is_suspicious_zero(0.0, Some(12.0), 5.0));
        assert!(is_suspicious_zero(0.0, Some(-7.5), 5.0));
        // Prior near zero, or no prior, or non-zero value: not suspicious.
        assert!(!is_suspicious_zero(0.0, Some(2.0), 5.0));
        assert!(!is_suspicious_zero(0.0, None, 5.0));
        assert!(!is_suspicious_zero(0.0001, Some(100.0), 5.0));
    }
}
