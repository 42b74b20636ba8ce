//! Per-series configuration: bands, rate-of-change limits, flags.

use serde::{Deserialize, Serialize};

use crate::data_point::Domain;

/// An optional closed interval. A value on the boundary is in-band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl BandLimits {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// True when neither bound is configured.
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Strict violation: the value falls outside the closed interval.
    pub fn violates(&self, value: f64) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return true;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return true;
            }
        }
        false
    }

    pub fn contains(&self, value: f64) -> bool {
        !self.violates(value)
    }
}

/// Rate-of-change thresholds for delta-spike detection. Every bound is
/// optional and independently checkable; the spike fires when any one trips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateOfChangeLimits {
    pub abs_delta: Option<f64>,
    pub rel_delta: Option<f64>,
    pub abs_slope: Option<f64>,
    pub rel_slope: Option<f64>,
    /// Maximum elapsed time between neighbours for a spike to be meaningful.
    pub spike_window_secs: f64,
    /// Minimum valid readings in recent history before spikes are evaluated.
    pub min_readings: u32,
}

impl Default for RateOfChangeLimits {
    fn default() -> Self {
        Self {
            abs_delta: None,
            rel_delta: None,
            abs_slope: None,
            rel_slope: None,
            spike_window_secs: 10.0,
            min_readings: 5,
        }
    }
}

impl RateOfChangeLimits {
    /// True when no delta or slope threshold is configured at all.
    pub fn is_unbounded(&self) -> bool {
        self.abs_delta.is_none()
            && self.rel_delta.is_none()
            && self.abs_slope.is_none()
            && self.rel_slope.is_none()
    }
}

/// Numeric bounds in four bands, tightest outermost: critical (hard physical
/// limits), operational, warning, and rate-of-change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueConstraints {
    pub critical: BandLimits,
    pub operational: BandLimits,
    pub warning: BandLimits,
    #[serde(default)]
    pub rate_of_change: RateOfChangeLimits,
    /// Back-to-back same-reason classifications required before a violation
    /// is treated as live.
    pub consecutive_violations_required: u32,
    /// Suppression window after an active record resolves.
    pub cooldown_seconds: f64,
}

impl Default for ValueConstraints {
    fn default() -> Self {
        Self {
            critical: BandLimits::default(),
            operational: BandLimits::default(),
            warning: BandLimits::default(),
            rate_of_change: RateOfChangeLimits::default(),
            consecutive_violations_required: 1,
            cooldown_seconds: 300.0,
        }
    }
}

/// Per-series configuration. Identity is `(series_id, domain)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub series_id: String,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub alerting_enabled: bool,
    pub prediction_enabled: bool,
    pub constraints: ValueConstraints,
}

impl StreamConfig {
    /// Domain defaults applied when a series has no stored configuration:
    /// unconstrained bands, alerting and prediction both on.
    pub fn defaults_for(series_id: &str, domain: Domain) -> Self {
        Self {
            series_id: series_id.to_string(),
            domain,
            display_name: None,
            alerting_enabled: true,
            prediction_enabled: true,
            constraints: ValueConstraints::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries_are_in_band() {
        let band = BandLimits::new(Some(0.0), Some(100.0));
        assert!(band.contains(0.0));
        assert!(band.contains(100.0));
        assert!(band.violates(100.000001));
        assert!(band.violates(-0.000001));
    }

    #[test]
    fn half_open_bands_check_one_side() {
        let min_only = BandLimits::new(Some(10.0), None);
        assert!(min_only.violates(9.9));
        assert!(min_only.contains(1e12));

        let unbounded = BandLimits::default();
        assert!(unbounded.is_unbounded());
        assert!(unbounded.contains(f64::MAX));
    }

    #[test]
    fn default_constraints_match_documented_defaults() {
        let c = ValueConstraints::default();
        assert_eq!(c.consecutive_violations_required, 1);
        assert_eq!(c.cooldown_seconds, 300.0);
        assert_eq!(c.rate_of_change.spike_window_secs, 10.0);
        assert_eq!(c.rate_of_change.min_readings, 5);
        assert!(c.rate_of_change.is_unbounded());
    }
}
