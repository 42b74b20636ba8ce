//! Delta-spike detection.
//!
//! Detects abrupt changes between a point and its previous neighbour using
//! absolute/relative delta and slope thresholds. Pure: all inputs come in
//! as arguments, nothing is cached here.

use types::{DeltaInfo, DeltaTrigger, RateOfChangeLimits};

/// Denominator floor for relative deltas when the previous value is ~0.
const REL_EPSILON: f64 = 1e-6;

/// Evaluate the spike criterion against the previous neighbour.
///
/// Fires iff all of:
/// - `dt > 0` and `dt <= spike_window`,
/// - at least `min_readings` valid readings exist in recent history,
/// - any configured delta/slope threshold is met or exceeded.
///
/// Returns the computed deltas (with the list of tripped thresholds) when
/// the spike fires, `None` otherwise.
pub fn detect_spike(
    value: f64,
    timestamp: f64,
    prev_value: f64,
    prev_timestamp: f64,
    limits: &RateOfChangeLimits,
    valid_readings: u64,
) -> Option<DeltaInfo> {
    if limits.is_unbounded() {
        return None;
    }

    let dt = timestamp - prev_timestamp;
    // dt == 0 never spikes: two readings at one instant have no slope.
    if dt <= 0.0 || dt > limits.spike_window_secs {
        return None;
    }
    if valid_readings < u64::from(limits.min_readings) {
        return None;
    }

    let delta_abs = (value - prev_value).abs();
    let delta_rel = delta_abs / prev_value.abs().max(REL_EPSILON);
    let slope_abs = delta_abs / dt;
    let slope_rel = delta_rel / dt;

    let mut triggered = Vec::new();
    if matches!(limits.abs_delta, Some(t) if delta_abs >= t) {
        triggered.push(DeltaTrigger::AbsDelta);
    }
    if matches!(limits.rel_delta, Some(t) if delta_rel >= t) {
        triggered.push(DeltaTrigger::RelDelta);
    }
    if matches!(limits.abs_slope, Some(t) if slope_abs >= t) {
        triggered.push(DeltaTrigger::AbsSlope);
    }
    if matches!(limits.rel_slope, Some(t) if slope_rel >= t) {
        triggered.push(DeltaTrigger::RelSlope);
    }

    if triggered.is_empty() {
        return None;
    }

    Some(DeltaInfo {
        prev_value,
        absolute_delta: delta_abs,
        relative_delta: delta_rel,
        absolute_slope: slope_abs,
        relative_slope: slope_rel,
        elapsed_secs: dt,
        triggered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(abs_delta: Option<f64>) -> RateOfChangeLimits {
        RateOfChangeLimits {
            abs_delta,
            spike_window_secs: 1.0,
            min_readings: 1,
            ..RateOfChangeLimits::default()
        }
    }

    #[test]
    fn abs_delta_trips() {
        let info = detect_spike(55.0, 100.2, 50.0, 100.0, &limits(Some(3.0)), 5).unwrap();
        assert_eq!(info.absolute_delta, 5.0);
        assert_eq!(info.triggered, vec![DeltaTrigger::AbsDelta]);
        assert!((info.elapsed_secs - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_dt_never_spikes() {
        assert!(detect_spike(1000.0, 100.0, 0.0, 100.0, &limits(Some(0.1)), 100).is_none());
    }

    #[test]
    fn negative_dt_never_spikes() {
        assert!(detect_spike(1000.0, 99.0, 0.0, 100.0, &limits(Some(0.1)), 100).is_none());
    }

    #[test]
    fn outside_window_is_not_a_spike() {
        let l = limits(Some(0.1));
        assert!(detect_spike(1000.0, 102.0, 0.0, 100.0, &l, 100).is_none());
    }

    #[test]
    fn history_requirement_gates_detection() {
        let mut l = limits(Some(0.1));
        l.min_readings = 5;
        assert!(detect_spike(1000.0, 100.5, 0.0, 100.0, &l, 4).is_none());
        assert!(detect_spike(1000.0, 100.5, 0.0, 100.0, &l, 5).is_some());
    }

    #[test]
    fn relative_delta_uses_epsilon_floor_near_zero() {
        let l = RateOfChangeLimits {
            rel_delta: Some(0.5),
            spike_window_secs: 10.0,
            min_readings: 1,
            ..RateOfChangeLimits::default()
        };
        // prev=0: relative delta blows up past any threshold via the floor.
        let info = detect_spike(1.0, 1.0, 0.0, 0.5, &l, 10).unwrap();
        assert_eq!(info.triggered, vec![DeltaTrigger::RelDelta]);
    }

    #[test]
    fn slope_thresholds_account_for_elapsed_time() {
        let l = RateOfChangeLimits {
            abs_slope: Some(100.0),
            spike_window_secs: 10.0,
            min_readings: 1,
            ..RateOfChangeLimits::default()
        };
        // 5 units over 0.01s = slope 500, trips. Same 5 units over 1s does not.
        assert!(detect_spike(55.0, 100.01, 50.0, 100.0, &l, 10).is_some());
        assert!(detect_spike(55.0, 101.0, 50.0, 100.0, &l, 10).is_none());
    }

    #[test]
    fn unbounded_limits_never_spike() {
        let l = RateOfChangeLimits::default();
        assert!(detect_spike(1e9, 100.1, 0.0, 100.0, &l, 100).is_none());
    }
}
