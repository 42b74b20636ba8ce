//! The per-datapoint classifier.
//!
//! Precedence, first match wins: critical band, operational band, warning
//! zone, delta spike, normal. The verdict is then run through the
//! suppression rewrites (warm-up, alerting flag, debounce, cooldown), each
//! of which downgrades the result to `Normal` with its own reason so the
//! original context survives in the explanation.
//!
//! Classification itself never performs side effects; the router is the
//! only place a verdict turns into persistence or publication.

use std::sync::Arc;

use types::{
    BandLimits, Classification, ClassifyReason, DataPoint, DeltaInfo, SeriesState, StreamConfig,
    UnifiedReading,
};

use super::consecutive::ConsecutiveTracker;
use super::cooldown::{CooldownTracker, RecordKind};
use super::delta::detect_spike;

fn fmt_band(band: &BandLimits) -> String {
    let lo = band
        .min
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-inf".to_string());
    let hi = band
        .max
        .map(|v| v.to_string())
        .unwrap_or_else(|| "+inf".to_string());
    format!("[{lo}, {hi}]")
}

/// The pre-suppression verdict for a value against the three bands and the
/// rate-of-change limits.
fn raw_verdict(
    point: &DataPoint,
    config: &StreamConfig,
    state: &SeriesState,
) -> (Classification, ClassifyReason, String, Option<DeltaInfo>) {
    let c = &config.constraints;
    let value = point.value;

    if c.critical.violates(value) {
        return (
            Classification::CriticalViolation,
            ClassifyReason::PhysicalRange,
            format!("value {value} outside critical band {}", fmt_band(&c.critical)),
            None,
        );
    }
    if c.operational.violates(value) {
        return (
            Classification::WarningViolation,
            ClassifyReason::OperationalRange,
            format!(
                "value {value} outside operational band {}",
                fmt_band(&c.operational)
            ),
            None,
        );
    }
    // Inside the operational band but outside the warning band: the zone
    // between the two bounds.
    if !c.warning.is_unbounded() && c.warning.violates(value) {
        return (
            Classification::WarningViolation,
            ClassifyReason::WarningZone,
            format!(
                "value {value} in warning zone outside {}",
                fmt_band(&c.warning)
            ),
            None,
        );
    }

    if let (Some(prev_value), Some(prev_ts)) = (state.last_value, state.last_timestamp) {
        if let Some(info) = detect_spike(
            value,
            point.timestamp,
            prev_value,
            prev_ts,
            &c.rate_of_change,
            state.valid_readings_count,
        ) {
            let explanation = format!(
                "delta spike: |{value} - {prev_value}| = {:.6} over {:.3}s",
                info.absolute_delta, info.elapsed_secs
            );
            return (
                Classification::AnomalyDetected,
                ClassifyReason::DeltaSpike,
                explanation,
                Some(info),
            );
        }
    }

    (
        Classification::Normal,
        ClassifyReason::Clean,
        "within configured bands, no delta spike".to_string(),
        None,
    )
}

/// Stateful classifier front-end: owns the debounce streaks and shares the
/// cooldown tracker with the prediction pipeline (which records recoveries).
pub struct Classifier {
    consecutive: ConsecutiveTracker,
    cooldowns: Arc<CooldownTracker>,
}

impl Classifier {
    pub fn new(cooldowns: Arc<CooldownTracker>) -> Self {
        Self {
            consecutive: ConsecutiveTracker::new(),
            cooldowns,
        }
    }

    /// Classify one point in the context loaded for its series. `now` is the
    /// wall-clock instant used for cooldown checks.
    pub fn classify(
        &self,
        point: &DataPoint,
        config: &StreamConfig,
        state: &SeriesState,
        now: f64,
    ) -> UnifiedReading {
        let (class, reason, explanation, delta) = raw_verdict(point, config, state);

        let mut reading = UnifiedReading {
            point: point.clone(),
            classification: class,
            reason,
            explanation,
            delta,
            state: state.state,
            prediction_enabled: config.prediction_enabled,
        };

        if reading.classification == Classification::Normal {
            self.consecutive.record_normal(&point.series_id);
            return reading;
        }

        // Suppression rewrites, strongest first. Each keeps the original
        // verdict in the explanation for the audit trail.

        // Warm-up (and staleness, which re-enters warm-up on this very
        // point): the series only counts readings, it never emits events.
        if !state.state.can_generate_events() {
            let suppressed = reading.explanation;
            reading.classification = Classification::Normal;
            reading.reason = ClassifyReason::Warmup;
            reading.explanation = format!(
                "suppressed during warm-up ({}/{}): {suppressed}",
                state.valid_readings_count, state.min_readings_for_normal
            );
            return reading;
        }

        if !config.alerting_enabled {
            let suppressed = reading.explanation;
            reading.classification = Classification::Normal;
            reading.reason = ClassifyReason::AlertingDisabled;
            reading.explanation = format!("alerting disabled: {suppressed}");
            return reading;
        }

        // Debounce applies to band violations only; a spike either fires or
        // it does not, and it never advances a violation streak.
        if matches!(
            reading.classification,
            Classification::CriticalViolation | Classification::WarningViolation
        ) {
            let streak = self.consecutive.record_violation(&point.series_id, reading.reason);
            let required = config.constraints.consecutive_violations_required.max(1);
            if streak < required {
                let suppressed = reading.explanation;
                reading.classification = Classification::Normal;
                reading.reason = ClassifyReason::Debounce;
                reading.explanation =
                    format!("violation {streak}/{required} consecutive: {suppressed}");
                return reading;
            }
        }

        let kind = match reading.classification {
            Classification::CriticalViolation => RecordKind::Alert,
            _ => RecordKind::Warning,
        };
        if self.cooldowns.in_cooldown(
            &point.series_id,
            kind,
            now,
            config.constraints.cooldown_seconds,
        ) {
            let suppressed = reading.explanation;
            reading.classification = Classification::Normal;
            reading.reason = ClassifyReason::Cooldown;
            reading.explanation = format!("suppressed by cooldown: {suppressed}");
            return reading;
        }

        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Domain, OperationalState, RateOfChangeLimits};

    fn config(series: &str) -> StreamConfig {
        let mut cfg = StreamConfig::defaults_for(series, Domain::Generic);
        cfg.constraints.critical = BandLimits::new(Some(0.0), Some(100.0));
        cfg.constraints.operational = BandLimits::new(Some(10.0), Some(90.0));
        cfg
    }

    fn normal_state(series: &str) -> SeriesState {
        let mut s = SeriesState::new(series, 1, 0.0);
        s.state = OperationalState::Normal;
        s.valid_readings_count = 20;
        s
    }

    fn point(series: &str, value: f64, ts: f64) -> DataPoint {
        DataPoint::new(series, value, ts, Domain::Generic)
    }

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(CooldownTracker::new()))
    }

    #[test]
    fn critical_outranks_everything() {
        let c = classifier();
        let r = c.classify(&point("s", 120.0, 10.0), &config("s"), &normal_state("s"), 10.0);
        assert_eq!(r.classification, Classification::CriticalViolation);
        assert_eq!(r.reason, ClassifyReason::PhysicalRange);
    }

    #[test]
    fn operational_band_is_second() {
        let c = classifier();
        let r = c.classify(&point("s", 95.0, 10.0), &config("s"), &normal_state("s"), 10.0);
        assert_eq!(r.classification, Classification::WarningViolation);
        assert_eq!(r.reason, ClassifyReason::OperationalRange);
    }

    #[test]
    fn warning_zone_between_bounds() {
        let c = classifier();
        let mut cfg = config("s");
        cfg.constraints.warning = BandLimits::new(Some(20.0), Some(80.0));
        // 85 is inside operational [10,90] but outside warning [20,80].
        let r = c.classify(&point("s", 85.0, 10.0), &cfg, &normal_state("s"), 10.0);
        assert_eq!(r.classification, Classification::WarningViolation);
        assert_eq!(r.reason, ClassifyReason::WarningZone);
    }

    #[test]
    fn band_boundary_is_safe_side() {
        let c = classifier();
        // Exactly on the critical bound: in-band, and also exactly on the
        // operational bound: in-band, so clean.
        let r = c.classify(&point("s", 90.0, 10.0), &config("s"), &normal_state("s"), 10.0);
        assert_eq!(r.classification, Classification::Normal);
        assert_eq!(r.reason, ClassifyReason::Clean);
    }

    #[test]
    fn delta_spike_when_bands_pass() {
        let c = classifier();
        let mut cfg = config("s");
        cfg.constraints.rate_of_change = RateOfChangeLimits {
            abs_delta: Some(3.0),
            spike_window_secs: 1.0,
            min_readings: 1,
            ..RateOfChangeLimits::default()
        };
        let mut state = normal_state("s");
        state.last_value = Some(50.0);
        state.last_timestamp = Some(100.0);

        let r = c.classify(&point("s", 55.0, 100.2), &cfg, &state, 100.2);
        assert_eq!(r.classification, Classification::AnomalyDetected);
        assert_eq!(r.reason, ClassifyReason::DeltaSpike);
        let delta = r.delta.unwrap();
        assert_eq!(delta.absolute_delta, 5.0);
    }

    #[test]
    fn warmup_rewrites_even_critical() {
        let c = classifier();
        let state = SeriesState::new("s", 10, 0.0);
        let r = c.classify(&point("s", 500.0, 10.0), &config("s"), &state, 10.0);
        assert_eq!(r.classification, Classification::Normal);
        assert_eq!(r.reason, ClassifyReason::Warmup);
        assert!(r.explanation.contains("critical band"));
    }

    #[test]
    fn debounce_requires_consecutive_violations() {
        let c = classifier();
        let mut cfg = config("s");
        cfg.constraints.consecutive_violations_required = 3;
        let state = normal_state("s");

        let r1 = c.classify(&point("s", 120.0, 1.0), &cfg, &state, 1.0);
        assert_eq!(r1.reason, ClassifyReason::Debounce);
        let r2 = c.classify(&point("s", 121.0, 2.0), &cfg, &state, 2.0);
        assert_eq!(r2.reason, ClassifyReason::Debounce);
        let r3 = c.classify(&point("s", 122.0, 3.0), &cfg, &state, 3.0);
        assert_eq!(r3.classification, Classification::CriticalViolation);
    }

    #[test]
    fn clean_reading_resets_debounce_streak() {
        let c = classifier();
        let mut cfg = config("s");
        cfg.constraints.consecutive_violations_required = 2;
        let state = normal_state("s");

        c.classify(&point("s", 120.0, 1.0), &cfg, &state, 1.0);
        c.classify(&point("s", 50.0, 2.0), &cfg, &state, 2.0);
        // Streak restarted: this is 1/2 again.
        let r = c.classify(&point("s", 120.0, 3.0), &cfg, &state, 3.0);
        assert_eq!(r.reason, ClassifyReason::Debounce);
    }

    #[test]
    fn cooldown_suppresses_same_kind() {
        let cooldowns = Arc::new(CooldownTracker::new());
        let c = Classifier::new(cooldowns.clone());
        let cfg = config("s");
        let state = normal_state("s");

        cooldowns.note_resolved("s", RecordKind::Alert, 1000.0);
        let r = c.classify(&point("s", 120.0, 1.0), &cfg, &state, 1100.0);
        assert_eq!(r.classification, Classification::Normal);
        assert_eq!(r.reason, ClassifyReason::Cooldown);

        // Past the window the violation fires again.
        let r = c.classify(&point("s", 121.0, 2.0), &cfg, &state, 1400.0);
        assert_eq!(r.classification, Classification::CriticalViolation);
    }

    #[test]
    fn alerting_flag_suppresses_events() {
        let c = classifier();
        let mut cfg = config("s");
        cfg.alerting_enabled = false;
        let r = c.classify(&point("s", 120.0, 1.0), &cfg, &normal_state("s"), 1.0);
        assert_eq!(r.classification, Classification::Normal);
        assert_eq!(r.reason, ClassifyReason::AlertingDisabled);
    }
}
