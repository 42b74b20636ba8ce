//! The universal data point and its domain tag.
//!
//! A [`DataPoint`] is the unit that flows from a transport parser into the
//! router. Its `series_id` is the stable key for every per-series concern:
//! ordering, state, constraints, throttling, dedup.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse category that selects the storage backend and default constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Legacy IoT sensors; persistence goes to the relational backend.
    Iot,
    Infrastructure,
    Finance,
    Health,
    Generic,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Iot => "iot",
            Domain::Infrastructure => "infrastructure",
            Domain::Finance => "finance",
            Domain::Health => "health",
            Domain::Generic => "generic",
        }
    }

    /// Parse a domain tag as it appears on the wire (topic segments, JSON
    /// fields, form values). Unknown tags are rejected rather than coerced
    /// to [`Domain::Generic`] so that typos do not silently change routing.
    pub fn parse(s: &str) -> Option<Domain> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iot" => Some(Domain::Iot),
            "infrastructure" | "infra" => Some(Domain::Infrastructure),
            "finance" => Some(Domain::Finance),
            "health" => Some(Domain::Health),
            "generic" => Some(Domain::Generic),
            _ => None,
        }
    }

    /// True for the legacy IoT domain, which routes to the relational store.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Domain::Iot)
    }

    /// Recover the domain from a series key: generic keys lead with their
    /// domain segment, legacy keys are bare sensor ids.
    pub fn of_series(series_id: &str) -> Domain {
        match series_id.split('/').next().and_then(Domain::parse) {
            Some(domain) if series_id.contains('/') => domain,
            _ => Domain::Iot,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The universal unit flowing through the core.
///
/// Built by a transport adapter, consumed by the router. `series_id` is
/// `{domain}/{source_id}/{stream_id}` for generic domains, or the integer
/// sensor id rendered as a string for legacy IoT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub series_id: String,
    /// Finite real number; NaN and infinities are rejected by the guards.
    pub value: f64,
    /// Producer-observed instant, seconds since epoch (fractional).
    pub timestamp: f64,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
    /// Monotonically increasing producer counter, when the producer has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Opaque bag, never interpreted by the core.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Producer-supplied idempotency key; derived when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    /// Set by the transport when the point enters the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<f64>,
    /// Set by the router once the point has cleared its sub-pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<f64>,
}

impl DataPoint {
    pub fn new(series_id: impl Into<String>, value: f64, timestamp: f64, domain: Domain) -> Self {
        Self {
            series_id: series_id.into(),
            value,
            timestamp,
            domain,
            source_id: None,
            stream_type: None,
            sequence: None,
            metadata: HashMap::new(),
            msg_id: None,
            ingested_at: None,
            processed_at: None,
        }
    }

    /// Build a generic-domain point with the canonical
    /// `{domain}/{source_id}/{stream_id}` series key.
    pub fn from_parts(
        domain: Domain,
        source_id: &str,
        stream_id: &str,
        value: f64,
        timestamp: f64,
    ) -> Self {
        let series_id = format!("{}/{}/{}", domain.as_str(), source_id, stream_id);
        let mut point = Self::new(series_id, value, timestamp, domain);
        point.source_id = Some(source_id.to_string());
        point
    }

    /// Build a legacy IoT point keyed by the rendered sensor id.
    pub fn legacy(sensor_id: i64, value: f64, timestamp: f64) -> Self {
        Self::new(sensor_id.to_string(), value, timestamp, Domain::Iot)
    }

    /// For legacy IoT points, the numeric sensor id behind the series key.
    pub fn legacy_sensor_id(&self) -> Option<i64> {
        if !self.domain.is_legacy() {
            return None;
        }
        self.series_id.parse().ok()
    }

    /// Derived idempotency key: `(series_id, timestamp rounded to the
    /// microsecond, value rounded to six decimals)` rendered as a string.
    /// Stable across replays of the same payload.
    pub fn dedup_key(&self) -> String {
        format!("{}:{:.6}:{:.6}", self.series_id, self.timestamp, self.value)
    }

    /// The key the transports and producers see; either supplied or derived.
    pub fn effective_msg_id(&self) -> String {
        self.msg_id.clone().unwrap_or_else(|| self.dedup_key())
    }
}
