//! # Gateway Unified Types Library
//!
//! Single type system for everything that flows through the ingestion
//! gateway. Every transport parses its native payload into a [`DataPoint`],
//! the classifier attaches a [`Classification`], and the resulting
//! [`UnifiedReading`] is the only shape the pipelines consume.
//!
//! ## Design Philosophy
//!
//! - **One in-memory contract**: transports normalize at the boundary;
//!   nothing downstream ever sees a transport-specific shape.
//! - **Tagged classification**: a reading carries exactly one class and one
//!   machine-readable reason; sub-pipelines match on the tag and refuse
//!   everything else.
//! - **Domain routing**: the [`Domain`] tag selects the storage backend and
//!   the default constraints; it is set once at parse time and never
//!   rewritten.
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{DataPoint, Domain};
//!
//! // Generic-domain point, series key built from its parts
//! let point = DataPoint::from_parts(Domain::Infrastructure, "web-01", "cpu", 42.5, 1_700_000_000.0);
//! assert_eq!(point.series_id, "infrastructure/web-01/cpu");
//!
//! // Legacy IoT point, series key is the rendered sensor id
//! let legacy = DataPoint::legacy(42, 21.5, 1_700_000_000.0);
//! assert_eq!(legacy.series_id, "42");
//! assert_eq!(legacy.legacy_sensor_id(), Some(42));
//! ```

pub mod classification;
pub mod constraints;
pub mod data_point;
pub mod state;

pub use classification::{
    Classification, ClassifyReason, DeltaInfo, DeltaTrigger, UnifiedReading,
};
pub use constraints::{BandLimits, RateOfChangeLimits, StreamConfig, ValueConstraints};
pub use data_point::{DataPoint, Domain};
pub use state::{is_valid_transition, OperationalState, SeriesState};
