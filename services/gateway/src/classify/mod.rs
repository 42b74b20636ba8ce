//! Per-datapoint classification: band checks, delta-spike detection,
//! debounce/cooldown bookkeeping, and the operational state machine.

pub mod classifier;
pub mod consecutive;
pub mod cooldown;
pub mod delta;
pub mod state_machine;

pub use classifier::Classifier;
pub use consecutive::ConsecutiveTracker;
pub use cooldown::{CooldownTracker, RecordKind};
pub use delta::detect_spike;
pub use state_machine::{next_state, StaleSweeper};
