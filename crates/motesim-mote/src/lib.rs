//! # motesim-mote
//!
//! The mote-level model: the radio driver stack ([`MoteDriver`]), packet
//! accounting ([`MetricsCollector`]), firmware stage delays
//! ([`DeviceTimings`]) and offered-load generation ([`TrafficGenerator`]).

pub mod driver;
pub mod metrics;
pub mod timings;
pub mod traffic;

pub use driver::{ChipHandle, FirstSenderGuard, MetricsHandle, MoteDriver, OUTBOUND_CAPACITY};
pub use metrics::{DelaySample, MetricsCollector};
pub use timings::DeviceTimings;
pub use traffic::{PlannedFrame, TrafficGenerator, GENERATE_TIMER};

// The frame type lives in motesim-common because events carry it.
pub use motesim_common::{Frame, Milestone};
