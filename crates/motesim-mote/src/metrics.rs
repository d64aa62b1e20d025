//! Run-wide packet accounting.

use motesim_common::SimTime;
use serde::{Deserialize, Serialize};

/// One forwarded frame's latency through the receiving mote's driver stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySample {
    /// Sequence number of the frame.
    pub seq_nr: u64,
    /// Time the frame arrived at the forwarding mote's radio.
    pub received_at: SimTime,
    /// Microseconds between arrival and hand-off to the outbound path.
    pub delay_us: u64,
}

/// Counters for every packet outcome in a run, owned by the run harness and
/// passed into the pipelines by handle.
///
/// Every frame the generator offers ends up in exactly one of `forwarded` or
/// the four drop counters, so the counters sum to `total_offered` at run end.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsCollector {
    /// Frames offered by the traffic generator.
    pub total_offered: u64,
    /// Frames fully retransmitted by the forwarding mote.
    pub forwarded: u64,
    /// Frames dropped at payload read because their CRC check failed
    /// (collision on air or RXFIFO truncation).
    pub dropped_crc: u64,
    /// Frames the sender discarded after finding the channel busy with
    /// CCA disabled.
    pub dropped_collision_at_sender: u64,
    /// Frames rejected because the outbound queue was at capacity.
    pub dropped_outbound_full: u64,
    /// Frames discarded at send because the target's RXFIFO was overflowed.
    pub dropped_overflowed_target: u64,
    /// Times an overflowed RXFIFO was flushed wholesale.
    pub rxfifo_flushes: u64,
    /// Per-frame driver-stack latency samples, in forwarding order.
    pub intra_stack_delays: Vec<DelaySample>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        MetricsCollector::default()
    }

    /// Record the driver-stack latency of a frame entering the outbound path.
    pub fn record_intra_stack_delay(&mut self, seq_nr: u64, received_at: SimTime, delay_us: u64) {
        self.intra_stack_delays.push(DelaySample {
            seq_nr,
            received_at,
            delay_us,
        });
    }

    /// Sum of all drop counters.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_crc
            + self.dropped_collision_at_sender
            + self.dropped_outbound_full
            + self.dropped_overflowed_target
    }

    /// Fraction of offered frames that were forwarded, in [0, 1].
    pub fn delivery_ratio(&self) -> f64 {
        if self.total_offered == 0 {
            return 0.0;
        }
        self.forwarded as f64 / self.total_offered as f64
    }

    /// Mean driver-stack latency in microseconds.
    pub fn mean_intra_stack_delay_us(&self) -> f64 {
        if self.intra_stack_delays.is_empty() {
            return 0.0;
        }
        let total: u64 = self.intra_stack_delays.iter().map(|s| s.delay_us).sum();
        total as f64 / self.intra_stack_delays.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_ratio_empty_run() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.delivery_ratio(), 0.0);
        assert_eq!(metrics.mean_intra_stack_delay_us(), 0.0);
    }

    #[test]
    fn test_totals() {
        let mut metrics = MetricsCollector::new();
        metrics.total_offered = 10;
        metrics.forwarded = 6;
        metrics.dropped_crc = 2;
        metrics.dropped_outbound_full = 1;
        metrics.dropped_collision_at_sender = 1;
        assert_eq!(metrics.total_dropped(), 4);
        assert!((metrics.delivery_ratio() - 0.6).abs() < 1e-9);
    }
}
