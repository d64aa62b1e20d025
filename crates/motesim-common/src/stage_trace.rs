//! Named per-stage trace queues.
//!
//! Each pipeline hand-off can record an entry into a named FIFO queue for
//! external instrumentation. Tracing is disabled by default; when disabled,
//! recording is a no-op so the pipelines can call it unconditionally.

use crate::SimTime;
use std::collections::{HashMap, VecDeque};

/// One recorded hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Time the hand-off happened.
    pub time: SimTime,
    /// Stage-defined value (sequence number or byte count).
    pub value: u64,
}

/// Collection of named FIFO trace queues owned by one mote's driver.
#[derive(Debug, Default)]
pub struct StageTrace {
    enabled: bool,
    queues: HashMap<&'static str, VecDeque<TraceEntry>>,
}

impl StageTrace {
    /// Create a disabled trace.
    pub fn new() -> Self {
        StageTrace::default()
    }

    /// Create an enabled trace.
    pub fn enabled() -> Self {
        StageTrace {
            enabled: true,
            queues: HashMap::new(),
        }
    }

    /// Whether recording is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a hand-off into a named queue. No-op when disabled.
    pub fn record(&mut self, queue: &'static str, time: SimTime, value: u64) {
        if !self.enabled {
            return;
        }
        self.queues.entry(queue).or_default().push_back(TraceEntry { time, value });
    }

    /// Pop the oldest entry from a named queue.
    pub fn pop(&mut self, queue: &str) -> Option<TraceEntry> {
        self.queues.get_mut(queue)?.pop_front()
    }

    /// Number of entries currently held in a named queue.
    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, |q| q.len())
    }

    /// Whether a named queue is empty (or was never written).
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Names of all queues that have been written to.
    pub fn queue_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.queues.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_trace_records_nothing() {
        let mut trace = StageTrace::new();
        trace.record("h1-h2", SimTime::from_micros(5), 1);
        assert!(trace.is_empty("h1-h2"));
    }

    #[test]
    fn test_enabled_trace_is_fifo() {
        let mut trace = StageTrace::enabled();
        trace.record("h1-h2", SimTime::from_micros(5), 1);
        trace.record("h1-h2", SimTime::from_micros(9), 2);
        assert_eq!(trace.len("h1-h2"), 2);
        assert_eq!(trace.pop("h1-h2").unwrap().value, 1);
        assert_eq!(trace.pop("h1-h2").unwrap().value, 2);
        assert!(trace.pop("h1-h2").is_none());
    }
}
