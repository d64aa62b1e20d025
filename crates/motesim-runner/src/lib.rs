//! # motesim-runner
//!
//! The discrete event loop driving a built simulation, and the run summary
//! it produces.

use motesim_common::{Event, EventId, EventPayload, SimError, SimTime};
use motesim_model::{BuiltSimulation, ModelError, RunConfig};
use motesim_mote::{DeviceTimings, MetricsCollector};
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use thiserror::Error;

/// Runner errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model construction failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Event dispatch failed.
    #[error("Simulation error: {0}")]
    Sim(#[from] SimError),

    /// IO error writing the summary.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Summary serialization failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// UDP payload size of the generated frames.
    pub payload_size: u32,
    /// Offered load in packets per second.
    pub pps: f64,
    /// Length of the run in seconds.
    pub duration_s: f64,
    /// RNG seed of the run.
    pub seed: u64,
    /// Events dispatched before the end event.
    pub events_processed: u64,
    /// Final time of the run.
    pub final_time_us: u64,
    /// Packet accounting, including the ordered delay samples.
    pub metrics: MetricsCollector,
    /// Fraction of offered frames forwarded end to end.
    pub delivery_ratio: f64,
    /// Mean driver-stack latency of forwarded frames, in microseconds.
    pub mean_intra_stack_delay_us: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UDP payload: {}, pps: {}, RXFIFO flushes: {}, bad CRC: {}, radio collision: {}, \
             outbound queue drop: {}, overflowed target: {}, successfully forwarded: {} / {} = {:.1}%",
            self.payload_size,
            self.pps,
            self.metrics.rxfifo_flushes,
            self.metrics.dropped_crc,
            self.metrics.dropped_collision_at_sender,
            self.metrics.dropped_outbound_full,
            self.metrics.dropped_overflowed_target,
            self.metrics.forwarded,
            self.metrics.total_offered,
            self.delivery_ratio * 100.0
        )
    }
}

/// The discrete event loop: a min-heap of events dispatched in time order,
/// FIFO among equal timestamps.
pub struct EventLoop {
    simulation: BuiltSimulation,
    event_queue: BinaryHeap<Event>,
    events_processed: u64,
}

impl EventLoop {
    /// Create an event loop over a built simulation.
    pub fn new(simulation: BuiltSimulation) -> Self {
        let mut event_queue = BinaryHeap::new();
        for event in simulation.initial_events.iter().cloned() {
            event_queue.push(event);
        }
        EventLoop {
            simulation,
            event_queue,
            events_processed: 0,
        }
    }

    /// Run until the end event at `duration` fires.
    pub fn run(&mut self, duration: SimTime) -> Result<(), RunnerError> {
        let context = &mut self.simulation.context;
        self.event_queue.push(Event {
            id: EventId(context.next_event_id()),
            time: duration,
            source: motesim_common::EntityId(0),
            targets: vec![],
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            context.set_time(event.time);

            if matches!(event.payload, EventPayload::SimulationEnd) {
                log::debug!(
                    "simulation end at {} us after {} events",
                    event.time.as_micros(),
                    self.events_processed
                );
                break;
            }

            self.simulation.registry.dispatch_event(&event, context)?;
            self.events_processed += 1;

            for pending in context.take_pending_events() {
                self.event_queue.push(pending);
            }
        }

        Ok(())
    }

    /// Current simulation time.
    pub fn time(&self) -> SimTime {
        self.simulation.context.time()
    }

    /// Events dispatched so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Snapshot of the run's metrics.
    pub fn metrics(&self) -> MetricsCollector {
        self.simulation.metrics.borrow().clone()
    }
}

/// Build and run one configured simulation end to end.
pub fn run_simulation(
    config: &RunConfig,
    timings: &DeviceTimings,
) -> Result<RunSummary, RunnerError> {
    log::debug!(
        "run: seed {}, {} s, {} pps, payload {}",
        config.seed,
        config.duration.as_secs_f64(),
        config.pps,
        config.payload_size
    );

    let built = motesim_model::build_simulation(config, timings);
    let mut event_loop = EventLoop::new(built);
    event_loop.run(config.duration)?;

    let metrics = event_loop.metrics();
    Ok(RunSummary {
        payload_size: config.payload_size,
        pps: config.pps,
        duration_s: config.duration.as_secs_f64(),
        seed: config.seed,
        events_processed: event_loop.events_processed(),
        final_time_us: event_loop.time().as_micros(),
        delivery_ratio: metrics.delivery_ratio(),
        mean_intra_stack_delay_us: metrics.mean_intra_stack_delay_us(),
        metrics,
    })
}

// Re-exported for the binary and the integration tests.
pub use motesim_model::{load_device_descriptor, load_trace};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_simulation_terminates() {
        let config = RunConfig {
            pps: 0.0,
            schedule: Some(vec![]),
            ..RunConfig::default()
        };
        let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();
        assert_eq!(summary.metrics.total_offered, 0);
        assert_eq!(summary.events_processed, 0);
    }

    #[test]
    fn test_end_event_stops_the_run() {
        let config = RunConfig {
            duration: SimTime::from_secs(1.0),
            ..RunConfig::default()
        };
        let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();
        assert_eq!(summary.final_time_us, 1_000_000);
        assert!(summary.events_processed > 0);
    }
}
