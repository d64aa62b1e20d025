//! # motesim-model
//!
//! Run configuration and topology construction: loads the device descriptor
//! and optional traffic trace, and wires up the canonical three-mote chain
//! (generator feeds mote 1, mote 1 sends to mote 2, mote 2 forwards on air
//! past mote 3).

use motesim_common::stage_trace::StageTrace;
use motesim_common::{EntityId, EntityRegistry, Event, EventId, EventPayload, MoteId, SimContext, SimTime};
use motesim_mote::{
    DeviceTimings, MetricsCollector, MetricsHandle, MoteDriver, PlannedFrame, TrafficGenerator,
    GENERATE_TIMER,
};
use motesim_radio::RadioChip;
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// Model construction errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// IO error reading a descriptor or trace file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device descriptor parse error.
    #[error("Device descriptor error: {0}")]
    Descriptor(#[from] serde_yaml::Error),

    /// Traffic trace parse error.
    #[error("Trace line {line}: {message}")]
    Trace {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },
}

/// Configuration of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// RNG seed.
    pub seed: u64,
    /// Length of the run.
    pub duration: SimTime,
    /// Offered load in packets per second (ignored in trace-driven runs).
    pub pps: f64,
    /// UDP payload size of generated frames.
    pub payload_size: u32,
    /// Clear channel assessment before transmitting.
    pub cca_enabled: bool,
    /// Hold the medium without putting bytes on air.
    pub suppress_transmission: bool,
    /// Record pipeline hand-offs into the per-mote stage traces.
    pub stage_trace_enabled: bool,
    /// Replay this schedule instead of the fixed rate.
    pub schedule: Option<Vec<PlannedFrame>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: 1,
            duration: SimTime::from_secs(10.0),
            pps: 100.0,
            payload_size: 0,
            cca_enabled: true,
            suppress_transmission: false,
            stage_trace_enabled: false,
            schedule: None,
        }
    }
}

/// Everything the event loop needs to run a configured topology.
pub struct BuiltSimulation {
    /// All entities, registered and wired.
    pub registry: EntityRegistry,
    /// Context seeded from the run config.
    pub context: SimContext,
    /// Events that kick the run off.
    pub initial_events: Vec<Event>,
    /// The run's metrics, shared with the drivers.
    pub metrics: MetricsHandle,
}

/// Load a device descriptor from a YAML file. Missing properties keep their
/// calibrated defaults.
pub fn load_device_descriptor<P: AsRef<Path>>(path: P) -> Result<DeviceTimings, ModelError> {
    let text = std::fs::read_to_string(path)?;
    let timings = serde_yaml::from_str(&text)?;
    Ok(timings)
}

/// Load a traffic trace: alternating lines of send time (µs) and payload
/// size, replayed relative to the first recorded time.
pub fn load_trace<P: AsRef<Path>>(path: P) -> Result<Vec<PlannedFrame>, ModelError> {
    let text = std::fs::read_to_string(path)?;
    let mut schedule = Vec::new();
    let mut pending_time: Option<u64> = None;
    let mut first_time: Option<u64> = None;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: u64 = line.parse().map_err(|_| ModelError::Trace {
            line: idx + 1,
            message: format!("expected an integer, got {line:?}"),
        })?;
        match pending_time.take() {
            None => {
                pending_time = Some(value);
            }
            Some(time) => {
                let base = *first_time.get_or_insert(time);
                schedule.push(PlannedFrame {
                    at: SimTime::from_micros(time - base),
                    payload_size: value as u32,
                });
            }
        }
    }

    if pending_time.is_some() {
        return Err(ModelError::Trace {
            line: text.lines().count(),
            message: "dangling send time without a payload size".into(),
        });
    }
    Ok(schedule)
}

/// Build the canonical three-mote topology for a run.
pub fn build_simulation(config: &RunConfig, timings: &DeviceTimings) -> BuiltSimulation {
    let mut context = SimContext::new(config.seed);
    let mut registry = EntityRegistry::new();

    let metrics: MetricsHandle = Rc::new(RefCell::new(MetricsCollector::new()));
    let first_sender = Rc::new(Cell::new(false));

    let mote_entities = [EntityId(1), EntityId(2), EntityId(3)];
    let chips: Vec<_> = (0..3).map(|_| Rc::new(RefCell::new(RadioChip::new()))).collect();

    let mut drivers: Vec<MoteDriver> = mote_entities
        .iter()
        .enumerate()
        .map(|(i, entity)| {
            let mut driver = MoteDriver::new(
                *entity,
                MoteId(i as u32 + 1),
                Rc::clone(&chips[i]),
                Rc::clone(&first_sender),
                Rc::clone(&metrics),
                timings.clone(),
            );
            driver.set_cca_enabled(config.cca_enabled);
            driver.set_suppress_transmission(config.suppress_transmission);
            if config.stage_trace_enabled {
                driver.set_trace(StageTrace::enabled());
            }
            driver
        })
        .collect();

    // Mote 1 is the only mote whose radio addresses another: the generator's
    // frames go to mote 2. Mote 2's forward transmissions hold its own
    // medium but are not received by anyone; mote 3 completes the chain as
    // the silent neighbor.
    drivers[0].set_send_target(mote_entities[1], Rc::clone(&chips[1]));
    log::debug!("topology: generator -> mote1 -> mote2 (mote3 silent)");

    let generator_entity = EntityId(4);
    let generator = match &config.schedule {
        Some(schedule) => {
            TrafficGenerator::trace_driven(generator_entity, mote_entities[0], schedule.clone())
        }
        None => TrafficGenerator::fixed_rate(
            generator_entity,
            mote_entities[0],
            config.payload_size,
            config.pps,
            config.duration,
        ),
    };

    let initial_events: Vec<Event> = generator
        .start_delays()
        .into_iter()
        .map(|delay| Event {
            id: EventId(context.next_event_id()),
            time: delay,
            source: generator_entity,
            targets: vec![generator_entity],
            payload: EventPayload::Timer { timer_id: GENERATE_TIMER },
        })
        .collect();

    for driver in drivers {
        registry.register(Box::new(driver));
    }
    registry.register(Box::new(generator));

    BuiltSimulation {
        registry,
        context,
        initial_events,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_build_registers_motes_and_generator() {
        let config = RunConfig::default();
        let built = build_simulation(&config, &DeviceTimings::default());
        assert_eq!(built.registry.len(), 4);
        assert_eq!(built.initial_events.len(), 1);
        assert_eq!(built.initial_events[0].time, SimTime::ZERO);
    }

    #[test]
    fn test_trace_driven_build_arms_one_timer_per_frame() {
        let config = RunConfig {
            schedule: Some(vec![
                PlannedFrame { at: SimTime::ZERO, payload_size: 0 },
                PlannedFrame { at: SimTime::from_micros(50), payload_size: 0 },
            ]),
            ..RunConfig::default()
        };
        let built = build_simulation(&config, &DeviceTimings::default());
        assert_eq!(built.initial_events.len(), 2);
        assert_eq!(built.initial_events[1].time, SimTime::from_micros(50));
    }

    #[test]
    fn test_load_trace_relative_offsets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1000\n10\n1500\n20\n").unwrap();
        let schedule = load_trace(file.path()).unwrap();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule[0].at, SimTime::ZERO);
        assert_eq!(schedule[0].payload_size, 10);
        assert_eq!(schedule[1].at, SimTime::from_micros(500));
        assert_eq!(schedule[1].payload_size, 20);
    }

    #[test]
    fn test_load_trace_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1000\nabc\n").unwrap();
        assert!(matches!(
            load_trace(file.path()),
            Err(ModelError::Trace { line: 2, .. })
        ));
    }

    #[test]
    fn test_load_trace_rejects_dangling_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1000\n10\n2000\n").unwrap();
        assert!(matches!(load_trace(file.path()), Err(ModelError::Trace { .. })));
    }

    #[test]
    fn test_load_device_descriptor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "length_read_us: 111\nfcf_read_us: 222").unwrap();
        let timings = load_device_descriptor(file.path()).unwrap();
        assert_eq!(timings.length_read_us, 111);
        assert_eq!(timings.fcf_read_us, 222);
        // Unlisted properties keep their defaults.
        assert_eq!(timings.receive_done_us, 200);
    }
}
