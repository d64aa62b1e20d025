//! Offered-load generation.

use motesim_common::{
    Entity, EntityId, Event, EventPayload, Frame, SimContext, SimError, SimTime,
};
use rand::Rng;

/// Timer id of a generator firing; the topology builder arms the first one.
pub const GENERATE_TIMER: u64 = 1;

/// The generator stops re-arming this long before the end of the run so the
/// last frames can drain out of the pipelines.
const TAIL_MARGIN_US: u64 = 101_000;

/// Upper bound of the inter-packet jitter, in microseconds.
const JITTER_SPAN_US: u64 = 100;

/// One planned frame of a recorded trace.
#[derive(Debug, Clone, Copy)]
pub struct PlannedFrame {
    /// Offset from the start of the run.
    pub at: SimTime,
    /// UDP payload size of the frame.
    pub payload_size: u32,
}

enum Load {
    /// Fixed rate with per-interval jitter.
    FixedRate { pps: f64, payload_size: u32, duration: SimTime },
    /// Frames at recorded offsets, one per planned entry.
    Trace { schedule: Vec<PlannedFrame>, cursor: usize },
}

/// Creates frames and hands them to the sending mote's radio.
pub struct TrafficGenerator {
    entity: EntityId,
    sender: EntityId,
    load: Load,
    next_seq: u64,
}

impl TrafficGenerator {
    /// Generate `pps` frames per second of `payload_size` bytes until close
    /// to the end of the run. Arm with one [`GENERATE_TIMER`] at time zero.
    pub fn fixed_rate(
        entity: EntityId,
        sender: EntityId,
        payload_size: u32,
        pps: f64,
        duration: SimTime,
    ) -> Self {
        TrafficGenerator {
            entity,
            sender,
            load: Load::FixedRate { pps, payload_size, duration },
            next_seq: 0,
        }
    }

    /// Replay a recorded schedule. Arm with one [`GENERATE_TIMER`] per
    /// planned frame, at its offset.
    pub fn trace_driven(entity: EntityId, sender: EntityId, schedule: Vec<PlannedFrame>) -> Self {
        TrafficGenerator {
            entity,
            sender,
            load: Load::Trace { schedule, cursor: 0 },
            next_seq: 0,
        }
    }

    /// Delays (from time zero) at which the builder should arm the
    /// generator's timers.
    pub fn start_delays(&self) -> Vec<SimTime> {
        match &self.load {
            Load::FixedRate { .. } => vec![SimTime::ZERO],
            Load::Trace { schedule, .. } => schedule.iter().map(|p| p.at).collect(),
        }
    }

    fn emit(&mut self, payload_size: u32, ctx: &mut SimContext) {
        let frame = Frame::new(self.next_seq, payload_size);
        self.next_seq += 1;
        log::trace!("traffic: offering frame {} ({} bytes)", frame.seq_nr, payload_size);
        ctx.post_immediate(vec![self.sender], EventPayload::SendRequest { frame });
    }

    fn fire(&mut self, ctx: &mut SimContext) {
        let payload_size = match &mut self.load {
            Load::FixedRate { payload_size, .. } => Some(*payload_size),
            Load::Trace { schedule, cursor } => {
                let planned = schedule.get(*cursor).map(|p| p.payload_size);
                if planned.is_some() {
                    *cursor += 1;
                }
                planned
            }
        };
        let Some(payload_size) = payload_size else {
            return;
        };
        self.emit(payload_size, ctx);

        if let Load::FixedRate { pps, duration, .. } = &self.load {
            let interval = SimTime::from_secs(1.0 / *pps);
            let cutoff = *duration - SimTime::from_micros(TAIL_MARGIN_US);
            if ctx.time() + interval < cutoff {
                let jitter = SimTime::from_micros(ctx.rng().gen_range(0..JITTER_SPAN_US));
                ctx.post_event(
                    interval + jitter,
                    vec![self.entity],
                    EventPayload::Timer { timer_id: GENERATE_TIMER },
                );
            }
        }
    }
}

impl Entity for TrafficGenerator {
    fn entity_id(&self) -> EntityId {
        self.entity
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Timer { timer_id: GENERATE_TIMER } = event.payload {
            self.fire(ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump_one(generator: &mut TrafficGenerator, ctx: &mut SimContext, at: SimTime) -> Vec<Event> {
        let event = Event {
            id: motesim_common::EventId(ctx.next_event_id()),
            time: at,
            source: generator.entity_id(),
            targets: vec![generator.entity_id()],
            payload: EventPayload::Timer { timer_id: GENERATE_TIMER },
        };
        ctx.set_time(at);
        ctx.set_source(generator.entity_id());
        generator.handle_event(&event, ctx).unwrap();
        ctx.take_pending_events()
    }

    #[test]
    fn test_fixed_rate_rearms_with_jitter() {
        let mut ctx = SimContext::new(11);
        let mut generator = TrafficGenerator::fixed_rate(
            EntityId(9),
            EntityId(1),
            0,
            100.0,
            SimTime::from_secs(10.0),
        );

        let events = pump_one(&mut generator, &mut ctx, SimTime::ZERO);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, EventPayload::SendRequest { .. }));
        // Next firing lands 10 ms plus jitter later.
        let rearm = events[1].time.as_micros();
        assert!((10_000..10_000 + JITTER_SPAN_US).contains(&rearm));
    }

    #[test]
    fn test_fixed_rate_stops_near_end() {
        let mut ctx = SimContext::new(11);
        let mut generator = TrafficGenerator::fixed_rate(
            EntityId(9),
            EntityId(1),
            0,
            100.0,
            SimTime::from_secs(10.0),
        );

        // Within the tail margin only the frame is emitted, no re-arm.
        let events = pump_one(&mut generator, &mut ctx, SimTime::from_secs(9.895));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_trace_driven_emits_planned_sizes() {
        let mut ctx = SimContext::new(11);
        let schedule = vec![
            PlannedFrame { at: SimTime::from_micros(0), payload_size: 5 },
            PlannedFrame { at: SimTime::from_micros(400), payload_size: 9 },
        ];
        let mut generator = TrafficGenerator::trace_driven(EntityId(9), EntityId(1), schedule);
        assert_eq!(generator.start_delays().len(), 2);

        let first = pump_one(&mut generator, &mut ctx, SimTime::ZERO);
        let second = pump_one(&mut generator, &mut ctx, SimTime::from_micros(400));
        let sizes: Vec<u32> = [first, second]
            .concat()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::SendRequest { frame } => Some(frame.payload_size),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![5, 9]);

        // Exhausted schedules stay quiet.
        assert!(pump_one(&mut generator, &mut ctx, SimTime::from_micros(800)).is_empty());
    }
}
