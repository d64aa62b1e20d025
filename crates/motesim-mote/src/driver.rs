//! The per-mote radio driver stack: the interrupt-driven receive pipeline,
//! the channel-sensing send pipeline, and the cross-mote send entry.

use crate::metrics::MetricsCollector;
use crate::timings::DeviceTimings;
use motesim_common::stage_trace::StageTrace;
use motesim_common::{
    Entity, EntityId, Event, EventPayload, Frame, Irq, Milestone, MoteId, SimContext, SimError,
    SimTime,
};
use motesim_radio::{cca_backoff, send_duration, RadioChip, FIRST_SENDER_RETRY_US};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

// Deferred pipeline steps, dispatched via Timer events.
const TIMER_READ_LENGTH: u64 = 1;
const TIMER_READ_FCF: u64 = 2;
const TIMER_READ_PAYLOAD: u64 = 3;
const TIMER_RECEIVE_DONE: u64 = 4;
const TIMER_SEND_TASK: u64 = 5;
const TIMER_SEND_DONE: u64 = 6;
const TIMER_FINISHED_TX: u64 = 7;

/// Maximum depth of the outbound queue, the in-flight frame included.
pub const OUTBOUND_CAPACITY: u32 = 3;

/// Shared handle to one mote's radio chip.
pub type ChipHandle = Rc<RefCell<RadioChip>>;

/// Shared handle to the run's metrics.
pub type MetricsHandle = Rc<RefCell<MetricsCollector>>;

/// Process-wide guard serializing the initial cross-mote sends.
pub type FirstSenderGuard = Rc<Cell<bool>>;

/// One mote's radio driver stack.
///
/// Owns the receive pipeline (one frame in flight, later arrivals spill into
/// a FIFO), the outbound queue and send pipeline, and shared handles to the
/// chips it touches. All chip mutation happens inside a single event
/// callback, so the `Rc<RefCell<_>>` handles never see nested borrows of the
/// same chip.
pub struct MoteDriver {
    entity: EntityId,
    id: MoteId,
    chip: ChipHandle,
    send_target: Option<(EntityId, ChipHandle)>,
    first_sender: FirstSenderGuard,
    metrics: MetricsHandle,
    timings: DeviceTimings,

    receiving_in_progress: bool,
    spillover_queue: VecDeque<Frame>,
    current_rx: Option<Frame>,

    outbound_depth: u32,
    send_queue: VecDeque<Frame>,
    current_tx: Option<Frame>,
    channel_busy: bool,

    cca_enabled: bool,
    suppress_transmission: bool,
    trace: StageTrace,
}

impl MoteDriver {
    pub fn new(
        entity: EntityId,
        id: MoteId,
        chip: ChipHandle,
        first_sender: FirstSenderGuard,
        metrics: MetricsHandle,
        timings: DeviceTimings,
    ) -> Self {
        MoteDriver {
            entity,
            id,
            chip,
            send_target: None,
            first_sender,
            metrics,
            timings,
            receiving_in_progress: false,
            spillover_queue: VecDeque::new(),
            current_rx: None,
            outbound_depth: 0,
            send_queue: VecDeque::new(),
            current_tx: None,
            channel_busy: false,
            cca_enabled: true,
            suppress_transmission: false,
            trace: StageTrace::new(),
        }
    }

    /// Set the mote this driver's cross-mote sends are addressed to.
    pub fn set_send_target(&mut self, entity: EntityId, chip: ChipHandle) {
        self.send_target = Some((entity, chip));
    }

    /// Enable or disable clear channel assessment before transmitting.
    pub fn set_cca_enabled(&mut self, enabled: bool) {
        self.cca_enabled = enabled;
    }

    /// Hold the medium without putting bytes on air (calibration mode).
    pub fn set_suppress_transmission(&mut self, suppress: bool) {
        self.suppress_transmission = suppress;
    }

    /// Replace the stage trace (enabled traces record pipeline hand-offs).
    pub fn set_trace(&mut self, trace: StageTrace) {
        self.trace = trace;
    }

    pub fn mote_id(&self) -> MoteId {
        self.id
    }

    /// Frames currently admitted to the outbound path.
    pub fn outbound_depth(&self) -> u32 {
        self.outbound_depth
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving_in_progress
    }

    pub fn trace(&self) -> &StageTrace {
        &self.trace
    }

    // ------------------------------------------------------------------
    // Receive pipeline
    // ------------------------------------------------------------------

    /// A frame finished propagating and hits this mote's radio.
    fn receive_packet(&mut self, mut frame: Frame, ctx: &mut SimContext) {
        self.first_sender.set(false);

        {
            let mut chip = self.chip.borrow_mut();
            frame.collided = chip.end_transfer();
            frame.record(Milestone::ReceiveStart, ctx.time());

            // The radio stores the bytes even while a previous frame is
            // still being read out, and even into an already overflowed
            // FIFO; truncated frames fail their CRC check later.
            let excess = chip.append_to_buffer(frame.payload_size);
            if excess > 0 {
                log::debug!("{}: RXFIFO overflow, {} bytes lost", self.id, excess);
                frame.collided = true;
                frame.truncate_tail(excess);
            }
        }

        if self.receiving_in_progress {
            log::trace!(
                "{}: busy with a reception, frame {} spills over (queue depth {})",
                self.id,
                frame.seq_nr,
                self.spillover_queue.len() + 1
            );
            self.spillover_queue.push_back(frame);
            return;
        }

        self.receiving_in_progress = true;
        self.begin_read(frame, ctx);
    }

    /// Kick off the staged read-out of a frame sitting in the RXFIFO.
    fn begin_read(&mut self, frame: Frame, ctx: &mut SimContext) {
        ctx.raise_interrupt(SimTime::ZERO, self.entity, self.id, Irq::RxLengthReady);
        self.trace.record("h1-h2", ctx.time(), frame.seq_nr);
        self.current_rx = Some(frame);
        self.post_timer(ctx, self.timings.length_read(), TIMER_READ_LENGTH);
    }

    fn read_done_length(&mut self, ctx: &mut SimContext) {
        if let Some(frame) = &self.current_rx {
            self.trace.record("h2-h3", ctx.time(), frame.seq_nr);
        }
        self.post_timer(ctx, self.timings.fcf_read(), TIMER_READ_FCF);
    }

    fn read_done_fcf(&mut self, ctx: &mut SimContext) {
        let payload_size = match &self.current_rx {
            Some(frame) => {
                self.trace.record("h3-h4", ctx.time(), frame.seq_nr);
                self.trace
                    .record("h3-bytes", ctx.time(), frame.payload_size as u64);
                frame.payload_size
            }
            None => return,
        };
        self.post_timer(ctx, self.timings.payload_read(payload_size), TIMER_READ_PAYLOAD);
    }

    /// Terminal stage of the read-out: the frame is fully in RAM, the FIFO
    /// bytes are released, and the CRC verdict decides its fate.
    fn read_done_payload(&mut self, ctx: &mut SimContext) {
        let frame = match self.current_rx.take() {
            Some(frame) => frame,
            None => return,
        };

        let flushed = self.chip.borrow_mut().release_from_buffer(frame.payload_size);
        if flushed {
            log::debug!("{}: RXFIFO flushed after drain", self.id);
            self.metrics.borrow_mut().rxfifo_flushes += 1;
        }

        if frame.collided {
            log::debug!(
                "{}: frame {} failed its CRC check, dropping",
                self.id,
                frame.seq_nr
            );
            self.metrics.borrow_mut().dropped_crc += 1;
            self.drain_next(ctx);
        } else {
            self.trace.record("h4-rcvd", ctx.time(), frame.seq_nr);
            self.current_rx = Some(frame);
            self.post_timer(ctx, self.timings.receive_done(), TIMER_RECEIVE_DONE);
        }
    }

    /// Admission of a good frame into the outbound path.
    fn receive_done(&mut self, ctx: &mut SimContext) {
        let frame = match self.current_rx.take() {
            Some(frame) => frame,
            None => return,
        };

        if self.outbound_depth < OUTBOUND_CAPACITY {
            self.outbound_depth += 1;
            self.trace.record("send-queue", ctx.time(), frame.seq_nr);
            self.trace.record("rcvd-send", ctx.time(), frame.seq_nr);
            self.trace.record("ip-bytes", ctx.time(), frame.payload_size as u64);
            // Reading out the RXFIFO keeps priority over sending, hence the
            // interrupt is delayed rather than immediate.
            ctx.raise_interrupt(
                SimTime::from_micros(1),
                self.entity,
                self.id,
                Irq::OutboundAdmitted,
            );
            self.send_queue.push_back(frame);
            self.post_timer(ctx, SimTime::ZERO, TIMER_SEND_TASK);
        } else {
            log::debug!(
                "{}: outbound queue full, dropping frame {}",
                self.id,
                frame.seq_nr
            );
            self.metrics.borrow_mut().dropped_outbound_full += 1;
            ctx.raise_interrupt(
                SimTime::from_micros(1),
                self.entity,
                self.id,
                Irq::OutboundRejected,
            );
        }

        self.drain_next(ctx);
    }

    /// Start on the next spilled-over frame, or go idle and clean the FIFO.
    fn drain_next(&mut self, ctx: &mut SimContext) {
        if let Some(next) = self.spillover_queue.pop_front() {
            self.begin_read(next, ctx);
        } else {
            self.receiving_in_progress = false;
            if self.chip.borrow_mut().force_flush() {
                log::debug!("{}: RXFIFO flushed at idle", self.id);
                self.metrics.borrow_mut().rxfifo_flushes += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Send pipeline
    // ------------------------------------------------------------------

    fn send_task(&mut self, ctx: &mut SimContext) {
        if self.channel_busy {
            return;
        }
        let frame = match self.send_queue.pop_front() {
            Some(frame) => frame,
            None => return,
        };

        self.trace.record("send-senddone", ctx.time(), frame.seq_nr);
        self.trace.record("send-bytes", ctx.time(), frame.payload_size as u64);
        self.channel_busy = true;
        let copy_delay = self.timings.txfifo_copy(frame.payload_size);
        self.current_tx = Some(frame);
        self.post_timer(ctx, copy_delay, TIMER_SEND_DONE);
    }

    /// The frame sits in the TXFIFO and the radio is ready to send.
    fn send_done(&mut self, ctx: &mut SimContext) {
        let now = ctx.time();
        let (payload_size, seq_nr) = {
            let frame = match self.current_tx.as_mut() {
                Some(frame) => frame,
                None => return,
            };
            if !frame.attempted_sent {
                frame.attempted_sent = true;
                frame.record(Milestone::ReceiveComplete, now);
                let received_at = frame
                    .timestamp(Milestone::ReceiveStart)
                    .unwrap_or(SimTime::ZERO);
                let delay_us = (now - received_at).as_micros();
                self.metrics.borrow_mut().record_intra_stack_delay(
                    frame.seq_nr,
                    received_at,
                    delay_us,
                );
                log::trace!(
                    "{}: frame {} entered the outbound path, stack delay {} us",
                    self.id,
                    frame.seq_nr,
                    delay_us
                );
            }
            (frame.payload_size, frame.seq_nr)
        };

        if self.suppress_transmission {
            self.chip.borrow_mut().begin_transfer();
            self.post_timer(ctx, SimTime::ZERO, TIMER_FINISHED_TX);
            return;
        }

        if self.chip.borrow().is_busy() {
            if self.cca_enabled {
                let backoff = cca_backoff(ctx.rng());
                log::trace!(
                    "{}: channel busy, backing off {} us before sending {}",
                    self.id,
                    backoff.as_micros(),
                    seq_nr
                );
                self.post_timer(ctx, backoff, TIMER_SEND_DONE);
                return;
            }
            log::debug!("{}: forwarding frame {} causes a collision", self.id, seq_nr);
            self.chip.borrow_mut().mark_collision();
        }

        self.chip.borrow_mut().begin_transfer();
        self.post_timer(ctx, send_duration(payload_size), TIMER_FINISHED_TX);
    }

    /// The radio put the last byte on air; the frame leaves the send queue.
    fn finished_transmitting(&mut self, ctx: &mut SimContext) {
        let mut frame = match self.current_tx.take() {
            Some(frame) => frame,
            None => return,
        };

        self.metrics.borrow_mut().forwarded += 1;
        self.channel_busy = false;
        frame.record(Milestone::TransmitComplete, ctx.time());
        self.outbound_depth = self.outbound_depth.saturating_sub(1);
        if self.chip.borrow_mut().end_transfer() {
            log::debug!(
                "{}: transmission of frame {} overlapped another transfer",
                self.id,
                frame.seq_nr
            );
        }

        self.trace.record("rcvd-send", ctx.time(), frame.seq_nr);
        ctx.raise_interrupt(SimTime::ZERO, self.entity, self.id, Irq::TxComplete);
        self.post_timer(ctx, SimTime::ZERO, TIMER_SEND_TASK);
    }

    // ------------------------------------------------------------------
    // Cross-mote send entry
    // ------------------------------------------------------------------

    /// Put a frame on air towards the send target. This is the radio-level
    /// view the generator drives; it senses the target's medium, not ours.
    fn send_packet(&mut self, mut frame: Frame, ctx: &mut SimContext) {
        let (target_entity, target_chip) = match &self.send_target {
            Some((entity, chip)) => (*entity, Rc::clone(chip)),
            None => {
                log::warn!("{}: no send target configured, dropping frame", self.id);
                return;
            }
        };

        let (overflowed, busy) = {
            let chip = target_chip.borrow();
            (chip.is_overflowed(), chip.is_busy())
        };

        if !overflowed && !busy {
            if self.first_sender.get() {
                ctx.post_event(
                    SimTime::from_micros(FIRST_SENDER_RETRY_US),
                    vec![self.entity],
                    EventPayload::SendRequest { frame },
                );
                return;
            }
            self.first_sender.set(true);
            self.metrics.borrow_mut().total_offered += 1;
            target_chip.borrow_mut().begin_transfer();
            frame.record(Milestone::EnqueueForSend, ctx.time());
            log::trace!("{}: sending frame {}", self.id, frame.seq_nr);
            let air_time = send_duration(frame.payload_size);
            ctx.post_event(air_time, vec![target_entity], EventPayload::FrameArrival { frame });
        } else if busy {
            if self.cca_enabled {
                let backoff = cca_backoff(ctx.rng());
                ctx.post_event(backoff, vec![self.entity], EventPayload::SendRequest { frame });
                return;
            }
            // The target cannot read this frame's header mid-reception; it
            // only disturbs whatever is already on air.
            log::debug!(
                "{}: target busy with CCA off, frame {} lost on air",
                self.id,
                frame.seq_nr
            );
            let mut metrics = self.metrics.borrow_mut();
            metrics.total_offered += 1;
            metrics.dropped_collision_at_sender += 1;
            target_chip.borrow_mut().mark_collision();
        } else {
            log::debug!(
                "{}: target RXFIFO overflowed, frame {} not sent",
                self.id,
                frame.seq_nr
            );
            let mut metrics = self.metrics.borrow_mut();
            metrics.total_offered += 1;
            metrics.dropped_overflowed_target += 1;
        }
    }

    fn post_timer(&self, ctx: &mut SimContext, delay: SimTime, timer_id: u64) {
        ctx.post_event(delay, vec![self.entity], EventPayload::Timer { timer_id });
    }
}

impl Entity for MoteDriver {
    fn entity_id(&self) -> EntityId {
        self.entity
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::FrameArrival { frame } => self.receive_packet(frame.clone(), ctx),
            EventPayload::SendRequest { frame } => self.send_packet(frame.clone(), ctx),
            EventPayload::Timer { timer_id } => match *timer_id {
                TIMER_READ_LENGTH => self.read_done_length(ctx),
                TIMER_READ_FCF => self.read_done_fcf(ctx),
                TIMER_READ_PAYLOAD => self.read_done_payload(ctx),
                TIMER_RECEIVE_DONE => self.receive_done(ctx),
                TIMER_SEND_TASK => self.send_task(ctx),
                TIMER_SEND_DONE => self.send_done(ctx),
                TIMER_FINISHED_TX => self.finished_transmitting(ctx),
                other => {
                    return Err(SimError::HandlerError {
                        entity: self.entity,
                        message: format!("unknown timer id {other}"),
                    })
                }
            },
            EventPayload::Interrupt { mote, irq } => {
                log::trace!("{}: interrupt {} serviced", mote, irq.service_name());
            }
            EventPayload::SimulationEnd => {}
        }
        Ok(())
    }
}
