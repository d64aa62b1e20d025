//! # motesim-common
//!
//! Common types and traits for the motesim simulation framework.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Mote and entity identification ([`MoteId`], [`EntityId`])
//! - The frame unit exchanged between motes ([`Frame`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Simulation context ([`SimContext`])
//! - Entity traits ([`Entity`])
//! - Pipeline stage tracing ([`stage_trace`])

pub mod stage_trace;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Event handler error.
    #[error("Event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float).
    pub fn from_secs(s: f64) -> Self {
        SimTime((s * 1_000_000.0) as u64)
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1000
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

// ============================================================================
// Identity Types
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

/// Stable small identity of a mote, assigned by the topology builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MoteId(pub u32);

impl std::fmt::Display for MoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mote{}", self.0)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Pipeline milestones at which a frame's timestamps are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Milestone {
    /// Admitted into a cross-mote send.
    EnqueueForSend,
    /// Arrived at the receiver's radio.
    ReceiveStart,
    /// Handed to the outbound path (first entry of the send-done step).
    ReceiveComplete,
    /// Transmission finished.
    TransmitComplete,
}

/// The unit of data exchanged between motes.
///
/// A frame is owned by exactly one pipeline stage at a time and is dropped
/// (logically destroyed) by whichever stage decides not to forward it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// UDP payload size in bytes, excluding framing overhead.
    pub payload_size: u32,
    /// Sequence number, unique within a run.
    pub seq_nr: u64,
    /// Times recorded at pipeline milestones, append-only. Keyed by
    /// milestone: a frame that skipped an earlier milestone (a generated
    /// frame has no send admission, for instance) still resolves the later
    /// ones correctly.
    pub timestamps: Vec<(Milestone, SimTime)>,
    /// True once this frame overlapped another transmission at a receiver.
    pub collided: bool,
    /// Set on the first entry of the send-done step; guards against
    /// double-counting when CCA backoff re-enters that step.
    pub attempted_sent: bool,
}

impl Frame {
    /// Create a new frame.
    pub fn new(seq_nr: u64, payload_size: u32) -> Self {
        Frame {
            payload_size,
            seq_nr,
            timestamps: Vec::with_capacity(4),
            collided: false,
            attempted_sent: false,
        }
    }

    /// Record a milestone timestamp.
    pub fn record(&mut self, milestone: Milestone, time: SimTime) {
        self.timestamps.push((milestone, time));
    }

    /// Get the timestamp recorded at a milestone, if reached.
    pub fn timestamp(&self, milestone: Milestone) -> Option<SimTime> {
        self.timestamps
            .iter()
            .find(|(m, _)| *m == milestone)
            .map(|(_, t)| *t)
    }

    /// Remove trailing payload bytes lost to buffer overflow.
    pub fn truncate_tail(&mut self, bytes: u32) {
        self.payload_size = self.payload_size.saturating_sub(bytes);
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID, assigned monotonically at submission.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first); equal times
        // break FIFO by submission since ids are monotonic.
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Hardware interrupt lines raised by the radio driver.
///
/// Interrupts are delivered for timing and trace fidelity only; no handler
/// state depends on their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Irq {
    /// The radio signalled that the frame length byte is readable.
    RxLengthReady,
    /// A received frame was admitted into the outbound queue.
    OutboundAdmitted,
    /// A received frame was rejected because the outbound queue was full.
    OutboundRejected,
    /// A transmission completed.
    TxComplete,
}

impl Irq {
    /// Service name of the interrupt, as the driver stack labels it.
    pub fn service_name(&self) -> &'static str {
        match self {
            Irq::RxLengthReady => "HIRQ-1",
            Irq::OutboundAdmitted => "HIRQ-14",
            Irq::OutboundRejected => "HIRQ-17",
            Irq::TxComplete => "HIRQ-6",
        }
    }
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A frame finished propagating and arrives at a mote's radio.
    FrameArrival {
        /// The arriving frame.
        frame: Frame,
    },

    /// Entry (or retry) of a cross-mote send at the sending mote.
    SendRequest {
        /// The frame to send.
        frame: Frame,
    },

    /// A delayed pipeline step.
    Timer {
        /// Driver-defined timer ID.
        timer_id: u64,
    },

    /// A named interrupt delivered to a mote's execution context.
    Interrupt {
        /// Mote the interrupt is delivered to.
        mote: MoteId,
        /// Interrupt line.
        irq: Irq,
    },

    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
///
/// This is the scheduler surface the pipelines see: current time, deferred
/// callbacks via [`post_event`](SimContext::post_event), interrupt delivery
/// via [`raise_interrupt`](SimContext::raise_interrupt), and the run's single
/// deterministic RNG.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    next_event_id: u64,
    source_entity: EntityId,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// Post an event to occur after a delay.
    pub fn post_event(&mut self, delay: SimTime, targets: Vec<EntityId>, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            time: self.time + delay,
            source: self.source_entity,
            targets,
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
    }

    /// Post an event to occur immediately (at current time).
    pub fn post_immediate(&mut self, targets: Vec<EntityId>, payload: EventPayload) {
        self.post_event(SimTime::ZERO, targets, payload);
    }

    /// Deliver a named interrupt to a mote's execution context after a delay.
    pub fn raise_interrupt(&mut self, delay: SimTime, target: EntityId, mote: MoteId, irq: Irq) {
        self.post_event(delay, vec![target], EventPayload::Interrupt { mote, irq });
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
///
/// Entities share state through `Rc<RefCell<_>>` handles, which is sound
/// because all dispatch is single-threaded: only one callback ever runs at a
/// time.
pub trait Entity {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn Entity>> {
        self.entities.get_mut(&id)
    }

    /// Dispatch an event to its target entities.
    pub fn dispatch_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        for target in &event.targets {
            if let Some(entity) = self.entities.get_mut(target) {
                ctx.set_source(*target);
                entity.handle_event(event, ctx)?;
            } else {
                return Err(SimError::EntityNotFound(*target));
            }
        }
        Ok(())
    }

    /// Get all entity IDs.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
