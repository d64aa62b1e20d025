//! # motesim-radio
//!
//! CC2420-class radio model: the receive buffer and medium-contention state
//! of one mote's radio chip, plus the timing constants of the 250 kbps PHY.

use motesim_common::SimTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// PHY Constants
// ============================================================================

/// Capacity of the chip's receive FIFO in bytes.
pub const RXFIFO_CAPACITY: u32 = 128;

/// Link-layer framing overhead added to every payload, in bytes.
pub const FRAMING_OVERHEAD: u32 = 36;

/// Preamble and start-of-frame delimiter bytes sent ahead of the frame.
pub const PREAMBLE_SFD_BYTES: u32 = 5;

/// Channel turnaround before a transmission, in microseconds. 12 symbol
/// lengths, spent even with CCA off.
pub const TURNAROUND_US: u64 = 192;

/// Air time of one byte at 250 kbps, in microseconds.
pub const BYTE_TX_US: u64 = 32;

/// Lower bound of the CCA backoff window, in microseconds.
pub const CCA_BACKOFF_MIN_US: u64 = 2400;

/// Width of the CCA backoff window, in microseconds (exclusive upper bound).
pub const CCA_BACKOFF_SPAN_US: u64 = 200;

/// Retry delay when another mote holds the first-sender guard, in microseconds.
pub const FIRST_SENDER_RETRY_US: u64 = 100;

/// Air time of `bytes` bytes at the PHY data rate.
pub fn bytes_tx_time(bytes: u32) -> SimTime {
    SimTime::from_micros(bytes as u64 * BYTE_TX_US)
}

/// Time the medium is held for one frame: preamble, SFD, framing and payload
/// bytes on air, plus the turnaround before them.
pub fn send_duration(payload_size: u32) -> SimTime {
    bytes_tx_time(payload_size + FRAMING_OVERHEAD + PREAMBLE_SFD_BYTES)
        + SimTime::from_micros(TURNAROUND_US)
}

/// Sample a CCA backoff delay, uniform over the backoff window.
pub fn cca_backoff<R: Rng>(rng: &mut R) -> SimTime {
    SimTime::from_micros(CCA_BACKOFF_MIN_US + rng.gen_range(0..CCA_BACKOFF_SPAN_US))
}

// ============================================================================
// Radio Chip
// ============================================================================

/// Hardware-ish state of one mote's radio chip.
///
/// Tracks receive FIFO occupancy and the number of transfers currently on air
/// at this mote (its own transmissions count too). Senders mutate the target
/// chip directly, so chips are shared behind `Rc<RefCell<_>>` in the topology.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RadioChip {
    rx_fifo_bytes: u32,
    overflowed: bool,
    collision: bool,
    concurrent_transfers: u32,
}

impl RadioChip {
    /// Create a chip with an empty buffer and an idle medium.
    pub fn new() -> Self {
        RadioChip::default()
    }

    /// Current receive FIFO occupancy in bytes, framing included.
    pub fn occupancy(&self) -> u32 {
        self.rx_fifo_bytes
    }

    /// Whether the receive FIFO has overflowed since the last flush.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Whether any transfer is currently on air at this mote (the CCA view).
    pub fn is_busy(&self) -> bool {
        self.concurrent_transfers > 0
    }

    /// Number of concurrent transfers at this mote.
    pub fn concurrent_transfers(&self) -> u32 {
        self.concurrent_transfers
    }

    /// Store an arriving frame's bytes (payload plus framing) in the FIFO.
    ///
    /// Bytes beyond [`RXFIFO_CAPACITY`] are lost and the overflow flag
    /// latches until the FIFO is flushed. Returns the number of payload bytes
    /// that did not fit; the caller truncates the frame by that much.
    pub fn append_to_buffer(&mut self, payload_size: u32) -> u32 {
        self.rx_fifo_bytes = self
            .rx_fifo_bytes
            .saturating_add(payload_size)
            .saturating_add(FRAMING_OVERHEAD);
        if self.rx_fifo_bytes > RXFIFO_CAPACITY {
            let excess = self.rx_fifo_bytes - RXFIFO_CAPACITY;
            self.rx_fifo_bytes = RXFIFO_CAPACITY;
            self.overflowed = true;
            excess
        } else {
            0
        }
    }

    /// Release a consumed frame's bytes (payload plus framing) from the FIFO.
    ///
    /// Draining an overflowed FIFO to empty clears the overflow as a flush;
    /// returns true when that happened so the caller can count it.
    pub fn release_from_buffer(&mut self, payload_size: u32) -> bool {
        self.rx_fifo_bytes = self
            .rx_fifo_bytes
            .saturating_sub(payload_size + FRAMING_OVERHEAD);
        if self.overflowed && self.rx_fifo_bytes == 0 {
            self.overflowed = false;
            true
        } else {
            false
        }
    }

    /// Terminal drain once the receive pipeline goes idle.
    ///
    /// An overflowed FIFO still holding bytes is discarded wholesale, since
    /// the driver cannot tell where the garbage starts. Returns true when
    /// that flush happened.
    pub fn force_flush(&mut self) -> bool {
        if self.overflowed && self.rx_fifo_bytes > 0 {
            self.rx_fifo_bytes = 0;
            self.overflowed = false;
            true
        } else {
            false
        }
    }

    /// A transfer at this mote starts (arriving frame or own transmission).
    pub fn begin_transfer(&mut self) {
        self.concurrent_transfers += 1;
    }

    /// Latch the collision flag. Called by send paths that put a frame on an
    /// already busy medium.
    pub fn mark_collision(&mut self) {
        self.collision = true;
    }

    /// A transfer at this mote ends.
    ///
    /// The collision flag is sampled after the decrement, so a frame whose
    /// overlap partner already finished still reads as collided; the flag
    /// clears only once the medium is quiet again. Returns the sampled value.
    pub fn end_transfer(&mut self) -> bool {
        self.concurrent_transfers = self.concurrent_transfers.saturating_sub(1);
        let collided = self.collision;
        if self.collision && self.concurrent_transfers == 0 {
            self.collision = false;
        }
        collided
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_append_within_capacity() {
        let mut chip = RadioChip::new();
        assert_eq!(chip.append_to_buffer(0), 0);
        assert_eq!(chip.occupancy(), 36);
        assert_eq!(chip.append_to_buffer(56), 0);
        assert_eq!(chip.occupancy(), 128);
        assert!(!chip.is_overflowed());
    }

    #[test]
    fn test_append_overflow_truncates() {
        let mut chip = RadioChip::new();
        chip.append_to_buffer(64);
        assert_eq!(chip.occupancy(), 100);
        // 100 + 10 + 36 = 146, 18 bytes over.
        let excess = chip.append_to_buffer(10);
        assert_eq!(excess, 18);
        assert_eq!(chip.occupancy(), RXFIFO_CAPACITY);
        assert!(chip.is_overflowed());
    }

    #[test]
    fn test_append_absurd_payload_saturates() {
        let mut chip = RadioChip::new();
        chip.append_to_buffer(10);
        let excess = chip.append_to_buffer(u32::MAX);
        assert_eq!(chip.occupancy(), RXFIFO_CAPACITY);
        assert!(chip.is_overflowed());
        assert_eq!(excess, u32::MAX - RXFIFO_CAPACITY);
    }

    #[test]
    fn test_release_normal() {
        let mut chip = RadioChip::new();
        chip.append_to_buffer(10);
        assert!(!chip.release_from_buffer(10));
        assert_eq!(chip.occupancy(), 0);
    }

    #[test]
    fn test_release_counts_flush_only_when_drained() {
        let mut chip = RadioChip::new();
        chip.append_to_buffer(64);
        chip.append_to_buffer(64); // overflows, 36 bytes truncated
        // Releasing the first frame leaves bytes behind, no flush yet.
        assert!(!chip.release_from_buffer(64));
        assert!(chip.is_overflowed());
        // Releasing the truncated second frame (64 - 36 = 28 payload bytes
        // made it in) would leave 0, clearing the overflow as a flush.
        assert!(chip.release_from_buffer(28));
        assert!(!chip.is_overflowed());
        assert_eq!(chip.occupancy(), 0);
    }

    #[test]
    fn test_force_flush_only_on_overflow_leftovers() {
        let mut chip = RadioChip::new();
        chip.append_to_buffer(10);
        // Not overflowed, nothing to flush.
        assert!(!chip.force_flush());
        assert_eq!(chip.occupancy(), 46);

        chip.append_to_buffer(64);
        chip.append_to_buffer(64);
        assert!(chip.is_overflowed());
        assert!(chip.force_flush());
        assert_eq!(chip.occupancy(), 0);
        assert!(!chip.is_overflowed());
    }

    #[test]
    fn test_collision_latches_until_quiet() {
        let mut chip = RadioChip::new();
        chip.begin_transfer();
        chip.begin_transfer();
        chip.mark_collision();
        // First finisher reads the collision, flag stays latched.
        assert!(chip.end_transfer());
        // Second finisher still reads it even though it is now alone.
        assert!(chip.end_transfer());
        // Quiet medium cleared the flag for the next transfer.
        chip.begin_transfer();
        assert!(!chip.end_transfer());
    }

    #[test]
    fn test_single_transfer_never_collides() {
        let mut chip = RadioChip::new();
        chip.begin_transfer();
        assert!(chip.is_busy());
        assert!(!chip.end_transfer());
        assert!(!chip.is_busy());
    }

    #[test]
    fn test_cca_backoff_window() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let delay = cca_backoff(&mut rng).as_micros();
            assert!((CCA_BACKOFF_MIN_US..CCA_BACKOFF_MIN_US + CCA_BACKOFF_SPAN_US)
                .contains(&delay));
        }
    }

    #[test]
    fn test_send_duration() {
        // 0-byte payload still carries 41 bytes on air plus turnaround.
        assert_eq!(send_duration(0).as_micros(), 41 * BYTE_TX_US + TURNAROUND_US);
        assert_eq!(bytes_tx_time(1).as_micros(), 32);
    }
}
