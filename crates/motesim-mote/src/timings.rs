//! Per-stage firmware processing delays of the device.
//!
//! The values model the TelosB microcontroller reading the radio's buffers
//! over SPI and running the driver stack; they are loaded from a device
//! descriptor file and default to values calibrated against traces of the
//! real device.

use motesim_common::SimTime;
use serde::{Deserialize, Serialize};

fn default_length_read_us() -> u64 {
    300
}

fn default_fcf_read_us() -> u64 {
    250
}

fn default_payload_read_base_us() -> u64 {
    250
}

fn default_payload_read_per_byte_us() -> u64 {
    4
}

fn default_receive_done_us() -> u64 {
    200
}

fn default_txfifo_copy_base_us() -> u64 {
    300
}

fn default_txfifo_copy_per_byte_us() -> u64 {
    4
}

/// Firmware processing delays between pipeline stages, in microseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTimings {
    /// Arrival (or spillover dequeue) to length byte read.
    #[serde(default = "default_length_read_us")]
    pub length_read_us: u64,
    /// Length read to frame control field read.
    #[serde(default = "default_fcf_read_us")]
    pub fcf_read_us: u64,
    /// Fixed part of the payload drain from the RXFIFO.
    #[serde(default = "default_payload_read_base_us")]
    pub payload_read_base_us: u64,
    /// Per-byte part of the payload drain, scaling with the (possibly
    /// truncated) payload size.
    #[serde(default = "default_payload_read_per_byte_us")]
    pub payload_read_per_byte_us: u64,
    /// Payload read to the receive-done admission step.
    #[serde(default = "default_receive_done_us")]
    pub receive_done_us: u64,
    /// Fixed part of copying an outbound frame into the TXFIFO.
    #[serde(default = "default_txfifo_copy_base_us")]
    pub txfifo_copy_base_us: u64,
    /// Per-byte part of the TXFIFO copy.
    #[serde(default = "default_txfifo_copy_per_byte_us")]
    pub txfifo_copy_per_byte_us: u64,
}

impl Default for DeviceTimings {
    fn default() -> Self {
        DeviceTimings {
            length_read_us: default_length_read_us(),
            fcf_read_us: default_fcf_read_us(),
            payload_read_base_us: default_payload_read_base_us(),
            payload_read_per_byte_us: default_payload_read_per_byte_us(),
            receive_done_us: default_receive_done_us(),
            txfifo_copy_base_us: default_txfifo_copy_base_us(),
            txfifo_copy_per_byte_us: default_txfifo_copy_per_byte_us(),
        }
    }
}

impl DeviceTimings {
    /// Delay of the length read stage.
    pub fn length_read(&self) -> SimTime {
        SimTime::from_micros(self.length_read_us)
    }

    /// Delay of the frame control field read stage.
    pub fn fcf_read(&self) -> SimTime {
        SimTime::from_micros(self.fcf_read_us)
    }

    /// Delay of the payload read stage for a given payload size.
    pub fn payload_read(&self, payload_size: u32) -> SimTime {
        SimTime::from_micros(
            self.payload_read_base_us + self.payload_read_per_byte_us * payload_size as u64,
        )
    }

    /// Delay of the receive-done admission step.
    pub fn receive_done(&self) -> SimTime {
        SimTime::from_micros(self.receive_done_us)
    }

    /// Delay of copying a frame into the TXFIFO for a given payload size.
    pub fn txfifo_copy(&self, payload_size: u32) -> SimTime {
        SimTime::from_micros(
            self.txfifo_copy_base_us + self.txfifo_copy_per_byte_us * payload_size as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_scale_per_byte() {
        let timings = DeviceTimings::default();
        assert_eq!(timings.payload_read(0).as_micros(), 250);
        assert_eq!(timings.payload_read(10).as_micros(), 290);
        assert_eq!(timings.txfifo_copy(0).as_micros(), 300);
    }

    #[test]
    fn test_partial_descriptor_fills_defaults() {
        let timings: DeviceTimings = serde_yaml::from_str("length_read_us: 123").unwrap();
        assert_eq!(timings.length_read_us, 123);
        assert_eq!(timings.fcf_read_us, 250);
    }
}
