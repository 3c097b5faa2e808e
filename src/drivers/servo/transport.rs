//! Bit-banged, inverted-logic serial on the shared signal line.
//!
//! Idle and stop level is LOW. A start bit drives the line HIGH, data bits go
//! out LSB first with HIGH meaning 0 and LOW meaning 1. There is no hardware
//! UART behind this: every edge is placed by a calibrated busy-wait, so callers
//! must hold a critical section across a whole frame.

use super::line::{BitLoop, ServoLine, Timing};
use crate::config::{BIT_PERIOD_NS, START_EDGE_TIMEOUT_US};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxFault {
    /// No start edge within the timeout.
    Timeout,
    /// Stop bit was not at idle level.
    Framing,
}

pub struct BitBang<'a, P, T> {
    line: &'a mut P,
    timing: &'a mut T,
}

impl<'a, P: ServoLine, T: Timing> BitBang<'a, P, T> {
    pub fn new(line: &'a mut P, timing: &'a mut T) -> Self {
        Self { line, timing }
    }

    pub fn transmit_byte(&mut self, byte: u8) {
        // start bit
        self.line.drive_high();
        self.timing.bit_delay(BIT_PERIOD_NS, BitLoop::Transmit);

        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                self.line.drive_low();
            } else {
                self.line.drive_high();
            }
            self.timing.bit_delay(BIT_PERIOD_NS, BitLoop::Transmit);
        }

        // stop bit
        self.line.drive_low();
        self.timing.bit_delay(BIT_PERIOD_NS, BitLoop::Transmit);
    }

    pub fn transmit(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.transmit_byte(b);
        }
    }

    /// Expects the line to already be released.
    pub fn receive_byte(&mut self) -> Result<u8, RxFault> {
        let mut budget = self.timing.poll_budget(START_EDGE_TIMEOUT_US);
        while !self.line.is_high() {
            budget = budget.saturating_sub(1);
            if budget == 0 {
                return Err(RxFault::Timeout);
            }
        }

        // centre of the first data bit
        self.timing
            .bit_delay(BIT_PERIOD_NS + BIT_PERIOD_NS / 2, BitLoop::FirstSample);

        let mut byte = 0u8;
        for bit in 0..8 {
            if !self.line.is_high() {
                byte |= 1 << bit;
            }
            self.timing.bit_delay(BIT_PERIOD_NS, BitLoop::Sample);
        }

        if self.line.is_high() {
            return Err(RxFault::Framing);
        }
        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::servo::sim::{guard_depth, Sim, SimLine, SimTiming};

    fn guarded<R>(line: &mut SimLine, timing: &mut SimTiming, f: impl FnOnce(&mut BitBang<'_, SimLine, SimTiming>) -> R) -> R {
        critical_section::with(|_| f(&mut BitBang::new(line, timing)))
    }

    #[test]
    fn transmitted_bytes_decode_on_the_far_end() {
        let (sim, mut line, mut timing) = Sim::new();
        line.drive_low();
        guarded(&mut line, &mut timing, |bus| bus.transmit(&[0xA5, 0x00, 0xFF, 0x96]));
        assert_eq!(sim.host_bytes(), [0xA5, 0x00, 0xFF, 0x96]);
    }

    #[test]
    fn line_idles_low_after_each_byte() {
        let (_sim, mut line, mut timing) = Sim::new();
        line.drive_low();
        guarded(&mut line, &mut timing, |bus| bus.transmit_byte(0x00));
        assert!(!line.is_high());
    }

    #[test]
    fn receives_inverted_bytes_lsb_first() {
        let (sim, mut line, mut timing) = Sim::new();
        line.release();
        sim.inject_reply(&[0x69, 0x01, 0x80, 0xFE]);
        let got = guarded(&mut line, &mut timing, |bus| {
            [bus.receive_byte(), bus.receive_byte(), bus.receive_byte(), bus.receive_byte()]
        });
        assert_eq!(got, [Ok(0x69), Ok(0x01), Ok(0x80), Ok(0xFE)]);
    }

    #[test]
    fn quiet_line_times_out() {
        let (sim, mut line, mut timing) = Sim::new();
        line.release();
        sim.inject_reply(&[]);
        let start = sim.now_ns();
        assert_eq!(
            guarded(&mut line, &mut timing, |bus| bus.receive_byte()),
            Err(RxFault::Timeout)
        );
        let waited = sim.now_ns() - start;
        assert!(waited >= START_EDGE_TIMEOUT_US as u64 * 1_000 - 1_000);
        assert!(waited <= START_EDGE_TIMEOUT_US as u64 * 1_000 + 1_000);
    }

    #[test]
    fn high_stop_bit_is_a_framing_fault() {
        let (sim, mut line, mut timing) = Sim::new();
        line.release();
        sim.inject_reply_with_bad_stop(&[0x42]);
        assert_eq!(
            guarded(&mut line, &mut timing, |bus| bus.receive_byte()),
            Err(RxFault::Framing)
        );
    }

    #[test]
    #[should_panic(expected = "outside the timing guard")]
    fn unguarded_bit_loop_is_caught() {
        let (_sim, mut line, mut timing) = Sim::new();
        line.drive_low();
        assert_eq!(guard_depth(), 0);
        BitBang::new(&mut line, &mut timing).transmit_byte(0x55);
    }
}
