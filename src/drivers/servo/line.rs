//! Platform capabilities the bit-banged link is built on: one open-drain-ish
//! signal pin and a delay source that knows how long its own loops take.

use embedded_hal::blocking::delay::DelayUs;

/// The single shared signal wire.
///
/// Every method is called from inside the bit loop, so implementations should
/// touch the port registers and nothing else.
pub trait ServoLine {
    fn drive_low(&mut self);
    fn drive_high(&mut self);
    /// Stop driving and switch to an input with the pull-up enabled.
    fn release(&mut self);
    fn is_high(&mut self) -> bool;
}

/// Which loop in the transport is asking for a delay. Each one executes a
/// different amount of code around the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitLoop {
    Transmit,
    FirstSample,
    Sample,
}

pub trait Timing: DelayUs<u32> {
    /// Wait so that one iteration of `stage`, including its own instructions,
    /// takes `ns` in total.
    fn bit_delay(&mut self, ns: u32, stage: BitLoop);

    /// Number of line polls that fit in `us`.
    fn poll_budget(&self, us: u32) -> u32;
}

/// Instruction cycles spent outside the busy-wait in each loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOverhead {
    pub transmit: u32,
    pub first_sample: u32,
    pub sample: u32,
    pub poll: u32,
}

impl LoopOverhead {
    /// Measured on a Cortex-M0+ running the transport from flash.
    pub const CORTEX_M0P: Self = Self {
        transmit: 25,
        first_sample: 32,
        sample: 19,
        poll: 15,
    };

    fn of(&self, stage: BitLoop) -> u32 {
        match stage {
            BitLoop::Transmit => self.transmit,
            BitLoop::FirstSample => self.first_sample,
            BitLoop::Sample => self.sample,
        }
    }

    /// Busy-wait cycles left once the loop's own work is paid for.
    pub fn cycles_for(&self, cpu_hz: u32, ns: u32, stage: BitLoop) -> u32 {
        let total = (cpu_hz as u64 * ns as u64) / 1_000_000_000;
        (total as u32).saturating_sub(self.of(stage))
    }

    pub fn polls_for(&self, cpu_hz: u32, us: u32) -> u32 {
        let cycles = (cpu_hz as u64 * us as u64) / 1_000_000;
        (cycles / self.poll.max(1) as u64) as u32
    }
}
