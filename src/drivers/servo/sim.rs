//! A D485HW on the far end of a simulated wire, in virtual time.
//!
//! `SimLine` and `SimTiming` share one clock. Delays advance it, every line
//! poll costs `POLL_NS`, and the servo side is a waveform evaluated against
//! that clock. Host edges are decoded back into bytes with the same bit timing
//! the servo firmware would use.
//!
//! The test build also supplies the `critical-section` implementation. It
//! keeps a per-thread nesting depth so the simulated timing can insist that
//! bit loops run guarded and settle delays do not.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayUs;

use super::line::{BitLoop, ServoLine, Timing};
use super::protocol::{self as p, checksum};
use crate::config::BIT_PERIOD_NS;

/* ───── Timing guard ────────────────────────────────────────────────── */
struct DepthTracking;
critical_section::set_impl!(DepthTracking);

thread_local! {
    static GUARD_DEPTH: Cell<u32> = const { Cell::new(0) };
    static GUARD_ENTRIES: Cell<usize> = const { Cell::new(0) };
}

unsafe impl critical_section::Impl for DepthTracking {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        GUARD_DEPTH.with(|d| {
            if d.get() == 0 {
                GUARD_ENTRIES.with(|n| n.set(n.get() + 1));
            }
            d.set(d.get() + 1);
        });
    }

    unsafe fn release(_: critical_section::RawRestoreState) {
        GUARD_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

pub fn guard_depth() -> u32 {
    GUARD_DEPTH.with(Cell::get)
}

/// Outermost guard scopes entered on this thread so far.
pub fn guard_entries() -> usize {
    GUARD_ENTRIES.with(Cell::get)
}

/* ───── Simulated servo ─────────────────────────────────────────────── */
pub const POLL_NS: u64 = 250;
const BIT: u64 = BIT_PERIOD_NS as u64;
const RESPONSE_DELAY_NS: u64 = 150_000;
const RELEASE_HOLD_NS: u64 = 100_000;
const SILENT_RELEASE_NS: u64 = 10_000_000;
const MYSTERY: u8 = 0x3C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Nothing on the wire; the pull-up wins.
    Absent,
    /// Servo answers but nothing pulls the line up afterwards.
    NoPullUp,
    /// Servo claims the bus, sends nothing, lets go after 10ms.
    Silent,
    /// Flip bits in one byte of every response.
    Tamper { index: usize, xor: u8 },
}

pub fn factory_registers() -> BTreeMap<u8, u16> {
    [
        (p::REG_MODEL_NUMBER, 485),
        (p::REG_CURRENT_RAW_ANGLE, 8192),
        (p::REG_TARGET_QUARTER_MICROS, 6000),
        (p::REG_ID, 0),
        (p::REG_FAIL_SAFE_LIMP, 0),
        (p::REG_FAIL_SAFE, 0),
        (p::REG_DEADBAND, 1),
        (p::REG_SPEED, 10),
        (p::REG_DIRECTION, 0),
        (p::REG_SOFT_START, 1),
        (p::REG_SENSITIVITY_RATIO, 4095),
        (p::REG_SMART_SENSE, 1),
        (p::REG_OVERLOAD_PROTECTION, 0),
        (p::REG_RAW_ANGLE_FOR_2150, 13003),
        (p::REG_RAW_ANGLE_FOR_850, 3381),
        (p::REG_RAW_ANGLE_FOR_1500, 8192),
    ]
    .into_iter()
    .collect()
}

struct State {
    now: u64,
    /// Level the host drives, `None` while released.
    driving: Option<bool>,
    host_edges: Vec<(u64, bool)>,
    host_bytes: Vec<u8>,
    decoded: usize,
    /// Servo-side waveform, only consulted while the host is released.
    reply: Vec<(u64, bool)>,
    registers: BTreeMap<u8, u16>,
    factory: BTreeMap<u8, u16>,
    writes: Vec<(u8, u16)>,
    reads: Vec<u8>,
    save_unlocked: bool,
    commits: usize,
    fault: Fault,
}

impl State {
    fn level(&self) -> bool {
        match self.driving {
            Some(level) => level,
            None => self
                .reply
                .iter()
                .rev()
                .find(|(at, _)| *at <= self.now)
                .map_or(true, |&(_, level)| level),
        }
    }

    fn drive(&mut self, level: bool) {
        if self.driving != Some(level) {
            self.host_edges.push((self.now, level));
            self.driving = Some(level);
        }
    }

    /// Decode every complete byte the host has put on the wire so far and act
    /// on the frames. Returns the register of a trailing read request.
    fn flush(&mut self) -> Option<u8> {
        let edges = core::mem::take(&mut self.host_edges);
        let level_at = |t: u64| {
            edges
                .iter()
                .rev()
                .find(|(at, _)| *at <= t)
                .map_or(false, |&(_, level)| level)
        };
        let mut cursor = 0;
        while let Some(&(start, _)) = edges.iter().find(|&&(at, high)| at >= cursor && high) {
            let mut byte = 0u8;
            for bit in 0..8 {
                if !level_at(start + BIT + BIT / 2 + bit * BIT) {
                    byte |= 1 << bit;
                }
            }
            self.host_bytes.push(byte);
            cursor = start + 10 * BIT;
        }

        let mut pending_read = None;
        while self.decoded < self.host_bytes.len() {
            let rest = &self.host_bytes[self.decoded..];
            if rest[0] != p::REQUEST_HEADER || rest.len() < p::READ_REQUEST_LEN {
                self.decoded += 1;
                continue;
            }
            if rest[3] == p::VALUE_LEN && rest.len() >= p::WRITE_FRAME_LEN {
                let frame = [rest[0], rest[1], rest[2], rest[3], rest[4], rest[5], rest[6]];
                self.decoded += p::WRITE_FRAME_LEN;
                if frame[6] == checksum(&frame[1..6]) {
                    self.apply_write(frame[2], u16::from_le_bytes([frame[4], frame[5]]));
                }
            } else if rest[3] == p::READ_LEN {
                let reg = rest[2];
                let ok = rest[4] == checksum(&rest[1..4]);
                self.decoded += p::READ_REQUEST_LEN;
                if ok {
                    pending_read = Some(reg);
                }
            } else {
                self.decoded += 1;
            }
        }
        pending_read
    }

    fn apply_write(&mut self, reg: u8, value: u16) {
        self.writes.push((reg, value));
        match (reg, value) {
            (p::REG_FACTORY_RESET, p::FACTORY_RESET_MAGIC) => self.registers = self.factory.clone(),
            (p::REG_SAVE_UNLOCK, p::SAVE_UNLOCK_MAGIC) => self.save_unlocked = true,
            (p::REG_SAVE_COMMIT, p::SAVE_COMMIT_MAGIC) if self.save_unlocked => {
                self.save_unlocked = false;
                self.commits += 1;
            }
            _ => {
                self.registers.insert(reg, value);
            }
        }
    }

    fn respond(&mut self, reg: u8) {
        self.reads.push(reg);
        let value = self.registers.get(&reg).copied().unwrap_or(0);
        let [lo, hi] = value.to_le_bytes();
        let mut frame = [p::RESPONSE_HEADER, MYSTERY, reg, p::VALUE_LEN, lo, hi, 0];
        frame[6] = checksum(&frame[1..6]);
        if let Fault::Tamper { index, xor } = self.fault {
            frame[index] ^= xor;
        }

        match self.fault {
            Fault::Absent => self.reply = vec![(self.now, true)],
            Fault::Silent => {
                self.reply = vec![(self.now, false), (self.now + SILENT_RELEASE_NS, true)];
            }
            _ => {
                let end = self.schedule(&frame, false);
                self.reply.push((end + RELEASE_HOLD_NS, self.fault != Fault::NoPullUp));
            }
        }
    }

    /// Servo pulls the line low now and starts sending after a short delay.
    /// Returns the time the last stop bit ends.
    fn schedule(&mut self, bytes: &[u8], bad_stop: bool) -> u64 {
        self.reply = vec![(self.now, false)];
        let mut t = self.now + RESPONSE_DELAY_NS;
        for &byte in bytes {
            self.reply.push((t, true));
            for bit in 0..8 {
                self.reply.push((t + (bit + 1) * BIT, byte & (1 << bit) == 0));
            }
            self.reply.push((t + 9 * BIT, bad_stop));
            self.reply.push((t + 10 * BIT, false));
            t += 11 * BIT;
        }
        t
    }
}

/// Test-side handle on the simulated servo.
#[derive(Clone)]
pub struct Sim(Rc<RefCell<State>>);

pub struct SimLine(Rc<RefCell<State>>);

pub struct SimTiming(Rc<RefCell<State>>);

impl Sim {
    pub fn new() -> (Sim, SimLine, SimTiming) {
        let factory = factory_registers();
        let state = Rc::new(RefCell::new(State {
            now: 0,
            driving: None,
            host_edges: Vec::new(),
            host_bytes: Vec::new(),
            decoded: 0,
            reply: Vec::new(),
            registers: factory.clone(),
            factory,
            writes: Vec::new(),
            reads: Vec::new(),
            save_unlocked: false,
            commits: 0,
            fault: Fault::None,
        }));
        (
            Sim(state.clone()),
            SimLine(state.clone()),
            SimTiming(state),
        )
    }

    pub fn now_ns(&self) -> u64 {
        self.0.borrow().now
    }

    pub fn set_fault(&self, fault: Fault) {
        self.0.borrow_mut().fault = fault;
    }

    /// Change a register behind the host's back, factory table included, as
    /// if the servo had left the factory that way.
    pub fn set_factory_register(&self, reg: u8, value: u16) {
        let mut s = self.0.borrow_mut();
        s.factory.insert(reg, value);
        s.registers.insert(reg, value);
    }

    pub fn set_register(&self, reg: u8, value: u16) {
        self.0.borrow_mut().registers.insert(reg, value);
    }

    pub fn register(&self, reg: u8) -> u16 {
        let mut s = self.0.borrow_mut();
        s.flush();
        s.registers.get(&reg).copied().unwrap_or(0)
    }

    pub fn host_bytes(&self) -> Vec<u8> {
        let mut s = self.0.borrow_mut();
        s.flush();
        s.host_bytes.clone()
    }

    pub fn writes(&self) -> Vec<(u8, u16)> {
        let mut s = self.0.borrow_mut();
        s.flush();
        s.writes.clone()
    }

    pub fn writes_to(&self, reg: u8) -> usize {
        self.writes().iter().filter(|(r, _)| *r == reg).count()
    }

    pub fn reads(&self) -> Vec<u8> {
        self.0.borrow().reads.clone()
    }

    pub fn commits(&self) -> usize {
        let mut s = self.0.borrow_mut();
        s.flush();
        s.commits
    }

    /// Have the servo send `bytes` shortly from now, then keep holding the
    /// line low.
    pub fn inject_reply(&self, bytes: &[u8]) {
        self.0.borrow_mut().schedule(bytes, false);
    }

    pub fn inject_reply_with_bad_stop(&self, bytes: &[u8]) {
        self.0.borrow_mut().schedule(bytes, true);
    }
}

impl ServoLine for SimLine {
    fn drive_low(&mut self) {
        self.0.borrow_mut().drive(false);
    }

    fn drive_high(&mut self) {
        self.0.borrow_mut().drive(true);
    }

    fn release(&mut self) {
        let mut s = self.0.borrow_mut();
        s.driving = None;
        let now = s.now;
        match s.flush() {
            Some(reg) => s.respond(reg),
            None => s.reply = vec![(now, true)],
        }
    }

    fn is_high(&mut self) -> bool {
        let mut s = self.0.borrow_mut();
        let level = s.level();
        s.now += POLL_NS;
        level
    }
}

impl Timing for SimTiming {
    fn bit_delay(&mut self, ns: u32, stage: BitLoop) {
        assert!(guard_depth() > 0, "{:?} bit loop outside the timing guard", stage);
        // The receive loops each spend one poll outside the delay.
        let overhead = match stage {
            BitLoop::Transmit => 0,
            BitLoop::FirstSample | BitLoop::Sample => POLL_NS,
        };
        self.0.borrow_mut().now += (ns as u64).saturating_sub(overhead);
    }

    fn poll_budget(&self, us: u32) -> u32 {
        (us as u64 * 1_000 / POLL_NS) as u32
    }
}

impl DelayUs<u32> for SimTiming {
    fn delay_us(&mut self, us: u32) {
        assert_eq!(guard_depth(), 0, "{}us settle delay inside the timing guard", us);
        self.0.borrow_mut().now += us as u64 * 1_000;
    }
}
