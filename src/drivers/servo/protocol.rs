// Hitec D-series register protocol: constants, register map, framing and the
// bus-turnaround read sequence.

use super::error::Error;
use super::line::{ServoLine, Timing};
use super::transport::{BitBang, RxFault};
use crate::config::{NO_SERVO_BACKOFF_US, RELEASE_SETTLE_US, REQUEST_SETTLE_US};

/* ───── Packet anatomy ──────────────────────────────────────────────── */
pub const REQUEST_HEADER: u8 = 0x96;
pub const RESPONSE_HEADER: u8 = 0x69;
/// Second request byte. The protocol only ever addresses one servo per wire.
pub const DEVICE_BYTE: u8 = 0x00;
/// Length marker for frames that carry a 16-bit value.
pub const VALUE_LEN: u8 = 0x02;
pub const READ_LEN: u8 = 0x00;

pub const WRITE_FRAME_LEN: usize = 7;
pub const READ_REQUEST_LEN: usize = 5;
pub const RESPONSE_LEN: usize = 7;

/// Indexes within a response frame
pub mod idx {
    pub const HEADER: usize = 0;
    pub const MYSTERY: usize = 1;
    pub const REGISTER: usize = 2;
    pub const LENGTH: usize = 3;
    pub const VALUE_LO: usize = 4;
    pub const VALUE_HI: usize = 5;
    pub const CHECKSUM: usize = 6;
}

/* ────────────────── Register addresses ────────── */
pub const REG_MODEL_NUMBER: u8 = 0x00;
pub const REG_CURRENT_RAW_ANGLE: u8 = 0x0C;
pub const REG_TARGET_QUARTER_MICROS: u8 = 0x1E;
pub const REG_ID: u8 = 0x32;
pub const REG_SAVE_COMMIT: u8 = 0x46;
pub const REG_FAIL_SAFE_LIMP: u8 = 0x4A;
pub const REG_FAIL_SAFE: u8 = 0x4C;
pub const REG_DEADBAND: u8 = 0x4E;
pub const REG_SPEED: u8 = 0x54;
pub const REG_DIRECTION: u8 = 0x5E;
pub const REG_SOFT_START: u8 = 0x60;
pub const REG_SENSITIVITY_RATIO: u8 = 0x64;
pub const REG_SMART_SENSE: u8 = 0x6C;
pub const REG_FACTORY_RESET: u8 = 0x6E;
pub const REG_SAVE_UNLOCK: u8 = 0x70;
pub const REG_OVERLOAD_PROTECTION: u8 = 0x9C;
pub const REG_RAW_ANGLE_FOR_2150: u8 = 0xB0;
pub const REG_RAW_ANGLE_FOR_850: u8 = 0xB2;
pub const REG_RAW_ANGLE_FOR_1500: u8 = 0xC2;

/* ────────────────── Magic values ──────────────── */
pub const FACTORY_RESET_MAGIC: u16 = 0x0F0F;
pub const SAVE_UNLOCK_MAGIC: u16 = 0xFFFF;
pub const SAVE_COMMIT_MAGIC: u16 = 0x0001;

/* ────────────────── Parameter table ───────────── */
pub struct Parameter {
    pub name: &'static str,
    pub addr: u8,
}

/// Every register with a known meaning, in address order.
pub const SERVO_REGS: &[Parameter] = &[
    Parameter { name: "Model Number", addr: REG_MODEL_NUMBER },
    Parameter { name: "Current Raw Angle", addr: REG_CURRENT_RAW_ANGLE },
    Parameter { name: "Target Quarter-Micros", addr: REG_TARGET_QUARTER_MICROS },
    Parameter { name: "ID", addr: REG_ID },
    Parameter { name: "Fail Safe Limp", addr: REG_FAIL_SAFE_LIMP },
    Parameter { name: "Fail Safe", addr: REG_FAIL_SAFE },
    Parameter { name: "Deadband", addr: REG_DEADBAND },
    Parameter { name: "Speed", addr: REG_SPEED },
    Parameter { name: "Direction", addr: REG_DIRECTION },
    Parameter { name: "Soft Start", addr: REG_SOFT_START },
    Parameter { name: "Sensitivity Ratio", addr: REG_SENSITIVITY_RATIO },
    Parameter { name: "Smart Sense", addr: REG_SMART_SENSE },
    Parameter { name: "Overload Protection", addr: REG_OVERLOAD_PROTECTION },
    Parameter { name: "Raw Angle 2150us", addr: REG_RAW_ANGLE_FOR_2150 },
    Parameter { name: "Raw Angle 850us", addr: REG_RAW_ANGLE_FOR_850 },
    Parameter { name: "Raw Angle 1500us", addr: REG_RAW_ANGLE_FOR_1500 },
];

/* ------------------------------------------------------------------------- */
/*  Framing                                                                  */
/* ------------------------------------------------------------------------- */

/// Low 8 bits of the byte sum.
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |a, &b| a.wrapping_add(b))
}

pub fn write_frame(reg: u8, value: u16) -> [u8; WRITE_FRAME_LEN] {
    let [lo, hi] = value.to_le_bytes();
    let mut frame = [REQUEST_HEADER, DEVICE_BYTE, reg, VALUE_LEN, lo, hi, 0];
    frame[6] = checksum(&frame[1..6]);
    frame
}

pub fn read_request(reg: u8) -> [u8; READ_REQUEST_LEN] {
    let mut frame = [REQUEST_HEADER, DEVICE_BYTE, reg, READ_LEN, 0];
    frame[4] = checksum(&frame[1..4]);
    frame
}

/// Validate the seven response slots for a read of `reg`.
///
/// The byte after the header has no known meaning; it only has to have
/// arrived intact.
pub fn parse_response(reg: u8, raw: &[Result<u8, RxFault>; RESPONSE_LEN]) -> Result<u16, Error> {
    let mut frame = [0u8; RESPONSE_LEN];
    for (dst, src) in frame.iter_mut().zip(raw.iter()) {
        *dst = src.map_err(|_| Error::Corrupt)?;
    }

    if frame[idx::HEADER] != RESPONSE_HEADER
        || frame[idx::REGISTER] != reg
        || frame[idx::LENGTH] != VALUE_LEN
    {
        return Err(Error::Corrupt);
    }
    if frame[idx::CHECKSUM] != checksum(&frame[idx::MYSTERY..idx::CHECKSUM]) {
        return Err(Error::Corrupt);
    }

    Ok(u16::from_le_bytes([frame[idx::VALUE_LO], frame[idx::VALUE_HI]]))
}

/* ------------------------------------------------------------------------- */
/*  Register access                                                          */
/* ------------------------------------------------------------------------- */

/// Send a write frame. The servo never acknowledges writes, so there is
/// nothing to report back; read the register if you need to know.
pub fn write_register<P: ServoLine, T: Timing>(line: &mut P, timing: &mut T, reg: u8, value: u16) {
    let frame = write_frame(reg, value);
    trace!("write reg {:#x} = {:#x}", reg, value);
    critical_section::with(|_| BitBang::new(&mut *line, &mut *timing).transmit(&frame));
}

pub fn read_register<P: ServoLine, T: Timing>(
    line: &mut P,
    timing: &mut T,
    reg: u8,
) -> Result<u16, Error> {
    let request = read_request(reg);
    critical_section::with(|_| BitBang::new(&mut *line, &mut *timing).transmit(&request));
    line.drive_low();

    timing.delay_us(REQUEST_SETTLE_US);
    line.release();

    // A present servo is already holding the line low.
    if line.is_high() {
        timing.delay_us(NO_SERVO_BACKOFF_US);
        line.drive_low();
        warn!("read reg {:#x}: line floated high, no servo", reg);
        return Err(Error::NoServo);
    }

    let mut raw = [Err(RxFault::Timeout); RESPONSE_LEN];
    critical_section::with(|_| {
        let mut bus = BitBang::new(&mut *line, &mut *timing);
        for slot in raw.iter_mut() {
            *slot = bus.receive_byte();
        }
    });

    timing.delay_us(RELEASE_SETTLE_US);
    let floated = line.is_high();
    line.drive_low();
    if !floated {
        warn!("read reg {:#x}: line held low after response, pull-up missing", reg);
        return Err(Error::NoResistor);
    }

    match parse_response(reg, &raw) {
        Ok(value) => {
            trace!("read reg {:#x} -> {:#x}", reg, value);
            Ok(value)
        }
        Err(e) => {
            warn!("read reg {:#x}: corrupt response", reg);
            Err(e)
        }
    }
}
