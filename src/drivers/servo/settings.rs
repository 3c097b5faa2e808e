//! Semantic servo configuration and its register encoding.
//!
//! Nothing in here touches the wire. `ServoConfig::encode` turns a record into
//! the ordered list of register writes, `ServoConfig::decode` rebuilds one from
//! a register reader, and the model table answers the per-model questions
//! (factory calibration, safe travel).

use heapless::Vec;

use super::calibration::Calibration;
use super::error::{Error, Field};
use super::protocol as p;

pub const RAW_ANGLE_MAX: u16 = 16383;
pub const ID_MAX: u8 = 254;
pub const SENSITIVITY_RATIO_MIN: u16 = 819;
pub const SENSITIVITY_RATIO_MAX: u16 = 4095;
pub const FAIL_SAFE_MIN_US: u16 = 850;
pub const FAIL_SAFE_MAX_US: u16 = 2150;

/// Upper bound on the register writes one record turns into.
pub const MAX_CONFIG_WRITES: usize = 16;

/* ────────────────── Enumerated codes ──────────── */
// (setting value, register value)
const SPEED_CODES: &[(u8, u16)] = &[
    (10, 1),
    (20, 2),
    (30, 3),
    (40, 4),
    (50, 5),
    (60, 6),
    (70, 7),
    (80, 8),
    (90, 9),
    (100, 10),
];
const SOFT_START_CODES: &[(u8, u16)] = &[(20, 1), (40, 2), (60, 3), (80, 4), (100, 5)];
// 100 means "never back off"
const OVERLOAD_PROTECTION_CODES: &[(u8, u16)] =
    &[(100, 0), (10, 1), (20, 2), (30, 3), (40, 4), (50, 5)];

fn encode_code(table: &[(u8, u16)], value: u8, field: Field) -> Result<u16, Error> {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|&(_, raw)| raw)
        .ok_or(Error::Validation(field))
}

fn decode_code(table: &[(u8, u16)], raw: u16) -> Result<u8, Error> {
    table
        .iter()
        .find(|(_, r)| *r == raw)
        .map(|&(v, _)| v)
        .ok_or(Error::Corrupt)
}

fn decode_bool(raw: u16) -> Result<bool, Error> {
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Corrupt),
    }
}

/* ────────────────── Model table ───────────────── */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub number: u16,
    pub name: &'static str,
    pub raw_angle_for_850: u16,
    pub raw_angle_for_1500: u16,
    pub raw_angle_for_2150: u16,
    /// Conservative travel limits short of the mechanical stops.
    pub min_safe_raw_angle: u16,
    pub max_safe_raw_angle: u16,
}

pub const MODELS: &[ModelInfo] = &[ModelInfo {
    number: 485,
    name: "D485HW",
    raw_angle_for_850: 3381,
    raw_angle_for_1500: 8192,
    raw_angle_for_2150: 13003,
    min_safe_raw_angle: 1697,
    max_safe_raw_angle: 14686,
}];

pub fn model_info(model: u16) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.number == model)
}

pub fn is_supported_model(model: u16) -> bool {
    model_info(model).is_some()
}

pub fn default_raw_angle_for_850(model: u16) -> Option<u16> {
    model_info(model).map(|m| m.raw_angle_for_850)
}

pub fn default_raw_angle_for_1500(model: u16) -> Option<u16> {
    model_info(model).map(|m| m.raw_angle_for_1500)
}

pub fn default_raw_angle_for_2150(model: u16) -> Option<u16> {
    model_info(model).map(|m| m.raw_angle_for_2150)
}

pub fn min_safe_raw_angle(model: u16) -> Option<u16> {
    model_info(model).map(|m| m.min_safe_raw_angle)
}

pub fn max_safe_raw_angle(model: u16) -> Option<u16> {
    model_info(model).map(|m| m.max_safe_raw_angle)
}

/* ────────────────── Config record ─────────────── */

/// What the servo does when its input signal disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailSafe {
    /// Keep holding the last commanded position.
    Hold,
    /// Stop driving the motor.
    Limp,
    /// Move to this pulse width, in microseconds.
    Pulse(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServoConfig {
    /// Free-form tag, 0..=254. No effect on behavior.
    pub id: u8,
    /// Increasing pulse widths turn the horn counterclockwise.
    pub counterclockwise: bool,
    /// Percent of full speed: 10, 20, ..., 100.
    pub speed: u8,
    /// 1 (most precise) ..= 10 (least jitter).
    pub deadband: u8,
    /// Power-on ramp: 20, 40, 60, 80 or 100 (no ramp).
    pub soft_start: u8,
    /// Calibration points. `None` keeps whatever the servo has after its
    /// factory reset. Raw angles always increase from 850 to 2150, whichever
    /// way the servo turns.
    pub raw_angle_for_850: Option<u16>,
    pub raw_angle_for_1500: Option<u16>,
    pub raw_angle_for_2150: Option<u16>,
    pub fail_safe: FailSafe,
    /// Power reduction under stall, in percent: 10..=50 in steps of 10, or
    /// 100 for none.
    pub overload_protection: u8,
    pub smart_sense: bool,
    /// 819..=4095. Ignored by the servo while `smart_sense` is on.
    pub sensitivity_ratio: u16,
}

impl Default for ServoConfig {
    /// Factory settings, with the calibration left alone.
    fn default() -> Self {
        Self {
            id: 0,
            counterclockwise: false,
            speed: 100,
            deadband: 1,
            soft_start: 20,
            raw_angle_for_850: None,
            raw_angle_for_1500: None,
            raw_angle_for_2150: None,
            fail_safe: FailSafe::Hold,
            overload_protection: 100,
            smart_sense: true,
            sensitivity_ratio: 4095,
        }
    }
}

impl ServoConfig {
    pub fn validate(&self) -> Result<(), Error> {
        self.encode().map(|_| ())
    }

    /// Register writes for this record, in the order they go out. Fields left
    /// as `None` produce no write at all.
    pub fn encode(&self) -> Result<Vec<(u8, u16), MAX_CONFIG_WRITES>, Error> {
        if self.id > ID_MAX {
            return Err(Error::Validation(Field::Id));
        }
        let speed = encode_code(SPEED_CODES, self.speed, Field::Speed)?;
        if !(1..=10).contains(&self.deadband) {
            return Err(Error::Validation(Field::Deadband));
        }
        let soft_start = encode_code(SOFT_START_CODES, self.soft_start, Field::SoftStart)?;
        self.check_raw_angles()?;
        let (limp, fail_safe) = match self.fail_safe {
            FailSafe::Hold => (0, 0),
            FailSafe::Limp => (1, 0),
            FailSafe::Pulse(us) if (FAIL_SAFE_MIN_US..=FAIL_SAFE_MAX_US).contains(&us) => (0, us),
            FailSafe::Pulse(_) => return Err(Error::Validation(Field::FailSafe)),
        };
        let overload = encode_code(
            OVERLOAD_PROTECTION_CODES,
            self.overload_protection,
            Field::OverloadProtection,
        )?;
        if !(SENSITIVITY_RATIO_MIN..=SENSITIVITY_RATIO_MAX).contains(&self.sensitivity_ratio) {
            return Err(Error::Validation(Field::SensitivityRatio));
        }

        let mut writes = Vec::new();
        let mut push = |reg: u8, value: u16| {
            // capacity covers every field
            let _ = writes.push((reg, value));
        };
        push(p::REG_ID, self.id as u16);
        push(p::REG_DIRECTION, self.counterclockwise as u16);
        push(p::REG_SPEED, speed);
        push(p::REG_DEADBAND, self.deadband as u16);
        push(p::REG_SOFT_START, soft_start);
        if let Some(raw) = self.raw_angle_for_850 {
            push(p::REG_RAW_ANGLE_FOR_850, raw);
        }
        if let Some(raw) = self.raw_angle_for_1500 {
            push(p::REG_RAW_ANGLE_FOR_1500, raw);
        }
        if let Some(raw) = self.raw_angle_for_2150 {
            push(p::REG_RAW_ANGLE_FOR_2150, raw);
        }
        push(p::REG_FAIL_SAFE_LIMP, limp);
        push(p::REG_FAIL_SAFE, fail_safe);
        push(p::REG_OVERLOAD_PROTECTION, overload);
        push(p::REG_SMART_SENSE, self.smart_sense as u16);
        push(p::REG_SENSITIVITY_RATIO, self.sensitivity_ratio);
        Ok(writes)
    }

    fn check_raw_angles(&self) -> Result<(), Error> {
        let points = [
            (self.raw_angle_for_850, Field::RawAngleFor850),
            (self.raw_angle_for_1500, Field::RawAngleFor1500),
            (self.raw_angle_for_2150, Field::RawAngleFor2150),
        ];
        let mut previous: Option<u16> = None;
        for (raw, field) in points {
            let Some(raw) = raw else { continue };
            if raw > RAW_ANGLE_MAX {
                return Err(Error::Validation(field));
            }
            if previous.is_some_and(|prev| prev >= raw) {
                return Err(Error::Validation(field));
            }
            previous = Some(raw);
        }
        Ok(())
    }

    /// Check the calibration the servo ends up with once this record lands
    /// on top of a factory reset. Points left as `None` take `model`'s
    /// factory value, so a partial triple needs a known model.
    pub fn check_calibration_for(&self, model: Option<u16>) -> Result<(), Error> {
        let supplied = [self.raw_angle_for_850, self.raw_angle_for_1500, self.raw_angle_for_2150];
        if supplied.iter().all(Option::is_none) {
            return Ok(());
        }

        let fill = |value: Option<u16>, default: fn(u16) -> Option<u16>, field: Field| {
            value
                .or_else(|| model.and_then(default))
                .ok_or(Error::Validation(field))
        };
        let raw_850 = fill(self.raw_angle_for_850, default_raw_angle_for_850, Field::RawAngleFor850)?;
        let raw_1500 = fill(self.raw_angle_for_1500, default_raw_angle_for_1500, Field::RawAngleFor1500)?;
        let raw_2150 = fill(self.raw_angle_for_2150, default_raw_angle_for_2150, Field::RawAngleFor2150)?;

        // blame the point the caller chose, not the factory one
        if raw_850 >= raw_1500 {
            return Err(Error::Validation(match self.raw_angle_for_1500 {
                Some(_) => Field::RawAngleFor1500,
                None => Field::RawAngleFor850,
            }));
        }
        if raw_1500 >= raw_2150 {
            return Err(Error::Validation(match self.raw_angle_for_2150 {
                Some(_) => Field::RawAngleFor2150,
                None => Field::RawAngleFor1500,
            }));
        }
        Ok(())
    }

    /// Rebuild a record from the servo, one register read per setting. The
    /// first read error is returned as-is; a value outside a setting's legal
    /// set is `Corrupt`.
    pub fn decode<F>(mut read: F) -> Result<Self, Error>
    where
        F: FnMut(u8) -> Result<u16, Error>,
    {
        let id = read(p::REG_ID)?;
        if id > ID_MAX as u16 {
            return Err(Error::Corrupt);
        }
        let counterclockwise = decode_bool(read(p::REG_DIRECTION)?)?;
        let speed = decode_code(SPEED_CODES, read(p::REG_SPEED)?)?;
        let deadband = read(p::REG_DEADBAND)?;
        if !(1..=10).contains(&deadband) {
            return Err(Error::Corrupt);
        }
        let soft_start = decode_code(SOFT_START_CODES, read(p::REG_SOFT_START)?)?;

        let mut raw_angle = |reg: u8| -> Result<Option<u16>, Error> {
            let raw = read(reg)?;
            if raw > RAW_ANGLE_MAX {
                return Err(Error::Corrupt);
            }
            Ok(Some(raw))
        };
        let raw_angle_for_850 = raw_angle(p::REG_RAW_ANGLE_FOR_850)?;
        let raw_angle_for_1500 = raw_angle(p::REG_RAW_ANGLE_FOR_1500)?;
        let raw_angle_for_2150 = raw_angle(p::REG_RAW_ANGLE_FOR_2150)?;
        if let (Some(a), Some(b), Some(c)) = (raw_angle_for_850, raw_angle_for_1500, raw_angle_for_2150) {
            if Calibration::new(a, b, c).is_none() {
                return Err(Error::Corrupt);
            }
        }

        let limp = decode_bool(read(p::REG_FAIL_SAFE_LIMP)?)?;
        let pulse = read(p::REG_FAIL_SAFE)?;
        let fail_safe = match (limp, pulse) {
            (true, _) => FailSafe::Limp,
            (false, 0) => FailSafe::Hold,
            (false, us) if (FAIL_SAFE_MIN_US..=FAIL_SAFE_MAX_US).contains(&us) => FailSafe::Pulse(us),
            (false, _) => return Err(Error::Corrupt),
        };

        let overload_protection =
            decode_code(OVERLOAD_PROTECTION_CODES, read(p::REG_OVERLOAD_PROTECTION)?)?;
        let smart_sense = decode_bool(read(p::REG_SMART_SENSE)?)?;
        let sensitivity_ratio = read(p::REG_SENSITIVITY_RATIO)?;
        if !(SENSITIVITY_RATIO_MIN..=SENSITIVITY_RATIO_MAX).contains(&sensitivity_ratio) {
            return Err(Error::Corrupt);
        }

        Ok(Self {
            id: id as u8,
            counterclockwise,
            speed,
            deadband: deadband as u8,
            soft_start,
            raw_angle_for_850,
            raw_angle_for_1500,
            raw_angle_for_2150,
            fail_safe,
            overload_protection,
            smart_sense,
            sensitivity_ratio,
        })
    }
}
