//! Pulse width <-> raw angle conversion through the servo's three
//! calibration points.
//!
//! The map is piecewise linear: one segment from 850us to 1500us and one from
//! 1500us to 2150us. Outside that window the nearest segment is extended.

use super::settings;

pub const QUARTER_MICROS_850: i32 = 850 * 4;
pub const QUARTER_MICROS_1500: i32 = 1500 * 4;
pub const QUARTER_MICROS_2150: i32 = 2150 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    raw_850: i32,
    raw_1500: i32,
    raw_2150: i32,
}

/// `num / den` rounded to nearest, ties toward +inf. `den` must be positive.
fn div_round(num: i64, den: i64) -> i64 {
    (num + den / 2).div_euclid(den)
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl Calibration {
    /// `None` unless the points strictly increase.
    pub fn new(raw_850: u16, raw_1500: u16, raw_2150: u16) -> Option<Self> {
        if raw_850 < raw_1500 && raw_1500 < raw_2150 {
            Some(Self {
                raw_850: raw_850 as i32,
                raw_1500: raw_1500 as i32,
                raw_2150: raw_2150 as i32,
            })
        } else {
            None
        }
    }

    /// Factory calibration of a known model.
    pub fn for_model(model: u16) -> Option<Self> {
        let m = settings::model_info(model)?;
        Self::new(m.raw_angle_for_850, m.raw_angle_for_1500, m.raw_angle_for_2150)
    }

    pub fn raw_angle_for_850(&self) -> u16 {
        self.raw_850 as u16
    }

    pub fn raw_angle_for_1500(&self) -> u16 {
        self.raw_1500 as u16
    }

    pub fn raw_angle_for_2150(&self) -> u16 {
        self.raw_2150 as u16
    }

    pub fn raw_angle_to_quarter_micros(&self, raw: u16) -> i32 {
        let (raw_850, raw_1500, raw_2150) = self.points();
        let offset = raw as i64 - raw_1500;
        let (q_850, q_1500, q_2150) = quarter_micros_points();
        let q = if offset < 0 {
            q_1500 + div_round(offset * (q_1500 - q_850), raw_1500 - raw_850)
        } else {
            q_1500 + div_round(offset * (q_2150 - q_1500), raw_2150 - raw_1500)
        };
        saturate(q)
    }

    /// May fall outside 0..=16383 for pulses far outside 850..=2150us.
    /// Saturates at the ends of `i32`.
    pub fn quarter_micros_to_raw_angle(&self, quarter_micros: i32) -> i32 {
        let (raw_850, raw_1500, raw_2150) = self.points();
        let (q_850, q_1500, q_2150) = quarter_micros_points();
        let offset = quarter_micros as i64 - q_1500;
        let raw = if offset < 0 {
            raw_1500 + div_round(offset * (raw_1500 - raw_850), q_1500 - q_850)
        } else {
            raw_1500 + div_round(offset * (raw_2150 - raw_1500), q_2150 - q_1500)
        };
        saturate(raw)
    }

    fn points(&self) -> (i64, i64, i64) {
        (self.raw_850 as i64, self.raw_1500 as i64, self.raw_2150 as i64)
    }
}

fn quarter_micros_points() -> (i64, i64, i64) {
    (
        QUARTER_MICROS_850 as i64,
        QUARTER_MICROS_1500 as i64,
        QUARTER_MICROS_2150 as i64,
    )
}

/// Whole microseconds, rounded.
pub fn quarter_micros_to_micros(quarter_micros: i32) -> i32 {
    saturate(div_round(quarter_micros as i64, 4))
}
