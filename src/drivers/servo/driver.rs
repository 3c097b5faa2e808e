//! Hitec D-series servo facade
//! ===========================================================

use heapless::Vec;

use super::calibration::{self, Calibration, QUARTER_MICROS_2150, QUARTER_MICROS_850};
use super::error::{Error, Field, Result};
use super::line::{ServoLine, Timing};
use super::protocol as p;
use super::settings::{self, ServoConfig, RAW_ANGLE_MAX};
use crate::config::{COMMIT_SETTLE_US, FACTORY_RESET_SETTLE_US};

/* ------------------------------------------------------------------------- */
/*  Main driver struct                                                       */
/* ------------------------------------------------------------------------- */

/// One servo on one signal pin.
///
/// The pin is owned while attached. Model number and calibration are read on
/// attach and cached until detach; a config write drops the cached
/// calibration since it may have changed.
pub struct HitecDServo<P, T> {
    timing: T,
    line: Option<P>,
    model_number: Option<u16>,
    calibration: Option<Calibration>,
}

impl<P: ServoLine, T: Timing> HitecDServo<P, T> {
    pub fn new(timing: T) -> Self {
        Self {
            timing,
            line: None,
            model_number: None,
            calibration: None,
        }
    }

    /* ================= lifecycle ============================ */

    /// Take the pin, idle it low and identify the servo.
    ///
    /// An identification failure is returned but the pin stays attached, so
    /// the caller can fix the wiring and carry on; identity is re-read the
    /// next time it is needed. Attaching over an existing binding drops the
    /// old pin.
    pub fn attach(&mut self, mut pin: P) -> Result<()> {
        pin.drive_low();
        self.line = Some(pin);
        self.model_number = None;
        self.calibration = None;

        let model = self.read_model_number().map_err(|e| {
            warn!("attach: cannot identify servo: {}", e.remedy());
            e
        })?;
        match settings::model_info(model) {
            Some(m) => info!("attach: {} (model {})", m.name, model),
            None => warn!("attach: unknown model {}", model),
        }
        self.calibration()?;
        Ok(())
    }

    /// Hand the pin back. Cached identity goes with it.
    pub fn detach(&mut self) -> Option<P> {
        self.model_number = None;
        self.calibration = None;
        self.line.take()
    }

    pub fn is_attached(&self) -> bool {
        self.line.is_some()
    }

    /// Cached model number, if identification has succeeded.
    pub fn model_number(&self) -> Option<u16> {
        self.model_number
    }

    fn bus(&mut self) -> Result<(&mut P, &mut T)> {
        let line = self.line.as_mut().ok_or(Error::NotAttached)?;
        Ok((line, &mut self.timing))
    }

    /* ================= raw register access =================== */

    pub fn read_raw_register(&mut self, reg: u8) -> Result<u16> {
        let (line, timing) = self.bus()?;
        p::read_register(line, timing, reg)
    }

    /// Fire-and-forget. `Ok` means the frame went out; the servo never
    /// confirms, so read the register back if delivery matters.
    pub fn write_raw_register(&mut self, reg: u8, value: u16) -> Result<()> {
        let (line, timing) = self.bus()?;
        p::write_register(line, timing, reg, value);
        Ok(())
    }

    /// Every register in `SERVO_REGS` that answers, in table order. Failed
    /// reads are logged and skipped; collection stops when `out` is full.
    pub fn read_register_dump<const N: usize>(&mut self, out: &mut Vec<(u8, u16), N>) -> Result<()> {
        out.clear();
        let (line, timing) = self.bus()?;
        for param in p::SERVO_REGS {
            match p::read_register(&mut *line, &mut *timing, param.addr) {
                Ok(value) => {
                    debug!("{} ({:#x}) = {}", param.name, param.addr, value);
                    if out.push((param.addr, value)).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{} ({:#x}): {}", param.name, param.addr, e.remedy()),
            }
        }
        Ok(())
    }

    /* ================= identity =============================== */

    pub fn read_model_number(&mut self) -> Result<u16> {
        if let Some(model) = self.model_number {
            return Ok(model);
        }
        let model = self.read_raw_register(p::REG_MODEL_NUMBER)?;
        self.model_number = Some(model);
        Ok(model)
    }

    /// The servo's three calibration points, read once and cached.
    pub fn calibration(&mut self) -> Result<Calibration> {
        if let Some(cal) = self.calibration {
            return Ok(cal);
        }
        let raw_850 = self.read_raw_register(p::REG_RAW_ANGLE_FOR_850)?;
        let raw_1500 = self.read_raw_register(p::REG_RAW_ANGLE_FOR_1500)?;
        let raw_2150 = self.read_raw_register(p::REG_RAW_ANGLE_FOR_2150)?;
        let cal = Calibration::new(raw_850, raw_1500, raw_2150).ok_or_else(|| {
            warn!("calibration points out of order: {} {} {}", raw_850, raw_1500, raw_2150);
            Error::Corrupt
        })?;
        self.calibration = Some(cal);
        Ok(cal)
    }

    /* ================= position =============================== */

    pub fn write_target_microseconds(&mut self, micros: i32) -> Result<()> {
        self.write_target_quarter_micros(micros.saturating_mul(4))
    }

    /// Command a new position. Pulses outside 850..=2150us are refused. When
    /// the model and calibration are cached and the model is known, so is
    /// anything that maps past the safe travel limits.
    pub fn write_target_quarter_micros(&mut self, quarter_micros: i32) -> Result<()> {
        if !self.is_attached() {
            return Err(Error::NotAttached);
        }
        if !(QUARTER_MICROS_850..=QUARTER_MICROS_2150).contains(&quarter_micros) {
            return Err(Error::Validation(Field::TargetPulse));
        }

        // Only identity that is already cached is consulted: a write needs no
        // pull-up, so a read fault must not stop the frame going out.
        if let (Some(model), Some(cal)) = (self.model_number, self.calibration) {
            if let (Some(min), Some(max)) = (
                settings::min_safe_raw_angle(model),
                settings::max_safe_raw_angle(model),
            ) {
                let raw = cal.quarter_micros_to_raw_angle(quarter_micros);
                if raw < min as i32 || raw > max as i32 {
                    warn!("target {} qus lands on raw {}, outside {}..={}", quarter_micros, raw, min, max);
                    return Err(Error::Validation(Field::TargetPulse));
                }
            }
        }

        self.write_raw_register(p::REG_TARGET_QUARTER_MICROS, quarter_micros as u16)
    }

    pub fn read_current_raw_angle(&mut self) -> Result<u16> {
        let raw = self.read_raw_register(p::REG_CURRENT_RAW_ANGLE)?;
        if raw > RAW_ANGLE_MAX {
            return Err(Error::Corrupt);
        }
        Ok(raw)
    }

    pub fn read_current_quarter_micros(&mut self) -> Result<i32> {
        let raw = self.read_current_raw_angle()?;
        Ok(self.calibration()?.raw_angle_to_quarter_micros(raw))
    }

    pub fn read_current_microseconds(&mut self) -> Result<i32> {
        self.read_current_quarter_micros()
            .map(calibration::quarter_micros_to_micros)
    }

    /* ================= configuration ========================== */

    pub fn read_config(&mut self) -> Result<ServoConfig> {
        let (line, timing) = self.bus()?;
        ServoConfig::decode(|reg| p::read_register(&mut *line, &mut *timing, reg))
    }

    /// Factory-reset the servo, apply `config` and commit it to EEPROM.
    ///
    /// Takes a little over two seconds. Fails `UnsupportedModel` on servos
    /// without a model table.
    pub fn write_config(&mut self, config: &ServoConfig) -> Result<()> {
        self.write_config_unknown_model_this_might_damage_the_servo(config, false)
    }

    /// `write_config` with the model check optionally skipped. Register
    /// layouts differ between models, so a bypassed write can leave an
    /// unknown servo in an unusable state.
    pub fn write_config_unknown_model_this_might_damage_the_servo(
        &mut self,
        config: &ServoConfig,
        bypass_model_check: bool,
    ) -> Result<()> {
        if !self.is_attached() {
            return Err(Error::NotAttached);
        }
        let writes = config.encode()?;

        let model = if bypass_model_check {
            self.model_number
        } else {
            let model = self.read_model_number()?;
            if !settings::is_supported_model(model) {
                warn!("refusing config write to unknown model {}", model);
                return Err(Error::UnsupportedModel);
            }
            Some(model)
        };
        // points left as `None` come back at their factory value
        config.check_calibration_for(model)?;

        let (line, timing) = self.bus()?;
        info!("config write: factory reset");
        p::write_register(&mut *line, &mut *timing, p::REG_FACTORY_RESET, p::FACTORY_RESET_MAGIC);
        timing.delay_us(FACTORY_RESET_SETTLE_US);

        for &(reg, value) in writes.iter() {
            p::write_register(&mut *line, &mut *timing, reg, value);
        }

        p::write_register(&mut *line, &mut *timing, p::REG_SAVE_UNLOCK, p::SAVE_UNLOCK_MAGIC);
        p::write_register(&mut *line, &mut *timing, p::REG_SAVE_COMMIT, p::SAVE_COMMIT_MAGIC);
        timing.delay_us(COMMIT_SETTLE_US);
        info!("config write: {} registers committed", writes.len());

        self.calibration = None;
        Ok(())
    }
}
