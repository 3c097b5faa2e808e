pub mod calibration;
pub mod driver;
pub mod error;
pub mod line;
pub mod protocol;
pub mod settings;
pub mod transport;

#[cfg(test)]
pub mod sim;

pub use calibration::Calibration;
pub use driver::HitecDServo;
pub use error::{Error, Field, Result};
pub use line::{BitLoop, LoopOverhead, ServoLine, Timing};
pub use settings::{FailSafe, ServoConfig};
