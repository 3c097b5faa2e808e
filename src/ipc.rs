use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex as RawMutex, channel::Channel};

use crate::config::SERVO_CHANNEL_SIZE;
use crate::drivers::servo::{Error, ServoConfig};
use crate::tasks::servo::{Command as ServoCmd, RegisterDump};

/* Servo command channel */
pub static SERVO_CH: Channel<RawMutex, ServoCmd, SERVO_CHANNEL_SIZE> = Channel::new();

/* One-slot reply channels, one per reply type */
pub static SERVO_REPLY_CH: Channel<RawMutex, Result<(), Error>, 1> = Channel::new();
pub static MODEL_REPLY_CH: Channel<RawMutex, Result<u16, Error>, 1> = Channel::new();
pub static POSITION_REPLY_CH: Channel<RawMutex, Result<i32, Error>, 1> = Channel::new();
pub static CONFIG_REPLY_CH: Channel<RawMutex, Result<ServoConfig, Error>, 1> = Channel::new();
pub static DUMP_REPLY_CH: Channel<RawMutex, Result<RegisterDump, Error>, 1> = Channel::new();
