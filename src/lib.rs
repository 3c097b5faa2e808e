#![cfg_attr(not(test), no_std)]

// must come first so the logging macros are visible to every module below
#[macro_use]
mod fmt;

pub mod config;
pub mod drivers;

#[cfg(feature = "firmware")]
pub mod board;
#[cfg(feature = "firmware")]
pub mod ipc;
#[cfg(feature = "firmware")]
pub mod tasks;

#[cfg(feature = "firmware")]
pub use board::Board;
pub use drivers::servo::{Error, FailSafe, HitecDServo, ServoConfig};
