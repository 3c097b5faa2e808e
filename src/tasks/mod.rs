pub mod servo;

pub use servo::{monitor_task, servo_task, Command as ServoCmd};
