pub mod servo;

pub use servo::HitecDServo;
