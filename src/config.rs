// Centralize all configuration constants

/* ───── Link timing ─────────────────────────────────────────────────── */
/// One bit at the 115200 baud equivalent the servo expects.
pub const BIT_PERIOD_NS: u32 = 8_680;
/// How long `receive_byte` waits for a start edge.
pub const START_EDGE_TIMEOUT_US: u32 = 4_000;

/* ───── Bus turnaround ──────────────────────────────────────────────── */
pub const REQUEST_SETTLE_US: u32 = 14_000;
pub const RELEASE_SETTLE_US: u32 = 1_000;
pub const NO_SERVO_BACKOFF_US: u32 = 2_000;

/* ───── EEPROM housekeeping ─────────────────────────────────────────── */
pub const FACTORY_RESET_SETTLE_US: u32 = 1_000_000;
pub const COMMIT_SETTLE_US: u32 = 1_000_000;

/* ───── Firmware ────────────────────────────────────────────────────── */
pub const CPU_HZ: u32 = 64_000_000;
pub const MONITOR_PERIOD_MS: u64 = 500;

// Channel sizes
pub const SERVO_CHANNEL_SIZE: usize = 4;
