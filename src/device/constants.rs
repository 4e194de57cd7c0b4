use std::time::Duration;
use uuid::Uuid;

/**
 * Advertised name of the Coyote box, used when no device uid is configured.
 */
pub const DEVICE_NAME: &str = "D-LAB ESTIM01";

/**
 * How long (milliseconds) to scan for peripherals before giving up.
 */
pub const SCAN_DEADLINE: u64 = 10_000;

/**
 * How often (milliseconds) to look at the peripherals found so far while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 500;

/**
 * How long (milliseconds) a single read or write on a characteristic may take.
 */
pub const IO_DEADLINE: u64 = 2000;

/**
 * Number of connection attempts made by the liveness probe after a failed read.
 */
pub const RECONNECT_RETRIES: u32 = 1;

/**
 * Minimum distance between two consecutive pattern frame writes on one channel.
 */
pub const FRAME_SPACING: Duration = Duration::from_millis(100);

/**
 * Sleep between iterations of the playback loop.
 */
pub const PLAYBACK_TICK: Duration = Duration::from_millis(10);

/**
 * How often the playback loop probes the link.
 */
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/**
 * Changes smaller than this (on both channels) are not sent to the device.
 */
pub const POWER_HYSTERESIS: i32 = 10;

/**
 * Power ceiling in safe mode: 768 out of 2047, roughly 37.5%.
 */
pub const SAFE_MAX_POWER: u16 = 768;

/**
 * Power ceiling of the hardware (11 bits).
 */
pub const MAX_POWER: u16 = 2047;

pub const MAX_PULSE_MS: u8 = 31;
pub const MAX_PAUSE_MS: u16 = 1023;
pub const MAX_AMPLITUDE: u8 = 31;

// Service 955a180a carries the battery level, 955a180b the output characteristics.
pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x955a180a_0fe2_f5aa_a094_84b8d4f3e8ad);
pub const PWM_SERVICE: Uuid = Uuid::from_u128(0x955a180b_0fe2_f5aa_a094_84b8d4f3e8ad);

pub const BATTERY_LEVEL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x955a1500_0fe2_f5aa_a094_84b8d4f3e8ad);

/**
 * Combined power of both channels (read/write, 3 bytes).
 */
pub const PWM_AB2_CHARACTERISTIC: Uuid = Uuid::from_u128(0x955a1504_0fe2_f5aa_a094_84b8d4f3e8ad);

/**
 * Pattern data labelled "A" by the vendor. On real hardware it drives output B.
 */
pub const PWM_A34_CHARACTERISTIC: Uuid = Uuid::from_u128(0x955a1505_0fe2_f5aa_a094_84b8d4f3e8ad);

/**
 * Pattern data labelled "B" by the vendor. On real hardware it drives output A.
 */
pub const PWM_B34_CHARACTERISTIC: Uuid = Uuid::from_u128(0x955a1506_0fe2_f5aa_a094_84b8d4f3e8ad);

pub const CONFIG_CHARACTERISTIC: Uuid = Uuid::from_u128(0x955a1507_0fe2_f5aa_a094_84b8d4f3e8ad);
