//! Compile-time configuration of the flight core.

use embassy_time::Duration;

// ── Wire protocol ─────────────────────────────────────────────────────────────

/// First byte of every frame.
pub const START_BYTE: u8 = 0xAA;
/// Size of the payload area. Frames always carry the full area, slack is zero-filled.
pub const MAX_PAYLOAD: usize = 100;
/// start + type + length
pub const HEADER_LEN: usize = 3;
/// Constant on-wire frame size: header + payload area + checksum.
pub const FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD + 1;

/// Depth of the outgoing frame queue.
pub const TX_QUEUE_DEPTH: usize = 10;
/// Size of the interrupt-fed receive ring.
pub const RX_RING_SIZE: usize = 512;

// ── Supervisor timing ─────────────────────────────────────────────────────────

/// Period of the supervisor loop (40 Hz).
pub const CONTROL_PERIOD: Duration = Duration::from_millis(25);
/// Consecutive armed periods required before motors may be driven (160 × 25 ms = 4 s).
pub const ARM_CONFIRMATIONS: u16 = 160;
/// One telemetry sample every N running periods.
pub const SAMPLE_DIVIDER: u16 = 10;

// ── Motors ────────────────────────────────────────────────────────────────────

pub const MOTOR_COUNT: usize = 4;
/// Upper bound applied to every thrust write.
pub const THRUST_LIMIT: f32 = 300.0;

// ── DShot ─────────────────────────────────────────────────────────────────────

/// Timer period of one DShot bit slot, in timer ticks.
pub const DSHOT_PERIOD: u32 = 275;
/// Duty cycle of a `1` bit, percent.
pub const DSHOT_BIT_1_DUTY: u32 = 80;
/// Duty cycle of a `0` bit, percent.
pub const DSHOT_BIT_0_DUTY: u32 = 40;
/// 16 data slots + 1 reset slot.
pub const DSHOT_SLOTS: usize = 17;
/// Lowest DShot value that is a throttle rather than a command.
pub const DSHOT_THROTTLE_MIN: u16 = 48;
pub const DSHOT_THROTTLE_MAX: u16 = 2047;

// ── Magnetometer calibration ──────────────────────────────────────────────────

pub const MAG_CALIBRATION_SAMPLES: u16 = 500;
pub const MAG_CALIBRATION_DELAY_MS: u16 = 20;
