//! DShot frame encoding.
//!
//! An 11-bit value becomes a 16-bit frame (value, telemetry flag, 4-bit XOR checksum), and the frame
//! becomes 17 PWM compare values: one per bit plus a trailing zero-duty reset slot.

use crate::config::{
    DSHOT_BIT_0_DUTY, DSHOT_BIT_1_DUTY, DSHOT_PERIOD, DSHOT_SLOTS, DSHOT_THROTTLE_MAX,
    DSHOT_THROTTLE_MIN,
};

/// Compare value of a `1` bit. Integer truncation matches the timer's compare register.
pub const BIT_1_COMPARE: u32 = (DSHOT_PERIOD * DSHOT_BIT_1_DUTY) / 100;
/// Compare value of a `0` bit.
pub const BIT_0_COMPARE: u32 = (DSHOT_PERIOD * DSHOT_BIT_0_DUTY) / 100;

/// PWM compare values for one channel, ready for the timer DMA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DshotBuffer(pub [u32; DSHOT_SLOTS]);

impl DshotBuffer {
    /// Buffer for DShot value 0 (motor stop).
    pub fn stopped() -> Self {
        prepare_buffer(0)
    }

    pub fn slots(&self) -> &[u32] {
        &self.0
    }

    /// Recover the 16-bit frame from the compare values. `None` if a slot is not a valid bit or
    /// the reset slot is not zero.
    pub fn frame(&self) -> Option<u16> {
        if self.0[DSHOT_SLOTS - 1] != 0 {
            return None;
        }
        let mut frame = 0u16;
        for &slot in &self.0[..DSHOT_SLOTS - 1] {
            frame <<= 1;
            match slot {
                BIT_1_COMPARE => frame |= 1,
                BIT_0_COMPARE => {}
                _ => return None,
            }
        }
        Some(frame)
    }
}

/// XOR of the three nibbles of a 12-bit payload.
fn checksum(payload: u16) -> u16 {
    (payload ^ (payload >> 4) ^ (payload >> 8)) & 0x000f
}

/// Build the 16-bit frame for an 11-bit value.
pub fn dshot_frame(value: u16, telemetry: bool) -> u16 {
    let mut packet = (value & 0x07ff) << 1;
    if telemetry {
        packet |= 1;
    }
    (packet << 4) | checksum(packet)
}

/// Check a received frame's checksum against its payload.
pub fn frame_is_valid(frame: u16) -> bool {
    checksum(frame >> 4) == frame & 0x000f
}

/// 11-bit value carried by a frame.
pub fn frame_value(frame: u16) -> u16 {
    frame >> 5
}

/// Encode a value (telemetry flag cleared) into PWM compare values.
pub fn prepare_buffer(value: u16) -> DshotBuffer {
    let frame = dshot_frame(value, false);
    let mut slots = [0u32; DSHOT_SLOTS];
    for (i, slot) in slots.iter_mut().take(16).enumerate() {
        *slot = if frame & (1 << (15 - i)) != 0 {
            BIT_1_COMPARE
        } else {
            BIT_0_COMPARE
        };
    }
    DshotBuffer(slots)
}

/// Map a thrust value onto the DShot throttle range.
///
/// Zero (or anything not strictly positive) is motor stop; positive thrust is offset past the
/// command range 1..=47 so it can never be read as an ESC command.
///
/// Host thrust units are therefore not raw DShot throttle: thrust `t` goes out as `48 + t`, so
/// host thrust 300 becomes DShot 348.
pub fn thrust_to_dshot(thrust: f32) -> u16 {
    if thrust.is_nan() || thrust <= 0.0 {
        return 0;
    }
    let value = DSHOT_THROTTLE_MIN as f32 + thrust;
    if value >= DSHOT_THROTTLE_MAX as f32 {
        DSHOT_THROTTLE_MAX
    } else {
        value as u16
    }
}

/// ESC commands sent in place of a throttle value while the motors are stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum DshotCommand {
    MotorStop = 0,
    Beep1 = 1,
    Beep2 = 2,
    Beep3 = 3,
    Beep4 = 4,
    Beep5 = 5,
    SpinDirection1 = 7,
    SpinDirection2 = 8,
    SaveSettings = 12,
    SpinDirectionNormal = 20,
    SpinDirectionReversed = 21,
}

impl DshotCommand {
    /// Settings commands are only accepted after several identical frames.
    pub fn repeat_count(self) -> u8 {
        match self {
            Self::SpinDirection1
            | Self::SpinDirection2
            | Self::SaveSettings
            | Self::SpinDirectionNormal
            | Self::SpinDirectionReversed => 10,
            _ => 1,
        }
    }

    pub fn buffer(self) -> DshotBuffer {
        prepare_buffer(self as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_values_truncate() {
        assert_eq!(BIT_1_COMPARE, 220);
        // 275 * 40 / 100 = 110
        assert_eq!(BIT_0_COMPARE, 110);
    }

    #[test]
    fn known_frames() {
        assert_eq!(dshot_frame(0, false), 0x0000);
        // 48 -> payload 0x060, checksum 0x6
        assert_eq!(dshot_frame(48, false), 0x0606);
        assert_eq!(dshot_frame(1046, false), 0x82c6);
        assert_eq!(dshot_frame(2047, false), 0xffee);
    }

    #[test]
    fn value_is_masked_to_11_bits() {
        assert_eq!(dshot_frame(0x0800 | 5, false), dshot_frame(5, false));
    }

    #[test]
    fn every_value_round_trips_through_the_buffer() {
        for value in 0..=2047u16 {
            let frame = prepare_buffer(value).frame().unwrap();
            assert!(frame_is_valid(frame), "value {}", value);
            assert_eq!(frame_value(frame), value);
            assert_eq!(frame & 0x0010, 0, "telemetry bit set for {}", value);
        }
    }

    #[test]
    fn corrupted_bit_fails_checksum() {
        let frame = dshot_frame(1000, false);
        assert!(!frame_is_valid(frame ^ 0x0100));
    }

    #[test]
    fn reset_slot_is_zero() {
        let buf = prepare_buffer(1500);
        assert_eq!(buf.slots().len(), 17);
        assert_eq!(buf.slots()[16], 0);
    }

    #[test]
    fn thrust_never_maps_into_command_range() {
        assert_eq!(thrust_to_dshot(0.0), 0);
        assert_eq!(thrust_to_dshot(-3.0), 0);
        assert_eq!(thrust_to_dshot(f32::NAN), 0);
        assert_eq!(thrust_to_dshot(0.5), 48);
        assert_eq!(thrust_to_dshot(1.0), 49);
        assert_eq!(thrust_to_dshot(300.0), 348);
        assert_eq!(thrust_to_dshot(5000.0), 2047);
    }

    #[test]
    fn settings_commands_repeat() {
        assert_eq!(DshotCommand::Beep1.repeat_count(), 1);
        assert_eq!(DshotCommand::SpinDirectionReversed.repeat_count(), 10);
        assert_eq!(frame_value(DshotCommand::Beep3.buffer().frame().unwrap()), 3);
    }
}
