//! Shared state types for the flight core.
//!
//! Everything crossing an execution-context boundary is either an atomic or a `Copy` value held in
//! a [`Shared`] cell, so readers always get a complete snapshot.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::MOTOR_COUNT;

// ── Shared cell ───────────────────────────────────────────────────────────────

/// Copy-in/copy-out cell guarded by a critical section.
///
/// Accesses never wait: the whole value is copied in or out with interrupts masked.
pub struct Shared<T: Copy> {
    inner: Mutex<CriticalSectionRawMutex, Cell<T>>,
}

impl<T: Copy> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    pub fn get(&self) -> T {
        self.inner.lock(|cell| cell.get())
    }

    pub fn set(&self, value: T) {
        self.inner.lock(|cell| cell.set(value));
    }

    /// Read-modify-write in a single critical section.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.lock(|cell| {
            let mut value = cell.get();
            f(&mut value);
            cell.set(value);
        });
    }
}

// ── Data types ────────────────────────────────────────────────────────────────

/// Attitude snapshot from the estimator. Angles in degrees, rates in degrees per second.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttitudeEstimate {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll_rate: f32,
    pub pitch_rate: f32,
    pub yaw_rate: f32,
}

impl AttitudeEstimate {
    pub const ZERO: Self = Self {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        roll_rate: 0.0,
        pitch_rate: 0.0,
        yaw_rate: 0.0,
    };
}

/// Desired attitude, degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttitudeSetpoint {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };
}

/// Raw sensor sample as delivered by the sensor collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSample {
    /// g
    pub acc: Vec3,
    /// deg/s
    pub gyr: Vec3,
    /// normalised field
    pub mag: Vec3,
}

impl SensorSample {
    pub const ZERO: Self = Self {
        acc: Vec3::ZERO,
        gyr: Vec3::ZERO,
        mag: Vec3::ZERO,
    };
}

/// Per-motor thrust, motor order 1..4 (front-left, front-right, rear-right, rear-left).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThrustCommand(pub [f32; MOTOR_COUNT]);

impl ThrustCommand {
    pub const ZERO: Self = Self([0.0; MOTOR_COUNT]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FirmwareState {
    Unarmed = 0,
    Running = 1,
    Error = 2,
}

impl FirmwareState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unarmed,
            1 => Self::Running,
            _ => Self::Error,
        }
    }
}

/// Whether the control law drives the motors while running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlMode {
    /// Thrust and per-motor overrides pass straight to the motors.
    Direct = 0,
    /// Attitude controller and mixer drive the motors.
    Attitude = 1,
}

impl TryFrom<u8> for ControlMode {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        match raw {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Attitude),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmError {
    /// The supervisor is latched in ERROR; only an external reset clears it.
    FirmwareError,
}

impl core::fmt::Display for ArmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::FirmwareError => f.write_str("firmware in error state"),
        }
    }
}

// ── Flight state shared between link, supervisor and sensors ──────────────────

/// Host-controlled flight inputs plus the published firmware state.
pub struct FlightState {
    armed: AtomicBool,
    firmware_state: AtomicU8,
    control_mode: AtomicU8,
    special_command: AtomicU16,
    setpoint: Shared<AttitudeSetpoint>,
    /// Base throttle fraction, 0..=1.
    throttle: Shared<f32>,
}

impl FlightState {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            firmware_state: AtomicU8::new(FirmwareState::Unarmed as u8),
            control_mode: AtomicU8::new(ControlMode::Attitude as u8),
            special_command: AtomicU16::new(0),
            setpoint: Shared::new(AttitudeSetpoint {
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
            }),
            throttle: Shared::new(0.0),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Request arming. Refused while the firmware is latched in ERROR.
    pub fn arm(&self) -> Result<(), ArmError> {
        critical_section::with(|_| {
            if self.firmware_state() == FirmwareState::Error {
                return Err(ArmError::FirmwareError);
            }
            self.armed.store(true, Ordering::Release);
            Ok(())
        })
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn firmware_state(&self) -> FirmwareState {
        FirmwareState::from_u8(self.firmware_state.load(Ordering::Acquire))
    }

    /// Publish a supervisor transition. Entering ERROR clears the arm flag in the same critical
    /// section as the state change.
    pub(crate) fn set_firmware_state(&self, state: FirmwareState) {
        critical_section::with(|_| {
            if state == FirmwareState::Error {
                self.armed.store(false, Ordering::Release);
            }
            self.firmware_state.store(state as u8, Ordering::Release);
        });
    }

    pub fn control_mode(&self) -> ControlMode {
        ControlMode::try_from(self.control_mode.load(Ordering::Relaxed))
            .unwrap_or(ControlMode::Attitude)
    }

    pub fn set_control_mode(&self, mode: ControlMode) {
        self.control_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn setpoint(&self) -> AttitudeSetpoint {
        self.setpoint.get()
    }

    pub fn set_roll(&self, roll: f32) {
        self.setpoint.update(|sp| sp.roll = roll);
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.setpoint.update(|sp| sp.pitch = pitch);
    }

    pub fn set_yaw(&self, yaw: f32) {
        self.setpoint.update(|sp| sp.yaw = yaw);
    }

    pub fn throttle(&self) -> f32 {
        self.throttle.get()
    }

    pub fn set_throttle(&self, fraction: f32) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.throttle.set(fraction);
    }

    pub fn set_special_command(&self, code: u16) {
        self.special_command.store(code, Ordering::Release);
    }

    /// Take the pending special command, leaving none behind.
    pub fn take_special_command(&self) -> Option<u16> {
        match self.special_command.swap(0, Ordering::AcqRel) {
            0 => None,
            code => Some(code),
        }
    }
}

impl Default for FlightState {
    fn default() -> Self {
        Self::new()
    }
}
