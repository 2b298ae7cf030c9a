//! Motor output layer: the shared thrust command and its transmission over DShot.

use crate::config::{MOTOR_COUNT, THRUST_LIMIT};
use crate::dshot::{prepare_buffer, thrust_to_dshot, DshotCommand};
use crate::hal::DshotBus;
use crate::state::{Shared, ThrustCommand};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorError {
    /// PWM/DMA start failed on this channel (0-based).
    Bus { motor: usize },
    /// Motor index outside 0..4.
    InvalidMotor(usize),
}

impl core::fmt::Display for MotorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus { motor } => write!(f, "motor {} bus start failed", motor + 1),
            Self::InvalidMotor(motor) => write!(f, "invalid motor {}", motor + 1),
        }
    }
}

fn clamp_thrust(thrust: f32) -> f32 {
    if thrust.is_nan() {
        0.0
    } else {
        thrust.clamp(0.0, THRUST_LIMIT)
    }
}

/// Commanded thrust of all four motors.
///
/// Every write replaces the whole 4-tuple in one critical section, and every read copies it out the
/// same way, so no reader sees a mix of two writes.
pub struct Motors {
    thrust: Shared<ThrustCommand>,
}

impl Motors {
    pub const fn new() -> Self {
        Self {
            thrust: Shared::new(ThrustCommand::ZERO),
        }
    }

    /// Clamp each value to `[0, THRUST_LIMIT]` and publish all four at once.
    pub fn set_thrust(&self, thrust: [f32; MOTOR_COUNT]) {
        let command = ThrustCommand(thrust.map(clamp_thrust));
        self.thrust.set(command);
    }

    /// Override a single motor, leaving the others untouched.
    pub fn set_motor(&self, motor: usize, thrust: f32) -> Result<(), MotorError> {
        if motor >= MOTOR_COUNT {
            return Err(MotorError::InvalidMotor(motor));
        }
        self.thrust.update(|cmd| cmd.0[motor] = clamp_thrust(thrust));
        Ok(())
    }

    pub fn stop(&self) {
        self.thrust.set(ThrustCommand::ZERO);
    }

    /// Snapshot of the current command.
    pub fn thrust(&self) -> ThrustCommand {
        self.thrust.get()
    }
}

impl Default for Motors {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the DShot bus from a [`Motors`] command.
pub struct MotorOutput<'a, B> {
    motors: &'a Motors,
    bus: B,
    /// DShot values of the last transmission.
    last: [u16; MOTOR_COUNT],
}

impl<'a, B: DshotBus> MotorOutput<'a, B> {
    pub fn new(motors: &'a Motors, bus: B) -> Self {
        Self {
            motors,
            bus,
            last: [0; MOTOR_COUNT],
        }
    }

    pub fn motors(&self) -> &'a Motors {
        self.motors
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Encode the current thrust command and start all four channels.
    ///
    /// The command is copied out under the lock; encoding and bus starts run on the copy.
    pub fn update(&mut self) -> Result<(), MotorError> {
        let command = self.motors.thrust();
        let values = command.0.map(thrust_to_dshot);
        self.transmit(values)
    }

    /// Re-send the last transmitted values, e.g. after a command sequence changed ESC settings.
    pub fn update_all_motors(&mut self) -> Result<(), MotorError> {
        self.transmit(self.last)
    }

    /// Send an ESC command to one motor, repeated as often as the ESC needs to accept it.
    pub fn send_command(&mut self, motor: usize, command: DshotCommand) -> Result<(), MotorError> {
        if motor >= MOTOR_COUNT {
            return Err(MotorError::InvalidMotor(motor));
        }
        let buffer = command.buffer();
        for _ in 0..command.repeat_count() {
            self.bus
                .start(motor, &buffer)
                .map_err(|_| MotorError::Bus { motor })?;
        }
        debug!("motor {=usize} command {=u16}", motor + 1, command as u16);
        Ok(())
    }

    fn transmit(&mut self, values: [u16; MOTOR_COUNT]) -> Result<(), MotorError> {
        for (motor, &value) in values.iter().enumerate() {
            let buffer = prepare_buffer(value);
            if self.bus.start(motor, &buffer).is_err() {
                error!("dshot start failed on motor {=usize}", motor + 1);
                return Err(MotorError::Bus { motor });
            }
        }
        self.last = values;
        Ok(())
    }
}
