//! Top-level firmware state machine.
//!
//! `tick` is called once per [`CONTROL_PERIOD`](crate::config::CONTROL_PERIOD):
//!
//! - **UNARMED**: motors held at zero and refreshed every tick. An armed request has to hold for
//!   `arm_confirmations` consecutive ticks before RUNNING is entered; a single disarmed tick
//!   restarts the count. Pending special commands are executed here.
//! - **RUNNING**: disarm stops the motors in the same tick and returns to UNARMED. Otherwise the
//!   control law runs (attitude mode), the motors are updated and every `sample_divider`-th tick a
//!   telemetry sample is queued.
//! - **ERROR**: entered on a motor bus fault. Nothing runs until [`Supervisor::reset`].

use crate::config::{ARM_CONFIRMATIONS, SAMPLE_DIVIDER};
use crate::control::ControlLaw;
use crate::hal::{DshotBus, Estimator, Sensors};
use crate::motors::{MotorError, MotorOutput};
use crate::protocol::{Message, SpecialCommand, TelemetrySample};
use crate::state::{ControlMode, FirmwareState, FlightState};
use crate::transmitter::LinkTransmitter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SupervisorConfig {
    pub arm_confirmations: u16,
    pub sample_divider: u16,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            arm_confirmations: ARM_CONFIRMATIONS,
            sample_divider: SAMPLE_DIVIDER,
        }
    }
}

pub struct Supervisor<'a, B, E, S> {
    config: SupervisorConfig,
    flight: &'a FlightState,
    output: MotorOutput<'a, B>,
    control: ControlLaw,
    estimator: &'a E,
    sensors: &'a S,
    tx: &'a LinkTransmitter,
    state: FirmwareState,
    confirmations: u16,
    sample_ticks: u16,
}

impl<'a, B, E, S> Supervisor<'a, B, E, S>
where
    B: DshotBus,
    E: Estimator,
    S: Sensors,
{
    pub fn new(
        config: SupervisorConfig,
        flight: &'a FlightState,
        output: MotorOutput<'a, B>,
        control: ControlLaw,
        estimator: &'a E,
        sensors: &'a S,
        tx: &'a LinkTransmitter,
    ) -> Self {
        flight.set_firmware_state(FirmwareState::Unarmed);
        Self {
            config,
            flight,
            output,
            control,
            estimator,
            sensors,
            tx,
            state: FirmwareState::Unarmed,
            confirmations: 0,
            sample_ticks: 0,
        }
    }

    pub fn state(&self) -> FirmwareState {
        self.state
    }

    /// Consecutive armed ticks counted so far while UNARMED.
    pub fn confirmations(&self) -> u16 {
        self.confirmations
    }

    pub fn output(&self) -> &MotorOutput<'a, B> {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut MotorOutput<'a, B> {
        &mut self.output
    }

    /// Run one period.
    pub fn tick(&mut self) -> FirmwareState {
        let result = match self.state {
            FirmwareState::Unarmed => self.tick_unarmed(),
            FirmwareState::Running => self.tick_running(),
            FirmwareState::Error => Ok(()),
        };
        if let Err(e) = result {
            self.fault(e);
        }
        self.state
    }

    /// External reset, the only way out of ERROR.
    pub fn reset(&mut self) {
        info!("supervisor reset from {}", self.state);
        self.output.motors().stop();
        self.flight.disarm();
        self.control.reset();
        self.confirmations = 0;
        self.sample_ticks = 0;
        self.enter(FirmwareState::Unarmed);
    }

    fn tick_unarmed(&mut self) -> Result<(), MotorError> {
        self.output.motors().stop();

        if let Some(code) = self.flight.take_special_command() {
            match SpecialCommand::from_code(code) {
                Some(cmd) => {
                    let command = cmd.dshot_command();
                    self.output.send_command(cmd.motor(), command)?;
                    // settings commands leave the ESC waiting for a throttle frame
                    if command.repeat_count() > 1 {
                        self.output.update_all_motors()?;
                    }
                }
                None => warn!("unknown special command {=u16}", code),
            }
        }

        self.output.update()?;

        if self.flight.is_armed() {
            self.confirmations += 1;
            if self.confirmations >= self.config.arm_confirmations {
                self.confirmations = 0;
                self.sample_ticks = 0;
                self.control.reset();
                self.enter(FirmwareState::Running);
            }
        } else if self.confirmations > 0 {
            warn!("arming aborted after {=u16} confirmations", self.confirmations);
            self.confirmations = 0;
        }
        Ok(())
    }

    fn tick_running(&mut self) -> Result<(), MotorError> {
        let motors = self.output.motors();

        if !self.flight.is_armed() {
            self.disarmed()?;
            return Ok(());
        }

        if self.flight.control_mode() == ControlMode::Attitude {
            let estimate = self.estimator.get_state();
            let setpoint = self.flight.setpoint();
            let thrust = self.control.update(&estimate, &setpoint, self.flight.throttle());
            motors.set_thrust(thrust.0);
        }

        // a disarm that landed while the control law ran must not be overwritten
        if !self.flight.is_armed() {
            self.disarmed()?;
            return Ok(());
        }

        self.output.update()?;

        self.sample_ticks += 1;
        if self.sample_ticks >= self.config.sample_divider {
            self.sample_ticks = 0;
            self.send_sample();
        }
        Ok(())
    }

    fn disarmed(&mut self) -> Result<(), MotorError> {
        self.output.motors().stop();
        self.enter(FirmwareState::Unarmed);
        self.output.update()
    }

    fn send_sample(&self) {
        let sample = TelemetrySample {
            estimate: self.estimator.get_state(),
            sensors: self.sensors.get_data(),
            setpoint: self.flight.setpoint(),
            thrust: self.output.motors().thrust(),
        };
        if self.tx.send(&Message::Sample(sample)).is_err() {
            trace!("sample skipped");
        }
    }

    fn fault(&mut self, e: MotorError) {
        error!("motor fault: {}", e);
        self.output.motors().stop();
        self.enter(FirmwareState::Error);
    }

    fn enter(&mut self, state: FirmwareState) {
        if self.state != state {
            info!("firmware {} -> {}", self.state, state);
        }
        self.state = state;
        self.flight.set_firmware_state(state);
    }
}
