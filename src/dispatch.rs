//! Routes host commands to the shared flight state and answers each one.

use crate::config::{MAG_CALIBRATION_DELAY_MS, MAG_CALIBRATION_SAMPLES};
use crate::hal::MagCalibration;
use crate::motors::Motors;
use crate::protocol::{self, Frame, Message, ProtocolError};
use crate::state::FlightState;
use crate::transmitter::{LinkError, LinkTransmitter};

pub struct Dispatcher<'a, C> {
    flight: &'a FlightState,
    motors: &'a Motors,
    tx: &'a LinkTransmitter,
    calibration: C,
}

impl<'a, C: MagCalibration> Dispatcher<'a, C> {
    pub fn new(
        flight: &'a FlightState,
        motors: &'a Motors,
        tx: &'a LinkTransmitter,
        calibration: C,
    ) -> Self {
        Self {
            flight,
            motors,
            tx,
            calibration,
        }
    }

    /// Handle the outcome of one receiver step. Returns whether the answer could be queued.
    pub fn handle(&mut self, received: Result<Frame, ProtocolError>) -> Result<(), LinkError> {
        match received {
            Ok(frame) => self.handle_frame(&frame),
            Err(e) => self.reject(e),
        }
    }

    pub fn handle_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        let raw = match protocol::decode(frame) {
            Ok(raw) => raw,
            Err(e) => return self.reject(e),
        };
        match Message::parse(&raw) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, e: ProtocolError) -> Result<(), LinkError> {
        debug!("frame rejected: {}", e);
        self.tx.reply_fmt(format_args!("ERR: {}", e))
    }

    fn ok(&self, what: &str) -> Result<(), LinkError> {
        self.tx.reply_fmt(format_args!("OK: {}", what))
    }

    fn dispatch(&mut self, msg: Message<'_>) -> Result<(), LinkError> {
        let ty = msg.message_type();
        match msg {
            Message::Arming(true) => match self.flight.arm() {
                Ok(()) => self.ok("armed"),
                Err(e) => self.tx.reply_fmt(format_args!("ERR: {}", e)),
            },
            Message::Arming(false) => {
                self.flight.disarm();
                self.motors.stop();
                self.ok("disarmed")
            }
            Message::Thrust(thrust) => {
                self.motors.set_thrust(thrust);
                self.ok("thrust")
            }
            Message::Pitch(v) => {
                self.flight.set_pitch(v);
                self.ok(ty.name())
            }
            Message::Roll(v) => {
                self.flight.set_roll(v);
                self.ok(ty.name())
            }
            Message::Yaw(v) => {
                self.flight.set_yaw(v);
                self.ok(ty.name())
            }
            Message::Motor { index, thrust } => match self.motors.set_motor(index, thrust) {
                Ok(()) => self.ok(ty.name()),
                Err(e) => self.tx.reply_fmt(format_args!("ERR: {}", e)),
            },
            Message::MagCalibrate => {
                info!("magnetometer calibration requested");
                match self
                    .calibration
                    .calibrate(MAG_CALIBRATION_SAMPLES, MAG_CALIBRATION_DELAY_MS)
                {
                    Ok(()) => self.ok(ty.name()),
                    Err(e) => self.tx.reply_fmt(format_args!("ERR: {}", e)),
                }
            }
            Message::Special(code) => {
                self.flight.set_special_command(code);
                self.ok(ty.name())
            }
            Message::Ping => self.tx.send(&Message::Ping),
            Message::ControlMode(mode) => {
                self.flight.set_control_mode(mode);
                self.ok(ty.name())
            }
            Message::Throttle(v) => {
                self.flight.set_throttle(v);
                self.ok(ty.name())
            }
            // host-bound only
            Message::Sample(_) | Message::Reply(_) => {
                self.tx.reply_fmt(format_args!("ERR: unexpected {}", ty.name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::CalibrationError;
    use crate::protocol::{encode, MessageType};
    use crate::state::{AttitudeSetpoint, ControlMode, FirmwareState, ThrustCommand};
    use crate::transmitter::tests::{drain, reply_text};

    #[derive(Default)]
    struct FakeCalibration {
        runs: Vec<(u16, u16)>,
        busy: bool,
    }

    impl MagCalibration for &mut FakeCalibration {
        fn calibrate(&mut self, samples: u16, delay_ms: u16) -> Result<(), CalibrationError> {
            if self.busy {
                return Err(CalibrationError::Busy);
            }
            self.runs.push((samples, delay_ms));
            Ok(())
        }
    }

    struct Fixture {
        flight: FlightState,
        motors: Motors,
        tx: LinkTransmitter,
        calibration: FakeCalibration,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                flight: FlightState::new(),
                motors: Motors::new(),
                tx: LinkTransmitter::new(),
                calibration: FakeCalibration::default(),
            }
        }

        /// Dispatch each message and return the replies in order.
        fn run(&mut self, messages: &[Message<'_>]) -> Vec<String> {
            let mut d = Dispatcher::new(&self.flight, &self.motors, &self.tx, &mut self.calibration);
            for msg in messages {
                d.handle_frame(&msg.to_frame().unwrap()).unwrap();
            }
            drain(&self.tx).iter().map(reply_text).collect()
        }
    }

    #[test]
    fn arm_and_disarm() {
        let mut fx = Fixture::new();
        let replies = fx.run(&[Message::Arming(true)]);
        assert_eq!(replies, ["OK: armed"]);
        assert!(fx.flight.is_armed());

        fx.motors.set_thrust([100.0; 4]);
        let replies = fx.run(&[Message::Arming(false)]);
        assert_eq!(replies, ["OK: disarmed"]);
        assert!(!fx.flight.is_armed());
        assert_eq!(fx.motors.thrust(), ThrustCommand::ZERO);
    }

    #[test]
    fn arming_refused_in_error() {
        let mut fx = Fixture::new();
        fx.flight.set_firmware_state(FirmwareState::Error);
        let replies = fx.run(&[Message::Arming(true)]);
        assert_eq!(replies, ["ERR: firmware in error state"]);
        assert!(!fx.flight.is_armed());
    }

    #[test]
    fn setpoints_and_overrides() {
        let mut fx = Fixture::new();
        let replies = fx.run(&[
            Message::Roll(4.0),
            Message::Pitch(-2.0),
            Message::Yaw(90.0),
            Message::Thrust([10.0, 20.0, 30.0, 40.0]),
            Message::Motor { index: 1, thrust: 500.0 },
            Message::Throttle(0.25),
            Message::ControlMode(ControlMode::Direct),
        ]);
        assert_eq!(
            replies,
            [
                "OK: roll",
                "OK: pitch",
                "OK: yaw",
                "OK: thrust",
                "OK: motor2",
                "OK: throttle",
                "OK: control mode"
            ]
        );
        assert_eq!(
            fx.flight.setpoint(),
            AttitudeSetpoint { roll: 4.0, pitch: -2.0, yaw: 90.0 }
        );
        assert_eq!(fx.motors.thrust(), ThrustCommand([10.0, 300.0, 30.0, 40.0]));
        assert_eq!(fx.flight.throttle(), 0.25);
        assert_eq!(fx.flight.control_mode(), ControlMode::Direct);
    }

    #[test]
    fn non_finite_setpoints_leave_state_untouched() {
        let mut fx = Fixture::new();
        fx.run(&[Message::Yaw(45.0), Message::Thrust([10.0; 4])]);

        let replies = fx.run(&[
            Message::Yaw(f32::NAN),
            Message::Roll(f32::INFINITY),
            Message::Thrust([f32::NAN, 0.0, 0.0, 0.0]),
            Message::Motor { index: 0, thrust: f32::NEG_INFINITY },
        ]);
        assert_eq!(
            replies,
            [
                "ERR: non-finite yaw value",
                "ERR: non-finite roll value",
                "ERR: non-finite thrust value",
                "ERR: non-finite motor1 value",
            ]
        );
        assert_eq!(
            fx.flight.setpoint(),
            AttitudeSetpoint { roll: 0.0, pitch: 0.0, yaw: 45.0 }
        );
        assert_eq!(fx.motors.thrust(), ThrustCommand([10.0; 4]));
    }

    #[test]
    fn calibration_runs_collaborator() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run(&[Message::MagCalibrate]), ["OK: calibration"]);
        assert_eq!(fx.calibration.runs, [(MAG_CALIBRATION_SAMPLES, MAG_CALIBRATION_DELAY_MS)]);

        fx.calibration.busy = true;
        assert_eq!(fx.run(&[Message::MagCalibrate]), ["ERR: calibration busy"]);
    }

    #[test]
    fn special_command_is_stored() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run(&[Message::Special(3)]), ["OK: special"]);
        assert_eq!(fx.flight.take_special_command(), Some(3));
    }

    #[test]
    fn ping_gets_pong() {
        let mut fx = Fixture::new();
        let mut d = Dispatcher::new(&fx.flight, &fx.motors, &fx.tx, &mut fx.calibration);
        d.handle_frame(&Message::Ping.to_frame().unwrap()).unwrap();
        let frames = drain(&fx.tx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], MessageType::Ping as u8);
    }

    #[test]
    fn bad_frames_mutate_nothing() {
        let mut fx = Fixture::new();
        fx.motors.set_thrust([5.0; 4]);

        let mut d = Dispatcher::new(&fx.flight, &fx.motors, &fx.tx, &mut fx.calibration);
        d.handle_frame(&encode(0x33, &[1, 2, 3, 4]).unwrap()).unwrap();
        d.handle_frame(&encode(MessageType::Thrust as u8, &[0; 8]).unwrap())
            .unwrap();
        d.handle_frame(&encode(MessageType::Arming as u8, &[7]).unwrap())
            .unwrap();
        let mut corrupt = Message::Arming(true).to_frame().unwrap();
        corrupt[103] ^= 0xFF;
        d.handle_frame(&corrupt).unwrap();
        d.handle(Err(ProtocolError::InvalidLength(200))).unwrap();
        d.handle_frame(&Message::Reply("hi").to_frame().unwrap()).unwrap();

        let replies: Vec<String> = drain(&fx.tx).iter().map(reply_text).collect();
        assert_eq!(
            replies,
            [
                "ERR: unknown type",
                "ERR: invalid thrust payload",
                "ERR: invalid arming value",
                "ERR: CRC mismatch",
                "ERR: invalid length",
                "ERR: unexpected reply",
            ]
        );
        assert!(!fx.flight.is_armed());
        assert_eq!(fx.motors.thrust(), ThrustCommand([5.0; 4]));
    }
}
