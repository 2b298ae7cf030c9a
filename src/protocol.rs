//! Host link wire format.
//!
//! ```text
//! [0xAA][type][length][payload: 100 bytes, zero-filled past length][checksum]
//! ```
//!
//! Every frame is [`FRAME_LEN`] bytes. The checksum is the low byte of the sum of the start byte,
//! type, length and the first `length` payload bytes. Multi-byte fields are little-endian.

use crate::config::{FRAME_LEN, HEADER_LEN, MAX_PAYLOAD, MOTOR_COUNT, START_BYTE};
use crate::dshot::DshotCommand;
use crate::state::{
    AttitudeEstimate, AttitudeSetpoint, ControlMode, SensorSample, ThrustCommand, Vec3,
};

pub type Frame = [u8; FRAME_LEN];

const CHECKSUM_OFFSET: usize = FRAME_LEN - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    Arming = 0,
    Thrust = 1,
    Pitch = 2,
    Roll = 3,
    Yaw = 4,
    Motor1 = 5,
    Motor2 = 6,
    Motor3 = 7,
    Motor4 = 8,
    MagCalibrate = 9,
    Sample = 10,
    Special = 11,
    Ping = 12,
    Reply = 13,
    ControlMode = 14,
    Throttle = 15,
}

impl MessageType {
    /// Minimum payload length the type needs.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Arming | Self::ControlMode => 1,
            Self::Thrust => 4 * MOTOR_COUNT,
            Self::Pitch
            | Self::Roll
            | Self::Yaw
            | Self::Motor1
            | Self::Motor2
            | Self::Motor3
            | Self::Motor4
            | Self::Throttle => 4,
            Self::Special => 2,
            Self::Sample => TelemetrySample::SIZE,
            Self::MagCalibrate | Self::Ping | Self::Reply => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Arming => "arming",
            Self::Thrust => "thrust",
            Self::Pitch => "pitch",
            Self::Roll => "roll",
            Self::Yaw => "yaw",
            Self::Motor1 => "motor1",
            Self::Motor2 => "motor2",
            Self::Motor3 => "motor3",
            Self::Motor4 => "motor4",
            Self::MagCalibrate => "calibration",
            Self::Sample => "sample",
            Self::Special => "special",
            Self::Ping => "ping",
            Self::Reply => "reply",
            Self::ControlMode => "control mode",
            Self::Throttle => "throttle",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, ProtocolError> {
        Ok(match raw {
            0 => Self::Arming,
            1 => Self::Thrust,
            2 => Self::Pitch,
            3 => Self::Roll,
            4 => Self::Yaw,
            5 => Self::Motor1,
            6 => Self::Motor2,
            7 => Self::Motor3,
            8 => Self::Motor4,
            9 => Self::MagCalibrate,
            10 => Self::Sample,
            11 => Self::Special,
            12 => Self::Ping,
            13 => Self::Reply,
            14 => Self::ControlMode,
            15 => Self::Throttle,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    InvalidStart,
    /// Declared payload length above [`MAX_PAYLOAD`].
    InvalidLength(u8),
    ChecksumMismatch { expected: u8, received: u8 },
    UnknownType(u8),
    PayloadTooShort(MessageType),
    InvalidArmValue(u8),
    InvalidControlMode(u8),
    /// NaN or infinite value in a setpoint or thrust field.
    NonFinite(MessageType),
    /// Reply payload is not UTF-8.
    InvalidText,
    /// Payload does not fit a frame.
    PayloadTooLong(usize),
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidStart => f.write_str("invalid start"),
            Self::InvalidLength(_) => f.write_str("invalid length"),
            Self::ChecksumMismatch { .. } => f.write_str("CRC mismatch"),
            Self::UnknownType(_) => f.write_str("unknown type"),
            Self::PayloadTooShort(ty) => write!(f, "invalid {} payload", ty.name()),
            Self::InvalidArmValue(_) => f.write_str("invalid arming value"),
            Self::InvalidControlMode(_) => f.write_str("invalid control mode"),
            Self::NonFinite(ty) => write!(f, "non-finite {} value", ty.name()),
            Self::InvalidText => f.write_str("invalid reply text"),
            Self::PayloadTooLong(_) => f.write_str("payload too long"),
        }
    }
}

/// Low byte of the arithmetic sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// A frame whose start byte, length and checksum have been validated. The type byte is not yet
/// interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub msg_type: u8,
    pub payload: &'a [u8],
}

impl<'a> RawMessage<'a> {
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.msg_type)
    }
}

/// Validate the structure of a frame.
pub fn decode(frame: &Frame) -> Result<RawMessage<'_>, ProtocolError> {
    if frame[0] != START_BYTE {
        return Err(ProtocolError::InvalidStart);
    }
    let len = frame[2] as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::InvalidLength(frame[2]));
    }
    let expected = checksum(&frame[..HEADER_LEN + len]);
    let received = frame[CHECKSUM_OFFSET];
    if expected != received {
        return Err(ProtocolError::ChecksumMismatch { expected, received });
    }
    Ok(RawMessage {
        msg_type: frame[1],
        payload: &frame[HEADER_LEN..HEADER_LEN + len],
    })
}

/// Build a frame around `payload`, zero-filling the rest of the payload area.
pub fn encode(msg_type: u8, payload: &[u8]) -> Result<Frame, ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLong(payload.len()));
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_BYTE;
    frame[1] = msg_type;
    frame[2] = payload.len() as u8;
    frame[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    frame[CHECKSUM_OFFSET] = checksum(&frame[..HEADER_LEN + payload.len()]);
    Ok(frame)
}

// ── Payload helpers ───────────────────────────────────────────────────────────

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn f32(&mut self, v: f32) {
        self.bytes(&v.to_le_bytes());
    }

    fn vec3(&mut self, v: &Vec3) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.array())
    }

    fn finite(&mut self, ty: MessageType) -> Result<f32, ProtocolError> {
        match self.f32() {
            v if v.is_finite() => Ok(v),
            _ => Err(ProtocolError::NonFinite(ty)),
        }
    }

    fn vec3(&mut self) -> Vec3 {
        Vec3 {
            x: self.f32(),
            y: self.f32(),
            z: self.f32(),
        }
    }
}

/// Host-bound snapshot of the flight core.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    pub estimate: AttitudeEstimate,
    pub sensors: SensorSample,
    pub setpoint: AttitudeSetpoint,
    pub thrust: ThrustCommand,
}

impl TelemetrySample {
    /// 6 + 9 + 3 + 4 little-endian f32.
    pub const SIZE: usize = 22 * 4;

    pub fn write_to(&self, buf: &mut [u8; Self::SIZE]) {
        let mut w = Writer::new(buf);
        let e = &self.estimate;
        for v in [e.roll, e.pitch, e.yaw, e.roll_rate, e.pitch_rate, e.yaw_rate] {
            w.f32(v);
        }
        w.vec3(&self.sensors.acc);
        w.vec3(&self.sensors.gyr);
        w.vec3(&self.sensors.mag);
        w.f32(self.setpoint.roll);
        w.f32(self.setpoint.pitch);
        w.f32(self.setpoint.yaw);
        for t in self.thrust.0 {
            w.f32(t);
        }
    }

    /// `buf` must hold at least [`Self::SIZE`] bytes.
    fn read_from(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        let estimate = AttitudeEstimate {
            roll: r.f32(),
            pitch: r.f32(),
            yaw: r.f32(),
            roll_rate: r.f32(),
            pitch_rate: r.f32(),
            yaw_rate: r.f32(),
        };
        let sensors = SensorSample {
            acc: r.vec3(),
            gyr: r.vec3(),
            mag: r.vec3(),
        };
        let setpoint = AttitudeSetpoint {
            roll: r.f32(),
            pitch: r.f32(),
            yaw: r.f32(),
        };
        let mut thrust = ThrustCommand::ZERO;
        for t in thrust.0.iter_mut() {
            *t = r.f32();
        }
        Self {
            estimate,
            sensors,
            setpoint,
            thrust,
        }
    }
}

/// Motor test commands carried by a SPECIAL frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpecialCommand {
    /// Beep motor n (0-based). Codes 1..=4.
    Beep(usize),
    /// Reverse the spin direction of motor n (0-based). Codes 5..=8.
    ReverseSpin(usize),
}

impl SpecialCommand {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1..=4 => Some(Self::Beep(code as usize - 1)),
            5..=8 => Some(Self::ReverseSpin(code as usize - 5)),
            _ => None,
        }
    }

    pub fn motor(self) -> usize {
        match self {
            Self::Beep(m) | Self::ReverseSpin(m) => m,
        }
    }

    pub fn dshot_command(self) -> DshotCommand {
        match self {
            Self::Beep(_) => DshotCommand::Beep1,
            Self::ReverseSpin(_) => DshotCommand::SpinDirectionReversed,
        }
    }
}

/// Typed view of a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message<'a> {
    Arming(bool),
    Thrust([f32; MOTOR_COUNT]),
    Pitch(f32),
    Roll(f32),
    Yaw(f32),
    /// Direct override of motor `index` (0-based).
    Motor { index: usize, thrust: f32 },
    MagCalibrate,
    Sample(TelemetrySample),
    Special(u16),
    Ping,
    Reply(&'a str),
    ControlMode(ControlMode),
    Throttle(f32),
}

impl<'a> Message<'a> {
    /// Interpret a validated frame. Bytes past the type's payload size are ignored.
    pub fn parse(raw: &RawMessage<'a>) -> Result<Self, ProtocolError> {
        let ty = raw.message_type()?;
        let payload = raw.payload;
        if payload.len() < ty.payload_len() {
            return Err(ProtocolError::PayloadTooShort(ty));
        }
        let mut r = Reader::new(payload);

        Ok(match ty {
            MessageType::Arming => match payload[0] {
                0 => Self::Arming(false),
                1 => Self::Arming(true),
                other => return Err(ProtocolError::InvalidArmValue(other)),
            },
            MessageType::Thrust => {
                Self::Thrust([r.finite(ty)?, r.finite(ty)?, r.finite(ty)?, r.finite(ty)?])
            }
            MessageType::Pitch => Self::Pitch(r.finite(ty)?),
            MessageType::Roll => Self::Roll(r.finite(ty)?),
            MessageType::Yaw => Self::Yaw(r.finite(ty)?),
            MessageType::Motor1 | MessageType::Motor2 | MessageType::Motor3 | MessageType::Motor4 => {
                Self::Motor {
                    index: (ty as u8 - MessageType::Motor1 as u8) as usize,
                    thrust: r.finite(ty)?,
                }
            }
            MessageType::MagCalibrate => Self::MagCalibrate,
            MessageType::Sample => Self::Sample(TelemetrySample::read_from(payload)),
            MessageType::Special => Self::Special(u16::from_le_bytes(r.array())),
            MessageType::Ping => Self::Ping,
            MessageType::Reply => {
                let text = core::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidText)?;
                Self::Reply(text)
            }
            MessageType::ControlMode => Self::ControlMode(
                ControlMode::try_from(payload[0]).map_err(ProtocolError::InvalidControlMode)?,
            ),
            MessageType::Throttle => Self::Throttle(r.finite(ty)?),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Arming(_) => MessageType::Arming,
            Self::Thrust(_) => MessageType::Thrust,
            Self::Pitch(_) => MessageType::Pitch,
            Self::Roll(_) => MessageType::Roll,
            Self::Yaw(_) => MessageType::Yaw,
            Self::Motor { index: 0, .. } => MessageType::Motor1,
            Self::Motor { index: 1, .. } => MessageType::Motor2,
            Self::Motor { index: 2, .. } => MessageType::Motor3,
            Self::Motor { .. } => MessageType::Motor4,
            Self::MagCalibrate => MessageType::MagCalibrate,
            Self::Sample(_) => MessageType::Sample,
            Self::Special(_) => MessageType::Special,
            Self::Ping => MessageType::Ping,
            Self::Reply(_) => MessageType::Reply,
            Self::ControlMode(_) => MessageType::ControlMode,
            Self::Throttle(_) => MessageType::Throttle,
        }
    }

    /// Serialise into a complete frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut payload = [0u8; MAX_PAYLOAD];
        let len = match self {
            Self::Arming(armed) => {
                payload[0] = *armed as u8;
                1
            }
            Self::Thrust(thrust) => {
                let mut w = Writer::new(&mut payload);
                for &t in thrust {
                    w.f32(t);
                }
                w.pos
            }
            Self::Pitch(v) | Self::Roll(v) | Self::Yaw(v) | Self::Throttle(v) => {
                payload[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
            Self::Motor { thrust, .. } => {
                payload[..4].copy_from_slice(&thrust.to_le_bytes());
                4
            }
            Self::MagCalibrate | Self::Ping => 0,
            Self::Sample(sample) => {
                let mut buf = [0u8; TelemetrySample::SIZE];
                sample.write_to(&mut buf);
                payload[..TelemetrySample::SIZE].copy_from_slice(&buf);
                TelemetrySample::SIZE
            }
            Self::Special(code) => {
                payload[..2].copy_from_slice(&code.to_le_bytes());
                2
            }
            Self::Reply(text) => {
                let bytes = text.as_bytes();
                if bytes.len() > MAX_PAYLOAD {
                    return Err(ProtocolError::PayloadTooLong(bytes.len()));
                }
                payload[..bytes.len()].copy_from_slice(bytes);
                bytes.len()
            }
            Self::ControlMode(mode) => {
                payload[0] = *mode as u8;
                1
            }
        };
        encode(self.message_type() as u8, &payload[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message<'_>) {
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        let raw = decode(&frame).unwrap();
        assert_eq!(Message::parse(&raw).unwrap(), msg);
        // re-encoding the decoded message reproduces the frame byte for byte
        assert_eq!(Message::parse(&raw).unwrap().to_frame().unwrap(), frame);
    }

    #[test]
    fn every_message_type_round_trips() {
        let sample = TelemetrySample {
            estimate: AttitudeEstimate {
                roll: 1.0,
                pitch: -2.0,
                yaw: 3.5,
                roll_rate: 0.1,
                pitch_rate: 0.2,
                yaw_rate: -0.3,
            },
            sensors: SensorSample {
                acc: Vec3 { x: 0.0, y: 0.0, z: 1.0 },
                gyr: Vec3 { x: 0.5, y: -0.5, z: 0.25 },
                mag: Vec3 { x: 0.3, y: 0.1, z: -0.9 },
            },
            setpoint: AttitudeSetpoint { roll: 0.0, pitch: 4.0, yaw: 90.0 },
            thrust: ThrustCommand([10.0, 20.0, 30.0, 40.0]),
        };
        let messages = [
            Message::Arming(true),
            Message::Arming(false),
            Message::Thrust([1.0, 2.5, 150.0, 300.0]),
            Message::Pitch(-7.25),
            Message::Roll(12.0),
            Message::Yaw(180.0),
            Message::Motor { index: 0, thrust: 5.0 },
            Message::Motor { index: 3, thrust: 99.5 },
            Message::MagCalibrate,
            Message::Sample(sample),
            Message::Special(6),
            Message::Ping,
            Message::Reply("OK: armed"),
            Message::ControlMode(ControlMode::Direct),
            Message::Throttle(0.4),
        ];
        for msg in messages {
            round_trip(msg);
        }
    }

    #[test]
    fn checksum_covers_header_and_payload() {
        let frame = encode(MessageType::Arming as u8, &[1]).unwrap();
        assert_eq!(&frame[..4], &[0xAA, 0x00, 0x01, 0x01]);
        assert_eq!(frame[FRAME_LEN - 1], 0xAC);
        assert!(frame[4..FRAME_LEN - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(&[0xAA, 0xAA, 0xAA]), 0xFE);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut frame = Message::Roll(3.0).to_frame().unwrap();
        frame[5] ^= 0x10;
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));

        let mut frame = Message::Roll(3.0).to_frame().unwrap();
        frame[FRAME_LEN - 1] = frame[FRAME_LEN - 1].wrapping_add(1);
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn structural_errors() {
        let mut frame = Message::Ping.to_frame().unwrap();
        frame[0] = 0x55;
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidStart));

        let mut frame = [0u8; FRAME_LEN];
        frame[0] = START_BYTE;
        frame[2] = 101;
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidLength(101)));

        assert_eq!(
            encode(0, &[0u8; MAX_PAYLOAD + 1]),
            Err(ProtocolError::PayloadTooLong(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn slack_bytes_are_ignored_by_the_checksum() {
        let mut frame = Message::Yaw(1.0).to_frame().unwrap();
        frame[50] = 0x7F;
        let raw = decode(&frame).unwrap();
        assert_eq!(Message::parse(&raw).unwrap(), Message::Yaw(1.0));
    }

    #[test]
    fn longer_payload_than_needed_is_accepted() {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&2.0f32.to_le_bytes());
        let frame = encode(MessageType::Pitch as u8, &payload).unwrap();
        let raw = decode(&frame).unwrap();
        assert_eq!(Message::parse(&raw).unwrap(), Message::Pitch(2.0));
    }

    #[test]
    fn payload_errors() {
        let frame = encode(MessageType::Thrust as u8, &[0u8; 12]).unwrap();
        let raw = decode(&frame).unwrap();
        let err = Message::parse(&raw).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooShort(MessageType::Thrust));

        let frame = encode(MessageType::Arming as u8, &[2]).unwrap();
        let raw = decode(&frame).unwrap();
        assert_eq!(Message::parse(&raw), Err(ProtocolError::InvalidArmValue(2)));

        let frame = encode(0x42, &[]).unwrap();
        let raw = decode(&frame).unwrap();
        assert_eq!(Message::parse(&raw), Err(ProtocolError::UnknownType(0x42)));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for msg in [
            Message::Yaw(f32::NAN),
            Message::Pitch(f32::INFINITY),
            Message::Roll(f32::NEG_INFINITY),
            Message::Thrust([1.0, 2.0, f32::NAN, 4.0]),
            Message::Motor { index: 3, thrust: f32::INFINITY },
            Message::Throttle(f32::NAN),
        ] {
            let frame = msg.to_frame().unwrap();
            let raw = decode(&frame).unwrap();
            assert_eq!(
                Message::parse(&raw),
                Err(ProtocolError::NonFinite(msg.message_type()))
            );
        }
        assert_eq!(
            ProtocolError::NonFinite(MessageType::Yaw).to_string(),
            "non-finite yaw value"
        );
    }

    #[test]
    fn error_text() {
        assert_eq!(
            ProtocolError::PayloadTooShort(MessageType::Thrust).to_string(),
            "invalid thrust payload"
        );
        assert_eq!(
            ProtocolError::ChecksumMismatch { expected: 1, received: 2 }.to_string(),
            "CRC mismatch"
        );
    }

    #[test]
    fn special_codes() {
        assert_eq!(SpecialCommand::from_code(1), Some(SpecialCommand::Beep(0)));
        assert_eq!(SpecialCommand::from_code(8), Some(SpecialCommand::ReverseSpin(3)));
        assert_eq!(SpecialCommand::from_code(0), None);
        assert_eq!(SpecialCommand::from_code(9), None);
        assert_eq!(
            SpecialCommand::ReverseSpin(1).dshot_command(),
            DshotCommand::SpinDirectionReversed
        );
    }
}
