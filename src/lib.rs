//! Flight-control core of the Ikarus quadrotor.
//!
//! Hardware-independent parts of the firmware: DShot encoding, the motor output layer, the
//! attitude control law, the host link (codec, receiver, dispatcher, transmitter) and the
//! supervisor state machine. The firmware binary binds these to the STM32F405 peripherals.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod logging;

pub mod config;
pub mod control;
pub mod dispatch;
pub mod dshot;
pub mod hal;
pub mod motors;
pub mod protocol;
pub mod receiver;
pub mod state;
pub mod supervisor;
pub mod transmitter;

pub use control::{ControlLaw, ControlParams};
pub use dispatch::Dispatcher;
pub use motors::{MotorError, MotorOutput, Motors};
pub use receiver::{LinkReceiver, RxRing};
pub use state::{FirmwareState, FlightState, Shared};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use transmitter::{LinkError, LinkTransmitter};
