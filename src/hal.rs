//! Interfaces to the collaborators the flight core drives but does not implement.

use crate::dshot::DshotBuffer;
use crate::state::{AttitudeEstimate, SensorSample, Shared};

/// A motor channel refused to start its transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusFault;

/// Timer/DMA backed DShot output.
pub trait DshotBus {
    /// Start transmitting `buffer` on motor channel `channel` (0-based).
    fn start(&mut self, channel: usize, buffer: &DshotBuffer) -> Result<(), BusFault>;
}

impl<T: DshotBus + ?Sized> DshotBus for &mut T {
    fn start(&mut self, channel: usize, buffer: &DshotBuffer) -> Result<(), BusFault> {
        (**self).start(channel, buffer)
    }
}

/// Source of attitude estimates.
pub trait Estimator {
    fn get_state(&self) -> AttitudeEstimate;
}

/// Source of raw sensor samples.
pub trait Sensors {
    fn get_data(&self) -> SensorSample;
}

impl Estimator for Shared<AttitudeEstimate> {
    fn get_state(&self) -> AttitudeEstimate {
        self.get()
    }
}

impl Sensors for Shared<SensorSample> {
    fn get_data(&self) -> SensorSample {
        self.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// A calibration run is already in progress.
    Busy,
    /// The magnetometer did not answer.
    Sensor,
}

impl core::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => f.write_str("calibration busy"),
            Self::Sensor => f.write_str("magnetometer not responding"),
        }
    }
}

/// Magnetometer hard/soft-iron calibration routine.
pub trait MagCalibration {
    /// Collect `samples` readings spaced `delay_ms` apart and apply the resulting correction.
    fn calibrate(&mut self, samples: u16, delay_ms: u16) -> Result<(), CalibrationError>;
}

/// Byte sink of the host link. Resolves once the frame has physically left.
#[allow(async_fn_in_trait)]
pub trait FrameSink {
    type Error;

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error>;
}
