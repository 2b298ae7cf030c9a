use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{info, warn};
use embassy_executor::task;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1, SPI1};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};

use ikarus_fc::hal::{CalibrationError, MagCalibration};
use ikarus_fc::state::{AttitudeEstimate, SensorSample, Shared, Vec3};

use crate::drivers::attitude::ComplementaryFilter;
use crate::drivers::hmc5883::Hmc5883;
use crate::drivers::icm42688::{ImuBias, Icm42688};

const SENSOR_LOOP_HZ: u64 = 200;
/// HMC5883 output rate is 75 Hz; read it every fourth IMU sample.
const MAG_DIVIDER: u32 = 4;
const FILTER_ALPHA: f32 = 0.98;

#[derive(Clone, Copy, defmt::Format)]
pub struct CalibrationRequest {
    pub samples: u16,
    pub delay_ms: u16,
}

pub static CALIBRATION_REQUEST: Signal<CriticalSectionRawMutex, CalibrationRequest> = Signal::new();
static CALIBRATING: AtomicBool = AtomicBool::new(false);

/// Hands calibration requests from the link to the sensor task, which owns the I2C bus.
pub struct CalibrationTrigger;

impl MagCalibration for CalibrationTrigger {
    fn calibrate(&mut self, samples: u16, delay_ms: u16) -> Result<(), CalibrationError> {
        if CALIBRATING.load(Ordering::Acquire) || CALIBRATION_REQUEST.signaled() {
            return Err(CalibrationError::Busy);
        }
        CALIBRATION_REQUEST.signal(CalibrationRequest { samples, delay_ms });
        Ok(())
    }
}

/// IMU + magnetometer sampling and attitude estimation.
#[task]
pub async fn sensor_task(
    mut imu: Icm42688<'static, SPI1>,
    bias: ImuBias,
    mut i2c: I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>,
    sensors: &'static Shared<SensorSample>,
    estimate: &'static Shared<AttitudeEstimate>,
) {
    let mut mag = Hmc5883::new();
    let mag_ok = match mag.init(&mut i2c).await {
        Ok(()) => true,
        Err(e) => {
            warn!("hmc5883 init failed: {}", e);
            false
        }
    };

    let mut filter = ComplementaryFilter::new(FILTER_ALPHA);
    let mut field = Vec3::ZERO;
    let mut tick: u32 = 0;

    let mut ticker = Ticker::every(Duration::from_hz(SENSOR_LOOP_HZ));
    let mut last = Instant::now();

    loop {
        ticker.next().await;
        tick = tick.wrapping_add(1);

        if let Some(req) = CALIBRATION_REQUEST.try_take() {
            CALIBRATING.store(true, Ordering::Release);
            info!("mag calibration: {} samples every {} ms", req.samples, req.delay_ms);
            match mag.calibrate(&mut i2c, req.samples, req.delay_ms).await {
                Ok(c) => info!("mag calibration done: {}", c),
                Err(e) => warn!("mag calibration failed: {}", e),
            }
            CALIBRATING.store(false, Ordering::Release);
            last = Instant::now();
            continue;
        }

        let now = Instant::now();
        let dt = ((now - last).as_micros() as f32 / 1_000_000.0).clamp(0.001, 0.05);
        last = now;

        let (acc, gyr) = match imu.read(&bias) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if mag_ok && tick % MAG_DIVIDER == 0 {
            if let Ok(f) = mag.read_field(&mut i2c).await {
                field = f;
            }
        }

        sensors.set(SensorSample { acc, gyr, mag: field });
        estimate.set(filter.update(dt, &acc, &gyr, &field));
    }
}
