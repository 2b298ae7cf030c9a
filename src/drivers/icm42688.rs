use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

use ikarus_fc::state::Vec3;

const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_WHO_AM_I: u8 = 0x75;
const WHO_AM_I: u8 = 0x47;

/// ±16 g
const ACC_LSB_PER_G: f32 = 2048.0;
/// ±2000 dps
const GYR_LSB_PER_DPS: f32 = 16.4;

pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        self.cs.set_low();
        let res = self.spi.blocking_write(&[reg & 0x7F, value]);
        self.cs.set_high();
        res
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let tx = [reg | 0x80, 0x00];
        let mut rx = [0u8; 2];
        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;
        Ok(rx[1])
    }

    /// Soft reset, then gyro and accel in low-noise mode. Returns whether WHO_AM_I matched.
    pub async fn init(&mut self) -> Result<bool, Error> {
        self.write_reg(REG_DEVICE_CONFIG, 0x01)?;
        Timer::after(Duration::from_millis(10)).await;

        let id = self.read_reg(REG_WHO_AM_I)?;

        self.write_reg(REG_PWR_MGMT0, 0x0F)?;
        Timer::after(Duration::from_millis(50)).await;
        Ok(id == WHO_AM_I)
    }

    pub fn read_raw(&mut self) -> Result<([i16; 3], [i16; 3]), Error> {
        let mut tx = [0u8; 13];
        tx[0] = REG_ACCEL_DATA_X1 | 0x80;
        let mut rx = [0u8; 13];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;

        let word = |i: usize| i16::from_be_bytes([rx[i], rx[i + 1]]);
        Ok(([word(1), word(3), word(5)], [word(7), word(9), word(11)]))
    }

    /// Acceleration in g and angular rate in deg/s, bias-corrected.
    pub fn read(&mut self, bias: &ImuBias) -> Result<(Vec3, Vec3), Error> {
        let (acc, gyr) = self.read_raw()?;
        let acc = Vec3 {
            x: (acc[0] as f32 - bias.acc[0]) / ACC_LSB_PER_G,
            y: (acc[1] as f32 - bias.acc[1]) / ACC_LSB_PER_G,
            z: (acc[2] as f32 - bias.acc[2]) / ACC_LSB_PER_G,
        };
        let gyr = Vec3 {
            x: (gyr[0] as f32 - bias.gyr[0]) / GYR_LSB_PER_DPS,
            y: (gyr[1] as f32 - bias.gyr[1]) / GYR_LSB_PER_DPS,
            z: (gyr[2] as f32 - bias.gyr[2]) / GYR_LSB_PER_DPS,
        };
        Ok((acc, gyr))
    }

    /// Average `samples` readings at rest. Gravity is removed from the accelerometer z axis.
    pub async fn estimate_bias(&mut self, samples: u16) -> ImuBias {
        let mut bias = ImuBias::default();
        let mut n = 0u16;
        for _ in 0..samples {
            if let Ok((acc, gyr)) = self.read_raw() {
                for axis in 0..3 {
                    bias.acc[axis] += acc[axis] as f32;
                    bias.gyr[axis] += gyr[axis] as f32;
                }
                n += 1;
            }
            Timer::after(Duration::from_millis(10)).await;
        }
        if n == 0 {
            return ImuBias::default();
        }
        for axis in 0..3 {
            bias.acc[axis] /= n as f32;
            bias.gyr[axis] /= n as f32;
        }
        bias.acc[2] -= ACC_LSB_PER_G;
        bias
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ImuBias {
    pub acc: [f32; 3],
    pub gyr: [f32; 3],
}
