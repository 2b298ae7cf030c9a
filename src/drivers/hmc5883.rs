use embassy_stm32::i2c::{I2c, Instance, RxDma, TxDma};
use embassy_time::Timer;

use ikarus_fc::state::Vec3;

pub const HMC5883L_ADDR: u8 = 0x1E;

/// LSB per gauss at the default 1.3 Ga range.
const LSB_PER_GAUSS: f32 = 1090.0;

pub struct Hmc5883 {
    correction: MagCorrection,
}

impl Hmc5883 {
    pub fn new() -> Self {
        Self {
            correction: MagCorrection::IDENTITY,
        }
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), embassy_stm32::i2c::Error> {
        // CRA: 8-average, 75 Hz, normal measurement
        i2c.blocking_write(HMC5883L_ADDR, &[0x00, 0x78])?;
        // CRB: gain 1.3 Ga
        i2c.blocking_write(HMC5883L_ADDR, &[0x01, 0x20])?;
        // continuous measurement
        i2c.blocking_write(HMC5883L_ADDR, &[0x02, 0x00])?;

        Timer::after_millis(10).await;
        Ok(())
    }

    /// Raw field in LSB, axis order x, y, z.
    pub async fn read_raw<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<[i16; 3], embassy_stm32::i2c::Error> {
        let mut data = [0u8; 6];
        i2c.blocking_write_read(HMC5883L_ADDR, &[0x03], &mut data)?;

        // register layout is X, Z, Y
        let x = i16::from_be_bytes([data[0], data[1]]);
        let z = i16::from_be_bytes([data[2], data[3]]);
        let y = i16::from_be_bytes([data[4], data[5]]);
        Ok([x, y, z])
    }

    /// Calibrated field in gauss.
    pub async fn read_field<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<Vec3, embassy_stm32::i2c::Error> {
        let raw = self.read_raw(i2c).await?;
        Ok(self.correction.apply(raw))
    }

    /// Sample while the vehicle is rotated through all orientations and fit hard/soft-iron
    /// correction from the per-axis extremes.
    pub async fn calibrate<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        samples: u16,
        delay_ms: u16,
    ) -> Result<MagCorrection, embassy_stm32::i2c::Error> {
        let mut min = [i16::MAX; 3];
        let mut max = [i16::MIN; 3];
        for _ in 0..samples {
            let raw = self.read_raw(i2c).await?;
            for axis in 0..3 {
                min[axis] = min[axis].min(raw[axis]);
                max[axis] = max[axis].max(raw[axis]);
            }
            Timer::after_millis(delay_ms as u64).await;
        }
        self.correction = MagCorrection::from_extremes(min, max);
        Ok(self.correction)
    }
}

#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct MagCorrection {
    pub offset: [f32; 3],
    pub scale: [f32; 3],
}

impl MagCorrection {
    pub const IDENTITY: Self = Self {
        offset: [0.0; 3],
        scale: [1.0; 3],
    };

    fn from_extremes(min: [i16; 3], max: [i16; 3]) -> Self {
        let mut offset = [0.0; 3];
        let mut radius = [0.0; 3];
        for axis in 0..3 {
            offset[axis] = (max[axis] as f32 + min[axis] as f32) / 2.0;
            radius[axis] = (max[axis] as f32 - min[axis] as f32) / 2.0;
        }
        if radius.iter().any(|&r| r <= 0.0) {
            return Self::IDENTITY;
        }
        let mean = (radius[0] + radius[1] + radius[2]) / 3.0;
        Self {
            offset,
            scale: radius.map(|r| mean / r),
        }
    }

    fn apply(&self, raw: [i16; 3]) -> Vec3 {
        let axis = |i: usize| (raw[i] as f32 - self.offset[i]) * self.scale[i] / LSB_PER_GAUSS;
        Vec3 {
            x: axis(0),
            y: axis(1),
            z: axis(2),
        }
    }
}
