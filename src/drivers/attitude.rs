use micromath::F32Ext;

use ikarus_fc::state::{AttitudeEstimate, Vec3};

/// Complementary attitude filter.
///
/// Gyro rates are integrated and pulled towards the accelerometer tilt and the tilt-compensated
/// magnetometer heading. Angles in degrees.
pub struct ComplementaryFilter {
    /// Weight of the integrated gyro angle, 0..1.
    alpha: f32,
    roll: f32,
    pitch: f32,
    yaw: f32,
    initialised: bool,
}

impl ComplementaryFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            initialised: false,
        }
    }

    pub fn update(&mut self, dt: f32, acc: &Vec3, gyr: &Vec3, mag: &Vec3) -> AttitudeEstimate {
        let acc_norm = (acc.x * acc.x + acc.y * acc.y + acc.z * acc.z).sqrt();
        let (acc_roll, acc_pitch) = if acc_norm > 0.0 {
            (
                acc.y.atan2(acc.z).to_degrees(),
                (-acc.x).atan2((acc.y * acc.y + acc.z * acc.z).sqrt()).to_degrees(),
            )
        } else {
            (self.roll, self.pitch)
        };

        if !self.initialised {
            self.roll = acc_roll;
            self.pitch = acc_pitch;
            self.yaw = heading(self.roll, self.pitch, mag).unwrap_or(0.0);
            self.initialised = true;
        } else {
            let a = self.alpha;
            self.roll = a * (self.roll + gyr.x * dt) + (1.0 - a) * acc_roll;
            self.pitch = a * (self.pitch + gyr.y * dt) + (1.0 - a) * acc_pitch;

            let gyro_yaw = wrap(self.yaw + gyr.z * dt);
            self.yaw = match heading(self.roll, self.pitch, mag) {
                Some(mag_yaw) => wrap(gyro_yaw + (1.0 - a) * wrap(mag_yaw - gyro_yaw)),
                None => gyro_yaw,
            };
        }

        AttitudeEstimate {
            roll: self.roll,
            pitch: self.pitch,
            yaw: self.yaw,
            roll_rate: gyr.x,
            pitch_rate: gyr.y,
            yaw_rate: gyr.z,
        }
    }
}

/// Tilt-compensated heading in degrees, `None` without a field reading.
fn heading(roll_deg: f32, pitch_deg: f32, mag: &Vec3) -> Option<f32> {
    if mag.x == 0.0 && mag.y == 0.0 && mag.z == 0.0 {
        return None;
    }
    let (sr, cr) = (roll_deg.to_radians().sin(), roll_deg.to_radians().cos());
    let (sp, cp) = (pitch_deg.to_radians().sin(), pitch_deg.to_radians().cos());
    let xh = mag.x * cp + mag.y * sr * sp + mag.z * cr * sp;
    let yh = mag.y * cr - mag.z * sr;
    Some((-yh).atan2(xh).to_degrees())
}

fn wrap(angle: f32) -> f32 {
    if angle > 180.0 {
        angle - 360.0
    } else if angle <= -180.0 {
        angle + 360.0
    } else {
        angle
    }
}
