//! Attitude control law and quad-X mixer.

use crate::config::{CONTROL_PERIOD, MOTOR_COUNT, THRUST_LIMIT};
use crate::state::{AttitudeEstimate, AttitudeSetpoint, ThrustCommand};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdGains {
    pub kp: f32,
    pub kd: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Symmetric bound of the integral term.
    pub i_limit: f32,
}

/// Per-axis scale from controller output to mixer input.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MixerGains {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlParams {
    pub roll: PdGains,
    pub pitch: PdGains,
    pub yaw: PidGains,
    pub mixer: MixerGains,
    pub thrust_min: f32,
    pub thrust_max: f32,
    /// Integration step, seconds.
    pub dt: f32,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            roll: PdGains { kp: 2.0, kd: 0.3 },
            pitch: PdGains { kp: 2.0, kd: 0.3 },
            yaw: PidGains {
                kp: 1.5,
                ki: 0.2,
                kd: 0.1,
                i_limit: 20.0,
            },
            mixer: MixerGains {
                roll: 1.0,
                pitch: 1.0,
                yaw: 1.0,
            },
            thrust_min: 0.0,
            thrust_max: THRUST_LIMIT,
            dt: CONTROL_PERIOD.as_micros() as f32 / 1_000_000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// Contribution of each axis to one motor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorFactor {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rotation: Rotation,
}

/// Quad-X frame, motors 1..4: front-left, front-right, rear-right, rear-left.
/// Diagonal pairs share a rotation direction and a yaw sign.
pub const QUAD_X: [MotorFactor; MOTOR_COUNT] = [
    MotorFactor { roll: 1.0, pitch: 1.0, yaw: -1.0, rotation: Rotation::Clockwise },
    MotorFactor { roll: -1.0, pitch: 1.0, yaw: 1.0, rotation: Rotation::CounterClockwise },
    MotorFactor { roll: -1.0, pitch: -1.0, yaw: -1.0, rotation: Rotation::Clockwise },
    MotorFactor { roll: 1.0, pitch: -1.0, yaw: 1.0, rotation: Rotation::CounterClockwise },
];

/// Combine a base thrust with axis deltas through `table`. No clamping.
pub fn mix(
    table: &[MotorFactor; MOTOR_COUNT],
    base: f32,
    roll: f32,
    pitch: f32,
    yaw: f32,
) -> [f32; MOTOR_COUNT] {
    table.map(|m| base + m.roll * roll + m.pitch * pitch + m.yaw * yaw)
}

/// Wrap an angle difference into (-180, 180].
fn wrap_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Roll/pitch PD plus yaw PID, fed into the quad-X mixer.
pub struct ControlLaw {
    params: ControlParams,
    yaw_integral: f32,
}

impl ControlLaw {
    pub fn new(params: ControlParams) -> Self {
        Self {
            params,
            yaw_integral: 0.0,
        }
    }

    pub fn params(&self) -> &ControlParams {
        &self.params
    }

    pub fn yaw_integral(&self) -> f32 {
        self.yaw_integral
    }

    pub fn reset(&mut self) {
        self.yaw_integral = 0.0;
    }

    /// Thrust at the given throttle fraction with zero attitude error.
    pub fn base_thrust(&self, throttle: f32) -> f32 {
        let p = &self.params;
        let fraction = if throttle.is_nan() { 0.0 } else { throttle.clamp(0.0, 1.0) };
        p.thrust_min + fraction * (p.thrust_max - p.thrust_min)
    }

    /// Run one control cycle. Every output lies in `[thrust_min, thrust_max]`.
    pub fn update(
        &mut self,
        estimate: &AttitudeEstimate,
        setpoint: &AttitudeSetpoint,
        throttle: f32,
    ) -> ThrustCommand {
        let p = self.params;

        let roll_err = setpoint.roll - estimate.roll;
        let pitch_err = setpoint.pitch - estimate.pitch;
        let yaw_err = wrap_degrees(setpoint.yaw - estimate.yaw);

        let roll_out = p.roll.kp * roll_err - p.roll.kd * estimate.roll_rate;
        let pitch_out = p.pitch.kp * pitch_err - p.pitch.kd * estimate.pitch_rate;

        // accumulate, then clamp; a non-finite error must not reach the integrator
        if yaw_err.is_finite() {
            self.yaw_integral += p.yaw.ki * yaw_err * p.dt;
            self.yaw_integral = self.yaw_integral.clamp(-p.yaw.i_limit, p.yaw.i_limit);
        }
        let yaw_out = p.yaw.kp * yaw_err + self.yaw_integral - p.yaw.kd * estimate.yaw_rate;

        let thrust = mix(
            &QUAD_X,
            self.base_thrust(throttle),
            roll_out * p.mixer.roll,
            pitch_out * p.mixer.pitch,
            yaw_out * p.mixer.yaw,
        );

        ThrustCommand(thrust.map(|t| {
            if t.is_nan() {
                p.thrust_min
            } else {
                t.clamp(p.thrust_min, p.thrust_max)
            }
        }))
    }
}

impl Default for ControlLaw {
    fn default() -> Self {
        Self::new(ControlParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn level() -> AttitudeEstimate {
        AttitudeEstimate::default()
    }

    #[test]
    fn zero_error_gives_base_thrust() {
        let mut law = ControlLaw::default();
        let out = law.update(&level(), &AttitudeSetpoint::default(), 0.5);
        for t in out.0 {
            assert_relative_eq!(t, 150.0);
        }
    }

    #[test]
    fn base_thrust_spans_min_to_max() {
        let law = ControlLaw::new(ControlParams {
            thrust_min: 20.0,
            thrust_max: 220.0,
            ..Default::default()
        });
        assert_relative_eq!(law.base_thrust(0.0), 20.0);
        assert_relative_eq!(law.base_thrust(0.25), 70.0);
        assert_relative_eq!(law.base_thrust(1.0), 220.0);
    }

    #[test]
    fn outputs_stay_within_thrust_bounds() {
        let mut law = ControlLaw::new(ControlParams {
            thrust_min: 10.0,
            thrust_max: 200.0,
            ..Default::default()
        });
        let angles = [-90.0, -30.0, -1.0, 0.0, 2.5, 45.0, 179.0];
        let rates = [-500.0, 0.0, 500.0];
        for &a in &angles {
            for &r in &rates {
                for &throttle in &[0.0, 0.3, 1.0] {
                    let est = AttitudeEstimate {
                        roll: a,
                        pitch: -a,
                        yaw: a * 0.5,
                        roll_rate: r,
                        pitch_rate: -r,
                        yaw_rate: r,
                    };
                    let sp = AttitudeSetpoint { roll: -a, pitch: a, yaw: 0.0 };
                    for t in law.update(&est, &sp, throttle).0 {
                        assert!((10.0..=200.0).contains(&t), "thrust {} out of range", t);
                    }
                }
            }
        }
    }

    #[test]
    fn yaw_integrator_saturates_at_limit() {
        let mut law = ControlLaw::default();
        let sp = AttitudeSetpoint { roll: 0.0, pitch: 0.0, yaw: 30.0 };
        for _ in 0..10_000 {
            law.update(&level(), &sp, 0.5);
            assert!(law.yaw_integral().abs() <= 20.0);
        }
        assert_eq!(law.yaw_integral(), 20.0);

        let sp = AttitudeSetpoint { roll: 0.0, pitch: 0.0, yaw: -30.0 };
        for _ in 0..10_000 {
            law.update(&level(), &sp, 0.5);
        }
        assert_eq!(law.yaw_integral(), -20.0);

        law.reset();
        assert_eq!(law.yaw_integral(), 0.0);
    }

    #[test]
    fn non_finite_yaw_does_not_stick_in_the_integrator() {
        let mut law = ControlLaw::default();
        let bad = [
            AttitudeSetpoint { roll: 0.0, pitch: 0.0, yaw: f32::NAN },
            AttitudeSetpoint { roll: 0.0, pitch: 0.0, yaw: f32::INFINITY },
        ];
        for sp in &bad {
            law.update(&level(), sp, 0.5);
            assert_eq!(law.yaw_integral(), 0.0);
        }

        let est = AttitudeEstimate { yaw: f32::NAN, ..level() };
        law.update(&est, &AttitudeSetpoint::default(), 0.5);
        assert_eq!(law.yaw_integral(), 0.0);

        let out = law.update(&level(), &AttitudeSetpoint::default(), 0.5);
        for t in out.0 {
            assert_relative_eq!(t, 150.0);
        }
    }

    #[test]
    fn yaw_error_takes_the_short_way_round() {
        assert_relative_eq!(wrap_degrees(350.0), -10.0);
        assert_relative_eq!(wrap_degrees(-190.0), 170.0);
        assert_relative_eq!(wrap_degrees(180.0), 180.0);
    }

    #[test]
    fn mixer_signs_follow_quad_x() {
        let roll = mix(&QUAD_X, 100.0, 10.0, 0.0, 0.0);
        assert_eq!(roll, [110.0, 90.0, 90.0, 110.0]);

        let pitch = mix(&QUAD_X, 100.0, 0.0, 10.0, 0.0);
        assert_eq!(pitch, [110.0, 110.0, 90.0, 90.0]);

        let yaw = mix(&QUAD_X, 100.0, 0.0, 0.0, 10.0);
        assert_eq!(yaw, [90.0, 110.0, 90.0, 110.0]);
    }

    #[test]
    fn diagonal_pairs_share_rotation() {
        assert_eq!(QUAD_X[0].rotation, QUAD_X[2].rotation);
        assert_eq!(QUAD_X[1].rotation, QUAD_X[3].rotation);
        assert_ne!(QUAD_X[0].rotation, QUAD_X[1].rotation);
        for m in QUAD_X {
            let expected = if m.yaw > 0.0 { Rotation::CounterClockwise } else { Rotation::Clockwise };
            assert_eq!(m.rotation, expected);
        }
    }

    #[test]
    fn positive_roll_error_raises_left_side() {
        let mut law = ControlLaw::default();
        let sp = AttitudeSetpoint { roll: 5.0, pitch: 0.0, yaw: 0.0 };
        let out = law.update(&level(), &sp, 0.5).0;
        assert!(out[0] > out[1]);
        assert!(out[3] > out[2]);
    }
}
