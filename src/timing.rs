//! Predicts how long the steppers need to execute a joint move.
//!
//! Each joint follows a trapezoidal velocity profile (or a triangular one for moves too
//! short to reach cruise speed). The acceleration the firmware is configured with is
//! derated by how much torque the motor can actually deliver against the load. All
//! joints move concurrently, so the move takes as long as the slowest joint, plus a
//! safety margin. This is a prediction only: the controller never reports completion.

use std::time::Duration;

/// Upper bound of a predicted move. Longer estimates mean the motors cannot move the arm.
pub const LONGEST_MOVE: Duration = Duration::from_secs(3600);

/// Which share of the arm weight a joint has to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorqueTier {
    /// Shoulder and elbow joints (J1..J3).
    Base,
    /// Wrist joints (J4..J6).
    Wrist,
}

impl TorqueTier {
    pub fn load_share(&self) -> f64 {
        match self {
            TorqueTier::Base => 0.7,
            TorqueTier::Wrist => 0.1,
        }
    }
}

/// Firmware motion settings of one joint, in motor-native units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDrive {
    /// Steps per second.
    pub max_speed: f64,
    /// Steps per second squared.
    pub max_acceleration: f64,
    pub gear_ratio: f64,
    pub tier: TorqueTier,
}

impl JointDrive {
    pub const fn new(max_speed: f64, max_acceleration: f64, gear_ratio: f64, tier: TorqueTier) -> Self {
        JointDrive { max_speed, max_acceleration, gear_ratio, tier }
    }

    /// Drives of the desktop arm.
    pub fn desktop_arm() -> [JointDrive; 6] {
        use TorqueTier::*;
        [
            JointDrive::new(6000.0, 8000.0, 6.4, Base),
            JointDrive::new(12000.0, 8000.0, 20.0, Base),
            JointDrive::new(14000.0, 8000.0, 18.0952381, Base),
            JointDrive::new(8000.0, 8000.0, 4.0, Wrist),
            JointDrive::new(10000.0, 8000.0, 4.0, Wrist),
            JointDrive::new(12000.0, 8000.0, 10.0, Wrist),
        ]
    }
}

/// Motor and load constants shared by all joints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorConstants {
    /// Full step angle, degrees.
    pub step_angle: f64,
    pub microstepping: f64,
    /// Holding torque of one motor, N·m.
    pub stall_torque: f64,
    /// Supply power, W.
    pub power: f64,
    pub efficiency: f64,
    /// kg
    pub arm_weight: f64,
    pub gravity: f64,
}

impl Default for MotorConstants {
    fn default() -> Self {
        MotorConstants {
            step_angle: 1.8,
            microstepping: 16.0,
            stall_torque: 0.5,
            power: 350.0,
            efficiency: 0.7,
            arm_weight: 3.0,
            gravity: 9.81,
        }
    }
}

/// Predicted time is `slowest * factor + settle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyMargin {
    pub factor: f64,
    /// Seconds.
    pub settle: f64,
}

impl Default for SafetyMargin {
    fn default() -> Self {
        SafetyMargin { factor: 1.4, settle: 0.5 }
    }
}

#[derive(Debug, Clone)]
pub struct MotionTimer {
    pub drives: [JointDrive; 6],
    pub motor: MotorConstants,
    pub margin: SafetyMargin,
}

impl MotionTimer {
    pub fn new(drives: [JointDrive; 6], motor: MotorConstants, margin: SafetyMargin) -> Self {
        MotionTimer { drives, motor, margin }
    }

    pub fn desktop_arm() -> Self {
        MotionTimer::new(JointDrive::desktop_arm(), MotorConstants::default(), SafetyMargin::default())
    }

    /// Joint degrees per motor step.
    fn degrees_per_step(&self, drive: &JointDrive) -> f64 {
        self.motor.step_angle / (drive.gear_ratio * self.motor.microstepping)
    }

    /// Cruise speed of the joint, degrees per second.
    pub fn angular_speed(&self, drive: &JointDrive) -> f64 {
        drive.max_speed * self.degrees_per_step(drive)
    }

    /// Torque the joint needs to hold its share of the arm, N·m.
    pub fn required_torque(&self, drive: &JointDrive) -> f64 {
        self.motor.arm_weight * self.motor.gravity * drive.tier.load_share()
    }

    /// Configured acceleration in degrees per second squared, scaled down when the motor
    /// cannot deliver the torque the joint requires.
    pub fn derated_acceleration(&self, drive: &JointDrive) -> f64 {
        let speed = self.angular_speed(drive);
        let acceleration = drive.max_acceleration * self.degrees_per_step(drive);
        let available = (self.motor.stall_torque * drive.gear_ratio)
            .min(self.motor.power * self.motor.efficiency / speed);
        let ratio = (available / self.required_torque(drive)).min(1.0);
        acceleration * ratio
    }

    /// Time of the velocity profile for one joint, without safety margin.
    pub fn joint_time(&self, joint: usize, angle: f64) -> f64 {
        let drive = &self.drives[joint];
        profile_time(angle, self.angular_speed(drive), self.derated_acceleration(drive))
    }

    /// Predicted duration, seconds, of a move where joint `i` turns by `deltas[i]` degrees.
    pub fn estimate_duration(&self, deltas: &[f64; 6]) -> f64 {
        let slowest = (0..6)
            .map(|i| self.joint_time(i, deltas[i]))
            .fold(0.0, f64::max);
        slowest * self.margin.factor + self.margin.settle
    }

    /// Duration of the move between two sets of dispatched angles (degrees), saturated
    /// to `0..=LONGEST_MOVE`.
    pub fn estimate_between(&self, from: &[f64; 6], to: &[f64; 6]) -> Duration {
        let deltas: [f64; 6] = std::array::from_fn(|i| to[i] - from[i]);
        let seconds = self.estimate_duration(&deltas);
        match Duration::try_from_secs_f64(seconds) {
            Ok(duration) => duration.min(LONGEST_MOVE),
            Err(_) if seconds < 0.0 => Duration::ZERO,
            Err(_) => {
                tracing::warn!("Predicted move time {} s is unusable, assuming {:?}", seconds, LONGEST_MOVE);
                LONGEST_MOVE
            }
        }
    }
}

/// Trapezoidal velocity profile time law. Falls back to the triangular profile when
/// the move is too short to reach `speed`.
pub fn profile_time(angle: f64, speed: f64, acceleration: f64) -> f64 {
    let angle = angle.abs();
    let ramp_time = speed / acceleration;
    let ramp_distance = 0.5 * acceleration * ramp_time * ramp_time;
    if 2.0 * ramp_distance < angle {
        2.0 * ramp_time + (angle - 2.0 * ramp_distance) / speed
    } else {
        2.0 * (angle / acceleration).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangular_profile() {
        // Ramp needs 2 * 0.5 * 10 * 1^2 = 10 degrees, more than the move.
        let t = profile_time(4.0, 10.0, 10.0);
        assert!((t - 2.0 * (0.4f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoidal_profile() {
        // 1 s to reach speed, 5 degrees per ramp, 90 degrees cruising at 10 deg/s.
        let t = profile_time(100.0, 10.0, 10.0);
        assert!((t - 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_sign_does_not_matter() {
        assert_eq!(profile_time(-37.0, 20.0, 15.0), profile_time(37.0, 20.0, 15.0));
    }

    #[test]
    fn test_profiles_meet_at_the_switch_point() {
        let (speed, acceleration) = (10.0, 10.0);
        let switch = speed * speed / acceleration; // 2 * ramp distance
        let below = profile_time(switch - 1e-9, speed, acceleration);
        let above = profile_time(switch + 1e-9, speed, acceleration);
        assert!((below - above).abs() < 1e-6);
    }

    #[test]
    fn test_j1_derating() {
        let timer = MotionTimer::desktop_arm();
        let j1 = timer.drives[0];
        let speed = timer.angular_speed(&j1);
        assert!((speed - 105.46875).abs() < 1e-9);
        // Power limited: 350 * 0.7 / 105.47 = 2.323 N·m, against 3 * 9.81 * 0.7 = 20.601 required.
        let expected = 140.625 * (245.0 / 105.46875) / 20.601;
        assert!((timer.derated_acceleration(&j1) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_torque_ratio_never_boosts() {
        // A very strong motor must not accelerate faster than configured.
        let motor = MotorConstants { stall_torque: 1000.0, power: 1e9, ..Default::default() };
        let timer = MotionTimer::new(JointDrive::desktop_arm(), motor, SafetyMargin::default());
        for drive in &timer.drives {
            let configured = drive.max_acceleration * 1.8 / (drive.gear_ratio * 16.0);
            assert!((timer.derated_acceleration(drive) - configured).abs() < 1e-9);
        }
    }

    #[test]
    fn test_slowest_joint_wins() {
        let timer = MotionTimer::new(JointDrive::desktop_arm(), MotorConstants::default(),
                                     SafetyMargin { factor: 1.0, settle: 0.0 });
        let deltas = [10.0, 0.0, 0.0, 0.0, 0.0, 50.0];
        let expected = timer.joint_time(0, 10.0).max(timer.joint_time(5, 50.0));
        assert_eq!(timer.estimate_duration(&deltas), expected);
    }

    #[test]
    fn test_estimate_between_saturates() {
        let from = [0.0; 6];
        let to = [30.0, 0.0, 0.0, 0.0, 0.0, 0.0];

        let early = MotionTimer::new(JointDrive::desktop_arm(), MotorConstants::default(),
                                     SafetyMargin { factor: 1.0, settle: -1000.0 });
        assert_eq!(early.estimate_between(&from, &to), Duration::ZERO);

        // Without power the acceleration is zero and the profile time is not finite.
        let stalled = MotorConstants { power: 0.0, ..Default::default() };
        let timer = MotionTimer::new(JointDrive::desktop_arm(), stalled, SafetyMargin::default());
        assert!(!timer.estimate_duration(&[30.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_finite());
        assert_eq!(timer.estimate_between(&from, &to), LONGEST_MOVE);
        // Joints that do not move take no time, whatever the motor.
        assert_eq!(timer.estimate_between(&from, &from), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn test_no_move_takes_only_settle_time() {
        let timer = MotionTimer::desktop_arm();
        assert!((timer.estimate_duration(&[0.0; 6]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_in_angle() {
        let timer = MotionTimer::desktop_arm();
        for joint in 0..6 {
            let mut previous = 0.0;
            for step in 0..2000 {
                let mut deltas = [0.0; 6];
                deltas[joint] = step as f64 * 0.5;
                let t = timer.estimate_duration(&deltas);
                assert!(t >= previous, "joint {} at {} deg: {} < {}", joint, deltas[joint], t, previous);
                previous = t;
            }
        }
    }

    #[test]
    fn test_margin_factor_scales_exactly() {
        let single = MotionTimer::new(JointDrive::desktop_arm(), MotorConstants::default(),
                                      SafetyMargin { factor: 1.4, settle: 0.0 });
        let double = MotionTimer::new(JointDrive::desktop_arm(), MotorConstants::default(),
                                      SafetyMargin { factor: 2.8, settle: 0.0 });
        let deltas = [30.0, -12.0, 45.0, 5.0, -80.0, 120.0];
        let a = single.estimate_duration(&deltas);
        let b = double.estimate_duration(&deltas);
        assert!((b - 2.0 * a).abs() < 1e-12 * b);
    }

    #[test]
    fn test_estimate_between() {
        let timer = MotionTimer::desktop_arm();
        let from = [10.0, 0.0, 0.0, 0.0, 0.0, -10.0];
        let to = [40.0, 0.0, 0.0, 0.0, 0.0, -40.0];
        let d = timer.estimate_between(&from, &to);
        let expected = timer.estimate_duration(&[30.0, 0.0, 0.0, 0.0, 0.0, -30.0]);
        assert!((d.as_secs_f64() - expected).abs() < 1e-9);
    }
}
