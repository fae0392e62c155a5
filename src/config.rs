//! Configuration of the work cell: arm geometry and limits, motor tables, vision tuning,
//! pick-and-place heights and the serial link. The whole tree is immutable once built
//! and is handed to the components at construction. `Default` is the desktop arm.

use crate::config_error::ConfigError;
use crate::constraints::Constraints;
use crate::computer_vision::calibration::CornerFinder;
use crate::inverse::IkSolver;
use crate::kinematics_impl::DhKinematics;
use crate::parameters::dh_kinematics::JointChain;
use crate::timing::{JointDrive, MotionTimer, MotorConstants, SafetyMargin};
use crate::z_compensation::ZCompensation;
use nalgebra::{Point2, Vector3};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ArmConfig {
    pub chain: JointChain,
    pub constraints: Constraints,
}

#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub drives: [JointDrive; 6],
    pub motor: MotorConstants,
    pub margin: SafetyMargin,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            drives: JointDrive::desktop_arm(),
            motor: MotorConstants::default(),
            margin: SafetyMargin::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionConfig {
    /// Gray levels not above this belong to the calibration marking.
    pub dark_threshold: u8,
    /// Outline simplification tolerance, fraction of the perimeter.
    pub polygon_epsilon: f64,
    pub min_vertices: usize,
    pub max_vertices: usize,
    /// Corner samples needed for a stable calibration.
    pub calibration_samples: usize,
    /// Frames after which an incomplete calibration starts over. Zero waits forever.
    pub calibration_timeout_frames: usize,
    /// Work-cell millimeters of the first four canonical corners.
    pub reference_points: [Point2<f64>; 4],
    pub background_history: usize,
    pub var_threshold: f32,
    pub learning_rate: f64,
    pub morphology_iterations: usize,
    pub foreground_threshold: u8,
    /// Square pixels.
    pub min_contour_area: f64,
    /// Millimeters.
    pub debounce_tolerance: f64,
    pub max_missed_frames: usize,
    /// Frames per second the worker is throttled to.
    pub frame_rate: f64,
    /// Wait before the camera is opened again after a failure.
    pub retry_backoff: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        VisionConfig {
            dark_threshold: 30,
            polygon_epsilon: 0.02,
            min_vertices: 6,
            max_vertices: 8,
            calibration_samples: 150,
            calibration_timeout_frames: 900,
            reference_points: [
                Point2::new(175.0, -5.0),
                Point2::new(185.0, -175.0),
                Point2::new(315.0, -175.0),
                Point2::new(305.0, 0.0),
            ],
            background_history: 500,
            var_threshold: 16.0,
            learning_rate: 0.0001,
            morphology_iterations: 2,
            foreground_threshold: 244,
            min_contour_area: 500.0,
            debounce_tolerance: 2.54,
            max_missed_frames: 30,
            frame_rate: 30.0,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl VisionConfig {
    pub fn corner_finder(&self) -> CornerFinder {
        CornerFinder {
            dark_threshold: self.dark_threshold,
            epsilon_fraction: self.polygon_epsilon,
            vertices: self.min_vertices..=self.max_vertices,
        }
    }

    /// Pause between two frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.frame_rate)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickPlaceConfig {
    /// Height the object is gripped at, millimeters.
    pub grip_height: f64,
    /// Height the object is lifted to before transport.
    pub lift_height: f64,
    pub drop_zone: Vector3<f64>,
    /// Extra wait after a move before the next stage starts.
    pub gripper_settle: Duration,
    /// How long a homing, shutdown, reset or vision initialization trigger stays disabled.
    pub cooldown: Duration,
    /// Measured `(x, z offset)` pairs for the height compensation.
    pub z_samples: Vec<(f64, f64)>,
}

impl Default for PickPlaceConfig {
    fn default() -> Self {
        PickPlaceConfig {
            grip_height: 36.0,
            lift_height: 100.0,
            drop_zone: Vector3::new(215.0, -240.0, 100.0),
            gripper_settle: Duration::from_millis(500),
            cooldown: Duration::from_secs(5),
            z_samples: vec![(100.0, 33.0), (150.0, 36.0), (200.0, 41.0), (250.0, 45.0), (300.0, 51.0), (350.0, 57.0)],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig { port: "/dev/ttyACM0".to_string(), baud_rate: 115200 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CellConfig {
    pub arm: ArmConfig,
    pub motion: MotionConfig,
    pub vision: VisionConfig,
    pub pick_place: PickPlaceConfig,
    pub link: LinkConfig,
}

impl CellConfig {
    pub fn robot(&self) -> DhKinematics {
        DhKinematics::new(self.arm.chain, self.arm.constraints)
    }

    pub fn solver(&self) -> IkSolver {
        IkSolver::new(self.robot())
    }

    pub fn timer(&self) -> MotionTimer {
        MotionTimer::new(self.motion.drives, self.motion.motor, self.motion.margin)
    }

    pub fn z_compensation(&self) -> Result<ZCompensation, ConfigError> {
        ZCompensation::fit(&self.pick_place.z_samples)
    }

    /// Checks values that would make the components misbehave rather than fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidValue(msg));
        let positive = |v: f64| v > 0.0 && v.is_finite();
        for (i, drive) in self.motion.drives.iter().enumerate() {
            if !(positive(drive.max_speed) && positive(drive.max_acceleration) && positive(drive.gear_ratio)) {
                return invalid(format!("J{}: speed, acceleration and gear ratio must be positive", i + 1));
            }
        }
        let m = &self.motion.motor;
        let motor = [
            ("step_angle", m.step_angle),
            ("microstepping", m.microstepping),
            ("stall_torque", m.stall_torque),
            ("power", m.power),
            ("efficiency", m.efficiency),
            ("arm_weight", m.arm_weight),
            ("gravity", m.gravity),
        ];
        if let Some((name, value)) = motor.iter().find(|(_, v)| !positive(*v)) {
            return invalid(format!("motor {} must be positive, got {}", name, value));
        }
        let margin = &self.motion.margin;
        if !(margin.factor >= 1.0 && margin.factor.is_finite()) {
            return invalid(format!("safety factor {} is below 1", margin.factor));
        }
        if !(margin.settle >= 0.0 && margin.settle.is_finite()) {
            return invalid(format!("settle time {} is negative", margin.settle));
        }
        let v = &self.vision;
        if v.min_vertices > v.max_vertices || v.min_vertices < 6 {
            return invalid(format!("vertex range {}..={} must admit 6 corners", v.min_vertices, v.max_vertices));
        }
        if v.calibration_samples == 0 {
            return invalid("calibration needs at least one sample".into());
        }
        if !(v.polygon_epsilon > 0.0 && v.debounce_tolerance >= 0.0 && v.frame_rate >= 0.0) {
            return invalid("polygon epsilon, debounce tolerance and frame rate must be positive".into());
        }
        self.z_compensation().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CellConfig::default();
        config.validate().unwrap();
        assert_eq!(config.vision.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(config.vision.corner_finder(), CornerFinder::default());
    }

    #[test]
    fn test_timer_uses_motion_tables() {
        let mut config = CellConfig::default();
        config.motion.margin = SafetyMargin { factor: 1.0, settle: 2.0 };
        assert!((config.timer().estimate_duration(&[0.0; 6]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = CellConfig::default();
        config.motion.drives[2].gear_ratio = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = CellConfig::default();
        config.motion.margin.settle = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = CellConfig::default();
        config.motion.motor.efficiency = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = CellConfig::default();
        config.vision.max_vertices = 5;
        assert!(config.validate().is_err());

        let mut config = CellConfig::default();
        config.pick_place.z_samples.truncate(2);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLength { .. })));
    }
}
