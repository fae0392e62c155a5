//! Supports reading the cell configuration from YAML file (optional)

use std::path::Path;
use std::time::Duration;
use nalgebra::{Point2, Vector3};
use serde::Deserialize;
use serde_saphyr::Options;

use crate::config::CellConfig;
use crate::config_error::ConfigError;
use crate::constraints::Constraints;
use crate::parameters::dh_kinematics::{DhLink, JointChain};
use crate::timing::{JointDrive, TorqueTier};

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Tier {
    Base,
    Wrist,
}

#[derive(Deserialize)]
struct Drive {
    max_speed: f64,
    max_acceleration: f64,
    gear_ratio: f64,
    tier: Tier,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Arm {
    /// Rows of [a, alpha, d, theta_offset], angles in radians or deg(..)
    dh_chain: Option<Vec<[f64; 4]>>,
    /// Rows of [min, max] in degrees
    joint_limits: Option<Vec<[f64; 2]>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Motor {
    step_angle: Option<f64>,
    microstepping: Option<f64>,
    stall_torque: Option<f64>,
    power: Option<f64>,
    efficiency: Option<f64>,
    arm_weight: Option<f64>,
    gravity: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Motion {
    joints: Option<Vec<Drive>>,
    motor: Motor,
    safety_factor: Option<f64>,
    /// seconds
    settle_time: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Vision {
    dark_threshold: Option<u8>,
    polygon_epsilon: Option<f64>,
    min_vertices: Option<usize>,
    max_vertices: Option<usize>,
    calibration_samples: Option<usize>,
    calibration_timeout_frames: Option<usize>,
    reference_points: Option<Vec<[f64; 2]>>,
    background_history: Option<usize>,
    var_threshold: Option<f32>,
    learning_rate: Option<f64>,
    morphology_iterations: Option<usize>,
    foreground_threshold: Option<u8>,
    min_contour_area: Option<f64>,
    debounce_tolerance: Option<f64>,
    max_missed_frames: Option<usize>,
    frame_rate: Option<f64>,
    retry_backoff: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PickPlace {
    grip_height: Option<f64>,
    lift_height: Option<f64>,
    drop_zone: Option<[f64; 3]>,
    gripper_settle: Option<f64>,
    cooldown: Option<f64>,
    z_samples: Option<Vec<[f64; 2]>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Link {
    port: Option<String>,
    baud_rate: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Root {
    arm: Arm,
    motion: Motion,
    vision: Vision,
    pick_place: PickPlace,
    link: Link,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a non negative number of seconds (got {})", field, value)))
}

/// Convert a vector to an array of exactly `N` rows.
fn exact<T, const N: usize>(v: Vec<T>, field: &'static str) -> Result<[T; N], ConfigError> {
    let found = v.len();
    v.try_into().map_err(|_| ConfigError::InvalidLength { field, expected: N, found })
}

impl CellConfig {
    /// Read the cell configuration from YAML file. Every section and every field is
    /// optional; missing values keep the defaults of the desktop arm:
    /// ```yaml
    /// arm:
    ///   dh_chain: # [a, alpha, d, theta_offset]
    ///     - [23.42, deg(-90), 110.5, 0]
    ///     - [180, deg(180), 0, deg(-90)]
    ///     - [-43.5, deg(90), 0, deg(180)]
    ///     - [0, deg(-90), -176.35, 0]
    ///     - [0, deg(90), 0, 0]
    ///     - [0, deg(180), -125.075, deg(180)]
    ///   joint_limits: # degrees
    ///     - [-123.046875, 123.046875]
    ///     - [-55.0088, 86.625]
    ///     - [-72.134, 107.8675]
    ///     - [-105.46975, 105.46975]
    ///     - [-90, 90]
    ///     - [-360, 360]
    /// motion:
    ///   safety_factor: 1.4
    ///   settle_time: 0.5
    /// pick_place:
    ///   drop_zone: [215, -240, 100]
    /// link:
    ///   port: /dev/ttyACM0
    ///   baud_rate: 115200
    /// ```
    /// YAML extension to parse the deg(angle) function is supported (serde_saphyr).
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let root: Root = serde_saphyr::from_str_with_options(
            contents,
            Options { angle_conversions: true, ..Default::default() },
        ).map_err(|e| ConfigError::ParseError(format!("{}", e)))?;

        let mut config = CellConfig::default();

        if let Some(rows) = root.arm.dh_chain {
            let rows: [[f64; 4]; 6] = exact(rows, "arm.dh_chain")?;
            config.arm.chain = JointChain::new(rows.map(|[a, alpha, d, theta]| DhLink::new(a, alpha, d, theta)));
        }
        if let Some(rows) = root.arm.joint_limits {
            let rows: [[f64; 2]; 6] = exact(rows, "arm.joint_limits")?;
            config.arm.constraints = Constraints::from_degrees(rows.map(|r| r[0]), rows.map(|r| r[1]));
        }

        let motion = root.motion;
        if let Some(joints) = motion.joints {
            let joints: [Drive; 6] = exact(joints, "motion.joints")?;
            config.motion.drives = joints.map(|d| {
                let tier = match d.tier {
                    Tier::Base => TorqueTier::Base,
                    Tier::Wrist => TorqueTier::Wrist,
                };
                JointDrive::new(d.max_speed, d.max_acceleration, d.gear_ratio, tier)
            });
        }
        let motor = &mut config.motion.motor;
        set(&mut motor.step_angle, motion.motor.step_angle);
        set(&mut motor.microstepping, motion.motor.microstepping);
        set(&mut motor.stall_torque, motion.motor.stall_torque);
        set(&mut motor.power, motion.motor.power);
        set(&mut motor.efficiency, motion.motor.efficiency);
        set(&mut motor.arm_weight, motion.motor.arm_weight);
        set(&mut motor.gravity, motion.motor.gravity);
        set(&mut config.motion.margin.factor, motion.safety_factor);
        set(&mut config.motion.margin.settle, motion.settle_time);

        let vision = root.vision;
        let v = &mut config.vision;
        set(&mut v.dark_threshold, vision.dark_threshold);
        set(&mut v.polygon_epsilon, vision.polygon_epsilon);
        set(&mut v.min_vertices, vision.min_vertices);
        set(&mut v.max_vertices, vision.max_vertices);
        set(&mut v.calibration_samples, vision.calibration_samples);
        set(&mut v.calibration_timeout_frames, vision.calibration_timeout_frames);
        if let Some(points) = vision.reference_points {
            let points: [[f64; 2]; 4] = exact(points, "vision.reference_points")?;
            v.reference_points = points.map(|[a, b]| Point2::new(a, b));
        }
        set(&mut v.background_history, vision.background_history);
        set(&mut v.var_threshold, vision.var_threshold);
        set(&mut v.learning_rate, vision.learning_rate);
        set(&mut v.morphology_iterations, vision.morphology_iterations);
        set(&mut v.foreground_threshold, vision.foreground_threshold);
        set(&mut v.min_contour_area, vision.min_contour_area);
        set(&mut v.debounce_tolerance, vision.debounce_tolerance);
        set(&mut v.max_missed_frames, vision.max_missed_frames);
        set(&mut v.frame_rate, vision.frame_rate);
        if let Some(backoff) = vision.retry_backoff {
            v.retry_backoff = seconds("vision.retry_backoff", backoff)?;
        }

        let pick = root.pick_place;
        let p = &mut config.pick_place;
        set(&mut p.grip_height, pick.grip_height);
        set(&mut p.lift_height, pick.lift_height);
        if let Some([x, y, z]) = pick.drop_zone {
            p.drop_zone = Vector3::new(x, y, z);
        }
        if let Some(settle) = pick.gripper_settle {
            p.gripper_settle = seconds("pick_place.gripper_settle", settle)?;
        }
        if let Some(cooldown) = pick.cooldown {
            p.cooldown = seconds("pick_place.cooldown", cooldown)?;
        }
        if let Some(samples) = pick.z_samples {
            p.z_samples = samples.into_iter().map(|[x, z]| (x, z)).collect();
        }

        set(&mut config.link.port, root.link.port);
        set(&mut config.link.baud_rate, root.link.baud_rate);

        config.validate()?;
        Ok(config)
    }
}
