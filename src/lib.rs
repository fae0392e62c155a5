//! Kinematics, motion timing and camera localization for a 6 axis desktop pick-and-place arm.
//!
//! The arm is described by a Denavit–Hartenberg chain. Inverse kinematics is solved
//! numerically as a bounded minimization: the cost pulls the gripper to the target
//! position, optionally points it straight down, and keeps the joints close to where
//! they were. How long a move takes is predicted from a trapezoidal velocity profile
//! per joint, with the acceleration derated by the torque the motors can deliver.
//!
//! A camera looks at the work cell. The vision pipeline first calibrates on a dark
//! hexagonal floor marking, taking the median of many detections, then tracks a newly
//! placed object with background subtraction and reports its position in millimeters
//! through a perspective map fitted on four of the marking corners.
//!
//! The pick cycle (approach, grip, lift, move to the drop zone, release) is open loop:
//! the controller never answers, so each step starts when the predicted duration of the
//! previous move is over.
//!
//! # Features
//!
//! - Forward kinematics by plain DH composition, IK with projected L-BFGS and a
//!   finite-difference gradient computed in parallel. Solutions always respect the joint
//!   limits, even when the minimizer does not converge.
//! - Motion timing under torque limits, with a configurable safety margin.
//! - Pure Rust image processing on `image` buffers: contour tracing, polygon
//!   simplification, morphology and an adaptive background model.
//! - A vision worker thread publishing into a latest-value slot and a control session
//!   that never waits for it.
//! - Frames from a directory of images, or live from a V4L2 camera (feature `camera`).
//! - The line protocol of the motor controller, over a serial port (feature `serial`).
//! - Configuration from YAML (feature `allow_filesystem`), with the desktop arm as default.
//!
//! ## Example
//!
//! ```no_run
//! use nalgebra::Vector3;
//! use rs_pick_cell::config::CellConfig;
//! use rs_pick_cell::kinematic_traits::{Kinematics, JOINTS_AT_ZERO};
//! use rs_pick_cell::utils::dump_joints;
//!
//! let config = CellConfig::default();
//! let solver = config.solver();
//! let solution = solver.solve(&Vector3::new(200.0, -100.0, 40.0), &JOINTS_AT_ZERO, true);
//! dump_joints(&solution.joints);
//! let pose = solver.robot.forward(&solution.joints);
//! println!("reached {:?}, error {:.3} mm", pose.translation.vector, solution.position_error);
//! ```

pub mod parameters;

#[path = "utils/utils.rs"]
pub mod utils;
pub mod kinematic_traits;
pub mod kinematics_impl;

pub mod constraints;

pub mod minimizer;
pub mod inverse;

pub mod timing;
pub mod z_compensation;

pub mod config;
pub mod config_error;

#[cfg(feature = "allow_filesystem")]
pub mod config_from_file;

pub mod computer_vision {
    //! Localization of the object in the work cell.
    pub mod contours;
    pub mod calibration;
    pub mod perspective;
    pub mod background;
    pub mod tracker;
    pub mod pipeline;
    pub mod overlay;
    pub mod source;
    #[cfg(feature = "camera")]
    pub mod camera;
    pub mod worker;
}

pub mod latest;
pub mod scheduler;
pub mod hardware_link;
pub mod orchestrator;
pub mod control;
pub mod session;

#[cfg(test)]
mod tests;
