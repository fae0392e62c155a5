//! Numeric inverse kinematics.
//!
//! The arm has no closed-form solution worth the trouble (offset wrist, stepper limits),
//! so the joint angles are found by bounded minimization of
//!
//! ```text
//! |p(q) - target|^2 + 10 |z(q) - (0, 0, -1)|^2 + 0.1 * sum w_i (q_i - prev_i)^2
//! ```
//!
//! where `p` is the gripper position and `z` its approach axis. The orientation term is
//! dropped for unrestricted moves. The search starts at the previous joint state, so the
//! solution is the local minimum closest to where the arm already is.

use crate::kinematic_traits::{approach_axis, Joints, Kinematics, APPROACH_DOWN};
use crate::kinematics_impl::DhKinematics;
use crate::minimizer::{BoundedMinimizer, ProjectedLbfgs};
use crate::utils::transition_costs;
use nalgebra::Vector3;
use std::sync::Arc;

/// Weight of each joint in the continuity penalty. Heavier joints cost more to move.
pub const JOINT_WEIGHTS: Joints = [1.0, 1.1, 0.9, 1.4, 0.8, 1.0];

/// Weight of the approach axis term.
pub const ORIENTATION_WEIGHT: f64 = 10.0;

/// Weight of the joint continuity term.
pub const CONTINUITY_WEIGHT: f64 = 0.1;

/// Result of one solve. `joints` is always within the joint limits, even if the optimizer
/// did not converge. Callers that need a hard accuracy guarantee must check `position_error`.
#[derive(Debug, Clone, Copy)]
pub struct IkSolution {
    pub joints: Joints,
    pub cost: f64,
    /// Distance between the reached and the requested position, millimeters.
    pub position_error: f64,
    /// Angle between the reached approach axis and straight down, radians.
    pub approach_error: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub struct IkSolver {
    pub robot: DhKinematics,
    minimizer: Arc<dyn BoundedMinimizer>,
}

impl IkSolver {
    pub fn new(robot: DhKinematics) -> Self {
        IkSolver { robot, minimizer: Arc::new(ProjectedLbfgs::default()) }
    }

    /// Use another bounded minimizer instead of the default projected L-BFGS.
    pub fn with_minimizer(robot: DhKinematics, minimizer: Arc<dyn BoundedMinimizer>) -> Self {
        IkSolver { robot, minimizer }
    }

    /// Scalar cost of the joint configuration `qs` for the given request.
    pub fn cost(&self, qs: &Joints, target: &Vector3<f64>, previous: &Joints, restricted: bool) -> f64 {
        let pose = self.robot.forward(qs);
        let position = (pose.translation.vector - target).norm_squared();
        let orientation = if restricted {
            ORIENTATION_WEIGHT * (approach_axis(&pose) - APPROACH_DOWN).norm_squared()
        } else {
            0.0
        };
        position + orientation + CONTINUITY_WEIGHT * transition_costs(previous, qs, &JOINT_WEIGHTS)
    }

    /// Find joint angles that place the gripper at `target`, starting the search from
    /// `previous`. With `restricted` the gripper is also pulled to point straight down.
    pub fn solve(&self, target: &Vector3<f64>, previous: &Joints, restricted: bool) -> IkSolution {
        let cost = |qs: &Joints| self.cost(qs, target, previous, restricted);
        let minimum = self.minimizer.minimize(&cost, &self.robot.constraints, previous);

        let pose = self.robot.forward(&minimum.x);
        let position_error = (pose.translation.vector - target).norm();
        let approach_error = approach_axis(&pose).angle(&APPROACH_DOWN);

        if !minimum.converged {
            tracing::warn!(
                "IK did not converge after {} iterations, position error {:.3} mm",
                minimum.iterations,
                position_error
            );
        }
        tracing::debug!(
            "IK to ({:.1}, {:.1}, {:.1}) restricted={} in {} iterations, error {:.4} mm",
            target.x, target.y, target.z, restricted, minimum.iterations, position_error
        );

        IkSolution {
            joints: minimum.x,
            cost: minimum.value,
            position_error,
            approach_error,
            iterations: minimum.iterations,
            converged: minimum.converged,
        }
    }
}
