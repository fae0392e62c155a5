extern crate nalgebra as na;

use na::{Isometry3, Vector3};

/// Pose is used a pose of the gripper. It contains both Cartesian position (millimeters)
/// and rotation quaternion.
/// ```
/// extern crate nalgebra as na;
/// use na::{Isometry3, Translation3, UnitQuaternion};
///
/// type Pose = Isometry3<f64>;
///
/// let translation = Translation3::new(200.0, -100.0, 40.0);
/// let rotation = UnitQuaternion::identity();
/// let pose = Pose::from_parts(translation, rotation);
/// ```
pub type Pose = Isometry3<f64>;

/// Six joint angles of the arm in radians, base joint first.
pub type Joints = [f64; 6];

/// The pose the arm returns to after homing, shutdown or reset.
pub const JOINTS_AT_ZERO: Joints = [0.0; 6];

/// Gripper approach direction requested by the position-and-orientation IK: straight down.
pub const APPROACH_DOWN: Vector3<f64> = Vector3::new(0.0, 0.0, -1.0);

pub trait Kinematics: Send + Sync {
    /// Find the pose of the gripper for the given joint angles. Defined for any finite
    /// joint values, including angles outside of the joint limits.
    fn forward(&self, qs: &Joints) -> Pose;
}

/// Approach axis of the gripper: the Z column of the pose rotation.
pub fn approach_axis(pose: &Pose) -> Vector3<f64> {
    pose.rotation * Vector3::z()
}
