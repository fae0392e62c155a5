use crate::constraints::Constraints;
use crate::kinematic_traits::{Joints, Kinematics, Pose};
use crate::parameters::dh_kinematics::{DhLink, JointChain};
use nalgebra::{Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Forward kinematics of a serial chain described by Denavit–Hartenberg links.
#[derive(Debug, Clone)]
pub struct DhKinematics {
    pub chain: JointChain,
    pub constraints: Constraints,
}

impl DhKinematics {
    /// Creates a new `DhKinematics` instance with the given chain and joint limits.
    pub fn new(chain: JointChain, constraints: Constraints) -> Self {
        DhKinematics { chain, constraints }
    }

    /// The desktop arm with its own limits.
    pub fn desktop_arm() -> Self {
        DhKinematics::new(JointChain::desktop_arm(), Constraints::desktop_arm())
    }

    /// Homogeneous transform of the whole chain. Links are composed strictly in joint
    /// order: T_i = T_(i-1) * A_i.
    pub fn forward_matrix(&self, qs: &Joints) -> Matrix4<f64> {
        self.chain
            .links
            .iter()
            .zip(qs.iter())
            .fold(Matrix4::identity(), |t, (link, q)| t * link_transform(link, *q))
    }
}

/// Transform contributed by one link when its joint is at `q` (the link's own
/// angular offset is added here).
pub fn link_transform(link: &DhLink, q: f64) -> Matrix4<f64> {
    let (st, ct) = (q + link.theta_offset).sin_cos();
    let (sa, ca) = link.alpha.sin_cos();
    Matrix4::new(
        ct, -st * ca, st * sa, link.a * ct,
        st, ct * ca, -ct * sa, link.a * st,
        0.0, sa, ca, link.d,
        0.0, 0.0, 0.0, 1.0,
    )
}

impl Kinematics for DhKinematics {
    fn forward(&self, qs: &Joints) -> Pose {
        let t = self.forward_matrix(qs);
        let r: Matrix3<f64> = t.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(t[(0, 3)], t[(1, 3)], t[(2, 3)]);
        let rotation = Rotation3::from_matrix_unchecked(r);
        Pose::from_parts(Translation3::from(translation), UnitQuaternion::from_rotation_matrix(&rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematic_traits::{approach_axis, JOINTS_AT_ZERO};
    use std::f64::consts::PI;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_zero_pose() {
        let robot = DhKinematics::desktop_arm();
        let pose = robot.forward(&JOINTS_AT_ZERO);
        let p = pose.translation.vector;
        // 23.42 + 180 ... folded out: the arm points forward along X at zero.
        assert!((p.x - 324.845).abs() < 1e-6, "x = {}", p.x);
        assert!(p.y.abs() < 1e-6, "y = {}", p.y);
        assert!((p.z - 334.0).abs() < 1e-6, "z = {}", p.z);

        let axis = approach_axis(&pose);
        assert!((axis - Vector3::x()).norm() < 1e-9, "axis = {:?}", axis);
    }

    #[test]
    fn test_single_link_transform() {
        let link = DhLink::new(10.0, 0.0, 5.0, 0.0);
        let t = link_transform(&link, PI / 2.0);
        assert!((t[(0, 3)] - 0.0).abs() < EPSILON);
        assert!((t[(1, 3)] - 10.0).abs() < EPSILON);
        assert!((t[(2, 3)] - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_deterministic() {
        let robot = DhKinematics::desktop_arm();
        let joints: Joints = [0.3, -0.2, 0.9, 1.1, -0.4, 2.5];
        let a = robot.forward(&joints);
        let b = robot.forward(&joints);
        assert_eq!(a.translation.vector, b.translation.vector);
        assert_eq!(a.rotation, b.rotation);
    }

    #[test]
    fn test_defined_outside_limits() {
        let robot = DhKinematics::desktop_arm();
        let joints: Joints = [4.0, -3.0, 5.0, 10.0, -7.0, 20.0];
        assert!(!robot.constraints.compliant(&joints));
        let pose = robot.forward(&joints);
        assert!(pose.translation.vector.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_base_rotation_turns_reach() {
        // Rotating the base by 90 degrees swings the reach from X to Y, height unchanged.
        let robot = DhKinematics::desktop_arm();
        let p0 = robot.forward(&JOINTS_AT_ZERO).translation.vector;
        let p1 = robot.forward(&[PI / 2.0, 0.0, 0.0, 0.0, 0.0, 0.0]).translation.vector;
        assert!(p1.x.abs() < 1e-6);
        assert!((p1.y - p0.x).abs() < 1e-6);
        assert!((p1.z - p0.z).abs() < 1e-6);
    }
}
