//! Helper functions

use crate::kinematic_traits::{Joints, Pose};

/// Checks if all elements in the array are finite
pub fn is_valid(qs: &Joints) -> bool {
    qs.iter().all(|&q| q.is_finite())
}

/// Convert joints that are array of f64's in radians to
/// array of f64's in degrees
pub fn to_degrees(angles: &Joints) -> [f64; 6] {
    angles.map(f64::to_degrees)
}

/// Allows to specify joint values in degrees (converts to radians)
pub fn as_radians(degrees: [f64; 6]) -> Joints {
    degrees.map(f64::to_radians)
}

/// Print joint values, converting radians to degrees.
pub fn dump_joints(joints: &Joints) {
    println!("[{}]", format_joints(joints));
}

/// Joint values in degrees, space separated.
pub fn format_joints(joints: &Joints) -> String {
    joints
        .iter()
        .map(|q| format!("{:7.2}", q.to_degrees()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn dump_pose(pose: &Pose) {
    let t = pose.translation.vector;
    let r = pose.rotation;
    println!(
        "x: {:.3}, y: {:.3}, z: {:.3},  quat: {:.5},{:.5},{:.5},{:.5}",
        t.x, t.y, t.z, r.i, r.j, r.k, r.w
    );
}

/// Weighted squared joint change between two poses of the arm. Rotating heavy
/// base joints is usually weighted as more expensive.
pub fn transition_costs(from: &Joints, to: &Joints, coefficients: &Joints) -> f64 {
    (0..6)
        .map(|i| coefficients[i] * (to[i] - from[i]).powi(2))
        .sum()
}

/// formatting for YAML output
pub(crate) fn deg(x: &f64) -> String {
    if *x == 0.0 {
        return "0".to_string();
    }
    format!("deg({:.4})", x.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_is_valid_with_all_finite() {
        let qs = [0.0, 1.0, -1.0, 0.5, -0.5, PI];
        assert!(is_valid(&qs));
    }

    #[test]
    fn test_is_valid_with_nan() {
        let qs = [0.0, f64::NAN, 1.0, -1.0, 0.5, -0.5];
        assert!(!is_valid(&qs));
    }

    #[test]
    fn test_transition_costs() {
        let from = [0.0; 6];
        let to = [1.0, 2.0, 0.0, 0.0, 0.0, -1.0];
        let weights = [1.0, 1.1, 0.9, 1.4, 0.8, 1.0];
        let cost = transition_costs(&from, &to, &weights);
        assert!((cost - (1.0 + 4.4 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_degrees_round_trip() {
        let degrees = [90.0, -45.0, 0.0, 180.0, 30.0, -360.0];
        let back = to_degrees(&as_radians(degrees));
        for i in 0..6 {
            assert!((back[i] - degrees[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deg_formatting() {
        assert_eq!(deg(&0.0), "0");
        assert_eq!(deg(&PI), "deg(180.0000)");
    }
}
