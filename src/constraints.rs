//! Joint limits. Unlike industrial arms, the stepper joints here do not wrap around:
//! every limit is a plain closed interval and J6 may travel more than a full turn.

use crate::kinematic_traits::Joints;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraints {
    /// Lower limit, radians
    pub from: Joints,

    /// Upper limit, radians
    pub to: Joints,
}

impl Constraints {
    /// Build constraints from limits in radians. Reversed pairs are swapped so that
    /// `from <= to` always holds.
    pub fn new(from: Joints, to: Joints) -> Self {
        let mut lower = from;
        let mut upper = to;
        for i in 0..6 {
            if lower[i] > upper[i] {
                std::mem::swap(&mut lower[i], &mut upper[i]);
            }
        }
        Constraints { from: lower, to: upper }
    }

    /// Build constraints from limits given in degrees.
    pub fn from_degrees(from: [f64; 6], to: [f64; 6]) -> Self {
        Constraints::new(from.map(f64::to_radians), to.map(f64::to_radians))
    }

    /// Limits of the desktop arm, as set by its limit switches.
    pub fn desktop_arm() -> Self {
        Constraints::from_degrees(
            [-123.046875, -55.0088, -72.134, -105.46975, -90.0, -360.0],
            [123.046875, 86.625, 107.8675, 105.46975, 90.0, 360.0],
        )
    }

    pub fn compliant(&self, angles: &Joints) -> bool {
        (0..6).all(|i| angles[i] >= self.from[i] && angles[i] <= self.to[i])
    }

    /// Project the angles into the box of the limits.
    pub fn clamp(&self, angles: &Joints) -> Joints {
        std::array::from_fn(|i| angles[i].clamp(self.from[i], self.to[i]))
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints::desktop_arm()
    }
}
