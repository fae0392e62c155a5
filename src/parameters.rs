//! Defines the Denavit–Hartenberg chain of the arm

pub mod dh_kinematics {
    use crate::utils::deg;
    use std::f64::consts::PI;

    /// One link of the chain in the classic Denavit–Hartenberg convention.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct DhLink {
        /// Link length, along the common normal (millimeters).
        pub a: f64,

        /// Link twist around the common normal (radians).
        pub alpha: f64,

        /// Link offset along the previous joint axis (millimeters).
        pub d: f64,

        /// Fixed angle added to the commanded joint value (radians).
        pub theta_offset: f64,
    }

    impl DhLink {
        pub const fn new(a: f64, alpha: f64, d: f64, theta_offset: f64) -> Self {
            DhLink { a, alpha, d, theta_offset }
        }
    }

    /// Geometry of the 6 axis serial arm. Fixed at construction.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct JointChain {
        pub links: [DhLink; 6],
    }

    impl JointChain {
        pub fn new(links: [DhLink; 6]) -> Self {
            JointChain { links }
        }

        /// The stepper-driven desktop arm this crate was built for. Lengths in millimeters.
        pub fn desktop_arm() -> Self {
            JointChain {
                links: [
                    DhLink::new(23.42, -PI / 2.0, 110.5, 0.0),
                    DhLink::new(180.0, PI, 0.0, -PI / 2.0),
                    DhLink::new(-43.5, PI / 2.0, 0.0, PI),
                    DhLink::new(0.0, -PI / 2.0, -176.35, 0.0),
                    DhLink::new(0.0, PI / 2.0, 0.0, 0.0),
                    DhLink::new(0.0, PI, -125.075, PI),
                ],
            }
        }

        /// Convert to string yaml representation (quick viewing, etc).
        pub fn to_yaml(&self) -> String {
            let rows = self
                .links
                .iter()
                .map(|l| format!("  - [{}, {}, {}, {}]", l.a, deg(&l.alpha), l.d, deg(&l.theta_offset)))
                .collect::<Vec<_>>()
                .join("\n");
            format!("dh_chain: # [a, alpha, d, theta_offset]\n{}\n", rows)
        }
    }

    impl Default for JointChain {
        fn default() -> Self {
            JointChain::desktop_arm()
        }
    }
}
