//! Height correction for the sag of the arm across its reach.
//!
//! The gripper ends up lower than commanded the further out it reaches. The offset was
//! measured at a few X positions; a quadratic is fitted through these samples and the
//! requested Z is raised by `poly(x) - poly(0)`, so that the nominal height is kept at
//! the base of the arm.

use crate::config_error::ConfigError;
use nalgebra::{Matrix3, Vector3};

/// Quadratic `c0 + c1 x + c2 x^2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZCompensation {
    pub coefficients: [f64; 3],
}

impl ZCompensation {
    /// Least squares fit through `(x, z)` samples, millimeters.
    pub fn fit(samples: &[(f64, f64)]) -> Result<Self, ConfigError> {
        if samples.len() < 3 {
            return Err(ConfigError::InvalidLength {
                field: "z_compensation", expected: 3, found: samples.len(),
            });
        }
        let mut xs: Vec<f64> = samples.iter().map(|s| s.0).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        xs.dedup();
        if xs.len() < 3 {
            return Err(ConfigError::DegenerateFit(
                "z compensation samples need at least 3 distinct X values".into(),
            ));
        }
        // Normal equations of the Vandermonde system.
        let mut normal = Matrix3::<f64>::zeros();
        let mut rhs = Vector3::<f64>::zeros();
        for &(x, z) in samples {
            let row = Vector3::new(1.0, x, x * x);
            normal += row * row.transpose();
            rhs += row * z;
        }
        let c = normal
            .lu()
            .solve(&rhs)
            .ok_or_else(|| ConfigError::DegenerateFit("singular normal matrix".into()))?;
        if !c.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::DegenerateFit(format!("non finite coefficients {:?}", c)));
        }
        Ok(ZCompensation { coefficients: [c[0], c[1], c[2]] })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let [c0, c1, c2] = self.coefficients;
        c0 + x * (c1 + x * c2)
    }

    /// Z to command so that the gripper reaches `z` at reach `x`.
    pub fn compensate(&self, x: f64, z: f64) -> f64 {
        z + self.evaluate(x) - self.coefficients[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [(f64, f64); 6] =
        [(100.0, 33.0), (150.0, 36.0), (200.0, 41.0), (250.0, 45.0), (300.0, 51.0), (350.0, 57.0)];

    #[test]
    fn test_fit_of_desktop_samples() {
        let fit = ZCompensation::fit(&SAMPLES).unwrap();
        let expected = [27.985714285714284, 0.0355, 0.00013571428571428572];
        for i in 0..3 {
            assert!((fit.coefficients[i] - expected[i]).abs() < 1e-9 * expected[i].abs().max(1.0),
                    "c{} = {}", i, fit.coefficients[i]);
        }
    }

    #[test]
    fn test_compensate() {
        let fit = ZCompensation::fit(&SAMPLES).unwrap();
        assert!((fit.compensate(0.0, 36.0) - 36.0).abs() < 1e-9);
        assert!((fit.compensate(200.0, 36.0) - (36.0 + 12.528571428571428)).abs() < 1e-6);
        assert!((fit.compensate(250.0, 100.0) - (100.0 + 17.357142857142858)).abs() < 1e-6);
    }

    #[test]
    fn test_exact_quadratic_is_recovered() {
        let samples: Vec<(f64, f64)> = (0..5).map(|i| {
            let x = i as f64;
            (x, 2.0 - 0.5 * x + 0.01 * x * x)
        }).collect();
        let fit = ZCompensation::fit(&samples).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-9);
        assert!((fit.coefficients[1] + 0.5).abs() < 1e-9);
        assert!((fit.coefficients[2] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_samples() {
        let result = ZCompensation::fit(&SAMPLES[..2]);
        assert!(matches!(result, Err(ConfigError::InvalidLength { found: 2, .. })));
    }

    #[test]
    fn test_same_x_is_degenerate() {
        let result = ZCompensation::fit(&[(100.0, 1.0), (100.0, 2.0), (200.0, 3.0)]);
        assert!(matches!(result, Err(ConfigError::DegenerateFit(_))));
    }
}
