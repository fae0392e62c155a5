//! Projective map from image pixels to work-cell millimeters, fitted once from four
//! point correspondences.

use nalgebra::{Matrix3, Point2, SMatrix, SVector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveMap {
    pub matrix: Matrix3<f64>,
}

impl PerspectiveMap {
    /// Exact fit of the homography (with `h33 = 1`) that takes each `source` point to the
    /// matching `target`. `None` if three of the points are collinear.
    pub fn from_correspondences(source: &[Point2<f64>; 4], target: &[Point2<f64>; 4]) -> Option<Self> {
        if has_collinear_triple(source) || has_collinear_triple(target) {
            return None;
        }
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for i in 0..4 {
            let (x, y) = (source[i].x, source[i].y);
            let (u, v) = (target[i].x, target[i].y);
            let r = 2 * i;
            a.row_mut(r).copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
            a.row_mut(r + 1).copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
            b[r] = u;
            b[r + 1] = v;
        }
        let h = a.lu().solve(&b)?;
        if !h.iter().all(|v| v.is_finite()) {
            return None;
        }
        let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        Some(PerspectiveMap { matrix })
    }

    /// Maps an image point. `None` for points on the horizon line of the map.
    pub fn map(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let p = self.matrix * point.to_homogeneous();
        if p.z.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2::new(p.x / p.z, p.y / p.z))
    }
}

fn has_collinear_triple(points: &[Point2<f64>; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let scale = points.iter().map(|p| p.coords.amax()).fold(1.0, f64::max);
    TRIPLES.iter().any(|&[i, j, k]| {
        let (u, v) = (points[j] - points[i], points[k] - points[i]);
        (u.x * v.y - u.y * v.x).abs() <= 1e-12 * scale * scale
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point2<f64> {
        Point2::new(x, y)
    }

    const EPSILON: f64 = 1e-6;

    #[test]
    fn test_maps_reference_points_exactly() {
        let source = [p(100.0, 120.0), p(320.0, 60.0), p(540.0, 120.0), p(100.0, 360.0)];
        let target = [p(175.0, -5.0), p(185.0, -175.0), p(315.0, -175.0), p(305.0, 0.0)];
        let map = PerspectiveMap::from_correspondences(&source, &target).unwrap();
        for (s, t) in source.iter().zip(target.iter()) {
            let mapped = map.map(s).unwrap();
            assert!((mapped - t).norm() < EPSILON, "{:?} -> {:?}, expected {:?}", s, mapped, t);
        }
    }

    #[test]
    fn test_affine_case() {
        // Scale by 2 and shift: the fitted map must be affine.
        let source = [p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)];
        let target = [p(10.0, 20.0), p(12.0, 20.0), p(12.0, 22.0), p(10.0, 22.0)];
        let map = PerspectiveMap::from_correspondences(&source, &target).unwrap();
        let mapped = map.map(&p(0.5, 0.25)).unwrap();
        assert!((mapped - p(11.0, 20.5)).norm() < EPSILON);
        assert!(map.matrix[(2, 0)].abs() < EPSILON && map.matrix[(2, 1)].abs() < EPSILON);
    }

    #[test]
    fn test_collinear_points_rejected() {
        let source = [p(0.0, 0.0), p(1.0, 1.0), p(2.0, 2.0), p(3.0, 3.0)];
        let target = [p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)];
        assert!(PerspectiveMap::from_correspondences(&source, &target).is_none());
    }
}
