//! Work-cell calibration from the hexagonal floor marking.
//!
//! The marking is darker than anything else in view. Each frame its outline is reduced
//! to a polygon and, if it looks like the hexagon, the six corners are put into a
//! canonical order and added to a history. Once enough samples are in, the elementwise
//! median of the history becomes the stable [`CalibrationFrame`]. The median rejects the
//! odd bad detection (partial occlusion, flicker) that a mean would drag along.

use crate::computer_vision::contours::{approx_poly_dp, find_external_contours, threshold_inv, PixelPoint};
use image::GrayImage;
use nalgebra::Point2;
use std::ops::RangeInclusive;

pub type Corners = [Point2<f64>; 6];

/// Canonical order: the 3 upper corners left to right, then the 3 lower ones left to right.
/// Only the first 6 points are kept if more are given.
pub fn sort_corners(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    let split = sorted.len().min(3);
    let by_x = |a: &Point2<f64>, b: &Point2<f64>| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y));
    sorted[..split].sort_by(by_x);
    sorted[split..].sort_by(by_x);
    sorted.truncate(6);
    sorted
}

/// Corner detection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerFinder {
    /// Pixels not brighter than this belong to the marking.
    pub dark_threshold: u8,
    /// Simplification tolerance as a fraction of the outline perimeter.
    pub epsilon_fraction: f64,
    pub vertices: RangeInclusive<usize>,
}

impl Default for CornerFinder {
    fn default() -> Self {
        CornerFinder { dark_threshold: 30, epsilon_fraction: 0.02, vertices: 6..=8 }
    }
}

impl CornerFinder {
    /// Six canonically ordered corners of the largest dark region, if it simplifies to a
    /// polygon with an acceptable number of vertices.
    pub fn find(&self, gray: &GrayImage) -> Option<Corners> {
        let mask = threshold_inv(gray, self.dark_threshold);
        let contours = find_external_contours(&mask);
        let largest = contours.iter().max_by(|a, b| a.area().total_cmp(&b.area()))?;
        let polygon = approx_poly_dp(largest, self.epsilon_fraction * largest.arc_length());
        if !self.vertices.contains(&polygon.len()) {
            return None;
        }
        let points: Vec<Point2<f64>> = polygon.iter().map(to_f64).collect();
        let sorted = sort_corners(&points);
        sorted.try_into().ok()
    }
}

fn to_f64(p: &PixelPoint) -> Point2<f64> {
    Point2::new(p.x as f64, p.y as f64)
}

/// Stable corners of the marking plus where the first four are in the work cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFrame {
    pub corners: Corners,
    /// Work-cell millimeters of `corners[0..4]`.
    pub references: [Point2<f64>; 4],
}

impl CalibrationFrame {
    /// Corners that span the tracking area.
    pub fn tracking_polygon(&self) -> [Point2<f64>; 4] {
        [self.corners[0], self.corners[1], self.corners[2], self.corners[3]]
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Elementwise median over all samples, `None` if there are none.
pub fn median_corners(samples: &[Corners]) -> Option<Corners> {
    if samples.is_empty() {
        return None;
    }
    let mut column = Vec::with_capacity(samples.len());
    let mut axis = |i: usize, coordinate: usize| {
        column.clear();
        column.extend(samples.iter().map(|s| s[i][coordinate]));
        median(&mut column)
    };
    let mut corners = [Point2::origin(); 6];
    for i in 0..6 {
        corners[i] = Point2::new(axis(i, 0), axis(i, 1));
    }
    Some(corners)
}

/// What the history looks like after a frame was added.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationProgress {
    Collecting { collected: usize, required: usize },
    Stable(Corners),
    /// Not enough samples within the allowed number of frames. The history was cleared.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CornerHistory {
    samples: Vec<Corners>,
    required: usize,
    timeout_frames: usize,
    frames: usize,
}

impl CornerHistory {
    pub fn new(required: usize, timeout_frames: usize) -> Self {
        CornerHistory { samples: Vec::with_capacity(required), required, timeout_frames, frames: 0 }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.frames = 0;
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Frames left before the history times out.
    pub fn frames_left(&self) -> usize {
        self.timeout_frames.saturating_sub(self.frames)
    }

    /// Adds the detection of one frame (or its absence).
    pub fn push(&mut self, corners: Option<Corners>) -> CalibrationProgress {
        self.frames += 1;
        if let Some(corners) = corners {
            self.samples.push(corners);
        }
        if self.samples.len() >= self.required {
            if let Some(stable) = median_corners(&self.samples) {
                return CalibrationProgress::Stable(stable);
            }
        }
        if self.timeout_frames > 0 && self.frames >= self.timeout_frames {
            self.clear();
            return CalibrationProgress::TimedOut;
        }
        CalibrationProgress::Collecting { collected: self.samples.len(), required: self.required }
    }
}
