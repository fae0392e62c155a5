//! Reporting policy for the tracked object: jitter below a tolerance is ignored and the
//! object is given up after too many consecutive frames without a detection.

use std::fmt;

/// Position in the work cell, millimeters. `x` is the first component of the
/// perspective map output, `y` the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkCellPosition {
    pub x: f64,
    pub y: f64,
}

impl WorkCellPosition {
    pub fn new(x: f64, y: f64) -> Self {
        WorkCellPosition { x, y }
    }
}

impl fmt::Display for WorkCellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {:.2}, Y: {:.2}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerUpdate {
    /// First sighting, or the object moved by more than the tolerance.
    Moved(WorkCellPosition),
    /// Seen within tolerance of the reported position.
    Steady,
    /// Not seen this frame, the reported position is still kept.
    Missed { consecutive: usize },
    /// Not seen for too long, the reported position was dropped.
    Lost,
}

#[derive(Debug, Clone)]
pub struct ObjectTracker {
    /// Millimeters, per axis.
    pub tolerance: f64,
    /// Consecutive misses tolerated before the object is dropped.
    pub max_missed: usize,
    reported: Option<WorkCellPosition>,
    missed: usize,
}

impl ObjectTracker {
    pub fn new(tolerance: f64, max_missed: usize) -> Self {
        ObjectTracker { tolerance, max_missed, reported: None, missed: 0 }
    }

    /// The externally visible position.
    pub fn reported(&self) -> Option<WorkCellPosition> {
        self.reported
    }

    pub fn reset(&mut self) {
        self.reported = None;
        self.missed = 0;
    }

    pub fn update(&mut self, observed: Option<WorkCellPosition>) -> TrackerUpdate {
        match observed {
            Some(position) => {
                self.missed = 0;
                let moved = match self.reported {
                    None => true,
                    Some(last) => {
                        (position.x - last.x).abs() > self.tolerance
                            || (position.y - last.y).abs() > self.tolerance
                    }
                };
                if moved {
                    self.reported = Some(position);
                    TrackerUpdate::Moved(position)
                } else {
                    TrackerUpdate::Steady
                }
            }
            None => {
                self.missed += 1;
                if self.missed > self.max_missed && self.reported.is_some() {
                    self.reported = None;
                    TrackerUpdate::Lost
                } else {
                    TrackerUpdate::Missed { consecutive: self.missed }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_changes_are_debounced() {
        let mut tracker = ObjectTracker::new(2.54, 30);
        let first = WorkCellPosition::new(200.0, -100.0);
        assert_eq!(tracker.update(Some(first)), TrackerUpdate::Moved(first));
        assert_eq!(tracker.update(Some(WorkCellPosition::new(202.5, -97.5))), TrackerUpdate::Steady);
        assert_eq!(tracker.update(Some(WorkCellPosition::new(197.5, -102.5))), TrackerUpdate::Steady);
        assert_eq!(tracker.reported(), Some(first));
    }

    #[test]
    fn test_either_axis_beyond_tolerance_moves() {
        let mut tracker = ObjectTracker::new(2.54, 30);
        tracker.update(Some(WorkCellPosition::new(200.0, -100.0)));
        let moved = WorkCellPosition::new(200.0, -103.0);
        assert_eq!(tracker.update(Some(moved)), TrackerUpdate::Moved(moved));
        assert_eq!(tracker.reported(), Some(moved));
    }

    #[test]
    fn test_lost_after_consecutive_misses() {
        let mut tracker = ObjectTracker::new(2.54, 3);
        tracker.update(Some(WorkCellPosition::new(1.0, 1.0)));
        for k in 1..=3 {
            assert_eq!(tracker.update(None), TrackerUpdate::Missed { consecutive: k });
        }
        assert_eq!(tracker.update(None), TrackerUpdate::Lost);
        assert_eq!(tracker.reported(), None);
    }

    #[test]
    fn test_detection_resets_miss_count() {
        let mut tracker = ObjectTracker::new(2.54, 3);
        let position = WorkCellPosition::new(1.0, 1.0);
        tracker.update(Some(position));
        for _ in 0..10 {
            tracker.update(None);
            tracker.update(None);
            tracker.update(Some(position));
        }
        assert_eq!(tracker.reported(), Some(position));
    }

    #[test]
    fn test_stationary_object_stays_valid() {
        let mut tracker = ObjectTracker::new(2.54, 3);
        let position = WorkCellPosition::new(50.0, 60.0);
        tracker.update(Some(position));
        for _ in 0..100 {
            assert_eq!(tracker.update(Some(position)), TrackerUpdate::Steady);
        }
        assert_eq!(tracker.reported(), Some(position));
    }
}
