//! Two phase localization: calibrate the work cell from its floor marking, then track an
//! object inside it and report where it is in work-cell millimeters.

use crate::computer_vision::background::BackgroundModel;
use crate::computer_vision::calibration::{CalibrationFrame, CalibrationProgress, CornerFinder, CornerHistory, Corners};
use crate::computer_vision::contours::{apply_mask, dilate, erode, fill_polygon_mask, find_external_contours, threshold};
use crate::computer_vision::perspective::PerspectiveMap;
use crate::computer_vision::tracker::{ObjectTracker, TrackerUpdate, WorkCellPosition};
use crate::config::VisionConfig;
use image::GrayImage;
use nalgebra::Point2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisionPhase {
    /// Not initialized, frames are passed through.
    Idle,
    Calibrating { collected: usize, required: usize, frames_left: usize },
    Tracking,
}

/// One detection of the object in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectObservation {
    pub frame: u64,
    /// Centroid in the image.
    pub pixel: Point2<f64>,
    pub position: WorkCellPosition,
    /// Contour area, square pixels.
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub phase: VisionPhase,
    /// Corners found in this frame while calibrating, the stable ones while tracking.
    pub corners: Option<Corners>,
    pub observation: Option<ObjectObservation>,
    /// Debounced position, as reported to the control side.
    pub object: Option<WorkCellPosition>,
    pub message: String,
}

struct Calibrated {
    frame: CalibrationFrame,
    map: PerspectiveMap,
    /// Tracking area, built for the size of the frames seen.
    area_mask: Option<GrayImage>,
}

pub struct VisionPipeline {
    config: VisionConfig,
    finder: CornerFinder,
    initialized: bool,
    history: CornerHistory,
    calibrated: Option<Calibrated>,
    background: BackgroundModel,
    tracker: ObjectTracker,
    frame: u64,
}

impl VisionPipeline {
    pub fn new(config: &VisionConfig) -> Self {
        VisionPipeline {
            config: config.clone(),
            finder: config.corner_finder(),
            initialized: false,
            history: CornerHistory::new(config.calibration_samples, config.calibration_timeout_frames),
            calibrated: None,
            background: BackgroundModel::new(config.background_history, config.var_threshold, config.learning_rate),
            tracker: ObjectTracker::new(config.debounce_tolerance, config.max_missed_frames),
            frame: 0,
        }
    }

    /// Start (or restart) calibration. Everything learned before is dropped.
    pub fn initialize(&mut self) {
        tracing::info!("Vision initialized, collecting {} corner samples", self.history.required());
        self.initialized = true;
        self.history.clear();
        self.calibrated = None;
        self.background.reset();
        self.tracker.reset();
    }

    pub fn phase(&self) -> VisionPhase {
        if !self.initialized {
            VisionPhase::Idle
        } else if self.calibrated.is_some() {
            VisionPhase::Tracking
        } else {
            VisionPhase::Calibrating {
                collected: self.history.collected(),
                required: self.history.required(),
                frames_left: self.history.frames_left(),
            }
        }
    }

    pub fn calibration(&self) -> Option<&CalibrationFrame> {
        self.calibrated.as_ref().map(|c| &c.frame)
    }

    pub fn perspective(&self) -> Option<&PerspectiveMap> {
        self.calibrated.as_ref().map(|c| &c.map)
    }

    /// Reported object position.
    pub fn object(&self) -> Option<WorkCellPosition> {
        self.tracker.reported()
    }

    pub fn process(&mut self, gray: &GrayImage) -> FrameReport {
        self.frame += 1;
        if !self.initialized {
            return self.report(None, None, "Vision not initialized".to_string());
        }

        let mut message = String::new();
        if self.calibrated.is_none() {
            let corners = self.finder.find(gray);
            message = match corners {
                Some(_) => "Corners detected: 6".to_string(),
                None => "No corners detected".to_string(),
            };
            match self.history.push(corners) {
                CalibrationProgress::Collecting { .. } => return self.report(corners, None, message),
                CalibrationProgress::TimedOut => {
                    tracing::warn!("Calibration timed out without enough corner samples, starting over");
                    return self.report(corners, None, "Calibration timed out, starting over".to_string());
                }
                CalibrationProgress::Stable(stable) => match self.calibrate(stable) {
                    Some(calibrated) => {
                        tracing::info!("Stable corners established: {:?}", stable);
                        self.calibrated = Some(calibrated);
                        message = "Stable corners established".to_string();
                    }
                    None => {
                        tracing::warn!("Stable corners {:?} do not define a perspective map", stable);
                        self.history.clear();
                        return self.report(corners, None, "Failed to establish stable corners".to_string());
                    }
                },
            }
        }

        let observation = self.locate(gray);
        let update = self.tracker.update(observation.map(|o| o.position));
        match update {
            TrackerUpdate::Moved(position) => {
                tracing::debug!("Object at {}", position);
                message = format!("Object {}", position);
            }
            TrackerUpdate::Lost => {
                tracing::info!("Object lost");
                message = "Object lost".to_string();
            }
            TrackerUpdate::Steady | TrackerUpdate::Missed { .. } if message.is_empty() => {
                message = match self.tracker.reported() {
                    Some(position) => format!("Object {}", position),
                    None => "No object".to_string(),
                };
            }
            _ => {}
        }
        let corners = self.calibration().map(|c| c.corners);
        self.report(corners, observation, message)
    }

    fn report(&self, corners: Option<Corners>, observation: Option<ObjectObservation>, message: String) -> FrameReport {
        FrameReport {
            frame: self.frame,
            phase: self.phase(),
            corners,
            observation,
            object: self.tracker.reported(),
            message,
        }
    }

    fn calibrate(&self, corners: Corners) -> Option<Calibrated> {
        let frame = CalibrationFrame { corners, references: self.config.reference_points };
        let map = PerspectiveMap::from_correspondences(&frame.tracking_polygon(), &frame.references)?;
        Some(Calibrated { frame, map, area_mask: None })
    }

    /// Largest moving blob inside the tracking area, mapped to the work cell.
    fn locate(&mut self, gray: &GrayImage) -> Option<ObjectObservation> {
        let calibrated = self.calibrated.as_mut()?;
        let (width, height) = gray.dimensions();
        let stale = calibrated.area_mask.as_ref().map_or(true, |m| m.dimensions() != (width, height));
        if stale {
            calibrated.area_mask = Some(fill_polygon_mask(width, height, &calibrated.frame.tracking_polygon()));
        }
        let masked = apply_mask(gray, calibrated.area_mask.as_ref()?);

        let foreground = self.background.apply(&masked);
        let iterations = self.config.morphology_iterations;
        let cleaned = dilate(&erode(&foreground, iterations), iterations);
        let object_mask = threshold(&cleaned, self.config.foreground_threshold);

        let (contour, area) = find_external_contours(&object_mask)
            .into_iter()
            .map(|c| {
                let area = c.area();
                (c, area)
            })
            .filter(|(_, area)| *area > self.config.min_contour_area)
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        let pixel = contour.centroid()?;
        let mapped = calibrated.map.map(&pixel)?;
        Some(ObjectObservation {
            frame: self.frame,
            pixel,
            position: WorkCellPosition::new(mapped.x, mapped.y),
            area,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const HEXAGON: [(f64, f64); 6] =
        [(100.0, 120.0), (320.0, 60.0), (540.0, 120.0), (540.0, 360.0), (320.0, 420.0), (100.0, 360.0)];

    fn scene(object: Option<(u32, u32)>) -> GrayImage {
        let outline: Vec<Point2<f64>> = HEXAGON.iter().map(|&(x, y)| Point2::new(x, y)).collect();
        let marking = fill_polygon_mask(640, 480, &outline);
        GrayImage::from_fn(640, 480, |x, y| {
            if let Some((ox, oy)) = object {
                if (ox..ox + 40).contains(&x) && (oy..oy + 40).contains(&y) {
                    return Luma([220]);
                }
            }
            if marking.get_pixel(x, y)[0] != 0 { Luma([10]) } else { Luma([200]) }
        })
    }

    fn config() -> VisionConfig {
        VisionConfig { calibration_samples: 3, max_missed_frames: 2, ..Default::default() }
    }

    fn calibrated_pipeline() -> VisionPipeline {
        let mut pipeline = VisionPipeline::new(&config());
        pipeline.initialize();
        let empty = scene(None);
        for _ in 0..3 {
            pipeline.process(&empty);
        }
        assert_eq!(pipeline.phase(), VisionPhase::Tracking);
        pipeline
    }

    #[test]
    fn test_idle_until_initialized() {
        let mut pipeline = VisionPipeline::new(&config());
        let report = pipeline.process(&scene(None));
        assert_eq!(report.phase, VisionPhase::Idle);
        assert!(report.corners.is_none());
    }

    #[test]
    fn test_calibration_progress() {
        let mut pipeline = VisionPipeline::new(&config());
        pipeline.initialize();
        let report = pipeline.process(&scene(None));
        assert!(matches!(report.phase, VisionPhase::Calibrating { collected: 1, required: 3, .. }));
        assert!(report.corners.is_some());
        // Frames without the marking add nothing.
        let report = pipeline.process(&GrayImage::from_pixel(640, 480, Luma([200])));
        assert!(matches!(report.phase, VisionPhase::Calibrating { collected: 1, .. }));
        assert_eq!(report.message, "No corners detected");
    }

    #[test]
    fn test_first_corner_maps_to_first_reference() {
        let pipeline = calibrated_pipeline();
        let calibration = pipeline.calibration().unwrap();
        let map = pipeline.perspective().unwrap();
        let mapped = map.map(&calibration.corners[0]).unwrap();
        assert!((mapped - Point2::new(175.0, -5.0)).norm() < 1e-6, "{:?}", mapped);
    }

    #[test]
    fn test_tracks_new_object() {
        let mut pipeline = calibrated_pipeline();
        let report = pipeline.process(&scene(Some((200, 160))));
        let observation = report.observation.expect("object not found");
        assert!((observation.pixel - Point2::new(219.5, 179.5)).norm() < 1e-9, "{:?}", observation.pixel);
        assert_eq!(observation.area, 39.0 * 39.0);
        let expected = pipeline.perspective().unwrap().map(&observation.pixel).unwrap();
        assert_eq!(report.object, Some(WorkCellPosition::new(expected.x, expected.y)));
    }

    #[test]
    fn test_object_dropped_after_misses() {
        let mut pipeline = calibrated_pipeline();
        pipeline.process(&scene(Some((200, 160))));
        assert!(pipeline.object().is_some());
        let empty = scene(None);
        pipeline.process(&empty);
        pipeline.process(&empty);
        assert!(pipeline.object().is_some());
        let report = pipeline.process(&empty);
        assert!(report.object.is_none());
        assert_eq!(report.message, "Object lost");
    }

    #[test]
    fn test_small_blobs_ignored() {
        let mut pipeline = calibrated_pipeline();
        let mut frame = scene(None);
        for x in 200..215 {
            for y in 160..175 {
                frame.put_pixel(x, y, Luma([220]));
            }
        }
        let report = pipeline.process(&frame);
        assert!(report.observation.is_none());
    }

    #[test]
    fn test_reinitialize_restarts_calibration() {
        let mut pipeline = calibrated_pipeline();
        pipeline.initialize();
        assert!(matches!(pipeline.phase(), VisionPhase::Calibrating { collected: 0, .. }));
        assert!(pipeline.calibration().is_none());
        assert!(pipeline.object().is_none());
    }
}
