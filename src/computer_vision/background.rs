//! Adaptive background model for the tracking stage.
//!
//! Every pixel keeps a running Gaussian (mean and variance) of its brightness. A pixel
//! is foreground while it is more than `sqrt(var_threshold)` standard deviations away
//! from its mean. The model keeps learning from every frame, so a change that stays put
//! is absorbed into the background after roughly `1 / learning_rate` frames.

use image::GrayImage;
use rayon::prelude::*;

const VARIANCE_INIT: f32 = 15.0 * 15.0;
const VARIANCE_MIN: f32 = 4.0;
const VARIANCE_MAX: f32 = 5.0 * VARIANCE_INIT;

#[derive(Debug, Clone)]
pub struct BackgroundModel {
    /// Frames used for the automatic learning rate.
    pub history: usize,
    /// Squared Mahalanobis distance above which a pixel is foreground.
    pub var_threshold: f32,
    /// Fixed learning rate. Non positive means automatic (`1 / min(frames, history)`).
    pub learning_rate: f64,
    mean: Vec<f32>,
    variance: Vec<f32>,
    dimensions: (u32, u32),
    frames: usize,
}

impl BackgroundModel {
    pub fn new(history: usize, var_threshold: f32, learning_rate: f64) -> Self {
        BackgroundModel {
            history,
            var_threshold,
            learning_rate,
            mean: Vec::new(),
            variance: Vec::new(),
            dimensions: (0, 0),
            frames: 0,
        }
    }

    /// Forget everything learned so far.
    pub fn reset(&mut self) {
        self.mean.clear();
        self.variance.clear();
        self.dimensions = (0, 0);
        self.frames = 0;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    fn alpha(&self) -> f32 {
        if self.learning_rate > 0.0 {
            self.learning_rate.min(1.0) as f32
        } else {
            1.0 / self.frames.min(self.history.max(1)).max(1) as f32
        }
    }

    /// Classifies the frame against the model, then updates the model with it. Returns
    /// the foreground mask (255 foreground, 0 background). The first frame, or a frame
    /// of a different size, only initializes the model and has no foreground.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        let mut foreground = GrayImage::new(width, height);
        if self.dimensions != (width, height) || self.mean.is_empty() {
            self.dimensions = (width, height);
            self.mean = frame.iter().map(|&v| v as f32).collect();
            self.variance = vec![VARIANCE_INIT; self.mean.len()];
            self.frames = 1;
            return foreground;
        }

        self.frames += 1;
        let alpha = self.alpha();
        let threshold = self.var_threshold;
        foreground
            .par_iter_mut()
            .zip(frame.par_iter())
            .zip(self.mean.par_iter_mut().zip(self.variance.par_iter_mut()))
            .for_each(|((out, &value), (mean, variance))| {
                let d = value as f32 - *mean;
                let d2 = d * d;
                if d2 > threshold * *variance {
                    *out = 255;
                }
                *mean += alpha * d;
                *variance = (*variance + alpha * (d2 - *variance)).clamp(VARIANCE_MIN, VARIANCE_MAX);
            });
        foreground
    }
}
