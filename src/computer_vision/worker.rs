//! Vision timeline: a dedicated thread pulling frames, running the pipeline at a capped
//! rate and publishing the newest result. The control side never waits for it.

use crate::computer_vision::overlay::annotate;
use crate::computer_vision::pipeline::{FrameReport, VisionPipeline};
use crate::computer_vision::source::FrameSource;
use crate::config::VisionConfig;
use crate::latest::Latest;
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Requests from the control timeline, applied before the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionRequest {
    Initialize,
}

/// What the worker published for one frame.
#[derive(Debug, Clone)]
pub struct VisionSnapshot {
    pub report: FrameReport,
    pub annotated: RgbImage,
}

pub struct VisionWorker {
    running: Arc<AtomicBool>,
    requests: Sender<VisionRequest>,
    snapshots: Latest<VisionSnapshot>,
    handle: Option<JoinHandle<()>>,
}

const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Sleep that gives up early once the worker is asked to stop.
fn pause(running: &AtomicBool, duration: Duration) {
    let end = Instant::now() + duration;
    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= end {
            break;
        }
        thread::sleep(PAUSE_SLICE.min(end - now));
    }
}

struct WorkerLoop<S: FrameSource> {
    source: S,
    pipeline: VisionPipeline,
    requests: Receiver<VisionRequest>,
    snapshots: Latest<VisionSnapshot>,
    running: Arc<AtomicBool>,
    interval: Duration,
    backoff: Duration,
}

impl<S: FrameSource> WorkerLoop<S> {
    fn run(mut self) {
        let mut opened = false;
        while self.running.load(Ordering::Relaxed) {
            let loop_start = Instant::now();

            for request in self.requests.try_iter() {
                match request {
                    VisionRequest::Initialize => self.pipeline.initialize(),
                }
            }

            if !opened {
                if let Err(e) = self.source.open() {
                    tracing::warn!("Cannot open camera, retrying in {:?}: {:#}", self.backoff, e);
                    pause(&self.running, self.backoff);
                    continue;
                }
                opened = true;
            }

            match self.source.read() {
                Ok(frame) => {
                    let report = self.pipeline.process(&frame);
                    let annotated = annotate(&frame, &report);
                    self.snapshots.publish(VisionSnapshot { report, annotated });
                }
                Err(e) => {
                    tracing::warn!("Frame read failed, reopening in {:?}: {:#}", self.backoff, e);
                    self.source.close();
                    opened = false;
                    pause(&self.running, self.backoff);
                    continue;
                }
            }

            let elapsed = loop_start.elapsed();
            if elapsed < self.interval {
                pause(&self.running, self.interval - elapsed);
            }
        }
        self.source.close();
        tracing::debug!("Vision worker stopped");
    }
}

impl VisionWorker {
    /// Start the worker thread. The pipeline stays idle until [`VisionWorker::initialize`].
    pub fn spawn<S: FrameSource + 'static>(source: S, config: &VisionConfig) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (requests, receiver) = unbounded();
        let snapshots = Latest::new();

        let worker = WorkerLoop {
            source,
            pipeline: VisionPipeline::new(config),
            requests: receiver,
            snapshots: snapshots.clone(),
            running: Arc::clone(&running),
            interval: config.frame_interval(),
            backoff: config.retry_backoff,
        };
        let handle = thread::Builder::new()
            .name("vision".to_string())
            .spawn(move || worker.run());
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Cannot start the vision worker: {}", e);
                running.store(false, Ordering::SeqCst);
                None
            }
        };

        VisionWorker { running, requests, snapshots, handle }
    }

    /// Ask the pipeline to (re)calibrate. False if the worker is gone.
    pub fn initialize(&self) -> bool {
        self.requests.send(VisionRequest::Initialize).is_ok()
    }

    pub fn requests(&self) -> Sender<VisionRequest> {
        self.requests.clone()
    }

    /// Slot the worker publishes into. Clones read the same value.
    pub fn snapshots(&self) -> Latest<VisionSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<VisionSnapshot>> {
        self.snapshots.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Vision worker panicked");
            }
        }
    }
}

impl Drop for VisionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
