//! Where frames come from.

use anyhow::{bail, Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};

/// A camera, or anything that behaves like one. `read` may block for up to one frame
/// period; it is only ever called from the vision worker.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<()>;

    /// The next frame, as grayscale.
    fn read(&mut self) -> Result<GrayImage>;

    /// Release the device. The worker calls `open` again before the next `read`.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read(&mut self) -> Result<GrayImage> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Image files of a directory replayed in name order, over and over.
#[derive(Debug, Clone)]
pub struct ImageDirectory {
    directory: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirectory {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        ImageDirectory { directory: directory.as_ref().to_path_buf(), files: Vec::new(), next: 0 }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirectory {
    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.directory)
            .with_context(|| format!("Cannot list frames in {}", self.directory.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            bail!("No image files in {}", self.directory.display());
        }
        files.sort();
        tracing::info!("Replaying {} frames from {}", files.len(), self.directory.display());
        self.files = files;
        self.next = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<GrayImage> {
        if self.files.is_empty() {
            bail!("Frame source {} is not open", self.directory.display());
        }
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        let frame = image::open(path).with_context(|| format!("Cannot read frame {}", path.display()))?;
        Ok(frame.to_luma8())
    }

    fn close(&mut self) {
        self.files.clear();
        self.next = 0;
    }
}
