//! Video4Linux camera as a frame source.

use crate::computer_vision::source::FrameSource;
use anyhow::{bail, Context, Result};
use image::GrayImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Grey,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    /// Preferred first: the pipeline only needs luminance.
    const PREFERENCE: [(&'static [u8; 4], PixelFormat); 3] =
        [(b"GREY", PixelFormat::Grey), (b"YUYV", PixelFormat::Yuyv), (b"MJPG", PixelFormat::Mjpeg)];

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE
            .iter()
            .find(|(code, _)| FourCC::new(code) == fourcc)
            .map(|(_, format)| *format)
    }
}

struct Capturing {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// `/dev/video<index>`, asked for `width` x `height`. The driver may pick another size;
/// frames come at whatever size it settles on.
pub struct CameraSource {
    index: u32,
    width: u32,
    height: u32,
    capturing: Option<Capturing>,
}

// The mmap stream is only touched by the thread that owns the source.
unsafe impl Send for CameraSource {}

impl CameraSource {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        CameraSource { index, width, height, capturing: None }
    }

    fn path(&self) -> String {
        format!("/dev/video{}", self.index)
    }
}

fn negotiate(device: &Device, width: u32, height: u32) -> Result<(v4l::Format, PixelFormat)> {
    let mut requested = device.format()?;
    requested.width = width;
    requested.height = height;
    for (code, format) in PixelFormat::PREFERENCE {
        requested.fourcc = FourCC::new(code);
        if let Ok(actual) = device.set_format(&requested) {
            if actual.fourcc == requested.fourcc {
                return Ok((actual, format));
            }
        }
    }
    let actual = device.format()?;
    match PixelFormat::from_fourcc(actual.fourcc) {
        Some(format) => Ok((actual, format)),
        None => bail!("Camera pixel format {} is not supported", String::from_utf8_lossy(&actual.fourcc.repr)),
    }
}

/// Luminance of one captured buffer.
fn to_gray(format: PixelFormat, data: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    let pixels = width as usize * height as usize;
    let luma = match format {
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory(data).context("Cannot decode MJPEG frame")?;
            return Ok(decoded.to_luma8());
        }
        PixelFormat::Grey => data.iter().take(pixels).copied().collect::<Vec<u8>>(),
        // Y0 U Y1 V: luminance is every other byte.
        PixelFormat::Yuyv => data.iter().step_by(2).take(pixels).copied().collect(),
    };
    if luma.len() < pixels {
        bail!("Short frame: {} of {} pixels", luma.len(), pixels);
    }
    GrayImage::from_raw(width, height, luma).context("Frame does not fit its size")
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        self.capturing = None;
        let path = self.path();
        let device = Device::with_path(&path).with_context(|| format!("Cannot open camera {}", path))?;
        let (format, pixel_format) = negotiate(&device, self.width, self.height)
            .with_context(|| format!("Cannot set the format of {}", path))?;
        let stream = Stream::with_buffers(&device, Type::VideoCapture, 4)
            .with_context(|| format!("Cannot start streaming from {}", path))?;
        tracing::info!("Camera {} streaming {}x{} {:?}", path, format.width, format.height, pixel_format);
        self.capturing = Some(Capturing { stream, width: format.width, height: format.height, format: pixel_format });
        Ok(())
    }

    fn read(&mut self) -> Result<GrayImage> {
        let Some(capturing) = self.capturing.as_mut() else {
            bail!("Camera /dev/video{} is not open", self.index);
        };
        let (data, _) = capturing.stream.next().context("Camera read failed")?;
        to_gray(capturing.format, data, capturing.width, capturing.height)
    }

    fn close(&mut self) {
        self.capturing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_keeps_luminance() {
        let data = [10, 128, 20, 128, 30, 64, 40, 64];
        let gray = to_gray(PixelFormat::Yuyv, &data, 2, 2).unwrap();
        assert_eq!(gray.into_raw(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_short_frames_rejected() {
        assert!(to_gray(PixelFormat::Grey, &[1, 2, 3], 2, 2).is_err());
        assert!(to_gray(PixelFormat::Yuyv, &[1, 2, 3, 4], 2, 2).is_err());
        assert!(to_gray(PixelFormat::Mjpeg, &[0xff, 0xd8, 0x00], 2, 2).is_err());
    }

    #[test]
    fn test_fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), None);
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let mut camera = CameraSource::new(4095, 640, 480);
        assert!(camera.open().is_err());
        assert!(camera.read().is_err());
    }
}
