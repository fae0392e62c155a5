//! Drawing of what the pipeline sees on top of the camera frame.

use crate::computer_vision::pipeline::FrameReport;
use image::{GrayImage, Rgb, RgbImage};
use nalgebra::Point2;

pub const CORNER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const AREA_COLOR: Rgb<u8> = Rgb([255, 160, 0]);
pub const OBJECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Camera frame in color with the corners, the tracking area and the object centroid.
pub fn annotate(gray: &GrayImage, report: &FrameReport) -> RgbImage {
    let mut frame = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });
    if let Some(corners) = &report.corners {
        let area = [corners[0], corners[1], corners[2], corners[3]];
        for i in 0..area.len() {
            draw_line(&mut frame, &area[i], &area[(i + 1) % area.len()], AREA_COLOR);
        }
        for corner in corners {
            draw_disc(&mut frame, corner, 4, CORNER_COLOR);
        }
    }
    if let Some(observation) = &report.observation {
        draw_disc(&mut frame, &observation.pixel, 5, OBJECT_COLOR);
    }
    frame
}

fn put(frame: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < frame.width() && (y as u32) < frame.height() {
        frame.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham, clipped to the frame.
pub fn draw_line(frame: &mut RgbImage, from: &Point2<f64>, to: &Point2<f64>, color: Rgb<u8>) {
    let (mut x, mut y) = (from.x.round() as i64, from.y.round() as i64);
    let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(frame, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn draw_disc(frame: &mut RgbImage, center: &Point2<f64>, radius: i64, color: Rgb<u8>) {
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(frame, cx + dx, cy + dy, color);
            }
        }
    }
}
