//! Binary image primitives used by the calibration and tracking stages: thresholding,
//! outer contours of connected components, polygon simplification, polygon moments and
//! 3x3 morphology. Masks are `GrayImage` with 0 for background and 255 for foreground.

use image::{GrayImage, Luma};
use nalgebra::Point2;
use rayon::prelude::*;

pub type PixelPoint = Point2<i32>;

/// Neighbour offsets, clockwise on screen (y grows down), starting east.
const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),   // E
    (1, 1),   // SE
    (0, 1),   // S
    (-1, 1),  // SW
    (-1, 0),  // W
    (-1, -1), // NW
    (0, -1),  // N
    (1, -1),  // NE
];

const WEST: usize = 4;

fn map_pixels(image: &GrayImage, f: impl Fn(u8) -> u8 + Sync) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    out.par_chunks_mut(width.max(1) as usize)
        .zip(image.par_chunks(width.max(1) as usize))
        .for_each(|(dst, src)| {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = f(*s);
            }
        });
    out
}

/// 255 where the pixel is brighter than `level`, 0 elsewhere.
pub fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    map_pixels(image, |v| if v > level { 255 } else { 0 })
}

/// 255 where the pixel is not brighter than `level`, 0 elsewhere.
pub fn threshold_inv(image: &GrayImage, level: u8) -> GrayImage {
    map_pixels(image, |v| if v > level { 0 } else { 255 })
}

/// Keeps `image` where `mask` is set, zero elsewhere.
pub fn apply_mask(image: &GrayImage, mask: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for (o, m) in out.iter_mut().zip(mask.iter()) {
        if *m == 0 {
            *o = 0;
        }
    }
    out
}

/// Closed polygon of boundary pixels, in tracing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<PixelPoint>,
}

/// Spatial moments of the polygon enclosed by a contour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Contour {
    fn edges(&self) -> impl Iterator<Item = (&PixelPoint, &PixelPoint)> {
        let n = self.points.len();
        (0..n).map(move |i| (&self.points[i], &self.points[(i + 1) % n]))
    }

    /// Enclosed area (shoelace formula). Zero for lines and single pixels.
    pub fn area(&self) -> f64 {
        self.moments().m00.abs()
    }

    /// Perimeter of the closed polygon.
    pub fn arc_length(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        self.edges()
            .map(|(a, b)| ((b.x - a.x) as f64).hypot((b.y - a.y) as f64))
            .sum()
    }

    /// Green's theorem moments, normalized to a positive area.
    pub fn moments(&self) -> Moments {
        let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
        if self.points.len() >= 3 {
            for (a, b) in self.edges() {
                let (xa, ya, xb, yb) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
                let cross = xa * yb - xb * ya;
                m00 += cross;
                m10 += (xa + xb) * cross;
                m01 += (ya + yb) * cross;
            }
        }
        let sign = if m00 < 0.0 { -1.0 } else { 1.0 };
        Moments { m00: sign * m00 / 2.0, m10: sign * m10 / 6.0, m01: sign * m01 / 6.0 }
    }

    /// Center of mass of the enclosed area, `None` for a degenerate contour.
    pub fn centroid(&self) -> Option<Point2<f64>> {
        let m = self.moments();
        if m.m00 == 0.0 {
            return None;
        }
        Some(Point2::new(m.m10 / m.m00, m.m01 / m.m00))
    }
}

/// Outer boundary of every 8-connected foreground component, traced clockwise with the
/// Moore neighbour rule. Straight runs are compressed to their end points.
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    let (width, height) = (mask.width() as i32, mask.height() as i32);
    let is_set = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < width && y < height && mask.get_pixel(x as u32, y as u32)[0] != 0
    };

    let mut labeled = vec![false; (width * height) as usize];
    let mut contours = Vec::new();
    let mut stack = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let index = (y * width + x) as usize;
            if labeled[index] || !is_set(x, y) {
                continue;
            }
            // First pixel of the component in raster order: its west and north sides are free.
            let mut size = 0usize;
            stack.push((x, y));
            labeled[index] = true;
            while let Some((cx, cy)) = stack.pop() {
                size += 1;
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if is_set(nx, ny) {
                        let n = (ny * width + nx) as usize;
                        if !labeled[n] {
                            labeled[n] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
            let boundary = trace_boundary(PixelPoint::new(x, y), size, &is_set);
            contours.push(Contour { points: compress_runs(boundary) });
        }
    }
    contours
}

/// Search clockwise around `p` for the next foreground pixel.
fn next_on_boundary(
    p: PixelPoint,
    first_direction: usize,
    is_set: &impl Fn(i32, i32) -> bool,
) -> Option<(PixelPoint, usize)> {
    (0..8).map(|k| (first_direction + k) % 8).find_map(|d| {
        let (dx, dy) = NEIGHBOURS[d];
        is_set(p.x + dx, p.y + dy).then(|| (PixelPoint::new(p.x + dx, p.y + dy), d))
    })
}

/// Where to resume the clockwise search after moving in direction `d`: the neighbour
/// following the last background pixel seen.
fn resume_direction(d: usize) -> usize {
    if d % 2 == 0 { (d + 6) % 8 } else { (d + 5) % 8 }
}

fn trace_boundary(
    start: PixelPoint,
    component_size: usize,
    is_set: &impl Fn(i32, i32) -> bool,
) -> Vec<PixelPoint> {
    let mut boundary = vec![start];
    let Some((second, mut d)) = next_on_boundary(start, WEST, is_set) else {
        return boundary; // isolated pixel
    };

    let mut p = second;
    // Every boundary pixel is visited at most 4 times.
    for _ in 0..4 * component_size + 8 {
        let Some((next, nd)) = next_on_boundary(p, resume_direction(d), is_set) else {
            break;
        };
        if p == start && next == second {
            break;
        }
        boundary.push(p);
        p = next;
        d = nd;
    }
    boundary
}

/// Drop points in the middle of straight horizontal, vertical or diagonal runs.
fn compress_runs(points: Vec<PixelPoint>) -> Vec<PixelPoint> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |a: &PixelPoint, b: &PixelPoint| (b.x - a.x, b.y - a.y);
    (0..n)
        .filter(|&i| {
            let previous = &points[(i + n - 1) % n];
            let next = &points[(i + 1) % n];
            step(previous, &points[i]) != step(&points[i], next)
        })
        .map(|i| points[i])
        .collect()
}

fn distance_to_segment(p: &PixelPoint, a: &PixelPoint, b: &PixelPoint) -> f64 {
    let (px, py) = (p.x as f64, p.y as f64);
    let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return (px - ax).hypot(py - ay);
    }
    ((px - ax) * dy - (py - ay) * dx).abs() / length
}

/// Douglas-Peucker on the open chain `points[first..=last]`, marking kept points.
fn simplify_chain(points: &[PixelPoint], first: usize, last: usize, epsilon: f64, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }
    let (mut worst, mut index) = (0.0, first);
    for i in first + 1..last {
        let d = distance_to_segment(&points[i], &points[first], &points[last]);
        if d > worst {
            worst = d;
            index = i;
        }
    }
    if worst > epsilon {
        keep[index] = true;
        simplify_chain(points, first, index, epsilon, keep);
        simplify_chain(points, index, last, epsilon, keep);
    }
}

/// Simplifies a closed contour to a polygon whose edges deviate from it by at most
/// `epsilon`. The contour is split at the point farthest from its first point and the
/// two halves are simplified independently.
pub fn approx_poly_dp(contour: &Contour, epsilon: f64) -> Vec<PixelPoint> {
    let points = &contour.points;
    let n = points.len();
    if n < 3 {
        return points.clone();
    }
    let distance = |i: usize| {
        let (dx, dy) = ((points[i].x - points[0].x) as f64, (points[i].y - points[0].y) as f64);
        dx.hypot(dy)
    };
    let far = (1..n).fold(1, |best, i| if distance(i) > distance(best) { i } else { best });

    // Closed ring unrolled: 0 ..= far ..= n (index n is point 0 again).
    let mut ring = points.clone();
    ring.push(points[0]);
    let mut keep = vec![false; n + 1];
    keep[0] = true;
    keep[far] = true;
    simplify_chain(&ring, 0, far, epsilon, &mut keep);
    simplify_chain(&ring, far, n, epsilon, &mut keep);

    (0..n).filter(|&i| keep[i]).map(|i| ring[i]).collect()
}

/// Scanline fill of a simple polygon into a fresh mask of the given size.
pub fn fill_polygon_mask(width: u32, height: u32, polygon: &[Point2<f64>]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let n = polygon.len();
    if n < 3 {
        return mask;
    }
    for y in 0..height {
        let yc = y as f64;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..n {
            let (a, b) = (polygon[i], polygon[(i + 1) % n]);
            // Half-open rule so that shared vertices are counted once.
            if (a.y <= yc && b.y > yc) || (b.y <= yc && a.y > yc) {
                crossings.push(a.x + (yc - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let from = span[0].ceil().max(0.0);
            let to = span[1].floor().min(width as f64 - 1.0);
            if from > to {
                continue;
            }
            for x in from as u32..=to as u32 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// 3x3 morphology. Pixels outside of the image do not take part.
fn morphology(mask: &GrayImage, take_min: bool) -> GrayImage {
    let (width, height) = (mask.width() as i32, mask.height() as i32);
    let mut out = GrayImage::new(mask.width(), mask.height());
    out.par_chunks_mut(width.max(1) as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as i32;
            for x in 0..width {
                let mut value = mask.get_pixel(x as u32, y as u32)[0];
                for (nx, ny) in (-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (x + dx, y + dy))) {
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let v = mask.get_pixel(nx as u32, ny as u32)[0];
                    value = if take_min { value.min(v) } else { value.max(v) };
                }
                row[x as usize] = value;
            }
        });
    out
}

pub fn erode(mask: &GrayImage, iterations: usize) -> GrayImage {
    (0..iterations).fold(mask.clone(), |m, _| morphology(&m, true))
}

pub fn dilate(mask: &GrayImage, iterations: usize) -> GrayImage {
    (0..iterations).fold(mask.clone(), |m, _| morphology(&m, false))
}
