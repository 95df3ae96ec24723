// Copyright (c) 2026 artrack contributors
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT
//! Image primitives backing the marker detector.
//!
//! The established image-processing steps (adaptive threshold, Otsu, Suzuki
//! contour tracing, Douglas-Peucker simplification, perspective warp) come
//! from `imageproc`; this module wraps them behind buffer-reusing helpers
//! plus the small quad-geometry filters the detector needs.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;

use crate::{ImageBuffer, MarkerCorners};

/// Converts an RGBA frame to grayscale into a reusable buffer.
///
/// `dst` is resized only when the frame dimensions change, not per frame.
pub fn grayscale_into(src: &ImageBuffer, dst: &mut Vec<u8>) {
    let pixels = src.pixel_count();
    dst.resize(pixels, 0);

    // Weighted average: 0.299R + 0.587G + 0.114B
    for (out, px) in dst.iter_mut().zip(src.data.chunks_exact(4)) {
        let r = px[0] as f32;
        let g = px[1] as f32;
        let b = px[2] as f32;
        *out = (r * 0.299 + g * 0.587 + b * 0.114 + 0.5) as u8;
    }
}

/// Adaptive threshold with dark pixels as foreground.
///
/// A pixel becomes foreground (255) when it is at least `offset` levels
/// darker than the local mean over a `(2 * block_radius + 1)^2` window.
/// Markers are black-on-white, so this leaves marker borders as the traced
/// foreground and uniform regions as background.
pub fn binarize_adaptive(gray: &GrayImage, block_radius: u32, offset: u8) -> GrayImage {
    let mean = imageproc::filter::box_filter(gray, block_radius, block_radius);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (dst, (src, m)) in out
        .iter_mut()
        .zip(gray.iter().zip(mean.iter()))
    {
        *dst = if (*src as i16) <= (*m as i16) - (offset as i16) {
            255
        } else {
            0
        };
    }
    out
}

/// Warps the quadrilateral `corners` of `gray` into the square `patch`.
///
/// Returns `false` when the corners do not define an invertible projection
/// (degenerate quad); `patch` contents are unspecified in that case.
pub fn warp_patch_into(gray: &GrayImage, corners: &MarkerCorners, patch: &mut GrayImage) -> bool {
    let size = patch.width() as f32;
    let from = [
        (corners[0].x, corners[0].y),
        (corners[1].x, corners[1].y),
        (corners[2].x, corners[2].y),
        (corners[3].x, corners[3].y),
    ];
    let to = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)];

    // `warp_into` samples the input through the inverse mapping, so the
    // projection goes quad -> unit square.
    match Projection::from_control_points(from, to) {
        Some(projection) => {
            warp_into(gray, &projection, Interpolation::Bilinear, Luma([0u8]), patch);
            true
        }
        None => false,
    }
}

/// Binarizes a warped marker patch in place using its Otsu level.
pub fn binarize_otsu_mut(patch: &mut GrayImage) {
    let level = imageproc::contrast::otsu_level(patch);
    imageproc::contrast::threshold_mut(patch, level, imageproc::contrast::ThresholdType::Binary);
}

/// Counts non-zero pixels inside an axis-aligned cell of `img`.
pub fn count_nonzero(img: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> u32 {
    let mut count = 0;
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            if img.get_pixel(x, y)[0] != 0 {
                count += 1;
            }
        }
    }
    count
}

/// Tests whether a closed polygon is strictly convex.
pub fn is_convex(points: &[Point<i32>]) -> bool {
    let len = points.len();
    if len < 3 {
        return false;
    }

    let mut orientation = 0u8;
    let mut prev = points[len - 1];
    let mut cur = points[0];
    let mut dx0 = cur.x - prev.x;
    let mut dy0 = cur.y - prev.y;

    let mut j = 0;
    for _ in 0..len {
        j = (j + 1) % len;
        prev = cur;
        cur = points[j];

        let dx = cur.x - prev.x;
        let dy = cur.y - prev.y;

        // i64 cross product avoids overflow on large contours
        let cross = (dy as i64) * (dx0 as i64) - (dx as i64) * (dy0 as i64);
        orientation |= if cross > 0 {
            1
        } else if cross < 0 {
            2
        } else {
            0
        };
        if orientation == 3 {
            return false;
        }

        dx0 = dx;
        dy0 = dy;
    }
    true
}

/// Shortest edge of a closed polygon, in pixels.
pub fn min_edge_length(points: &[Point<i32>]) -> f64 {
    let len = points.len();
    if len <= 1 {
        return 0.0;
    }

    let mut min_sq = f64::INFINITY;
    let mut j = len - 1;
    for (i, p) in points.iter().enumerate() {
        let dx = (p.x - points[j].x) as f64;
        let dy = (p.y - points[j].y) as f64;
        min_sq = min_sq.min(dx * dx + dy * dy);
        j = i;
    }
    min_sq.sqrt()
}

/// Perimeter of a closed quad in pixel space.
pub fn quad_perimeter(corners: &MarkerCorners) -> f32 {
    let mut len = 0.0;
    for i in 0..4 {
        let d = corners[(i + 1) % 4] - corners[i];
        len += d.norm();
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point2f;

    fn quad(points: [(i32, i32); 4]) -> Vec<Point<i32>> {
        points.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn convexity() {
        assert!(is_convex(&quad([(0, 0), (10, 0), (10, 10), (0, 10)])));

        let concave = vec![
            Point::new(0, 0),
            Point::new(2, 0),
            Point::new(2, 1),
            Point::new(1, 1),
            Point::new(1, 2),
            Point::new(0, 2),
        ];
        assert!(!is_convex(&concave));
    }

    #[test]
    fn edge_lengths() {
        let q = quad([(0, 0), (10, 0), (10, 4), (0, 4)]);
        assert!((min_edge_length(&q) - 4.0).abs() < 1e-9);

        let c = [
            Point2f::new(0.0, 0.0),
            Point2f::new(3.0, 0.0),
            Point2f::new(3.0, 4.0),
            Point2f::new(0.0, 4.0),
        ];
        assert!((quad_perimeter(&c) - 14.0).abs() < 1e-5);
    }

    #[test]
    fn grayscale_reuses_buffer() {
        let data = vec![100u8; 4 * 4 * 4];
        let buf = ImageBuffer {
            data: &data,
            width: 4,
            height: 4,
        };
        let mut dst = Vec::new();
        grayscale_into(&buf, &mut dst);
        assert_eq!(dst.len(), 16);
        // 0.299*100 + 0.587*100 + 0.114*100 = 100
        assert_eq!(dst[0], 100);

        let cap = dst.capacity();
        grayscale_into(&buf, &mut dst);
        assert_eq!(dst.capacity(), cap);
    }

    #[test]
    fn warp_rejects_degenerate_quad() {
        let gray = GrayImage::new(32, 32);
        let mut patch = GrayImage::new(8, 8);
        let collinear = [
            Point2f::new(0.0, 0.0),
            Point2f::new(10.0, 0.0),
            Point2f::new(20.0, 0.0),
            Point2f::new(30.0, 0.0),
        ];
        assert!(!warp_patch_into(&gray, &collinear, &mut patch));
    }

    #[test]
    fn count_nonzero_clips_to_image() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(3, 3, Luma([255]));
        assert_eq!(count_nonzero(&img, 2, 2, 10, 10), 1);
        assert_eq!(count_nonzero(&img, 0, 0, 2, 2), 0);
    }
}
