//! Marker detector: candidate quad extraction plus code-book decoding.
//!
//! The image-processing internals (thresholding, contour tracing, polygon
//! simplification, perspective warp) are delegated to `imageproc`; this
//! module owns the wrapper logic that turns a raw frame into deduplicated
//! [`MarkerObservation`]s. Detection is stateless across frames apart from
//! reusable scratch buffers.

use std::collections::HashMap;

use image::GrayImage;
use imageproc::contours::{find_contours, Contour};
use imageproc::geometry::approximate_polygon_dp;

use crate::core::dictionary::{Dictionary, DictionaryMatch};
use crate::{cv, ImageBuffer, MarkerCorners, MarkerObservation, Point2f, Result, TrackError};

/// Detection thresholds. Defaults match the original browser client.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// Radius of the local-mean window for adaptive thresholding.
    pub adaptive_block_radius: u32,
    /// Offset below the local mean required for a foreground pixel.
    pub adaptive_offset: u8,
    /// Douglas-Peucker tolerance as a fraction of contour length.
    pub poly_epsilon: f32,
    /// Minimum contour length relative to image width.
    pub min_contour_fraction: f32,
    /// Absolute minimum candidate edge length, in pixels.
    pub min_edge_length_px: f32,
    /// Side of the square patch candidates are warped into.
    pub warp_size: u32,
    /// Maximum Hamming distance accepted during decoding.
    pub max_hamming_distance: u32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            adaptive_block_radius: 3,
            adaptive_offset: 7,
            poly_epsilon: 0.05,
            min_contour_fraction: 0.01,
            min_edge_length_px: 10.0,
            warp_size: 49,
            max_hamming_distance: 0,
        }
    }
}

/// Fiducial marker detector.
pub struct Detector {
    dictionary: Dictionary,
    options: DetectorOptions,
    // Scratch buffers, sized on first frame and reused afterwards.
    gray: Vec<u8>,
    patch: GrayImage,
    bits: Vec<u8>,
}

impl Detector {
    pub fn new(dictionary: Dictionary, options: DetectorOptions) -> Self {
        let warp = options.warp_size;
        let data = dictionary.data_size();
        Self {
            dictionary,
            options,
            gray: Vec::new(),
            patch: GrayImage::new(warp, warp),
            bits: vec![0u8; data * data],
        }
    }

    /// Primary pipeline: grayscale -> adaptive threshold -> contours ->
    /// quad candidates -> warp + decode -> dedup by id.
    ///
    /// Output order is unspecified and each id appears at most once.
    pub fn detect(&mut self, frame: &ImageBuffer) -> Result<Vec<MarkerObservation>> {
        if frame.width == 0 || frame.height == 0 || frame.data.len() < frame.pixel_count() * 4 {
            return Err(TrackError::InvalidBuffer {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }

        cv::grayscale_into(frame, &mut self.gray);
        let gray = GrayImage::from_raw(frame.width, frame.height, std::mem::take(&mut self.gray))
            .expect("scratch buffer sized to frame");

        let binary = cv::binarize_adaptive(
            &gray,
            self.options.adaptive_block_radius,
            self.options.adaptive_offset,
        );
        let contours = find_contours::<i32>(&binary);

        let mut candidates = self.find_candidates(&contours, frame.width);
        clockwise_corners(&mut candidates);
        let min_dist = f32::max(30.0, frame.width as f32 * 0.05);
        let candidates = suppress_nested(candidates, min_dist);

        let markers = self.decode_candidates(&gray, candidates);

        // Hand the backing buffer back for the next frame.
        self.gray = gray.into_raw();
        Ok(markers)
    }

    /// Filters raw contours into convex 4-vertex candidates.
    fn find_candidates(&self, contours: &[Contour<i32>], image_width: u32) -> Vec<MarkerCorners> {
        let min_len = (image_width as f32 * self.options.min_contour_fraction) as usize;
        let mut candidates = Vec::new();

        for contour in contours {
            if contour.points.len() < min_len.max(4) {
                continue;
            }
            let epsilon = contour.points.len() as f64 * self.options.poly_epsilon as f64;
            let poly = approximate_polygon_dp(&contour.points, epsilon, true);

            if poly.len() == 4
                && cv::is_convex(&poly)
                && cv::min_edge_length(&poly) >= self.options.min_edge_length_px as f64
            {
                candidates.push([
                    Point2f::new(poly[0].x as f32, poly[0].y as f32),
                    Point2f::new(poly[1].x as f32, poly[1].y as f32),
                    Point2f::new(poly[2].x as f32, poly[2].y as f32),
                    Point2f::new(poly[3].x as f32, poly[3].y as f32),
                ]);
            }
        }
        candidates
    }

    /// Warps each candidate to a square patch and decodes it against the
    /// dictionary. Duplicate ids keep the decode with the lowest Hamming
    /// distance so downstream stages never see the same id twice.
    fn decode_candidates(
        &mut self,
        gray: &GrayImage,
        candidates: Vec<MarkerCorners>,
    ) -> Vec<MarkerObservation> {
        let mut by_id: HashMap<u32, MarkerObservation> = HashMap::new();

        for candidate in candidates {
            if !cv::warp_patch_into(gray, &candidate, &mut self.patch) {
                continue;
            }
            cv::binarize_otsu_mut(&mut self.patch);

            if let Some((m, corners)) = self.decode_patch(candidate) {
                let obs = MarkerObservation {
                    id: m.id,
                    corners,
                    hamming_distance: m.distance,
                };
                by_id
                    .entry(obs.id)
                    .and_modify(|existing| {
                        if obs.hamming_distance < existing.hamming_distance {
                            *existing = obs.clone();
                        }
                    })
                    .or_insert(obs);
            }
        }
        by_id.into_values().collect()
    }

    /// Samples the binarized patch into a bit grid, validates the black
    /// border, and matches the grid plus its three rotations. The returned
    /// corners are rotated in step with the matched orientation so corner
    /// order always encodes the decoded marker orientation.
    fn decode_patch(&mut self, mut candidate: MarkerCorners) -> Option<(DictionaryMatch, MarkerCorners)> {
        let mark_size = self.dictionary.mark_size();
        let cell = self.patch.width() / mark_size as u32;
        let min_nonzero = cell * cell / 2;

        // Border cells must stay black.
        for i in 0..mark_size {
            let step = if i == 0 || i == mark_size - 1 {
                1
            } else {
                mark_size - 1
            };
            let mut j = 0;
            while j < mark_size {
                let n = cv::count_nonzero(
                    &self.patch,
                    j as u32 * cell,
                    i as u32 * cell,
                    cell,
                    cell,
                );
                if n > min_nonzero {
                    return None;
                }
                j += step;
            }
        }

        // Inner data grid.
        let data = self.dictionary.data_size();
        for i in 0..data {
            for j in 0..data {
                let n = cv::count_nonzero(
                    &self.patch,
                    (j as u32 + 1) * cell,
                    (i as u32 + 1) * cell,
                    cell,
                    cell,
                );
                self.bits[i * data + j] = u8::from(n > min_nonzero);
            }
        }

        let mut best: Option<(DictionaryMatch, MarkerCorners)> = None;
        let mut bits = self.bits.clone();

        for rotation in 0..4 {
            if let Some(m) = self.dictionary.find(&bits, self.options.max_hamming_distance) {
                if best.map_or(true, |(b, _)| m.distance < b.distance) {
                    best = Some((m, candidate));
                }
                if m.distance == 0 {
                    break;
                }
            }
            if rotation < 3 {
                bits = rotate_grid(&bits, data);
                candidate = [candidate[1], candidate[2], candidate[3], candidate[0]];
            }
        }
        best
    }
}

/// Reorders each candidate's corners to clockwise image order.
fn clockwise_corners(candidates: &mut [MarkerCorners]) {
    for candidate in candidates.iter_mut() {
        let d1 = candidate[1] - candidate[0];
        let d2 = candidate[2] - candidate[0];
        if d1.x * d2.y - d1.y * d2.x < 0.0 {
            candidate.swap(1, 3);
        }
    }
}

/// Drops nested or overlapping quads, keeping the larger perimeter.
fn suppress_nested(candidates: Vec<MarkerCorners>, min_dist: f32) -> Vec<MarkerCorners> {
    let len = candidates.len();
    let mut dropped = vec![false; len];

    for i in 0..len {
        for j in (i + 1)..len {
            let mut dist = 0.0;
            for k in 0..4 {
                let d = candidates[i][k] - candidates[j][k];
                dist += d.norm_squared();
            }
            if dist / 4.0 < min_dist * min_dist {
                if cv::quad_perimeter(&candidates[i]) < cv::quad_perimeter(&candidates[j]) {
                    dropped[i] = true;
                } else {
                    dropped[j] = true;
                }
            }
        }
    }

    candidates
        .into_iter()
        .zip(dropped)
        .filter_map(|(c, drop)| (!drop).then_some(c))
        .collect()
}

/// Rotates a flat row-major grid 90 degrees: `src[i][j] -> dst[j][dim-1-i]`.
fn rotate_grid(src: &[u8], dim: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dim * dim];
    for i in 0..dim {
        for j in 0..dim {
            dst[j * dim + (dim - 1 - i)] = src[i * dim + j];
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn detector() -> Detector {
        Detector::new(Dictionary::aruco_original(), DetectorOptions::default())
    }

    /// Renders a marker id into the detector's patch buffer as if it had
    /// been warped from a frame, bypassing the contour stages.
    fn paint_patch(det: &mut Detector, id: u32, rotations: u32) {
        let mark_size = det.dictionary.mark_size() as u32;
        let cell = det.options.warp_size / mark_size;
        let data = det.dictionary.data_size();

        let mut grid = vec![0u8; data * data];
        for (i, g) in grid.iter_mut().enumerate() {
            *g = test_bit(id, i);
        }
        for _ in 0..rotations {
            grid = rotate_grid(&grid, data);
        }

        let mut img = GrayImage::new(det.options.warp_size, det.options.warp_size);
        for y in 0..det.options.warp_size {
            for x in 0..det.options.warp_size {
                let ci = (y / cell).min(mark_size - 1) as usize;
                let cj = (x / cell).min(mark_size - 1) as usize;
                let on_border =
                    ci == 0 || cj == 0 || ci == mark_size as usize - 1 || cj == mark_size as usize - 1;
                let v = if on_border {
                    0
                } else if grid[(ci - 1) * data + (cj - 1)] != 0 {
                    255
                } else {
                    0
                };
                img.put_pixel(x, y, Luma([v]));
            }
        }
        det.patch = img;
    }

    /// Bit `index` (row-major, MSB-first) of the 25-bit ARUCO codeword.
    fn test_bit(id: u32, index: usize) -> u8 {
        const ROW_CODES: [u32; 4] = [0b10000, 0b10111, 0b01001, 0b01110];
        let row = index / 5;
        let col = index % 5;
        let pair = (id >> (8 - 2 * row)) & 0b11;
        ((ROW_CODES[pair as usize] >> (4 - col)) & 1) as u8
    }

    fn unit_candidate() -> MarkerCorners {
        [
            Point2f::new(0.0, 0.0),
            Point2f::new(49.0, 0.0),
            Point2f::new(49.0, 49.0),
            Point2f::new(0.0, 49.0),
        ]
    }

    #[test]
    fn rotate_grid_quarter_turn() {
        let src = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
        assert_eq!(rotate_grid(&src, 3), vec![7, 4, 1, 8, 5, 2, 9, 6, 3]);
    }

    #[test]
    fn clockwise_swaps_counterclockwise_quads() {
        let mut candidates = vec![[
            Point2f::new(0.0, 0.0),
            Point2f::new(0.0, 10.0),
            Point2f::new(10.0, 10.0),
            Point2f::new(10.0, 0.0),
        ]];
        clockwise_corners(&mut candidates);
        assert_eq!(candidates[0][1], Point2f::new(10.0, 0.0));
        assert_eq!(candidates[0][3], Point2f::new(0.0, 10.0));
    }

    #[test]
    fn nested_quads_keep_larger() {
        let outer = [
            Point2f::new(0.0, 0.0),
            Point2f::new(10.0, 0.0),
            Point2f::new(10.0, 10.0),
            Point2f::new(0.0, 10.0),
        ];
        let inner = [
            Point2f::new(1.0, 1.0),
            Point2f::new(9.0, 1.0),
            Point2f::new(9.0, 9.0),
            Point2f::new(1.0, 9.0),
        ];
        let kept = suppress_nested(vec![outer, inner], 5.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], outer);
    }

    #[test]
    fn decodes_painted_patch() {
        let mut det = detector();
        paint_patch(&mut det, 7, 0);
        let (m, _) = det.decode_patch(unit_candidate()).unwrap();
        assert_eq!(m.id, 7);
        assert_eq!(m.distance, 0);
    }

    #[test]
    fn id_survives_all_four_rotations() {
        for rotations in 0..4 {
            let mut det = detector();
            paint_patch(&mut det, 123, rotations);
            let (m, _) = det.decode_patch(unit_candidate()).unwrap();
            assert_eq!(m.id, 123, "rotation {rotations}");
        }
    }

    #[test]
    fn rotated_decode_rotates_corners() {
        let mut det = detector();
        paint_patch(&mut det, 123, 1);
        let (_, corners) = det.decode_patch(unit_candidate()).unwrap();
        // One quarter-turn of grid content shifts the corner start index.
        assert_ne!(corners, unit_candidate());
        let original = unit_candidate();
        assert!(original.contains(&corners[0]));
    }

    #[test]
    fn white_border_is_rejected() {
        let mut det = detector();
        paint_patch(&mut det, 7, 0);
        // Flood one border cell white.
        for y in 0..7 {
            for x in 0..7 {
                det.patch.put_pixel(x, y, Luma([255]));
            }
        }
        assert!(det.decode_patch(unit_candidate()).is_none());
    }

    #[test]
    fn zero_sized_buffer_is_invalid() {
        let mut det = detector();
        let frame = ImageBuffer {
            data: &[],
            width: 0,
            height: 0,
        };
        assert!(matches!(
            det.detect(&frame),
            Err(TrackError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn blank_frame_detects_nothing() {
        let mut det = detector();
        let data = vec![255u8; 64 * 64 * 4];
        let frame = ImageBuffer {
            data: &data,
            width: 64,
            height: 64,
        };
        assert!(det.detect(&frame).unwrap().is_empty());
    }
}
