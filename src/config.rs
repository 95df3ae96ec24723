//! Run-time configuration for a tracking session.
//!
//! One instance is supplied when the session is constructed; nothing in the
//! pipeline reads module-global state.

use serde::{Deserialize, Serialize};

/// Tunables for the whole detection-to-render pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Physical side length of the printed marker, in millimeters. POSIT
    /// translations come back in the same unit.
    pub marker_size_mm: f64,

    /// Run detection every `detection_cadence`-th frame (K). Rendering still
    /// happens every frame; this is the primary CPU-load lever.
    pub detection_cadence: u32,

    /// Number of consecutive detection cycles a marker may go unobserved
    /// before its drawable is detached. A single missed detection must not
    /// cause flicker, so this is never 0.
    pub miss_tolerance: u32,

    /// Consecutive detection cycles without an available frame before all
    /// tracked objects are cleared (camera revoked, stream stopped).
    pub source_stall_tolerance: u32,

    /// Renderer world units per millimeter of physical space.
    pub world_units_per_mm: f64,

    /// Distance at which overlays render at nominal scale, in millimeters.
    pub reference_distance_mm: f64,

    /// Clamp range for distance-based scale compensation. Pose noise at
    /// extreme ranges must not produce degenerate overlays.
    pub min_scale: f64,
    pub max_scale: f64,

    /// Side length of the square patch markers are warped into for decoding.
    pub warp_size: u32,

    /// Maximum Hamming distance accepted when matching the code book.
    pub max_hamming_distance: u32,

    /// Minimum contour length relative to image width for a candidate quad.
    pub min_contour_fraction: f32,

    /// Absolute minimum edge length of a candidate quad, in pixels.
    pub min_edge_length_px: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            marker_size_mm: 50.0,
            detection_cadence: 3,
            // ~1.2s at 30 FPS with detection every 3rd frame.
            miss_tolerance: 12,
            source_stall_tolerance: 30,
            world_units_per_mm: 0.01,
            reference_distance_mm: 500.0,
            min_scale: 0.5,
            max_scale: 2.0,
            warp_size: 49,
            max_hamming_distance: 0,
            min_contour_fraction: 0.01,
            min_edge_length_px: 10.0,
        }
    }
}

impl TrackerConfig {
    /// Focal length approximated from image width. There is no calibration
    /// step in the product; this bounds absolute pose accuracy and is an
    /// accepted limitation, not a bug.
    pub fn focal_length_for(image_width: u32) -> f64 {
        image_width as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TrackerConfig::default();
        assert!(cfg.miss_tolerance >= 1);
        assert!(cfg.detection_cadence >= 1);
        assert!(cfg.min_scale < cfg.max_scale);
        assert!(cfg.warp_size as usize % 7 == 0);
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let cfg: TrackerConfig = serde_json::from_str("{\"detection_cadence\": 5}").unwrap();
        assert_eq!(cfg.detection_cadence, 5);
        assert_eq!(cfg.miss_tolerance, TrackerConfig::default().miss_tolerance);
    }
}
