// Copyright (c) 2026 artrack contributors
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT
//! Marker-tracking core for browser AR overlays.
//!
//! Per animation tick the pipeline extracts a frame from a
//! [`pipeline::frame::FrameSource`], detects fiducial markers, estimates each
//! marker's camera-relative pose with POSIT, converts the pose into a
//! renderer-space transform and drives the lifecycle (create / update /
//! remove) of one drawable per tracked marker id. Rendering itself is owned
//! by the host; the pipeline only talks to it through the
//! [`pipeline::lifecycle::SceneRenderer`] trait.

use nalgebra::Vector2;

/// 2D point with floating point precision (f32 for WASM interop)
pub type Point2f = Vector2<f32>;

/// 2D point in integer pixel coordinates
pub type Point2i = Vector2<i32>;

/// The four corners of a detected marker, clockwise in image space.
/// Corner order is significant: it fixes marker orientation.
pub type MarkerCorners = [Point2f; 4];

/// A single per-frame marker sighting.
///
/// This is the only detector output type the rest of the pipeline sees;
/// observations carry no identity across frames except `id` equality.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    /// Decoded dictionary id of the marker.
    pub id: u32,
    /// The 4 corners bounding the marker in image pixel coordinates.
    pub corners: MarkerCorners,
    /// Hamming distance accepted during decoding (0 = exact codeword).
    pub hamming_distance: u32,
}

/// Zero-copy image buffer for JS/native interop.
/// Maps WASM memory or native video buffers without copying.
pub struct ImageBuffer<'a> {
    /// 1D contiguous array of 8-bit pixels (RGBA or grayscale by context).
    pub data: &'a [u8],
    /// Logical width of the frame in pixels.
    pub width: u32,
    /// Logical height of the frame in pixels.
    pub height: u32,
}

impl ImageBuffer<'_> {
    /// Number of pixels described by the declared dimensions.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

/// Errors surfaced by the tracking core.
///
/// Per-cycle, per-marker failures (a bad detection, an unsolvable pose) are
/// recovered locally inside the pipeline and never reach the host through
/// this type; only initialization and source-level failures do.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Pixel buffer has zero area or does not match the declared dimensions.
    #[error("invalid frame buffer ({width}x{height}, {len} bytes)")]
    InvalidBuffer { width: u32, height: u32, len: usize },

    /// Corner configuration is unsolvable (near-collinear corners) or the
    /// iteration produced a non-finite or non-orthonormal result.
    #[error("pose estimation failed: {0}")]
    PoseEstimationFailed(&'static str),

    /// The requested dictionary is not compiled in.
    #[error("unknown marker dictionary {0:?}")]
    DictionaryMismatch(String),

    /// The frame source could not be initialized or started. This is the
    /// one error class the host must show to the user.
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;

pub mod config;
pub mod core;
pub mod cv;
pub mod pipeline;

#[cfg(feature = "wasm")]
pub mod wasm_bridge;

pub use config::TrackerConfig;
pub use self::core::detector::Detector;
pub use self::core::posit::{PoseEstimate, PositEstimator};
pub use pipeline::TrackingSession;
