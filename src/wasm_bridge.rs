#![cfg(target_arch = "wasm32")]
#![cfg(feature = "wasm")]

//! JS-facing surface of the tracking core.
//!
//! The browser host owns the camera element and the renderer; per animation
//! tick it hands the current RGBA frame to [`WasmTracker::process`] and gets
//! back one renderer-ready transform per tracked marker. Frame scheduling,
//! drawable lifecycle and rendering stay on the JS side.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::config::TrackerConfig;
use crate::core::detector::{Detector, DetectorOptions};
use crate::core::dictionary::Dictionary;
use crate::core::posit::PositEstimator;
use crate::pipeline::transform::{center_corners, TransformConverter};
use crate::ImageBuffer;

#[derive(Serialize)]
pub struct WasmPoint {
    pub x: f32,
    pub y: f32,
}

/// One tracked marker: decode result plus a renderer-space transform.
#[derive(Serialize)]
pub struct WasmTrackedMarker {
    pub id: u32,
    pub corners: Vec<WasmPoint>,
    pub hamming_distance: u32,
    /// Position in renderer world units (x right, y up, z toward viewer).
    pub position: [f64; 3],
    /// Rotation as a unit quaternion `[x, y, z, w]`.
    pub rotation: [f64; 4],
    /// Uniform distance-compensation scale.
    pub scale: f64,
    /// Mean corner reprojection error, degrees.
    pub pose_error: f64,
}

/// JS-facing tracker: detection, pose and coordinate conversion in one call.
#[wasm_bindgen]
pub struct WasmTracker {
    config: TrackerConfig,
    detector: Detector,
    converter: TransformConverter,
    estimator: Option<(u32, PositEstimator)>,
}

#[wasm_bindgen]
impl WasmTracker {
    /// `config` is an optional plain object deserialized into
    /// [`TrackerConfig`]; absent fields take their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(dict_name: &str, config: JsValue) -> Result<WasmTracker, JsValue> {
        let config: TrackerConfig = if config.is_undefined() || config.is_null() {
            TrackerConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(|e| JsValue::from_str(&e.to_string()))?
        };

        let dictionary =
            Dictionary::from_name(dict_name).map_err(|e| JsValue::from_str(&e.to_string()))?;

        let options = DetectorOptions {
            warp_size: config.warp_size,
            max_hamming_distance: config.max_hamming_distance,
            min_contour_fraction: config.min_contour_fraction,
            min_edge_length_px: config.min_edge_length_px,
            ..DetectorOptions::default()
        };

        Ok(WasmTracker {
            detector: Detector::new(dictionary, options),
            converter: TransformConverter::new(&config),
            estimator: None,
            config,
        })
    }

    /// Primary per-frame endpoint avoiding memory copies: `image_data` is the
    /// flat RGBA byte array of one `width` x `height` frame.
    ///
    /// Returns an array of tracked markers. Markers whose pose cannot be
    /// solved are omitted; a degenerate buffer is an error the caller should
    /// treat as "skip this cycle".
    pub fn process(
        &mut self,
        width: u32,
        height: u32,
        image_data: &[u8],
    ) -> Result<JsValue, JsValue> {
        let buffer = ImageBuffer {
            data: image_data,
            width,
            height,
        };

        let observations = self
            .detector
            .detect(&buffer)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;

        let estimator: &PositEstimator = match &mut self.estimator {
            Some((w, est)) if *w == width => &*est,
            slot => {
                let focal = TrackerConfig::focal_length_for(width);
                &slot
                    .insert((width, PositEstimator::new(self.config.marker_size_mm, focal)))
                    .1
            }
        };

        let mut tracked = Vec::with_capacity(observations.len());
        for observation in &observations {
            let centered = center_corners(&observation.corners, width, height);
            let Ok(solution) = estimator.estimate(&centered) else {
                continue;
            };
            let transform = self.converter.convert(&solution.best);
            let q = transform.rotation.coords;
            tracked.push(WasmTrackedMarker {
                id: observation.id,
                corners: observation
                    .corners
                    .iter()
                    .map(|p| WasmPoint { x: p.x, y: p.y })
                    .collect(),
                hamming_distance: observation.hamming_distance,
                position: [
                    transform.position.x,
                    transform.position.y,
                    transform.position.z,
                ],
                rotation: [q.x, q.y, q.z, q.w],
                scale: transform.scale,
                pose_error: solution.best.error,
            });
        }

        serde_wasm_bindgen::to_value(&tracked).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
