//! Pose-to-transform conversion: the single place where estimator and
//! renderer coordinate conventions meet.
//!
//! Estimator frame: X right, Y down, Z forward (camera looking along +Z),
//! translations in millimeters, rotations row-major model-to-camera.
//! Renderer frame: X right, Y up, Z toward the viewer, world units.
//!
//! The fixed correction is conjugation by `C = diag(1, -1, -1)` (flip Y for
//! the image-down to world-up change, flip Z for the camera-forward to
//! viewer-forward change; `det C = +1`, so handedness and properness are
//! preserved): `R' = C * R * C`, `t' = C * t * world_units_per_mm`. Callers
//! consume the result as-is; no per-site sign fixes exist anywhere else.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use crate::config::TrackerConfig;
use crate::core::posit::PoseEstimate;
use crate::{MarkerCorners, Point2f};

/// A renderer-ready transform: position and rotation in renderer space
/// plus a uniform scale.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTransform {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: f64,
}

impl RenderTransform {
    /// Homogeneous 4x4 matrix (column-major storage, nalgebra convention).
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        let scaled = self.rotation.to_rotation_matrix().into_inner() * self.scale;
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&scaled);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position);
        m
    }
}

/// Converts pose estimates into renderer transforms under one documented
/// convention.
#[derive(Debug, Clone)]
pub struct TransformConverter {
    world_units_per_mm: f64,
    reference_distance_mm: f64,
    min_scale: f64,
    max_scale: f64,
}

impl TransformConverter {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            world_units_per_mm: config.world_units_per_mm,
            reference_distance_mm: config.reference_distance_mm,
            min_scale: config.min_scale,
            max_scale: config.max_scale,
        }
    }

    /// Maps a successful pose estimate into renderer space.
    ///
    /// Failed estimates never reach this function; the pipeline treats
    /// them as a missed observation and keeps the previous transform.
    pub fn convert(&self, pose: &PoseEstimate) -> RenderTransform {
        let c = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
        let rotation_renderer = c * pose.rotation * c;
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_renderer));

        let position = c * pose.translation * self.world_units_per_mm;

        RenderTransform {
            position,
            rotation,
            scale: self.distance_scale(pose.translation.z),
        }
    }

    /// Uncalibrated distance compensation: apparent size is adjusted as an
    /// inverse function of estimated distance, clamped so pose noise at
    /// extreme ranges cannot produce degenerate overlays.
    fn distance_scale(&self, distance_mm: f64) -> f64 {
        if distance_mm <= 0.0 {
            return self.min_scale;
        }
        (self.reference_distance_mm / distance_mm).clamp(self.min_scale, self.max_scale)
    }
}

/// Re-centers detector pixel corners on the optical axis (image center),
/// the coordinate frame POSIT expects. Y stays image-down; the converter
/// owns the handedness change.
pub fn center_corners(corners: &MarkerCorners, width: u32, height: u32) -> MarkerCorners {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    corners.map(|c| Point2f::new(c.x - cx, c.y - cy))
}
