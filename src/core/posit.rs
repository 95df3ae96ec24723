//! POSIT (Pose from Orthography and Scaling with ITerations) for square
//! planar markers.
//!
//! Given the four marker corners in image coordinates (origin at the image
//! center, optical axis through the origin), the known physical side length
//! and an approximated focal length, the estimator alternates a scaled
//! orthographic solve with a perspective correction until the pose
//! converges. Planar targets admit two pose hypotheses; both are refined
//! and returned ordered by residual error.
//!
//! Conventions: the camera frame is X right, Y down, Z forward, so the
//! translation Z component is positive for a marker in front of the camera.
//! Rotations map marker-model coordinates into the camera frame and are
//! orthonormalized before being returned (`R * R^T = I`, `det R = +1`).

use nalgebra::{Matrix3, Vector3};

use crate::{MarkerCorners, Point2f, Result, TrackError};

const MAX_ITERATIONS: usize = 100;
/// Residual (mean corner-angle mismatch, degrees) below which iteration stops.
const CONVERGENCE_ERROR_DEG: f64 = 0.5;
/// Minimum quad area in px^2 before the corner configuration is treated as
/// collinear and therefore unsolvable.
const MIN_QUAD_AREA: f64 = 1.0;

/// A camera-relative marker pose.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Marker center in camera coordinates, same unit as the model size
    /// (millimeters in this product).
    pub translation: Vector3<f64>,
    /// Orthonormal rotation, marker model frame to camera frame.
    pub rotation: Matrix3<f64>,
    /// Iterative-refinement residual; lower is better. No hard accept
    /// threshold is applied here by design.
    pub error: f64,
}

/// Both refined hypotheses of the planar pose ambiguity.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSolution {
    pub best: PoseEstimate,
    pub alternative: PoseEstimate,
}

/// Pose estimator for one fixed marker geometry and focal length.
///
/// The model-dependent pseudo-inverse and plane normal are computed once at
/// construction; `estimate` allocates nothing.
pub struct PositEstimator {
    model: [Vector3<f64>; 4],
    focal_length: f64,
    model_vectors: Matrix3<f64>,
    model_normal: Vector3<f64>,
    model_pseudo_inverse: Matrix3<f64>,
}

impl PositEstimator {
    /// Creates an estimator for a square marker with side `model_size`
    /// (physical units) seen through a pinhole of `focal_length` pixels.
    pub fn new(model_size: f64, focal_length: f64) -> Self {
        // Corner order matches the detector's clockwise image order for an
        // upright marker: top-left, top-right, bottom-right, bottom-left in
        // the y-down camera frame.
        let half = model_size / 2.0;
        let model = [
            Vector3::new(-half, -half, 0.0),
            Vector3::new(half, -half, 0.0),
            Vector3::new(half, half, 0.0),
            Vector3::new(-half, half, 0.0),
        ];

        let model_vectors = Matrix3::from_rows(&[
            (model[1] - model[0]).transpose(),
            (model[2] - model[0]).transpose(),
            (model[3] - model[0]).transpose(),
        ]);

        let svd = model_vectors.svd(true, true);
        // Plane normal: right-singular vector of the smallest singular
        // value (zero for a planar model). Singular values come back in
        // descending order.
        let v_t = svd.v_t.expect("svd requested with both factors");
        let model_normal = v_t.row(2).transpose();
        let model_pseudo_inverse = svd
            .pseudo_inverse(1e-12)
            .expect("svd requested with both factors");

        Self {
            model,
            focal_length,
            model_vectors,
            model_normal,
            model_pseudo_inverse,
        }
    }

    /// Estimates the marker pose from 4 image-centered corner points.
    ///
    /// Fails explicitly for degenerate (near-collinear) corner
    /// configurations or when refinement produces a non-finite pose; a
    /// failed estimate must be treated like a missed observation, never as
    /// a best-effort pose.
    pub fn estimate(&self, points: &MarkerCorners) -> Result<PoseSolution> {
        if quad_area(points) < MIN_QUAD_AREA {
            return Err(TrackError::PoseEstimationFailed("collinear corners"));
        }

        let mut rotation1 = Matrix3::identity();
        let mut rotation2 = Matrix3::identity();
        let mut translation1 = Vector3::zeros();
        let mut translation2 = Vector3::zeros();

        self.pos(
            points,
            &Vector3::new(1.0, 1.0, 1.0),
            &mut rotation1,
            &mut translation1,
            &mut rotation2,
            &mut translation2,
        );

        let error1 = self.refine(points, &mut rotation1, &mut translation1);
        let error2 = self.refine(points, &mut rotation2, &mut translation2);

        let first = finalize(rotation1, translation1, error1)?;
        let second = finalize(rotation2, translation2, error2)?;

        let (best, alternative) = if first.error < second.error {
            (first, second)
        } else {
            (second, first)
        };
        Ok(PoseSolution { best, alternative })
    }

    /// One scaled-orthographic solve under the perspective correction
    /// `eps`, producing both branches of the planar ambiguity.
    fn pos(
        &self,
        points: &MarkerCorners,
        eps: &Vector3<f64>,
        rotation1: &mut Matrix3<f64>,
        translation1: &mut Vector3<f64>,
        rotation2: &mut Matrix3<f64>,
        translation2: &mut Vector3<f64>,
    ) {
        let xi = Vector3::new(points[1].x as f64, points[2].x as f64, points[3].x as f64);
        let yi = Vector3::new(points[1].y as f64, points[2].y as f64, points[3].y as f64);

        let xs = xi.component_mul(eps).add_scalar(-(points[0].x as f64));
        let ys = yi.component_mul(eps).add_scalar(-(points[0].y as f64));

        let i0 = self.model_pseudo_inverse * xs;
        let j0 = self.model_pseudo_inverse * ys;

        let s = j0.norm_squared() - i0.norm_squared();
        let ij = i0.dot(&j0);

        // Solve r^2 * cos/sin(2*theta) = (-s, -2*ij) for the out-of-plane
        // components lambda, mu of i and j.
        let (r, theta) = if s == 0.0 {
            let theta = if ij < 0.0 {
                std::f64::consts::FRAC_PI_2
            } else if ij > 0.0 {
                -std::f64::consts::FRAC_PI_2
            } else {
                0.0
            };
            ((2.0 * ij).abs().sqrt(), theta)
        } else {
            let r = (s * s + 4.0 * ij * ij).sqrt().sqrt();
            let mut theta = (-2.0 * ij / s).atan();
            if s < 0.0 {
                theta += std::f64::consts::PI;
            }
            (r, theta / 2.0)
        };

        let lambda = r * theta.cos();
        let mu = r * theta.sin();

        self.branch(points, &i0, &j0, lambda, mu, rotation1, translation1);
        self.branch(points, &i0, &j0, -lambda, -mu, rotation2, translation2);
    }

    /// Builds one rotation/translation hypothesis from the in-plane
    /// solution plus a signed out-of-plane component.
    fn branch(
        &self,
        points: &MarkerCorners,
        i0: &Vector3<f64>,
        j0: &Vector3<f64>,
        lambda: f64,
        mu: f64,
        rotation: &mut Matrix3<f64>,
        translation: &mut Vector3<f64>,
    ) {
        let mut i = i0 + self.model_normal * lambda;
        let mut j = j0 + self.model_normal * mu;
        let i_norm = i.normalize_mut();
        let j_norm = j.normalize_mut();
        let k = i.cross(&j);

        *rotation = Matrix3::from_rows(&[i.transpose(), j.transpose(), k.transpose()]);

        let scale = (i_norm + j_norm) / 2.0;
        let projected = *rotation * self.model[0];
        *translation = Vector3::new(
            points[0].x as f64 / scale - projected.x,
            points[0].y as f64 / scale - projected.y,
            self.focal_length / scale,
        );
    }

    /// Alternates orthographic solve and perspective correction until the
    /// residual converges, caps out, or starts growing.
    fn refine(
        &self,
        points: &MarkerCorners,
        rotation: &mut Matrix3<f64>,
        translation: &mut Vector3<f64>,
    ) -> f64 {
        let mut prev_error = f64::INFINITY;
        let mut rotation1 = Matrix3::identity();
        let mut rotation2 = Matrix3::identity();
        let mut translation1 = Vector3::zeros();
        let mut translation2 = Vector3::zeros();
        let mut error = f64::INFINITY;

        for _ in 0..MAX_ITERATIONS {
            if translation.z == 0.0 || !translation.z.is_finite() {
                break;
            }

            // Perspective correction from the previous depth estimate:
            // eps_p = 1 + (model vector p) . k / tz
            let k = rotation.row(2).transpose();
            let eps = ((self.model_vectors * k) / translation.z).add_scalar(1.0);

            self.pos(
                points,
                &eps,
                &mut rotation1,
                &mut translation1,
                &mut rotation2,
                &mut translation2,
            );

            let error1 = self.reprojection_error(points, &rotation1, &translation1);
            let error2 = self.reprojection_error(points, &rotation2, &translation2);

            if error1 < error2 {
                *rotation = rotation1;
                *translation = translation1;
                error = error1;
            } else {
                *rotation = rotation2;
                *translation = translation2;
                error = error2;
            }

            if error <= CONVERGENCE_ERROR_DEG || error > prev_error {
                break;
            }
            prev_error = error;
        }

        error
    }

    /// Mean absolute difference between observed and modeled inner corner
    /// angles, in degrees. Angle-based residuals stay comparable across
    /// marker scales.
    fn reprojection_error(
        &self,
        points: &MarkerCorners,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> f64 {
        let mut modeled = [Point2f::new(0.0, 0.0); 4];
        for (m, v) in modeled.iter_mut().zip(self.model.iter()) {
            let p = rotation * v + translation;
            if p.z == 0.0 {
                return f64::INFINITY;
            }
            *m = Point2f::new(
                (p.x * self.focal_length / p.z) as f32,
                (p.y * self.focal_length / p.z) as f32,
            );
        }

        let mut sum = 0.0;
        for c in 0..4 {
            let prev = (c + 3) % 4;
            let next = (c + 1) % 4;
            let observed = corner_angle(&points[c], &points[next], &points[prev]);
            let estimated = corner_angle(&modeled[c], &modeled[next], &modeled[prev]);
            sum += (observed - estimated).abs();
        }
        sum / 4.0
    }
}

/// Snaps a refined rotation to the nearest orthonormal matrix and checks
/// the pose is usable.
fn finalize(rotation: Matrix3<f64>, translation: Vector3<f64>, error: f64) -> Result<PoseEstimate> {
    if !translation.iter().all(|v| v.is_finite()) || !rotation.iter().all(|v| v.is_finite()) {
        return Err(TrackError::PoseEstimationFailed("non-finite pose"));
    }
    if !error.is_finite() {
        return Err(TrackError::PoseEstimationFailed("residual did not converge"));
    }

    // POSIT normalizes i and j independently, so rows can drift slightly
    // off orthogonal; rebuild j from k x i.
    let i = rotation.row(0).transpose().normalize();
    let mut k = rotation.row(0).transpose().cross(&rotation.row(1).transpose());
    if k.normalize_mut() == 0.0 {
        return Err(TrackError::PoseEstimationFailed("degenerate rotation"));
    }
    let j = k.cross(&i);
    let rotation = Matrix3::from_rows(&[i.transpose(), j.transpose(), k.transpose()]);

    Ok(PoseEstimate {
        translation,
        rotation,
        error,
    })
}

/// Shoelace area of the corner quad, in px^2.
fn quad_area(points: &MarkerCorners) -> f64 {
    let mut twice_area = 0.0;
    for i in 0..4 {
        let a = points[i];
        let b = points[(i + 1) % 4];
        twice_area += (a.x as f64) * (b.y as f64) - (b.x as f64) * (a.y as f64);
    }
    (twice_area / 2.0).abs()
}

/// Inner angle at `at` spanned by `b` and `c`, in degrees.
fn corner_angle(at: &Point2f, b: &Point2f, c: &Point2f) -> f64 {
    let v1 = b - at;
    let v2 = c - at;
    let dot = (v1.x as f64) * (v2.x as f64) + (v1.y as f64) * (v2.y as f64);
    let mag = (v1.norm() as f64) * (v2.norm() as f64);
    if mag == 0.0 {
        return 0.0;
    }
    (dot / mag).clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    const FOCAL: f64 = 640.0;
    const MARKER_MM: f64 = 50.0;

    /// Projects the marker model through a pinhole at a known pose.
    fn project(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> MarkerCorners {
        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let mut corners = [Point2f::new(0.0, 0.0); 4];
        for (c, m) in corners.iter_mut().zip(estimator.model.iter()) {
            let p = rotation * m + translation;
            *c = Point2f::new((p.x * FOCAL / p.z) as f32, (p.y * FOCAL / p.z) as f32);
        }
        corners
    }

    fn angular_difference_deg(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
        let relative = a * b.transpose();
        let cos = ((relative.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
        cos.acos().to_degrees()
    }

    #[test]
    fn frontal_marker_depth() {
        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        // 50mm marker spanning 100px at the image center, corners clockwise.
        let half = 50.0;
        let points = [
            Point2f::new(-half, -half),
            Point2f::new(half, -half),
            Point2f::new(half, half),
            Point2f::new(-half, half),
        ];

        let pose = estimator.estimate(&points).unwrap().best;
        // Expected depth: focal * physical / apparent = 640 * 50 / 100.
        assert!(pose.translation.z > 0.0);
        assert_relative_eq!(pose.translation.z, 320.0, max_relative = 0.01);
        assert!(pose.translation.x.abs() < 1.0);
        assert!(pose.translation.y.abs() < 1.0);
    }

    #[test]
    fn oblique_pose_roundtrip() {
        // Focal length is approximated from image width in the product, so
        // tolerances here are deliberately loose: 5% translation, 5 deg.
        let truth_r = Rotation3::from_euler_angles(0.35, -0.2, 0.1);
        let truth_t = Vector3::new(30.0, -20.0, 400.0);
        let corners = project(truth_r.matrix(), &truth_t);

        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let pose = estimator.estimate(&corners).unwrap().best;

        let translation_error = (pose.translation - truth_t).norm() / truth_t.norm();
        assert!(
            translation_error < 0.05,
            "translation off by {:.1}%",
            translation_error * 100.0
        );
        let rotation_error = angular_difference_deg(&pose.rotation, truth_r.matrix());
        assert!(rotation_error < 5.0, "rotation off by {rotation_error:.2} deg");
    }

    #[test]
    fn rotations_are_orthonormal_and_proper() {
        let truth_r = Rotation3::from_euler_angles(0.5, 0.3, -0.4);
        let truth_t = Vector3::new(-60.0, 45.0, 700.0);
        let corners = project(truth_r.matrix(), &truth_t);

        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let solution = estimator.estimate(&corners).unwrap();

        for pose in [&solution.best, &solution.alternative] {
            let gram = pose.rotation * pose.rotation.transpose();
            assert_relative_eq!(gram, Matrix3::identity(), epsilon = 1e-9);
            assert_relative_eq!(pose.rotation.determinant(), 1.0, epsilon = 1e-9);
        }
        assert!(solution.best.error <= solution.alternative.error);
    }

    #[test]
    fn collinear_corners_fail_explicitly() {
        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let points = [
            Point2f::new(0.0, 0.0),
            Point2f::new(10.0, 0.0),
            Point2f::new(20.0, 0.0),
            Point2f::new(30.0, 0.0),
        ];
        assert!(matches!(
            estimator.estimate(&points),
            Err(TrackError::PoseEstimationFailed(_))
        ));
    }

    #[test]
    fn randomized_poses_solve_and_stay_orthonormal() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let truth_r = Rotation3::from_euler_angles(
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
            );
            let truth_t = Vector3::new(
                rng.gen_range(-80.0..80.0),
                rng.gen_range(-80.0..80.0),
                rng.gen_range(300.0..800.0),
            );
            let corners = project(truth_r.matrix(), &truth_t);

            let pose = estimator.estimate(&corners).unwrap().best;
            let gram = pose.rotation * pose.rotation.transpose();
            assert_relative_eq!(gram, Matrix3::identity(), epsilon = 1e-9);
            let depth_error = (pose.translation.z - truth_t.z).abs() / truth_t.z;
            assert!(depth_error < 0.1, "depth off by {:.1}%", depth_error * 100.0);
        }
    }

    #[test]
    fn depth_scales_inversely_with_apparent_size() {
        let estimator = PositEstimator::new(MARKER_MM, FOCAL);
        let near = project(&Matrix3::identity(), &Vector3::new(0.0, 0.0, 300.0));
        let far = project(&Matrix3::identity(), &Vector3::new(0.0, 0.0, 600.0));

        let z_near = estimator.estimate(&near).unwrap().best.translation.z;
        let z_far = estimator.estimate(&far).unwrap().best.translation.z;
        assert_relative_eq!(z_near, 300.0, max_relative = 0.02);
        assert_relative_eq!(z_far, 600.0, max_relative = 0.02);
    }
}
