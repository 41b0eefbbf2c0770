use anyhow::Error;
use opencv::core::{Mat, Point, Point2f, Scalar, Size, Vector, CV_8UC1};
use opencv::imgproc::{
    dilate_def, erode_def, fill_poly_def, gaussian_blur_def, get_rotation_matrix_2d, get_structuring_element,
    morphology_ex_def, threshold, warp_affine_def, MORPH_CLOSE, MORPH_ELLIPSE, THRESH_BINARY,
};
use opencv::prelude::*;
use tracing::{debug, warn};
use crate::config::config::LipMaskConfig;
use crate::error::LipstickError;
use crate::modules::face_detector::DetectionScale;
use crate::utils::coordinate::FaceLandmarks;
use crate::utils::utils::odd_kernel;

/// Landmark indices the mask builder reads, tied to one landmark model topology.
/// A new model topology gets a new constant, never an edit of an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct LipTopology {
    pub version: &'static str,
    /// Outer lip boundary, clockwise from the upper lip centre.
    pub outer: [usize; 20],
    /// Mouth opening, clockwise from the left corner.
    pub inner: [usize; 20],
    pub upper_inner_lip: usize,
    pub lower_inner_lip: usize,
    pub face_top: usize,
    pub chin: usize,
}

/// MediaPipe Face Mesh, 468 landmarks (478 with refined irises).
pub const FACE_MESH_V1: LipTopology = LipTopology {
    version: "face-mesh-468/v1",
    outer: [0, 267, 269, 270, 409, 291, 375, 321, 405, 314, 17, 84, 181, 91, 146, 61, 185, 40, 39, 37],
    inner: [78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308, 324, 318, 402, 317, 14, 87, 178, 88, 95],
    upper_inner_lip: 13,
    lower_inner_lip: 14,
    face_top: 168,
    chin: 152,
};

/// LipMaskBuilder turns one face's landmarks into an 8-bit lip coverage mask
/// with the same size as the target image.
#[derive(Debug, Clone)]
pub struct LipMaskBuilder {
    config: LipMaskConfig,
    topology: &'static LipTopology,
}

impl LipMaskBuilder {
    pub fn new(config: LipMaskConfig) -> Self {
        LipMaskBuilder { config, topology: &FACE_MESH_V1 }
    }

    /// build returns the lip mask for `landmarks` on `image`.
    ///
    /// `scale` is the detection scale returned alongside the landmarks; `None`
    /// means the landmarks were detected on `image` itself.
    /// Returns `NoLipsDetected` when either contour has fewer than four points.
    pub fn build(&self, image: &Mat, landmarks: &FaceLandmarks, scale: Option<&DetectionScale>) -> Result<Mat, LipstickError> {
        let (width, height) = (image.cols(), image.rows());
        let scale = scale.copied().unwrap_or_else(|| DetectionScale::identity(width, height));

        let outer = self.contour(landmarks, &self.topology.outer, &scale);
        let inner = self.contour(landmarks, &self.topology.inner, &scale);
        if outer.len() <= 3 || inner.len() <= 3 {
            debug!(outer = outer.len(), inner = inner.len(), "not enough lip points");
            return Err(LipstickError::NoLipsDetected)
        }

        let mouth_closed = self.is_mouth_closed(landmarks, &scale);
        let mask = self.fill_lips(width, height, &outer, &inner, mouth_closed)?;
        let mask = self.close_gaps(&mask)?;
        let mask = self.correct_tilt(mask, &outer);
        let mask = self.smooth_edges(&mask)?;
        Ok(mask)
    }

    /// contour collects the listed landmarks in pixel space, skipping any the
    /// landmark set does not have.
    pub fn contour(&self, landmarks: &FaceLandmarks, indices: &[usize], scale: &DetectionScale) -> Vec<Point> {
        indices
            .iter()
            .filter_map(|&idx| landmarks.get(idx))
            .map(|point| {
                let (x, y) = scale.to_pixel(point);
                Point::new(x.round() as i32, y.round() as i32)
            })
            .collect()
    }

    /// is_mouth_closed compares the inner lip gap with a fraction of the face
    /// height. Missing reference points count as an open mouth.
    pub fn is_mouth_closed(&self, landmarks: &FaceLandmarks, scale: &DetectionScale) -> bool {
        let t = self.topology;
        let (top, bottom, face_top, chin) = match (
            landmarks.get(t.upper_inner_lip),
            landmarks.get(t.lower_inner_lip),
            landmarks.get(t.face_top),
            landmarks.get(t.chin),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return false,
        };

        let lip_gap = scale.to_pixel(bottom).1 - scale.to_pixel(top).1;
        let face_height = scale.to_pixel(chin).1 - scale.to_pixel(face_top).1;
        let closed = lip_gap < face_height * self.config.mouth_closed_ratio;
        debug!(lip_gap, face_height, closed, "mouth state");
        closed
    }

    fn fill_lips(&self, width: i32, height: i32, outer: &[Point], inner: &[Point], mouth_closed: bool) -> Result<Mat, Error> {
        let mut mask = Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(0.0))?;

        let outer_poly: Vector<Vector<Point>> = Vector::from_iter([Vector::from_slice(outer)]);
        fill_poly_def(&mut mask, &outer_poly, Scalar::all(255.0))?;

        if !mouth_closed {
            let inner_poly: Vector<Vector<Point>> = Vector::from_iter([Vector::from_slice(inner)]);
            fill_poly_def(&mut mask, &inner_poly, Scalar::all(0.0))?;
        }
        Ok(mask)
    }

    fn close_gaps(&self, mask: &Mat) -> Result<Mat, Error> {
        let k = odd_kernel(self.config.closing_kernel);
        let kernel = get_structuring_element(MORPH_ELLIPSE, Size::new(k, k), Point::new(-1, -1))?;
        let mut closed = Mat::default();
        morphology_ex_def(mask, &mut closed, MORPH_CLOSE, &kernel)?;
        Ok(closed)
    }

    /// correct_tilt rounds off a tilted lip silhouette in its upright frame.
    /// Any failure keeps the unrotated mask.
    fn correct_tilt(&self, mask: Mat, outer: &[Point]) -> Mat {
        self.correct_tilt_with(mask, outer, |mask, angle| self.rotate_round_trip(mask, outer, angle))
    }

    fn correct_tilt_with<F>(&self, mask: Mat, outer: &[Point], rotate: F) -> Mat
    where
        F: FnOnce(&Mat, f64) -> Result<Mat, Error>,
    {
        let angle = lip_angle(outer);
        if angle.abs() <= self.config.tilt_threshold_deg {
            return mask
        }
        debug!(angle, "correcting lip tilt");
        match rotate(&mask, angle) {
            Ok(corrected) => corrected,
            Err(e) => {
                warn!(angle, error = %e, "tilt correction failed, keeping unrotated mask");
                mask
            }
        }
    }

    fn rotate_round_trip(&self, mask: &Mat, outer: &[Point], angle: f64) -> Result<Mat, Error> {
        if !angle.is_finite() {
            return Err(Error::msg("lip_mask - tilt angle is not finite"))
        }
        let n = outer.len() as f64;
        let cx = outer.iter().map(|p| p.x as f64).sum::<f64>() / n;
        let cy = outer.iter().map(|p| p.y as f64).sum::<f64>() / n;
        let center = Point2f::new(cx.trunc() as f32, cy.trunc() as f32);
        let size = mask.size()?;

        let forward = get_rotation_matrix_2d(center, angle, 1.0)?;
        let mut rotated = Mat::default();
        warp_affine_def(mask, &mut rotated, &forward, size)?;

        let k = odd_kernel(self.config.rotation_blur_kernel);
        let mut blurred = Mat::default();
        gaussian_blur_def(&rotated, &mut blurred, Size::new(k, k), 0.0)?;
        let mut rounded = Mat::default();
        threshold(&blurred, &mut rounded, self.config.threshold, 255.0, THRESH_BINARY)?;

        let back = get_rotation_matrix_2d(center, -angle, 1.0)?;
        let mut restored = Mat::default();
        warp_affine_def(&rounded, &mut restored, &back, size)?;
        Ok(restored)
    }

    fn smooth_edges(&self, mask: &Mat) -> Result<Mat, Error> {
        let k = odd_kernel(self.config.smoothing_kernel);
        let mut blurred = Mat::default();
        gaussian_blur_def(mask, &mut blurred, Size::new(k, k), 0.0)?;
        let mut binary = Mat::default();
        threshold(&blurred, &mut binary, self.config.threshold, 255.0, THRESH_BINARY)?;

        // 3x3 dilate then erode clears speckle without moving the outline
        let mut dilated = Mat::default();
        dilate_def(&binary, &mut dilated, &Mat::default())?;
        let mut eroded = Mat::default();
        erode_def(&dilated, &mut eroded, &Mat::default())?;
        Ok(eroded)
    }
}

/// lip_angle is the slope, in degrees, of the line from the leftmost to the
/// rightmost contour point. The first point wins on ties.
pub fn lip_angle(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0
    }
    let mut left = 0;
    let mut right = 0;
    for (idx, p) in points.iter().enumerate() {
        if p.x < points[left].x {
            left = idx;
        }
        if p.x > points[right].x {
            right = idx;
        }
    }
    if left == right {
        return 0.0
    }

    let dx = (points[right].x - points[left].x) as f64;
    let dy = (points[right].y - points[left].y) as f64;
    if dx == 0.0 {
        return 90.0
    }
    dy.atan2(dx).to_degrees()
}

#[cfg(test)]
mod tests {
    use opencv::core::{count_non_zero, Mat, Point, Scalar, CV_8UC3};
    use opencv::prelude::*;
    use crate::utils::coordinate::{Coordinate2D, FaceLandmarks};
    use super::*;

    const SIZE: i32 = 200;

    /// 20 points clockwise around an axis-aligned rectangle, five per side,
    /// starting at the top-left corner.
    fn rect_contour(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<(f32, f32)> {
        let mut pts = Vec::with_capacity(20);
        for k in 0..5 {
            pts.push((x0 + (x1 - x0) * k as f32 / 5.0, y0));
        }
        for k in 0..5 {
            pts.push((x1, y0 + (y1 - y0) * k as f32 / 5.0));
        }
        for k in 0..5 {
            pts.push((x1 - (x1 - x0) * k as f32 / 5.0, y1));
        }
        for k in 0..5 {
            pts.push((x0, y1 - (y1 - y0) * k as f32 / 5.0));
        }
        pts
    }

    fn face(outer: &[(f32, f32)], inner: &[(f32, f32)]) -> FaceLandmarks {
        let fill = Coordinate2D::new(0.5, 0.5);
        let mut lmk = FaceLandmarks::new(vec![fill; 468]);
        let n = SIZE as f32;
        for (idx, &(x, y)) in FACE_MESH_V1.outer.iter().zip(outer) {
            lmk.set(*idx, Coordinate2D::new(x / n, y / n), fill);
        }
        for (idx, &(x, y)) in FACE_MESH_V1.inner.iter().zip(inner) {
            lmk.set(*idx, Coordinate2D::new(x / n, y / n), fill);
        }
        lmk.set(FACE_MESH_V1.face_top, Coordinate2D::new(0.5, 0.0), fill);
        lmk.set(FACE_MESH_V1.chin, Coordinate2D::new(0.5, 1.0), fill);
        lmk
    }

    fn image() -> Mat {
        Mat::new_rows_cols_with_default(SIZE, SIZE, CV_8UC3, Scalar::all(128.0)).unwrap()
    }

    fn at(mask: &Mat, x: i32, y: i32) -> u8 {
        *mask.at_2d::<u8>(y, x).unwrap()
    }

    #[test]
    fn test_open_mouth_builds_hollow_ring() {
        let lmk = face(&rect_contour(50.0, 50.0, 150.0, 150.0), &rect_contour(70.0, 70.0, 130.0, 130.0));
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let mask = builder.build(&image(), &lmk, None).unwrap();

        assert_eq!(mask.rows(), SIZE);
        assert_eq!(mask.cols(), SIZE);
        assert_eq!(mask.typ(), CV_8UC1);
        assert_eq!(at(&mask, 60, 60), 255);
        assert_eq!(at(&mask, 100, 140), 255);
        assert_eq!(at(&mask, 100, 100), 0);
        assert_eq!(at(&mask, 20, 20), 0);
    }

    #[test]
    fn test_closed_mouth_keeps_cavity_filled() {
        // upper and lower inner lip 4px apart on a 200px face: under the 4% threshold
        let lmk = face(&rect_contour(50.0, 80.0, 150.0, 120.0), &rect_contour(70.0, 98.0, 130.0, 102.0));
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        assert!(builder.is_mouth_closed(&lmk, &DetectionScale::identity(SIZE, SIZE)));

        let mask = builder.build(&image(), &lmk, None).unwrap();
        assert_eq!(at(&mask, 100, 100), 255);
        assert_eq!(at(&mask, 80, 100), 255);
    }

    #[test]
    fn test_missing_reference_points_mean_open_mouth() {
        let lmk = FaceLandmarks::new(vec![Coordinate2D::new(0.5, 0.5); 20]);
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        assert!(!builder.is_mouth_closed(&lmk, &DetectionScale::identity(SIZE, SIZE)));
    }

    #[test]
    fn test_insufficient_points_is_no_lips() {
        // 40 landmarks reach only two inner lip indices (13, 14)
        let lmk = FaceLandmarks::new(vec![Coordinate2D::new(0.5, 0.5); 40]);
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let err = builder.build(&image(), &lmk, None).unwrap_err();
        assert!(matches!(err, LipstickError::NoLipsDetected));

        let err = builder.build(&image(), &FaceLandmarks::default(), None).unwrap_err();
        assert!(matches!(err, LipstickError::NoLipsDetected));
    }

    #[test]
    fn test_contour_skips_missing_indices() {
        let lmk = FaceLandmarks::new(vec![Coordinate2D::new(0.25, 0.75); 100]);
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let scale = DetectionScale::identity(SIZE, SIZE);
        let outer = builder.contour(&lmk, &FACE_MESH_V1.outer, &scale);
        let expected = FACE_MESH_V1.outer.iter().filter(|&&i| i < 100).count();
        assert_eq!(outer.len(), expected);
        assert!(outer.iter().all(|p| *p == Point::new(50, 150)));
    }

    #[test]
    fn test_contour_applies_detection_scale() {
        let lmk = FaceLandmarks::new(vec![Coordinate2D::new(0.5, 0.25); 468]);
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        // detected on a 640x360 copy of a 1280x720 frame
        let scale = DetectionScale {
            original_width: 1280,
            original_height: 720,
            detect_width: 640,
            detect_height: 360,
            inverse_factor: 2.0,
        };
        let outer = builder.contour(&lmk, &FACE_MESH_V1.outer, &scale);
        assert_eq!(outer[0], Point::new(640, 180));
    }

    #[test]
    fn test_lip_angle() {
        let level = [Point::new(0, 10), Point::new(50, 0), Point::new(100, 10), Point::new(50, 20)];
        assert_eq!(lip_angle(&level), 0.0);

        let tilted = [Point::new(0, 0), Point::new(50, 0), Point::new(100, 100)];
        assert!((lip_angle(&tilted) - 45.0).abs() < 1e-9);

        let column = [Point::new(5, 0), Point::new(5, 10)];
        assert_eq!(lip_angle(&column), 0.0);
        assert_eq!(lip_angle(&[Point::new(1, 1)]), 0.0);
    }

    #[test]
    fn test_level_lips_skip_tilt_correction() {
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let outer = builder.contour(
            &face(&rect_contour(50.0, 50.0, 150.0, 150.0), &rect_contour(70.0, 70.0, 130.0, 130.0)),
            &FACE_MESH_V1.outer,
            &DetectionScale::identity(SIZE, SIZE),
        );
        assert_eq!(lip_angle(&outer), 0.0);

        let mask = builder.fill_lips(SIZE, SIZE, &outer, &[], true).unwrap();
        let before = mask.data_bytes().unwrap().to_vec();
        let after = builder.correct_tilt(mask, &outer);
        assert_eq!(after.data_bytes().unwrap(), before.as_slice());
    }

    fn tilted_outline() -> [Point; 6] {
        [
            Point::new(60, 60), Point::new(100, 60), Point::new(147, 87),
            Point::new(140, 120), Point::new(100, 125), Point::new(70, 100),
        ]
    }

    #[test]
    fn test_failed_tilt_correction_keeps_unrotated_mask() {
        let pts = tilted_outline();
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let mask = builder.fill_lips(SIZE, SIZE, &pts, &[], true).unwrap();
        let before = mask.data_bytes().unwrap().to_vec();

        let mut attempted = false;
        let after = builder.correct_tilt_with(mask, &pts, |_, angle| {
            attempted = true;
            assert!(angle.abs() > 10.0);
            Err(Error::msg("rotation failed"))
        });
        assert!(attempted);
        assert_eq!(after.data_bytes().unwrap(), before.as_slice());
    }

    #[test]
    fn test_rotate_round_trip_rejects_non_finite_angle() {
        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let pts = tilted_outline();
        let mask = builder.fill_lips(SIZE, SIZE, &pts, &[], true).unwrap();
        assert!(builder.rotate_round_trip(&mask, &pts, f64::NAN).is_err());
        assert!(builder.rotate_round_trip(&mask, &pts, 17.0).is_ok());
    }

    #[test]
    fn test_tilted_lips_keep_their_footprint() {
        // a lopsided outline whose corners sit on a ~17 degree slope
        let pts = tilted_outline();
        assert!(lip_angle(&pts).abs() > 10.0);

        let builder = LipMaskBuilder::new(LipMaskConfig::new());
        let mask = builder.fill_lips(SIZE, SIZE, &pts, &[], true).unwrap();
        let area_before = count_non_zero(&mask).unwrap();
        let corrected = builder.correct_tilt(mask, &pts);

        assert_eq!(corrected.rows(), SIZE);
        assert_eq!(corrected.cols(), SIZE);
        let area_after = count_non_zero(&corrected).unwrap();
        let ratio = area_after as f64 / area_before as f64;
        assert!(ratio > 0.8 && ratio < 1.25, "area {area_before} -> {area_after}");
        assert_eq!(at(&corrected, 100, 90), 255);
    }
}
