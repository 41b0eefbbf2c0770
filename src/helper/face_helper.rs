use anyhow::Error;
use nalgebra::Vector2;
use opencv::core::{mean, Mat, Rect};
use opencv::imgproc::{cvt_color_def, COLOR_BGR2HSV};
use opencv::prelude::*;
use tracing::debug;
use crate::utils::coordinate::FaceLandmarks;

/// Landmarks sampled for skin tone: forehead, left cheek, right cheek.
pub const SKIN_SAMPLE_POINTS: [usize; 3] = [10, 123, 352];
const SKIN_SAMPLE_RADIUS: i32 = 15;
const CENTER_DISTANCE_WEIGHT: f32 = 0.5;

/// Pixel-space bounding box over every landmark of one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        let width = self.x_max as i64 - self.x_min as i64;
        let height = self.y_max as i64 - self.y_min as i64;
        (width * height) as f32
    }

    pub fn center(&self) -> Vector2<f32> {
        Vector2::new(
            ((self.x_min as i64 + self.x_max as i64) / 2) as f32,
            ((self.y_min as i64 + self.y_max as i64) / 2) as f32,
        )
    }
}

/// get_face_box projects the landmarks onto a `w` x `h` image and boxes them.
/// Returns `None` for an empty landmark set.
pub fn get_face_box(landmarks: &FaceLandmarks, w: i32, h: i32) -> Option<FaceBox> {
    if landmarks.is_empty() {
        return None
    }
    let mut face_box = FaceBox { x_min: w, y_min: h, x_max: 0, y_max: 0 };
    for point in &landmarks.points {
        let x = (point.x * w as f32) as i32;
        let y = (point.y * h as f32) as i32;
        face_box.x_min = face_box.x_min.min(x);
        face_box.y_min = face_box.y_min.min(y);
        face_box.x_max = face_box.x_max.max(x);
        face_box.y_max = face_box.y_max.max(y);
    }
    Some(face_box)
}

/// face_score favours large faces close to the image centre:
/// `area - 0.5 * distance_to_center`.
pub fn face_score(landmarks: &FaceLandmarks, w: i32, h: i32) -> f32 {
    let face_box = match get_face_box(landmarks, w, h) {
        None => return f32::NEG_INFINITY,
        Some(face_box) => face_box,
    };
    let img_center = Vector2::new((w / 2) as f32, (h / 2) as f32);
    let distance = (face_box.center() - img_center).norm();
    face_box.area() - distance * CENTER_DISTANCE_WEIGHT
}

/// rank_faces orders faces by descending score and keeps the first `max_faces`.
/// Equal scores keep their detection order.
pub fn rank_faces(faces: Vec<FaceLandmarks>, w: i32, h: i32, max_faces: usize) -> Vec<FaceLandmarks> {
    let mut scored: Vec<(f32, FaceLandmarks)> = faces
        .into_iter()
        .map(|face| (face_score(&face, w, h), face))
        .collect();

    scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    for (rank, (score, _)) in scored.iter().enumerate() {
        debug!(rank, score, "ranked face");
    }

    scored.into_iter().take(max_faces).map(|(_, face)| face).collect()
}

/// get_skin_tone averages HSV (OpenCV 8-bit scale) over small windows on the
/// forehead and both cheeks of a BGR image. `None` when nothing can be sampled.
pub fn get_skin_tone(image: &Mat, landmarks: &FaceLandmarks) -> Result<Option<[f32; 3]>, Error> {
    let (w, h) = (image.cols(), image.rows());
    let mut samples: Vec<[f32; 3]> = Vec::with_capacity(SKIN_SAMPLE_POINTS.len());

    for idx in SKIN_SAMPLE_POINTS {
        let point = match landmarks.get(idx) {
            None => continue,
            Some(point) => point,
        };
        let x = (point.x * w as f32) as i32;
        let y = (point.y * h as f32) as i32;
        let x0 = (x - SKIN_SAMPLE_RADIUS).max(0);
        let y0 = (y - SKIN_SAMPLE_RADIUS).max(0);
        let x1 = (x + SKIN_SAMPLE_RADIUS).min(w);
        let y1 = (y + SKIN_SAMPLE_RADIUS).min(h);
        if x1 <= x0 || y1 <= y0 {
            continue
        }

        let roi = Mat::roi(image, Rect::new(x0, y0, x1 - x0, y1 - y0))?;
        let mut roi_hsv = Mat::default();
        cvt_color_def(&roi, &mut roi_hsv, COLOR_BGR2HSV)?;
        let avg = mean(&roi_hsv, &Mat::default())?;
        samples.push([avg[0] as f32, avg[1] as f32, avg[2] as f32]);
    }

    if samples.is_empty() {
        return Ok(None)
    }
    let n = samples.len() as f32;
    let mut tone = [0.0f32; 3];
    for sample in &samples {
        for c in 0..3 {
            tone[c] += sample[c] / n;
        }
    }
    Ok(Some(tone))
}
