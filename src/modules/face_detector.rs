use std::sync::Arc;
use anyhow::Error;
use opencv::core::{Mat, Size};
use opencv::imgproc::{resize, INTER_LINEAR};
use opencv::prelude::*;
use tracing::{debug, info};
use crate::config::config::DetectorConfig;
use crate::error::LipstickError;
use crate::helper::face_helper::rank_faces;
use crate::modules::contrast::ContrastEnhancer;
use crate::modules::landmark_provider::{LandmarkContext, LandmarkProvider};
use crate::utils::coordinate::Coordinate2D;
use crate::utils::coordinate::FaceLandmarks;

/// DetectionScale records how the detection input relates to the original
/// image, so normalized landmarks can be mapped back onto full resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionScale {
    pub original_width: i32,
    pub original_height: i32,
    pub detect_width: i32,
    pub detect_height: i32,
    /// original size / detection size; 1.0 when no downscale happened.
    pub inverse_factor: f32,
}

impl DetectionScale {
    pub fn identity(width: i32, height: i32) -> Self {
        DetectionScale {
            original_width: width,
            original_height: height,
            detect_width: width,
            detect_height: height,
            inverse_factor: 1.0,
        }
    }

    /// to_pixel maps a normalized landmark into original-image pixels.
    /// Normalized coordinates do not depend on the detection size, so the
    /// truncated downscaled dimensions never enter the mapping.
    pub fn to_pixel(&self, point: &Coordinate2D) -> (f32, f32) {
        (
            point.x * self.original_width as f32,
            point.y * self.original_height as f32,
        )
    }
}

/// Result of one detection call. The scale travels with the faces so mask
/// building never depends on detector state.
#[derive(Debug, Clone)]
pub struct Detection {
    pub faces: Vec<FaceLandmarks>,
    pub scale: DetectionScale,
}

/// FaceDetector wraps a landmark provider with the detection-side
/// preprocessing: downscaling, low-light enhancement and face ranking.
///
/// `detect` and `reinit` both take `&mut self`, so a reconfiguration can never
/// overlap an in-flight detection on the same instance.
pub struct FaceDetector {
    provider: Arc<dyn LandmarkProvider>,
    context: Box<dyn LandmarkContext>,
    config: DetectorConfig,
    enhancer: ContrastEnhancer,
}

impl FaceDetector {
    pub fn init(provider: Arc<dyn LandmarkProvider>, config: DetectorConfig) -> Result<Self, LipstickError> {
        let context = open_context(provider.as_ref(), &config)?;
        info!(max_num_faces = config.max_num_faces, "face detector ready");
        Ok(FaceDetector {
            provider,
            context,
            enhancer: ContrastEnhancer::new(config.clahe_clip_limit, config.clahe_tile_grid),
            config,
        })
    }

    /// reinit drops the current detection context and opens a new one under
    /// `config`. On failure the previous context stays in place.
    pub fn reinit(&mut self, config: DetectorConfig) -> Result<(), LipstickError> {
        let context = open_context(self.provider.as_ref(), &config)?;
        self.context = context;
        self.enhancer = ContrastEnhancer::new(config.clahe_clip_limit, config.clahe_tile_grid);
        info!(
            old_max_faces = self.config.max_num_faces,
            new_max_faces = config.max_num_faces,
            "face detector reinitialized"
        );
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// detect runs the landmark model on a (possibly downscaled) copy of the
    /// BGR image and returns up to `max_num_faces` faces, best ranked first.
    /// Zero faces is an empty detection, not an error.
    pub fn detect(&mut self, image: &Mat) -> Result<Detection, LipstickError> {
        let (width, height) = (image.cols(), image.rows());
        if width <= 0 || height <= 0 {
            return Err(LipstickError::InvalidParameter("image is empty".to_string()))
        }

        let (input, scale) = self.downscale(image)?;
        let input = match (self.config.enhance_contrast, self.config.low_light_only) {
            (false, _) => input,
            (true, false) => self.enhancer.enhance(&input)?,
            (true, true) => self.enhancer.process_image(&input)?,
        };

        let faces = self.context.process(&input)?;
        debug!(detected = faces.len(), inverse_factor = scale.inverse_factor, "landmark detection finished");

        let faces = rank_faces(faces, width, height, self.config.max_num_faces);
        Ok(Detection { faces, scale })
    }

    fn downscale(&self, image: &Mat) -> Result<(Mat, DetectionScale), Error> {
        let (width, height) = (image.cols(), image.rows());
        let longest = width.max(height);
        if longest <= self.config.max_detection_side {
            return Ok((image.try_clone()?, DetectionScale::identity(width, height)))
        }

        let scale = self.config.max_detection_side as f32 / longest as f32;
        let new_width = ((width as f32 * scale) as i32).max(1);
        let new_height = ((height as f32 * scale) as i32).max(1);
        let mut resized = Mat::default();
        resize(image, &mut resized, Size::new(new_width, new_height), 0.0, 0.0, INTER_LINEAR)?;

        Ok((resized, DetectionScale {
            original_width: width,
            original_height: height,
            detect_width: new_width,
            detect_height: new_height,
            inverse_factor: 1.0 / scale,
        }))
    }
}

fn open_context(provider: &dyn LandmarkProvider, config: &DetectorConfig) -> Result<Box<dyn LandmarkContext>, LipstickError> {
    if config.max_num_faces == 0 {
        return Err(LipstickError::Config("max_num_faces must be at least 1".to_string()))
    }
    if config.max_detection_side <= 0 {
        return Err(LipstickError::Config("max_detection_side must be positive".to_string()))
    }
    provider
        .open(config.max_num_faces)
        .map_err(|e| LipstickError::Config(format!("could not open landmark context: {e:#}")))
}
