use std::sync::Arc;
use opencv::core::Mat;
use opencv::prelude::*;
use tracing::{info, warn};
use crate::config::config::{DetectorConfig, PipelineConfig};
use crate::error::LipstickError;
use crate::helper::face_helper::get_skin_tone;
use crate::modules::face_detector::{Detection, FaceDetector};
use crate::modules::landmark_provider::LandmarkProvider;
use crate::modules::lip_mask::LipMaskBuilder;
use crate::modules::lipstick_renderer::LipstickRenderer;
use crate::pipeline::lipstick::LipstickSpec;

/// LipstickPipeline runs detection, mask building and rendering for every
/// ranked face in an image.
///
/// One pipeline serves one stream of frames. Run parallel streams on separate
/// instances; nothing here is shared between them.
pub struct LipstickPipeline {
    detector: FaceDetector,
    mask_builder: LipMaskBuilder,
    renderer: LipstickRenderer,
}

impl LipstickPipeline {

    /// new initializes a pipeline around a landmark provider.
    pub fn new(provider: Arc<dyn LandmarkProvider>, config: PipelineConfig) -> Result<Self, LipstickError> {
        Ok(LipstickPipeline {
            detector: FaceDetector::init(provider, config.detector)?,
            mask_builder: LipMaskBuilder::new(config.mask),
            renderer: LipstickRenderer::new(config.renderer),
        })
    }

    pub fn max_faces(&self) -> usize {
        self.detector.config().max_num_faces
    }

    /// set_max_faces rebuilds the detection context for a new face limit.
    pub fn set_max_faces(&mut self, max_num_faces: usize) -> Result<(), LipstickError> {
        if max_num_faces == self.max_faces() {
            return Ok(())
        }
        let config = DetectorConfig {
            max_num_faces,
            ..self.detector.config().clone()
        };
        self.detector.reinit(config)
    }

    /// detect returns the ranked faces, or `NoFaceDetected`.
    ///
    /// # Arguments
    /// * `image` - BGR image
    ///
    /// # Returns
    /// * `Result<Detection, LipstickError>`
    pub fn detect(&mut self, image: &Mat) -> Result<Detection, LipstickError> {
        let detection = self.detector.detect(image)?;
        if detection.faces.is_empty() {
            return Err(LipstickError::NoFaceDetected)
        }
        Ok(detection)
    }

    /// lip_masks builds one mask per ranked face, skipping faces whose lips
    /// cannot be recovered. Returns `NoLipsDetected` if no face yields a mask.
    ///
    /// # Arguments
    /// * `image` - BGR image
    ///
    /// # Returns
    /// * `Result<Vec<Mat>, LipstickError>`
    pub fn lip_masks(&mut self, image: &Mat) -> Result<Vec<Mat>, LipstickError> {
        let detection = self.detect(image)?;
        let mut masks: Vec<Mat> = Vec::with_capacity(detection.faces.len());
        for (idx, face) in detection.faces.iter().enumerate() {
            match self.mask_builder.build(image, face, Some(&detection.scale)) {
                Ok(mask) => masks.push(mask),
                Err(e) => warn!(face = idx, error = %e, "skipping face without a usable lip mask"),
            }
        }
        if masks.is_empty() {
            return Err(LipstickError::NoLipsDetected)
        }
        Ok(masks)
    }

    /// render applies `spec` to the lips of every ranked face.
    ///
    /// Detection outcomes (`NoFaceDetected`, `NoLipsDetected`) are returned to
    /// the caller; rendering problems are absorbed by the renderer.
    ///
    /// # Arguments
    /// * `image` - BGR image
    /// * `spec` - validated lipstick request
    ///
    /// # Returns
    /// * `Result<Mat, LipstickError>`
    pub fn render(&mut self, image: &Mat, spec: &LipstickSpec) -> Result<Mat, LipstickError> {
        let masks = self.lip_masks(image)?;
        let mut result = image.try_clone()?;
        for mask in &masks {
            result = self.renderer.apply_lipstick(&result, Some(mask), spec.color, spec.texture, spec.opacity);
        }
        info!(
            faces = masks.len(),
            texture = %spec.texture,
            width = image.cols(),
            height = image.rows(),
            "lipstick rendered"
        );
        Ok(result)
    }

    /// skin_tone samples the mean HSV skin tone of the best ranked face.
    ///
    /// # Arguments
    /// * `image` - BGR image
    ///
    /// # Returns
    /// * `Result<Option<[f32; 3]>, LipstickError>`
    pub fn skin_tone(&mut self, image: &Mat) -> Result<Option<[f32; 3]>, LipstickError> {
        let detection = self.detect(image)?;
        Ok(get_skin_tone(image, &detection.faces[0])?)
    }
}
