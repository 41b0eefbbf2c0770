use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::LipstickError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub max_num_faces: usize,
    pub max_detection_side: i32,
    pub enhance_contrast: bool,
    /// With `enhance_contrast`, only equalize frames whose mean brightness is low.
    pub low_light_only: bool,
    pub clahe_clip_limit: f64,
    pub clahe_tile_grid: i32,
}

impl DetectorConfig {
    pub fn new() -> Self {
        DetectorConfig {
            max_num_faces: 1,
            max_detection_side: 1280,
            enhance_contrast: true,
            low_light_only: false,
            clahe_clip_limit: 3.0,
            clahe_tile_grid: 8,
        }
    }

    pub fn with_max_faces(max_num_faces: usize) -> Self {
        DetectorConfig {
            max_num_faces,
            ..Self::new()
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LipMaskConfig {
    pub closing_kernel: i32,
    pub tilt_threshold_deg: f64,
    pub rotation_blur_kernel: i32,
    pub smoothing_kernel: i32,
    pub threshold: f64,
    pub mouth_closed_ratio: f32,
}

impl LipMaskConfig {
    pub fn new() -> Self {
        LipMaskConfig {
            closing_kernel: 5,
            tilt_threshold_deg: 10.0,
            rotation_blur_kernel: 9,
            smoothing_kernel: 7,
            threshold: 50.0,
            mouth_closed_ratio: 0.04,
        }
    }
}

impl Default for LipMaskConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Fixed seed for the grain noise. `None` draws a fresh seed per call.
    pub noise_seed: Option<u64>,
    pub opacity_boost: f32,
    pub skin_blend_kernel: i32,
    pub refine_mask: bool,
}

impl RendererConfig {
    pub fn new() -> Self {
        RendererConfig {
            noise_seed: None,
            opacity_boost: 1.2,
            skin_blend_kernel: 15,
            refine_mask: true,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        RendererConfig {
            noise_seed: Some(seed),
            ..Self::new()
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub mask: LipMaskConfig,
    pub renderer: RendererConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, LipstickError> {
        serde_json::from_str(raw).map_err(|e| LipstickError::Config(e.to_string()))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LipstickError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LipstickError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = PipelineConfig::from_json_str(r#"{"detector": {"max_num_faces": 3}, "renderer": {"noise_seed": 7}}"#).unwrap();
        assert_eq!(cfg.detector.max_num_faces, 3);
        assert_eq!(cfg.detector.max_detection_side, 1280);
        assert!(cfg.detector.enhance_contrast);
        assert!(!cfg.detector.low_light_only);
        assert_eq!(cfg.renderer.noise_seed, Some(7));
        assert_eq!(cfg.renderer.skin_blend_kernel, 15);
        assert_eq!(cfg.mask, LipMaskConfig::new());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, LipstickError::Config(_)));
    }
}
