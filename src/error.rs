use thiserror::Error;

/// Error kinds surfaced by the lipstick pipeline.
///
/// `NoFaceDetected` and `NoLipsDetected` are "not found" outcomes the caller
/// branches on. `RenderingFailure` never leaves `apply_lipstick`; it is only
/// returned by the lower-level building blocks.
#[derive(Debug, Error)]
pub enum LipstickError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("not enough lip landmarks to build a mask")]
    NoLipsDetected,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("rendering failure: {0}")]
    RenderingFailure(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl From<anyhow::Error> for LipstickError {
    fn from(e: anyhow::Error) -> Self {
        LipstickError::RenderingFailure(format!("{e:#}"))
    }
}
