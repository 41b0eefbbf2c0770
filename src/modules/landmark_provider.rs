use anyhow::Error;
use opencv::core::Mat;
use crate::utils::coordinate::FaceLandmarks;

/// A live detection context, owning whatever per-model state the landmark
/// network needs. One context serves one detector; it is never shared.
pub trait LandmarkContext: Send {
    /// process returns every face found in the BGR image as normalized landmarks.
    fn process(&mut self, image: &Mat) -> Result<Vec<FaceLandmarks>, Error>;
}

/// Factory for landmark contexts. The face detector opens a fresh context on
/// `init` and again on every `reinit`.
pub trait LandmarkProvider: Send + Sync {
    fn open(&self, max_num_faces: usize) -> Result<Box<dyn LandmarkContext>, Error>;
}

/// StaticLandmarkProvider replays landmark sets produced by an external model
/// run (or built by hand in tests). Every face is reported on every call; the
/// detector's ranking applies the face limit.
#[derive(Debug, Clone, Default)]
pub struct StaticLandmarkProvider {
    faces: Vec<FaceLandmarks>,
}

impl StaticLandmarkProvider {
    pub fn new(faces: Vec<FaceLandmarks>) -> Self {
        StaticLandmarkProvider { faces }
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let faces: Vec<FaceLandmarks> = serde_json::from_str(raw)?;
        Ok(Self::new(faces))
    }
}

struct StaticLandmarkContext {
    faces: Vec<FaceLandmarks>,
}

impl LandmarkContext for StaticLandmarkContext {
    fn process(&mut self, _image: &Mat) -> Result<Vec<FaceLandmarks>, Error> {
        Ok(self.faces.clone())
    }
}

impl LandmarkProvider for StaticLandmarkProvider {
    fn open(&self, max_num_faces: usize) -> Result<Box<dyn LandmarkContext>, Error> {
        if max_num_faces == 0 {
            return Err(Error::msg("landmark_provider - max_num_faces must be at least 1"))
        }
        Ok(Box::new(StaticLandmarkContext { faces: self.faces.clone() }))
    }
}
