use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

impl Coordinate2D {
    pub fn new(x: f32, y: f32) -> Self {
        Coordinate2D { x, y }
    }
}

/// One face worth of normalized landmarks, in the landmark model's fixed order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct FaceLandmarks {
    pub points: Vec<Coordinate2D>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Coordinate2D>) -> Self {
        FaceLandmarks { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Coordinate2D> {
        self.points.get(idx)
    }

    /// Sets a single landmark, growing the set with `fill` points if needed.
    pub fn set(&mut self, idx: usize, point: Coordinate2D, fill: Coordinate2D) {
        if idx >= self.points.len() {
            self.points.resize(idx + 1, fill);
        }
        self.points[idx] = point;
    }
}
