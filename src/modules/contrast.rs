use anyhow::Error;
use opencv::core::{mean, Mat, Size, Vector};
use opencv::imgproc::{create_clahe, cvt_color_def, COLOR_BGR2GRAY, COLOR_BGR2Lab, COLOR_Lab2BGR};
use opencv::prelude::*;

const LOW_LIGHT_BRIGHTNESS: f64 = 100.0;

/// ContrastEnhancer equalizes the lightness channel with CLAHE so landmark
/// detection holds up in dim lighting. Colour (a/b in Lab) is left alone.
#[derive(Debug, Clone)]
pub struct ContrastEnhancer {
    clip_limit: f64,
    tile_grid: i32,
}

impl ContrastEnhancer {
    pub fn new(clip_limit: f64, tile_grid: i32) -> Self {
        ContrastEnhancer {
            clip_limit,
            tile_grid: tile_grid.max(1),
        }
    }

    /// enhance applies CLAHE to the L channel of a BGR image.
    pub fn enhance(&self, image: &Mat) -> Result<Mat, Error> {
        let mut lab = Mat::default();
        cvt_color_def(image, &mut lab, COLOR_BGR2Lab)?;

        let mut channels: Vector<Mat> = Vector::new();
        opencv::core::split(&lab, &mut channels)?;

        let mut clahe = create_clahe(self.clip_limit, Size::new(self.tile_grid, self.tile_grid))?;
        let l = channels.get(0)?;
        let mut l_eq = Mat::default();
        clahe.apply(&l, &mut l_eq)?;
        channels.set(0, l_eq)?;

        let mut merged = Mat::default();
        opencv::core::merge(&channels, &mut merged)?;

        let mut enhanced = Mat::default();
        cvt_color_def(&merged, &mut enhanced, COLOR_Lab2BGR)?;
        Ok(enhanced)
    }

    pub fn is_low_light(&self, image: &Mat) -> Result<bool, Error> {
        let mut gray = Mat::default();
        cvt_color_def(image, &mut gray, COLOR_BGR2GRAY)?;
        let avg = mean(&gray, &Mat::default())?;
        Ok(avg[0] < LOW_LIGHT_BRIGHTNESS)
    }

    /// process_image enhances only images judged to be low light.
    pub fn process_image(&self, image: &Mat) -> Result<Mat, Error> {
        if self.is_low_light(image)? {
            return self.enhance(image)
        }
        Ok(image.try_clone()?)
    }
}
