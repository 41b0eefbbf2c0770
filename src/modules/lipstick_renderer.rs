use anyhow::Error;
use ndarray::Array3;
use opencv::core::{
    add_weighted_def, bitwise_and_def, bitwise_or_def, bitwise_xor_def, count_non_zero, Mat, Point, Size, BORDER_CONSTANT,
};
use opencv::imgproc::{blur_def, erode, gaussian_blur_def, morphology_default_border_value, threshold, THRESH_BINARY};
use opencv::prelude::*;
use tracing::{debug, error};
use crate::config::config::RendererConfig;
use crate::error::LipstickError;
use crate::modules::color::{enhance, Rgb};
use crate::modules::texture::{NoiseSource, Texture};
use crate::utils::image::{array3_to_mat, mask_to_array2, mat_to_array3};
use crate::utils::utils::{clamp_unit, odd_kernel, saturate_u8};

const REFINE_BLUR_KERNEL: i32 = 7;
const BINARY_CUTOFF: f64 = 127.0;
const EDGE_ERODE_ITERATIONS: i32 = 2;

/// LipstickRenderer composites a lipstick colour into a BGR image under a lip
/// mask. Rendering never fails outward: on any internal error the original
/// image comes back untouched.
#[derive(Debug, Clone, Default)]
pub struct LipstickRenderer {
    config: RendererConfig,
}

impl LipstickRenderer {
    pub fn new(config: RendererConfig) -> Self {
        LipstickRenderer { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// apply_lipstick returns a new image with the lipstick applied under `mask`.
    ///
    /// A missing or empty mask, or zero opacity, returns an unchanged copy.
    /// Opacity is clamped to [0, 1]; `texture` picks the material model.
    pub fn apply_lipstick(&self, image: &Mat, mask: Option<&Mat>, color_rgb: Rgb, texture: Texture, opacity: f32) -> Mat {
        match self.try_apply_lipstick(image, mask, color_rgb, texture, opacity) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, %texture, "lipstick rendering failed, returning original image");
                image.clone()
            }
        }
    }

    /// try_apply_lipstick is `apply_lipstick` with the failure surfaced.
    pub fn try_apply_lipstick(
        &self,
        image: &Mat,
        mask: Option<&Mat>,
        color_rgb: Rgb,
        texture: Texture,
        opacity: f32,
    ) -> Result<Mat, LipstickError> {
        let mask = match mask {
            Some(mask) if !mask.empty() && !image.empty() => mask,
            _ => return Ok(image.try_clone()?),
        };
        if mask.size()? != image.size()? {
            return Err(LipstickError::RenderingFailure(format!(
                "mask is {:?} but image is {:?}",
                mask.size()?, image.size()?
            )))
        }

        let opacity = clamp_unit(opacity);
        if opacity <= 0.0 || count_non_zero(mask)? == 0 {
            return Ok(image.try_clone()?)
        }

        let enhanced = enhance(color_rgb)?;
        let color_bgr = [enhanced[2] as f32, enhanced[1] as f32, enhanced[0] as f32];
        debug!(?color_rgb, ?enhanced, %texture, opacity, "applying lipstick");

        let refined = if self.config.refine_mask {
            self.refine_mask(mask)?
        } else {
            mask.try_clone()?
        };

        let original = mat_to_array3(image)?;
        let coverage = mask_to_array2(&refined)?;
        let (h, w, _) = original.dim();
        let color_layer = Array3::from_shape_fn((h, w, 3), |(_, _, c)| color_bgr[c]);
        let enhanced_opacity = (opacity * self.config.opacity_boost).min(1.0);

        let mut noise = NoiseSource::from_seed(self.config.noise_seed);
        let composed = texture
            .compositor()
            .compose(&original, &color_layer, &coverage, enhanced_opacity, &mut noise)?;
        if composed.iter().any(|v| !v.is_finite()) {
            return Err(LipstickError::RenderingFailure(format!("{texture} compositing produced non-finite pixels")))
        }
        let composed = composed.mapv(|v| saturate_u8(v) as f32);

        Ok(self.blend_with_skin(&original, &composed, &refined)?)
    }

    /// refine_mask keeps the lip interior solid and grades a thin band along
    /// the edge, so the colour fades out instead of stopping at a hard line.
    pub fn refine_mask(&self, mask: &Mat) -> Result<Mat, Error> {
        let size = mask.size()?;

        let mut blurred = Mat::default();
        gaussian_blur_def(mask, &mut blurred, Size::new(REFINE_BLUR_KERNEL, REFINE_BLUR_KERNEL), 0.0)?;

        let k = odd_kernel((size.width.min(size.height) / 50).max(3));
        let mut smoothed = Mat::default();
        blur_def(&blurred, &mut smoothed, Size::new(k, k))?;

        let mut binary = Mat::default();
        threshold(mask, &mut binary, BINARY_CUTOFF, 255.0, THRESH_BINARY)?;

        let mut inner = Mat::default();
        erode(
            &binary,
            &mut inner,
            &Mat::default(),
            Point::new(-1, -1),
            EDGE_ERODE_ITERATIONS,
            BORDER_CONSTANT,
            morphology_default_border_value()?,
        )?;
        let mut edge = Mat::default();
        bitwise_xor_def(&binary, &inner, &mut edge)?;

        let mut edge_smoothed = Mat::default();
        bitwise_and_def(&edge, &smoothed, &mut edge_smoothed)?;
        let mut edge_blurred = Mat::default();
        bitwise_and_def(&edge, &blurred, &mut edge_blurred)?;
        let mut gradient = Mat::default();
        add_weighted_def(&edge_smoothed, 0.7, &edge_blurred, 0.3, 0.0, &mut gradient)?;

        let mut refined = Mat::default();
        bitwise_or_def(&inner, &gradient, &mut refined)?;
        Ok(refined)
    }

    /// blend_with_skin feathers the composite back into the original through a
    /// heavily blurred copy of the mask.
    fn blend_with_skin(&self, original: &Array3<f32>, composed: &Array3<f32>, mask: &Mat) -> Result<Mat, Error> {
        let k = odd_kernel(self.config.skin_blend_kernel);
        let mut soft = Mat::default();
        gaussian_blur_def(mask, &mut soft, Size::new(k, k), 0.0)?;
        let alpha = mask_to_array2(&soft)?;

        let mut blended = original.clone();
        for ((y, x, c), v) in blended.indexed_iter_mut() {
            let a = alpha[[y, x]];
            if a > 0.0 {
                *v = *v * (1.0 - a) + composed[[y, x, c]] * a;
            }
        }
        array3_to_mat(&blended)
    }
}

/// apply_lipstick renders with the default renderer configuration.
pub fn apply_lipstick(image: &Mat, mask: Option<&Mat>, color_rgb: Rgb, texture: Texture, opacity: f32) -> Mat {
    LipstickRenderer::default().apply_lipstick(image, mask, color_rgb, texture, opacity)
}

#[cfg(test)]
mod tests {
    use opencv::core::{Mat, Rect, Scalar, Vec3b, CV_8UC1, CV_8UC3};
    use opencv::imgproc::{rectangle, FILLED, LINE_8};
    use opencv::prelude::*;
    use crate::modules::color::enhance;
    use super::*;

    const SIZE: i32 = 120;

    fn image() -> Mat {
        Mat::new_rows_cols_with_default(SIZE, SIZE, CV_8UC3, Scalar::new(110.0, 130.0, 150.0, 0.0)).unwrap()
    }

    fn rect_mask(x0: i32, y0: i32, x1: i32, y1: i32) -> Mat {
        let mut mask = Mat::new_rows_cols_with_default(SIZE, SIZE, CV_8UC1, Scalar::all(0.0)).unwrap();
        rectangle(&mut mask, Rect::new(x0, y0, x1 - x0, y1 - y0), Scalar::all(255.0), FILLED, LINE_8, 0).unwrap();
        mask
    }

    fn seeded() -> LipstickRenderer {
        LipstickRenderer::new(RendererConfig::seeded(11))
    }

    fn px(img: &Mat, x: i32, y: i32) -> Vec3b {
        *img.at_2d::<Vec3b>(y, x).unwrap()
    }

    fn same(a: &Mat, b: &Mat) -> bool {
        a.size().unwrap() == b.size().unwrap() && a.data_bytes().unwrap() == b.data_bytes().unwrap()
    }

    #[test]
    fn test_zero_opacity_is_identity() {
        let img = image();
        let mask = rect_mask(20, 20, 100, 100);
        for texture in Texture::ALL {
            let out = seeded().apply_lipstick(&img, Some(&mask), [200, 30, 40], texture, 0.0);
            assert!(same(&out, &img), "{texture}");
        }
    }

    #[test]
    fn test_missing_or_empty_mask_is_identity() {
        let img = image();
        let blank = Mat::new_rows_cols_with_default(SIZE, SIZE, CV_8UC1, Scalar::all(0.0)).unwrap();
        assert!(same(&seeded().apply_lipstick(&img, None, [200, 30, 40], Texture::Gloss, 0.8), &img));
        assert!(same(&seeded().apply_lipstick(&img, Some(&Mat::default()), [200, 30, 40], Texture::Gloss, 0.8), &img));
        assert!(same(&seeded().apply_lipstick(&img, Some(&blank), [200, 30, 40], Texture::Gloss, 0.8), &img));
    }

    #[test]
    fn test_mismatched_mask_returns_original() {
        let img = image();
        let small = Mat::new_rows_cols_with_default(10, 10, CV_8UC1, Scalar::all(255.0)).unwrap();
        let renderer = seeded();
        assert!(matches!(
            renderer.try_apply_lipstick(&img, Some(&small), [200, 30, 40], Texture::Matte, 0.8),
            Err(LipstickError::RenderingFailure(_))
        ));
        assert!(same(&renderer.apply_lipstick(&img, Some(&small), [200, 30, 40], Texture::Matte, 0.8), &img));
    }

    #[test]
    fn test_non_finite_opacity_is_treated_as_zero() {
        let img = image();
        let mask = rect_mask(20, 20, 100, 100);
        assert!(same(&seeded().apply_lipstick(&img, Some(&mask), [200, 30, 40], Texture::Matte, f32::NAN), &img));
    }

    #[test]
    fn test_full_opacity_matte_reaches_enhanced_color() {
        let img = image();
        let mask = rect_mask(10, 10, 110, 110);
        let out = seeded().apply_lipstick(&img, Some(&mask), [180, 50, 90], Texture::Matte, 1.0);
        let target = enhance([180, 50, 90]).unwrap();
        let got = px(&out, 60, 60);
        for (c, want) in [target[2], target[1], target[0]].iter().enumerate() {
            assert!((got[c] as i32 - *want as i32).abs() <= 2, "{got:?} vs {target:?}");
        }
        assert_eq!(px(&out, 1, 1), px(&img, 1, 1));
    }

    #[test]
    fn test_opacity_above_one_is_clamped() {
        let img = image();
        let mask = rect_mask(10, 10, 110, 110);
        let a = seeded().apply_lipstick(&img, Some(&mask), [180, 50, 90], Texture::Velvet, 1.0);
        let b = seeded().apply_lipstick(&img, Some(&mask), [180, 50, 90], Texture::Velvet, 7.5);
        assert!(same(&a, &b));
    }

    #[test]
    fn test_seeded_render_is_deterministic() {
        let img = image();
        let mask = rect_mask(30, 40, 90, 80);
        for texture in Texture::ALL {
            let a = seeded().apply_lipstick(&img, Some(&mask), [120, 20, 60], texture, 0.7);
            let b = seeded().apply_lipstick(&img, Some(&mask), [120, 20, 60], texture, 0.7);
            assert!(same(&a, &b), "{texture}");
            assert!(!same(&a, &img), "{texture}");
        }
    }

    #[test]
    fn test_skin_blend_feathers_the_boundary() {
        let original = Array3::<f32>::from_elem((SIZE as usize, SIZE as usize, 3), 100.0);
        let composed = Array3::<f32>::from_elem((SIZE as usize, SIZE as usize, 3), 200.0);
        let mask = rect_mask(20, 20, 100, 100);
        let out = seeded().blend_with_skin(&original, &composed, &mask).unwrap();

        assert_eq!(px(&out, 60, 60).0, [200, 200, 200]);
        assert_eq!(px(&out, 2, 2).0, [100, 100, 100]);
        for (x, y) in [(60, 20), (60, 18), (99, 60), (101, 60)] {
            let v = px(&out, x, y)[1];
            assert!(v > 100 && v < 200, "({x}, {y}) = {v}");
        }
    }

    #[test]
    fn test_apply_lipstick_edge_lies_between_original_and_core() {
        let img = image();
        let mask = rect_mask(20, 20, 100, 100);
        let out = seeded().apply_lipstick(&img, Some(&mask), [200, 30, 40], Texture::Matte, 1.0);
        // first mask row: partial coverage from refinement, partial alpha from the blend
        let original = px(&img, 60, 20)[2];
        let core = px(&out, 60, 60)[2];
        let edge = px(&out, 60, 20)[2];
        assert!(core > original + 20, "core {core} original {original}");
        assert!(edge > original && edge < core, "edge {edge}");
    }

    #[test]
    fn test_refine_mask_grades_only_the_edge() {
        let mask = rect_mask(20, 20, 100, 100);
        let refined = seeded().refine_mask(&mask).unwrap();
        assert_eq!(*refined.at_2d::<u8>(60, 60).unwrap(), 255);
        assert_eq!(*refined.at_2d::<u8>(5, 5).unwrap(), 0);
        let edge = *refined.at_2d::<u8>(20, 60).unwrap();
        assert!(edge > 0 && edge < 255, "edge {edge}");
    }
}
