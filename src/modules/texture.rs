use std::fmt;
use std::str::FromStr;
use anyhow::Error;
use ndarray::{Array2, Array3};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};
use crate::error::LipstickError;
use crate::utils::image::{gaussian_blur_array2, gaussian_blur_array3, resize_array2};

/// Mask coverage above which a pixel counts as lip for the finishing blurs.
const LIP_COVERAGE: f32 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Texture {
    #[default]
    Matte,
    Gloss,
    Velvet,
}

impl Texture {
    pub const ALL: [Texture; 3] = [Texture::Matte, Texture::Gloss, Texture::Velvet];

    /// from_name maps a texture name, falling back to matte for anything unknown.
    pub fn from_name(name: &str) -> Texture {
        name.parse().unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Texture::Matte => "matte",
            Texture::Gloss => "gloss",
            Texture::Velvet => "velvet",
        }
    }

    /// Opacity a texture is rendered at when the caller does not ask for one.
    pub fn default_opacity(&self) -> f32 {
        match self {
            Texture::Matte => 0.3,
            Texture::Gloss => 0.6,
            Texture::Velvet => 0.7,
        }
    }

    pub fn compositor(&self) -> &'static dyn TextureCompositor {
        match self {
            Texture::Matte => &MatteCompositor,
            Texture::Gloss => &GlossCompositor,
            Texture::Velvet => &VelvetCompositor,
        }
    }
}

impl FromStr for Texture {
    type Err = LipstickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "matte" => Ok(Texture::Matte),
            "gloss" => Ok(Texture::Gloss),
            "velvet" => Ok(Texture::Velvet),
            other => Err(LipstickError::InvalidParameter(format!("unknown texture type {other:?}"))),
        }
    }
}

impl fmt::Display for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seedable source for the grain terms. A fixed seed makes renders reproducible.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: StdRng,
}

impl NoiseSource {
    pub fn seeded(seed: u64) -> Self {
        NoiseSource { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        NoiseSource { rng: StdRng::from_entropy() }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn gaussian2(&mut self, shape: (usize, usize), std_dev: f32) -> Result<Array2<f32>, Error> {
        let normal = Normal::new(0.0f32, std_dev).map_err(|e| Error::msg(e.to_string()))?;
        Ok(Array2::random_using(shape, normal, &mut self.rng))
    }

    pub fn gaussian3(&mut self, shape: (usize, usize, usize), std_dev: f32) -> Result<Array3<f32>, Error> {
        let normal = Normal::new(0.0f32, std_dev).map_err(|e| Error::msg(e.to_string()))?;
        Ok(Array3::random_using(shape, normal, &mut self.rng))
    }
}

/// A material model: blends a solid colour layer into the image under a
/// normalized lip mask. Inputs and output are BGR float images; the output may
/// leave [0, 255] and is clipped by the caller.
pub trait TextureCompositor: Sync {
    fn compose(
        &self,
        image: &Array3<f32>,
        color_layer: &Array3<f32>,
        mask: &Array2<f32>,
        opacity: f32,
        noise: &mut NoiseSource,
    ) -> Result<Array3<f32>, Error>;
}

/// base_blend is `image * (1 - mask*opacity) + color * (mask*opacity)`.
pub fn base_blend(image: &Array3<f32>, color_layer: &Array3<f32>, mask: &Array2<f32>, opacity: f32) -> Array3<f32> {
    let mut out = image.clone();
    for ((y, x, c), v) in out.indexed_iter_mut() {
        let a = mask[[y, x]] * opacity;
        *v = *v * (1.0 - a) + color_layer[[y, x, c]] * a;
    }
    out
}

fn check_shapes(image: &Array3<f32>, color_layer: &Array3<f32>, mask: &Array2<f32>) -> Result<(), Error> {
    let (h, w, c) = image.dim();
    if c != 3 || color_layer.dim() != (h, w, 3) || mask.dim() != (h, w) {
        return Err(Error::msg(format!(
            "texture - shape mismatch: image {:?}, color {:?}, mask {:?}",
            image.dim(), color_layer.dim(), mask.dim()
        )))
    }
    Ok(())
}

/// Keeps `lips` where the mask covers the pixel and `image` everywhere else.
fn select_lips(image: &Array3<f32>, lips: &Array3<f32>, mask: &Array2<f32>) -> Array3<f32> {
    let mut out = image.clone();
    for ((y, x, c), v) in out.indexed_iter_mut() {
        if mask[[y, x]] > LIP_COVERAGE {
            *v = lips[[y, x, c]];
        }
    }
    out
}

/// Flat colour with a faint grain.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatteCompositor;

impl TextureCompositor for MatteCompositor {
    fn compose(
        &self,
        image: &Array3<f32>,
        color_layer: &Array3<f32>,
        mask: &Array2<f32>,
        opacity: f32,
        noise: &mut NoiseSource,
    ) -> Result<Array3<f32>, Error> {
        check_shapes(image, color_layer, mask)?;
        let mut out = base_blend(image, color_layer, mask, opacity);
        let grain = noise.gaussian3(image.dim(), 2.0)?;
        for ((y, x, c), v) in out.indexed_iter_mut() {
            *v += grain[[y, x, c]] * mask[[y, x]] * opacity * 0.05;
        }
        Ok(out)
    }
}

/// Colour plus a radial white highlight a little above the image centre.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlossCompositor;

impl GlossCompositor {
    /// Brighter colours get a weaker highlight: 0.35 for black down to 0.20 for white.
    pub fn highlight_strength(color_layer: &Array3<f32>) -> f32 {
        let brightness = color_layer.mean().unwrap_or(0.0);
        0.35 - (brightness / 255.0) * 0.15
    }

    pub fn highlight_gradient(h: usize, w: usize) -> Array2<f32> {
        let center_x = (w as f32 * 0.5).trunc();
        let center_y = (h as f32 * 0.4).trunc();
        let max_dist = ((h * h + w * w) as f32).sqrt() * 0.3;
        Array2::from_shape_fn((h, w), |(y, x)| {
            let dist = ((x as f32 - center_x).powi(2) + (y as f32 - center_y).powi(2)).sqrt();
            (1.0 - dist / max_dist).clamp(0.0, 1.0)
        })
    }
}

impl TextureCompositor for GlossCompositor {
    fn compose(
        &self,
        image: &Array3<f32>,
        color_layer: &Array3<f32>,
        mask: &Array2<f32>,
        opacity: f32,
        _noise: &mut NoiseSource,
    ) -> Result<Array3<f32>, Error> {
        check_shapes(image, color_layer, mask)?;
        let (h, w, _) = image.dim();
        let mut lips = base_blend(image, color_layer, mask, opacity);

        let gradient = Self::highlight_gradient(h, w);
        let strength = Self::highlight_strength(color_layer);
        for ((y, x, _), v) in lips.indexed_iter_mut() {
            let hl = gradient[[y, x]] * mask[[y, x]] * strength;
            *v = *v * (1.0 - hl) + 255.0 * hl;
        }

        let blurred = gaussian_blur_array3(&lips, 3)?;
        Ok(select_lips(image, &blurred, mask))
    }
}

/// Deeper colour with a fine multi-scale grain and a soft finish.
#[derive(Debug, Clone, Copy, Default)]
pub struct VelvetCompositor;

impl VelvetCompositor {
    const DEEPEN: f32 = 0.85;
    const BRIGHTEN: f32 = 1.06;
    const GRAIN_SCALES: [usize; 3] = [2, 5, 10];
    const GRAIN_AMPLITUDE: f32 = 0.09;

    /// grain builds a smooth noise field normalized into [0, 0.09].
    pub fn grain(h: usize, w: usize, noise: &mut NoiseSource) -> Result<Array2<f32>, Error> {
        let mut field = Array2::<f32>::zeros((h, w));
        for scale in Self::GRAIN_SCALES {
            let coarse = noise.gaussian2((h / scale + 1, w / scale + 1), 1.0)?;
            let fine = resize_array2(&coarse, w as i32, h as i32)?;
            field.scaled_add(scale as f32 / 30.0, &fine);
        }
        let field = gaussian_blur_array2(&field, 3)?;

        let min = field.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = field.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        Ok(field.mapv(|v| (v - min) / (max - min + 1e-8) * Self::GRAIN_AMPLITUDE))
    }
}

impl TextureCompositor for VelvetCompositor {
    fn compose(
        &self,
        image: &Array3<f32>,
        color_layer: &Array3<f32>,
        mask: &Array2<f32>,
        opacity: f32,
        noise: &mut NoiseSource,
    ) -> Result<Array3<f32>, Error> {
        check_shapes(image, color_layer, mask)?;
        let (h, w, _) = image.dim();

        let deepened = color_layer.mapv(|v| v * Self::DEEPEN);
        let velvet_opacity = (opacity * 1.2).min(1.0);
        let mut lips = base_blend(image, &deepened, mask, velvet_opacity);

        let grain = Self::grain(h, w, noise)?;
        for ((y, x, _), v) in lips.indexed_iter_mut() {
            let t = grain[[y, x]] * mask[[y, x]] * 0.15;
            *v *= Self::BRIGHTEN + t;
        }

        let blurred = gaussian_blur_array3(&lips, 3)?;
        let soft = lips * 0.6 + blurred * 0.4;
        Ok(select_lips(image, &soft, mask).mapv(|v| v.clamp(0.0, 255.0)))
    }
}
