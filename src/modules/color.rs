use anyhow::Error;
use opencv::core::{Mat, Scalar, Vec3b, CV_8UC3};
use opencv::imgproc::{cvt_color_def, COLOR_HSV2RGB, COLOR_RGB2HSV};
use opencv::prelude::*;

/// An RGB triple as supplied by callers. Images inside the pipeline stay BGR;
/// the swap happens once, when the colour layer is built.
pub type Rgb = [u8; 3];

/// HSV on the OpenCV 8-bit scale: hue in [0, 180), saturation and value in [0, 255].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

const RED_SATURATION_GAIN: f32 = 1.3;
const SATURATION_GAIN: f32 = 1.2;
const VALUE_GAIN: f32 = 1.1;

/// convert_pixel runs one OpenCV colour conversion over a single 8-bit pixel.
fn convert_pixel(px: [u8; 3], code: i32) -> Result<[u8; 3], Error> {
    let src = Mat::new_rows_cols_with_default(
        1,
        1,
        CV_8UC3,
        Scalar::new(px[0] as f64, px[1] as f64, px[2] as f64, 0.0),
    )?;
    let mut dst = Mat::default();
    cvt_color_def(&src, &mut dst, code)?;
    let out: &Vec3b = dst.at_2d(0, 0)?;
    Ok([out[0], out[1], out[2]])
}

pub fn rgb_to_hsv(rgb: Rgb) -> Result<Hsv, Error> {
    let [h, s, v] = convert_pixel(rgb, COLOR_RGB2HSV)?;
    Ok(Hsv { h, s, v })
}

pub fn hsv_to_rgb(hsv: Hsv) -> Result<Rgb, Error> {
    convert_pixel([hsv.h, hsv.s, hsv.v], COLOR_HSV2RGB)
}

pub fn is_red_hue(h: u8) -> bool {
    h <= 20 || (160..=180).contains(&h)
}

/// Boosts saturation (more for reds) and value of a lipstick colour so it
/// reads clearly once blended over skin.
pub fn enhance(rgb: Rgb) -> Result<Rgb, Error> {
    let hsv = rgb_to_hsv(rgb)?;
    let gain = if is_red_hue(hsv.h) { RED_SATURATION_GAIN } else { SATURATION_GAIN };
    let s = ((hsv.s as f32 * gain) as u32).min(255) as u8;
    let v = ((hsv.v as f32 * VALUE_GAIN) as u32).min(255) as u8;
    hsv_to_rgb(Hsv { h: hsv.h, s, v })
}
