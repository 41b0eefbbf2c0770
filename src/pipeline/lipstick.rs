use serde::{Deserialize, Serialize};
use crate::error::LipstickError;
use crate::modules::color::Rgb;
use crate::modules::texture::Texture;

/// A validated lipstick request. Construction is the only place where
/// malformed parameters are rejected; the renderer assumes valid input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LipstickSpec {
    pub texture: Texture,
    pub color: Rgb,
    pub opacity: f32,
}

impl LipstickSpec {
    pub fn new(texture: Texture, color: Rgb, opacity: f32) -> Result<Self, LipstickError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(LipstickError::InvalidParameter(format!("opacity {opacity} is outside [0, 1]")))
        }
        Ok(LipstickSpec { texture, color, opacity })
    }

    /// parse validates raw caller input. `opacity` defaults per texture.
    pub fn parse(texture: &str, color: &[i64], opacity: Option<f32>) -> Result<Self, LipstickError> {
        let texture: Texture = texture.parse()?;
        let color = parse_color(color)?;
        Self::new(texture, color, opacity.unwrap_or_else(|| texture.default_opacity()))
    }
}

fn parse_color(color: &[i64]) -> Result<Rgb, LipstickError> {
    if color.len() != 3 {
        return Err(LipstickError::InvalidParameter(format!("color needs 3 components, got {}", color.len())))
    }
    let mut rgb = [0u8; 3];
    for (dst, &v) in rgb.iter_mut().zip(color) {
        *dst = u8::try_from(v)
            .map_err(|_| LipstickError::InvalidParameter(format!("color component {v} is outside [0, 255]")))?;
    }
    Ok(rgb)
}

/// parse_color_str reads "R,G,B".
pub fn parse_color_str(raw: &str) -> Result<Rgb, LipstickError> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LipstickError::InvalidParameter(format!("color {raw:?}: {e}")))?;
    parse_color(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_spec() {
        let spec = LipstickSpec::parse("velvet", &[200, 30, 40], Some(0.8)).unwrap();
        assert_eq!(spec, LipstickSpec { texture: Texture::Velvet, color: [200, 30, 40], opacity: 0.8 });
    }

    #[test]
    fn test_default_opacity_follows_texture() {
        assert_eq!(LipstickSpec::parse("matte", &[1, 2, 3], None).unwrap().opacity, 0.3);
        assert_eq!(LipstickSpec::parse("gloss", &[1, 2, 3], None).unwrap().opacity, 0.6);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let invalid = [
            LipstickSpec::parse("shimmer", &[1, 2, 3], None),
            LipstickSpec::parse("matte", &[256, 0, 0], None),
            LipstickSpec::parse("matte", &[-1, 0, 0], None),
            LipstickSpec::parse("matte", &[1, 2], None),
            LipstickSpec::parse("matte", &[1, 2, 3], Some(1.5)),
            LipstickSpec::parse("matte", &[1, 2, 3], Some(f32::NAN)),
        ];
        for result in invalid {
            assert!(matches!(result, Err(LipstickError::InvalidParameter(_))), "{result:?}");
        }
    }

    #[test]
    fn test_parse_color_str() {
        assert_eq!(parse_color_str("200, 30,40").unwrap(), [200, 30, 40]);
        assert!(parse_color_str("red").is_err());
        assert!(parse_color_str("1,2,3,4").is_err());
    }
}
