/// Rounds a kernel size up to the next odd value, never below 1.
pub fn odd_kernel(size: i32) -> i32 {
    let size = size.max(1);
    if size % 2 == 1 { size } else { size + 1 }
}

/// Clips a float sample into the 8-bit range, truncating like a plain cast.
pub fn saturate_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0
    }
    v.clamp(0.0, 255.0) as u8
}

pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0
    }
    v.clamp(0.0, 1.0)
}
