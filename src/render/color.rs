//! Color parsing for labels and icon tints

use image::Rgb;

use crate::error::{Error, Result};

/// Parse a CSS color name or hex string ("orangered", "#ff4500", "#f40")
pub fn parse_color(color: &str) -> Result<Rgb<u8>> {
    let parsed = csscolorparser::parse(color.trim())
        .map_err(|e| Error::Render(format!("invalid color '{}': {}", color, e)))?;
    let [r, g, b, _] = parsed.to_rgba8();
    Ok(Rgb([r, g, b]))
}

/// Scale every channel by `factor` (0.0 = black, 1.0 = unchanged)
pub fn scale_color(color: Rgb<u8>, factor: f32) -> Rgb<u8> {
    let factor = factor.clamp(0.0, 1.0);
    let Rgb([r, g, b]) = color;
    Rgb([
        (r as f32 * factor) as u8,
        (g as f32 * factor) as u8,
        (b as f32 * factor) as u8,
    ])
}
