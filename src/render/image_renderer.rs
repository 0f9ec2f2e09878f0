//! Key renderer built on the `image` crate and a TrueType font
//!
//! Layout of a key:
//! - background: static icon file scaled to the key, or a Material Design
//!   icon tinted with a dimmed label color, or black
//! - label: centered, one baseline per line, drawn over the background

use ab_glyph::{point, Font, FontArc, Glyph, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use super::color::{parse_color, scale_color};
use super::{IconSource, KeyImage, KeyRenderer, KeySize, RenderParams};
use crate::error::{Error, Result};

/// Brightness of a Material Design icon relative to the label color
const MDI_ICON_OPACITY: f32 = 0.3;

/// Renders keys with a loaded font and an icon directory
///
/// Icon files are decoded once and kept for the renderer's lifetime; key
/// images themselves are always drawn from scratch.
pub struct ImageRenderer {
    font: FontArc,
    icon_dir: PathBuf,
    icons: Mutex<HashMap<PathBuf, Arc<DynamicImage>>>,
}

impl ImageRenderer {
    /// Load the font file; a missing or unreadable font is fatal
    pub fn load(font_path: &Path, icon_dir: impl Into<PathBuf>) -> Result<Self> {
        let bytes = std::fs::read(font_path).map_err(|e| asset_missing(font_path, e))?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| asset_missing(font_path, e))?;
        Ok(Self::with_font(font, icon_dir))
    }

    pub fn with_font(font: FontArc, icon_dir: impl Into<PathBuf>) -> Self {
        Self {
            font,
            icon_dir: icon_dir.into(),
            icons: Mutex::new(HashMap::new()),
        }
    }

    /// Path of a Material Design icon in the icon directory
    pub fn mdi_path(&self, name: &str) -> PathBuf {
        self.icon_dir.join(format!("{}.png", name))
    }

    fn background(&self, icon: Option<&IconSource>, color: Rgb<u8>, size: KeySize) -> Result<RgbImage> {
        match icon {
            None => Ok(RgbImage::from_pixel(size.width, size.height, Rgb([0, 0, 0]))),
            Some(IconSource::File(path)) => {
                let image = self.icon(path)?;
                Ok(imageops::resize(&image.to_rgb8(), size.width, size.height, FilterType::Triangle))
            }
            Some(IconSource::Mdi(name)) => {
                let image = self.icon(&self.mdi_path(name))?;
                let mask = imageops::resize(&image.to_rgba8(), size.width, size.height, FilterType::Triangle);
                Ok(tint_mask(&mask, scale_color(color, MDI_ICON_OPACITY)))
            }
        }
    }

    /// Decoded icon file, read from disk on first use
    fn icon(&self, path: &Path) -> Result<Arc<DynamicImage>> {
        if let Some(image) = self.icons.lock().get(path) {
            return Ok(image.clone());
        }

        let image = Arc::new(image::open(path).map_err(|e| asset_missing(path, e))?);
        debug!("Loaded icon {}", path.display());
        self.icons.lock().insert(path.to_path_buf(), image.clone());
        Ok(image)
    }

    fn draw_label(&self, canvas: &mut RgbImage, text: &str, color: Rgb<u8>, text_size: u32) {
        if text.is_empty() {
            return;
        }

        let scale = PxScale::from(text_size as f32);
        let scaled = self.font.as_scaled(scale);
        let line_height = scaled.ascent() - scaled.descent() + scaled.line_gap();
        let lines: Vec<&str> = text.lines().collect();
        let center_x = canvas.width() as f32 / 2.0;
        let center_y = canvas.height() as f32 / 2.0;

        for (idx, line) in lines.iter().enumerate() {
            let offset = idx as f32 - (lines.len() as f32 - 1.0) / 2.0;
            let baseline = center_y + offset * line_height;
            let (glyphs, width) = self.layout_line(line, scale);

            for mut glyph in glyphs {
                glyph.position.x += center_x - width / 2.0;
                glyph.position.y = baseline;
                let Some(outlined) = self.font.outline_glyph(glyph) else {
                    continue;
                };
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let x = bounds.min.x as i64 + gx as i64;
                    let y = bounds.min.y as i64 + gy as i64;
                    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
                        return;
                    }
                    let pixel = canvas.get_pixel_mut(x as u32, y as u32);
                    *pixel = blend(*pixel, color, coverage);
                });
            }
        }
    }

    /// Position glyphs of one line starting at x = 0, returning the advance width
    fn layout_line(&self, line: &str, scale: PxScale) -> (Vec<Glyph>, f32) {
        let scaled = self.font.as_scaled(scale);
        let mut caret = 0.0;
        let mut previous = None;
        let mut glyphs = Vec::with_capacity(line.len());

        for ch in line.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            glyphs.push(id.with_scale_and_position(scale, point(caret, 0.0)));
            caret += scaled.h_advance(id);
            previous = Some(id);
        }

        (glyphs, caret)
    }
}

impl KeyRenderer for ImageRenderer {
    fn render(&self, params: &RenderParams, size: KeySize) -> Result<KeyImage> {
        let color = parse_color(&params.text_color)?;
        let mut canvas = self.background(params.icon.as_ref(), color, size)?;
        self.draw_label(&mut canvas, &params.text, color, params.text_size);

        trace!(text = %params.text, color = %params.text_color, "Rendered key image");
        Ok(KeyImage::from_rgb(canvas))
    }
}

/// Use an icon's coverage (alpha times luminance) as a mask for `fill` on black
pub(crate) fn tint_mask(mask: &image::RgbaImage, fill: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let [r, g, b, a] = mask.get_pixel(x, y).0;
        let luminance = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0;
        // Black-on-transparent glyphs carry their shape in alpha only
        let coverage = if luminance < 0.05 { a as f32 / 255.0 } else { luminance * a as f32 / 255.0 };
        blend(Rgb([0, 0, 0]), fill, coverage)
    })
}

fn blend(base: Rgb<u8>, over: Rgb<u8>, coverage: f32) -> Rgb<u8> {
    let c = coverage.clamp(0.0, 1.0);
    let mix = |b: u8, o: u8| (b as f32 * (1.0 - c) + o as f32 * c).round() as u8;
    Rgb([mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2])])
}

fn asset_missing(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::AssetMissing {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
