//! Key image rendering
//!
//! Turns resolved button parameters (label, color, icon) into a pixel buffer
//! sized to one physical key. Images are recomputed from scratch on every
//! render and never cached.

mod color;
mod image_renderer;

use image::{Rgb, RgbImage};
use std::path::PathBuf;

use crate::error::Result;

pub use color::{parse_color, scale_color};
pub use image_renderer::ImageRenderer;

/// Where a key's icon comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconSource {
    /// Image file drawn as the key background
    File(PathBuf),
    /// Material Design icon name, looked up in the icon directory
    Mdi(String),
}

/// Concrete rendering parameters for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderParams {
    pub text: String,
    pub text_color: String,
    pub icon: Option<IconSource>,
    pub text_size: u32,
}

/// Pixel dimensions of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySize {
    pub width: u32,
    pub height: u32,
}

impl KeySize {
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

/// RGB pixel buffer for one key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyImage(RgbImage);

impl KeyImage {
    /// All-black key
    pub fn blank(size: KeySize) -> Self {
        Self(RgbImage::from_pixel(size.width, size.height, Rgb([0, 0, 0])))
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        Self(image)
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_rgb(self) -> RgbImage {
        self.0
    }
}

/// Produces key images from rendering parameters
pub trait KeyRenderer: Send + Sync {
    /// Render one key. Missing assets and bad colors are errors, there is no
    /// fallback glyph.
    fn render(&self, params: &RenderParams, size: KeySize) -> Result<KeyImage>;
}
