//! Texture Loading
//!
//! Decodes LDR (`.png`, `.jpg`, `.pnm` family) and HDR (`.hdr`) files into
//! [`TextureData`]. The caller may coerce the channel count to 1/3/4 or
//! keep the source layout, and may request a vertical flip.

use std::path::Path;

use image::DynamicImage;

use crate::assets::texture::TextureData;
use crate::errors::{KilnError, Result};

/// Options applied while decoding a texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureLoadOptions {
    /// Requested channel count: 1, 3, 4, or 0 to preserve the source.
    pub desired_channels: u32,
    pub flip_vertical: bool,
}

impl Default for TextureLoadOptions {
    fn default() -> Self {
        Self {
            desired_channels: 4,
            flip_vertical: false,
        }
    }
}

/// Loads a texture file, detecting the format by extension.
pub fn load_texture(path: &Path, options: TextureLoadOptions) -> Result<TextureData> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "png" | "jpg" | "jpeg" | "pnm" | "pbm" | "pgm" | "ppm" => decode_ldr(path, options),
        "hdr" => decode_hdr(path, options),
        other => Err(KilnError::UnsupportedFormat(format!(
            "texture extension \"{other}\" ({})",
            path.display()
        ))),
    }
}

fn decode_ldr(path: &Path, options: TextureLoadOptions) -> Result<TextureData> {
    let mut img = image::open(path)?;
    if options.flip_vertical {
        img = img.flipv();
    }

    let (width, height) = (img.width(), img.height());
    let (pixels, channels): (Vec<u8>, u32) = match options.desired_channels {
        1 => (img.into_luma8().into_raw(), 1),
        3 => (img.into_rgb8().into_raw(), 3),
        4 => (img.into_rgba8().into_raw(), 4),
        0 => match img {
            DynamicImage::ImageLuma8(buf) => (buf.into_raw(), 1),
            DynamicImage::ImageLumaA8(buf) => (buf.into_raw(), 2),
            DynamicImage::ImageRgb8(buf) => (buf.into_raw(), 3),
            other => (other.into_rgba8().into_raw(), 4),
        },
        other => {
            return Err(KilnError::InvalidArgument(format!(
                "requested channel count {other} (expected 0, 1, 3 or 4)"
            )))
        }
    };

    let byte_size = pixels.len() as u64;
    Ok(TextureData {
        debug_name: display_name(path),
        pixels,
        width,
        height,
        channels,
        byte_size,
        is_hdr: false,
    })
}

fn decode_hdr(path: &Path, options: TextureLoadOptions) -> Result<TextureData> {
    let mut img = image::open(path)?;
    if options.flip_vertical {
        img = img.flipv();
    }

    let (width, height) = (img.width(), img.height());
    let (floats, channels): (Vec<f32>, u32) = match options.desired_channels {
        1 => (img.to_luma32f().into_raw(), 1),
        0 | 3 => (img.to_rgb32f().into_raw(), 3),
        4 => (img.to_rgba32f().into_raw(), 4),
        other => {
            return Err(KilnError::InvalidArgument(format!(
                "requested channel count {other} (expected 0, 1, 3 or 4)"
            )))
        }
    };

    let pixels: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
    let byte_size = pixels.len() as u64;
    Ok(TextureData {
        debug_name: display_name(path),
        pixels,
        width,
        height,
        channels,
        byte_size,
        is_hdr: true,
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
