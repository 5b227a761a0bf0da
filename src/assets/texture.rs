//! Texture Data
//!
//! CPU-side pixel payloads produced by the texture loaders. LDR textures
//! carry 8-bit unsigned channels; the HDR path carries 32-bit floats and
//! scales `byte_size` accordingly.

/// Decoded texture payload.
#[derive(Debug, Clone, Default)]
pub struct TextureData {
    pub debug_name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Channel count in `1..=4`.
    pub channels: u32,
    pub byte_size: u64,
    /// True when `pixels` holds 32-bit float channels.
    pub is_hdr: bool,
}

impl TextureData {
    /// Solid-color RGBA8 texture of the given size.
    pub fn solid(debug_name: &str, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        let byte_size = pixels.len() as u64;
        Self {
            debug_name: debug_name.to_string(),
            pixels,
            width,
            height,
            channels: 4,
            byte_size,
            is_hdr: false,
        }
    }

    pub fn bytes_per_channel(&self) -> u32 {
        if self.is_hdr {
            4
        } else {
            1
        }
    }
}
