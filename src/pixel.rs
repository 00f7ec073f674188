use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorModel {
    Rgba,
    Gray,
    /// Single alpha channel, used for selection masks.
    Alpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDepth {
    U8,
    U16,
    F32,
}

impl ChannelDepth {
    pub fn bytes(self) -> usize {
        match self {
            ChannelDepth::U8 => 1,
            ChannelDepth::U16 => 2,
            ChannelDepth::F32 => 4,
        }
    }
}

/// Channel layout of every pixel in a device or buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat {
    pub model: ColorModel,
    pub depth: ChannelDepth,
}

impl PixelFormat {
    pub const RGBA8: PixelFormat = PixelFormat { model: ColorModel::Rgba, depth: ChannelDepth::U8 };
    pub const RGBA16: PixelFormat = PixelFormat { model: ColorModel::Rgba, depth: ChannelDepth::U16 };
    pub const RGBA_F32: PixelFormat = PixelFormat { model: ColorModel::Rgba, depth: ChannelDepth::F32 };
    pub const GRAY8: PixelFormat = PixelFormat { model: ColorModel::Gray, depth: ChannelDepth::U8 };
    pub const ALPHA8: PixelFormat = PixelFormat { model: ColorModel::Alpha, depth: ChannelDepth::U8 };

    pub fn channel_count(&self) -> usize {
        match self.model {
            ColorModel::Rgba => 4,
            ColorModel::Gray | ColorModel::Alpha => 1,
        }
    }

    #[inline]
    pub fn pixel_size(&self) -> usize {
        self.channel_count() * self.depth.bytes()
    }

    pub fn has_alpha(&self) -> bool {
        !matches!(self.model, ColorModel::Gray)
    }

    /// Transparent black (all channels zero) in this format.
    pub fn transparent(&self) -> Vec<u8> {
        vec![0u8; self.pixel_size()]
    }

    /// Encode an unmultiplied 8-bit RGBA color into this format.
    /// Gray takes Rec.601 luma and drops alpha; Alpha keeps only alpha.
    pub fn encode_rgba8(&self, rgba: [u8; 4]) -> Vec<u8> {
        match (self.model, self.depth) {
            (ColorModel::Rgba, ChannelDepth::U8) => rgba.to_vec(),
            (ColorModel::Rgba, ChannelDepth::U16) => rgba
                .iter()
                .flat_map(|&c| (c as u16 * 257).to_ne_bytes())
                .collect(),
            (ColorModel::Rgba, ChannelDepth::F32) => rgba
                .iter()
                .flat_map(|&c| (c as f32 / 255.0).to_ne_bytes())
                .collect(),
            (ColorModel::Gray, depth) => {
                let luma = (0.299 * rgba[0] as f32 + 0.587 * rgba[1] as f32 + 0.114 * rgba[2] as f32)
                    .round()
                    .clamp(0.0, 255.0) as u8;
                encode_channel(luma, depth)
            }
            (ColorModel::Alpha, depth) => encode_channel(rgba[3], depth),
        }
    }

    /// Validate that `pixel` has this format's byte length.
    pub fn check_pixel(&self, pixel: &[u8]) -> PaintResult<()> {
        if pixel.len() != self.pixel_size() {
            return Err(PaintError::format_mismatch(
                format!("{} ({} bytes/pixel)", self, self.pixel_size()),
                format!("{} bytes", pixel.len()),
            ));
        }
        Ok(())
    }
}

fn encode_channel(v: u8, depth: ChannelDepth) -> Vec<u8> {
    match depth {
        ChannelDepth::U8 => vec![v],
        ChannelDepth::U16 => (v as u16 * 257).to_ne_bytes().to_vec(),
        ChannelDepth::F32 => (v as f32 / 255.0).to_ne_bytes().to_vec(),
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = match self.model {
            ColorModel::Rgba => "RGBA",
            ColorModel::Gray => "GRAY",
            ColorModel::Alpha => "ALPHA",
        };
        let depth = match self.depth {
            ChannelDepth::U8 => "U8",
            ChannelDepth::U16 => "U16",
            ChannelDepth::F32 => "F32",
        };
        write!(f, "{}/{}", model, depth)
    }
}

/// A rectangle of tightly packed, row-major pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    rect: Rect,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-filled (transparent) buffer.
    pub fn new(rect: Rect, format: PixelFormat) -> Self {
        let len = rect.area() as usize * format.pixel_size();
        Self { rect, format, data: vec![0u8; len] }
    }

    /// Buffer with every pixel set to `pixel`.
    pub fn filled(rect: Rect, format: PixelFormat, pixel: &[u8]) -> PaintResult<Self> {
        format.check_pixel(pixel)?;
        let data = pixel.repeat(rect.area() as usize);
        Ok(Self { rect, format, data })
    }

    pub fn from_raw(rect: Rect, format: PixelFormat, data: Vec<u8>) -> PaintResult<Self> {
        let expected = rect.area() as usize * format.pixel_size();
        if data.len() != expected {
            return Err(PaintError::format_mismatch(
                format!("{} bytes ({} {}x{})", expected, format, rect.width, rect.height),
                format!("{} bytes", data.len()),
            ));
        }
        Ok(Self { rect, format, data })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.rect.width as usize * self.format.pixel_size()
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> usize {
        let lx = (x - self.rect.x) as usize;
        let ly = (y - self.rect.y) as usize;
        ly * self.row_bytes() + lx * self.format.pixel_size()
    }

    /// Pixel at absolute device coordinates. Panics outside the buffer rect.
    pub fn pixel(&self, x: i32, y: i32) -> &[u8] {
        assert!(self.rect.contains_point(x, y), "({x}, {y}) outside {:?}", self.rect);
        let off = self.offset(x, y);
        &self.data[off..off + self.format.pixel_size()]
    }

    pub fn pixel_mut(&mut self, x: i32, y: i32) -> &mut [u8] {
        assert!(self.rect.contains_point(x, y), "({x}, {y}) outside {:?}", self.rect);
        let off = self.offset(x, y);
        let ps = self.format.pixel_size();
        &mut self.data[off..off + ps]
    }

    /// Row `y` (absolute coordinate).
    pub fn row(&self, y: i32) -> &[u8] {
        let start = (y - self.rect.y) as usize * self.row_bytes();
        &self.data[start..start + self.row_bytes()]
    }

    /// All pixels as RGBA quads; only valid for `RGBA8` buffers.
    pub fn rgba8_pixels(&self) -> PaintResult<&[[u8; 4]]> {
        if self.format != PixelFormat::RGBA8 {
            return Err(PaintError::format_mismatch(PixelFormat::RGBA8, self.format));
        }
        Ok(bytemuck::cast_slice(&self.data))
    }
}
