//! Pixel buffer types shared by the decoder and encoder.

use crate::error::{ApngError, Result};

/// PNG color type, as stored in IHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorType {
    /// Grayscale.
    Grayscale = 0,
    /// RGB.
    Rgb = 2,
    /// Indexed color.
    Indexed = 3,
    /// Grayscale with alpha.
    GrayscaleAlpha = 4,
    /// RGBA.
    Rgba = 6,
}

impl ColorType {
    /// Create color type from value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ColorType::Grayscale),
            2 => Some(ColorType::Rgb),
            3 => Some(ColorType::Indexed),
            4 => Some(ColorType::GrayscaleAlpha),
            6 => Some(ColorType::Rgba),
            _ => None,
        }
    }

    /// Get number of channels.
    pub fn channels(&self) -> u8 {
        match self {
            ColorType::Grayscale | ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }

    /// Check whether `bit_depth` is allowed for this color type.
    pub fn allows_bit_depth(&self, bit_depth: u8) -> bool {
        match self {
            ColorType::Grayscale => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
            ColorType::Indexed => matches!(bit_depth, 1 | 2 | 4 | 8),
            ColorType::Rgb | ColorType::GrayscaleAlpha | ColorType::Rgba => {
                matches!(bit_depth, 8 | 16)
            }
        }
    }
}

/// PNG interlace method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlaceMethod {
    /// No interlacing.
    None = 0,
    /// Adam7 interlacing.
    Adam7 = 1,
}

impl InterlaceMethod {
    /// Create from value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(InterlaceMethod::None),
            1 => Some(InterlaceMethod::Adam7),
            _ => None,
        }
    }
}

/// Pixel format of a decoded frame buffer.
///
/// 16-bit formats keep their samples big-endian in the buffer, matching
/// the wire layout. Alpha is non-premultiplied throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Grayscale, 8 bits per pixel.
    Gray8,
    /// Grayscale, 16 bits per pixel.
    Gray16,
    /// RGB, 24 bits per pixel.
    Rgb8,
    /// RGB, 48 bits per pixel.
    Rgb16,
    /// RGBA, 32 bits per pixel, non-premultiplied alpha.
    Rgba8,
    /// RGBA, 64 bits per pixel, non-premultiplied alpha.
    Rgba16,
    /// Palette index, 8 bits per pixel; the palette carries RGBA entries.
    Indexed8,
}

impl PixelFormat {
    /// Get bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Indexed8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgb16 => 6,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16 => 8,
        }
    }

    /// Check if format has an alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Rgba8 | PixelFormat::Rgba16)
    }
}

/// A rectangular pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image width.
    width: u32,
    /// Image height.
    height: u32,
    /// Pixel format.
    format: PixelFormat,
    /// Pixel data, row-major, no padding between rows.
    data: Vec<u8>,
    /// Row stride (bytes per row).
    stride: usize,
    /// Color palette (for indexed images), RGBA entries.
    palette: Option<Vec<[u8; 4]>>,
}

impl Image {
    /// Create a new zero-filled image.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let stride = width as usize * format.bytes_per_pixel();
        let data = vec![0u8; stride * height as usize];
        Self::from_data(width, height, format, data)
    }

    /// Create an image from existing pixel data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ApngError::Format(format!(
                "invalid dimensions {width}x{height}"
            )));
        }

        let stride = width as usize * format.bytes_per_pixel();
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(ApngError::Format(format!(
                "pixel buffer size mismatch: expected {expected} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            format,
            data,
            stride,
            palette: None,
        })
    }

    /// Get image width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get image height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get pixel format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Get row stride in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Get pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable pixel data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get palette (for indexed images).
    pub fn palette(&self) -> Option<&[[u8; 4]]> {
        self.palette.as_deref()
    }

    /// Set palette (for indexed images).
    pub fn set_palette(&mut self, palette: Vec<[u8; 4]>) {
        self.palette = Some(palette);
    }

    /// Get a row of pixels.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    /// Get a mutable row of pixels.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// Get a pixel value.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride + x as usize * bpp;
        &self.data[offset..offset + bpp]
    }

    /// Set a pixel value.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: &[u8]) {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride + x as usize * bpp;
        self.data[offset..offset + bpp].copy_from_slice(&pixel[..bpp]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_type() {
        assert_eq!(ColorType::from_u8(0), Some(ColorType::Grayscale));
        assert_eq!(ColorType::from_u8(6), Some(ColorType::Rgba));
        assert_eq!(ColorType::from_u8(1), None);

        assert_eq!(ColorType::Rgba.channels(), 4);
        assert!(ColorType::Grayscale.allows_bit_depth(1));
        assert!(!ColorType::Rgb.allows_bit_depth(4));
        assert!(!ColorType::Indexed.allows_bit_depth(16));
    }

    #[test]
    fn test_pixel_format() {
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba16.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::Indexed8.bytes_per_pixel(), 1);
        assert!(PixelFormat::Rgba8.has_alpha());
        assert!(!PixelFormat::Gray16.has_alpha());
    }

    #[test]
    fn test_image_creation() {
        let image = Image::new(10, 5, PixelFormat::Rgba8).unwrap();
        assert_eq!(image.width(), 10);
        assert_eq!(image.height(), 5);
        assert_eq!(image.stride(), 40);
        assert_eq!(image.data().len(), 200);
    }

    #[test]
    fn test_pixel_access() {
        let mut image = Image::new(4, 4, PixelFormat::Rgba8).unwrap();
        image.set_pixel(2, 1, &[0xff, 0x00, 0x00, 0x7f]);
        assert_eq!(image.pixel(2, 1), &[0xff, 0x00, 0x00, 0x7f]);
        assert_eq!(image.pixel(0, 0), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(Image::new(0, 4, PixelFormat::Gray8).is_err());
        assert!(Image::from_data(2, 2, PixelFormat::Gray8, vec![0u8; 3]).is_err());
    }

    #[test]
    fn test_palette() {
        let mut image = Image::new(1, 1, PixelFormat::Indexed8).unwrap();
        assert!(image.palette().is_none());
        image.set_palette(vec![[0xff, 0x00, 0x00, 0x7f]]);
        assert_eq!(image.palette().unwrap()[0], [0xff, 0x00, 0x00, 0x7f]);
    }
}
