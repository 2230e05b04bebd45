//! APNG encoder: serializes an [`Animation`] to a chunk stream that
//! conforming APNG decoders and still-PNG decoders both accept.

use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use flate2::Compression;

use crate::animation::{Animation, AnimationControl, Frame, FrameControl};
use crate::chunk::{self, ChunkType, PNG_SIGNATURE};
use crate::error::{ApngError, Result};
use crate::filter::{self, FilterType};
use crate::image::{ColorType, Image, PixelFormat};
use crate::zlib;

/// Compression level for image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// No compression.
    None,
    /// Fast compression.
    Fast,
    /// Default compression.
    #[default]
    Default,
    /// Best compression.
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Best => Compression::best(),
        }
    }
}

/// Filter selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStrategy {
    /// No filtering.
    None,
    /// Always use Sub filter.
    Sub,
    /// Always use Up filter.
    Up,
    /// Always use Average filter.
    Average,
    /// Always use Paeth filter.
    Paeth,
    /// Adaptively select the best filter per row.
    #[default]
    Adaptive,
}

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Compression level for the per-frame zlib streams.
    pub compression: CompressionLevel,
    /// Filter selection strategy.
    pub filter: FilterStrategy,
    /// Maximum payload size of each emitted IDAT/fdAT chunk.
    pub chunk_size_cap: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::Default,
            filter: FilterStrategy::Adaptive,
            chunk_size_cap: 8192,
        }
    }
}

/// APNG encoder.
pub struct Encoder {
    config: EncoderConfig,
}

impl Encoder {
    /// Create an encoder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: EncoderConfig::default(),
        }
    }

    /// Create an encoder with a configuration.
    pub fn with_config(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Serialize an animation. Frames are emitted in the order given;
    /// sequence numbers are assigned monotonically from 0 across the
    /// fcTL/fdAT interleave.
    pub fn encode<W: Write>(&self, writer: &mut W, animation: &Animation) -> Result<()> {
        let frames = &animation.frames;
        let first = frames
            .first()
            .ok_or_else(|| ApngError::Format("animation has no frames".into()))?;
        let canvas_width = first.width();
        let canvas_height = first.height();
        let format = first.image.format();
        let (color_type, bit_depth) = color_for_format(format);

        self.validate(frames, canvas_width, canvas_height, format)?;
        let num_anim_frames = frames.len() - usize::from(first.is_default);

        writer.write_all(&PNG_SIGNATURE)?;

        let mut ihdr = [0u8; 13];
        BigEndian::write_u32(&mut ihdr[0..4], canvas_width);
        BigEndian::write_u32(&mut ihdr[4..8], canvas_height);
        ihdr[8] = bit_depth;
        ihdr[9] = color_type as u8;
        chunk::write_chunk(writer, ChunkType::IHDR, &ihdr)?;

        let actl = AnimationControl {
            num_frames: num_anim_frames as u32,
            num_plays: animation.loop_count,
        };
        chunk::write_chunk(writer, ChunkType::ACTL, &actl.to_bytes())?;

        if format == PixelFormat::Indexed8 {
            self.write_palette(writer, first.image.palette())?;
        }

        let cap = self.config.chunk_size_cap.max(1);
        let mut sequence = 0u32;

        for (index, frame) in frames.iter().enumerate() {
            let data = self.frame_data(&frame.image)?;

            if frame.is_default {
                // A default image rides in IDAT ahead of the first fcTL
                // and takes no sequence number.
                for part in data.chunks(cap) {
                    chunk::write_chunk(writer, ChunkType::IDAT, part)?;
                }
                continue;
            }

            let control = FrameControl {
                sequence_number: sequence,
                width: frame.width(),
                height: frame.height(),
                x_offset: frame.x_offset,
                y_offset: frame.y_offset,
                // A zero denominator is carried verbatim; players treat
                // it as 100.
                delay_num: frame.delay_num,
                delay_den: frame.delay_den,
                dispose_op: frame.dispose_op,
                blend_op: frame.blend_op,
            };
            sequence += 1;
            chunk::write_chunk(writer, ChunkType::FCTL, &control.to_bytes())?;

            if index == 0 {
                for part in data.chunks(cap) {
                    chunk::write_chunk(writer, ChunkType::IDAT, part)?;
                }
            } else {
                for part in data.chunks(cap) {
                    let mut payload = Vec::with_capacity(4 + part.len());
                    payload.extend_from_slice(&sequence.to_be_bytes());
                    sequence += 1;
                    payload.extend_from_slice(part);
                    chunk::write_chunk(writer, ChunkType::FDAT, &payload)?;
                }
            }
        }

        chunk::write_chunk(writer, ChunkType::IEND, &[])?;
        Ok(())
    }

    fn validate(
        &self,
        frames: &[Frame],
        canvas_width: u32,
        canvas_height: u32,
        format: PixelFormat,
    ) -> Result<()> {
        for (index, frame) in frames.iter().enumerate() {
            if frame.image.format() != format {
                return Err(ApngError::Format(
                    "all frames must share one pixel format".into(),
                ));
            }
            if format == PixelFormat::Indexed8
                && frame.image.palette() != frames[0].image.palette()
            {
                return Err(ApngError::Format(
                    "all frames must share one palette".into(),
                ));
            }
            if frame.is_default && index != 0 {
                return Err(ApngError::Format(
                    "only the first frame may be a default image".into(),
                ));
            }
            let x_end = frame.x_offset.checked_add(frame.width());
            let y_end = frame.y_offset.checked_add(frame.height());
            if x_end.is_none_or(|x| x > canvas_width) || y_end.is_none_or(|y| y > canvas_height) {
                return Err(ApngError::Format(format!(
                    "frame {index} exceeds the {canvas_width}x{canvas_height} canvas"
                )));
            }
        }

        // The first frame defines the canvas, so it must sit at the
        // origin; a default image needs at least one animation frame
        // after it.
        if frames[0].x_offset != 0 || frames[0].y_offset != 0 {
            return Err(ApngError::Format(
                "first frame must cover the canvas".into(),
            ));
        }
        if frames[0].is_default && frames.len() == 1 {
            return Err(ApngError::Format(
                "a default image needs at least one animation frame".into(),
            ));
        }
        Ok(())
    }

    fn write_palette<W: Write>(&self, writer: &mut W, palette: Option<&[[u8; 4]]>) -> Result<()> {
        let palette =
            palette.ok_or_else(|| ApngError::Format("indexed frame without palette".into()))?;
        if palette.is_empty() || palette.len() > 256 {
            return Err(ApngError::Format("invalid palette size".into()));
        }

        let mut plte = Vec::with_capacity(palette.len() * 3);
        for entry in palette {
            plte.extend_from_slice(&entry[0..3]);
        }
        chunk::write_chunk(writer, ChunkType::PLTE, &plte)?;

        if palette.iter().any(|entry| entry[3] != 0xff) {
            let trns: Vec<u8> = palette.iter().map(|entry| entry[3]).collect();
            chunk::write_chunk(writer, ChunkType::TRNS, &trns)?;
        }
        Ok(())
    }

    /// Filter and compress one frame's pixel rows into a zlib stream.
    fn frame_data(&self, image: &Image) -> Result<Vec<u8>> {
        let bpp = image.format().bytes_per_pixel();
        let row_bytes = image.stride();
        let zero_row = vec![0u8; row_bytes];
        let mut scratch = vec![0u8; row_bytes];
        let mut filtered = Vec::with_capacity(image.height() as usize * (1 + row_bytes));

        for y in 0..image.height() {
            let row = image.row(y);
            let previous: &[u8] = if y > 0 { image.row(y - 1) } else { &zero_row };

            let filter_type = match self.config.filter {
                FilterStrategy::None => FilterType::None,
                FilterStrategy::Sub => FilterType::Sub,
                FilterStrategy::Up => FilterType::Up,
                FilterStrategy::Average => FilterType::Average,
                FilterStrategy::Paeth => FilterType::Paeth,
                FilterStrategy::Adaptive => filter::select_filter(row, previous, bpp),
            };

            filtered.push(filter_type as u8);
            filter::filter_row(filter_type, row, previous, bpp, &mut scratch);
            filtered.extend_from_slice(&scratch);
        }

        zlib::compress(&filtered, self.config.compression.to_flate2())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode an animation with the default configuration.
pub fn encode<W: Write>(mut writer: W, animation: &Animation) -> Result<()> {
    Encoder::new().encode(&mut writer, animation)
}

fn color_for_format(format: PixelFormat) -> (ColorType, u8) {
    match format {
        PixelFormat::Gray8 => (ColorType::Grayscale, 8),
        PixelFormat::Gray16 => (ColorType::Grayscale, 16),
        PixelFormat::Rgb8 => (ColorType::Rgb, 8),
        PixelFormat::Rgb16 => (ColorType::Rgb, 16),
        PixelFormat::Rgba8 => (ColorType::Rgba, 8),
        PixelFormat::Rgba16 => (ColorType::Rgba, 16),
        PixelFormat::Indexed8 => (ColorType::Indexed, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BlendOp, DisposeOp};
    use crate::decoder;
    use std::io::Cursor;

    fn gray_frame(width: u32, height: u32, value: u8) -> Frame {
        let data = vec![value; (width * height) as usize];
        Frame {
            image: Image::from_data(width, height, PixelFormat::Gray8, data).unwrap(),
            x_offset: 0,
            y_offset: 0,
            delay_num: 1,
            delay_den: 10,
            dispose_op: DisposeOp::None,
            blend_op: BlendOp::Source,
            is_default: false,
        }
    }

    #[test]
    fn test_encode_still_roundtrip() {
        let animation = Animation {
            frames: vec![gray_frame(4, 3, 0x7f)],
            loop_count: 0,
        };

        let mut out = Vec::new();
        encode(&mut out, &animation).unwrap();
        assert_eq!(&out[0..8], &PNG_SIGNATURE);

        let decoded = decoder::decode_all(Cursor::new(out)).unwrap();
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].image.data(), animation.frames[0].image.data());
    }

    #[test]
    fn test_empty_animation_rejected() {
        let animation = Animation {
            frames: Vec::new(),
            loop_count: 0,
        };
        let mut out = Vec::new();
        assert!(encode(&mut out, &animation).is_err());
    }

    #[test]
    fn test_lone_default_image_rejected() {
        let mut frame = gray_frame(2, 2, 0);
        frame.is_default = true;
        let animation = Animation {
            frames: vec![frame],
            loop_count: 0,
        };
        let mut out = Vec::new();
        assert!(encode(&mut out, &animation).is_err());
    }

    #[test]
    fn test_frame_exceeding_canvas_rejected() {
        let mut second = gray_frame(3, 3, 1);
        second.x_offset = 2;
        let animation = Animation {
            frames: vec![gray_frame(4, 4, 0), second],
            loop_count: 0,
        };
        let mut out = Vec::new();
        assert!(encode(&mut out, &animation).is_err());
    }

    #[test]
    fn test_small_chunk_cap_still_decodes() {
        let config = EncoderConfig {
            chunk_size_cap: 5,
            ..EncoderConfig::default()
        };
        let animation = Animation {
            frames: vec![gray_frame(16, 16, 0xaa), gray_frame(16, 16, 0x55)],
            loop_count: 3,
        };

        let mut out = Vec::new();
        Encoder::with_config(config).encode(&mut out, &animation).unwrap();

        let decoded = decoder::decode_all(Cursor::new(out)).unwrap();
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.loop_count, 3);
        assert_eq!(decoded.frames[1].image.data(), animation.frames[1].image.data());
    }
}
