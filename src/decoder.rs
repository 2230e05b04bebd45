//! APNG decoder: chunk dispatch, the animation sequencer, scanline
//! reconstruction, and pixel materialization.
//!
//! The sequencer follows the APNG chunk ordering rules: an fcTL seen
//! before any IDAT binds the IDAT group to the first animation frame,
//! while an fcTL seen after an unbound IDAT group retroactively turns
//! that group into a default image that is not part of the animation.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};

use crate::animation::{Animation, AnimationControl, Config, Frame, FrameControl};
use crate::chunk::{self, ChunkType};
use crate::error::{ApngError, Result};
use crate::filter;
use crate::image::{ColorType, Image, InterlaceMethod, PixelFormat};
use crate::zlib::Inflater;

/// Adam7 interlace pass parameters: (start_x, start_y, step_x, step_y).
const ADAM7_PASSES: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Decode a full animation from a PNG/APNG stream.
pub fn decode_all<R: Read>(reader: R) -> Result<Animation> {
    Decoder::new(reader).decode_all()
}

/// Decode the first frame only. For a still PNG this is the image; for
/// an APNG it is the default image or first animation frame.
pub fn decode<R: Read>(reader: R) -> Result<Image> {
    let mut animation = decode_all(reader)?;
    Ok(animation.frames.swap_remove(0).image)
}

/// Read only the logical image configuration, without decoding any
/// pixel data.
pub fn decode_config<R: Read>(reader: R) -> Result<Config> {
    Decoder::new(reader).decode_config()
}

/// Parsed IHDR fields shared by every frame.
#[derive(Debug, Clone, Copy)]
struct ImageInfo {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: ColorType,
    interlace: InterlaceMethod,
}

impl ImageInfo {
    fn bits_per_pixel(&self) -> usize {
        self.bit_depth as usize * self.color_type.channels() as usize
    }

    /// Byte distance used by the scanline filters.
    fn filter_bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel().div_ceil(8)
    }

    fn row_bytes(&self, width: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(self.bits_per_pixel())?
            .checked_add(7)
            .map(|bits| bits / 8)
    }

    /// Total filtered size of one frame's raw data, honoring interlacing.
    fn raw_data_len(&self, width: u32, height: u32) -> Option<usize> {
        match self.interlace {
            InterlaceMethod::None => {
                let row = self.row_bytes(width)?.checked_add(1)?;
                row.checked_mul(height as usize)
            }
            InterlaceMethod::Adam7 => {
                let mut total = 0usize;
                for &(start_x, start_y, step_x, step_y) in &ADAM7_PASSES {
                    let (pass_w, pass_h) =
                        adam7_pass_dimensions(width, height, start_x, start_y, step_x, step_y);
                    if pass_w == 0 || pass_h == 0 {
                        continue;
                    }
                    let row = self.row_bytes(pass_w as u32)?.checked_add(1)?;
                    total = total.checked_add(row.checked_mul(pass_h)?)?;
                }
                Some(total)
            }
        }
    }
}

fn adam7_pass_dimensions(
    width: u32,
    height: u32,
    start_x: usize,
    start_y: usize,
    step_x: usize,
    step_y: usize,
) -> (usize, usize) {
    let pass_w = (width as usize + step_x - 1 - start_x) / step_x;
    let pass_h = (height as usize + step_y - 1 - start_y) / step_y;
    (pass_w, pass_h)
}

/// A frame whose data chunks are still being accumulated.
struct PendingFrame {
    /// The fcTL that introduced the frame; `None` for an IDAT group not
    /// (yet) bound to an fcTL.
    control: Option<FrameControl>,
    /// Whether this frame's payload arrives in IDAT chunks.
    from_idat: bool,
    width: u32,
    height: u32,
    inflater: Inflater,
}

struct Decoder<R: Read> {
    reader: R,
    info: Option<ImageInfo>,
    palette: Option<Vec<[u8; 4]>>,
    transparency: Option<Vec<u8>>,
    actl: Option<AnimationControl>,
    frames: Vec<Frame>,
    current: Option<PendingFrame>,
    next_sequence: u32,
    num_fctl: u32,
    seen_idat: bool,
    seen_fdat: bool,
}

impl<R: Read> Decoder<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            info: None,
            palette: None,
            transparency: None,
            actl: None,
            frames: Vec::new(),
            current: None,
            next_sequence: 0,
            num_fctl: 0,
            seen_idat: false,
            seen_fdat: false,
        }
    }

    fn decode_all(mut self) -> Result<Animation> {
        self.read_header()?;

        loop {
            let chunk = chunk::read_chunk(&mut self.reader)?;
            match chunk.chunk_type {
                ChunkType::IHDR => {
                    return Err(ApngError::Format("duplicate IHDR".into()));
                }
                ChunkType::PLTE => self.parse_plte(&chunk.data)?,
                ChunkType::TRNS => self.parse_trns(&chunk.data)?,
                ChunkType::ACTL => self.parse_actl(&chunk.data)?,
                ChunkType::FCTL => self.handle_fctl(&chunk.data)?,
                ChunkType::IDAT => self.handle_idat(&chunk.data)?,
                ChunkType::FDAT => self.handle_fdat(&chunk.data)?,
                ChunkType::IEND => break,
                other if other.is_critical() => {
                    return Err(ApngError::Unsupported(format!(
                        "unknown critical chunk {other}"
                    )));
                }
                other => {
                    tracing::debug!("skipping ancillary chunk {}", other);
                }
            }
        }

        self.finish()
    }

    fn decode_config(mut self) -> Result<Config> {
        self.read_header()?;

        loop {
            let (length, chunk_type) = chunk::read_chunk_header(&mut self.reader)?;
            match chunk_type {
                ChunkType::IHDR => {
                    return Err(ApngError::Format("duplicate IHDR".into()));
                }
                // Stop at the first data-bearing chunk without touching
                // its payload.
                ChunkType::IDAT | ChunkType::FDAT | ChunkType::FCTL | ChunkType::IEND => break,
                ChunkType::PLTE => {
                    let data = chunk::read_chunk_data(&mut self.reader, ChunkType::PLTE, length)?;
                    self.parse_plte(&data)?;
                }
                ChunkType::TRNS => {
                    let data = chunk::read_chunk_data(&mut self.reader, ChunkType::TRNS, length)?;
                    self.parse_trns(&data)?;
                }
                ChunkType::ACTL => {
                    let data = chunk::read_chunk_data(&mut self.reader, ChunkType::ACTL, length)?;
                    self.parse_actl(&data)?;
                }
                other if other.is_critical() => {
                    return Err(ApngError::Unsupported(format!(
                        "unknown critical chunk {other}"
                    )));
                }
                other => {
                    chunk::read_chunk_data(&mut self.reader, other, length)?;
                }
            }
        }

        let info = self.info()?;
        Ok(Config {
            width: info.width,
            height: info.height,
            color_model: self.output_format(&info),
        })
    }

    /// Read the signature and the IHDR chunk, which must come first.
    fn read_header(&mut self) -> Result<()> {
        chunk::read_signature(&mut self.reader)?;
        let first = chunk::read_chunk(&mut self.reader)?;
        if first.chunk_type != ChunkType::IHDR {
            return Err(ApngError::Format("missing IHDR".into()));
        }
        self.parse_ihdr(&first.data)
    }

    fn info(&self) -> Result<ImageInfo> {
        self.info
            .ok_or_else(|| ApngError::Format("missing IHDR".into()))
    }

    fn parse_ihdr(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != 13 {
            return Err(ApngError::Format("invalid IHDR length".into()));
        }

        let width = BigEndian::read_u32(&data[0..4]);
        let height = BigEndian::read_u32(&data[4..8]);
        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(ApngError::Format(format!(
                "invalid dimensions {width}x{height}"
            )));
        }

        let bit_depth = data[8];
        let color_type = ColorType::from_u8(data[9])
            .ok_or_else(|| ApngError::Format(format!("invalid color type {}", data[9])))?;
        if !color_type.allows_bit_depth(bit_depth) {
            return Err(ApngError::Format(format!(
                "invalid bit depth {bit_depth} for color type {color_type:?}"
            )));
        }
        if data[10] != 0 {
            return Err(ApngError::Unsupported(format!(
                "compression method {}",
                data[10]
            )));
        }
        if data[11] != 0 {
            return Err(ApngError::Unsupported(format!("filter method {}", data[11])));
        }
        let interlace = InterlaceMethod::from_u8(data[12])
            .ok_or_else(|| ApngError::Unsupported(format!("interlace method {}", data[12])))?;

        // A canvas whose sample count cannot be addressed is rejected up
        // front, before any pixel buffer exists.
        let n_pixels = width as u64 * height as u64;
        if n_pixels != n_pixels as usize as u64 || n_pixels > i64::MAX as u64 / 8 {
            return Err(ApngError::Unsupported("dimension overflow".into()));
        }

        self.info = Some(ImageInfo {
            width,
            height,
            bit_depth,
            color_type,
            interlace,
        });
        Ok(())
    }

    fn parse_plte(&mut self, data: &[u8]) -> Result<()> {
        if self.seen_idat || self.current.is_some() {
            return Err(ApngError::Format("PLTE after image data".into()));
        }
        if self.palette.is_some() {
            return Err(ApngError::Format("duplicate PLTE".into()));
        }
        let info = self.info()?;
        if matches!(
            info.color_type,
            ColorType::Grayscale | ColorType::GrayscaleAlpha
        ) {
            return Err(ApngError::Format(format!(
                "PLTE not allowed for color type {:?}",
                info.color_type
            )));
        }
        if data.is_empty() || !data.len().is_multiple_of(3) || data.len() > 256 * 3 {
            return Err(ApngError::Format("invalid PLTE length".into()));
        }

        let mut palette = Vec::with_capacity(data.len() / 3);
        for rgb in data.chunks_exact(3) {
            palette.push([rgb[0], rgb[1], rgb[2], 0xff]);
        }
        self.palette = Some(palette);
        Ok(())
    }

    fn parse_trns(&mut self, data: &[u8]) -> Result<()> {
        if self.transparency.is_some() {
            return Err(ApngError::Format("multiple tRNS chunks".into()));
        }
        if self.seen_idat || self.current.is_some() {
            return Err(ApngError::Format("tRNS after image data".into()));
        }
        let info = self.info()?;
        match info.color_type {
            ColorType::Grayscale => {
                if data.len() != 2 {
                    return Err(ApngError::Format("invalid tRNS length".into()));
                }
            }
            ColorType::Rgb => {
                if data.len() != 6 {
                    return Err(ApngError::Format("invalid tRNS length".into()));
                }
            }
            ColorType::Indexed => {
                let palette_len = self
                    .palette
                    .as_ref()
                    .ok_or_else(|| ApngError::Format("tRNS before PLTE".into()))?
                    .len();
                if data.len() > palette_len {
                    return Err(ApngError::Format(
                        "tRNS has more entries than PLTE".into(),
                    ));
                }
            }
            ColorType::GrayscaleAlpha | ColorType::Rgba => {
                return Err(ApngError::Format(format!(
                    "tRNS not allowed for color type {:?}",
                    info.color_type
                )));
            }
        }
        self.transparency = Some(data.to_vec());
        Ok(())
    }

    fn parse_actl(&mut self, data: &[u8]) -> Result<()> {
        if self.seen_idat || self.current.is_some() {
            return Err(ApngError::Format("acTL after image data".into()));
        }
        if self.actl.is_some() {
            return Err(ApngError::Format("duplicate acTL".into()));
        }
        self.actl = Some(AnimationControl::parse(data)?);
        Ok(())
    }

    fn expect_sequence(&mut self, sequence: u32) -> Result<()> {
        if sequence != self.next_sequence {
            return Err(ApngError::Format(format!(
                "apng sequence number mismatch: expected {}, got {sequence}",
                self.next_sequence
            )));
        }
        self.next_sequence += 1;
        Ok(())
    }

    fn handle_fctl(&mut self, data: &[u8]) -> Result<()> {
        let control = FrameControl::parse(data)?;
        if self.actl.is_none() {
            return Err(ApngError::Format("fcTL without acTL".into()));
        }
        self.expect_sequence(control.sequence_number)?;

        let info = self.info()?;
        let x_end = control.x_offset.checked_add(control.width);
        let y_end = control.y_offset.checked_add(control.height);
        if x_end.is_none_or(|x| x > info.width) || y_end.is_none_or(|y| y > info.height) {
            return Err(ApngError::Format(format!(
                "frame region {}x{}+{}+{} exceeds the {}x{} canvas",
                control.width, control.height, control.x_offset, control.y_offset,
                info.width, info.height
            )));
        }

        // Close the frame in flight. An IDAT group not bound to an fcTL
        // becomes the default image here.
        if let Some(pending) = self.current.take() {
            let make_default = pending.control.is_none();
            let frame = self.close_frame(pending, make_default)?;
            self.frames.push(frame);
        }

        // An fcTL ahead of all image data binds the IDAT group, which
        // then must cover the whole canvas.
        let from_idat = !self.seen_idat;
        if from_idat
            && (control.width != info.width
                || control.height != info.height
                || control.x_offset != 0
                || control.y_offset != 0)
        {
            return Err(ApngError::Format(
                "first frame must cover the canvas".into(),
            ));
        }

        self.num_fctl += 1;
        self.current = Some(self.open_frame(Some(control), from_idat)?);
        Ok(())
    }

    fn handle_idat(&mut self, data: &[u8]) -> Result<()> {
        if self.seen_fdat {
            return Err(ApngError::Format("IDAT after fdAT".into()));
        }
        if self.current.is_none() {
            if self.seen_idat {
                return Err(ApngError::Format("IDAT out of order".into()));
            }
            self.current = Some(self.open_frame(None, true)?);
        }

        let pending = self.current.as_mut().ok_or_else(|| {
            ApngError::Format("IDAT out of order".into())
        })?;
        if !pending.from_idat {
            return Err(ApngError::Format("IDAT out of order".into()));
        }
        let ignored = pending.inflater.feed(data)?;
        if ignored > 0 {
            tracing::debug!(
                "ignoring {} trailing IDAT bytes after image data stream end",
                ignored
            );
        }
        self.seen_idat = true;
        Ok(())
    }

    fn handle_fdat(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(ApngError::Format("invalid fdAT length".into()));
        }
        let sequence = BigEndian::read_u32(&data[0..4]);
        self.expect_sequence(sequence)?;

        let pending = self
            .current
            .as_mut()
            .ok_or_else(|| ApngError::Format("fdAT without fcTL".into()))?;
        if pending.from_idat {
            return Err(ApngError::Format(
                "fdAT for a frame carried by IDAT".into(),
            ));
        }
        let ignored = pending.inflater.feed(&data[4..])?;
        if ignored > 0 {
            tracing::debug!(
                "ignoring {} trailing fdAT bytes after image data stream end",
                ignored
            );
        }
        self.seen_fdat = true;
        Ok(())
    }

    fn open_frame(&self, control: Option<FrameControl>, from_idat: bool) -> Result<PendingFrame> {
        let info = self.info()?;
        let (width, height) = match &control {
            Some(c) => (c.width, c.height),
            None => (info.width, info.height),
        };
        let expected = info
            .raw_data_len(width, height)
            .ok_or_else(|| ApngError::Unsupported("dimension overflow".into()))?;
        Ok(PendingFrame {
            control,
            from_idat,
            width,
            height,
            inflater: Inflater::new(expected),
        })
    }

    fn close_frame(&self, pending: PendingFrame, make_default: bool) -> Result<Frame> {
        let info = self.info()?;
        let raw = pending.inflater.finish()?;
        let unfiltered = reconstruct(&raw, pending.width, pending.height, &info)?;
        let image = self.materialize(&unfiltered, pending.width, pending.height, &info)?;

        Ok(match pending.control {
            Some(control) => Frame {
                image,
                x_offset: control.x_offset,
                y_offset: control.y_offset,
                delay_num: control.delay_num,
                delay_den: control.delay_den,
                dispose_op: control.dispose_op,
                blend_op: control.blend_op,
                is_default: false,
            },
            None => Frame {
                image,
                x_offset: 0,
                y_offset: 0,
                delay_num: 0,
                delay_den: 0,
                dispose_op: Default::default(),
                blend_op: Default::default(),
                is_default: make_default,
            },
        })
    }

    fn finish(mut self) -> Result<Animation> {
        if let Some(pending) = self.current.take() {
            let frame = self.close_frame(pending, false)?;
            self.frames.push(frame);
        }
        if self.frames.is_empty() {
            return Err(ApngError::Format("missing image data".into()));
        }
        if let Some(actl) = self.actl {
            if self.num_fctl != actl.num_frames {
                return Err(ApngError::Format(format!(
                    "acTL declares {} frames, found {}",
                    actl.num_frames, self.num_fctl
                )));
            }
        }

        Ok(Animation {
            frames: self.frames,
            loop_count: self.actl.map_or(0, |a| a.num_plays),
        })
    }

    /// The pixel format a decode of this stream materializes.
    fn output_format(&self, info: &ImageInfo) -> PixelFormat {
        let trns = self.transparency.is_some();
        match (info.color_type, info.bit_depth) {
            (ColorType::Grayscale, 16) if trns => PixelFormat::Rgba16,
            (ColorType::Grayscale, 16) => PixelFormat::Gray16,
            (ColorType::Grayscale, _) if trns => PixelFormat::Rgba8,
            (ColorType::Grayscale, _) => PixelFormat::Gray8,
            (ColorType::GrayscaleAlpha, 16) => PixelFormat::Rgba16,
            (ColorType::GrayscaleAlpha, _) => PixelFormat::Rgba8,
            (ColorType::Rgb, 16) => PixelFormat::Rgba16,
            (ColorType::Rgb, _) => PixelFormat::Rgba8,
            (ColorType::Rgba, 16) => PixelFormat::Rgba16,
            (ColorType::Rgba, _) => PixelFormat::Rgba8,
            (ColorType::Indexed, _) => PixelFormat::Indexed8,
        }
    }

    /// Convert reconstructed scanlines into a typed pixel buffer.
    fn materialize(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        info: &ImageInfo,
    ) -> Result<Image> {
        match info.color_type {
            ColorType::Grayscale => self.materialize_gray(raw, width, height, info),
            ColorType::GrayscaleAlpha => materialize_gray_alpha(raw, width, height, info),
            ColorType::Rgb => self.materialize_rgb(raw, width, height, info),
            ColorType::Rgba => materialize_rgba(raw, width, height, info),
            ColorType::Indexed => self.materialize_indexed(raw, width, height, info),
        }
    }

    fn materialize_gray(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        info: &ImageInfo,
    ) -> Result<Image> {
        let key = self
            .transparency
            .as_ref()
            .map(|t| BigEndian::read_u16(&t[0..2]));

        if info.bit_depth == 16 {
            return match key {
                None => Image::from_data(width, height, PixelFormat::Gray16, raw.to_vec()),
                Some(key) => {
                    let mut data = Vec::with_capacity(raw.len() * 4);
                    for sample in raw.chunks_exact(2) {
                        let value = BigEndian::read_u16(sample);
                        let alpha: u16 = if value == key { 0 } else { 0xffff };
                        for _ in 0..3 {
                            data.extend_from_slice(sample);
                        }
                        data.extend_from_slice(&alpha.to_be_bytes());
                    }
                    Image::from_data(width, height, PixelFormat::Rgba16, data)
                }
            };
        }

        // Sub-byte samples are expanded; tRNS keys match the unscaled
        // sample value.
        let samples = unpack_samples(raw, width, height, info.bit_depth);
        let scale = sample_scale(info.bit_depth);
        match key {
            None => {
                let data = samples.iter().map(|&s| s * scale).collect();
                Image::from_data(width, height, PixelFormat::Gray8, data)
            }
            Some(key) => {
                let mut data = Vec::with_capacity(samples.len() * 4);
                for &sample in &samples {
                    let value = sample * scale;
                    let alpha = if sample as u16 == key { 0 } else { 0xff };
                    data.extend_from_slice(&[value, value, value, alpha]);
                }
                Image::from_data(width, height, PixelFormat::Rgba8, data)
            }
        }
    }

    fn materialize_rgb(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        info: &ImageInfo,
    ) -> Result<Image> {
        let key = self.transparency.as_ref().map(|t| {
            (
                BigEndian::read_u16(&t[0..2]),
                BigEndian::read_u16(&t[2..4]),
                BigEndian::read_u16(&t[4..6]),
            )
        });

        if info.bit_depth == 16 {
            let mut data = Vec::with_capacity(raw.len() / 6 * 8);
            for px in raw.chunks_exact(6) {
                let rgb = (
                    BigEndian::read_u16(&px[0..2]),
                    BigEndian::read_u16(&px[2..4]),
                    BigEndian::read_u16(&px[4..6]),
                );
                let alpha: u16 = if key == Some(rgb) { 0 } else { 0xffff };
                data.extend_from_slice(px);
                data.extend_from_slice(&alpha.to_be_bytes());
            }
            Image::from_data(width, height, PixelFormat::Rgba16, data)
        } else {
            let mut data = Vec::with_capacity(raw.len() / 3 * 4);
            for px in raw.chunks_exact(3) {
                let rgb = (px[0] as u16, px[1] as u16, px[2] as u16);
                let alpha = if key == Some(rgb) { 0 } else { 0xff };
                data.extend_from_slice(&[px[0], px[1], px[2], alpha]);
            }
            Image::from_data(width, height, PixelFormat::Rgba8, data)
        }
    }

    fn materialize_indexed(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        info: &ImageInfo,
    ) -> Result<Image> {
        let mut palette = self
            .palette
            .clone()
            .ok_or_else(|| ApngError::Format("missing PLTE".into()))?;
        if let Some(trns) = &self.transparency {
            for (entry, &alpha) in palette.iter_mut().zip(trns.iter()) {
                entry[3] = alpha;
            }
        }

        let indices = unpack_samples(raw, width, height, info.bit_depth);
        // Out-of-range indices resolve to opaque black, like the still
        // decoders this stays compatible with.
        if let Some(&max) = indices.iter().max() {
            while palette.len() <= max as usize {
                palette.push([0, 0, 0, 0xff]);
            }
        }

        let mut image = Image::from_data(width, height, PixelFormat::Indexed8, indices)?;
        image.set_palette(palette);
        Ok(image)
    }
}

fn materialize_gray_alpha(raw: &[u8], width: u32, height: u32, info: &ImageInfo) -> Result<Image> {
    if info.bit_depth == 16 {
        let mut data = Vec::with_capacity(raw.len() * 2);
        for px in raw.chunks_exact(4) {
            data.extend_from_slice(&px[0..2]);
            data.extend_from_slice(&px[0..2]);
            data.extend_from_slice(&px[0..2]);
            data.extend_from_slice(&px[2..4]);
        }
        Image::from_data(width, height, PixelFormat::Rgba16, data)
    } else {
        let mut data = Vec::with_capacity(raw.len() * 2);
        for px in raw.chunks_exact(2) {
            data.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
        }
        Image::from_data(width, height, PixelFormat::Rgba8, data)
    }
}

fn materialize_rgba(raw: &[u8], width: u32, height: u32, info: &ImageInfo) -> Result<Image> {
    let format = if info.bit_depth == 16 {
        PixelFormat::Rgba16
    } else {
        PixelFormat::Rgba8
    };
    Image::from_data(width, height, format, raw.to_vec())
}

/// Multiplier that expands a sub-byte sample to the full 8-bit range.
fn sample_scale(bit_depth: u8) -> u8 {
    match bit_depth {
        1 => 0xff,
        2 => 0x55,
        4 => 0x11,
        _ => 1,
    }
}

/// Unpack one sample per pixel from packed rows (bit depths 1/2/4/8).
fn unpack_samples(raw: &[u8], width: u32, height: u32, bit_depth: u8) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let depth = bit_depth as usize;
    if depth == 8 {
        return raw.to_vec();
    }

    let row_bytes = (width * depth).div_ceil(8);
    let mask = (1u16 << depth) as u8 - 1;
    let mut samples = Vec::with_capacity(width * height);
    for y in 0..height {
        let row = &raw[y * row_bytes..(y + 1) * row_bytes];
        for x in 0..width {
            let bit_pos = x * depth;
            let shift = 8 - depth - (bit_pos % 8);
            samples.push((row[bit_pos / 8] >> shift) & mask);
        }
    }
    samples
}

/// Reverse the scanline filters for one frame.
fn reconstruct(data: &[u8], width: u32, height: u32, info: &ImageInfo) -> Result<Vec<u8>> {
    match info.interlace {
        InterlaceMethod::None => {
            reconstruct_pass(data, width as usize, height as usize, info).map(|(rows, _)| rows)
        }
        InterlaceMethod::Adam7 => reconstruct_adam7(data, width, height, info),
    }
}

/// Un-filter one run of scanlines. Returns the rows and the number of
/// raw bytes consumed.
fn reconstruct_pass(
    data: &[u8],
    width: usize,
    height: usize,
    info: &ImageInfo,
) -> Result<(Vec<u8>, usize)> {
    let row_bytes = (width * info.bits_per_pixel()).div_ceil(8);
    let bpp = info.filter_bytes_per_pixel();

    let mut out = vec![0u8; height * row_bytes];
    let zero_row = vec![0u8; row_bytes];
    let mut pos = 0usize;

    for y in 0..height {
        if pos + 1 + row_bytes > data.len() {
            return Err(ApngError::Format("incomplete scanline".into()));
        }
        let filter_type = filter::parse_filter_byte(data[pos])?;
        pos += 1;

        let row_start = y * row_bytes;
        out[row_start..row_start + row_bytes].copy_from_slice(&data[pos..pos + row_bytes]);
        pos += row_bytes;

        let (done_rows, rest) = out.split_at_mut(row_start);
        let previous: &[u8] = if y > 0 {
            &done_rows[row_start - row_bytes..]
        } else {
            &zero_row
        };
        filter::unfilter_row(filter_type, &mut rest[..row_bytes], previous, bpp);
    }

    Ok((out, pos))
}

fn reconstruct_adam7(data: &[u8], width: u32, height: u32, info: &ImageInfo) -> Result<Vec<u8>> {
    let full_row_bytes = (width as usize * info.bits_per_pixel()).div_ceil(8);
    let mut out = vec![0u8; height as usize * full_row_bytes];
    let mut offset = 0usize;

    for &(start_x, start_y, step_x, step_y) in &ADAM7_PASSES {
        let (pass_w, pass_h) =
            adam7_pass_dimensions(width, height, start_x, start_y, step_x, step_y);
        if pass_w == 0 || pass_h == 0 {
            continue;
        }

        let (pass_rows, consumed) = reconstruct_pass(&data[offset..], pass_w, pass_h, info)?;
        offset += consumed;
        merge_adam7_pass(
            &mut out,
            full_row_bytes,
            &pass_rows,
            pass_w,
            pass_h,
            (start_x, start_y, step_x, step_y),
            info,
        );
    }

    Ok(out)
}

/// Scatter one interlace pass into the full-size raster.
fn merge_adam7_pass(
    out: &mut [u8],
    out_row_bytes: usize,
    pass: &[u8],
    pass_w: usize,
    pass_h: usize,
    (start_x, start_y, step_x, step_y): (usize, usize, usize, usize),
    info: &ImageInfo,
) {
    let bits = info.bits_per_pixel();
    let pass_row_bytes = (pass_w * bits).div_ceil(8);

    if bits >= 8 {
        let bpp = bits / 8;
        for py in 0..pass_h {
            let oy = start_y + py * step_y;
            for px in 0..pass_w {
                let ox = start_x + px * step_x;
                let src = py * pass_row_bytes + px * bpp;
                let dst = oy * out_row_bytes + ox * bpp;
                out[dst..dst + bpp].copy_from_slice(&pass[src..src + bpp]);
            }
        }
    } else {
        let mask = (1u16 << bits) as u8 - 1;
        for py in 0..pass_h {
            let oy = start_y + py * step_y;
            let src_row = &pass[py * pass_row_bytes..(py + 1) * pass_row_bytes];
            let dst_row = &mut out[oy * out_row_bytes..(oy + 1) * out_row_bytes];
            for px in 0..pass_w {
                let ox = start_x + px * step_x;
                let src_shift = 8 - bits - (px * bits % 8);
                let sample = (src_row[px * bits / 8] >> src_shift) & mask;
                let dst_shift = 8 - bits - (ox * bits % 8);
                let byte = &mut dst_row[ox * bits / 8];
                *byte = (*byte & !(mask << dst_shift)) | (sample << dst_shift);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{write_chunk, PNG_SIGNATURE};
    use crate::zlib;
    use flate2::Compression;
    use std::io::Cursor;

    fn build_ihdr(width: u32, height: u32, bit_depth: u8, color_type: u8) -> [u8; 13] {
        let mut ihdr = [0u8; 13];
        BigEndian::write_u32(&mut ihdr[0..4], width);
        BigEndian::write_u32(&mut ihdr[4..8], height);
        ihdr[8] = bit_depth;
        ihdr[9] = color_type;
        ihdr
    }

    /// A minimal still PNG: filter byte 0 ahead of each row.
    fn build_still_gray(width: u32, height: u32, rows: &[&[u8]]) -> Vec<u8> {
        let mut raw = Vec::new();
        for row in rows {
            raw.push(0);
            raw.extend_from_slice(row);
        }
        let compressed = zlib::compress(&raw, Compression::default()).unwrap();

        let mut png = Vec::new();
        png.extend_from_slice(&PNG_SIGNATURE);
        write_chunk(&mut png, ChunkType::IHDR, &build_ihdr(width, height, 8, 0)).unwrap();
        write_chunk(&mut png, ChunkType::IDAT, &compressed).unwrap();
        write_chunk(&mut png, ChunkType::IEND, &[]).unwrap();
        png
    }

    #[test]
    fn test_invalid_signature() {
        let err = decode(Cursor::new(vec![0u8; 16])).unwrap_err();
        assert!(matches!(err, ApngError::Format(_)));
    }

    #[test]
    fn test_still_gray_decode() {
        let png = build_still_gray(3, 2, &[&[1, 2, 3], &[4, 5, 6]]);
        let image = decode(Cursor::new(png)).unwrap();
        assert_eq!(image.format(), PixelFormat::Gray8);
        assert_eq!(image.data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_still_png_is_single_nondefault_frame() {
        let png = build_still_gray(1, 1, &[&[9]]);
        let animation = decode_all(Cursor::new(png)).unwrap();
        assert_eq!(animation.frames.len(), 1);
        assert!(!animation.frames[0].is_default);
        assert_eq!(animation.loop_count, 0);
    }

    #[test]
    fn test_config_does_not_touch_pixels() {
        let mut png = build_still_gray(2, 2, &[&[0, 0], &[0, 0]]);
        // Corrupt the IDAT payload; config must not care.
        let idat_at = 8 + 12 + 13 + 8 + 2;
        png[idat_at] ^= 0xff;
        let config = decode_config(Cursor::new(png)).unwrap();
        assert_eq!((config.width, config.height), (2, 2));
        assert_eq!(config.color_model, PixelFormat::Gray8);
    }

    #[test]
    fn test_unknown_critical_chunk() {
        let mut png = Vec::new();
        png.extend_from_slice(&PNG_SIGNATURE);
        write_chunk(&mut png, ChunkType::IHDR, &build_ihdr(1, 1, 8, 0)).unwrap();
        write_chunk(&mut png, ChunkType::new(*b"BoDY"), &[1, 2]).unwrap();
        let err = decode_all(Cursor::new(png)).unwrap_err();
        assert!(matches!(err, ApngError::Unsupported(_)));
    }

    #[test]
    fn test_unknown_ancillary_chunk_skipped() {
        let mut png = Vec::new();
        png.extend_from_slice(&PNG_SIGNATURE);
        write_chunk(&mut png, ChunkType::IHDR, &build_ihdr(1, 1, 8, 0)).unwrap();
        write_chunk(&mut png, ChunkType::new(*b"boDY"), &[1, 2]).unwrap();
        let raw = [0u8, 7u8];
        let compressed = zlib::compress(&raw, Compression::default()).unwrap();
        write_chunk(&mut png, ChunkType::IDAT, &compressed).unwrap();
        write_chunk(&mut png, ChunkType::IEND, &[]).unwrap();

        let image = decode(Cursor::new(png)).unwrap();
        assert_eq!(image.data(), &[7]);
    }

    #[test]
    fn test_adam7_pass_dimensions() {
        // An 8x8 image has a 1x1 first pass and a 4x4 seventh pass row set.
        assert_eq!(adam7_pass_dimensions(8, 8, 0, 0, 8, 8), (1, 1));
        assert_eq!(adam7_pass_dimensions(8, 8, 0, 1, 1, 2), (8, 4));
        // Tiny images skip late passes entirely.
        assert_eq!(adam7_pass_dimensions(1, 1, 4, 0, 8, 8), (0, 0));
    }

    #[test]
    fn test_interlaced_roundtrip_gray() {
        // 2x2 gray image, Adam7: passes 1 (top-left), 6 (top-right),
        // 7 (bottom row).
        let mut png = Vec::new();
        png.extend_from_slice(&PNG_SIGNATURE);
        let mut ihdr = build_ihdr(2, 2, 8, 0);
        ihdr[12] = 1;
        write_chunk(&mut png, ChunkType::IHDR, &ihdr).unwrap();

        // pass 1: pixel (0,0)=10; pass 6: (1,0)=20; pass 7: (0,1)=30,(1,1)=40
        let raw = [0u8, 10, 0, 20, 0, 30, 40];
        let compressed = zlib::compress(&raw, Compression::default()).unwrap();
        write_chunk(&mut png, ChunkType::IDAT, &compressed).unwrap();
        write_chunk(&mut png, ChunkType::IEND, &[]).unwrap();

        let image = decode(Cursor::new(png)).unwrap();
        assert_eq!(image.data(), &[10, 20, 30, 40]);
    }
}
