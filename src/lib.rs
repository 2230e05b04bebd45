//! # apng-codec
//!
//! An APNG (Animated PNG) codec: decodes a PNG/APNG byte stream into an
//! in-memory animation and serializes an animation back to a stream
//! that conforming APNG decoders and still-PNG decoders both accept.
//!
//! ## Features
//!
//! - Chunk-level framing with CRC-32 validation
//! - Full scanline reconstruction (all five PNG row filters)
//! - Grayscale, RGB, RGBA, and paletted pixel formats at every PNG bit
//!   depth, with tRNS transparency applied
//! - APNG sequencing: acTL/fcTL/fdAT, default-image detection, strict
//!   sequence-number checking
//! - Adam7 interlacing on the still-image path
//! - Symmetric encoder with per-row adaptive filtering and configurable
//!   compression level and chunk size
//!
//! ## Decoding Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let file = File::open("animation.png").unwrap();
//! let animation = apng_codec::decode_all(BufReader::new(file)).unwrap();
//! for frame in &animation.frames {
//!     println!(
//!         "{}x{} at ({}, {}), delay {}/{}",
//!         frame.width(),
//!         frame.height(),
//!         frame.x_offset,
//!         frame.y_offset,
//!         frame.delay_num,
//!         frame.delay_den,
//!     );
//! }
//! ```
//!
//! ## Encoding Example
//!
//! ```rust,no_run
//! use apng_codec::{Animation, BlendOp, DisposeOp, Frame, Image, PixelFormat};
//!
//! let frame = Frame {
//!     image: Image::new(64, 64, PixelFormat::Rgba8).unwrap(),
//!     x_offset: 0,
//!     y_offset: 0,
//!     delay_num: 1,
//!     delay_den: 10,
//!     dispose_op: DisposeOp::None,
//!     blend_op: BlendOp::Source,
//!     is_default: false,
//! };
//! let animation = Animation { frames: vec![frame], loop_count: 0 };
//!
//! let mut output = Vec::new();
//! apng_codec::encode(&mut output, &animation).unwrap();
//! ```

pub mod animation;
pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod image;
mod filter;
mod zlib;

pub use animation::{Animation, AnimationControl, BlendOp, Config, DisposeOp, Frame, FrameControl};
pub use decoder::{decode, decode_all, decode_config};
pub use encoder::{encode, CompressionLevel, Encoder, EncoderConfig, FilterStrategy};
pub use error::{ApngError, Result};
pub use image::{ColorType, Image, InterlaceMethod, PixelFormat};
