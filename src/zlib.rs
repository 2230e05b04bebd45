//! Streaming zlib decompression and compression for image data.
//!
//! IDAT and fdAT payloads are arbitrary slices of one logical zlib stream
//! per frame. The [`Inflater`] feeds every slice into a single
//! `flate2::Decompress` instance instead of materializing the
//! concatenation, and reports end-of-stream so trailing data chunks can
//! be tolerated.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::{ApngError, Result};

/// Output growth step while inflating.
const OUT_CHUNK: usize = 32 * 1024;

/// Incremental zlib decompressor for one frame's data chunks.
pub struct Inflater {
    stream: Decompress,
    out: Vec<u8>,
    expected: usize,
    done: bool,
}

impl Inflater {
    /// Create an inflater for a stream expected to decompress to exactly
    /// `expected` bytes.
    pub fn new(expected: usize) -> Self {
        Self {
            stream: Decompress::new(true),
            out: Vec::new(),
            expected,
            done: false,
        }
    }

    /// Whether the zlib stream has terminated.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one data-chunk payload. Returns the number of trailing bytes
    /// that were ignored because the stream had already ended.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<usize> {
        while !data.is_empty() {
            if self.done {
                return Ok(data.len());
            }
            self.grow_output();

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .decompress_vec(data, &mut self.out, FlushDecompress::None)
                .map_err(|err| ApngError::Format(format!("corrupt zlib stream: {err}")))?;
            let consumed = (self.stream.total_in() - before_in) as usize;
            data = &data[consumed..];

            if self.out.len() > self.expected {
                return Err(ApngError::Format("too much image data".into()));
            }
            if status == Status::StreamEnd {
                self.done = true;
            } else if consumed == 0 && self.stream.total_out() == before_out {
                // No forward progress without more input.
                break;
            }
        }
        Ok(0)
    }

    /// Terminate the stream and take the decompressed bytes. Fails when
    /// the data chunks ran out before the zlib stream ended.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        while !self.done {
            self.grow_output();
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .decompress_vec(&[], &mut self.out, FlushDecompress::Finish)
                .map_err(|err| ApngError::Format(format!("corrupt zlib stream: {err}")))?;

            if self.out.len() > self.expected {
                return Err(ApngError::Format("too much image data".into()));
            }
            if status == Status::StreamEnd {
                self.done = true;
            } else if self.stream.total_out() == before_out {
                return Err(ApngError::Format("unexpected EOF in image data".into()));
            }
        }
        Ok(self.out)
    }

    /// Keep spare output capacity available, bounded just past the
    /// expected size so an oversized stream fails instead of allocating
    /// without limit.
    fn grow_output(&mut self) {
        if self.out.len() == self.out.capacity() {
            let target = self
                .out
                .len()
                .saturating_add(OUT_CHUNK)
                .min(self.expected.saturating_add(1))
                .max(self.out.len() + 1);
            self.out.reserve_exact(target - self.out.len());
        }
    }
}

/// Compress a frame's filtered scanlines into one zlib stream.
pub fn compress(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_single_feed() {
        let raw: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let compressed = compress(&raw, Compression::default()).unwrap();

        let mut inflater = Inflater::new(raw.len());
        assert_eq!(inflater.feed(&compressed).unwrap(), 0);
        assert!(inflater.is_done());
        assert_eq!(inflater.finish().unwrap(), raw);
    }

    #[test]
    fn test_roundtrip_byte_at_a_time() {
        let raw = vec![0x5au8; 1000];
        let compressed = compress(&raw, Compression::best()).unwrap();

        let mut inflater = Inflater::new(raw.len());
        for byte in &compressed {
            inflater.feed(std::slice::from_ref(byte)).unwrap();
        }
        assert_eq!(inflater.finish().unwrap(), raw);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let raw = b"scanline".to_vec();
        let mut compressed = compress(&raw, Compression::fast()).unwrap();
        compressed.extend_from_slice(&[1, 2, 3, 4]);

        let mut inflater = Inflater::new(raw.len());
        assert_eq!(inflater.feed(&compressed).unwrap(), 4);
        assert_eq!(inflater.finish().unwrap(), raw);
    }

    #[test]
    fn test_oversized_stream_rejected() {
        let raw = vec![7u8; 64];
        let compressed = compress(&raw, Compression::default()).unwrap();

        let mut inflater = Inflater::new(10);
        let err = inflater.feed(&compressed).unwrap_err();
        assert!(matches!(err, ApngError::Format(_)));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let raw = vec![9u8; 256];
        let compressed = compress(&raw, Compression::default()).unwrap();

        let mut inflater = Inflater::new(raw.len());
        inflater.feed(&compressed[..compressed.len() - 5]).unwrap();
        assert!(!inflater.is_done());
        let err = inflater.finish().unwrap_err();
        assert!(matches!(err, ApngError::Format(_)));
    }
}
