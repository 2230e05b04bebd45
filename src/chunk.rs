//! PNG chunk framing: signature, chunk types, CRC-32, and the chunk
//! envelope (4-byte big-endian length, 4-byte type, payload, 4-byte CRC
//! over type and payload).

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ApngError, Result};

/// PNG signature bytes.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest chunk length a conforming stream may declare.
const MAX_CHUNK_LENGTH: u32 = (1 << 31) - 1;

/// PNG chunk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    /// IHDR - Image header.
    pub const IHDR: Self = Self(*b"IHDR");
    /// PLTE - Palette.
    pub const PLTE: Self = Self(*b"PLTE");
    /// IDAT - Image data.
    pub const IDAT: Self = Self(*b"IDAT");
    /// IEND - Image end.
    pub const IEND: Self = Self(*b"IEND");
    /// tRNS - Transparency.
    pub const TRNS: Self = Self(*b"tRNS");
    /// acTL - Animation control.
    pub const ACTL: Self = Self(*b"acTL");
    /// fcTL - Frame control.
    pub const FCTL: Self = Self(*b"fcTL");
    /// fdAT - Frame data.
    pub const FDAT: Self = Self(*b"fdAT");

    /// Create from bytes.
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get bytes.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Check if chunk is critical (bit 5 of the first byte clear).
    pub fn is_critical(&self) -> bool {
        (self.0[0] & 0x20) == 0
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// CRC32 lookup table, IEEE-802.3 reflected polynomial.
const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            if c & 1 != 0 {
                c = 0xEDB88320 ^ (c >> 1);
            } else {
                c >>= 1;
            }
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
};

/// Calculate CRC32 for PNG chunks.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0xFFFFFFFF, data) ^ 0xFFFFFFFF
}

/// Feed bytes into a running CRC32. Start from `0xFFFFFFFF` and XOR the
/// final value with `0xFFFFFFFF`.
fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC_TABLE[idx] ^ (crc >> 8);
    }
    crc
}

/// A chunk read off the wire, CRC already verified.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Chunk payload.
    pub data: Vec<u8>,
}

/// Read and verify the PNG signature.
pub fn read_signature<R: Read>(reader: &mut R) -> Result<()> {
    let mut signature = [0u8; 8];
    read_exact(reader, &mut signature)?;
    if signature != PNG_SIGNATURE {
        return Err(ApngError::Format("invalid PNG signature".into()));
    }
    Ok(())
}

/// Read a chunk's declared length and type, leaving the payload and
/// CRC trailer unread.
pub fn read_chunk_header<R: Read>(reader: &mut R) -> Result<(u32, ChunkType)> {
    let length = reader.read_u32::<BigEndian>().map_err(map_eof)?;
    if length > MAX_CHUNK_LENGTH {
        return Err(ApngError::Format(format!(
            "chunk length {length} out of range"
        )));
    }

    let mut type_bytes = [0u8; 4];
    read_exact(reader, &mut type_bytes)?;
    Ok((length, ChunkType::new(type_bytes)))
}

/// Read a chunk's payload and verify the CRC trailer, given the header
/// already consumed by [`read_chunk_header`].
pub fn read_chunk_data<R: Read>(
    reader: &mut R,
    chunk_type: ChunkType,
    length: u32,
) -> Result<Vec<u8>> {
    let mut data = vec![0u8; length as usize];
    read_exact(reader, &mut data)?;

    let declared_crc = reader.read_u32::<BigEndian>().map_err(map_eof)?;
    let mut crc = crc32_update(0xFFFFFFFF, chunk_type.as_bytes());
    crc = crc32_update(crc, &data) ^ 0xFFFFFFFF;
    if crc != declared_crc {
        return Err(ApngError::Format(format!(
            "CRC mismatch for chunk {chunk_type}"
        )));
    }

    Ok(data)
}

/// Read the next chunk: length, type, payload, CRC trailer.
pub fn read_chunk<R: Read>(reader: &mut R) -> Result<RawChunk> {
    let (length, chunk_type) = read_chunk_header(reader)?;
    let data = read_chunk_data(reader, chunk_type, length)?;
    Ok(RawChunk { chunk_type, data })
}

/// Write one chunk: length, type, payload, CRC trailer.
pub fn write_chunk<W: Write>(writer: &mut W, chunk_type: ChunkType, data: &[u8]) -> Result<()> {
    writer.write_u32::<BigEndian>(data.len() as u32)?;
    writer.write_all(chunk_type.as_bytes())?;
    writer.write_all(data)?;

    let mut crc = crc32_update(0xFFFFFFFF, chunk_type.as_bytes());
    crc = crc32_update(crc, data) ^ 0xFFFFFFFF;
    writer.write_u32::<BigEndian>(crc)?;
    Ok(())
}

/// A source closed mid-chunk is a malformed stream, not an I/O failure.
fn map_eof(err: io::Error) -> ApngError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ApngError::Format("unexpected EOF".into())
    } else {
        ApngError::Io(err)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(map_eof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_chunk_type() {
        assert!(ChunkType::IHDR.is_critical());
        assert!(ChunkType::IDAT.is_critical());
        assert!(!ChunkType::ACTL.is_critical());
        assert!(!ChunkType::FCTL.is_critical());
        assert!(!ChunkType::TRNS.is_critical());

        assert_eq!(format!("{}", ChunkType::FDAT), "fdAT");
    }

    #[test]
    fn test_crc32_iend() {
        // The CRC of an empty IEND chunk is a well-known constant.
        assert_eq!(crc32(b"IEND"), 0xAE426082);
    }

    #[test]
    fn test_chunk_roundtrip() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, ChunkType::TRNS, &[0x7f, 0x80]).unwrap();

        let chunk = read_chunk(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(chunk.chunk_type, ChunkType::TRNS);
        assert_eq!(chunk.data, vec![0x7f, 0x80]);
    }

    #[test]
    fn test_corrupted_crc() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, ChunkType::IDAT, &[1, 2, 3]).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        let err = read_chunk(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ApngError::Format(_)));
    }

    #[test]
    fn test_oversized_length() {
        let buf = [0xff, 0xff, 0xff, 0xff, b'f', b'o', b'o', b'B'];
        let err = read_chunk(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ApngError::Format(_)));
    }

    #[test]
    fn test_truncated_chunk() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, ChunkType::IDAT, &[1, 2, 3]).unwrap();
        buf.truncate(buf.len() - 6);

        let err = read_chunk(&mut Cursor::new(&buf)).unwrap_err();
        match err {
            ApngError::Format(msg) => assert!(msg.contains("unexpected EOF")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
