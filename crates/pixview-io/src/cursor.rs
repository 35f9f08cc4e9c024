//! Checked byte-level reads over a file or an in-memory buffer.
//!
//! Both decoders parse through [`ByteCursor`]: the PSD reader over a
//! buffered file handle, the EXIF reader over the caller's APP1 byte
//! slice. The cursor never short-reads silently; every read past the end
//! of the source surfaces as [`DecodeError::Truncated`].
//!
//! Multi-byte integers honor the cursor's [`Endian`] attribute. PSD is
//! big-endian throughout; EXIF selects the order per file from the TIFF
//! header marker and flips the attribute once.

use crate::error::{DecodeError, DecodeResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};

/// Byte order for multi-byte integer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least-significant byte first ("II" TIFF files).
    Little,
    /// Most-significant byte first ("MM" TIFF files, all of PSD).
    Big,
}

/// A random-access reader with explicit endianness.
#[derive(Debug)]
pub struct ByteCursor<R> {
    inner: R,
    endian: Endian,
}

impl<'a> ByteCursor<Cursor<&'a [u8]>> {
    /// Creates a big-endian cursor over an in-memory buffer.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(Cursor::new(data))
    }
}

impl ByteCursor<BufReader<File>> {
    /// Creates a big-endian cursor over an open file.
    pub fn from_file(file: File) -> Self {
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> ByteCursor<R> {
    /// Creates a big-endian cursor over any seekable reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            endian: Endian::Big,
        }
    }

    /// Returns the current byte order.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Switches the byte order for subsequent integer reads.
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Fills `dst` completely or fails with [`DecodeError::Truncated`].
    pub fn read_exact(&mut self, dst: &mut [u8]) -> DecodeResult<()> {
        self.inner.read_exact(dst).map_err(DecodeError::from)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a 16-bit unsigned integer in the cursor's byte order.
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u16(&buf),
            Endian::Little => LittleEndian::read_u16(&buf),
        })
    }

    /// Reads a 16-bit signed integer in the cursor's byte order.
    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a 32-bit unsigned integer in the cursor's byte order.
    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u32(&buf),
            Endian::Little => LittleEndian::read_u32(&buf),
        })
    }

    /// Reads a 64-bit unsigned integer in the cursor's byte order.
    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u64(&buf),
            Endian::Little => LittleEndian::read_u64(&buf),
        })
    }

    /// Moves to an absolute offset from the start of the source.
    pub fn seek_from_start(&mut self, offset: u64) -> DecodeResult<u64> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|_| DecodeError::Truncated)
    }

    /// Moves by a signed offset from the current position.
    pub fn seek_relative(&mut self, offset: i64) -> DecodeResult<u64> {
        self.inner
            .seek(SeekFrom::Current(offset))
            .map_err(|_| DecodeError::Truncated)
    }

    /// Returns the current position in the source.
    pub fn tell(&mut self) -> DecodeResult<u64> {
        self.inner.stream_position().map_err(DecodeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_reads() {
        let data = [0x12u8, 0x34, 0x56, 0x78];
        let mut cur = ByteCursor::from_slice(&data);
        assert_eq!(cur.read_u16().unwrap(), 0x1234);

        cur.seek_from_start(0).unwrap();
        cur.set_endian(Endian::Little);
        assert_eq!(cur.read_u32().unwrap(), 0x78563412);
    }

    #[test]
    fn test_u64_and_u8() {
        let data = [1u8, 0, 0, 0, 0, 0, 0, 0, 0xAB];
        let mut cur = ByteCursor::from_slice(&data);
        assert_eq!(cur.read_u64().unwrap(), 0x0100_0000_0000_0000);
        assert_eq!(cur.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn test_short_read_is_truncated() {
        let data = [0u8; 3];
        let mut cur = ByteCursor::from_slice(&data);
        assert!(matches!(cur.read_u32(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_seek_and_tell() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let mut cur = ByteCursor::from_slice(&data);
        cur.seek_from_start(4).unwrap();
        assert_eq!(cur.tell().unwrap(), 4);
        assert_eq!(cur.read_u8().unwrap(), 4);

        cur.seek_relative(-3).unwrap();
        assert_eq!(cur.read_u8().unwrap(), 2);
    }

    #[test]
    fn test_negative_seek_before_start_fails() {
        let data = [0u8; 4];
        let mut cur = ByteCursor::from_slice(&data);
        assert!(cur.seek_relative(-1).is_err());
    }
}
