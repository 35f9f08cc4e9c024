//! # pixview-io
//!
//! Binary image decoders for the pixview desktop image viewer:
//!
//! - **EXIF** — a TIFF-in-APP1 metadata reader ([`ExifRecord`]) that
//!   extracts camera, exposure, GPS, orientation and embedded-thumbnail
//!   information from JPEG-family images, and can rewrite a few fields
//!   of the original APP1 bytes in place (orientation, thumbnail
//!   replacement, thumbnail deletion).
//! - **PSD/PSB** — a reader for Adobe Photoshop documents
//!   ([`psd::PsdReader`]) that decodes the header, the image-resources
//!   block (ICC profile, EXIF, embedded JPEG thumbnail, alpha
//!   identifiers, version info) and reconstructs a full-size 8-bit
//!   interleaved pixel buffer from 1/8/16-bit planar channel data under
//!   no compression or PackBits RLE.
//!
//! # Architecture
//!
//! Both decoders parse through [`cursor::ByteCursor`], a checked
//! random-access view over either a file or a memory buffer with
//! explicit endianness. Decoded pixels land in a [`DecodedImage`] whose
//! rows are padded to a 4-byte stride, the layout the viewer blits
//! directly. Color management (Lab and embedded-profile conversion to
//! sRGB) is delegated to the `pixview-icc` crate; embedded JPEG
//! thumbnails are decoded with the `jpeg-decoder` crate.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pixview_io::psd::PsdReader;
//! use pixview_io::{ExifRecord, FormatReader, ImageFormat};
//!
//! let image = PsdReader::new().read("artwork.psd")?;
//! println!("{}x{}, {} channels", image.width, image.height, image.channels);
//!
//! if let Some(app1) = &image.exif {
//!     let record = ExifRecord::parse(app1, ImageFormat::Psd)?;
//!     if let Some(model) = record.camera_model() {
//!         println!("shot on {model}");
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! Every decode either returns a complete image or a [`DecodeError`];
//! partial buffers never escape. [`DecodeError::is_out_of_memory`]
//! distinguishes resource exhaustion (the viewer offers a downsampled
//! retry) from malformed input. EXIF parsing is softer still: the record
//! is returned with unparseable fields absent.

#![warn(missing_docs)]

mod composite;
mod error;

pub mod cursor;
pub mod exif;
pub mod jpeg;
pub mod psd;

mod traits;

pub use composite::{blend_background, blend_rows};
pub use error::{DecodeError, DecodeResult};
pub use exif::ExifRecord;
pub use traits::FormatReader;

pub(crate) use error::alloc_bytes;

/// Source format of a decoded image or metadata block.
///
/// For EXIF parsing the format states whether the APP1 marker and size
/// bytes are genuine (JPEG) or a synthetic wrapper built around metadata
/// extracted from another container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Baseline or progressive JPEG.
    Jpeg,
    /// JPEG stream embedded inside another container.
    JpegEmbedded,
    /// Camera RAW-derived metadata.
    Raw,
    /// PNG-derived metadata.
    Png,
    /// WebP-derived metadata.
    Webp,
    /// Adobe Photoshop document.
    Psd,
}

/// Rounds a row of `width * channels` bytes up to a 4-byte stride.
#[inline]
pub fn padded_stride(width: u32, channels: u32) -> usize {
    ((width as usize * channels as usize) + 3) & !3
}

/// A decoded image ready for display.
///
/// Pixels are 8-bit interleaved, B,G,R[,A] for color images (C,M,Y,K
/// for CMYK documents, which the viewer converts later), with each row
/// padded to [`padded_stride`] bytes.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel: 1, 3 or 4.
    pub channels: u32,
    /// Bytes per row, always `padded_stride(width, channels)`.
    pub stride: usize,
    /// Interleaved pixel data, `stride * height` bytes.
    pub pixels: Vec<u8>,
    /// Embedded EXIF metadata as a complete APP1 segment, if present.
    pub exif: Option<Vec<u8>>,
    /// Where the image came from.
    pub format: ImageFormat,
    /// Content hash of the source JPEG stream (embedded thumbnails).
    pub jpeg_hash: Option<u64>,
    /// COM-segment comment of the source JPEG stream (embedded thumbnails).
    pub jpeg_comment: Option<String>,
}

impl DecodedImage {
    /// Allocates a zero-filled image with the canonical stride.
    ///
    /// Allocation failure is reported as
    /// [`DecodeError::AllocationFailed`] rather than aborting, so a
    /// decode of an oversized file degrades into a recoverable error.
    pub fn allocate(
        width: u32,
        height: u32,
        channels: u32,
        format: ImageFormat,
    ) -> DecodeResult<Self> {
        let stride = padded_stride(width, channels);
        let size = stride
            .checked_mul(height as usize)
            .ok_or(DecodeError::AllocationFailed {
                requested: usize::MAX,
            })?;
        let pixels = alloc_bytes(size)?;

        Ok(Self {
            width,
            height,
            channels,
            stride,
            pixels,
            exif: None,
            format,
            jpeg_hash: None,
            jpeg_comment: None,
        })
    }

    /// Returns the pixel bytes of row `y`, padding included.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.pixels[start..start + self.stride]
    }

    /// Returns the channel bytes of the pixel at (`x`, `y`).
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = y as usize * self.stride + x as usize * self.channels as usize;
        &self.pixels[start..start + self.channels as usize]
    }
}
