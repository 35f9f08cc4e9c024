//! Embedded JPEG stream support.
//!
//! PSD documents carry their preview as a baseline JPEG inside an image
//! resource. Entropy decoding is delegated to the `jpeg-decoder` crate;
//! this module converts its output into the viewer's B,G,R row-padded
//! layout and provides the two small helpers the viewer wants alongside
//! a thumbnail: a content hash for its cache and the COM-segment
//! comment.

use crate::error::alloc_bytes;
use crate::{padded_stride, DecodedImage, DecodeError, DecodeResult, ImageFormat};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Decodes a complete JPEG stream into a B,G,R (or grayscale) image.
///
/// Grayscale input stays single-channel; RGB and CMYK input is converted
/// to 3-channel B,G,R. Rows are padded to a 4-byte stride.
pub fn decode(stream: &[u8]) -> DecodeResult<DecodedImage> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(stream));
    let data = decoder
        .decode()
        .map_err(|e| DecodeError::malformed(format!("embedded JPEG: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::malformed("embedded JPEG: missing info"))?;

    let width = info.width as u32;
    let height = info.height as u32;
    if width == 0 || height == 0 {
        return Err(DecodeError::malformed("embedded JPEG: zero dimension"));
    }

    let (channels, bgr) = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => (1u32, data),
        jpeg_decoder::PixelFormat::L16 => {
            // High byte of each 16-bit luma sample.
            (1, data.chunks_exact(2).map(|l16| l16[0]).collect())
        }
        jpeg_decoder::PixelFormat::RGB24 => (
            3,
            data.chunks_exact(3)
                .flat_map(|rgb| [rgb[2], rgb[1], rgb[0]])
                .collect(),
        ),
        jpeg_decoder::PixelFormat::CMYK32 => (
            3,
            data.chunks_exact(4)
                .flat_map(|cmyk| {
                    let c = cmyk[0] as u32;
                    let m = cmyk[1] as u32;
                    let y = cmyk[2] as u32;
                    let k = cmyk[3] as u32;
                    let b = (255 - y) * (255 - k) / 255;
                    let g = (255 - m) * (255 - k) / 255;
                    let r = (255 - c) * (255 - k) / 255;
                    [b as u8, g as u8, r as u8]
                })
                .collect(),
        ),
    };

    let stride = padded_stride(width, channels);
    let row_bytes = width as usize * channels as usize;
    let size = stride
        .checked_mul(height as usize)
        .ok_or(DecodeError::AllocationFailed {
            requested: usize::MAX,
        })?;
    let mut pixels = alloc_bytes(size)?;
    for (dst, src) in pixels
        .chunks_exact_mut(stride)
        .zip(bgr.chunks_exact(row_bytes))
    {
        dst[..row_bytes].copy_from_slice(src);
    }

    Ok(DecodedImage {
        width,
        height,
        channels,
        stride,
        pixels,
        exif: None,
        format: ImageFormat::JpegEmbedded,
        jpeg_hash: Some(content_hash(stream)),
        jpeg_comment: comment(stream),
    })
}

/// Computes a stable 64-bit content hash of a JPEG stream.
///
/// The viewer keys its per-image database on this value.
pub fn content_hash(stream: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(stream);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

/// Extracts the first COM-segment comment of a JPEG stream, if any.
pub fn comment(stream: &[u8]) -> Option<String> {
    if stream.len() < 2 || stream[0] != 0xFF || stream[1] != 0xD8 {
        return None;
    }

    let mut pos = 2usize;
    while pos + 1 < stream.len() {
        if stream[pos] != 0xFF {
            pos += 1;
            continue;
        }
        while pos < stream.len() && stream[pos] == 0xFF {
            pos += 1;
        }
        if pos >= stream.len() {
            break;
        }

        let marker = stream[pos];
        pos += 1;

        // End of metadata: scan data or end of image.
        if marker == 0xD9 || marker == 0xDA {
            break;
        }
        // Standalone markers carry no length field.
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            continue;
        }

        if pos + 2 > stream.len() {
            break;
        }
        let seg_len = u16::from_be_bytes([stream[pos], stream[pos + 1]]) as usize;
        pos += 2;
        if seg_len < 2 || pos + seg_len - 2 > stream.len() {
            break;
        }

        if marker == 0xFE {
            let text = &stream[pos..pos + seg_len - 2];
            let comment = String::from_utf8_lossy(text)
                .trim_end_matches('\0')
                .to_string();
            if !comment.is_empty() {
                return Some(comment);
            }
        }
        pos += seg_len - 2;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"stream one");
        assert_eq!(a, content_hash(b"stream one"));
        assert_ne!(a, content_hash(b"stream two"));
    }

    #[test]
    fn test_comment_extraction() {
        // SOI, COM("hello"), EOI.
        let mut stream = vec![0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x07];
        stream.extend_from_slice(b"hello");
        stream.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(comment(&stream).as_deref(), Some("hello"));
    }

    #[test]
    fn test_comment_absent() {
        assert_eq!(comment(&[0xFF, 0xD8, 0xFF, 0xD9]), None);
        assert_eq!(comment(b"not a jpeg"), None);
    }

    #[test]
    fn test_comment_stops_at_scan_data() {
        // A COM after SOS must not be picked up.
        let mut stream = vec![0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02];
        stream.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x05, b'n', b'o', b'p']);
        assert_eq!(comment(&stream), None);
    }

    #[test]
    fn test_truncated_segment_is_ignored() {
        // COM claims 100 bytes but the stream ends early.
        let stream = [0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x64, b'x'];
        assert_eq!(comment(&stream), None);
    }
}
