//! Adobe Photoshop PSD/PSB document support.
//!
//! Decodes the merged (composite) image of a Photoshop document into
//! the viewer's 8-bit interleaved layout, and extracts the metadata the
//! viewer cares about from the image-resources block: an embedded ICC
//! profile, EXIF data, alpha-channel identifiers and the embedded JPEG
//! preview.
//!
//! # Format notes
//!
//! A PSD file is header / color-mode data / image resources /
//! layer-and-mask info / merged image data. Channel data is planar,
//! 1, 8 or 16 bits per sample, stored raw or PackBits-compressed with a
//! per-scanline byte-count table in front of the streams. PSB ("big")
//! documents widen the layer-section and RLE-table fields. ZIP-compressed
//! documents are rejected.
//!
//! # Example
//!
//! ```rust,ignore
//! use pixview_io::psd::PsdReader;
//! use pixview_io::FormatReader;
//!
//! let reader = PsdReader::new();
//! let image = reader.read("artwork.psd")?;
//! let thumb = reader.read_thumbnail("artwork.psd")?;
//! ```

use crate::composite::blend_rows;
use crate::cursor::ByteCursor;
use crate::error::{alloc_bytes, DecodeError, DecodeResult};
use crate::traits::FormatReader;
use crate::{jpeg, DecodedImage, ImageFormat};
use pixview_icc::{PixelLayout, SrgbTransform};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

/// "8BPS" file signature.
const PSD_SIGNATURE: u32 = 0x3842_5053;
/// "8BIM" image-resource signature.
const RESOURCE_SIGNATURE: u32 = 0x3842_494D;

const RES_THUMBNAIL_4: u16 = 0x0409;
const RES_THUMBNAIL_5: u16 = 0x040C;
const RES_ICC_PROFILE: u16 = 0x040F;
const RES_ALPHA_IDENTIFIERS: u16 = 0x041D;
const RES_VERSION_INFO: u16 = 0x0421;
const RES_EXIF_DATA_1: u16 = 0x0422;
const RES_EXIF_DATA_3: u16 = 0x0423;

/// Fixed header size: signature, version, reserved, channels,
/// dimensions, depth, color mode.
const PSD_HEADER_SIZE: u64 = 26;
/// Fixed part of a thumbnail resource before its JPEG stream.
const THUMBNAIL_HEADER_SIZE: usize = 28;

/// Largest PSD/PSB file the viewer will open.
pub const MAX_PSD_FILE_SIZE: u64 = 1 << 30;
/// Largest embedded JPEG stream the viewer will decode.
pub const MAX_JPEG_FILE_SIZE: u64 = 256 << 20;
/// Largest per-side dimension of a decodable document.
pub const MAX_IMAGE_DIMENSION: u32 = 30_000;
/// Largest total pixel count of a decodable document.
pub const MAX_IMAGE_PIXELS: u64 = 1 << 28;

/// Photoshop color modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// 1-bit bitmap.
    Bitmap,
    /// Grayscale.
    Grayscale,
    /// Indexed color (not decodable here).
    Indexed,
    /// RGB.
    Rgb,
    /// CMYK.
    Cmyk,
    /// Multichannel.
    Multichannel,
    /// Duotone, treated as grayscale.
    Duotone,
    /// CIELAB.
    Lab,
}

impl ColorMode {
    fn from_u16(value: u16) -> DecodeResult<Self> {
        Ok(match value {
            0 => Self::Bitmap,
            1 => Self::Grayscale,
            2 => Self::Indexed,
            3 => Self::Rgb,
            4 => Self::Cmyk,
            7 => Self::Multichannel,
            8 => Self::Duotone,
            9 => Self::Lab,
            other => {
                return Err(DecodeError::malformed(format!("color mode {other}")));
            }
        })
    }
}

/// Merged-image compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Rle,
}

impl Compression {
    fn from_u16(value: u16) -> DecodeResult<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Rle),
            2 | 3 => Err(DecodeError::unsupported("ZIP-compressed image data")),
            other => Err(DecodeError::malformed(format!("compression method {other}"))),
        }
    }
}

/// Parsed and validated PSD file header.
#[derive(Debug, Clone)]
pub struct PsdHeader {
    /// 1 for PSD, 2 for PSB.
    pub version: u16,
    /// Channel count as stored on disk.
    pub channels: u16,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per sample: 1, 8 or 16.
    pub depth: u16,
    /// Document color mode.
    pub color_mode: ColorMode,
}

impl PsdHeader {
    fn read<R: Read + Seek>(cur: &mut ByteCursor<R>) -> DecodeResult<Self> {
        if cur.read_u32()? != PSD_SIGNATURE {
            return Err(DecodeError::malformed("bad PSD signature"));
        }
        let version = cur.read_u16()?;
        if version != 1 && version != 2 {
            return Err(DecodeError::malformed(format!("PSD version {version}")));
        }
        let mut reserved = [0u8; 6];
        cur.read_exact(&mut reserved)?;
        if reserved != [0u8; 6] {
            return Err(DecodeError::malformed("reserved header bytes not zero"));
        }
        let channels = cur.read_u16()?;
        let height = cur.read_u32()?;
        let width = cur.read_u32()?;
        if width as u64 * height as u64 > MAX_IMAGE_PIXELS {
            return Err(DecodeError::ResourceLimit {
                what: "pixel count",
                limit: MAX_IMAGE_PIXELS,
            });
        }
        if width.max(height) > MAX_IMAGE_DIMENSION || width.min(height) == 0 {
            return Err(DecodeError::malformed(format!(
                "image dimensions {width}x{height}"
            )));
        }
        let depth = cur.read_u16()?;
        if depth != 1 && depth != 8 && depth != 16 {
            return Err(DecodeError::unsupported(format!("bit depth {depth}")));
        }
        let color_mode = ColorMode::from_u16(cur.read_u16()?)?;

        Ok(Self {
            version,
            channels,
            width,
            height,
            depth,
            color_mode,
        })
    }

    /// Number of channels the decoded image will carry.
    ///
    /// Bitmap documents and 1-bit depth collapse to a single channel;
    /// otherwise the color mode bounds how many of the on-disk channels
    /// are meaningful. Two channels (gray + alpha) collapse to one.
    fn output_channels(&self) -> DecodeResult<u32> {
        let mut channels: u32 = if self.depth == 1 || self.color_mode == ColorMode::Bitmap {
            1
        } else {
            match self.color_mode {
                ColorMode::Grayscale | ColorMode::Duotone => self.channels.min(1) as u32,
                ColorMode::Multichannel => self.channels.min(3) as u32,
                ColorMode::Lab | ColorMode::Rgb | ColorMode::Cmyk => self.channels.min(4) as u32,
                ColorMode::Bitmap | ColorMode::Indexed => 0,
            }
        };
        if channels == 2 {
            channels = 1;
        }
        if channels != 1 && channels != 3 && channels != 4 {
            return Err(DecodeError::unsupported(format!(
                "{:?} with {} channels",
                self.color_mode, self.channels
            )));
        }
        Ok(channels)
    }
}

/// Options for reading PSD documents.
#[derive(Debug, Clone)]
pub struct PsdReaderOptions {
    /// Background color (`0x00RRGGBB`) that transparent pixels are
    /// composited against. CMYK documents always composite over black.
    pub transparency_color: u32,
}

impl Default for PsdReaderOptions {
    fn default() -> Self {
        Self {
            transparency_color: 0x00FF_FFFF,
        }
    }
}

/// Photoshop document reader.
///
/// Produces the merged image in B,G,R[,A] byte order (C,M,Y,K for CMYK
/// documents) with rows padded to a 4-byte stride, plus the embedded
/// EXIF block when the document carries one.
#[derive(Debug, Clone, Default)]
pub struct PsdReader {
    options: PsdReaderOptions,
}

impl PsdReader {
    /// Creates a reader with default options.
    pub fn new() -> Self {
        Self::with_options(PsdReaderOptions::default())
    }

    /// Reads the embedded JPEG preview of a document.
    ///
    /// Photoshop 4.0 (0x0409) and 5.0 (0x040C) thumbnail resources are
    /// recognized, the 5.0 resource superseding the 4.0 one. The
    /// returned image carries the preview's EXIF block, content hash and
    /// COM comment.
    pub fn read_thumbnail<P: AsRef<Path>>(&self, path: P) -> DecodeResult<DecodedImage> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        if size > MAX_PSD_FILE_SIZE {
            return Err(DecodeError::ResourceLimit {
                what: "file size",
                limit: MAX_PSD_FILE_SIZE,
            });
        }
        let mut cur = ByteCursor::from_file(file);
        self.read_thumb_impl(&mut cur)
    }

    /// Reads the embedded JPEG preview from a complete document in memory.
    pub fn read_thumbnail_from_memory(&self, data: &[u8]) -> DecodeResult<DecodedImage> {
        if data.len() as u64 > MAX_PSD_FILE_SIZE {
            return Err(DecodeError::ResourceLimit {
                what: "file size",
                limit: MAX_PSD_FILE_SIZE,
            });
        }
        let mut cur = ByteCursor::from_slice(data);
        self.read_thumb_impl(&mut cur)
    }

    fn read_image_impl<R: Read + Seek>(
        &self,
        cur: &mut ByteCursor<R>,
        file_size: u64,
    ) -> DecodeResult<DecodedImage> {
        let header = PsdHeader::read(cur)?;
        let mut out_channels = header.output_channels()?;

        let color_data_size = cur.read_u32()?;
        cur.seek_relative(color_data_size as i64)?;

        let resource_section_size = cur.read_u32()?;
        let resources_start = cur.tell()?;
        let mut use_alpha = out_channels == 4;
        let (exif, icc_profile) = scan_image_resources(
            cur,
            resources_start + resource_section_size as u64,
            header.color_mode,
            &mut use_alpha,
        )?;

        // The layer section starts at a position computed from the
        // recorded sizes; the resource scan may have under-read.
        cur.seek_from_start(
            PSD_HEADER_SIZE + 4 + color_data_size as u64 + 4 + resource_section_size as u64,
        )?;

        let layer_size = if header.version == 2 {
            cur.read_u64()?
        } else {
            cur.read_u32()? as u64
        };
        let layer_size_bytes = 4 * header.version as i64;
        if layer_size >= 2 + layer_size_bytes as u64 {
            // Peek the layer count behind the layer-info sub-size, then
            // skip the rest of the section. A layered document's 4th
            // merged channel is not transparency unless the
            // alpha-identifiers resource said so.
            cur.seek_relative(layer_size_bytes)?;
            let layer_count = cur.read_i16()?;
            if layer_count > 0 {
                use_alpha = false;
            }
            cur.seek_relative(layer_size as i64 - 2 - layer_size_bytes)?;
        } else {
            cur.seek_relative(layer_size as i64)?;
        }

        let compression = Compression::from_u16(cur.read_u16()?)?;

        let pos = cur.tell()?;
        let data_size = file_size.checked_sub(pos).ok_or(DecodeError::Truncated)? as usize;
        let mut data = alloc_bytes(data_size)?;
        cur.read_exact(&mut data)?;

        if header.depth == 1 || header.color_mode == ColorMode::Bitmap {
            let mut image = DecodedImage::allocate(header.width, header.height, 1, ImageFormat::Psd)?;
            match compression {
                Compression::Rle => decode_bitmap_rle(
                    &data,
                    &mut image.pixels,
                    header.width,
                    header.height,
                    image.stride,
                    header.version,
                )?,
                Compression::None => decode_bitmap_raw(
                    &data,
                    &mut image.pixels,
                    header.width,
                    header.height,
                    image.stride,
                )?,
            }
            image.exif = exif;
            return Ok(image);
        }

        if !use_alpha && header.color_mode != ColorMode::Cmyk {
            out_channels = out_channels.min(3);
        }

        let mut transform = None;
        if out_channels >= 3 {
            match header.color_mode {
                ColorMode::Lab => {
                    let layout = if out_channels == 4 {
                        PixelLayout::LabA
                    } else {
                        PixelLayout::Lab
                    };
                    match SrgbTransform::lab(layout) {
                        Ok(t) => transform = Some(t),
                        Err(e) => {
                            tracing::warn!("Lab transform unavailable, showing lightness as grayscale: {e}");
                            out_channels = 1;
                        }
                    }
                }
                ColorMode::Rgb => {
                    if let Some(profile) = &icc_profile {
                        let layout = if out_channels == 4 {
                            PixelLayout::Bgra
                        } else {
                            PixelLayout::Bgr
                        };
                        match SrgbTransform::from_profile_bytes(profile, layout) {
                            Ok(t) => transform = Some(t),
                            Err(e) => tracing::warn!("embedded ICC profile unusable: {e}"),
                        }
                    }
                }
                _ => {}
            }
        }

        let mut image =
            DecodedImage::allocate(header.width, header.height, out_channels, ImageFormat::Psd)?;
        match compression {
            Compression::Rle => {
                decode_planes_rle(&data, &mut image.pixels, &header, out_channels, image.stride)?
            }
            Compression::None => {
                decode_planes_raw(&data, &mut image.pixels, &header, out_channels, image.stride)?
            }
        }

        if let Some(t) = &transform {
            t.apply(&mut image.pixels, header.width, header.height, image.stride);
        }

        if out_channels == 4 {
            let background = if header.color_mode == ColorMode::Cmyk {
                0
            } else {
                self.options.transparency_color
            };
            blend_rows(
                &mut image.pixels,
                header.width,
                header.height,
                image.stride,
                background,
            );
        }

        image.exif = exif;
        Ok(image)
    }

    fn read_thumb_impl<R: Read + Seek>(
        &self,
        cur: &mut ByteCursor<R>,
    ) -> DecodeResult<DecodedImage> {
        cur.seek_from_start(PSD_HEADER_SIZE)?;
        let color_data_size = cur.read_u32()?;
        cur.seek_relative(color_data_size as i64)?;

        // Resource section size; the scan stops at the first non-"8BIM"
        // signature anyway.
        let _resource_section_size = cur.read_u32()?;

        let (thumb, exif) = scan_thumbnail_resources(cur)?;
        let mut image = thumb.ok_or(DecodeError::MissingData("no embedded thumbnail"))?;
        image.exif = exif;
        Ok(image)
    }
}

impl FormatReader<PsdReaderOptions> for PsdReader {
    fn format_name(&self) -> &'static str {
        "PSD"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["psd", "psb"]
    }

    fn can_read(&self, header: &[u8]) -> bool {
        header.starts_with(b"8BPS")
    }

    fn read<P: AsRef<Path>>(&self, path: P) -> DecodeResult<DecodedImage> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        if size > MAX_PSD_FILE_SIZE {
            return Err(DecodeError::ResourceLimit {
                what: "file size",
                limit: MAX_PSD_FILE_SIZE,
            });
        }
        let mut cur = ByteCursor::from_file(file);
        self.read_image_impl(&mut cur, size)
    }

    fn read_from_memory(&self, data: &[u8]) -> DecodeResult<DecodedImage> {
        if data.len() as u64 > MAX_PSD_FILE_SIZE {
            return Err(DecodeError::ResourceLimit {
                what: "file size",
                limit: MAX_PSD_FILE_SIZE,
            });
        }
        let mut cur = ByteCursor::from_slice(data);
        self.read_image_impl(&mut cur, data.len() as u64)
    }

    fn with_options(options: PsdReaderOptions) -> Self {
        Self { options }
    }
}

/// One "8BIM" TLV entry of the image-resources block.
struct ResourceEntry {
    id: u16,
    size: u32,
    payload_start: u64,
}

/// Reads the next resource header, or `None` at the end of the block.
fn next_resource<R: Read + Seek>(cur: &mut ByteCursor<R>) -> DecodeResult<Option<ResourceEntry>> {
    let signature = match cur.read_u32() {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };
    if signature != RESOURCE_SIGNATURE {
        return Ok(None);
    }
    let id = cur.read_u16()?;
    // Pascal name string, padded to even length including the length byte.
    let name_len = cur.read_u8()?;
    cur.seek_relative((name_len | 1) as i64)?;
    let size = cur.read_u32()?;
    let payload_start = cur.tell()?;
    Ok(Some(ResourceEntry {
        id,
        size,
        payload_start,
    }))
}

/// Seeks past a resource's payload, padded to even length.
///
/// Always seeks absolutely from the recorded payload start, so dispatch
/// code is free to leave the cursor anywhere inside the payload.
fn skip_resource<R: Read + Seek>(cur: &mut ByteCursor<R>, entry: &ResourceEntry) -> DecodeResult<()> {
    cur.seek_from_start(entry.payload_start + ((entry.size as u64 + 1) & !1))?;
    Ok(())
}

/// Wraps an EXIF resource payload in a synthetic APP1 segment.
fn read_exif_resource<R: Read + Seek>(cur: &mut ByteCursor<R>, size: u32) -> DecodeResult<Vec<u8>> {
    let mut buf = alloc_bytes(size as usize + 10)?;
    buf[0] = 0xFF;
    buf[1] = 0xE1;
    buf[2..4].copy_from_slice(&(size as u16 + 8).to_be_bytes());
    buf[4..10].copy_from_slice(b"Exif\0\0");
    cur.read_exact(&mut buf[10..])?;
    Ok(buf)
}

/// Scans the image-resources block of the full-image path.
///
/// Returns the extracted EXIF block (first 0x0422/0x0423 wins) and ICC
/// profile (last 0x040F wins; only collected for RGB documents), and
/// clears `use_alpha` unless an alpha-identifiers resource marks an
/// identifier 0.
fn scan_image_resources<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    section_end: u64,
    color_mode: ColorMode,
    use_alpha: &mut bool,
) -> DecodeResult<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    let mut exif = None;
    let mut icc = None;

    while cur.tell()? < section_end {
        let Some(entry) = next_resource(cur)? else {
            break;
        };
        match entry.id {
            RES_ICC_PROFILE if color_mode == ColorMode::Rgb => {
                let mut profile = alloc_bytes(entry.size as usize)?;
                cur.read_exact(&mut profile)?;
                icc = Some(profile);
            }
            RES_ALPHA_IDENTIFIERS => {
                if *use_alpha {
                    // Identifier 0 marks the merged image's transparency
                    // channel; any other set of identifiers means the
                    // extra channels are spot/saved selections.
                    *use_alpha = false;
                    for _ in 0..entry.size / 4 {
                        if cur.read_u32()? == 0 {
                            *use_alpha = true;
                            break;
                        }
                    }
                }
            }
            RES_VERSION_INFO if entry.size >= 5 => {
                cur.read_u32()?;
                if cur.read_u8()? == 0 {
                    return Err(DecodeError::malformed("document has no merged image data"));
                }
            }
            RES_EXIF_DATA_1 | RES_EXIF_DATA_3 => {
                if exif.is_none() && entry.size < 65526 {
                    exif = Some(read_exif_resource(cur, entry.size)?);
                }
            }
            _ => {}
        }
        skip_resource(cur, &entry)?;
    }

    Ok((exif, icc))
}

/// Scans resources for the thumbnail path: the embedded JPEG preview
/// plus the same EXIF extraction as the full-image scan.
fn scan_thumbnail_resources<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
) -> DecodeResult<(Option<DecodedImage>, Option<Vec<u8>>)> {
    let mut thumb = None;
    let mut exif = None;

    loop {
        let Some(entry) = next_resource(cur)? else {
            break;
        };
        match entry.id {
            RES_THUMBNAIL_4 | RES_THUMBNAIL_5 => {
                if entry.size as usize > THUMBNAIL_HEADER_SIZE {
                    cur.seek_relative(THUMBNAIL_HEADER_SIZE as i64)?;
                    let jpeg_size = entry.size as usize - THUMBNAIL_HEADER_SIZE;
                    if jpeg_size as u64 > MAX_JPEG_FILE_SIZE {
                        return Err(DecodeError::ResourceLimit {
                            what: "embedded JPEG size",
                            limit: MAX_JPEG_FILE_SIZE,
                        });
                    }
                    let mut stream = alloc_bytes(jpeg_size)?;
                    cur.read_exact(&mut stream)?;
                    match jpeg::decode(&stream) {
                        Ok(image) => thumb = Some(image),
                        Err(e) => tracing::warn!("embedded thumbnail undecodable: {e}"),
                    }
                }
            }
            RES_EXIF_DATA_1 | RES_EXIF_DATA_3 => {
                if exif.is_none() && entry.size < 65526 {
                    exif = Some(read_exif_resource(cur, entry.size)?);
                }
            }
            _ => {}
        }
        skip_resource(cur, &entry)?;
    }

    Ok((thumb, exif))
}

/// Scales a 16-bit sample to 8 bits with rounding.
#[inline]
fn scale16_to_8(value: u16) -> u8 {
    ((value as u32 * 255 + 32768) / 65535) as u8
}

/// Maps a source plane index to its byte position within an output pixel.
///
/// Lab planes map straight through (L,a,b,alpha). Every other mode swaps
/// into B,G,R[,alpha] order, which also leaves CMYK planes in their
/// natural C,M,Y,K positions.
fn target_channel(mode: ColorMode, channel: usize, out_channels: usize) -> usize {
    if mode == ColorMode::Lab {
        return channel;
    }
    match out_channels {
        1 => 0,
        3 => [2, 1, 0][channel],
        _ => [2, 1, 0, 3][channel],
    }
}

/// Reads a per-scanline byte count from the RLE table.
fn read_count(data: &[u8], offset: usize, version: u16) -> DecodeResult<usize> {
    if version == 2 {
        let bytes = data
            .get(offset..offset + 4)
            .ok_or(DecodeError::Truncated)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()) as usize)
    } else {
        let bytes = data
            .get(offset..offset + 2)
            .ok_or(DecodeError::Truncated)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()) as usize)
    }
}

/// Reads one sample, scaling 16-bit values to 8 bits.
#[inline]
fn read_sample(data: &[u8], pos: &mut usize, depth: u16) -> DecodeResult<u8> {
    if depth == 16 {
        let hi = *data.get(*pos).ok_or(DecodeError::Truncated)?;
        let lo = *data.get(*pos + 1).ok_or(DecodeError::Truncated)?;
        *pos += 2;
        Ok(scale16_to_8(((hi as u16) << 8) | lo as u16))
    } else {
        let value = *data.get(*pos).ok_or(DecodeError::Truncated)?;
        *pos += 1;
        Ok(value)
    }
}

/// Expands the bits of one source byte into up to 8 output pixels.
///
/// Photoshop stores bitmap data inverted: a set bit is black.
fn expand_bits(row: &mut [u8], count: &mut usize, width: usize, value: u8) {
    for bit in (0..8).rev() {
        if *count >= width {
            return;
        }
        row[*count] = if (value >> bit) & 1 == 1 { 0 } else { 255 };
        *count += 1;
    }
}

/// Decodes PackBits-compressed 1-bit data into 8-bit grayscale rows.
fn decode_bitmap_rle(
    data: &[u8],
    out: &mut [u8],
    width: u32,
    height: u32,
    stride: usize,
    version: u16,
) -> DecodeResult<()> {
    let width = width as usize;
    let height = height as usize;
    let entry = if version == 2 { 4 } else { 2 };
    let table_len = height * entry;
    if data.len() < table_len {
        return Err(DecodeError::Truncated);
    }

    let mut offset = table_len;
    for row in 0..height {
        let row_out = &mut out[row * stride..(row + 1) * stride];
        let mut pos = offset;
        let mut count = 0usize;

        while count < width {
            let c = *data.get(pos).ok_or(DecodeError::Truncated)?;
            pos += 1;
            if c > 128 {
                let run = 257 - c as usize;
                let value = *data.get(pos).ok_or(DecodeError::Truncated)?;
                pos += 1;
                for _ in 0..run {
                    if count >= width {
                        break;
                    }
                    expand_bits(row_out, &mut count, width, value);
                }
            } else if c < 128 {
                for _ in 0..=c {
                    if count >= width {
                        break;
                    }
                    let value = *data.get(pos).ok_or(DecodeError::Truncated)?;
                    pos += 1;
                    expand_bits(row_out, &mut count, width, value);
                }
            }
        }

        offset += read_count(data, row * entry, version)?;
    }
    Ok(())
}

/// Decodes uncompressed 1-bit data into 8-bit grayscale rows.
fn decode_bitmap_raw(
    data: &[u8],
    out: &mut [u8],
    width: u32,
    height: u32,
    stride: usize,
) -> DecodeResult<()> {
    let width = width as usize;
    let height = height as usize;
    let bytes_per_row = width.div_ceil(8);
    if bytes_per_row * height > data.len() {
        return Err(DecodeError::Truncated);
    }

    for row in 0..height {
        let src = &data[row * bytes_per_row..(row + 1) * bytes_per_row];
        let row_out = &mut out[row * stride..(row + 1) * stride];
        for col in 0..width {
            let bit = (src[col / 8] >> (7 - col % 8)) & 1;
            row_out[col] = if bit == 1 { 0 } else { 255 };
        }
    }
    Ok(())
}

/// Decodes PackBits-compressed channel planes into interleaved pixels.
///
/// The data starts with a table of per-scanline byte counts covering
/// every on-disk channel; each row's stream position is advanced by its
/// table entry, not by how many bytes the decode consumed.
fn decode_planes_rle(
    data: &[u8],
    out: &mut [u8],
    header: &PsdHeader,
    out_channels: u32,
    stride: usize,
) -> DecodeResult<()> {
    let width = header.width as usize;
    let height = header.height as usize;
    let channels = out_channels as usize;
    let entry = if header.version == 2 { 4 } else { 2 };
    let table_len = height * header.channels as usize * entry;
    if data.len() < table_len {
        return Err(DecodeError::Truncated);
    }

    let mut offset = table_len;
    for channel in 0..channels {
        let target = target_channel(header.color_mode, channel, channels);
        for row in 0..height {
            let row_out = &mut out[row * stride..(row + 1) * stride];
            let mut pos = offset;
            let mut count = 0usize;

            while count < width {
                let c = *data.get(pos).ok_or(DecodeError::Truncated)?;
                pos += 1;
                if c > 128 {
                    let run = 257 - c as usize;
                    let value = read_sample(data, &mut pos, header.depth)?;
                    for i in 0..run {
                        let col = count + i;
                        if col < width {
                            row_out[col * channels + target] = value;
                        }
                    }
                    count += run;
                } else if c < 128 {
                    let run = c as usize + 1;
                    for i in 0..run {
                        let value = read_sample(data, &mut pos, header.depth)?;
                        let col = count + i;
                        if col < width {
                            row_out[col * channels + target] = value;
                        }
                    }
                    count += run;
                }
            }

            offset += read_count(data, (channel * height + row) * entry, header.version)?;
        }
    }
    Ok(())
}

/// Decodes uncompressed channel planes into interleaved pixels.
fn decode_planes_raw(
    data: &[u8],
    out: &mut [u8],
    header: &PsdHeader,
    out_channels: u32,
    stride: usize,
) -> DecodeResult<()> {
    let width = header.width as usize;
    let height = header.height as usize;
    let channels = out_channels as usize;

    let mut pos = 0usize;
    for channel in 0..channels {
        let target = target_channel(header.color_mode, channel, channels);
        for row in 0..height {
            let row_out = &mut out[row * stride..(row + 1) * stride];
            for col in 0..width {
                let value = read_sample(data, &mut pos, header.depth)?;
                row_out[col * channels + target] = value;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padded_stride;

    #[test]
    fn test_scale16_endpoints_and_monotonic() {
        assert_eq!(scale16_to_8(0), 0);
        assert_eq!(scale16_to_8(65535), 255);
        assert_eq!(scale16_to_8(32768), 128);

        let mut last = 0u8;
        for value in 0..=65535u16 {
            let scaled = scale16_to_8(value);
            assert!(scaled >= last, "not monotonic at {value}");
            last = scaled;
        }
    }

    #[test]
    fn test_target_channel_matches_modulo_formula() {
        // The permutation table must agree with the historical unsigned
        // (-c - 2) % n computation on every pair in use.
        for mode in [ColorMode::Rgb, ColorMode::Cmyk, ColorMode::Grayscale, ColorMode::Multichannel] {
            for n in [1usize, 3, 4] {
                for c in 0..n {
                    let formula = (0u32.wrapping_sub(c as u32).wrapping_sub(2) % n as u32) as usize;
                    assert_eq!(
                        target_channel(mode, c, n),
                        formula,
                        "mode {mode:?}, {c} of {n}"
                    );
                }
            }
        }
        // Lab maps straight through.
        for c in 0..4 {
            assert_eq!(target_channel(ColorMode::Lab, c, 4), c);
        }
    }

    /// Minimal PackBits encoder used to exercise the decoder.
    fn packbits_encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let mut run = 1;
            while i + run < data.len() && data[i + run] == data[i] && run < 128 {
                run += 1;
            }
            if run >= 2 {
                out.push((257 - run) as u8);
                out.push(data[i]);
                i += run;
            } else {
                let start = i;
                let mut len = 1;
                i += 1;
                while i < data.len()
                    && len < 128
                    && !(i + 1 < data.len() && data[i + 1] == data[i])
                {
                    len += 1;
                    i += 1;
                }
                out.push((len - 1) as u8);
                out.extend_from_slice(&data[start..start + len]);
            }
        }
        out
    }

    fn rle_decode_single_plane(original: &[u8]) -> Vec<u8> {
        let encoded = packbits_encode(original);
        let width = original.len() as u32;

        // Byte-count table for one channel, one row, then the stream.
        let mut data = Vec::new();
        data.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        data.extend_from_slice(&encoded);

        let header = PsdHeader {
            version: 1,
            channels: 1,
            width,
            height: 1,
            depth: 8,
            color_mode: ColorMode::Grayscale,
        };
        let stride = padded_stride(width, 1);
        let mut out = vec![0u8; stride];
        decode_planes_rle(&data, &mut out, &header, 1, stride).unwrap();
        out[..original.len()].to_vec()
    }

    #[test]
    fn test_packbits_round_trip() {
        let mut state = 0x9E3779B97F4A7C15u64;
        for len in [1usize, 2, 7, 64, 300, 1000] {
            // Biased generator producing both runs and literal noise.
            let mut buf = Vec::with_capacity(len);
            while buf.len() < len {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let value = (state >> 56) as u8 & 0x07;
                let repeat = ((state >> 48) as usize & 0x0F) + 1;
                for _ in 0..repeat.min(len - buf.len()) {
                    buf.push(value);
                }
            }
            assert_eq!(rle_decode_single_plane(&buf), buf, "length {len}");
        }
    }

    #[test]
    fn test_packbits_no_op_opcode_is_skipped() {
        // 128 is a no-op; the decoder must step over it.
        let data = [
            0x00, 0x03, // one row of 3 bytes
            0x80, 0x01, 0xAA, 0xBB, // no-op, then a 2-byte literal run
        ];
        let header = PsdHeader {
            version: 1,
            channels: 1,
            width: 2,
            height: 1,
            depth: 8,
            color_mode: ColorMode::Grayscale,
        };
        let mut out = vec![0u8; 4];
        decode_planes_rle(&data, &mut out, &header, 1, 4).unwrap();
        assert_eq!(&out[..2], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_bitmap_raw_bit_expansion() {
        // 0xA0 = 1010 0000 -> black, white, black, white.
        let data = [0xA0u8];
        let mut out = vec![7u8; 4];
        decode_bitmap_raw(&data, &mut out, 4, 1, 4).unwrap();
        assert_eq!(out, vec![0, 255, 0, 255]);
    }

    #[test]
    fn test_bitmap_raw_truncated() {
        // 9 pixels need 2 bytes per row; only 1 available.
        let data = [0xFFu8];
        let mut out = vec![0u8; 12];
        assert!(matches!(
            decode_bitmap_raw(&data, &mut out, 9, 1, 12),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn test_sixteen_bit_samples_scaled() {
        // One row, one channel, two 16-bit samples, uncompressed.
        let data = [0xFF, 0xFF, 0x00, 0x00];
        let header = PsdHeader {
            version: 1,
            channels: 1,
            width: 2,
            height: 1,
            depth: 16,
            color_mode: ColorMode::Grayscale,
        };
        let mut out = vec![0u8; 4];
        decode_planes_raw(&data, &mut out, &header, 1, 4).unwrap();
        assert_eq!(&out[..2], &[255, 0]);
    }

    #[test]
    fn test_compression_gate() {
        assert!(Compression::from_u16(0).is_ok());
        assert!(Compression::from_u16(1).is_ok());
        assert!(matches!(
            Compression::from_u16(2),
            Err(DecodeError::Unsupported(_))
        ));
        assert!(matches!(
            Compression::from_u16(3),
            Err(DecodeError::Unsupported(_))
        ));
        assert!(matches!(
            Compression::from_u16(9),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_output_channels() {
        let mut header = PsdHeader {
            version: 1,
            channels: 3,
            width: 1,
            height: 1,
            depth: 8,
            color_mode: ColorMode::Rgb,
        };
        assert_eq!(header.output_channels().unwrap(), 3);

        header.channels = 5;
        assert_eq!(header.output_channels().unwrap(), 4);

        header.color_mode = ColorMode::Grayscale;
        assert_eq!(header.output_channels().unwrap(), 1);

        // Gray + alpha collapses to gray.
        header.color_mode = ColorMode::Rgb;
        header.channels = 2;
        assert_eq!(header.output_channels().unwrap(), 1);

        header.depth = 1;
        header.channels = 3;
        assert_eq!(header.output_channels().unwrap(), 1);

        header.depth = 8;
        header.color_mode = ColorMode::Indexed;
        assert!(header.output_channels().is_err());
    }
}
