//! EXIF metadata reader.
//!
//! Parses the TIFF structure carried in a JPEG APP1 segment: the IFD0
//! directory, the optional EXIF and GPS sub-directories, and the
//! optional IFD1 thumbnail directory. The parse is deliberately soft —
//! a damaged directory aborts only itself, and the returned
//! [`ExifRecord`] reports whatever was readable, with everything else
//! absent.
//!
//! The record also remembers the byte positions of a few directory
//! values inside the caller's APP1 buffer, so the viewer can rewrite
//! them in place after a lossless rotation
//! ([`ExifRecord::write_orientation`],
//! [`ExifRecord::update_jpeg_thumbnail`],
//! [`ExifRecord::delete_thumbnail`]). The mutators take the buffer as a
//! `&mut [u8]` at call time; it must be the same bytes that were parsed.

use crate::cursor::{ByteCursor, Endian};
use crate::error::{DecodeError, DecodeResult};
use crate::ImageFormat;
use chrono::{NaiveDate, NaiveDateTime};
use std::io::Cursor;

/// Offset of the TIFF header within the APP1 segment
/// (2-byte marker, 2-byte size, "Exif\0\0").
const TIFF_BASE: usize = 10;

// TIFF value types.
const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;
const TYPE_UNDEFINED: u16 = 7;
const TYPE_SRATIONAL: u16 = 10;

// IFD0 tags.
const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_LENGTH: u16 = 0x0101;
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_SOFTWARE: u16 = 0x0131;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_JPEG_INTERCHANGE_FORMAT: u16 = 0x0201;
const TAG_JPEG_INTERCHANGE_FORMAT_LENGTH: u16 = 0x0202;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
const TAG_XP_COMMENT: u16 = 0x9C9C;

// EXIF sub-IFD tags.
const TAG_EXPOSURE_TIME: u16 = 0x829A;
const TAG_F_NUMBER: u16 = 0x829D;
const TAG_EXPOSURE_PROGRAM: u16 = 0x8822;
const TAG_ISO_SPEED: u16 = 0x8827;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_EXPOSURE_BIAS: u16 = 0x9204;
const TAG_METERING_MODE: u16 = 0x9207;
const TAG_FLASH: u16 = 0x9209;
const TAG_FOCAL_LENGTH: u16 = 0x920A;
const TAG_USER_COMMENT: u16 = 0x9286;
const TAG_WHITE_BALANCE: u16 = 0xA403;
const TAG_SCENE_CAPTURE_TYPE: u16 = 0xA406;
const TAG_LENS_MODEL: u16 = 0xA434;

// GPS sub-IFD tags.
const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
const TAG_GPS_LATITUDE: u16 = 0x0002;
const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
const TAG_GPS_LONGITUDE: u16 = 0x0004;
const TAG_GPS_ALTITUDE_REF: u16 = 0x0005;
const TAG_GPS_ALTITUDE: u16 = 0x0006;

/// JPEG compression marker in the IFD1 Compression tag.
const COMPRESSION_JPEG: u32 = 6;

/// An unsigned rational number (numerator / denominator).
///
/// A denominator of zero means the value is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rational {
    /// Numerator.
    pub num: u32,
    /// Denominator; zero marks an absent value.
    pub den: u32,
}

impl Rational {
    /// Returns the value as a float, or `None` for a zero denominator.
    pub fn as_f64(self) -> Option<f64> {
        (self.den != 0).then(|| self.num as f64 / self.den as f64)
    }
}

/// A signed rational number (numerator / denominator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignedRational {
    /// Numerator.
    pub num: i32,
    /// Denominator; zero marks an absent value.
    pub den: i32,
}

impl SignedRational {
    /// Returns the value as a float, or `None` for a zero denominator.
    pub fn as_f64(self) -> Option<f64> {
        (self.den != 0).then(|| self.num as f64 / self.den as f64)
    }
}

/// A GPS coordinate: hemisphere reference plus degrees/minutes/seconds.
///
/// The constructor normalizes fractional degrees and minutes, so a
/// coordinate recorded as `(51.4775, 0, 0)` reads back as
/// `51deg 28' 39"`.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsCoordinate {
    reference: String,
    /// Whole degrees.
    pub degrees: f64,
    /// Minutes of arc.
    pub minutes: f64,
    /// Seconds of arc.
    pub seconds: f64,
}

impl GpsCoordinate {
    /// Creates a coordinate, deriving minutes and seconds from the
    /// fractional parts of the coarser components when they are zero.
    pub fn new(reference: impl Into<String>, degrees: f64, minutes: f64, seconds: f64) -> Self {
        let mut degrees = degrees;
        let mut minutes = minutes;
        let mut seconds = seconds;
        if minutes == 0.0 && seconds == 0.0 {
            minutes = 60.0 * (degrees - degrees.trunc()).abs();
            degrees = degrees.trunc();
        }
        if seconds == 0.0 {
            seconds = 60.0 * (minutes - minutes.trunc()).abs();
            minutes = minutes.trunc();
        }
        Self {
            reference: reference.into(),
            degrees,
            minutes,
            seconds,
        }
    }

    /// The hemisphere reference string ("N", "S", "E", "W", ...).
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The coordinate as signed decimal degrees.
    ///
    /// Southern and western references produce negative values.
    pub fn decimal_degrees(&self) -> f64 {
        let value = self.degrees + self.minutes / 60.0 + self.seconds / 3600.0;
        if self.reference.eq_ignore_ascii_case("S") || self.reference.eq_ignore_ascii_case("W") {
            -value
        } else {
            value
        }
    }
}

/// Builds a map URL from a provider template with `{lat}` and `{lng}`
/// placeholders.
pub fn gps_map_url(template: &str, latitude: &GpsCoordinate, longitude: &GpsCoordinate) -> String {
    template
        .replace("{lat}", &format!("{:.5}", latitude.decimal_degrees()))
        .replace("{lng}", &format!("{:.5}", longitude.decimal_degrees()))
}

/// Embedded thumbnail location inside the APP1 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailInfo {
    /// Whether the thumbnail is a JPEG-compressed stream.
    pub jpeg_compressed: bool,
    /// Byte offset of the stream within the APP1 segment.
    pub offset: usize,
    /// Stream length in bytes.
    pub len: u32,
    /// Thumbnail width, 0 if unrecorded.
    pub width: u32,
    /// Thumbnail height, 0 if unrecorded.
    pub height: u32,
}

/// Position and width of a directory value that the mutators rewrite.
#[derive(Debug, Clone, Copy)]
struct ValueSlot {
    pos: usize,
    long: bool,
}

/// Offsets into IFD1 needed by the thumbnail mutators.
#[derive(Debug, Clone, Copy, Default)]
struct Ifd1Slots {
    /// APP1-relative offset of the start of IFD1.
    start: usize,
    len_value: Option<ValueSlot>,
    width_value: Option<ValueSlot>,
    height_value: Option<ValueSlot>,
}

/// Parsed EXIF metadata with in-place mutators.
///
/// Obtained from [`ExifRecord::parse`]. Every getter models absence as
/// `None`; the parse itself only fails on a malformed APP1 envelope.
#[derive(Debug, Clone, Default)]
pub struct ExifRecord {
    camera_model: String,
    user_comment: String,
    image_description: String,
    software: String,
    xp_comment: String,
    lens_model: String,
    acquisition_time: Option<NaiveDateTime>,
    date_time: Option<NaiveDateTime>,
    exposure_time: Rational,
    exposure_bias: Option<f64>,
    focal_length: Option<f64>,
    f_number: Option<f64>,
    iso_speed: u32,
    exposure_program: u16,
    metering_mode: u16,
    white_balance: u16,
    scene_capture_type: u16,
    orientation: u16,
    flash_present: bool,
    flash_fired: bool,
    thumbnail: Option<ThumbnailInfo>,
    latitude: Option<GpsCoordinate>,
    longitude: Option<GpsCoordinate>,
    altitude: Option<f64>,

    endian: Option<Endian>,
    orientation_value: Option<usize>,
    ifd0_next_link: Option<usize>,
    ifd1: Option<Ifd1Slots>,
}

impl ExifRecord {
    /// Parses the APP1 segment of an image.
    ///
    /// `app1` must start with the APP1 marker bytes. For
    /// [`ImageFormat::Jpeg`] the declared segment size must fit the
    /// buffer; for the other formats the marker and size bytes are a
    /// synthetic wrapper and the buffer length governs.
    ///
    /// Only envelope-level violations fail the parse. Directory-level
    /// damage (truncated IFDs, bad offsets, odd value types) is absorbed
    /// and the affected fields read as absent.
    pub fn parse(app1: &[u8], format: ImageFormat) -> DecodeResult<ExifRecord> {
        if app1.len() < TIFF_BASE + 8 {
            return Err(DecodeError::Truncated);
        }
        if app1[0] != 0xFF || app1[1] != 0xE1 {
            return Err(DecodeError::malformed("missing APP1 marker"));
        }
        let declared = u16::from_be_bytes([app1[2], app1[3]]) as usize;
        if format == ImageFormat::Jpeg && declared + 2 > app1.len() {
            return Err(DecodeError::malformed(format!(
                "APP1 size {} exceeds segment of {} bytes",
                declared,
                app1.len()
            )));
        }
        if &app1[4..10] != b"Exif\0\0" {
            return Err(DecodeError::malformed("missing Exif identifier"));
        }
        let endian = match &app1[TIFF_BASE..TIFF_BASE + 2] {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return Err(DecodeError::malformed("bad TIFF byte-order marker")),
        };

        let mut parser = Parser::new(app1, endian);
        if parser.u16_at(TIFF_BASE as u64 + 2)? != 42 {
            return Err(DecodeError::malformed("bad TIFF magic"));
        }
        let ifd0_offset = parser.u32_at(TIFF_BASE as u64 + 4)?;

        let mut record = ExifRecord {
            endian: Some(endian),
            ..ExifRecord::default()
        };
        // Directory damage past this point degrades fields, not the parse.
        let _ = parser.walk_ifd0(ifd0_offset, &mut record);
        Ok(record)
    }

    /// Camera make and model, concatenated.
    pub fn camera_model(&self) -> Option<&str> {
        not_empty(&self.camera_model)
    }

    /// Free-text user comment from the EXIF sub-IFD.
    pub fn user_comment(&self) -> Option<&str> {
        not_empty(&self.user_comment)
    }

    /// Image description from IFD0.
    pub fn image_description(&self) -> Option<&str> {
        not_empty(&self.image_description)
    }

    /// Creating software from IFD0.
    pub fn software(&self) -> Option<&str> {
        not_empty(&self.software)
    }

    /// Windows Explorer comment (UTF-16 XPComment tag).
    pub fn xp_comment(&self) -> Option<&str> {
        not_empty(&self.xp_comment)
    }

    /// Lens model from the EXIF sub-IFD.
    pub fn lens_model(&self) -> Option<&str> {
        not_empty(&self.lens_model)
    }

    /// When the picture was taken (DateTimeOriginal).
    pub fn acquisition_time(&self) -> Option<NaiveDateTime> {
        self.acquisition_time
    }

    /// When the picture was last saved (DateTime).
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        self.date_time
    }

    /// Exposure time as a rational (e.g. 1/250).
    pub fn exposure_time(&self) -> Option<Rational> {
        (self.exposure_time.den != 0).then_some(self.exposure_time)
    }

    /// Exposure bias in EV. Distinguishes absent from a genuine 0 EV.
    pub fn exposure_bias(&self) -> Option<f64> {
        self.exposure_bias
    }

    /// Focal length in millimeters.
    pub fn focal_length(&self) -> Option<f64> {
        self.focal_length
    }

    /// F-number of the exposure.
    pub fn f_number(&self) -> Option<f64> {
        self.f_number
    }

    /// ISO speed rating.
    pub fn iso_speed(&self) -> Option<u32> {
        (self.iso_speed > 0).then_some(self.iso_speed)
    }

    /// Exposure program (1 = manual, 2 = normal, 3 = aperture priority, ...).
    pub fn exposure_program(&self) -> Option<u16> {
        (self.exposure_program > 0).then_some(self.exposure_program)
    }

    /// Metering mode (1 = average, 3 = spot, 5 = pattern, ...).
    pub fn metering_mode(&self) -> Option<u16> {
        (self.metering_mode > 0).then_some(self.metering_mode)
    }

    /// White balance (1 = manual). Auto (0) reads as absent, matching
    /// the viewer's presence rule for small-integer tags.
    pub fn white_balance(&self) -> Option<u16> {
        (self.white_balance > 0).then_some(self.white_balance)
    }

    /// Scene capture type (1 = landscape, 2 = portrait, 3 = night).
    pub fn scene_capture_type(&self) -> Option<u16> {
        (self.scene_capture_type > 0).then_some(self.scene_capture_type)
    }

    /// Sensor orientation in EXIF encoding (1..=8).
    pub fn orientation(&self) -> Option<u16> {
        (self.orientation > 0).then_some(self.orientation)
    }

    /// Whether the flash fired; `None` when the Flash tag is absent.
    pub fn flash_fired(&self) -> Option<bool> {
        self.flash_present.then_some(self.flash_fired)
    }

    /// Embedded thumbnail descriptor from IFD1.
    pub fn thumbnail(&self) -> Option<&ThumbnailInfo> {
        self.thumbnail.as_ref()
    }

    /// Whether a JPEG-compressed thumbnail is present.
    pub fn has_jpeg_thumbnail(&self) -> bool {
        self.thumbnail.map(|t| t.jpeg_compressed).unwrap_or(false)
    }

    /// GPS latitude, if both GPS coordinates were recorded.
    pub fn gps_latitude(&self) -> Option<&GpsCoordinate> {
        self.latitude.as_ref()
    }

    /// GPS longitude, if both GPS coordinates were recorded.
    pub fn gps_longitude(&self) -> Option<&GpsCoordinate> {
        self.longitude.as_ref()
    }

    /// GPS altitude in meters, negative below sea level.
    pub fn gps_altitude(&self) -> Option<f64> {
        self.altitude
    }

    /// Overwrites the Orientation value inside the original APP1 bytes.
    ///
    /// `app1` must be the buffer this record was parsed from. Returns
    /// `false` when the tag was not present in the input.
    pub fn write_orientation(&mut self, app1: &mut [u8], orientation: u16) -> bool {
        let Some(pos) = self.orientation_value else {
            return false;
        };
        if pos + 2 > app1.len() {
            return false;
        }
        let bytes = match self.endian {
            Some(Endian::Little) => orientation.to_le_bytes(),
            _ => orientation.to_be_bytes(),
        };
        app1[pos..pos + 2].copy_from_slice(&bytes);
        self.orientation = orientation;
        true
    }

    /// Replaces the JPEG-compressed thumbnail inside the APP1 bytes.
    ///
    /// `jpeg_stream` is the new stream with its SOI marker stripped; the
    /// marker is re-prepended at the thumbnail offset. The caller must
    /// have grown the buffer beforehand if the new stream is longer.
    /// `block_len_delta` is added to the APP1 size field on top of the
    /// thumbnail length difference, for callers that resize surrounding
    /// data in the same pass.
    pub fn update_jpeg_thumbnail(
        &mut self,
        app1: &mut [u8],
        jpeg_stream: &[u8],
        block_len_delta: i32,
        width: u32,
        height: u32,
    ) -> DecodeResult<()> {
        let thumb = self
            .thumbnail
            .ok_or(DecodeError::MissingData("no thumbnail in APP1"))?;
        let ifd1 = self
            .ifd1
            .ok_or(DecodeError::MissingData("no thumbnail directory"))?;

        let new_len = jpeg_stream
            .len()
            .checked_add(2)
            .ok_or(DecodeError::Truncated)?;
        let end = thumb
            .offset
            .checked_add(new_len)
            .ok_or(DecodeError::Truncated)?;
        if end > app1.len() {
            return Err(DecodeError::Truncated);
        }

        let new_declared = u16::from_be_bytes([app1[2], app1[3]]) as i64
            + (new_len as i64 - thumb.len as i64)
            + block_len_delta as i64;
        if !(2..=0xFFFF).contains(&new_declared) {
            return Err(DecodeError::malformed("rewritten APP1 size out of range"));
        }

        if let Some(slot) = ifd1.len_value {
            self.write_uint(app1, slot, new_len as u32);
        }
        if let Some(slot) = ifd1.width_value {
            self.write_uint(app1, slot, width);
        }
        if let Some(slot) = ifd1.height_value {
            self.write_uint(app1, slot, height);
        }

        app1[thumb.offset..thumb.offset + 2].copy_from_slice(&[0xFF, 0xD8]);
        app1[thumb.offset + 2..end].copy_from_slice(jpeg_stream);
        app1[2..4].copy_from_slice(&(new_declared as u16).to_be_bytes());

        self.thumbnail = Some(ThumbnailInfo {
            jpeg_compressed: true,
            offset: thumb.offset,
            len: new_len as u32,
            width,
            height,
        });
        Ok(())
    }

    /// Removes the thumbnail by truncating the directory chain.
    ///
    /// Zeroes IFD0's next-IFD link and shrinks the APP1 size field to
    /// end just before IFD1. Returns `false` when no thumbnail directory
    /// was present.
    pub fn delete_thumbnail(&mut self, app1: &mut [u8]) -> bool {
        let (Some(link), Some(ifd1)) = (self.ifd0_next_link, self.ifd1) else {
            return false;
        };
        if link + 4 > app1.len() || ifd1.start < 2 || ifd1.start > 0xFFFF + 2 {
            return false;
        }

        app1[link..link + 4].copy_from_slice(&[0, 0, 0, 0]);
        app1[2..4].copy_from_slice(&(((ifd1.start - 2) as u16).to_be_bytes()));

        self.thumbnail = None;
        self.ifd1 = None;
        true
    }

    fn write_uint(&self, app1: &mut [u8], slot: ValueSlot, value: u32) {
        let little = self.endian == Some(Endian::Little);
        if slot.long {
            if slot.pos + 4 <= app1.len() {
                let bytes = if little {
                    value.to_le_bytes()
                } else {
                    value.to_be_bytes()
                };
                app1[slot.pos..slot.pos + 4].copy_from_slice(&bytes);
            }
        } else if slot.pos + 2 <= app1.len() {
            let bytes = if little {
                (value as u16).to_le_bytes()
            } else {
                (value as u16).to_be_bytes()
            };
            app1[slot.pos..slot.pos + 2].copy_from_slice(&bytes);
        }
    }
}

fn not_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// Parses a date in the EXIF "YYYY:MM:DD HH:MM:SS" shape.
///
/// Dash separators and a missing time-of-day are tolerated; years at or
/// before 1600 are treated as absent, matching cameras that write
/// zeroed placeholder dates.
pub fn parse_exif_date(s: &str) -> Option<NaiveDateTime> {
    let mut parts = s
        .split(|c: char| c == ':' || c == '-' || c == ' ' || c == 'T')
        .filter(|p| !p.is_empty());

    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let hour: u32 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let minute: u32 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let second: u32 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);

    if year <= 1600 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// A 12-byte directory entry.
struct Entry {
    tag: u16,
    typ: u16,
    count: u32,
    /// Absolute position of the 4-byte value-or-offset field.
    value_pos: u64,
}

/// Walks the TIFF directories of one APP1 buffer.
struct Parser<'a> {
    data: &'a [u8],
    cur: ByteCursor<Cursor<&'a [u8]>>,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8], endian: Endian) -> Self {
        let mut cur = ByteCursor::from_slice(data);
        cur.set_endian(endian);
        Self { data, cur }
    }

    fn abs(offset: u32) -> u64 {
        TIFF_BASE as u64 + offset as u64
    }

    fn u16_at(&mut self, pos: u64) -> DecodeResult<u16> {
        self.cur.seek_from_start(pos)?;
        self.cur.read_u16()
    }

    fn u32_at(&mut self, pos: u64) -> DecodeResult<u32> {
        self.cur.seek_from_start(pos)?;
        self.cur.read_u32()
    }

    fn read_entry(&mut self, pos: u64) -> DecodeResult<Entry> {
        self.cur.seek_from_start(pos)?;
        let tag = self.cur.read_u16()?;
        let typ = self.cur.read_u16()?;
        let count = self.cur.read_u32()?;
        let value_pos = self.cur.tell()?;
        Ok(Entry {
            tag,
            typ,
            count,
            value_pos,
        })
    }

    fn type_size(typ: u16) -> u32 {
        match typ {
            TYPE_BYTE | TYPE_ASCII | 6 | TYPE_UNDEFINED => 1,
            TYPE_SHORT | 8 => 2,
            TYPE_LONG | 9 | 11 => 4,
            TYPE_RATIONAL | TYPE_SRATIONAL | 12 => 8,
            _ => 0,
        }
    }

    /// Resolves where an entry's payload lives and how long it is.
    ///
    /// Inline values (4 bytes or less) sit in the value field itself;
    /// larger payloads are at a TIFF-relative offset. Out-of-bounds
    /// payloads resolve to `None`, which reads as an absent tag.
    fn value_location(&mut self, entry: &Entry) -> Option<(u64, usize)> {
        let unit = Self::type_size(entry.typ);
        if unit == 0 || entry.count == 0 {
            return None;
        }
        let size = (unit as u64).checked_mul(entry.count as u64)?;
        let pos = if size <= 4 {
            entry.value_pos
        } else {
            Self::abs(self.u32_at(entry.value_pos).ok()?)
        };
        let end = pos.checked_add(size)?;
        if end > self.data.len() as u64 {
            return None;
        }
        Some((pos, size as usize))
    }

    /// Reads an unsigned integer value of BYTE, SHORT or LONG type.
    fn uint_value(&mut self, entry: &Entry) -> Option<u32> {
        let (pos, _) = self.value_location(entry)?;
        match entry.typ {
            TYPE_BYTE => {
                self.cur.seek_from_start(pos).ok()?;
                self.cur.read_u8().ok().map(u32::from)
            }
            TYPE_SHORT => self.u16_at(pos).ok().map(u32::from),
            TYPE_LONG => self.u32_at(pos).ok(),
            _ => None,
        }
    }

    fn rational_value(&mut self, entry: &Entry) -> Option<Rational> {
        if entry.typ != TYPE_RATIONAL {
            return None;
        }
        let (pos, _) = self.value_location(entry)?;
        let num = self.u32_at(pos).ok()?;
        let den = self.cur.read_u32().ok()?;
        Some(Rational { num, den })
    }

    fn srational_value(&mut self, entry: &Entry) -> Option<SignedRational> {
        if entry.typ != TYPE_SRATIONAL {
            return None;
        }
        let (pos, _) = self.value_location(entry)?;
        let num = self.u32_at(pos).ok()? as i32;
        let den = self.cur.read_u32().ok()? as i32;
        Some(SignedRational { num, den })
    }

    /// Reads a triplet of rationals (GPS degrees/minutes/seconds).
    fn rational_triplet(&mut self, entry: &Entry) -> Option<[f64; 3]> {
        if entry.typ != TYPE_RATIONAL || entry.count < 3 {
            return None;
        }
        let (pos, _) = self.value_location(entry)?;
        self.cur.seek_from_start(pos).ok()?;
        let mut out = [0.0f64; 3];
        for slot in &mut out {
            let num = self.cur.read_u32().ok()?;
            let den = self.cur.read_u32().ok()?;
            *slot = if den != 0 { num as f64 / den as f64 } else { 0.0 };
        }
        Some(out)
    }

    fn bytes_value(&mut self, entry: &Entry) -> Option<Vec<u8>> {
        let (pos, len) = self.value_location(entry)?;
        let pos = pos as usize;
        Some(self.data[pos..pos + len].to_vec())
    }

    fn ascii_value(&mut self, entry: &Entry) -> Option<String> {
        if entry.typ != TYPE_ASCII && entry.typ != TYPE_UNDEFINED {
            return None;
        }
        let bytes = self.bytes_value(entry)?;
        Some(trimmed_ascii(&bytes))
    }

    /// Decodes the UserComment payload: an 8-byte character-code header
    /// followed by text in that encoding.
    fn user_comment_value(&mut self, entry: &Entry, endian: Endian) -> Option<String> {
        let bytes = self.bytes_value(entry)?;
        if bytes.len() < 8 {
            return None;
        }
        let (code, text) = bytes.split_at(8);
        let comment = if code.starts_with(b"UNICODE") {
            utf16_string(text, endian)
        } else if code.starts_with(b"JIS") {
            jis_string(text)
        } else {
            // "ASCII" and the all-zero undefined header read as byte text.
            trimmed_ascii(text)
        };
        Some(comment)
    }

    fn walk_ifd0(&mut self, offset: u32, record: &mut ExifRecord) -> DecodeResult<()> {
        let start = Self::abs(offset);
        if start + 2 > self.data.len() as u64 {
            return Err(DecodeError::Truncated);
        }
        let count = self.u16_at(start)?;

        let mut make = String::new();
        let mut model = String::new();
        let mut exif_ifd = None;
        let mut gps_ifd = None;

        for i in 0..count {
            let Ok(entry) = self.read_entry(start + 2 + i as u64 * 12) else {
                break;
            };
            match entry.tag {
                TAG_MAKE => make = self.ascii_value(&entry).unwrap_or_default(),
                TAG_MODEL => model = self.ascii_value(&entry).unwrap_or_default(),
                TAG_IMAGE_DESCRIPTION => {
                    record.image_description = self.ascii_value(&entry).unwrap_or_default();
                }
                TAG_SOFTWARE => record.software = self.ascii_value(&entry).unwrap_or_default(),
                TAG_XP_COMMENT => {
                    if let Some(bytes) = self.bytes_value(&entry) {
                        record.xp_comment = utf16_string(&bytes, Endian::Little);
                    }
                }
                TAG_DATE_TIME => {
                    record.date_time = self
                        .ascii_value(&entry)
                        .and_then(|s| parse_exif_date(&s));
                }
                TAG_ORIENTATION => {
                    if let Some(value) = self.uint_value(&entry) {
                        record.orientation = value as u16;
                        record.orientation_value = Some(entry.value_pos as usize);
                    }
                }
                TAG_EXIF_IFD => exif_ifd = self.uint_value(&entry),
                TAG_GPS_IFD => gps_ifd = self.uint_value(&entry),
                _ => {}
            }
        }

        record.camera_model = match (make.is_empty(), model.is_empty()) {
            (false, false) => format!("{make} {model}"),
            (false, true) => make,
            _ => model,
        };

        // The next-IFD link follows the entry table; IFD1 holds the
        // thumbnail directory.
        let link_pos = start + 2 + count as u64 * 12;
        if let Ok(ifd1_offset) = self.u32_at(link_pos) {
            record.ifd0_next_link = Some(link_pos as usize);
            if ifd1_offset != 0 {
                let _ = self.walk_ifd1(ifd1_offset, record);
            }
        }

        if let Some(offset) = exif_ifd {
            let _ = self.walk_exif_ifd(offset, record);
        }
        if let Some(offset) = gps_ifd {
            let _ = self.walk_gps_ifd(offset, record);
        }
        Ok(())
    }

    fn walk_exif_ifd(&mut self, offset: u32, record: &mut ExifRecord) -> DecodeResult<()> {
        let start = Self::abs(offset);
        if start + 2 > self.data.len() as u64 {
            return Err(DecodeError::Truncated);
        }
        let endian = self.cur.endian();
        let count = self.u16_at(start)?;

        for i in 0..count {
            let Ok(entry) = self.read_entry(start + 2 + i as u64 * 12) else {
                break;
            };
            match entry.tag {
                TAG_DATE_TIME_ORIGINAL => {
                    record.acquisition_time = self
                        .ascii_value(&entry)
                        .and_then(|s| parse_exif_date(&s));
                }
                TAG_EXPOSURE_TIME => {
                    if let Some(value) = self.rational_value(&entry) {
                        record.exposure_time = value;
                    }
                }
                TAG_F_NUMBER => {
                    record.f_number = self.rational_value(&entry).and_then(Rational::as_f64);
                }
                TAG_EXPOSURE_PROGRAM => {
                    record.exposure_program =
                        self.uint_value(&entry).unwrap_or(0) as u16;
                }
                TAG_ISO_SPEED => record.iso_speed = self.uint_value(&entry).unwrap_or(0),
                TAG_EXPOSURE_BIAS => {
                    record.exposure_bias =
                        self.srational_value(&entry).and_then(SignedRational::as_f64);
                }
                TAG_METERING_MODE => {
                    record.metering_mode = self.uint_value(&entry).unwrap_or(0) as u16;
                }
                TAG_FLASH => {
                    if let Some(value) = self.uint_value(&entry) {
                        record.flash_present = true;
                        record.flash_fired = value & 1 == 1;
                    }
                }
                TAG_FOCAL_LENGTH => {
                    record.focal_length = self.rational_value(&entry).and_then(Rational::as_f64);
                }
                TAG_USER_COMMENT => {
                    record.user_comment =
                        self.user_comment_value(&entry, endian).unwrap_or_default();
                }
                TAG_WHITE_BALANCE => {
                    record.white_balance = self.uint_value(&entry).unwrap_or(0) as u16;
                }
                TAG_SCENE_CAPTURE_TYPE => {
                    record.scene_capture_type = self.uint_value(&entry).unwrap_or(0) as u16;
                }
                TAG_LENS_MODEL => {
                    record.lens_model = self.ascii_value(&entry).unwrap_or_default();
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn walk_gps_ifd(&mut self, offset: u32, record: &mut ExifRecord) -> DecodeResult<()> {
        let start = Self::abs(offset);
        if start + 2 > self.data.len() as u64 {
            return Err(DecodeError::Truncated);
        }
        let count = self.u16_at(start)?;

        let mut lat_ref = String::new();
        let mut lng_ref = String::new();
        let mut lat = None;
        let mut lng = None;
        let mut altitude = None;
        let mut below_sea = false;

        for i in 0..count {
            let Ok(entry) = self.read_entry(start + 2 + i as u64 * 12) else {
                break;
            };
            match entry.tag {
                TAG_GPS_LATITUDE_REF => lat_ref = self.ascii_value(&entry).unwrap_or_default(),
                TAG_GPS_LATITUDE => lat = self.rational_triplet(&entry),
                TAG_GPS_LONGITUDE_REF => lng_ref = self.ascii_value(&entry).unwrap_or_default(),
                TAG_GPS_LONGITUDE => lng = self.rational_triplet(&entry),
                TAG_GPS_ALTITUDE_REF => below_sea = self.uint_value(&entry) == Some(1),
                TAG_GPS_ALTITUDE => {
                    altitude = self.rational_value(&entry).and_then(Rational::as_f64);
                }
                _ => {}
            }
        }

        if let (Some([d, m, s]), Some([d2, m2, s2])) = (lat, lng) {
            record.latitude = Some(GpsCoordinate::new(lat_ref, d, m, s));
            record.longitude = Some(GpsCoordinate::new(lng_ref, d2, m2, s2));
        }
        record.altitude = altitude.map(|a| if below_sea { -a } else { a });
        Ok(())
    }

    fn walk_ifd1(&mut self, offset: u32, record: &mut ExifRecord) -> DecodeResult<()> {
        let start = Self::abs(offset);
        if start + 2 > self.data.len() as u64 {
            return Err(DecodeError::Truncated);
        }
        let count = self.u16_at(start)?;

        let mut slots = Ifd1Slots {
            start: start as usize,
            ..Ifd1Slots::default()
        };
        let mut compression = None;
        let mut stream_offset = None;
        let mut stream_len = None;
        let mut width = 0;
        let mut height = 0;

        for i in 0..count {
            let Ok(entry) = self.read_entry(start + 2 + i as u64 * 12) else {
                break;
            };
            let slot = ValueSlot {
                pos: entry.value_pos as usize,
                long: entry.typ == TYPE_LONG,
            };
            match entry.tag {
                TAG_COMPRESSION => compression = self.uint_value(&entry),
                TAG_JPEG_INTERCHANGE_FORMAT => stream_offset = self.uint_value(&entry),
                TAG_JPEG_INTERCHANGE_FORMAT_LENGTH => {
                    stream_len = self.uint_value(&entry);
                    slots.len_value = Some(slot);
                }
                TAG_IMAGE_WIDTH => {
                    width = self.uint_value(&entry).unwrap_or(0);
                    slots.width_value = Some(slot);
                }
                TAG_IMAGE_LENGTH => {
                    height = self.uint_value(&entry).unwrap_or(0);
                    slots.height_value = Some(slot);
                }
                _ => {}
            }
        }

        record.ifd1 = Some(slots);
        if let (Some(offset), Some(len)) = (stream_offset, stream_len) {
            record.thumbnail = Some(ThumbnailInfo {
                jpeg_compressed: compression == Some(COMPRESSION_JPEG),
                offset: TIFF_BASE + offset as usize,
                len,
                width,
                height,
            });
        }
        Ok(())
    }
}

/// Trims trailing NULs and whitespace, decoding as best-effort UTF-8.
fn trimmed_ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string()
}

/// Salvages the readable part of a JIS-tagged comment.
///
/// The JIS character code means JIS X 0208 text in its ISO-2022-JP
/// framing. Without a codec table the kanji pairs cannot be mapped, so
/// escape sequences are honored ("$"-family shifts enter two-byte mode,
/// "("-family shifts return to ASCII), two-byte runs are dropped whole,
/// and the 7-bit ASCII stretches both JIS encodings keep intact are
/// returned as-is.
fn jis_string(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut two_byte = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0x1B {
            if i + 2 >= bytes.len() {
                break;
            }
            two_byte = bytes[i + 1] == b'$';
            i += 3;
            continue;
        }
        if b == 0 {
            break;
        }
        if two_byte {
            i += 2;
            continue;
        }
        if (0x20..=0x7E).contains(&b) {
            out.push(b as char);
        }
        i += 1;
    }
    out.trim_end_matches(' ').to_string()
}

/// Decodes UTF-16 text in the given byte order, stopping at a NUL.
fn utf16_string(bytes: &[u8], endian: Endian) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| match endian {
            Endian::Little => u16::from_le_bytes([pair[0], pair[1]]),
            Endian::Big => u16::from_be_bytes([pair[0], pair[1]]),
        })
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
