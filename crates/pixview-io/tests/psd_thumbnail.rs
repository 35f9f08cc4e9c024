//! Embedded-thumbnail extraction from the image-resources block.

use pixview_io::jpeg;
use pixview_io::psd::PsdReader;
use pixview_io::DecodeError;

/// Encodes a solid-color RGB image as a baseline JPEG stream.
fn encode_jpeg(width: u16, height: u16, rgb: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut out, 90);
    let data: Vec<u8> = (0..width as usize * height as usize)
        .flat_map(|_| rgb)
        .collect();
    encoder
        .encode(&data, width, height, jpeg_encoder::ColorType::Rgb)
        .unwrap();
    out
}

/// Builds a thumbnail resource: the 28-byte fixed header, then the stream.
fn thumbnail_resource(id: u16, jpeg: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 28];
    payload.extend_from_slice(jpeg);
    resource(id, &payload)
}

fn resource(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"8BIM");
    v.extend_from_slice(&id.to_be_bytes());
    v.extend_from_slice(&[0, 0]);
    v.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    v.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        v.push(0);
    }
    v
}

/// A PSD prefix sufficient for the thumbnail path: header, empty
/// color-mode data, then the resource block.
fn psd_with_resources(resources: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"8BPS");
    v.extend_from_slice(&1u16.to_be_bytes());
    v.extend_from_slice(&[0u8; 6]);
    v.extend_from_slice(&3u16.to_be_bytes());
    v.extend_from_slice(&16u32.to_be_bytes()); // height
    v.extend_from_slice(&16u32.to_be_bytes()); // width
    v.extend_from_slice(&8u16.to_be_bytes());
    v.extend_from_slice(&3u16.to_be_bytes());
    v.extend_from_slice(&0u32.to_be_bytes()); // color mode data
    v.extend_from_slice(&(resources.len() as u32).to_be_bytes());
    v.extend_from_slice(resources);
    v
}

#[test]
fn thumbnail_with_exif_returns_both() {
    let stream = encode_jpeg(2, 2, [200, 40, 40]);
    let mut resources = thumbnail_resource(0x040C, &stream);
    resources.extend_from_slice(&resource(0x0422, b"TIFFDATA"));
    let file = psd_with_resources(&resources);

    let image = PsdReader::new().read_thumbnail_from_memory(&file).unwrap();
    assert_eq!((image.width, image.height, image.channels), (2, 2, 3));
    assert_eq!(image.jpeg_hash, Some(jpeg::content_hash(&stream)));

    let exif = image.exif.expect("EXIF block must be extracted");
    assert_eq!(&exif[..2], &[0xFF, 0xE1]);
    assert_eq!(u16::from_be_bytes([exif[2], exif[3]]), 8 + 8);
    assert_eq!(&exif[4..10], b"Exif\0\0");
    assert_eq!(&exif[10..], b"TIFFDATA");
}

#[test]
fn photoshop5_thumbnail_supersedes_photoshop4() {
    let old = encode_jpeg(2, 2, [10, 10, 10]);
    let new = encode_jpeg(4, 2, [10, 10, 10]);
    let mut resources = thumbnail_resource(0x0409, &old);
    resources.extend_from_slice(&thumbnail_resource(0x040C, &new));
    let file = psd_with_resources(&resources);

    let image = PsdReader::new().read_thumbnail_from_memory(&file).unwrap();
    assert_eq!((image.width, image.height), (4, 2));
}

#[test]
fn missing_thumbnail_is_reported() {
    let file = psd_with_resources(&resource(0x0422, b"TIFFDATA"));
    let err = PsdReader::new()
        .read_thumbnail_from_memory(&file)
        .unwrap_err();
    assert!(matches!(err, DecodeError::MissingData(_)));
}

#[test]
fn undecodable_thumbnail_stream_is_skipped() {
    // A thumbnail resource whose stream is garbage must not abort the
    // scan; with no other thumbnail the result is "missing".
    let resources = thumbnail_resource(0x040C, b"not actually a jpeg stream");
    let file = psd_with_resources(&resources);

    let err = PsdReader::new()
        .read_thumbnail_from_memory(&file)
        .unwrap_err();
    assert!(matches!(err, DecodeError::MissingData(_)));
}
