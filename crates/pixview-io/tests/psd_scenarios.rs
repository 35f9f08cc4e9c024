//! End-to-end PSD decode scenarios over literal byte vectors.

use pixview_io::psd::{PsdReader, PsdReaderOptions};
use pixview_io::{padded_stride, DecodeError, FormatReader};

/// Builds a PSD/PSB file from its sections.
///
/// `layer_section` is the layer-and-mask block without its size field;
/// an empty slice writes a zero-size block.
#[allow(clippy::too_many_arguments)]
fn build_psd(
    version: u16,
    channels: u16,
    width: u32,
    height: u32,
    depth: u16,
    mode: u16,
    resources: &[u8],
    layer_section: &[u8],
    compression: u16,
    data: &[u8],
) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"8BPS");
    v.extend_from_slice(&version.to_be_bytes());
    v.extend_from_slice(&[0u8; 6]);
    v.extend_from_slice(&channels.to_be_bytes());
    v.extend_from_slice(&height.to_be_bytes());
    v.extend_from_slice(&width.to_be_bytes());
    v.extend_from_slice(&depth.to_be_bytes());
    v.extend_from_slice(&mode.to_be_bytes());
    v.extend_from_slice(&0u32.to_be_bytes()); // color mode data
    v.extend_from_slice(&(resources.len() as u32).to_be_bytes());
    v.extend_from_slice(resources);
    if version == 2 {
        v.extend_from_slice(&(layer_section.len() as u64).to_be_bytes());
    } else {
        v.extend_from_slice(&(layer_section.len() as u32).to_be_bytes());
    }
    v.extend_from_slice(layer_section);
    v.extend_from_slice(&compression.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Builds one "8BIM" resource entry with an empty name.
fn resource(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"8BIM");
    v.extend_from_slice(&id.to_be_bytes());
    v.extend_from_slice(&[0, 0]); // empty Pascal name, padded
    v.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    v.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        v.push(0);
    }
    v
}

#[test]
fn rgb_uncompressed_3x2() {
    // Three 8-bit planes, R then G then B, row-major.
    let mut planes = Vec::new();
    planes.extend_from_slice(&[10, 11, 12, 13, 14, 15]); // R
    planes.extend_from_slice(&[20, 21, 22, 23, 24, 25]); // G
    planes.extend_from_slice(&[30, 31, 32, 33, 34, 35]); // B
    let file = build_psd(1, 3, 3, 2, 8, 3, &[], &[], 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!((image.width, image.height, image.channels), (3, 2, 3));
    assert_eq!(image.stride, 12);
    assert_eq!(image.pixel(0, 0), &[30, 20, 10]);
    assert_eq!(image.pixel(2, 0), &[32, 22, 12]);
    assert_eq!(image.pixel(0, 1), &[33, 23, 13]);
    assert_eq!(image.pixel(2, 1), &[35, 25, 15]);
    assert!(image.exif.is_none());
}

#[test]
fn bitmap_1bit_uncompressed() {
    // 0xA0 = 1010 0000; Photoshop stores 1 = black.
    let file = build_psd(1, 1, 4, 1, 1, 0, &[], &[], 0, &[0xA0]);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!((image.width, image.height, image.channels), (4, 1, 1));
    assert_eq!(image.stride, 4);
    assert_eq!(&image.pixels[..4], &[0, 255, 0, 255]);
}

#[test]
fn bitmap_1bit_rle() {
    // One row: literal run of one byte 0xA0, byte-count table says 2.
    let data = [0x00, 0x02, 0x00, 0xA0];
    let file = build_psd(1, 1, 4, 1, 1, 0, &[], &[], 1, &data);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(&image.pixels[..4], &[0, 255, 0, 255]);
}

#[test]
fn rle_row_count_table_lies() {
    // The table claims 5 bytes for the single row but the literal run
    // needs more input than the file holds.
    let data = [0x00, 0x05, 0x03, 0xAA, 0xBB];
    let file = build_psd(1, 1, 4, 1, 8, 1, &[], &[], 1, &data);

    let err = PsdReader::new().read_from_memory(&file).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated));
    assert!(!err.is_out_of_memory());
}

#[test]
fn layered_document_forces_alpha_off() {
    // Four on-disk channels, RGB mode, no alpha-identifiers resource,
    // and a layer section declaring one layer.
    let mut layer = Vec::new();
    layer.extend_from_slice(&2u32.to_be_bytes()); // layer-info size
    layer.extend_from_slice(&1i16.to_be_bytes()); // layer count
    let mut planes = Vec::new();
    planes.extend_from_slice(&[1, 2]); // R
    planes.extend_from_slice(&[3, 4]); // G
    planes.extend_from_slice(&[5, 6]); // B
    planes.extend_from_slice(&[9, 9]); // alpha, never read
    let file = build_psd(1, 4, 2, 1, 8, 3, &[], &layer, 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(image.channels, 3);
    assert_eq!(image.stride, padded_stride(2, 3));
    assert_eq!(image.pixel(0, 0), &[5, 3, 1]);
    assert_eq!(image.pixel(1, 0), &[6, 4, 2]);
}

#[test]
fn alpha_identifier_zero_keeps_alpha() {
    // Identifier 0 marks real transparency; the fully transparent pixel
    // composites to the backdrop color.
    let ids = resource(0x041D, &0u32.to_be_bytes());
    let planes = [100u8, 150, 200, 0]; // R, G, B, A planes of a 1x1 image
    let file = build_psd(1, 4, 1, 1, 8, 3, &ids, &[], 0, &planes);

    let reader = PsdReader::with_options(PsdReaderOptions {
        transparency_color: 0x0012_3456,
    });
    let image = reader.read_from_memory(&file).unwrap();
    assert_eq!(image.channels, 4);
    assert_eq!(image.pixel(0, 0), &[0x56, 0x34, 0x12, 255]);
}

#[test]
fn alpha_identifiers_without_zero_drop_alpha() {
    let ids = resource(0x041D, &5u32.to_be_bytes());
    let planes = [100u8, 150, 200, 0];
    let file = build_psd(1, 4, 1, 1, 8, 3, &ids, &[], 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(image.channels, 3);
    assert_eq!(image.pixel(0, 0), &[200, 150, 100]);
}

#[test]
fn cmyk_planes_stay_in_place_and_composite_over_black() {
    let planes = [10u8, 20, 30, 255]; // C, M, Y, K planes of a 1x1 image
    let file = build_psd(1, 4, 1, 1, 8, 4, &[], &[], 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(image.channels, 4);
    // Planes land as Y,M,C,K; K acts as the blend weight against black.
    assert_eq!(image.pixel(0, 0), &[30, 20, 10, 255]);
}

#[test]
fn version_info_without_merged_data_fails() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.push(0); // hasRealMergedData = false
    let res = resource(0x0421, &payload);
    let file = build_psd(1, 3, 1, 1, 8, 3, &res, &[], 0, &[1, 2, 3]);

    let err = PsdReader::new().read_from_memory(&file).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedHeader(_)));
}

#[test]
fn exif_resource_first_wins() {
    let mut res = Vec::new();
    res.extend_from_slice(&resource(0x0422, b"AAAA"));
    res.extend_from_slice(&resource(0x0423, b"BBBB"));
    let file = build_psd(1, 1, 1, 1, 8, 1, &res, &[], 0, &[42]);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    let exif = image.exif.unwrap();
    assert_eq!(exif.len(), 14);
    assert_eq!(&exif[..2], &[0xFF, 0xE1]);
    assert_eq!(u16::from_be_bytes([exif[2], exif[3]]), 4 + 8);
    assert_eq!(&exif[4..10], b"Exif\0\0");
    assert_eq!(&exif[10..], b"AAAA");
}

#[test]
fn broken_icc_profile_is_ignored() {
    // An unusable embedded profile must not fail the decode.
    let res = resource(0x040F, b"definitely not an ICC profile");
    let planes = [1u8, 2, 3];
    let file = build_psd(1, 3, 1, 1, 8, 3, &res, &[], 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(image.pixel(0, 0), &[3, 2, 1]);
}

#[test]
fn lab_document_converts_to_srgb() {
    // L = 255 (white), a = b = 128 (neutral).
    let planes = [255u8, 128, 128];
    let file = build_psd(1, 3, 1, 1, 8, 9, &[], &[], 0, &planes);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(image.channels, 3);
    let px = image.pixel(0, 0);
    assert!(px.iter().all(|&c| c > 239), "not near-white: {px:?}");
}

#[test]
fn sixteen_bit_rle_plane() {
    // Repeat run of two 16-bit 0xFFFF samples; table says 3 bytes.
    let data = [0x00, 0x03, 0xFF, 0xFF, 0xFF];
    let file = build_psd(1, 1, 2, 1, 16, 1, &[], &[], 1, &data);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(&image.pixels[..2], &[255, 255]);
}

#[test]
fn psb_uses_wide_rle_table() {
    // Version 2: 4-byte scanline counts and an 8-byte layer size.
    let data = [0x00, 0x00, 0x00, 0x03, 0x01, 0x08, 0x09];
    let file = build_psd(2, 1, 2, 1, 8, 1, &[], &[], 1, &data);

    let image = PsdReader::new().read_from_memory(&file).unwrap();
    assert_eq!(&image.pixels[..2], &[0x08, 0x09]);
}

#[test]
fn zip_compression_rejected() {
    let file = build_psd(1, 3, 1, 1, 8, 3, &[], &[], 2, &[0; 16]);
    let err = PsdReader::new().read_from_memory(&file).unwrap_err();
    assert!(matches!(err, DecodeError::Unsupported(_)));
    assert!(!err.is_out_of_memory());
}

#[test]
fn oversized_pixel_count_reports_out_of_memory() {
    let file = build_psd(1, 3, 25_000, 25_000, 8, 3, &[], &[], 0, &[]);
    let err = PsdReader::new().read_from_memory(&file).unwrap_err();
    assert!(err.is_out_of_memory());
}

#[test]
fn bad_signature_rejected() {
    let mut file = build_psd(1, 3, 1, 1, 8, 3, &[], &[], 0, &[1, 2, 3]);
    file[0] = b'9';
    let err = PsdReader::new().read_from_memory(&file).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedHeader(_)));
}

#[test]
fn stride_is_always_padded_to_four() {
    for width in 1..=9u32 {
        let data: Vec<u8> = (0..width as u8).collect();
        let file = build_psd(1, 1, width, 1, 8, 1, &[], &[], 0, &data);
        let image = PsdReader::new().read_from_memory(&file).unwrap();
        assert_eq!(image.stride, padded_stride(width, image.channels));
        assert_eq!(image.stride % 4, 0);
    }
}

#[test]
fn truncated_prefixes_never_decode() {
    let mut planes = Vec::new();
    planes.extend_from_slice(&[10, 11, 12, 13, 14, 15]);
    planes.extend_from_slice(&[20, 21, 22, 23, 24, 25]);
    planes.extend_from_slice(&[30, 31, 32, 33, 34, 35]);
    let file = build_psd(1, 3, 3, 2, 8, 3, &[], &[], 0, &planes);

    for len in 0..file.len() {
        assert!(
            PsdReader::new().read_from_memory(&file[..len]).is_err(),
            "prefix of {len} bytes decoded"
        );
    }
    assert!(PsdReader::new().read_from_memory(&file).is_ok());
}

#[test]
fn format_reader_sniffing() {
    let reader = PsdReader::new();
    assert_eq!(reader.format_name(), "PSD");
    assert!(reader.extensions().contains(&"psb"));
    assert!(reader.can_read(b"8BPS\x00\x01"));
    assert!(!reader.can_read(b"8BIM"));
}
