//! Synthetic slide fixtures shared by the integration tests.
//!
//! Fixtures are built through the crate's own structural model and writer:
//! every IFD carries its chunk contents in memory, so a complete file can
//! be produced without a pre-existing source.

#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use imagedephi::tags::Tag;
use imagedephi::tiff::{read_tiff, write_tiff, ByteOrder, Entry, Ifd, TiffInfo};
use imagedephi::tiff::util::{ifds_depth_first, is_tiled};

/// A tiled (primary) IFD with one tile of opaque pixel bytes.
pub fn tiled_ifd(width: u32, height: u32, description: Option<&str>, pixels: &[u8]) -> Ifd {
    let mut ifd = Ifd::new();
    ifd.insert(Tag::ImageWidth, Entry::longs(vec![width]));
    ifd.insert(Tag::ImageLength, Entry::longs(vec![height]));
    ifd.insert(Tag::BitsPerSample, Entry::shorts(vec![8, 8, 8]));
    ifd.insert(Tag::Compression, Entry::shorts(vec![7]));
    ifd.insert(Tag::PhotometricInterpretation, Entry::shorts(vec![6]));
    ifd.insert(Tag::SamplesPerPixel, Entry::shorts(vec![3]));
    ifd.insert(Tag::TileWidth, Entry::longs(vec![width]));
    ifd.insert(Tag::TileLength, Entry::longs(vec![height]));
    ifd.insert(Tag::TileOffsets, Entry::longs(vec![0]));
    ifd.insert(Tag::TileByteCounts, Entry::longs(vec![pixels.len() as u32]));
    if let Some(description) = description {
        ifd.insert(Tag::ImageDescription, Entry::ascii(description));
    }
    ifd.chunk_data = Some(vec![pixels.to_vec()]);
    ifd
}

/// A non-tiled (associated) IFD with one strip of opaque pixel bytes.
pub fn stripped_ifd(width: u32, height: u32, pixels: &[u8]) -> Ifd {
    let mut ifd = Ifd::new();
    ifd.insert(Tag::ImageWidth, Entry::longs(vec![width]));
    ifd.insert(Tag::ImageLength, Entry::longs(vec![height]));
    ifd.insert(Tag::BitsPerSample, Entry::shorts(vec![8, 8, 8]));
    ifd.insert(Tag::Compression, Entry::shorts(vec![1]));
    ifd.insert(Tag::PhotometricInterpretation, Entry::shorts(vec![2]));
    ifd.insert(Tag::SamplesPerPixel, Entry::shorts(vec![3]));
    ifd.insert(Tag::RowsPerStrip, Entry::longs(vec![height]));
    ifd.insert(Tag::StripOffsets, Entry::longs(vec![0]));
    ifd.insert(Tag::StripByteCounts, Entry::longs(vec![pixels.len() as u32]));
    ifd.chunk_data = Some(vec![pixels.to_vec()]);
    ifd
}

/// Write a classic little-endian TIFF assembled from `ifds` to `path`.
pub fn write_fixture(path: &Path, ifds: Vec<Ifd>) {
    let info = TiffInfo {
        source: path.to_path_buf(),
        byte_order: ByteOrder::LittleEndian,
        big_tiff: false,
        ifds,
    };
    write_tiff(&info, path).expect("fixture must serialize");
}

/// The concatenated strip/tile regions of every tiled IFD in `path`, in
/// document order. Used to assert pixel preservation.
pub fn tiled_chunk_bytes(path: &Path) -> Vec<u8> {
    let info = read_tiff(path).expect("fixture must parse");
    let mut file = File::open(path).expect("fixture must open");
    let mut bytes = Vec::new();
    for ifd in ifds_depth_first(&info.ifds) {
        if !is_tiled(ifd) {
            continue;
        }
        let offsets = ifd
            .get(Tag::TileOffsets)
            .expect("tiled IFD must have offsets")
            .value
            .as_u64s()
            .unwrap();
        let counts = ifd
            .get(Tag::TileByteCounts)
            .expect("tiled IFD must have byte counts")
            .value
            .as_u64s()
            .unwrap();
        for (offset, count) in offsets.into_iter().zip(counts) {
            let mut chunk = vec![0u8; count as usize];
            file.seek(SeekFrom::Start(offset)).unwrap();
            file.read_exact(&mut chunk).unwrap();
            bytes.extend_from_slice(&chunk);
        }
    }
    bytes
}

/// A minimal DICOM WSI volume instance covered by the base rules.
pub fn write_dicom_fixture(path: &Path, series_uid: &str, sop_uid: &str) {
    use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

    let object = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::IMAGE_TYPE,
            VR::CS,
            dicom_value!(Strs, ["ORIGINAL", "PRIMARY", "VOLUME", "NONE"]),
        ),
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.77.1.6"),
        ),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)),
        DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(series_uid),
        ),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("SM")),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JANE")),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(64_u16)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(64_u16)),
    ]);
    object
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.77.1.6")
                .media_storage_sop_instance_uid(sop_uid)
                .transfer_syntax("1.2.840.10008.1.2.1"),
        )
        .expect("file meta must build")
        .write_to_file(path)
        .expect("fixture must write");
}

/// An Aperio-style description carrying the keys the base rules know.
pub fn aperio_description() -> String {
    "Aperio Image Library v12.0.15\r\n10000x8000 (256x256) JPEG/RGB Q=30\
     |AppMag = 20|MPP = 0.4990|Date = 08/06/08|Time = 12:34:56\
     |Time Zone = GMT-0500|User = 1b2c3d4e|ScanScope ID = SS1302"
        .to_string()
}
