mod common;

use common::{tiled_chunk_bytes, tiled_ifd, write_fixture};
use imagedephi::redact::{build_redaction_plan, RedactError, SaveOutcome, UidMap};
use imagedephi::rules::{Profile, RuleSet};
use imagedephi::tags::{Tag, Type};
use imagedephi::tiff::{read_tiff, Entry, Value};

fn default_rules() -> RuleSet {
    RuleSet::layered(Profile::Default.base_rules(), None)
}

#[test]
fn redacts_descriptive_tags_and_preserves_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.tif");
    let output = dir.path().join("slide_redacted.tif");

    let pixels: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let mut primary = tiled_ifd(256, 256, Some("converted by large_image_converter"), &pixels);
    primary.insert(Tag::Artist, Entry::ascii("Dr. Jane Doe"));
    primary.insert(Tag::DateTime, Entry::ascii("2008:08:06 12:34:56"));
    primary.insert(Tag::Software, Entry::ascii("ScanScope Console 10.2"));
    write_fixture(&input, vec![primary]);

    let rules = default_rules();
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());

    plan.execute().unwrap();
    assert_eq!(plan.save(&output, false).unwrap(), SaveOutcome::Written);

    let redacted = read_tiff(&output).unwrap();
    let first = redacted.first_ifd().unwrap();
    assert_eq!(
        first.ascii_value(Tag::ImageDescription),
        Some("Redacted by ImageDePHI")
    );
    assert!(!first.contains(Tag::Artist));
    assert!(!first.contains(Tag::DateTime));
    assert!(!first.contains(Tag::Software));
    assert_eq!(first.long_value(Tag::ImageWidth), Some(256));

    assert_eq!(tiled_chunk_bytes(&output), pixels);
}

#[test]
fn unknown_tag_fails_the_comprehensiveness_gate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.tif");

    let mut primary = tiled_ifd(64, 64, Some("plain"), b"pixels");
    primary
        .entries
        .insert(39999, Entry::new(Type::ASCII, Value::Ascii("vendor".into())));
    write_fixture(&input, vec![primary]);

    let rules = default_rules();
    let mut uid_map = UidMap::new();
    let plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(!plan.is_comprehensive());
    assert_eq!(plan.missing_keys(), vec!["Tag 39999 (0x9C3F)".to_string()]);
}

#[test]
fn imagej_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stack.tif");

    let mut primary = tiled_ifd(64, 64, None, b"pixels");
    primary.insert(
        Tag::ImageJMetadata,
        Entry::new(Type::UNDEFINED, Value::Undefined(vec![0; 8])),
    );
    write_fixture(&input, vec![primary]);

    let rules = default_rules();
    let mut uid_map = UidMap::new();
    let err = build_redaction_plan(&input, &rules, &mut uid_map).unwrap_err();
    match err {
        RedactError::UnsupportedFileType(message) => {
            assert_eq!(message, "Redaction for ImageJ files is not supported")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn ndpi_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.tif");

    let mut primary = tiled_ifd(64, 64, None, b"pixels");
    primary.insert(Tag::NdpiFormatFlag, Entry::longs(vec![1]));
    write_fixture(&input, vec![primary]);

    let rules = default_rules();
    let mut uid_map = UidMap::new();
    let err = build_redaction_plan(&input, &rules, &mut uid_map).unwrap_err();
    assert!(matches!(err, RedactError::UnsupportedFileType(_)));
}

#[test]
fn keep_only_rules_round_trip_the_metadata_layer() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.tif");
    let output = dir.path().join("slide_out.tif");

    let pixels = b"tile bytes that must survive".to_vec();
    let primary = tiled_ifd(128, 128, Some("described"), &pixels);
    write_fixture(&input, vec![primary]);

    // Keep every tag present in the fixture.
    let override_rules: RuleSet = serde_yaml::from_str(
        "tiff:
  metadata:
    ImageWidth: {action: keep}
    ImageLength: {action: keep}
    BitsPerSample: {action: keep}
    Compression: {action: keep}
    PhotometricInterpretation: {action: keep}
    SamplesPerPixel: {action: keep}
    TileWidth: {action: keep}
    TileLength: {action: keep}
    TileOffsets: {action: keep}
    TileByteCounts: {action: keep}
    ImageDescription: {action: keep}
  associated_images:
    default: {action: keep}
",
    )
    .unwrap();
    let rules = RuleSet::layered(Profile::Default.base_rules(), Some(&override_rules));

    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive());
    plan.execute().unwrap();
    plan.save(&output, false).unwrap();

    let original = read_tiff(&input).unwrap();
    let redacted = read_tiff(&output).unwrap();
    assert_eq!(original.ifds.len(), redacted.ifds.len());
    let before = original.first_ifd().unwrap();
    let after = redacted.first_ifd().unwrap();
    assert_eq!(
        before.entries.keys().collect::<Vec<_>>(),
        after.entries.keys().collect::<Vec<_>>()
    );
    assert_eq!(
        before.ascii_value(Tag::ImageDescription),
        after.ascii_value(Tag::ImageDescription)
    );
    assert_eq!(tiled_chunk_bytes(&input), tiled_chunk_bytes(&output));
}

#[test]
fn overwrite_flag_guards_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.tif");
    let output = dir.path().join("out.tif");

    write_fixture(&input, vec![tiled_ifd(32, 32, Some("x"), b"data")]);
    std::fs::write(&output, b"already here").unwrap();

    let rules = default_rules();
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    plan.execute().unwrap();

    assert_eq!(
        plan.save(&output, false).unwrap(),
        SaveOutcome::SkippedExisting
    );
    assert_eq!(std::fs::read(&output).unwrap(), b"already here");

    assert_eq!(plan.save(&output, true).unwrap(), SaveOutcome::Written);
    assert_ne!(std::fs::read(&output).unwrap(), b"already here");
}
