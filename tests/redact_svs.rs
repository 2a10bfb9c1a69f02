mod common;

use common::{aperio_description, stripped_ifd, tiled_chunk_bytes, tiled_ifd, write_fixture};
use imagedephi::redact::{build_redaction_plan, RedactError, UidMap};
use imagedephi::rules::{Profile, RuleSet};
use imagedephi::svs::SvsDescription;
use imagedephi::tags::Tag;
use imagedephi::tiff::util::is_tiled;
use imagedephi::tiff::{read_tiff, Entry, Ifd};

fn macro_ifd() -> Ifd {
    let mut ifd = stripped_ifd(200, 100, b"macro pixels");
    ifd.insert(Tag::ImageDescription, Entry::ascii("Aperio macro image"));
    ifd
}

fn label_ifd() -> Ifd {
    let mut ifd = stripped_ifd(120, 120, b"label pixels");
    ifd.insert(Tag::NewSubfileType, Entry::longs(vec![1]));
    ifd
}

fn svs_fixture(dir: &std::path::Path, pixels: &[u8]) -> std::path::PathBuf {
    let input = dir.join("slide.svs");
    let primary = tiled_ifd(512, 512, Some(&aperio_description()), pixels);
    write_fixture(&input, vec![primary, macro_ifd(), label_ifd()]);
    input
}

#[test]
fn dates_profile_fuzzes_the_description() {
    let dir = tempfile::tempdir().unwrap();
    let pixels = b"svs tile data".to_vec();
    let input = svs_fixture(dir.path(), &pixels);
    let output = dir.path().join("out.svs");

    let rules = RuleSet::layered(Profile::Dates.base_rules(), None);
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());
    plan.execute().unwrap();
    plan.save(&output, false).unwrap();

    let redacted = read_tiff(&output).unwrap();
    let description = SvsDescription::parse(
        redacted
            .first_ifd()
            .unwrap()
            .ascii_value(Tag::ImageDescription)
            .unwrap(),
    );
    assert_eq!(description.get("Date").unwrap().to_string(), "01/01/08");
    assert_eq!(description.get("Time").unwrap().to_string(), "00:00:00");
    assert_eq!(description.get("Time Zone").unwrap().to_string(), "GMT+0000");
    // Deletions and keeps from the base layer still apply.
    assert!(description.get("User").is_none());
    assert_eq!(description.get("AppMag").unwrap().to_string(), "20");

    assert_eq!(tiled_chunk_bytes(&output), pixels);
}

#[test]
fn dates_profile_still_deletes_the_date_time_tag() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.svs");
    let output = dir.path().join("out.svs");

    // A normal Aperio file carries both the TIFF DateTime tag and the
    // description-embedded dates; modify_date only applies to the latter.
    let mut primary = tiled_ifd(512, 512, Some(&aperio_description()), b"pixels");
    primary.insert(Tag::DateTime, Entry::ascii("2008:08:06 12:34:56"));
    write_fixture(&input, vec![primary]);

    let rules = RuleSet::layered(Profile::Dates.base_rules(), None);
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());
    plan.execute().unwrap();
    plan.save(&output, false).unwrap();

    let redacted = read_tiff(&output).unwrap();
    let first = redacted.first_ifd().unwrap();
    assert!(!first.contains(Tag::DateTime));
    let description =
        SvsDescription::parse(first.ascii_value(Tag::ImageDescription).unwrap());
    assert_eq!(description.get("Date").unwrap().to_string(), "01/01/08");
}

#[test]
fn default_profile_drops_macro_and_label_images() {
    let dir = tempfile::tempdir().unwrap();
    let input = svs_fixture(dir.path(), b"pixels");
    let output = dir.path().join("out.svs");

    let rules = RuleSet::layered(Profile::Default.base_rules(), None);
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());
    plan.execute().unwrap();
    plan.save(&output, false).unwrap();

    let redacted = read_tiff(&output).unwrap();
    assert_eq!(redacted.ifds.len(), 1);
    assert!(is_tiled(redacted.first_ifd().unwrap()));
}

#[test]
fn macro_can_be_replaced_with_a_blank_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = svs_fixture(dir.path(), b"pixels");
    let output = dir.path().join("out.svs");

    let override_rules: RuleSet = serde_yaml::from_str(
        "svs:
  associated_images:
    macro: {action: replace, replace_with: blank_image}
",
    )
    .unwrap();
    let rules = RuleSet::layered(Profile::Default.base_rules(), Some(&override_rules));

    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());
    plan.execute().unwrap();
    plan.save(&output, false).unwrap();

    let redacted = read_tiff(&output).unwrap();
    // Primary plus the replaced macro; the label is still deleted.
    assert_eq!(redacted.ifds.len(), 2);
    let replacement = &redacted.ifds[1];
    assert_eq!(replacement.dimensions(), Some((200, 100)));
    // JPEG baseline blank strip, starting with the SOI marker.
    let offsets = replacement
        .get(Tag::StripOffsets)
        .unwrap()
        .value
        .as_u64s()
        .unwrap();
    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(
        &bytes[offsets[0] as usize..offsets[0] as usize + 2],
        &[0xFF, 0xD8]
    );
    // The ASCII description survives; the redacted value comes from the
    // metadata phase running over the replacement too.
    assert!(replacement.ascii_value(Tag::ImageDescription).is_some());
}

#[test]
fn svs_without_description_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.svs");
    // The sniffer calls it TIFF; an Aperio token is needed for the SVS
    // path, so fabricate one on a later IFD while the first has none.
    let primary = tiled_ifd(64, 64, None, b"pixels");
    write_fixture(&input, vec![primary]);

    let rules = RuleSet::layered(Profile::Default.base_rules(), None);
    let mut uid_map = UidMap::new();
    // Without any description this reads as plain TIFF and must succeed.
    assert!(build_redaction_plan(&input, &rules, &mut uid_map).is_ok());

    // An Aperio description on the first IFD that the rule set does not
    // anchor is the malformed case.
    let override_rules: RuleSet = serde_yaml::from_str(
        "svs:
  metadata:
    ImageDescription: {action: replace_uid}
",
    )
    .unwrap();
    let strict_anchor_missing = RuleSet::layered(Profile::Default.base_rules(), Some(&override_rules));
    let with_description = dir.path().join("aperio.svs");
    write_fixture(
        &with_description,
        vec![tiled_ifd(64, 64, Some("Aperio Image Library"), b"pixels")],
    );
    let err = build_redaction_plan(&with_description, &strict_anchor_missing, &mut uid_map)
        .unwrap_err();
    assert!(matches!(err, RedactError::MalformedAperioFile { .. }));
}

#[test]
fn strict_profile_skips_the_description_layer() {
    let dir = tempfile::tempdir().unwrap();
    // Unknown description keys would fail the gate if parsed; strict mode
    // must not parse them.
    let input = dir.path().join("slide.svs");
    let description = "Aperio Image Library v12\
                       |TotallyUnknownKey = 5|Date = 08/06/08";
    let primary = tiled_ifd(256, 256, Some(description), b"pixels");
    write_fixture(&input, vec![primary, label_ifd()]);

    let rules = RuleSet::layered(Profile::Strict.base_rules(), None);
    let mut uid_map = UidMap::new();
    let mut plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(plan.is_comprehensive(), "missing: {:?}", plan.missing_keys());
    plan.execute().unwrap();

    let output = dir.path().join("out.svs");
    plan.save(&output, false).unwrap();
    let redacted = read_tiff(&output).unwrap();
    // The strict table deletes the description tag outright, and the label
    // image with it.
    assert_eq!(redacted.ifds.len(), 1);
    assert!(!redacted.first_ifd().unwrap().contains(Tag::ImageDescription));
}

#[test]
fn strict_override_replaces_rule_tables_wholesale() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("slide.tif");
    let primary = tiled_ifd(64, 64, None, b"pixels");
    write_fixture(&input, vec![primary]);

    // A strict override whose table does not cover the fixture's tags
    // makes the plan incomprehensive even though the base table covers
    // them: the base tables are ignored.
    let override_rules: RuleSet = serde_yaml::from_str(
        "strict: true
tiff:
  metadata:
    ImageWidth: {action: keep}
  associated_images:
    default: {action: delete}
",
    )
    .unwrap();
    let rules = RuleSet::layered(Profile::Strict.base_rules(), Some(&override_rules));

    let mut uid_map = UidMap::new();
    let plan = build_redaction_plan(&input, &rules, &mut uid_map).unwrap();
    assert!(!plan.is_comprehensive());
    let missing = plan.missing_keys();
    assert!(missing.contains(&"ImageLength".to_string()));
    assert!(!missing.contains(&"ImageWidth".to_string()));
}
