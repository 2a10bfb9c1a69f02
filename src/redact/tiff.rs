//! Redaction plans for baseline TIFF files, and the machinery the SVS plan
//! builds on.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use super::{can_write, RedactError, RedactionPlan, SaveOutcome};
use crate::rules::{ExpectedType, ImageAction, ImageRule, MetadataAction, MetadataRule, TiffRules};
use crate::sniff::FileFormat;
use crate::tags::{Tag, TagSet, Type};
use crate::tiff::ifd::{Entry, Ifd, TiffInfo, Value};
use crate::tiff::util::{associated_image_key, ifds_depth_first, is_tiled, iter_tag_entries};
use crate::tiff::write_tiff;

/// Identity of a tag entry in plan maps: the namespace it lives in plus its
/// id. A rule recorded for an id applies to that tag wherever it appears in
/// the tree.
pub(crate) type ElementId = (TagSet, u16);

/// A rule resolved against a concrete entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operation {
    Keep,
    Delete,
    Replace(String),
}

impl Operation {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Operation::Keep => "keep",
            Operation::Delete => "delete",
            Operation::Replace(_) => "replace",
        }
    }
}

/// Flavors the engine refuses outright.
pub(crate) fn reject_unsupported_flavors(info: &TiffInfo) -> Result<(), RedactError> {
    for ifd in ifds_depth_first(&info.ifds) {
        if ifd.contains(Tag::ImageJMetadata) || ifd.contains(Tag::ImageJMetadataByteCounts) {
            return Err(RedactError::UnsupportedFileType(
                "Redaction for ImageJ files is not supported".to_string(),
            ));
        }
        if ifd.contains(Tag::NdpiFormatFlag) {
            return Err(RedactError::UnsupportedFileType(
                "Redaction for NDPI files is not supported".to_string(),
            ));
        }
    }
    Ok(())
}

/// Record a rule for every tag entry in the tree, trying the tag's
/// canonical name first and then its alternates. Tags nothing admissible
/// matches accumulate in the no-match list.
pub(crate) fn build_metadata_steps(
    info: &TiffInfo,
    lookup: &dyn Fn(&str) -> Option<MetadataRule>,
    admits: &dyn Fn(&MetadataAction) -> bool,
) -> (HashMap<ElementId, MetadataRule>, Vec<ElementId>) {
    let mut steps: HashMap<ElementId, MetadataRule> = HashMap::new();
    let mut no_match: Vec<ElementId> = Vec::new();

    for tag_entry in iter_tag_entries(&info.ifds, TagSet::Baseline) {
        let id = (tag_entry.tag_set, tag_entry.tag_id);
        if steps.contains_key(&id) || no_match.contains(&id) {
            continue;
        }
        let matched = tag_entry
            .tag_set
            .names(tag_entry.tag_id)
            .into_iter()
            .find_map(|name| lookup(name).filter(|rule| admits(&rule.action)));
        match matched {
            Some(rule) => {
                steps.insert(id, rule);
            }
            None => no_match.push(id),
        }
    }

    (steps, no_match)
}

/// Schedule an image rule for every non-tiled IFD, classified through the
/// associated-image discovery and falling back to the `default` key.
pub(crate) fn build_image_steps(
    info: &TiffInfo,
    keys: &[&str],
    lookup: &dyn Fn(&str) -> Option<ImageRule>,
) -> Result<HashMap<u64, ImageRule>, RedactError> {
    let mut steps = HashMap::new();
    for ifd in ifds_depth_first(&info.ifds) {
        if is_tiled(ifd) {
            continue;
        }
        let key = associated_image_key(ifd, keys).unwrap_or_else(|| "default".to_string());
        let rule = lookup(&key).or_else(|| lookup("default")).ok_or_else(|| {
            RedactError::Configuration(format!(
                "no associated image rule for key `{key}` and no `default` rule"
            ))
        })?;
        debug!(ifd = ifd.offset, key = %rule.key_name, action = ?rule.action, "associated image");
        steps.insert(ifd.offset, rule);
    }
    Ok(steps)
}

pub(crate) fn passes_type_check(value: &Value, expected: ExpectedType, expected_count: u64) -> bool {
    match expected {
        ExpectedType::Integer => value.is_integer() && value.count() == expected_count,
        ExpectedType::Number => value.is_number() && value.count() == expected_count,
        ExpectedType::Text => value.as_ascii().is_some(),
        ExpectedType::Rational => {
            matches!(value, Value::Rationals(_) | Value::SignedRationals(_))
                && value.count() == expected_count
        }
    }
}

/// Resolve a rule against an entry. `check_type` collapses to keep or
/// delete here; actions with no meaning for a TIFF tag delete.
pub(crate) fn resolve_tag_operation(rule: &MetadataRule, entry: &Entry) -> Operation {
    match &rule.action {
        MetadataAction::Keep => Operation::Keep,
        MetadataAction::Delete => Operation::Delete,
        MetadataAction::Replace { new_value } => Operation::Replace(new_value.clone()),
        MetadataAction::CheckType {
            expected_type,
            expected_count,
        } => {
            if passes_type_check(&entry.value, *expected_type, *expected_count) {
                Operation::Keep
            } else {
                Operation::Delete
            }
        }
        _ => Operation::Delete,
    }
}

/// Phase A of execution: delete or replace associated images.
///
/// Sub-IFD lists are redacted before their parent is considered; pointer
/// entries left with no chains disappear with their last sub-IFD.
pub(crate) fn redact_associated_images(
    ifds: &mut Vec<Ifd>,
    steps: &HashMap<u64, ImageRule>,
) -> Result<(), RedactError> {
    for ifd in ifds.iter_mut() {
        let pointer_ids: Vec<u16> = ifd
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_pointer())
            .map(|(&id, _)| id)
            .collect();
        for id in pointer_ids {
            if let Some(entry) = ifd.entries.get_mut(&id) {
                for chain in entry.sub_ifds.iter_mut() {
                    redact_associated_images(chain, steps)?;
                }
                entry.sub_ifds.retain(|chain| !chain.is_empty());
                if entry.sub_ifds.is_empty() {
                    ifd.entries.remove(&id);
                }
            }
        }
    }

    for ifd in ifds.iter_mut() {
        if let Some(rule) = steps.get(&ifd.offset) {
            if let ImageAction::Replace { .. } = rule.action {
                *ifd = blank_image_ifd(ifd)?;
            }
        }
    }
    ifds.retain(|ifd| {
        !matches!(
            steps.get(&ifd.offset).map(|rule| &rule.action),
            Some(ImageAction::Delete)
        )
    });
    Ok(())
}

/// Build the zero-filled, baseline-JPEG replacement for an associated
/// image IFD.
///
/// Only ASCII-valued entries carry over from the old IFD; anything else
/// could change how a reader decodes the replacement (ICC profiles,
/// orientation, subsampling).
fn blank_image_ifd(old: &Ifd) -> Result<Ifd, RedactError> {
    let (width, height) = old.dimensions().ok_or(crate::error::TiffError::FormatError(
        crate::error::TiffFormatError::RequiredTagNotFound(
            TagSet::Baseline,
            Tag::ImageWidth.to_u16(),
        ),
    ))?;
    let width = u32::try_from(width).map_err(crate::error::TiffError::from)?;
    let height = u32::try_from(height).map_err(crate::error::TiffError::from)?;

    let blank = image::RgbImage::new(width, height);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 75).encode(
        blank.as_raw(),
        width,
        height,
        image::ExtendedColorType::Rgb8,
    )?;

    let mut ifd = Ifd::new();
    ifd.offset = old.offset;
    ifd.insert(Tag::ImageWidth, Entry::longs(vec![width]));
    ifd.insert(Tag::ImageLength, Entry::longs(vec![height]));
    ifd.insert(Tag::BitsPerSample, Entry::shorts(vec![8, 8, 8]));
    // New-style JPEG compression; the strip is one complete JFIF stream.
    ifd.insert(Tag::Compression, Entry::shorts(vec![7]));
    ifd.insert(Tag::PhotometricInterpretation, Entry::shorts(vec![6]));
    ifd.insert(Tag::YCbCrSubSampling, Entry::shorts(vec![2, 2]));
    ifd.insert(Tag::SamplesPerPixel, Entry::shorts(vec![3]));
    ifd.insert(Tag::RowsPerStrip, Entry::longs(vec![height]));
    ifd.insert(Tag::StripOffsets, Entry::longs(vec![0]));
    ifd.insert(
        Tag::StripByteCounts,
        Entry::longs(vec![u32::try_from(jpeg.len()).map_err(crate::error::TiffError::from)?]),
    );
    for (&id, entry) in &old.entries {
        if matches!(entry.value, Value::Ascii(_)) && !ifd.entries.contains_key(&id) {
            ifd.entries
                .insert(id, Entry::new(Type::ASCII, entry.value.clone()));
        }
    }
    ifd.chunk_data = Some(vec![jpeg]);
    Ok(ifd)
}

/// Phase B of execution: apply metadata steps to every non-pointer entry,
/// handing entries without a step to `unmatched` (the SVS description hook).
pub(crate) fn apply_tag_steps(
    ifds: &mut [Ifd],
    tag_set: TagSet,
    steps: &HashMap<ElementId, MetadataRule>,
    unmatched: &mut dyn FnMut(&mut Ifd, TagSet, u16),
) {
    for ifd in ifds.iter_mut() {
        let ids: Vec<u16> = ifd.entries.keys().copied().collect();
        for id in ids {
            let is_pointer = match ifd.entries.get(&id) {
                Some(entry) => entry.is_pointer(),
                None => continue,
            };
            if is_pointer {
                let pointed = tag_set.pointed_set(id);
                if let Some(entry) = ifd.entries.get_mut(&id) {
                    for chain in entry.sub_ifds.iter_mut() {
                        apply_tag_steps(chain, pointed, steps, unmatched);
                    }
                }
                continue;
            }
            match steps.get(&(tag_set, id)) {
                Some(rule) => {
                    let operation = match ifd.entries.get(&id) {
                        Some(entry) => resolve_tag_operation(rule, entry),
                        None => continue,
                    };
                    match operation {
                        Operation::Keep => {}
                        Operation::Delete => {
                            ifd.entries.remove(&id);
                        }
                        Operation::Replace(new_value) => {
                            if let Some(entry) = ifd.entries.get_mut(&id) {
                                entry.type_ = Type::ASCII;
                                entry.value = Value::Ascii(new_value);
                            }
                        }
                    }
                }
                None => unmatched(ifd, tag_set, id),
            }
        }
    }
}

/// The actions a rule may take on a TIFF tag entry. `modify_date` and the
/// DICOM-only actions belong to other namespaces; a rule carrying one of
/// them does not match a tag.
pub(crate) fn admits_tiff_tag(action: &MetadataAction) -> bool {
    matches!(
        action,
        MetadataAction::Keep
            | MetadataAction::Delete
            | MetadataAction::Replace { .. }
            | MetadataAction::CheckType { .. }
    )
}

/// The fully resolved decision set for one baseline TIFF file.
#[derive(Debug)]
pub struct TiffRedactionPlan {
    info: TiffInfo,
    metadata_steps: HashMap<ElementId, MetadataRule>,
    image_steps: HashMap<u64, ImageRule>,
    no_match_tags: Vec<ElementId>,
}

impl TiffRedactionPlan {
    pub fn new(info: TiffInfo, rules: &TiffRules) -> Result<TiffRedactionPlan, RedactError> {
        reject_unsupported_flavors(&info)?;
        let (metadata_steps, no_match_tags) = build_metadata_steps(
            &info,
            &|name| rules.metadata_rule(name),
            &admits_tiff_tag,
        );
        let image_steps =
            build_image_steps(&info, &rules.image_keys(), &|key| rules.image_rule(key))?;
        Ok(TiffRedactionPlan {
            info,
            metadata_steps,
            image_steps,
            no_match_tags,
        })
    }
}

impl RedactionPlan for TiffRedactionPlan {
    fn file_format(&self) -> FileFormat {
        FileFormat::Tiff
    }

    fn is_comprehensive(&self) -> bool {
        self.no_match_tags.is_empty()
    }

    fn missing_keys(&self) -> Vec<String> {
        self.no_match_tags
            .iter()
            .map(|(tag_set, id)| tag_set.describe(*id))
            .collect()
    }

    fn execute(&mut self) -> Result<(), RedactError> {
        redact_associated_images(&mut self.info.ifds, &self.image_steps)?;
        apply_tag_steps(
            &mut self.info.ifds,
            TagSet::Baseline,
            &self.metadata_steps,
            &mut |_, _, _| {},
        );
        Ok(())
    }

    fn save(&self, output: &Path, overwrite: bool) -> Result<SaveOutcome, RedactError> {
        if !can_write(&self.info.source, output, overwrite) {
            return Ok(SaveOutcome::SkippedExisting);
        }
        write_tiff(&self.info, output)?;
        Ok(SaveOutcome::Written)
    }

    fn report(&self) -> String {
        let mut out = String::from("Tiff Metadata Redaction Plan\n\n");
        for tag_entry in iter_tag_entries(&self.info.ifds, TagSet::Baseline) {
            let id = (tag_entry.tag_set, tag_entry.tag_id);
            if let Some(rule) = self.metadata_steps.get(&id) {
                if let Some(entry) = tag_entry.ifd.entries.get(&tag_entry.tag_id) {
                    let operation = resolve_tag_operation(rule, entry);
                    let _ = writeln!(
                        out,
                        "Tiff Tag {} - {}: {}",
                        tag_entry.tag_id,
                        rule.key_name,
                        operation.as_str()
                    );
                }
            }
        }
        if self.no_match_tags.is_empty() {
            out.push_str("\nThis redaction plan is comprehensive.\n");
        } else {
            out.push_str("\nThe following tags could not be redacted given the current set of rules:\n");
            for (tag_set, id) in &self.no_match_tags {
                let _ = writeln!(out, "Missing tag (tiff): {}", tag_set.describe(*id));
            }
        }
        let _ = writeln!(
            out,
            "\nFound {} associated image(s)",
            self.image_steps.len()
        );
        out
    }
}
