//! Redaction plans for Aperio (.svs) files.
//!
//! Redaction here is the TIFF plan plus a second metadata namespace: the
//! pipe-delimited payload Aperio stores in `ImageDescription`. Every IFD
//! carrying a description gets its keys matched against the
//! `image_description` table; the serialized result replaces the tag value
//! on execution. Under the strict profile the description layer is skipped
//! and the file is treated as a plain TIFF.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::NaiveDate;

use super::tiff::{
    admits_tiff_tag, apply_tag_steps, build_image_steps, build_metadata_steps,
    redact_associated_images, reject_unsupported_flavors, resolve_tag_operation, ElementId,
};
use super::{can_write, RedactError, RedactionPlan, SaveOutcome};
use crate::rules::{ImageRule, MetadataAction, MetadataRule, SvsRules};
use crate::sniff::FileFormat;
use crate::svs::{SvsDescription, SvsValue};
use crate::tags::{Tag, TagSet, Type};
use crate::tiff::ifd::{Ifd, TiffInfo, Value};
use crate::tiff::util::iter_tag_entries;
use crate::tiff::write_tiff;

/// Description keys admit everything a TIFF tag does plus `modify_date`;
/// the tag namespace itself keeps the TIFF admission set.
fn admits_description_key(action: &MetadataAction) -> bool {
    admits_tiff_tag(action) || matches!(action, MetadataAction::ModifyDate)
}

/// What a resolved description rule does to its key.
#[derive(Debug, Clone, PartialEq)]
enum DescriptionOperation {
    Keep,
    Delete,
    Replace(String),
}

fn resolve_description_operation(rule: &MetadataRule, value: &SvsValue) -> DescriptionOperation {
    match &rule.action {
        MetadataAction::Keep => DescriptionOperation::Keep,
        MetadataAction::Delete => DescriptionOperation::Delete,
        MetadataAction::Replace { new_value } => DescriptionOperation::Replace(new_value.clone()),
        MetadataAction::CheckType { expected_type, .. } => {
            use crate::rules::ExpectedType;
            let passes = match expected_type {
                ExpectedType::Integer => value.is_integer(),
                ExpectedType::Number => value.is_number(),
                ExpectedType::Text => value.as_text().is_some(),
                // Description values are scalars; nothing satisfies a
                // rational expectation.
                ExpectedType::Rational => false,
            };
            if passes {
                DescriptionOperation::Keep
            } else {
                DescriptionOperation::Delete
            }
        }
        MetadataAction::ModifyDate => match rule.key_name.as_str() {
            // Aperio writes its scan date as MM/DD/YY.
            "Date" => match NaiveDate::parse_from_str(&value.to_string(), "%m/%d/%y") {
                Ok(_) => {
                    let text = value.to_string();
                    match text.rsplit_once('/') {
                        Some((_, year)) => DescriptionOperation::Replace(format!("01/01/{year}")),
                        None => DescriptionOperation::Delete,
                    }
                }
                Err(_) => DescriptionOperation::Delete,
            },
            "Time" => DescriptionOperation::Replace("00:00:00".to_string()),
            "Time Zone" => DescriptionOperation::Replace("GMT+0000".to_string()),
            _ => DescriptionOperation::Delete,
        },
        _ => DescriptionOperation::Delete,
    }
}

fn redact_description(description: &mut SvsDescription, steps: &HashMap<String, MetadataRule>) {
    let keys: Vec<String> = description.keys().cloned().collect();
    for key in keys {
        let Some(rule) = steps.get(&key) else { continue };
        let Some(value) = description.get(&key).cloned() else {
            continue;
        };
        match resolve_description_operation(rule, &value) {
            DescriptionOperation::Keep => {}
            DescriptionOperation::Delete => {
                description.remove(&key);
            }
            DescriptionOperation::Replace(new_value) => {
                description.insert(&key, SvsValue::new(new_value));
            }
        }
    }
}

/// Parse, redact and re-serialize the description entry of one IFD.
fn redact_description_entry(ifd: &mut Ifd, steps: &HashMap<String, MetadataRule>) {
    let Some(text) = ifd.ascii_value(Tag::ImageDescription).map(str::to_string) else {
        return;
    };
    let mut description = SvsDescription::parse(&text);
    redact_description(&mut description, steps);
    if let Some(entry) = ifd.get_mut(Tag::ImageDescription) {
        entry.type_ = Type::ASCII;
        entry.value = Value::Ascii(description.to_string());
    }
}

/// The fully resolved decision set for one Aperio file.
#[derive(Debug)]
pub struct SvsRedactionPlan {
    info: TiffInfo,
    strict: bool,
    metadata_steps: HashMap<ElementId, MetadataRule>,
    image_steps: HashMap<u64, ImageRule>,
    no_match_tags: Vec<ElementId>,
    description_steps: HashMap<String, MetadataRule>,
    no_match_description_keys: Vec<String>,
}

impl SvsRedactionPlan {
    pub fn new(info: TiffInfo, rules: &SvsRules, strict: bool) -> Result<SvsRedactionPlan, RedactError> {
        reject_unsupported_flavors(&info)?;

        let (mut metadata_steps, no_match_tags) = build_metadata_steps(
            &info,
            &|name| rules.metadata_rule(name),
            &admits_tiff_tag,
        );
        let image_steps =
            build_image_steps(&info, &rules.image_keys(), &|key| rules.image_rule(key))?;

        let mut description_steps = HashMap::new();
        let mut no_match_description_keys: Vec<String> = Vec::new();

        // Strict mode treats the file as a plain TIFF: no description layer.
        if !strict {
            let description_id = (TagSet::Baseline, Tag::ImageDescription.to_u16());
            if !metadata_steps.contains_key(&description_id) {
                return Err(RedactError::MalformedAperioFile {
                    path: info.source.clone(),
                });
            }
            metadata_steps.remove(&description_id);

            for tag_entry in iter_tag_entries(&info.ifds, TagSet::Baseline) {
                if (tag_entry.tag_set, tag_entry.tag_id) != description_id {
                    continue;
                }
                let Some(text) = tag_entry.ifd.ascii_value(Tag::ImageDescription) else {
                    continue;
                };
                let description = SvsDescription::parse(text);
                for key in description.keys() {
                    if description_steps.contains_key(key)
                        || no_match_description_keys.contains(key)
                    {
                        continue;
                    }
                    match rules
                        .description_rule(key)
                        .filter(|rule| admits_description_key(&rule.action))
                    {
                        Some(rule) => {
                            description_steps.insert(key.clone(), rule);
                        }
                        None => no_match_description_keys.push(key.clone()),
                    }
                }
            }
        }

        Ok(SvsRedactionPlan {
            info,
            strict,
            metadata_steps,
            image_steps,
            no_match_tags,
            description_steps,
            no_match_description_keys,
        })
    }
}

impl RedactionPlan for SvsRedactionPlan {
    fn file_format(&self) -> FileFormat {
        FileFormat::Svs
    }

    fn is_comprehensive(&self) -> bool {
        self.no_match_tags.is_empty() && self.no_match_description_keys.is_empty()
    }

    fn missing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .no_match_tags
            .iter()
            .map(|(tag_set, id)| tag_set.describe(*id))
            .collect();
        keys.extend(self.no_match_description_keys.iter().cloned());
        keys
    }

    fn execute(&mut self) -> Result<(), RedactError> {
        redact_associated_images(&mut self.info.ifds, &self.image_steps)?;

        let strict = self.strict;
        let description_steps = &self.description_steps;
        apply_tag_steps(
            &mut self.info.ifds,
            TagSet::Baseline,
            &self.metadata_steps,
            &mut |ifd, tag_set, tag_id| {
                if !strict
                    && tag_set == TagSet::Baseline
                    && tag_id == Tag::ImageDescription.to_u16()
                {
                    redact_description_entry(ifd, description_steps);
                }
            },
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
        let mut out = String::from("Aperio (.svs) Metadata Redaction Plan\n\n");
        for tag_entry in iter_tag_entries(&self.info.ifds, TagSet::Baseline) {
            let id = (tag_entry.tag_set, tag_entry.tag_id);
            if !self.strict && id == (TagSet::Baseline, Tag::ImageDescription.to_u16()) {
                if let Some(text) = tag_entry.ifd.ascii_value(Tag::ImageDescription) {
                    let description = SvsDescription::parse(text);
                    for (key, value) in &description.metadata {
                        if let Some(rule) = self.description_steps.get(key) {
                            let operation = resolve_description_operation(rule, value);
                            let name = match operation {
                                DescriptionOperation::Keep => "keep",
                                DescriptionOperation::Delete => "delete",
                                DescriptionOperation::Replace(_) => "replace",
                            };
                            let _ = writeln!(out, "SVS Image Description - {key}: {name}");
                        }
                    }
                }
                continue;
            }
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
        if self.is_comprehensive() {
            out.push_str("\nThe redaction plan is comprehensive.\n");
        } else {
            if !self.no_match_tags.is_empty() {
                out.push_str("\nThe following tags could not be redacted given the current set of rules:\n");
                for (tag_set, id) in &self.no_match_tags {
                    let _ = writeln!(out, "Missing tag (tiff): {}", tag_set.describe(*id));
                }
            }
            if !self.no_match_description_keys.is_empty() {
                out.push_str(
                    "\nThe following keys were found in Aperio ImageDescription strings and could \
                     not be redacted given the current set of rules:\n",
                );
                for key in &self.no_match_description_keys {
                    let _ = writeln!(out, "Missing key (Aperio ImageDescription): {key}");
                }
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
