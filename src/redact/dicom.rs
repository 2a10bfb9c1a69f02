//! Redaction plans for DICOM WSI files.
//!
//! Each plan works on a single `.dcm` file loaded fully into memory.
//! Elements are visited depth first; sequence items come before the
//! sequence element itself, so deleting a whole sequence never races its
//! contents. The batch's UID map is borrowed mutably so identifiers stay
//! consistent across every file of a run.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use dicom_core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom_core::header::Header;
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, DicomValue, PrimitiveValue, Tag as DicomTag, VR};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use dicom_object::mem::InMemElement;
use dicom_object::{open_file, FileDicomObject, InMemDicomObject};

use super::{can_write, RedactError, RedactionPlan, SaveOutcome, UidMap};
use crate::rules::{DicomRules, ImageAction, ImageRule, MetadataAction, MetadataRule};
use crate::sniff::FileFormat;

/// Key under which odd-group elements are recorded when the rule set's
/// custom metadata action supplies their fate.
const CUSTOM_METADATA_KEY: &str = "CustomMetadataItem";

/// The VR classes the dummy-replacement and type-check tables dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VrClass {
    Str,
    Float,
    Int,
    List,
    Bytes,
    Other,
}

fn vr_class(vr: VR) -> VrClass {
    use VR::*;
    match vr {
        AE | AS | CS | DA | DS | DT | IS | LO | LT | PN | SH | ST | TM | UC | UI | UR | UT => {
            VrClass::Str
        }
        FL | FD => VrClass::Float,
        AT | SL | SS | UL | US | SV | UV => VrClass::Int,
        SQ => VrClass::List,
        OB | OD | OF | OL | OV | OW | UN => VrClass::Bytes,
        _ => VrClass::Other,
    }
}

/// The VR-appropriate neutral value for `replace_dummy`.
fn dummy_element(tag: DicomTag, vr: VR) -> InMemElement {
    match vr_class(vr) {
        VrClass::Str => DataElement::new(tag, vr, PrimitiveValue::from("")),
        VrClass::Float => match vr {
            VR::FL => DataElement::new(tag, vr, PrimitiveValue::from(0.0_f32)),
            _ => DataElement::new(tag, vr, PrimitiveValue::from(0.0_f64)),
        },
        VrClass::Int => match vr {
            VR::US => DataElement::new(tag, vr, PrimitiveValue::from(0_u16)),
            VR::SS => DataElement::new(tag, vr, PrimitiveValue::from(0_i16)),
            VR::UL => DataElement::new(tag, vr, PrimitiveValue::from(0_u32)),
            VR::UV => DataElement::new(tag, vr, PrimitiveValue::from(0_u64)),
            VR::SV => DataElement::new(tag, vr, PrimitiveValue::from(0_i64)),
            _ => DataElement::new(tag, vr, PrimitiveValue::from(0_i32)),
        },
        VrClass::List => DataElement::new(
            tag,
            vr,
            DicomValue::Sequence(DataSetSequence::from(Vec::<InMemDicomObject>::new())),
        ),
        VrClass::Bytes | VrClass::Other => {
            DataElement::new(tag, vr, PrimitiveValue::from(Vec::<u8>::new()))
        }
    }
}

/// Whether the element's value is an instance of its VR's expected kind.
///
/// An unclassifiable VR fails the check; `check_type` then deletes, the
/// conservative reading.
fn passes_vr_check(element: &InMemElement) -> bool {
    let class = vr_class(element.vr());
    match element.value() {
        DicomValue::Primitive(primitive) => match class {
            VrClass::Str => matches!(
                primitive,
                PrimitiveValue::Str(_)
                    | PrimitiveValue::Strs(_)
                    | PrimitiveValue::Date(_)
                    | PrimitiveValue::Time(_)
                    | PrimitiveValue::DateTime(_)
            ),
            VrClass::Float => {
                matches!(primitive, PrimitiveValue::F32(_) | PrimitiveValue::F64(_))
            }
            VrClass::Int => matches!(
                primitive,
                PrimitiveValue::U8(_)
                    | PrimitiveValue::I16(_)
                    | PrimitiveValue::U16(_)
                    | PrimitiveValue::I32(_)
                    | PrimitiveValue::U32(_)
                    | PrimitiveValue::I64(_)
                    | PrimitiveValue::U64(_)
                    | PrimitiveValue::Tags(_)
            ),
            VrClass::Bytes => matches!(primitive, PrimitiveValue::U8(_)),
            VrClass::List | VrClass::Other => false,
        },
        DicomValue::Sequence(_) => class == VrClass::List,
        DicomValue::PixelSequence(_) => class == VrClass::Bytes,
    }
}

fn keyword_for_tag(tag: DicomTag) -> Option<String> {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias().to_string())
}

/// Visit every element depth first, sequence items before the sequence
/// element itself.
fn walk_elements(dataset: &InMemDicomObject, visit: &mut dyn FnMut(&InMemElement)) {
    for element in dataset {
        if let DicomValue::Sequence(sequence) = element.value() {
            for item in sequence.items() {
                walk_elements(item, visit);
            }
        }
        visit(element);
    }
}

/// Classify the slide by the third component of `ImageType`. Files without
/// one count as the primary volume.
fn image_type_key(object: &FileDicomObject<InMemDicomObject>) -> String {
    let Ok(element) = object.element(tags::IMAGE_TYPE) else {
        return "volume".to_string();
    };
    let mut values: Vec<String> = match element.value() {
        DicomValue::Primitive(primitive) => {
            primitive.to_multi_str().iter().map(String::from).collect()
        }
        _ => Vec::new(),
    };
    if values.len() == 1 && values[0].contains('\\') {
        values = values[0].split('\\').map(str::to_string).collect();
    }
    values
        .get(2)
        .map(|component| component.trim().to_lowercase())
        .unwrap_or_else(|| "volume".to_string())
}

/// The fully resolved decision set for one DICOM file.
#[derive(Debug)]
pub struct DicomRedactionPlan<'a> {
    path: PathBuf,
    object: FileDicomObject<InMemDicomObject>,
    steps: HashMap<DicomTag, MetadataRule>,
    no_match_tags: Vec<DicomTag>,
    image_rule: ImageRule,
    uid_map: &'a mut UidMap,
}

impl<'a> DicomRedactionPlan<'a> {
    pub fn new(
        path: &Path,
        rules: &DicomRules,
        uid_map: &'a mut UidMap,
    ) -> Result<DicomRedactionPlan<'a>, RedactError> {
        let object = open_file(path).map_err(|source| RedactError::DicomRead {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;

        // The classification comes from the file's own ImageType value, so
        // a miss here is a per-file failure, not a configuration error.
        let image_kind = image_type_key(&object);
        let image_rule = rules
            .image_rule(&image_kind)
            .ok_or(RedactError::MissingImageRule(image_kind))?;
        if let ImageAction::Replace { .. } = image_rule.action {
            return Err(RedactError::NotImplemented(format!(
                "image replacement for DICOM images (rule `{}`)",
                image_rule.key_name
            )));
        }

        let custom_action = rules.effective_custom_metadata_action();
        let mut steps: HashMap<DicomTag, MetadataRule> = HashMap::new();
        let mut no_match_tags: Vec<DicomTag> = Vec::new();
        walk_elements(&object, &mut |element| {
            let tag = element.tag();
            if steps.contains_key(&tag) || no_match_tags.contains(&tag) {
                return;
            }
            let rule = keyword_for_tag(tag)
                .and_then(|keyword| rules.metadata_rule(&keyword))
                .or_else(|| {
                    rules.metadata_rule(&format!("({:04X},{:04X})", tag.group(), tag.element()))
                })
                .or_else(|| {
                    rules.metadata_rule(&format!("({:04x},{:04x})", tag.group(), tag.element()))
                });
            match rule {
                Some(rule) => {
                    steps.insert(tag, rule);
                }
                None if tag.group() % 2 == 1 => {
                    use crate::rules::CustomMetadataAction;
                    match custom_action {
                        CustomMetadataAction::Keep => {
                            steps.insert(
                                tag,
                                MetadataRule {
                                    key_name: CUSTOM_METADATA_KEY.to_string(),
                                    action: MetadataAction::Keep,
                                },
                            );
                        }
                        CustomMetadataAction::Delete => {
                            steps.insert(
                                tag,
                                MetadataRule {
                                    key_name: CUSTOM_METADATA_KEY.to_string(),
                                    action: MetadataAction::Delete,
                                },
                            );
                        }
                        CustomMetadataAction::UseRule => no_match_tags.push(tag),
                    }
                }
                None => no_match_tags.push(tag),
            }
        });

        Ok(DicomRedactionPlan {
            path: path.to_path_buf(),
            object,
            steps,
            no_match_tags,
            image_rule,
            uid_map,
        })
    }

    /// The resolved operation name for reporting.
    fn operation_name(rule: &MetadataRule, element: &InMemElement) -> &'static str {
        match &rule.action {
            MetadataAction::Keep => "keep",
            MetadataAction::Delete => "delete",
            MetadataAction::Empty => "empty",
            MetadataAction::Replace { .. } => "replace",
            MetadataAction::ReplaceUid => "replace_uid",
            MetadataAction::ReplaceDummy => "replace_dummy",
            MetadataAction::ModifyDate => "modify_date",
            MetadataAction::CheckType { .. } => {
                if passes_vr_check(element) {
                    "keep"
                } else {
                    "delete"
                }
            }
        }
    }
}

fn redact_dataset(
    dataset: &mut InMemDicomObject,
    steps: &HashMap<DicomTag, MetadataRule>,
    uid_map: &mut UidMap,
) -> Result<(), RedactError> {
    let snapshot: Vec<DicomTag> = (&*dataset).into_iter().map(|element| element.tag()).collect();
    for tag in snapshot {
        // Leaf first: rebuild sequence items before the sequence's own rule
        // runs, so a deletion of the sequence is final.
        let sequence_parts = match dataset.element(tag) {
            Ok(element) => match element.value() {
                DicomValue::Sequence(sequence) => {
                    Some((element.vr(), sequence.items().to_vec()))
                }
                _ => None,
            },
            Err(_) => continue,
        };
        if let Some((vr, mut items)) = sequence_parts {
            for item in items.iter_mut() {
                redact_dataset(item, steps, uid_map)?;
            }
            dataset.put(DataElement::new(
                tag,
                vr,
                DicomValue::Sequence(DataSetSequence::from(items)),
            ));
        }

        let Some(rule) = steps.get(&tag) else { continue };
        apply_element_rule(dataset, tag, rule, uid_map)?;
    }
    Ok(())
}

fn apply_element_rule(
    dataset: &mut InMemDicomObject,
    tag: DicomTag,
    rule: &MetadataRule,
    uid_map: &mut UidMap,
) -> Result<(), RedactError> {
    let Ok(element) = dataset.element(tag) else {
        return Ok(());
    };
    let element = element.clone();
    let vr = element.vr();

    match &rule.action {
        MetadataAction::Keep => {}
        MetadataAction::Delete => {
            dataset.remove_element(tag);
        }
        MetadataAction::Replace { new_value } => {
            dataset.put(DataElement::new(
                tag,
                vr,
                PrimitiveValue::from(new_value.as_str()),
            ));
        }
        MetadataAction::Empty => {
            dataset.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
        }
        MetadataAction::ReplaceUid => {
            let current = element
                .to_str()
                .map(|value| value.into_owned())
                .unwrap_or_default();
            let replacement = uid_map.get_or_mint(current.trim_end_matches('\0'));
            dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(replacement)));
        }
        MetadataAction::ReplaceDummy => {
            dataset.put(dummy_element(tag, vr));
        }
        MetadataAction::CheckType { .. } => {
            if !passes_vr_check(&element) {
                dataset.remove_element(tag);
            }
        }
        MetadataAction::ModifyDate => {
            let current = element
                .to_str()
                .map(|value| value.into_owned())
                .unwrap_or_default();
            match fuzzed_date_value(vr, &current) {
                Some(fuzzed) => {
                    dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(fuzzed)));
                }
                None => {
                    dataset.remove_element(tag);
                }
            }
        }
    }
    Ok(())
}

/// The fuzzed replacement for a date-bearing value: year-only for dates,
/// midnight for times, a zero offset for timezones. `None` deletes.
fn fuzzed_date_value(vr: VR, current: &str) -> Option<String> {
    match vr {
        VR::DA | VR::DT => {
            let year: String = current.chars().take(4).collect();
            if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
                Some(match vr {
                    VR::DA => format!("{year}0101"),
                    _ => format!("{year}0101000000"),
                })
            } else {
                None
            }
        }
        VR::TM => Some("00".to_string()),
        VR::SH => Some("+0000".to_string()),
        _ => None,
    }
}

impl RedactionPlan for DicomRedactionPlan<'_> {
    fn file_format(&self) -> FileFormat {
        FileFormat::Dicom
    }

    fn is_comprehensive(&self) -> bool {
        self.no_match_tags.is_empty()
    }

    fn missing_keys(&self) -> Vec<String> {
        self.no_match_tags
            .iter()
            .map(|tag| {
                keyword_for_tag(*tag).unwrap_or_else(|| {
                    format!("({:04X},{:04X})", tag.group(), tag.element())
                })
            })
            .collect()
    }

    fn execute(&mut self) -> Result<(), RedactError> {
        if matches!(self.image_rule.action, ImageAction::Delete) {
            // The whole file is scheduled for deletion; no output is
            // written, so there is nothing to redact.
            return Ok(());
        }
        redact_dataset(&mut self.object, &self.steps, self.uid_map)
    }

    fn save(&self, output: &Path, overwrite: bool) -> Result<SaveOutcome, RedactError> {
        if matches!(self.image_rule.action, ImageAction::Delete) {
            return Ok(SaveOutcome::SkippedImageRule);
        }
        if !can_write(&self.path, output, overwrite) {
            return Ok(SaveOutcome::SkippedExisting);
        }
        self.object
            .write_to_file(output)
            .map_err(|source| RedactError::DicomWrite {
                path: output.to_path_buf(),
                source: Box::new(source),
            })?;
        Ok(SaveOutcome::Written)
    }

    fn report(&self) -> String {
        let mut out = String::from("DICOM Metadata Redaction Plan\n\n");
        let _ = writeln!(
            out,
            "Image type rule: {} - {:?}",
            self.image_rule.key_name, self.image_rule.action
        );
        walk_elements(&self.object, &mut |element| {
            let tag = element.tag();
            if let Some(rule) = self.steps.get(&tag) {
                let _ = writeln!(
                    out,
                    "DICOM Tag {} - {}: {}",
                    tag,
                    rule.key_name,
                    Self::operation_name(rule, element)
                );
            }
        });
        if self.no_match_tags.is_empty() {
            out.push_str("\nThis redaction plan is comprehensive.\n");
        } else {
            out.push_str("\nThe following tags could not be redacted given the current set of rules:\n");
            for key in self.missing_keys() {
                let _ = writeln!(out, "Missing tag (dicom): {key}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vr_classes_cover_the_dummy_table() {
        assert_eq!(vr_class(VR::PN), VrClass::Str);
        assert_eq!(vr_class(VR::DA), VrClass::Str);
        assert_eq!(vr_class(VR::FD), VrClass::Float);
        assert_eq!(vr_class(VR::US), VrClass::Int);
        assert_eq!(vr_class(VR::SQ), VrClass::List);
        assert_eq!(vr_class(VR::OB), VrClass::Bytes);
    }

    #[test]
    fn dummy_values_match_vr_class() {
        let text = dummy_element(tags::PATIENT_NAME, VR::PN);
        assert_eq!(text.to_str().unwrap(), "");

        let number = dummy_element(tags::SERIES_NUMBER, VR::US);
        assert_eq!(number.to_str().unwrap(), "0");
    }

    #[test]
    fn fuzzed_dates_keep_the_year() {
        assert_eq!(
            fuzzed_date_value(VR::DA, "20080806"),
            Some("20080101".to_string())
        );
        assert_eq!(
            fuzzed_date_value(VR::DT, "20080806123456"),
            Some("20080101000000".to_string())
        );
        assert_eq!(fuzzed_date_value(VR::TM, "123456"), Some("00".to_string()));
        assert_eq!(fuzzed_date_value(VR::SH, "-0500"), Some("+0000".to_string()));
        assert_eq!(fuzzed_date_value(VR::DA, "June 8th"), None);
    }

    #[test]
    fn walk_visits_sequence_items_before_the_sequence() {
        let item = InMemDicomObject::from_element_iter([DataElement::new(
            tags::SPECIMEN_IDENTIFIER,
            VR::LO,
            PrimitiveValue::from("S-1"),
        )]);
        let dataset = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SPECIMEN_DESCRIPTION_SEQUENCE,
                VR::SQ,
                DicomValue::Sequence(DataSetSequence::from(vec![item])),
            ),
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JANE")),
        ]);

        let mut seen = Vec::new();
        walk_elements(&dataset, &mut |element| seen.push(element.tag()));
        let sequence_pos = seen
            .iter()
            .position(|&t| t == tags::SPECIMEN_DESCRIPTION_SEQUENCE)
            .unwrap();
        let item_pos = seen
            .iter()
            .position(|&t| t == tags::SPECIMEN_IDENTIFIER)
            .unwrap();
        assert!(item_pos < sequence_pos);
    }

    #[test]
    fn uid_replacement_is_stable_within_a_map() {
        let mut uid_map = UidMap::new();
        let first = uid_map.get_or_mint("1.2.3");
        let second = uid_map.get_or_mint("1.2.3");
        let other = uid_map.get_or_mint("1.2.4");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.starts_with("2.25."));
        assert!(first["2.25.".len()..].chars().all(|c| c.is_ascii_digit()));
    }
}
