//! The layered rule model driving every redaction decision.
//!
//! Rule files are YAML documents mirroring this module's types; the map key
//! a rule is filed under becomes its `key_name`. A batch works with one
//! effective rule set: a built-in profile base, optionally overlaid with a
//! user rule set.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Scalar kind a `check_type` rule expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedType {
    Integer,
    Number,
    Text,
    Rational,
}

fn default_expected_count() -> u64 {
    1
}

/// The closed set of actions a metadata rule can take.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MetadataAction {
    Keep,
    Delete,
    /// Replace with a zero-length value.
    Empty,
    /// Remap through the batch UID table.
    ReplaceUid,
    /// Replace with a type-appropriate neutral value.
    ReplaceDummy,
    /// Coerce dates, times and timezones to year-only, midnight and a zero
    /// offset.
    ModifyDate,
    Replace {
        new_value: String,
    },
    /// Resolves to `keep` when the value matches the expectation, else
    /// `delete`.
    CheckType {
        expected_type: ExpectedType,
        #[serde(default = "default_expected_count")]
        expected_count: u64,
    },
}

/// The only whole-image replacement currently defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceImageWith {
    BlankImage,
}

/// Actions applicable to whole associated images.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ImageAction {
    Keep,
    Delete,
    Replace { replace_with: ReplaceImageWith },
}

/// A metadata rule bound to the key it was filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRule {
    pub key_name: String,
    pub action: MetadataAction,
}

/// A whole-image rule bound to the key it was filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRule {
    pub key_name: String,
    pub action: ImageAction,
}

/// How odd-group (vendor private) DICOM elements are treated when no
/// explicit rule names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomMetadataAction {
    Keep,
    Delete,
    UseRule,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TiffRules {
    pub metadata: BTreeMap<String, MetadataAction>,
    pub associated_images: BTreeMap<String, ImageAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SvsRules {
    pub metadata: BTreeMap<String, MetadataAction>,
    pub image_description: BTreeMap<String, MetadataAction>,
    pub associated_images: BTreeMap<String, ImageAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DicomRules {
    pub metadata: BTreeMap<String, MetadataAction>,
    pub associated_images: BTreeMap<String, ImageAction>,
    pub custom_metadata_action: Option<CustomMetadataAction>,
}

impl DicomRules {
    /// Vendor elements are dropped unless a rule set says otherwise.
    pub fn effective_custom_metadata_action(&self) -> CustomMetadataAction {
        self.custom_metadata_action
            .unwrap_or(CustomMetadataAction::Delete)
    }
}

/// Helper shared by the per-format tables: bind a map entry to its key.
fn bind_metadata_rule(
    metadata: &BTreeMap<String, MetadataAction>,
    name: &str,
) -> Option<MetadataRule> {
    metadata.get(name).map(|action| MetadataRule {
        key_name: name.to_string(),
        action: action.clone(),
    })
}

fn bind_image_rule(images: &BTreeMap<String, ImageAction>, key: &str) -> Option<ImageRule> {
    images.get(key).map(|action| ImageRule {
        key_name: key.to_string(),
        action: action.clone(),
    })
}

impl TiffRules {
    pub fn metadata_rule(&self, name: &str) -> Option<MetadataRule> {
        bind_metadata_rule(&self.metadata, name)
    }

    pub fn image_rule(&self, key: &str) -> Option<ImageRule> {
        bind_image_rule(&self.associated_images, key)
    }

    pub fn image_keys(&self) -> Vec<&str> {
        self.associated_images.keys().map(String::as_str).collect()
    }
}

impl SvsRules {
    pub fn metadata_rule(&self, name: &str) -> Option<MetadataRule> {
        bind_metadata_rule(&self.metadata, name)
    }

    pub fn description_rule(&self, key: &str) -> Option<MetadataRule> {
        bind_metadata_rule(&self.image_description, key)
    }

    pub fn image_rule(&self, key: &str) -> Option<ImageRule> {
        bind_image_rule(&self.associated_images, key)
    }

    pub fn image_keys(&self) -> Vec<&str> {
        self.associated_images.keys().map(String::as_str).collect()
    }
}

impl DicomRules {
    pub fn metadata_rule(&self, name: &str) -> Option<MetadataRule> {
        bind_metadata_rule(&self.metadata, name)
    }

    pub fn image_rule(&self, key: &str) -> Option<ImageRule> {
        bind_image_rule(&self.associated_images, key)
    }
}

/// A complete rule set: one table per container family plus naming and the
/// strict flag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleSet {
    pub name: String,
    pub description: String,
    pub output_file_name_base: Option<String>,
    pub strict: bool,
    pub tiff: TiffRules,
    pub svs: SvsRules,
    pub dicom: DicomRules,
}

const DEFAULT_OUTPUT_BASE: &str = "study_slide";

impl RuleSet {
    /// Base name for renamed output files.
    pub fn output_base(&self) -> &str {
        self.output_file_name_base
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_BASE)
    }

    /// Merge an optional override onto a base set.
    ///
    /// Key-by-key overlay normally; when the override declares
    /// `strict: true`, its per-format tables replace the base tables
    /// wholesale. The override's `strict` flag always wins.
    pub fn layered(base: &RuleSet, override_rules: Option<&RuleSet>) -> RuleSet {
        let mut merged = base.clone();
        let Some(over) = override_rules else {
            return merged;
        };

        merged.strict = over.strict;
        if over.output_file_name_base.is_some() {
            merged.output_file_name_base = over.output_file_name_base.clone();
        }

        if over.strict {
            merged.tiff = over.tiff.clone();
            merged.svs = over.svs.clone();
            merged.dicom = over.dicom.clone();
            return merged;
        }

        overlay(&mut merged.tiff.metadata, &over.tiff.metadata);
        overlay(&mut merged.tiff.associated_images, &over.tiff.associated_images);
        overlay(&mut merged.svs.metadata, &over.svs.metadata);
        overlay(&mut merged.svs.image_description, &over.svs.image_description);
        overlay(&mut merged.svs.associated_images, &over.svs.associated_images);
        overlay(&mut merged.dicom.metadata, &over.dicom.metadata);
        overlay(&mut merged.dicom.associated_images, &over.dicom.associated_images);
        if over.dicom.custom_metadata_action.is_some() {
            merged.dicom.custom_metadata_action = over.dicom.custom_metadata_action;
        }
        merged
    }
}

fn overlay<V: Clone>(base: &mut BTreeMap<String, V>, over: &BTreeMap<String, V>) {
    for (key, value) in over {
        base.insert(key.clone(), value.clone());
    }
}

/// Failure to read or parse a rule document.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("could not read rule file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse rule file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load a user rule set from a YAML file.
pub fn load_rule_set(path: &Path) -> Result<RuleSet, RulesError> {
    let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| RulesError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The built-in redaction profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// The standard base rules.
    #[default]
    Default,
    /// Keep only metadata needed to conform to the TIFF standard.
    /// TIFF and SVS files only.
    Strict,
    /// The standard base rules, with dates and times fuzzed to January 1st
    /// and midnight instead of removed.
    Dates,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Default => write!(f, "default"),
            Profile::Strict => write!(f, "strict"),
            Profile::Dates => write!(f, "dates"),
        }
    }
}

static BASE_RULES: OnceLock<RuleSet> = OnceLock::new();
static STRICT_RULES: OnceLock<RuleSet> = OnceLock::new();
static DATES_RULES: OnceLock<RuleSet> = OnceLock::new();

fn parse_builtin(yaml: &'static str) -> RuleSet {
    serde_yaml::from_str(yaml).expect("bundled rule set must parse")
}

impl Profile {
    /// The bundled rule set this profile selects.
    pub fn base_rules(self) -> &'static RuleSet {
        match self {
            Profile::Default => {
                BASE_RULES.get_or_init(|| parse_builtin(include_str!("../rules/base_rules.yaml")))
            }
            Profile::Strict => STRICT_RULES
                .get_or_init(|| parse_builtin(include_str!("../rules/strict_rules.yaml"))),
            // The dates profile is the base profile with date handling
            // overlaid, composed through the standard merge.
            Profile::Dates => DATES_RULES.get_or_init(|| {
                let overlay = parse_builtin(include_str!("../rules/dates_rules.yaml"));
                RuleSet::layered(Profile::Default.base_rules(), Some(&overlay))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(yaml: &str) -> Result<MetadataAction, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn actions_parse_with_payloads() {
        assert_eq!(action("action: keep").unwrap(), MetadataAction::Keep);
        assert_eq!(
            action("action: replace\nnew_value: Redacted").unwrap(),
            MetadataAction::Replace {
                new_value: "Redacted".to_string()
            }
        );
        assert_eq!(
            action("action: check_type\nexpected_type: rational\nexpected_count: 2").unwrap(),
            MetadataAction::CheckType {
                expected_type: ExpectedType::Rational,
                expected_count: 2
            }
        );
        assert_eq!(
            action("action: check_type\nexpected_type: integer").unwrap(),
            MetadataAction::CheckType {
                expected_type: ExpectedType::Integer,
                expected_count: 1
            }
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(action("action: obliterate").is_err());
    }

    #[test]
    fn map_key_becomes_key_name() {
        let rules: TiffRules =
            serde_yaml::from_str("metadata:\n  Artist:\n    action: delete\n").unwrap();
        let rule = rules.metadata_rule("Artist").unwrap();
        assert_eq!(rule.key_name, "Artist");
        assert_eq!(rule.action, MetadataAction::Delete);
        assert!(rules.metadata_rule("Model").is_none());
    }

    #[test]
    fn layering_overlays_key_by_key() {
        let base: RuleSet = serde_yaml::from_str(
            "tiff:\n  metadata:\n    Artist: {action: delete}\n    Model: {action: keep}\n",
        )
        .unwrap();
        let over: RuleSet =
            serde_yaml::from_str("tiff:\n  metadata:\n    Artist: {action: keep}\n").unwrap();

        let merged = RuleSet::layered(&base, Some(&over));
        assert_eq!(
            merged.tiff.metadata_rule("Artist").unwrap().action,
            MetadataAction::Keep
        );
        assert_eq!(
            merged.tiff.metadata_rule("Model").unwrap().action,
            MetadataAction::Keep
        );
    }

    #[test]
    fn strict_override_replaces_tables() {
        let base: RuleSet = serde_yaml::from_str(
            "tiff:\n  metadata:\n    Artist: {action: delete}\n    Model: {action: keep}\n",
        )
        .unwrap();
        let over: RuleSet = serde_yaml::from_str(
            "strict: true\ntiff:\n  metadata:\n    ImageWidth: {action: keep}\n",
        )
        .unwrap();

        let merged = RuleSet::layered(&base, Some(&over));
        assert!(merged.strict);
        assert!(merged.tiff.metadata_rule("Artist").is_none());
        assert!(merged.tiff.metadata_rule("ImageWidth").is_some());
    }

    #[test]
    fn custom_metadata_action_override() {
        let base = RuleSet::default();
        assert_eq!(
            base.dicom.effective_custom_metadata_action(),
            CustomMetadataAction::Delete
        );

        let over: RuleSet =
            serde_yaml::from_str("dicom:\n  custom_metadata_action: keep\n").unwrap();
        let merged = RuleSet::layered(&base, Some(&over));
        assert_eq!(
            merged.dicom.effective_custom_metadata_action(),
            CustomMetadataAction::Keep
        );
    }

    #[test]
    fn builtin_profiles_parse() {
        for profile in [Profile::Default, Profile::Strict, Profile::Dates] {
            let rules = profile.base_rules();
            assert!(rules.tiff.image_rule("default").is_some() || profile == Profile::Strict);
        }
        assert!(Profile::Strict.base_rules().strict);
        assert_eq!(
            Profile::Dates
                .base_rules()
                .svs
                .description_rule("Date")
                .unwrap()
                .action,
            MetadataAction::ModifyDate
        );
    }

    #[test]
    fn output_base_defaults() {
        assert_eq!(RuleSet::default().output_base(), "study_slide");
    }
}
