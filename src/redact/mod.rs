//! The redaction engine: per-file plans, their execution, and the shared
//! batch state they borrow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::error::TiffError;
use crate::rules::{RuleSet, RulesError};
use crate::sniff::{sniff_format, FileFormat};
use crate::tags::Tag;

pub mod dicom;
pub mod svs;
pub mod tiff;

pub use self::dicom::DicomRedactionPlan;
pub use self::svs::SvsRedactionPlan;
pub use self::tiff::TiffRedactionPlan;

/// Errors of the redaction layer.
///
/// Most of these are per-file soft failures; only configuration problems
/// ([`RedactError::is_fatal`]) abort a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    /// A file family or flavor the engine will not touch.
    #[error("{0}")]
    UnsupportedFileType(String),

    #[error("{} could not be processed as a valid Aperio file", path.display())]
    MalformedAperioFile { path: PathBuf },

    #[error("strict redaction is not currently supported for DICOM images")]
    StrictDicom,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("redaction option not currently supported: {0}")]
    NotImplemented(String),

    /// A per-file lookup miss: the file's classified image type has no
    /// entry in the active rule set's associated-image table.
    #[error("no associated image rule for DICOM image type `{0}`")]
    MissingImageRule(String),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Tiff(#[from] TiffError),

    #[error("could not read {} as a DICOM file: {source}", path.display())]
    DicomRead {
        path: PathBuf,
        #[source]
        source: Box<dicom_object::ReadError>,
    },

    #[error("could not write DICOM file {}: {source}", path.display())]
    DicomWrite {
        path: PathBuf,
        #[source]
        source: Box<dicom_object::WriteError>,
    },

    #[error("could not encode blank image: {0}")]
    BlankImage(#[from] image::ImageError),

    #[error("could not write manifest: {0}")]
    Manifest(#[from] csv::Error),

    #[error("could not serialize failure manifest: {0}")]
    FailureManifest(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RedactError {
    /// Whether this error must abort the whole batch rather than skip the
    /// file it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RedactError::StrictDicom | RedactError::Configuration(_) | RedactError::Rules(_)
        )
    }
}

/// Batch-scoped table remapping original DICOM UIDs to freshly minted ones.
///
/// Lazily populated; two files referring to the same source UID receive the
/// same replacement, which keeps series and frame-of-reference links intact
/// across a batch.
#[derive(Debug, Default)]
pub struct UidMap {
    map: HashMap<String, String>,
}

impl UidMap {
    pub fn new() -> UidMap {
        UidMap::default()
    }

    /// The replacement for `original`, minting `2.25.<uuid4 as decimal>` on
    /// first sight.
    pub fn get_or_mint(&mut self, original: &str) -> String {
        self.map
            .entry(original.to_string())
            .or_insert_with(|| format!("2.25.{}", Uuid::new_v4().as_u128()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// What saving a plan's output produced.
#[derive(Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Target exists and overwriting was not requested.
    SkippedExisting,
    /// The whole image is scheduled for deletion; no output is written.
    SkippedImageRule,
}

/// A fully resolved decision set for one file.
pub trait RedactionPlan: std::fmt::Debug {
    fn file_format(&self) -> FileFormat;

    /// True iff every metadata element present in the file has a recorded
    /// action. Only comprehensive plans execute.
    fn is_comprehensive(&self) -> bool;

    /// Human readable names of the elements no rule matched.
    fn missing_keys(&self) -> Vec<String>;

    /// Apply every recorded action to the in-memory model.
    fn execute(&mut self) -> Result<(), RedactError>;

    /// Write the redacted file, honoring `overwrite`.
    fn save(&self, output: &Path, overwrite: bool) -> Result<SaveOutcome, RedactError>;

    /// A rendering of the decision set for the `plan` command.
    fn report(&self) -> String;
}

/// Log-and-skip guard shared by the per-format `save` implementations.
pub(crate) fn can_write(input: &Path, output: &Path, overwrite: bool) -> bool {
    if output.exists() {
        if overwrite {
            info!(
                "Found existing redaction for {}. Overwriting...",
                input.display()
            );
        } else {
            tracing::warn!(
                "Could not redact {}, existing redacted file in output directory. Use the \
                 --overwrite-existing-output flag to overwrite previously redacted files.",
                input.display()
            );
            return false;
        }
    }
    true
}

/// Build the redaction plan for one file against an already layered rule
/// set.
///
/// TIFF versus SVS is decided here, by looking for the `aperio` token in
/// the first IFD's `ImageDescription`; the sniffer cannot tell them apart.
pub fn build_redaction_plan<'a>(
    image_path: &Path,
    rules: &'a RuleSet,
    uid_map: &'a mut UidMap,
) -> Result<Box<dyn RedactionPlan + 'a>, RedactError> {
    let format = sniff_format(image_path)?;
    match format {
        Some(FileFormat::Tiff) => {
            let info = crate::tiff::read_tiff(image_path)?;
            let is_svs = info
                .first_ifd()?
                .ascii_value(Tag::ImageDescription)
                .is_some_and(|description| description.to_lowercase().contains("aperio"));
            if is_svs {
                Ok(Box::new(SvsRedactionPlan::new(info, &rules.svs, rules.strict)?))
            } else {
                Ok(Box::new(TiffRedactionPlan::new(info, &rules.tiff)?))
            }
        }
        Some(FileFormat::Dicom) => {
            if rules.strict {
                return Err(RedactError::StrictDicom);
            }
            Ok(Box::new(DicomRedactionPlan::new(
                image_path,
                &rules.dicom,
                uid_map,
            )?))
        }
        Some(FileFormat::Svs) | None => Err(RedactError::UnsupportedFileType(format!(
            "File format for {} not supported",
            image_path.display()
        ))),
    }
}
