//! Redaction of protected health information from whole slide images.
//!
//! The engine rewrites the metadata of TIFF, Aperio SVS and DICOM WSI
//! containers according to a layered rule system, preserving the primary
//! slide's pixel data bit for bit. Every metadata element in a file must be
//! matched by a rule before any output is written; files with unmatched
//! elements are quarantined instead.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification
//! * <https://dicom.nema.org/medical/dicom/current/output/chtml/part15/chapter_E.html> - DICOM confidentiality profiles

pub mod batch;
pub mod error;
pub mod redact;
pub mod rules;
pub mod sniff;
pub mod svs;
pub mod tags;
pub mod tiff;

pub use self::batch::{redact_images, show_redaction_plan, ProgressUpdate, RedactOptions};
pub use self::error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};
pub use self::redact::{build_redaction_plan, RedactError, RedactionPlan, UidMap};
pub use self::rules::{Profile, RuleSet};
pub use self::sniff::{sniff_format, FileFormat};
