use std::error::Error;
use std::fmt;
use std::io;
use std::str;
use std::string;

use crate::tags::{TagSet, Type};

/// Tiff error kinds.
#[derive(Debug)]
pub enum TiffError {
    /// The image is not formatted properly.
    FormatError(TiffFormatError),

    /// The reader does not support features required by the image.
    UnsupportedError(TiffUnsupportedError),

    /// An I/O Error occurred while reading or writing the image.
    IoError(io::Error),

    /// The limits of the reader are exceeded.
    LimitsExceeded,

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    IntSizeError,
}

/// The image is not formatted properly.
///
/// This indicates that the encoder producing the image might behave incorrectly or that the input
/// file has been corrupted.
///
/// The list of variants may grow to incorporate errors of future features. Matching against this
/// exhaustively is not covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TiffFormatError {
    TiffSignatureNotFound,
    TiffSignatureInvalid,
    ImageFileDirectoryNotFound,
    InvalidTag,
    InvalidTagValueType(u16, Type),
    RequiredTagNotFound(TagSet, u16),
    InconsistentChunkCounts {
        offsets: usize,
        byte_counts: usize,
    },
    Format(String),
    CycleInOffsets,
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffFormatError::*;
        match *self {
            TiffSignatureNotFound => write!(fmt, "TIFF signature not found."),
            TiffSignatureInvalid => write!(fmt, "TIFF signature invalid."),
            ImageFileDirectoryNotFound => write!(fmt, "Image file directory not found."),
            InvalidTag => write!(fmt, "Image contains invalid tag."),
            InvalidTagValueType(tag, type_) => {
                write!(
                    fmt,
                    "Tag `{}` did not have the expected value type {:?}.",
                    tag, type_
                )
            }
            RequiredTagNotFound(tag_set, tag) => {
                write!(fmt, "Required tag `{}` not found.", tag_set.describe(tag))
            }
            InconsistentChunkCounts {
                offsets,
                byte_counts,
            } => {
                write!(
                    fmt,
                    "Inconsistent chunk tags: {} offsets but {} byte counts.",
                    offsets, byte_counts
                )
            }
            Format(ref val) => write!(fmt, "Invalid format: {:?}.", val),
            CycleInOffsets => write!(fmt, "File contained a cycle in the list of IFDs"),
        }
    }
}

/// The reader does not support features required by the image.
///
/// The list of variants may grow. Matching against this exhaustively is not covered by interface
/// stability guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TiffUnsupportedError {
    UnknownEntryType(u16),
    UnsupportedDataType,
}

impl fmt::Display for TiffUnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffUnsupportedError::*;
        match *self {
            UnknownEntryType(raw) => write!(fmt, "Unknown IFD entry type {}.", raw),
            UnsupportedDataType => write!(fmt, "Unsupported data type."),
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            TiffError::FormatError(ref e) => write!(fmt, "Format error: {}", e),
            TiffError::UnsupportedError(ref f) => write!(
                fmt,
                "The reader does not support the \
                 image format `{}`",
                f
            ),
            TiffError::IoError(ref e) => e.fmt(fmt),
            TiffError::LimitsExceeded => write!(fmt, "The reader limits are exceeded"),
            TiffError::IntSizeError => write!(fmt, "Platform or format size limits exceeded"),
        }
    }
}

impl Error for TiffError {
    fn description(&self) -> &str {
        match *self {
            TiffError::FormatError(..) => "Format error",
            TiffError::UnsupportedError(..) => "Unsupported error",
            TiffError::IoError(..) => "IO error",
            TiffError::LimitsExceeded => "Reader limits exceeded",
            TiffError::IntSizeError => "Platform or format size limits exceeded",
        }
    }

    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            TiffError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(err: io::Error) -> TiffError {
        TiffError::IoError(err)
    }
}

impl From<str::Utf8Error> for TiffError {
    fn from(_err: str::Utf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<string::FromUtf8Error> for TiffError {
    fn from(_err: string::FromUtf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(err: TiffFormatError) -> TiffError {
        TiffError::FormatError(err)
    }
}

impl From<TiffUnsupportedError> for TiffError {
    fn from(err: TiffUnsupportedError) -> TiffError {
        TiffError::UnsupportedError(err)
    }
}

impl From<std::num::TryFromIntError> for TiffError {
    fn from(_err: std::num::TryFromIntError) -> TiffError {
        TiffError::IntSizeError
    }
}

/// Result of a structural read or write.
pub type TiffResult<T> = Result<T, TiffError>;
