//! Classify container files from their leading bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// The container families the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Tiff,
    Svs,
    Dicom,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Tiff => "tiff",
            FileFormat::Svs => "svs",
            FileFormat::Dicom => "dicom",
        }
    }
}

const TIFF_MAGICS: [&[u8; 4]; 4] = [b"II\x2a\x00", b"MM\x00\x2a", b"II\x2b\x00", b"MM\x00\x2b"];

/// Classify a file by its first bytes.
///
/// DICOM is checked first: a file that is valid in both flavors is treated
/// as DICOM. SVS is not distinguished here; that takes reading the first
/// IFD's `ImageDescription`, which happens during plan construction. The
/// file extension is never consulted.
pub fn sniff_format(path: &Path) -> io::Result<Option<FileFormat>> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 132];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    if filled >= 132 && &header[128..132] == b"DICM" {
        return Ok(Some(FileFormat::Dicom));
    }
    if filled >= 4 && TIFF_MAGICS.iter().any(|magic| &header[..4] == *magic) {
        return Ok(Some(FileFormat::Tiff));
    }
    Ok(None)
}
