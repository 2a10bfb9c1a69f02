//! The in-memory model of a TIFF file's directory structure.
//!
//! Unlike a pixel decoder, the structural model keeps every entry's decoded
//! payload and the sub-IFD forests hanging off pointer entries, so the whole
//! tree can be rewritten without touching image data.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::tags::{Tag, TagSet, Type};
use crate::tiff::stream::ByteOrder;

/// The decoded payload of an IFD entry.
///
/// TIFF entry payloads are homogeneous arrays; one variant per on-disk type
/// keeps serialization lossless (`ASCII` strings drop their trailing NUL in
/// memory and regain it on write).
#[allow(unused_qualifications)]
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Bytes(Vec<u8>),
    SignedBytes(Vec<i8>),
    Undefined(Vec<u8>),
    Ascii(String),
    Shorts(Vec<u16>),
    SignedShorts(Vec<i16>),
    Longs(Vec<u32>),
    SignedLongs(Vec<i32>),
    Longs8(Vec<u64>),
    SignedLongs8(Vec<i64>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
    Rationals(Vec<(u32, u32)>),
    SignedRationals(Vec<(i32, i32)>),
    /// Offsets held by an IFD-typed entry. Once a file is read these are
    /// superseded by [`Entry::sub_ifds`]; the writer regenerates them.
    Ifds(Vec<u64>),
}

impl Value {
    /// The TIFF element count of this payload.
    pub fn count(&self) -> u64 {
        match self {
            Value::Bytes(v) | Value::Undefined(v) => v.len() as u64,
            Value::SignedBytes(v) => v.len() as u64,
            // The on-disk count includes the NUL terminator.
            Value::Ascii(s) => s.len() as u64 + 1,
            Value::Shorts(v) => v.len() as u64,
            Value::SignedShorts(v) => v.len() as u64,
            Value::Longs(v) => v.len() as u64,
            Value::SignedLongs(v) => v.len() as u64,
            Value::Longs8(v) => v.len() as u64,
            Value::SignedLongs8(v) => v.len() as u64,
            Value::Floats(v) => v.len() as u64,
            Value::Doubles(v) => v.len() as u64,
            Value::Rationals(v) => v.len() as u64,
            Value::SignedRationals(v) => v.len() as u64,
            Value::Ifds(v) => v.len() as u64,
        }
    }

    /// Whether every element is an integer.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Value::Bytes(_)
                | Value::SignedBytes(_)
                | Value::Shorts(_)
                | Value::SignedShorts(_)
                | Value::Longs(_)
                | Value::SignedLongs(_)
                | Value::Longs8(_)
                | Value::SignedLongs8(_)
        )
    }

    /// Whether every element is an integer or a float.
    pub fn is_number(&self) -> bool {
        self.is_integer() || matches!(self, Value::Floats(_) | Value::Doubles(_))
    }

    /// The payload widened to unsigned 64-bit values, for offset and byte
    /// count tags.
    pub fn as_u64s(&self) -> TiffResult<Vec<u64>> {
        match self {
            Value::Bytes(v) => Ok(v.iter().map(|&n| u64::from(n)).collect()),
            Value::Shorts(v) => Ok(v.iter().map(|&n| u64::from(n)).collect()),
            Value::Longs(v) => Ok(v.iter().map(|&n| u64::from(n)).collect()),
            Value::Longs8(v) => Ok(v.clone()),
            Value::Ifds(v) => Ok(v.clone()),
            _ => Err(TiffError::FormatError(TiffFormatError::InvalidTag)),
        }
    }

    /// The first element widened to u64, for single-valued numeric tags.
    pub fn first_u64(&self) -> Option<u64> {
        self.as_u64s().ok()?.first().copied()
    }

    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &[T]) -> fmt::Result {
            for (i, e) in v.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{e}")?;
            }
            Ok(())
        }

        match self {
            Value::Bytes(v) => join(f, v),
            Value::SignedBytes(v) => join(f, v),
            Value::Undefined(v) => write!(f, "<{} bytes>", v.len()),
            Value::Ascii(s) => write!(f, "{s}"),
            Value::Shorts(v) => join(f, v),
            Value::SignedShorts(v) => join(f, v),
            Value::Longs(v) => join(f, v),
            Value::SignedLongs(v) => join(f, v),
            Value::Longs8(v) => join(f, v),
            Value::SignedLongs8(v) => join(f, v),
            Value::Floats(v) => join(f, v),
            Value::Doubles(v) => join(f, v),
            Value::Rationals(v) => {
                for (i, (n, d)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{n}/{d}")?;
                }
                Ok(())
            }
            Value::SignedRationals(v) => {
                for (i, (n, d)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{n}/{d}")?;
                }
                Ok(())
            }
            Value::Ifds(v) => join(f, v),
        }
    }
}

/// A single IFD entry: its on-disk type, decoded payload and, for pointer
/// entries, the sub-IFD chains hanging off each offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub type_: Type,
    pub value: Value,
    /// One chain of IFDs per pointer value of an IFD-typed entry; empty for
    /// plain entries.
    pub sub_ifds: Vec<Vec<Ifd>>,
}

impl Entry {
    pub fn new(type_: Type, value: Value) -> Entry {
        Entry {
            type_,
            value,
            sub_ifds: Vec::new(),
        }
    }

    pub fn ascii(value: impl Into<String>) -> Entry {
        Entry::new(Type::ASCII, Value::Ascii(value.into()))
    }

    pub fn shorts(values: impl Into<Vec<u16>>) -> Entry {
        Entry::new(Type::SHORT, Value::Shorts(values.into()))
    }

    pub fn longs(values: impl Into<Vec<u32>>) -> Entry {
        Entry::new(Type::LONG, Value::Longs(values.into()))
    }

    pub fn count(&self) -> u64 {
        self.value.count()
    }

    pub fn is_pointer(&self) -> bool {
        !self.sub_ifds.is_empty() || matches!(self.type_, Type::IFD | Type::IFD8)
    }
}

/// An Image File Directory (IFD).
#[doc(alias = "IFD")]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ifd {
    /// File offset this IFD was read from. Unique within a file, it serves
    /// as the IFD's identity in redaction plans. Newly constructed IFDs use
    /// `0` until written.
    pub offset: u64,
    /// There are at most `u16::MAX` entries in any single directory; the
    /// order in the file is ascending by tag id, which the map maintains.
    pub entries: BTreeMap<u16, Entry>,
    /// Strip or tile contents for IFDs built in memory rather than read from
    /// the source file (one buffer per chunk, in offset order). When unset
    /// the writer copies chunk regions from the source file instead.
    pub chunk_data: Option<Vec<Vec<u8>>>,
}

impl Ifd {
    pub fn new() -> Ifd {
        Ifd::default()
    }

    /// Retrieve the entry for a baseline tag.
    pub fn get(&self, tag: Tag) -> Option<&Entry> {
        self.entries.get(&tag.to_u16())
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut Entry> {
        self.entries.get_mut(&tag.to_u16())
    }

    /// Check if the directory contains a specified baseline tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag.to_u16())
    }

    pub fn insert(&mut self, tag: Tag, entry: Entry) -> Option<Entry> {
        self.entries.insert(tag.to_u16(), entry)
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Entry> {
        self.entries.remove(&tag.to_u16())
    }

    /// The first numeric value of a tag, if present.
    pub fn long_value(&self, tag: Tag) -> Option<u64> {
        self.get(tag).and_then(|entry| entry.value.first_u64())
    }

    /// The string value of an ASCII tag, if present.
    pub fn ascii_value(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(|entry| entry.value.as_ascii())
    }

    /// `ImageWidth × ImageLength`, if both tags are present.
    pub fn dimensions(&self) -> Option<(u64, u64)> {
        let width = self.long_value(Tag::ImageWidth)?;
        let height = self.long_value(Tag::ImageLength)?;
        Some((width, height))
    }
}

/// A whole TIFF file read into memory: header flavor plus the main IFD chain
/// (sub-IFD forests hang off their pointer entries).
#[derive(Debug, Clone)]
pub struct TiffInfo {
    /// Path the file was read from; the writer copies image data from it.
    pub source: PathBuf,
    pub byte_order: ByteOrder,
    pub big_tiff: bool,
    pub ifds: Vec<Ifd>,
}

impl TiffInfo {
    /// The first IFD of the main chain.
    pub fn first_ifd(&self) -> TiffResult<&Ifd> {
        self.ifds
            .first()
            .ok_or(TiffError::FormatError(TiffFormatError::ImageFileDirectoryNotFound))
    }
}

/// Tag ids whose payloads are offsets of image data, paired with the tag
/// holding the matching byte counts. The writer relocates these regions.
pub(crate) const CHUNK_TAG_PAIRS: &[(Tag, Tag)] = &[
    (Tag::StripOffsets, Tag::StripByteCounts),
    (Tag::TileOffsets, Tag::TileByteCounts),
    (Tag::FreeOffsets, Tag::FreeByteCounts),
];

/// Whether `id` in `tag_set` is the offsets half of a chunk pair.
pub(crate) fn chunk_byte_counts_tag(tag_set: TagSet, id: u16) -> Option<Tag> {
    if tag_set != TagSet::Baseline {
        return None;
    }
    CHUNK_TAG_PAIRS
        .iter()
        .find(|(offsets, _)| offsets.to_u16() == id)
        .map(|&(_, counts)| counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_count_includes_nul() {
        let entry = Entry::ascii("Aperio");
        assert_eq!(entry.count(), 7);
    }

    #[test]
    fn value_kind_checks() {
        assert!(Value::Shorts(vec![1, 2]).is_integer());
        assert!(Value::Doubles(vec![0.5]).is_number());
        assert!(!Value::Doubles(vec![0.5]).is_integer());
        assert!(!Value::Ascii("x".into()).is_number());
    }

    #[test]
    fn dimensions_from_tags() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::ImageWidth, Entry::longs(vec![640]));
        ifd.insert(Tag::ImageLength, Entry::shorts(vec![480]));
        assert_eq!(ifd.dimensions(), Some((640, 480)));
    }

    #[test]
    fn chunk_pairs_resolve() {
        assert_eq!(
            chunk_byte_counts_tag(TagSet::Baseline, Tag::TileOffsets.to_u16()),
            Some(Tag::TileByteCounts)
        );
        assert_eq!(chunk_byte_counts_tag(TagSet::Baseline, Tag::ImageWidth.to_u16()), None);
        assert_eq!(chunk_byte_counts_tag(TagSet::Exif, Tag::TileOffsets.to_u16()), None);
    }
}
