//! Structural TIFF reading.
//!
//! The reader walks the IFD chain and every sub-IFD forest, decoding each
//! entry's payload, but never touches strip or tile contents; those stay in
//! the file until the writer copies them.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};
use crate::tags::{TagSet, Type};
use crate::tiff::ifd::{Entry, Ifd, TiffInfo, Value};
use crate::tiff::stream::{ByteOrder, EndianReader};

/// Upper bound on a single entry's payload. Slide files carry multi-megabyte
/// ICC profiles and XMP blobs; anything past this is a corrupt count.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Read the structural model of the TIFF file at `path`.
pub fn read_tiff(path: &Path) -> TiffResult<TiffInfo> {
    let file = File::open(path)?;
    let mut reader = Reader::new(BufReader::new(file))?;

    let first_offset = reader.read_header_offset()?;
    let ifds = reader.read_ifd_chain(first_offset, TagSet::Baseline)?;
    if ifds.is_empty() {
        return Err(TiffError::FormatError(
            TiffFormatError::ImageFileDirectoryNotFound,
        ));
    }

    Ok(TiffInfo {
        source: path.to_path_buf(),
        byte_order: reader.byte_order,
        big_tiff: reader.big_tiff,
        ifds,
    })
}

struct Reader<R> {
    inner: EndianReader<R>,
    byte_order: ByteOrder,
    big_tiff: bool,
    /// Offsets of every IFD seen so far, across the main chain and all
    /// sub-IFD forests. A revisit means the offset graph has a cycle.
    seen: HashSet<u64>,
}

impl<R: Read + Seek> Reader<R> {
    fn new(mut inner: R) -> TiffResult<Self> {
        let mut magic = [0u8; 2];
        inner
            .read_exact(&mut magic)
            .map_err(|_| TiffError::FormatError(TiffFormatError::TiffSignatureNotFound))?;
        let byte_order = match &magic {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => {
                return Err(TiffError::FormatError(
                    TiffFormatError::TiffSignatureNotFound,
                ))
            }
        };

        let mut reader = EndianReader::new(inner, byte_order);
        let big_tiff = match reader.read_u16()? {
            42 => false,
            43 => {
                // Offset byte size and the zero constant of the BigTIFF header.
                if reader.read_u16()? != 8 || reader.read_u16()? != 0 {
                    return Err(TiffError::FormatError(TiffFormatError::TiffSignatureInvalid));
                }
                true
            }
            _ => return Err(TiffError::FormatError(TiffFormatError::TiffSignatureInvalid)),
        };

        Ok(Reader {
            inner: reader,
            byte_order,
            big_tiff,
            seen: HashSet::new(),
        })
    }

    fn read_header_offset(&mut self) -> TiffResult<u64> {
        self.read_offset()
    }

    fn read_offset(&mut self) -> TiffResult<u64> {
        if self.big_tiff {
            Ok(self.inner.read_u64()?)
        } else {
            Ok(u64::from(self.inner.read_u32()?))
        }
    }

    /// Read a linked chain of IFDs starting at `offset`, recursing into
    /// pointer entries with the namespace they imply.
    fn read_ifd_chain(&mut self, offset: u64, tag_set: TagSet) -> TiffResult<Vec<Ifd>> {
        let mut ifds = Vec::new();
        let mut next = offset;
        while next != 0 {
            if !self.seen.insert(next) {
                return Err(TiffError::FormatError(TiffFormatError::CycleInOffsets));
            }
            let (ifd, follow) = self.read_ifd(next, tag_set)?;
            ifds.push(ifd);
            next = follow;
        }
        Ok(ifds)
    }

    fn read_ifd(&mut self, offset: u64, tag_set: TagSet) -> TiffResult<(Ifd, u64)> {
        self.inner.goto_offset(offset)?;
        let entry_count = if self.big_tiff {
            self.inner.read_u64()?
        } else {
            u64::from(self.inner.read_u16()?)
        };

        // Collect the raw entry table before decoding any out-of-line
        // payload; decoding seeks away from the table.
        let value_field_len = if self.big_tiff { 8 } else { 4 };
        let mut raw = Vec::with_capacity(usize::try_from(entry_count)?);
        for _ in 0..entry_count {
            let tag_id = self.inner.read_u16()?;
            let raw_type = self.inner.read_u16()?;
            let count = if self.big_tiff {
                self.inner.read_u64()?
            } else {
                u64::from(self.inner.read_u32()?)
            };
            let field = self.inner.read_bytes(value_field_len)?;
            raw.push((tag_id, raw_type, count, field));
        }
        let next = self.read_offset()?;

        let mut ifd = Ifd {
            offset,
            entries: Default::default(),
            chunk_data: None,
        };
        for (tag_id, raw_type, count, field) in raw {
            let type_ = Type::from_u16(raw_type).ok_or(TiffError::UnsupportedError(
                TiffUnsupportedError::UnknownEntryType(raw_type),
            ))?;
            let value = self.read_value(type_, count, &field)?;
            let mut entry = Entry::new(type_, value);
            if tag_set.is_ifd_pointer(tag_id, type_) {
                let pointed = tag_set.pointed_set(tag_id);
                let return_to = self.position()?;
                for sub_offset in entry.value.as_u64s()? {
                    entry.sub_ifds.push(self.read_ifd_chain(sub_offset, pointed)?);
                }
                self.inner.goto_offset(return_to)?;
            }
            ifd.entries.insert(tag_id, entry);
        }

        Ok((ifd, next))
    }

    fn position(&mut self) -> TiffResult<u64> {
        Ok(self.inner.inner().stream_position()?)
    }

    /// Decode an entry payload from its value field: inline when it fits,
    /// else behind the offset the field holds.
    fn read_value(&mut self, type_: Type, count: u64, field: &[u8]) -> TiffResult<Value> {
        let byte_len = count
            .checked_mul(type_.size() as u64)
            .ok_or(TiffError::LimitsExceeded)?;
        if byte_len > MAX_ENTRY_BYTES {
            return Err(TiffError::LimitsExceeded);
        }

        if byte_len <= field.len() as u64 {
            let mut cursor = EndianReader::new(
                std::io::Cursor::new(field.to_vec()),
                self.byte_order,
            );
            decode_elements(&mut cursor, type_, count)
        } else {
            let mut offset_cursor =
                EndianReader::new(std::io::Cursor::new(field.to_vec()), self.byte_order);
            let data_offset = if self.big_tiff {
                offset_cursor.read_u64()?
            } else {
                u64::from(offset_cursor.read_u32()?)
            };
            self.inner.goto_offset(data_offset)?;
            decode_elements(&mut self.inner, type_, count)
        }
    }
}

fn decode_elements<R: Read>(
    reader: &mut EndianReader<R>,
    type_: Type,
    count: u64,
) -> TiffResult<Value> {
    let n = usize::try_from(count)?;
    Ok(match type_ {
        Type::BYTE => Value::Bytes(reader.read_bytes(n)?),
        Type::SBYTE => Value::SignedBytes(reader.read_bytes(n)?.into_iter().map(|b| b as i8).collect()),
        Type::UNDEFINED => Value::Undefined(reader.read_bytes(n)?),
        Type::ASCII => {
            let bytes = reader.read_bytes(n)?;
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Value::Ascii(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        Type::SHORT => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_u16()?);
            }
            Value::Shorts(v)
        }
        Type::SSHORT => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_i16()?);
            }
            Value::SignedShorts(v)
        }
        Type::LONG => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_u32()?);
            }
            Value::Longs(v)
        }
        Type::SLONG => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_i32()?);
            }
            Value::SignedLongs(v)
        }
        Type::LONG8 => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_u64()?);
            }
            Value::Longs8(v)
        }
        Type::SLONG8 => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_i64()?);
            }
            Value::SignedLongs8(v)
        }
        Type::FLOAT => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_f32()?);
            }
            Value::Floats(v)
        }
        Type::DOUBLE => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_f64()?);
            }
            Value::Doubles(v)
        }
        Type::RATIONAL => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push((reader.read_u32()?, reader.read_u32()?));
            }
            Value::Rationals(v)
        }
        Type::SRATIONAL => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push((reader.read_i32()?, reader.read_i32()?));
            }
            Value::SignedRationals(v)
        }
        Type::IFD => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(u64::from(reader.read_u32()?));
            }
            Value::Ifds(v)
        }
        Type::IFD8 => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_u64()?);
            }
            Value::Ifds(v)
        }
    })
}
