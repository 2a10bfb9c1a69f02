//! Structural TIFF writing.
//!
//! The writer re-serializes an in-memory IFD tree in the source file's
//! flavor (byte order, classic vs BigTIFF) and relocates strip/tile regions
//! by copying their bytes verbatim, either from the source file or from
//! buffers attached to IFDs that were built in memory.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::tags::{TagSet, Type};
use crate::tiff::ifd::{chunk_byte_counts_tag, Entry, Ifd, TiffInfo, Value};
use crate::tiff::stream::{ByteOrder, EndianWriter};

const COPY_BUF_LEN: usize = 64 * 1024;

/// Write `info` to `output`, copying image data from `info.source`.
///
/// The source file is only opened if some chunk region actually has to be
/// copied from it; IFDs carrying their own buffers never touch it.
pub fn write_tiff(info: &TiffInfo, output: &Path) -> TiffResult<()> {
    let out = File::create(output)?;
    let mut writer = Writer {
        out: EndianWriter::new(out, info.byte_order),
        big_tiff: info.big_tiff,
        source_path: info.source.clone(),
        source: None,
    };

    let header_pointer_pos = writer.write_header()?;
    writer.write_ifd_chain(&info.ifds, TagSet::Baseline, header_pointer_pos)?;
    Ok(())
}

struct Writer {
    out: EndianWriter<File>,
    big_tiff: bool,
    source_path: std::path::PathBuf,
    source: Option<BufReader<File>>,
}

/// A fully serialized entry, ready for the directory table.
struct RawEntry {
    tag_id: u16,
    type_: Type,
    count: u64,
    data: Vec<u8>,
}

impl Writer {
    /// Writes the file header and returns the position of the first-IFD
    /// pointer slot, to be patched once the first IFD lands.
    fn write_header(&mut self) -> TiffResult<u64> {
        match self.out.byte_order() {
            ByteOrder::LittleEndian => self.out.write_bytes(b"II")?,
            ByteOrder::BigEndian => self.out.write_bytes(b"MM")?,
        }
        if self.big_tiff {
            self.out.write_u16(43)?;
            self.out.write_u16(8)?;
            self.out.write_u16(0)?;
            let pos = self.out.offset();
            self.out.write_u64(0)?;
            Ok(pos)
        } else {
            self.out.write_u16(42)?;
            let pos = self.out.offset();
            self.out.write_u32(0)?;
            Ok(pos)
        }
    }

    /// Writes a chain of IFDs, linking each into its predecessor's next
    /// pointer (or the pointer slot at `pointer_pos` for the head). Returns
    /// the offset of the chain head.
    fn write_ifd_chain(
        &mut self,
        ifds: &[Ifd],
        tag_set: TagSet,
        pointer_pos: u64,
    ) -> TiffResult<u64> {
        let mut head = 0u64;
        let mut pointer_pos = pointer_pos;
        for ifd in ifds {
            let (ifd_offset, next_pos) = self.write_ifd(ifd, tag_set)?;
            if head == 0 {
                head = ifd_offset;
            }
            self.patch_offset(pointer_pos, ifd_offset)?;
            pointer_pos = next_pos;
        }
        Ok(head)
    }

    /// Writes one IFD: sub-IFD forests and chunk data first, then payloads
    /// too large for the inline field, then the directory table. Returns the
    /// table offset and the position of its next-IFD pointer slot.
    fn write_ifd(&mut self, ifd: &Ifd, tag_set: TagSet) -> TiffResult<(u64, u64)> {
        let mut raw_entries = Vec::with_capacity(ifd.entries.len());
        for (&tag_id, entry) in &ifd.entries {
            let raw = if entry.is_pointer() {
                self.serialize_pointer_entry(tag_id, entry, tag_set)?
            } else if let Some(counts_tag) = chunk_byte_counts_tag(tag_set, tag_id) {
                self.serialize_chunk_entry(ifd, tag_id, entry, counts_tag)?
            } else {
                RawEntry {
                    tag_id,
                    type_: entry.type_,
                    count: entry.count(),
                    data: encode_elements(self.out.byte_order(), &entry.value),
                }
            };
            raw_entries.push(raw);
        }

        // Out-of-line payloads go ahead of the table.
        let inline_len = if self.big_tiff { 8usize } else { 4usize };
        let mut fields = Vec::with_capacity(raw_entries.len());
        for raw in &raw_entries {
            if raw.data.len() <= inline_len {
                let mut field = raw.data.clone();
                field.resize(inline_len, 0);
                fields.push(field);
            } else {
                self.out.pad_word_boundary()?;
                let data_offset = self.out.offset();
                self.out.write_bytes(&raw.data)?;
                fields.push(self.offset_field(data_offset)?);
            }
        }

        self.out.pad_word_boundary()?;
        let table_offset = self.out.offset();
        if self.big_tiff {
            self.out.write_u64(raw_entries.len() as u64)?;
        } else {
            self.out.write_u16(u16::try_from(raw_entries.len())?)?;
        }
        for (raw, field) in raw_entries.iter().zip(&fields) {
            self.out.write_u16(raw.tag_id)?;
            self.out.write_u16(raw.type_.to_u16())?;
            if self.big_tiff {
                self.out.write_u64(raw.count)?;
            } else {
                self.out.write_u32(u32::try_from(raw.count)?)?;
            }
            self.out.write_bytes(field)?;
        }
        let next_pos = self.out.offset();
        if self.big_tiff {
            self.out.write_u64(0)?;
        } else {
            self.out.write_u32(0)?;
        }

        Ok((table_offset, next_pos))
    }

    /// Writes the sub-IFD chains of a pointer entry and serializes the new
    /// chain head offsets as the entry payload.
    fn serialize_pointer_entry(
        &mut self,
        tag_id: u16,
        entry: &Entry,
        tag_set: TagSet,
    ) -> TiffResult<RawEntry> {
        let pointed = tag_set.pointed_set(tag_id);
        let mut heads = Vec::with_capacity(entry.sub_ifds.len());
        for chain in &entry.sub_ifds {
            // A chain head has no pointer slot of its own yet; write the
            // chain with a throwaway slot and keep its head offset.
            let placeholder = self.reserve_offset_slot()?;
            let head = self.write_ifd_chain(chain, pointed, placeholder)?;
            heads.push(head);
        }

        let type_ = match entry.type_ {
            Type::IFD | Type::IFD8 => {
                if self.big_tiff {
                    Type::IFD8
                } else {
                    Type::IFD
                }
            }
            _ if self.big_tiff => Type::LONG8,
            _ => Type::LONG,
        };
        let value = if self.big_tiff {
            Value::Ifds(heads)
        } else {
            for &head in &heads {
                u32::try_from(head)?;
            }
            Value::Ifds(heads)
        };
        Ok(RawEntry {
            tag_id,
            type_,
            count: value.count(),
            data: encode_offsets(self.out.byte_order(), type_, &value)?,
        })
    }

    /// Copies the chunk regions named by an offsets entry and serializes the
    /// relocated offsets as the entry payload.
    fn serialize_chunk_entry(
        &mut self,
        ifd: &Ifd,
        tag_id: u16,
        entry: &Entry,
        counts_tag: crate::tags::Tag,
    ) -> TiffResult<RawEntry> {
        let offsets = entry.value.as_u64s()?;
        let byte_counts = ifd
            .get(counts_tag)
            .ok_or(TiffError::FormatError(TiffFormatError::RequiredTagNotFound(
                TagSet::Baseline,
                counts_tag.to_u16(),
            )))?
            .value
            .as_u64s()?;
        if offsets.len() != byte_counts.len() {
            return Err(TiffError::FormatError(
                TiffFormatError::InconsistentChunkCounts {
                    offsets: offsets.len(),
                    byte_counts: byte_counts.len(),
                },
            ));
        }

        let mut new_offsets = Vec::with_capacity(offsets.len());
        if let Some(buffers) = &ifd.chunk_data {
            if buffers.len() != offsets.len() {
                return Err(TiffError::FormatError(
                    TiffFormatError::InconsistentChunkCounts {
                        offsets: offsets.len(),
                        byte_counts: buffers.len(),
                    },
                ));
            }
            for buffer in buffers {
                self.out.pad_word_boundary()?;
                new_offsets.push(self.out.offset());
                self.out.write_bytes(buffer)?;
            }
        } else {
            for (&offset, &count) in offsets.iter().zip(&byte_counts) {
                self.out.pad_word_boundary()?;
                new_offsets.push(self.out.offset());
                self.copy_from_source(offset, count)?;
            }
        }

        // Offsets in a fresh file may outgrow the source's narrow type.
        let type_ = offset_type(self.big_tiff, entry.type_, &new_offsets)?;
        let value = Value::Ifds(new_offsets);
        Ok(RawEntry {
            tag_id,
            type_,
            count: value.count(),
            data: encode_offsets(self.out.byte_order(), type_, &value)?,
        })
    }

    fn copy_from_source(&mut self, offset: u64, count: u64) -> TiffResult<()> {
        if self.source.is_none() {
            self.source = Some(BufReader::new(File::open(&self.source_path)?));
        }
        let source = self.source.as_mut().expect("Unreachable");
        source.seek(SeekFrom::Start(offset))?;
        let mut remaining = count;
        let mut buf = [0u8; COPY_BUF_LEN];
        while remaining > 0 {
            let chunk = remaining.min(COPY_BUF_LEN as u64) as usize;
            source.read_exact(&mut buf[..chunk])?;
            self.out.write_bytes(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Writes a zeroed pointer-sized slot at the current offset and returns
    /// its position.
    fn reserve_offset_slot(&mut self) -> TiffResult<u64> {
        self.out.pad_word_boundary()?;
        let pos = self.out.offset();
        if self.big_tiff {
            self.out.write_u64(0)?;
        } else {
            self.out.write_u32(0)?;
        }
        Ok(pos)
    }

    fn patch_offset(&mut self, pos: u64, value: u64) -> TiffResult<()> {
        let end = self.out.offset();
        self.out.goto_offset(pos)?;
        if self.big_tiff {
            self.out.write_u64(value)?;
        } else {
            self.out.write_u32(u32::try_from(value)?)?;
        }
        self.out.goto_offset(end)?;
        Ok(())
    }

    fn offset_field(&mut self, offset: u64) -> TiffResult<Vec<u8>> {
        let mut field = Vec::with_capacity(8);
        match (self.big_tiff, self.out.byte_order()) {
            (true, ByteOrder::LittleEndian) => field.extend_from_slice(&offset.to_le_bytes()),
            (true, ByteOrder::BigEndian) => field.extend_from_slice(&offset.to_be_bytes()),
            (false, ByteOrder::LittleEndian) => {
                field.extend_from_slice(&u32::try_from(offset)?.to_le_bytes())
            }
            (false, ByteOrder::BigEndian) => {
                field.extend_from_slice(&u32::try_from(offset)?.to_be_bytes())
            }
        }
        Ok(field)
    }
}

/// Picks a type wide enough for relocated offsets, widening the source's
/// type when needed.
fn offset_type(big_tiff: bool, original: Type, offsets: &[u64]) -> TiffResult<Type> {
    let max = offsets.iter().copied().max().unwrap_or(0);
    if big_tiff {
        return Ok(match original {
            Type::LONG8 | Type::IFD8 => original,
            Type::IFD => Type::IFD8,
            _ if max > u64::from(u32::MAX) => Type::LONG8,
            _ => original,
        });
    }
    if max > u64::from(u32::MAX) {
        return Err(TiffError::IntSizeError);
    }
    Ok(match original {
        Type::SHORT if max > u64::from(u16::MAX) => Type::LONG,
        other => other,
    })
}

fn push_endian(bytes: &mut Vec<u8>, byte_order: ByteOrder, le: &[u8], be: &[u8]) {
    match byte_order {
        ByteOrder::LittleEndian => bytes.extend_from_slice(le),
        ByteOrder::BigEndian => bytes.extend_from_slice(be),
    }
}

macro_rules! extend_all {
    ($bytes:expr, $bo:expr, $values:expr) => {
        for v in $values {
            push_endian($bytes, $bo, &v.to_le_bytes(), &v.to_be_bytes());
        }
    };
}

/// Serializes a payload into file byte order.
fn encode_elements(byte_order: ByteOrder, value: &Value) -> Vec<u8> {
    let mut bytes = Vec::new();
    match value {
        Value::Bytes(v) | Value::Undefined(v) => bytes.extend_from_slice(v),
        Value::SignedBytes(v) => bytes.extend(v.iter().map(|&b| b as u8)),
        Value::Ascii(s) => {
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
        }
        Value::Shorts(v) => extend_all!(&mut bytes, byte_order, v),
        Value::SignedShorts(v) => extend_all!(&mut bytes, byte_order, v),
        Value::Longs(v) => extend_all!(&mut bytes, byte_order, v),
        Value::SignedLongs(v) => extend_all!(&mut bytes, byte_order, v),
        Value::Longs8(v) => extend_all!(&mut bytes, byte_order, v),
        Value::SignedLongs8(v) => extend_all!(&mut bytes, byte_order, v),
        Value::Floats(v) => {
            for f in v {
                push_endian(
                    &mut bytes,
                    byte_order,
                    &f.to_bits().to_le_bytes(),
                    &f.to_bits().to_be_bytes(),
                );
            }
        }
        Value::Doubles(v) => {
            for f in v {
                push_endian(
                    &mut bytes,
                    byte_order,
                    &f.to_bits().to_le_bytes(),
                    &f.to_bits().to_be_bytes(),
                );
            }
        }
        Value::Rationals(v) => {
            for (n, d) in v {
                push_endian(&mut bytes, byte_order, &n.to_le_bytes(), &n.to_be_bytes());
                push_endian(&mut bytes, byte_order, &d.to_le_bytes(), &d.to_be_bytes());
            }
        }
        Value::SignedRationals(v) => {
            for (n, d) in v {
                push_endian(&mut bytes, byte_order, &n.to_le_bytes(), &n.to_be_bytes());
                push_endian(&mut bytes, byte_order, &d.to_le_bytes(), &d.to_be_bytes());
            }
        }
        // Pointer payloads carry their element width in the entry type and
        // go through encode_offsets instead.
        Value::Ifds(v) => extend_all!(&mut bytes, byte_order, v),
    }
    bytes
}

/// Serializes relocated offsets with the width `type_` dictates.
fn encode_offsets(byte_order: ByteOrder, type_: Type, value: &Value) -> TiffResult<Vec<u8>> {
    let offsets = value.as_u64s()?;
    let mut bytes = Vec::with_capacity(offsets.len() * type_.size());
    for offset in offsets {
        match type_ {
            Type::SHORT => {
                let n = u16::try_from(offset)?;
                push_endian(&mut bytes, byte_order, &n.to_le_bytes(), &n.to_be_bytes());
            }
            Type::LONG | Type::IFD => {
                let n = u32::try_from(offset)?;
                push_endian(&mut bytes, byte_order, &n.to_le_bytes(), &n.to_be_bytes());
            }
            Type::LONG8 | Type::IFD8 => {
                push_endian(
                    &mut bytes,
                    byte_order,
                    &offset.to_le_bytes(),
                    &offset.to_be_bytes(),
                );
            }
            _ => return Err(TiffError::FormatError(TiffFormatError::InvalidTag)),
        }
    }
    Ok(bytes)
}
