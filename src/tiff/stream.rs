//! All IO functionality needed for structural TIFF reading and writing.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Byte order of the TIFF file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// little endian byte order
    LittleEndian,
    /// big endian byte order
    BigEndian,
}

/// Reader that is aware of the byte order.
#[derive(Debug)]
pub struct EndianReader<R> {
    reader: R,
    pub(crate) byte_order: ByteOrder,
}

impl<R: Read> EndianReader<R> {
    pub fn new(reader: R, byte_order: ByteOrder) -> Self {
        Self { reader, byte_order }
    }

    pub fn inner(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn goto_offset(&mut self, offset: u64) -> io::Result<()>
    where
        R: Seek,
    {
        self.reader.seek(io::SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads a u8
    #[inline(always)]
    pub fn read_u8(&mut self) -> Result<u8, io::Error> {
        let mut n = [0u8; 1];
        self.reader.read_exact(&mut n)?;
        Ok(n[0])
    }

    /// Reads an u16
    #[inline(always)]
    pub fn read_u16(&mut self) -> Result<u16, io::Error> {
        let mut n = [0u8; 2];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u16::from_le_bytes(n),
            ByteOrder::BigEndian => u16::from_be_bytes(n),
        })
    }

    /// Reads an i16
    #[inline(always)]
    pub fn read_i16(&mut self) -> Result<i16, io::Error> {
        let mut n = [0u8; 2];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => i16::from_le_bytes(n),
            ByteOrder::BigEndian => i16::from_be_bytes(n),
        })
    }

    /// Reads an u32
    #[inline(always)]
    pub fn read_u32(&mut self) -> Result<u32, io::Error> {
        let mut n = [0u8; 4];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(n),
            ByteOrder::BigEndian => u32::from_be_bytes(n),
        })
    }

    /// Reads an i32
    #[inline(always)]
    pub fn read_i32(&mut self) -> Result<i32, io::Error> {
        let mut n = [0u8; 4];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => i32::from_le_bytes(n),
            ByteOrder::BigEndian => i32::from_be_bytes(n),
        })
    }

    /// Reads an u64
    #[inline(always)]
    pub fn read_u64(&mut self) -> Result<u64, io::Error> {
        let mut n = [0u8; 8];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(n),
            ByteOrder::BigEndian => u64::from_be_bytes(n),
        })
    }

    /// Reads an i64
    #[inline(always)]
    pub fn read_i64(&mut self) -> Result<i64, io::Error> {
        let mut n = [0u8; 8];
        self.reader.read_exact(&mut n)?;
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => i64::from_le_bytes(n),
            ByteOrder::BigEndian => i64::from_be_bytes(n),
        })
    }

    /// Reads an f32
    #[inline(always)]
    pub fn read_f32(&mut self) -> Result<f32, io::Error> {
        let mut n = [0u8; 4];
        self.reader.read_exact(&mut n)?;
        Ok(f32::from_bits(match self.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(n),
            ByteOrder::BigEndian => u32::from_be_bytes(n),
        }))
    }

    /// Reads an f64
    #[inline(always)]
    pub fn read_f64(&mut self) -> Result<f64, io::Error> {
        let mut n = [0u8; 8];
        self.reader.read_exact(&mut n)?;
        Ok(f64::from_bits(match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(n),
            ByteOrder::BigEndian => u64::from_be_bytes(n),
        }))
    }

    /// Reads `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, io::Error> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Writer that is aware of the byte order and tracks its own offset.
pub struct EndianWriter<W> {
    writer: W,
    byte_order: ByteOrder,
    offset: u64,
}

impl<W: Write> EndianWriter<W> {
    pub fn new(writer: W, byte_order: ByteOrder) -> Self {
        Self {
            writer,
            byte_order,
            offset: 0,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), io::Error> {
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, n: u8) -> Result<(), io::Error> {
        self.write_bytes(&[n])
    }

    pub fn write_u16(&mut self, n: u16) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_i16(&mut self, n: i16) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_u32(&mut self, n: u32) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_i32(&mut self, n: i32) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_u64(&mut self, n: u64) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_i64(&mut self, n: i64) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_be_bytes()),
        }
    }

    pub fn write_f32(&mut self, n: f32) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_bits().to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_bits().to_be_bytes()),
        }
    }

    pub fn write_f64(&mut self, n: f64) -> Result<(), io::Error> {
        match self.byte_order {
            ByteOrder::LittleEndian => self.write_bytes(&n.to_bits().to_le_bytes()),
            ByteOrder::BigEndian => self.write_bytes(&n.to_bits().to_be_bytes()),
        }
    }

    /// Pads the stream to a 2-byte word boundary.
    pub fn pad_word_boundary(&mut self) -> Result<(), io::Error> {
        if self.offset % 2 != 0 {
            self.write_u8(0)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek> EndianWriter<W> {
    pub fn goto_offset(&mut self, offset: u64) -> Result<(), io::Error> {
        self.offset = offset;
        self.writer.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn goto_end(&mut self) -> Result<(), io::Error> {
        self.offset = self.writer.seek(SeekFrom::End(0))?;
        Ok(())
    }
}
