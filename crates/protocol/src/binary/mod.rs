//! Binary serialization infrastructure for tag data
//!
//! Write-side helpers for the byte-oriented structures sent to a reader or
//! stored on a tag; decoding works on page slices directly. Multi-byte integers (the long
//! TLV length form) use big-endian byte order as NFC Forum Type 2 requires.

use std::io::{self, Write};

/// Structure with a known encoded size, written byte by byte to the tag or
/// the reader
pub trait BinaryWrite {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Exact number of bytes [`Self::write_to`] produces
    fn serialized_size(&self) -> usize;

    /// Encode into a buffer sized up front
    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

/// Write a u8 to a writer
pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

/// Write a u16 (big-endian) to a writer
pub fn write_u16_be<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Write bytes to a writer
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes)
}
