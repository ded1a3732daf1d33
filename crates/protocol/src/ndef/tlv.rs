//! TLV framing of the Type 2 data area
//!
//! ```text
//! [00 ...] 03 <len> <NDEF message> FE        len < 0xFF
//! [00 ...] 03 FF <len_hi> <len_lo> <msg> FE  otherwise
//! ```

use crate::binary::{write_bytes, write_u16_be, write_u8};
use std::io::{self, Write};

/// Null TLV, skipped by readers
pub const TLV_NULL: u8 = 0x00;
/// NDEF message TLV
pub const TLV_NDEF: u8 = 0x03;
/// Terminator TLV
pub const TLV_TERMINATOR: u8 = 0xFE;
/// Marker announcing the three-byte length form
pub const TLV_LONG_LENGTH: u8 = 0xFF;

/// Outcome of scanning a partially read data area for the NDEF TLV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvScan {
    /// More bytes are needed before the TLV can be judged
    Incomplete,
    /// The NDEF message occupies `buf[start..start + len]`
    Complete { start: usize, len: usize },
    /// A terminator or a foreign TLV came before any NDEF TLV
    Invalid,
}

/// Locate the NDEF message inside the bytes read so far
pub fn scan_tlv(buf: &[u8]) -> TlvScan {
    let Some(type_pos) = buf.iter().position(|b| *b != TLV_NULL) else {
        return TlvScan::Incomplete;
    };
    if buf[type_pos] != TLV_NDEF {
        return TlvScan::Invalid;
    }

    let len_pos = type_pos + 1;
    let Some(&first_len) = buf.get(len_pos) else {
        return TlvScan::Incomplete;
    };

    let (start, len) = if first_len == TLV_LONG_LENGTH {
        match buf.get(len_pos + 1..len_pos + 3) {
            Some(&[hi, lo]) => (len_pos + 3, u16::from_be_bytes([hi, lo]) as usize),
            _ => return TlvScan::Incomplete,
        }
    } else {
        (len_pos + 1, first_len as usize)
    };

    if start + len <= buf.len() {
        TlvScan::Complete { start, len }
    } else {
        TlvScan::Incomplete
    }
}

/// Wrap an NDEF message in an NDEF TLV followed by a terminator
pub fn write_ndef_tlv<W: Write>(writer: &mut W, message: &[u8]) -> io::Result<()> {
    write_u8(writer, TLV_NDEF)?;
    if message.len() < TLV_LONG_LENGTH as usize {
        write_u8(writer, message.len() as u8)?;
    } else {
        let len = u16::try_from(message.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "NDEF message exceeds 65535 bytes")
        })?;
        write_u8(writer, TLV_LONG_LENGTH)?;
        write_u16_be(writer, len)?;
    }
    write_bytes(writer, message)?;
    write_u8(writer, TLV_TERMINATOR)
}
