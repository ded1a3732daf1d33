//! Reader pseudo-APDUs for Type 2 tag page access
//!
//! PC/SC contactless readers expose tag memory through a small set of
//! vendor-class (`CLA = 0xFF`) commands. Only three are needed here:
//!
//! ```text
//! READ BINARY    FF B0 00 <page> 04
//! UPDATE BINARY  FF D6 00 <page> 04 <d0 d1 d2 d3>
//! GET DATA (UID) FF CA 00 00 00
//! ```
//!
//! Every reply ends with a two-byte status word; `90 00` is success.

use crate::binary::{write_bytes, write_u8, BinaryWrite};
use crate::tag::{PageData, PAGE_SIZE};
use std::io::{self, Write};
use thiserror::Error;

/// Vendor class byte used by PC/SC contactless readers
pub const CLA_READER: u8 = 0xFF;
/// READ BINARY instruction
pub const INS_READ_BINARY: u8 = 0xB0;
/// UPDATE BINARY instruction
pub const INS_UPDATE_BINARY: u8 = 0xD6;
/// GET DATA instruction (P1 = 0x00 selects the UID)
pub const INS_GET_DATA: u8 = 0xCA;

/// Status word returned on success
pub const SW_SUCCESS: StatusWord = StatusWord {
    sw1: 0x90,
    sw2: 0x00,
};

/// Errors raised while splitting a reader reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApduError {
    #[error("reply too short: {0} bytes, status word needs 2")]
    TooShort(usize),
}

/// Two-byte status trailer of a reader reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    /// True only for the exact `90 00` trailer
    pub fn is_success(self) -> bool {
        self == SW_SUCCESS
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Split a raw reply into its data part and status word
pub fn split_reply(reply: &[u8]) -> Result<(&[u8], StatusWord), ApduError> {
    if reply.len() < 2 {
        return Err(ApduError::TooShort(reply.len()));
    }
    let (data, trailer) = reply.split_at(reply.len() - 2);
    Ok((
        data,
        StatusWord {
            sw1: trailer[0],
            sw2: trailer[1],
        },
    ))
}

/// A page-level command understood by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCommand {
    /// Read the 4-byte page at the given index
    ReadPage(u8),
    /// Write exactly one page
    WritePage(u8, PageData),
    /// Ask the reader for the tag identifier
    GetUid,
}

impl BinaryWrite for PageCommand {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u8(writer, CLA_READER)?;
        match self {
            PageCommand::ReadPage(page) => {
                write_bytes(writer, &[INS_READ_BINARY, 0x00, *page, PAGE_SIZE as u8])
            }
            PageCommand::WritePage(page, data) => {
                write_bytes(writer, &[INS_UPDATE_BINARY, 0x00, *page, PAGE_SIZE as u8])?;
                write_bytes(writer, data)
            }
            PageCommand::GetUid => write_bytes(writer, &[INS_GET_DATA, 0x00, 0x00, 0x00]),
        }
    }

    fn serialized_size(&self) -> usize {
        match self {
            PageCommand::WritePage(..) => 5 + PAGE_SIZE,
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_page_command() {
        let bytes = PageCommand::ReadPage(0x03).to_bytes().unwrap();
        assert_eq!(bytes, vec![0xFF, 0xB0, 0x00, 0x03, 0x04]);
    }

    #[test]
    fn test_write_page_command() {
        let cmd = PageCommand::WritePage(0x04, [0x03, 0x0C, 0xD1, 0x01]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0xFF, 0xD6, 0x00, 0x04, 0x04, 0x03, 0x0C, 0xD1, 0x01]
        );
        assert_eq!(bytes.len(), cmd.serialized_size());
    }

    #[test]
    fn test_get_uid_command() {
        let bytes = PageCommand::GetUid.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xFF, 0xCA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_split_reply() {
        let (data, sw) = split_reply(&[0x04, 0xA1, 0x90, 0x00]).unwrap();
        assert_eq!(data, &[0x04, 0xA1]);
        assert!(sw.is_success());

        let (data, sw) = split_reply(&[0x63, 0x00]).unwrap();
        assert!(data.is_empty());
        assert!(!sw.is_success());
        assert_eq!(sw.to_string(), "6300");

        assert_eq!(split_reply(&[0x90]), Err(ApduError::TooShort(1)));
    }

    #[test]
    fn test_only_exact_trailer_is_success() {
        assert!(!StatusWord { sw1: 0x90, sw2: 0x01 }.is_success());
        assert!(!StatusWord { sw1: 0x91, sw2: 0x00 }.is_success());
    }
}
