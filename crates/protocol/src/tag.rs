//! Type 2 tag memory layout
//!
//! ```text
//! page 0-2   UID / lock bytes (read-only)
//! page 3     Capability Container  E1 10 <size/8> <access>
//! page 4..   NDEF data area (TLV stream)
//! ```

use std::fmt;

/// Size of one tag page in bytes
pub const PAGE_SIZE: usize = 4;

/// One page worth of data
pub type PageData = [u8; PAGE_SIZE];

/// Page index of the capability container
pub const CC_PAGE: u8 = 0x03;

/// First page of the NDEF data area
pub const DATA_START_PAGE: u8 = 0x04;

/// Exclusive end of the default bounded NDEF scan (~76 data pages)
pub const DEFAULT_SCAN_END_PAGE: u8 = 0x50;

/// NFC Forum Type 2 magic + mapping version 1.0
pub const NFC_FORUM_T2_FAMILY: [u8; 2] = [0xE1, 0x10];

/// Size class for NTAG215: 0x3F * 8 = 504 bytes of user memory
pub const NTAG215_SIZE_CLASS: u8 = 0x3F;

/// Capability container stored in page 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    /// Tag family bytes (magic number + mapping version)
    pub family: [u8; 2],
    /// Data area size in 8-byte units
    pub size_class: u8,
    /// Read/write access nibbles, 0x00 = unrestricted
    pub access: u8,
}

impl CapabilityContainer {
    /// Create a read/write container for the given family and size class
    pub fn new(family: [u8; 2], size_class: u8) -> Self {
        Self {
            family,
            size_class,
            access: 0x00,
        }
    }

    /// Container written to NTAG215 blanks
    pub fn ntag215() -> Self {
        Self::new(NFC_FORUM_T2_FAMILY, NTAG215_SIZE_CLASS)
    }

    /// Parse from the raw page
    pub fn from_page(page: PageData) -> Self {
        Self {
            family: [page[0], page[1]],
            size_class: page[2],
            access: page[3],
        }
    }

    /// Raw page representation
    pub fn to_page(self) -> PageData {
        [self.family[0], self.family[1], self.size_class, self.access]
    }

    /// True when the family bytes match exactly
    pub fn matches_family(&self, family: [u8; 2]) -> bool {
        self.family == family
    }

    /// Usable data area in bytes
    pub fn data_area_bytes(&self) -> usize {
        self.size_class as usize * 8
    }
}

/// Card family guessed from the UID length
///
/// This is a heuristic, not a guarantee: UID length only narrows the
/// anti-collision cascade level, and several chip families share each length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFamily {
    /// 4-byte UID, usually MIFARE Classic 1K
    ClassicProbable,
    /// 7-byte UID, usually MIFARE Ultralight / NTAG
    UltralightProbable,
    /// 10-byte UID, usually MIFARE Classic 4K
    Classic4kProbable,
    /// Capability container confirmed an NTAG215 layout
    Ntag215,
    /// Anything else
    Unknown(usize),
}

impl CardFamily {
    /// Classify strictly by UID byte length
    pub fn from_uid(uid: &[u8]) -> Self {
        match uid.len() {
            4 => CardFamily::ClassicProbable,
            7 => CardFamily::UltralightProbable,
            10 => CardFamily::Classic4kProbable,
            n => CardFamily::Unknown(n),
        }
    }

    /// Refine the guess with the capability container when one was readable
    pub fn refine(self, cc: Option<CapabilityContainer>) -> Self {
        match cc {
            Some(cc)
                if cc.matches_family(NFC_FORUM_T2_FAMILY) && cc.size_class == NTAG215_SIZE_CLASS =>
            {
                CardFamily::Ntag215
            }
            _ => self,
        }
    }
}

impl fmt::Display for CardFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardFamily::ClassicProbable => write!(f, "MIFARE Classic 1K (probable)"),
            CardFamily::UltralightProbable => write!(f, "MIFARE Ultralight / NTAG (probable)"),
            CardFamily::Classic4kProbable => write!(f, "MIFARE Classic 4K (probable)"),
            CardFamily::Ntag215 => write!(f, "NTAG215"),
            CardFamily::Unknown(n) => write!(f, "unknown ({}-byte UID)", n),
        }
    }
}
