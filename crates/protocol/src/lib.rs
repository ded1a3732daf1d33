//! cardtrust Protocol Types
//!
//! This crate contains the wire formats used when talking to a contactless
//! membership tag:
//! - Reader pseudo-APDUs for page read/write and UID retrieval
//! - Type 2 tag layout (pages, capability container, card family heuristic)
//! - NDEF TLV containers and NDEF "Text" records
//!
//! This crate contains NO cryptographic operations and NO I/O.
//! Page access is expressed through caller-supplied closures.

pub mod apdu;
pub mod binary;
pub mod ndef;
pub mod tag;

// Re-export commonly used types
pub use apdu::{ApduError, PageCommand, StatusWord};
pub use ndef::{
    decode_text_from_bytes, decode_text_pages, encode_text_tlv, paginate, scan_pages, NdefError,
    TextRecord, TlvScan,
};
pub use tag::{
    CapabilityContainer, CardFamily, PageData, CC_PAGE, DATA_START_PAGE, DEFAULT_SCAN_END_PAGE,
    PAGE_SIZE,
};
