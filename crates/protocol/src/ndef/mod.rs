//! NDEF "Text" records and their placement on Type 2 tag pages
//!
//! A text record is always written as a single short record:
//!
//! ```text
//! D1 01 <payload_len> 54 | <status> <lang...> <utf-8 text...>
//! ```
//!
//! `status` carries the language tag length in its low six bits; bit 7
//! selects UTF-16 and is never set by the encoder.

mod tlv;

pub use tlv::{scan_tlv, write_ndef_tlv, TlvScan, TLV_NDEF, TLV_NULL, TLV_TERMINATOR};

use crate::tag::{PageData, PAGE_SIZE};
use thiserror::Error;

/// Message begin + message end + short record, TNF well-known
pub const TEXT_RECORD_HEADER: u8 = 0xD1;
/// Record type `T`
pub const TEXT_RECORD_TYPE: u8 = b'T';

const FLAG_SHORT_RECORD: u8 = 0x10;
const FLAG_ID_LENGTH: u8 = 0x08;
const STATUS_UTF16: u8 = 0x80;
const STATUS_RESERVED: u8 = 0x40;
const LANGUAGE_LEN_MASK: u8 = 0x3F;

/// Largest payload a short record can carry
pub const MAX_SHORT_PAYLOAD: usize = 0xFF;

/// Encoding errors. Decoding never fails loudly; it yields `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NdefError {
    #[error("language tag is {0} bytes, at most 63 fit in the status byte")]
    LanguageTooLong(usize),
    #[error("text payload is {0} bytes, a short record holds at most 255")]
    PayloadTooLarge(usize),
}

/// Decoded NDEF text record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub language: String,
    pub text: String,
}

impl TextRecord {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }

    /// Text payload: status byte, language tag, UTF-8 text
    pub fn payload(&self) -> Result<Vec<u8>, NdefError> {
        let lang = self.language.as_bytes();
        if lang.len() > LANGUAGE_LEN_MASK as usize {
            return Err(NdefError::LanguageTooLong(lang.len()));
        }
        let size = 1 + lang.len() + self.text.len();
        if size > MAX_SHORT_PAYLOAD {
            return Err(NdefError::PayloadTooLarge(size));
        }

        let mut payload = Vec::with_capacity(size);
        payload.push(lang.len() as u8);
        payload.extend_from_slice(lang);
        payload.extend_from_slice(self.text.as_bytes());
        Ok(payload)
    }

    /// Complete single-record NDEF message
    pub fn to_record(&self) -> Result<Vec<u8>, NdefError> {
        let payload = self.payload()?;
        let mut record = Vec::with_capacity(4 + payload.len());
        record.extend_from_slice(&[
            TEXT_RECORD_HEADER,
            0x01,
            payload.len() as u8,
            TEXT_RECORD_TYPE,
        ]);
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Parse a single short text record
    pub fn parse_record(record: &[u8]) -> Option<Self> {
        let header = *record.first()?;
        if header & FLAG_SHORT_RECORD == 0 {
            return None;
        }
        let type_len = *record.get(1)? as usize;
        let payload_len = *record.get(2)? as usize;
        let mut pos = 3;
        let id_len = if header & FLAG_ID_LENGTH != 0 {
            let len = *record.get(pos)? as usize;
            pos += 1;
            len
        } else {
            0
        };

        if type_len != 1 || *record.get(pos)? != TEXT_RECORD_TYPE {
            return None;
        }
        pos += type_len + id_len;

        let payload = record.get(pos..pos + payload_len)?;
        Self::parse_payload(payload)
    }

    /// Parse a bare text payload (status byte onward)
    pub fn parse_payload(payload: &[u8]) -> Option<Self> {
        let status = *payload.first()?;
        let lang_len = (status & LANGUAGE_LEN_MASK) as usize;
        let language = payload.get(1..1 + lang_len)?;
        let body = &payload[1 + lang_len..];

        let text = if status & STATUS_UTF16 != 0 {
            decode_utf16(body)
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        Some(Self {
            language: String::from_utf8_lossy(language).into_owned(),
            text,
        })
    }
}

fn decode_utf16(body: &[u8]) -> String {
    let (body, little_endian) = match body {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => (body, false),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode `text` as a terminated NDEF TLV ready to be paginated
pub fn encode_text_tlv(text: &str, language: &str) -> Result<Vec<u8>, NdefError> {
    let record = TextRecord::new(text, language).to_record()?;
    let mut out = Vec::with_capacity(record.len() + 5);
    // Writing into a Vec cannot fail and the record is far below 64 KiB.
    write_ndef_tlv(&mut out, &record).map_err(|_| NdefError::PayloadTooLarge(record.len()))?;
    Ok(out)
}

/// Split bytes into pages, zero-padding the last one
pub fn paginate(bytes: &[u8]) -> Vec<PageData> {
    bytes
        .chunks(PAGE_SIZE)
        .map(|chunk| {
            let mut page = [0u8; PAGE_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);
            page
        })
        .collect()
}

/// Read pages from `data_start` until the NDEF TLV can be judged
///
/// Stops when the TLV is complete or invalid, when a page read fails, or
/// after `max_pages` pages. Returns every byte read and the final scan state.
pub fn scan_pages<F>(mut read_page: F, data_start: u8, max_pages: usize) -> (Vec<u8>, TlvScan)
where
    F: FnMut(u8) -> Option<PageData>,
{
    let mut buf = Vec::with_capacity(max_pages.min(256) * PAGE_SIZE);
    let mut state = TlvScan::Incomplete;

    for offset in 0..max_pages {
        let Some(page) = u8::try_from(offset)
            .ok()
            .and_then(|o| data_start.checked_add(o))
        else {
            break;
        };
        let Some(data) = read_page(page) else {
            break;
        };
        buf.extend_from_slice(&data);

        state = scan_tlv(&buf);
        if state != TlvScan::Incomplete {
            break;
        }
    }

    (buf, state)
}

/// Decode the text record stored from `data_start` onward
pub fn decode_text_pages<F>(read_page: F, data_start: u8, max_pages: usize) -> Option<TextRecord>
where
    F: FnMut(u8) -> Option<PageData>,
{
    let (buf, state) = scan_pages(read_page, data_start, max_pages);
    decode_scanned(&buf, state)
}

fn decode_scanned(buf: &[u8], state: TlvScan) -> Option<TextRecord> {
    match state {
        TlvScan::Complete { start, len } => TextRecord::parse_record(&buf[start..start + len]),
        _ => None,
    }
}

/// Decode text from bytes handed over by a platform NFC stack
///
/// Accepts a TLV stream, a bare NDEF record or a bare text payload.
pub fn decode_text_from_bytes(raw: &[u8]) -> Option<TextRecord> {
    if let state @ TlvScan::Complete { .. } = scan_tlv(raw) {
        if let Some(record) = decode_scanned(raw, state) {
            return Some(record);
        }
    }
    if let Some(record) = TextRecord::parse_record(raw) {
        return Some(record);
    }
    if looks_like_text_payload(raw) {
        return TextRecord::parse_payload(raw);
    }
    None
}

fn looks_like_text_payload(raw: &[u8]) -> bool {
    let Some(&status) = raw.first() else {
        return false;
    };
    let lang_len = (status & LANGUAGE_LEN_MASK) as usize;
    status & STATUS_RESERVED == 0
        && lang_len > 0
        && raw
            .get(1..1 + lang_len)
            .is_some_and(|lang| lang.iter().all(|b| b.is_ascii_alphabetic() || *b == b'-'))
}
