//! Page-level access to a contactless tag
//!
//! [`PageTransport`] is the only I/O seam of the tag stack. It performs no
//! retries; callers decide retry policy. Two implementations ship here:
//!
//! - [`ApduPageTransport`] drives a PC/SC style reader through a raw
//!   [`CardChannel`] (the platform driver is a black box behind it)
//! - [`MemoryTag`] is an in-memory NTAG215 image, used by tests and the
//!   simulator in the RPC server

use cardtrust_protocol::apdu::split_reply;
use cardtrust_protocol::binary::BinaryWrite;
use cardtrust_protocol::{CapabilityContainer, PageCommand, PageData, CC_PAGE, PAGE_SIZE};
use thiserror::Error;
use tracing::trace;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no tag present")]
    NotPresent,

    #[error("tag operation timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("reader returned status {sw1:02X}{sw2:02X}")]
    Status { sw1: u8, sw2: u8 },

    #[error("page writes must be exactly 4 bytes, got {0}")]
    InvalidPageLength(usize),
}

impl TransportError {
    /// Returns true if the error is potentially retryable
    ///
    /// Everything that depends on the tag or the radio link is; a
    /// malformed write request is a caller bug and is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidPageLength(_))
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::NotPresent => Some("Place the tag on the reader and try again"),
            Self::Timeout => Some("Hold the tag still on the reader and retry"),
            _ => None,
        }
    }
}

/// Fixed-size page access to a tag
pub trait PageTransport: Send {
    /// Read the 4-byte page at `page`
    fn read_page(&mut self, page: u8) -> Result<PageData, TransportError>;

    /// Write one full page
    fn write_page_exact(&mut self, page: u8, data: &PageData) -> Result<(), TransportError>;

    /// Fetch the tag identifier
    fn get_uid(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Write a page from an arbitrary slice
    ///
    /// Anything but exactly four bytes is rejected before the tag is touched.
    fn write_page(&mut self, page: u8, data: &[u8]) -> Result<(), TransportError> {
        let data: PageData = data
            .try_into()
            .map_err(|_| TransportError::InvalidPageLength(data.len()))?;
        self.write_page_exact(page, &data)
    }
}

/// Raw command channel to a reader (one APDU in, one reply out)
pub trait CardChannel: Send {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// [`PageTransport`] over reader pseudo-APDUs
#[derive(Debug)]
pub struct ApduPageTransport<C> {
    channel: C,
}

impl<C: CardChannel> ApduPageTransport<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Send a command and return the reply data when the trailer is `90 00`
    fn exchange(&mut self, command: PageCommand) -> Result<Vec<u8>, TransportError> {
        let apdu = command
            .to_bytes()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        trace!(?command, "transmit");
        let reply = self.channel.transmit(&apdu)?;
        let (data, sw) =
            split_reply(&reply).map_err(|e| TransportError::Protocol(e.to_string()))?;
        if !sw.is_success() {
            return Err(TransportError::Status {
                sw1: sw.sw1,
                sw2: sw.sw2,
            });
        }
        Ok(data.to_vec())
    }
}

impl<C: CardChannel> PageTransport for ApduPageTransport<C> {
    fn read_page(&mut self, page: u8) -> Result<PageData, TransportError> {
        let data = self.exchange(PageCommand::ReadPage(page))?;
        // Some readers return the 16-byte READ block; only the first page matters.
        data.get(..PAGE_SIZE)
            .and_then(|d| PageData::try_from(d).ok())
            .ok_or_else(|| {
                TransportError::Protocol(format!(
                    "page {} read returned {} bytes",
                    page,
                    data.len()
                ))
            })
    }

    fn write_page_exact(&mut self, page: u8, data: &PageData) -> Result<(), TransportError> {
        self.exchange(PageCommand::WritePage(page, *data)).map(|_| ())
    }

    fn get_uid(&mut self) -> Result<Vec<u8>, TransportError> {
        let uid = self.exchange(PageCommand::GetUid)?;
        if uid.is_empty() {
            return Err(TransportError::Protocol("empty UID".to_string()));
        }
        Ok(uid)
    }
}

/// Pages on an NTAG215 (0x00..=0x86)
pub const NTAG215_PAGE_COUNT: usize = 135;

const SW_OK: [u8; 2] = [0x90, 0x00];
const SW_WRONG_PARAMS: [u8; 2] = [0x6A, 0x82];
const SW_NOT_SUPPORTED: [u8; 2] = [0x6D, 0x00];

/// In-memory tag image
///
/// Pages below the capability container are read-only, as on real tags.
#[derive(Debug, Clone)]
pub struct MemoryTag {
    uid: Vec<u8>,
    pages: Vec<PageData>,
    present: bool,
    fail_reads_from: Option<u8>,
    reads: usize,
    writes: usize,
}

impl MemoryTag {
    /// Blank NTAG215 with a zeroed capability container
    pub fn blank(uid: impl Into<Vec<u8>>) -> Self {
        Self::with_page_count(uid, NTAG215_PAGE_COUNT)
    }

    /// Formatted NTAG215 (`E1 10 3F 00` in page 3)
    pub fn ntag215(uid: impl Into<Vec<u8>>) -> Self {
        let mut tag = Self::blank(uid);
        tag.pages[CC_PAGE as usize] = CapabilityContainer::ntag215().to_page();
        tag
    }

    pub fn with_page_count(uid: impl Into<Vec<u8>>, page_count: usize) -> Self {
        Self {
            uid: uid.into(),
            pages: vec![[0u8; PAGE_SIZE]; page_count],
            present: true,
            fail_reads_from: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Copy `pages` into the image starting at `start`, ignoring overflow
    pub fn load_pages(&mut self, start: u8, pages: &[PageData]) {
        for (i, page) in pages.iter().enumerate() {
            if let Some(slot) = self.pages.get_mut(start as usize + i) {
                *slot = *page;
            }
        }
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Simulate a different card being placed on the reader
    pub fn set_uid(&mut self, uid: impl Into<Vec<u8>>) {
        self.uid = uid.into();
    }

    /// Make every read at or above `page` fail with a timeout
    pub fn fail_reads_from(&mut self, page: u8) {
        self.fail_reads_from = Some(page);
    }

    pub fn page(&self, page: u8) -> Option<PageData> {
        self.pages.get(page as usize).copied()
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn check_present(&self) -> Result<(), TransportError> {
        if self.present {
            Ok(())
        } else {
            Err(TransportError::NotPresent)
        }
    }
}

impl PageTransport for MemoryTag {
    fn read_page(&mut self, page: u8) -> Result<PageData, TransportError> {
        self.check_present()?;
        self.reads += 1;
        if self.fail_reads_from.is_some_and(|from| page >= from) {
            return Err(TransportError::Timeout);
        }
        self.page(page).ok_or(TransportError::Status {
            sw1: SW_WRONG_PARAMS[0],
            sw2: SW_WRONG_PARAMS[1],
        })
    }

    fn write_page_exact(&mut self, page: u8, data: &PageData) -> Result<(), TransportError> {
        self.check_present()?;
        if page < CC_PAGE {
            return Err(TransportError::Protocol(format!("page {} is read-only", page)));
        }
        let slot = self
            .pages
            .get_mut(page as usize)
            .ok_or(TransportError::Status {
                sw1: SW_WRONG_PARAMS[0],
                sw2: SW_WRONG_PARAMS[1],
            })?;
        *slot = *data;
        self.writes += 1;
        Ok(())
    }

    fn get_uid(&mut self) -> Result<Vec<u8>, TransportError> {
        self.check_present()?;
        Ok(self.uid.clone())
    }
}

impl CardChannel for MemoryTag {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError> {
        let status = |result: Result<Vec<u8>, TransportError>| match result {
            Ok(mut data) => {
                data.extend_from_slice(&SW_OK);
                Ok(data)
            }
            Err(TransportError::Status { sw1, sw2 }) => Ok(vec![sw1, sw2]),
            Err(TransportError::Protocol(_)) => Ok(SW_WRONG_PARAMS.to_vec()),
            Err(other) => Err(other),
        };

        match apdu {
            [0xFF, 0xB0, 0x00, page, 0x04] => status(self.read_page(*page).map(|p| p.to_vec())),
            [0xFF, 0xD6, 0x00, page, 0x04, data @ ..] if data.len() == PAGE_SIZE => {
                let page = *page;
                status(self.write_page(page, data).map(|_| Vec::new()))
            }
            [0xFF, 0xCA, 0x00, 0x00, 0x00] => status(self.get_uid()),
            _ => Ok(SW_NOT_SUPPORTED.to_vec()),
        }
    }
}
