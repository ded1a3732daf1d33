//! Tag page codec and exclusive tag sessions
//!
//! # Example
//!
//! ```
//! use cardtrust::tag::{shared_transport, TagSession};
//! use cardtrust::transport::MemoryTag;
//!
//! # async fn example() -> Result<(), cardtrust::tag::TagError> {
//! let reader = shared_transport(MemoryTag::blank(vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
//!
//! let mut session = TagSession::open(&reader).await;
//! session.codec().write_text("hello", "en")?;
//! let read = session.codec().read_text(76);
//! assert_eq!(read.text(), Some("hello"));
//! # Ok(())
//! # }
//! ```

use crate::transport::{PageTransport, TransportError};
use cardtrust_protocol::ndef::{scan_pages, TlvScan};
use cardtrust_protocol::{
    encode_text_tlv, paginate, CapabilityContainer, CardFamily, NdefError, TextRecord, CC_PAGE,
    DATA_START_PAGE, PAGE_SIZE,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Errors from multi-page tag operations
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("NDEF encoding error: {0}")]
    Ndef(#[from] NdefError),

    #[error("Tag too small: need {needed} bytes, data area holds {available}")]
    Capacity { needed: usize, available: usize },
}

impl TagError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result of [`TagPageCodec::ensure_capability_container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Family bytes already matched; nothing was written
    Present(CapabilityContainer),
    /// The container was (re)written
    Written(CapabilityContainer),
}

impl ContainerStatus {
    pub fn container(&self) -> CapabilityContainer {
        match self {
            Self::Present(cc) | Self::Written(cc) => *cc,
        }
    }
}

/// Identifier and family guess for the tag in the field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidProbe {
    pub uid: Vec<u8>,
    /// Heuristic only, derived from the UID length
    pub family: CardFamily,
}

impl UidProbe {
    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

/// Everything a bounded NDEF scan produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    pub record: Option<TextRecord>,
    /// Every byte read from the data area, in page order
    pub raw: Vec<u8>,
    pub scan: TlvScan,
}

impl TagRead {
    pub fn text(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.text.as_str())
    }
}

/// Multi-page operations on top of a [`PageTransport`]
pub struct TagPageCodec<'a, T: PageTransport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: PageTransport + ?Sized> TagPageCodec<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Make sure page 3 carries the expected family bytes
    ///
    /// Only the two family bytes are compared; a matching container is left
    /// alone even when its size class differs.
    pub fn ensure_capability_container(
        &mut self,
        family: [u8; 2],
        size_class: u8,
    ) -> Result<ContainerStatus, TransportError> {
        let current = CapabilityContainer::from_page(self.transport.read_page(CC_PAGE)?);
        if current.matches_family(family) {
            debug!(?current, "capability container already present");
            return Ok(ContainerStatus::Present(current));
        }

        let desired = CapabilityContainer::new(family, size_class);
        self.transport.write_page_exact(CC_PAGE, &desired.to_page())?;
        info!(
            from = ?current.to_page(),
            to = ?desired.to_page(),
            "capability container written"
        );
        Ok(ContainerStatus::Written(desired))
    }

    /// Read the UID and guess the card family from its length
    ///
    /// When the capability container is readable and identifies an NTAG215,
    /// the guess is upgraded accordingly. A failing container read does not
    /// fail the probe.
    pub fn probe_uid(&mut self) -> Result<UidProbe, TransportError> {
        let uid = self.transport.get_uid()?;
        let cc = self
            .transport
            .read_page(CC_PAGE)
            .ok()
            .map(CapabilityContainer::from_page);
        let family = CardFamily::from_uid(&uid).refine(cc);
        debug!(uid = %hex::encode_upper(&uid), %family, "probed tag");
        Ok(UidProbe { uid, family })
    }

    /// Write `text` as a single NDEF text record from the data-start page
    ///
    /// Returns the number of pages written.
    pub fn write_text(&mut self, text: &str, language: &str) -> Result<usize, TagError> {
        let tlv = encode_text_tlv(text, language)?;
        let expected = CapabilityContainer::ntag215();
        let cc = self
            .ensure_capability_container(expected.family, expected.size_class)?
            .container();

        let available = cc.data_area_bytes();
        if tlv.len() > available {
            return Err(TagError::Capacity {
                needed: tlv.len(),
                available,
            });
        }

        let pages = paginate(&tlv);
        for (offset, page) in pages.iter().enumerate() {
            self.transport
                .write_page_exact(DATA_START_PAGE + offset as u8, page)?;
        }
        info!(pages = pages.len(), bytes = tlv.len(), "NDEF text written");
        Ok(pages.len())
    }

    /// Bounded NDEF scan from the data-start page
    ///
    /// Never fails: page read errors end the scan and whatever was read so
    /// far is returned in [`TagRead::raw`]. When the data area does not start
    /// with an NDEF TLV, pages keep being read into `raw` up to the first
    /// blank page so the bytes can still be interpreted as text.
    pub fn read_text(&mut self, max_pages: usize) -> TagRead {
        let transport = &mut *self.transport;
        let mut read_page = |page: u8| match transport.read_page(page) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(page, error = %e, "page read failed, ending scan");
                None
            }
        };
        let (mut raw, scan) = scan_pages(&mut read_page, DATA_START_PAGE, max_pages);

        if scan == TlvScan::Invalid {
            let read_so_far = raw.len() / PAGE_SIZE;
            for offset in read_so_far..max_pages {
                let Some(page) = u8::try_from(offset)
                    .ok()
                    .and_then(|o| DATA_START_PAGE.checked_add(o))
                else {
                    break;
                };
                match read_page(page) {
                    Some(data) if data != [0u8; PAGE_SIZE] => raw.extend_from_slice(&data),
                    _ => break,
                }
            }
        }

        let record = match scan {
            TlvScan::Complete { start, len } => TextRecord::parse_record(&raw[start..start + len]),
            _ => None,
        };
        debug!(bytes = raw.len(), ?scan, decoded = record.is_some(), "NDEF scan finished");
        TagRead { record, raw, scan }
    }
}

/// One physical transport shared between sessions and the presence monitor
pub type SharedTransport<T> = Arc<Mutex<T>>;

pub fn shared_transport<T: PageTransport>(transport: T) -> SharedTransport<T> {
    Arc::new(Mutex::new(transport))
}

/// Exclusive access to a tag for the duration of one read/verify sequence
///
/// The lock is released when the session is dropped, whether the sequence
/// finished or failed.
pub struct TagSession<T: PageTransport> {
    guard: OwnedMutexGuard<T>,
}

impl<T: PageTransport> TagSession<T> {
    /// Wait for exclusive access
    pub async fn open(transport: &SharedTransport<T>) -> Self {
        Self {
            guard: Arc::clone(transport).lock_owned().await,
        }
    }

    /// Take exclusive access only if nobody else holds it
    pub fn try_open(transport: &SharedTransport<T>) -> Option<Self> {
        Arc::clone(transport)
            .try_lock_owned()
            .ok()
            .map(|guard| Self { guard })
    }

    pub fn codec(&mut self) -> TagPageCodec<'_, T> {
        TagPageCodec::new(&mut *self.guard)
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.guard
    }
}
