//! Zeroizing key types
//!
//! Secret material handed to this crate is wrapped so it is cleared from
//! memory on drop and never shows up in `Debug` output.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret used to mask compact tag payloads, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MaskKey(pub(crate) Vec<u8>);

impl MaskKey {
    /// Create a mask key from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(MaskKey(bytes.to_vec()))
    }

    /// Create a mask key from a passphrase (its UTF-8 bytes)
    pub fn from_passphrase(passphrase: &str) -> Result<Self, KeyError> {
        Self::from_slice(passphrase.as_bytes())
    }

    /// Get a reference to the key bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for MaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MaskKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Key-related errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Key material must not be empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(MaskKey::from_passphrase(""), Err(KeyError::Empty)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = MaskKey::from_passphrase("hunter2").unwrap();
        let shown = format!("{:?}", key);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("7 bytes"));
    }
}
