//! Repeating-key XOR mask for compact tag payloads
//!
//! This is obfuscation, not encryption: anyone holding one masked tag and
//! its plaintext recovers the key. Callers must treat unmasked content as
//! untrusted and label results accordingly.

use crate::types::MaskKey;

/// Apply (or remove) the mask. The operation is its own inverse.
pub fn apply_mask(data: &[u8], key: &MaskKey) -> Vec<u8> {
    let key = key.as_slice();
    data.iter()
        .zip(key.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_involution() {
        let key = MaskKey::from_passphrase("k3y").unwrap();
        let data = br#"{"v":1,"mid":"42"}"#;
        let masked = apply_mask(data, &key);
        assert_ne!(masked.as_slice(), data.as_slice());
        assert_eq!(apply_mask(&masked, &key), data.to_vec());
    }

    #[test]
    fn test_key_repeats_over_data() {
        let key = MaskKey::from_slice(&[0x01, 0x02]).unwrap();
        assert_eq!(apply_mask(&[0, 0, 0, 0, 0], &key), vec![1, 2, 1, 2, 1]);
        assert!(apply_mask(&[], &key).is_empty());
    }
}
