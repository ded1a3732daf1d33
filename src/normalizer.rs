//! Reduce captured text to a credential envelope
//!
//! Text reaches the verifier from tags, QR scanners and the clipboard, and
//! each source mangles it differently (hex dumps, stray quotes, full-width
//! pipes, deep links). [`normalize`] applies a fixed sequence of clean-up
//! steps and classifies the result:
//!
//! 1. pure hex is decoded to UTF-8 (kept as-is when the bytes are not text)
//! 2. one layer of surrounding quotes is removed
//! 3. `‖` / `｜` become `|`, line breaks become spaces
//! 4. `NFC_ENC_V1:` or a JSON object with a member id ⇒ compact envelope
//! 5. `payload|signature|metadata` ⇒ standard envelope
//! 6. otherwise, an absolute URL's `qr`, `data` or `code` parameter is
//!    tried once more as step 5
//!
//! The function is pure and total: every input maps to exactly one envelope
//! or one rejection.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Version marker of the compact tag format
pub const COMPACT_MARKER: &str = "NFC_ENC_V1:";

const URL_PARAMS: [&str; 3] = ["qr", "data", "code"];

/// Why captured text could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationRejection {
    #[error("no text captured")]
    Empty,

    #[error("text does not match any credential format")]
    Unparseable,

    #[error("credential part is not valid base64")]
    InvalidEncoding,
}

/// Pipe-delimited signed credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEnvelope {
    /// Signed JSON payload bytes
    pub payload: Vec<u8>,
    /// Raw RSA-PSS signature
    pub signature: Vec<u8>,
    /// Third part as captured (base64 JSON metadata), not yet decoded
    pub metadata: String,
}

/// Compact tag payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactPayload {
    /// Masked bytes following the version marker
    Masked(Vec<u8>),
    /// Plain JSON object
    Clear(Vec<u8>),
}

/// Decision-ready form of captured text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEnvelope {
    Standard(StandardEnvelope),
    Compact(CompactPayload),
}

impl CredentialEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Standard(_) => "standard",
            Self::Compact(CompactPayload::Masked(_)) => "compact_masked",
            Self::Compact(CompactPayload::Clear(_)) => "compact_clear",
        }
    }
}

/// Classify captured text
pub fn normalize(input: &str) -> Result<CredentialEnvelope, NormalizationRejection> {
    let mut text = input.trim().to_string();
    if text.is_empty() {
        return Err(NormalizationRejection::Empty);
    }

    if looks_like_hex(&text) {
        if let Some(decoded) = hex::decode(&text)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            text = decoded.trim().to_string();
        }
    }

    let text = strip_quotes(&text);
    let text = text
        .replace(['‖', '｜'], "|")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(NormalizationRejection::Empty);
    }

    if let Some(compact) = classify_compact(&text)? {
        return Ok(CredentialEnvelope::Compact(compact));
    }

    if let Some(standard) = split_standard(&text)? {
        return Ok(CredentialEnvelope::Standard(standard));
    }

    if let Some(param) = url_parameter(&text) {
        if let Some(standard) = split_standard(&param)? {
            return Ok(CredentialEnvelope::Standard(standard));
        }
    }

    Err(NormalizationRejection::Unparseable)
}

fn looks_like_hex(s: &str) -> bool {
    s.len() % 2 == 0 && !s.contains('|') && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn classify_compact(text: &str) -> Result<Option<CompactPayload>, NormalizationRejection> {
    if let Some(pos) = text.find(COMPACT_MARKER) {
        let blob = text[pos + COMPACT_MARKER.len()..]
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let bytes = decode_base64_lenient(blob).ok_or(NormalizationRejection::InvalidEncoding)?;
        return Ok(Some(CompactPayload::Masked(bytes)));
    }

    if text.starts_with('{') && text.ends_with('}') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) {
            if map.contains_key("mid") || map.contains_key("member_id") {
                return Ok(Some(CompactPayload::Clear(text.as_bytes().to_vec())));
            }
        }
    }

    Ok(None)
}

fn split_standard(text: &str) -> Result<Option<StandardEnvelope>, NormalizationRejection> {
    let parts: Vec<&str> = text.split('|').collect();
    let [payload, signature, metadata] = parts.as_slice() else {
        return Ok(None);
    };

    let payload = decode_base64_lenient(payload).ok_or(NormalizationRejection::InvalidEncoding)?;
    let signature =
        decode_base64_lenient(signature).ok_or(NormalizationRejection::InvalidEncoding)?;
    Ok(Some(StandardEnvelope {
        payload,
        signature,
        metadata: metadata.trim().to_string(),
    }))
}

fn url_parameter(text: &str) -> Option<String> {
    let url = Url::parse(text).ok()?;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    URL_PARAMS.iter().find_map(|name| {
        pairs
            .iter()
            .find(|(key, value)| key == name && !value.trim().is_empty())
            // form decoding turned an unescaped base64 `+` into a space
            .map(|(_, value)| value.trim().replace(' ', "+"))
    })
}

/// Decode base64 with whitespace removed and padding recovered
///
/// Accepts the standard and the URL-safe alphabet. Empty input is rejected.
pub(crate) fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    let mut cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    while cleaned.ends_with('=') {
        cleaned.pop();
    }
    if cleaned.is_empty() || cleaned.len() % 4 == 1 {
        return None;
    }
    let padding = (4 - cleaned.len() % 4) % 4;
    cleaned.extend(std::iter::repeat('=').take(padding));

    STANDARD
        .decode(&cleaned)
        .or_else(|_| URL_SAFE.decode(&cleaned))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn triplet() -> String {
        format!(
            "{}|{}|{}",
            b64(br#"{"member_id":"M-1"}"#),
            b64(&[0xAB; 16]),
            b64(br#"{"version":"1.0"}"#)
        )
    }

    fn expect_standard(input: &str) -> StandardEnvelope {
        match normalize(input) {
            Ok(CredentialEnvelope::Standard(env)) => env,
            other => panic!("expected standard envelope, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_triplet() {
        let env = expect_standard(&triplet());
        assert_eq!(env.payload, br#"{"member_id":"M-1"}"#.to_vec());
        assert_eq!(env.signature, vec![0xAB; 16]);
        assert_eq!(env.metadata, b64(br#"{"version":"1.0"}"#));
    }

    #[test]
    fn test_hex_wrapped_triplet() {
        let hexed = hex::encode(triplet());
        assert_eq!(expect_standard(&hexed), expect_standard(&triplet()));
    }

    #[test]
    fn test_hex_that_is_not_text_is_kept() {
        // 0xFF 0xFE is not UTF-8, so the hex string itself is classified
        assert_eq!(normalize("FFFE"), Err(NormalizationRejection::Unparseable));
    }

    #[test]
    fn test_quotes_and_exotic_pipes() {
        let mangled = format!("\"{}\"", triplet().replacen('|', "‖", 1).replacen('|', "｜", 1));
        assert_eq!(expect_standard(&mangled), expect_standard(&triplet()));

        let single = format!("'{}'", triplet());
        assert_eq!(expect_standard(&single), expect_standard(&triplet()));
    }

    #[test]
    fn test_line_breaks_and_missing_padding() {
        let payload = b64(b"abcd").trim_end_matches('=').to_string();
        let input = format!("{}\r\n|{}|meta", payload, b64(&[1, 2, 3, 4, 5]));
        let env = expect_standard(&input);
        assert_eq!(env.payload, b"abcd".to_vec());
        assert_eq!(env.metadata, "meta");
    }

    #[test]
    fn test_url_parameter() {
        let triplet = triplet();
        let encoded: String = url::form_urlencoded::byte_serialize(triplet.as_bytes()).collect();
        let link = format!("https://verify.example.org/scan?lang=en&data={}", encoded);
        assert_eq!(expect_standard(&link), expect_standard(&triplet));

        // `qr` wins over `code` regardless of position
        let link = format!("https://x.example/?code=zzz&qr={}", encoded);
        assert_eq!(expect_standard(&link), expect_standard(&triplet));
    }

    #[test]
    fn test_url_parameter_with_unescaped_plus() {
        let sig = vec![0xFB; 12]; // base64 "+/v7" pattern
        let triplet = format!("{}|{}|m", b64(b"{}"), b64(&sig));
        assert!(triplet.contains('+'));
        // pipes escaped, `+` left raw as hand-built links do
        let link = format!("https://x.example/v?qr={}", triplet.replace('|', "%7C"));
        assert_eq!(expect_standard(&link).signature, sig);
    }

    #[test]
    fn test_compact_marker() {
        let input = format!("  {}{}  ", COMPACT_MARKER, b64(&[1, 2, 3]));
        assert_eq!(
            normalize(&input),
            Ok(CredentialEnvelope::Compact(CompactPayload::Masked(vec![1, 2, 3])))
        );

        let embedded = format!("tag:{}{}", COMPACT_MARKER, b64(&[9, 9]));
        assert_eq!(
            normalize(&embedded),
            Ok(CredentialEnvelope::Compact(CompactPayload::Masked(vec![9, 9])))
        );

        assert_eq!(
            normalize("NFC_ENC_V1:***"),
            Err(NormalizationRejection::InvalidEncoding)
        );
    }

    #[test]
    fn test_clear_compact_json() {
        let json = r#"{"v":1,"mid":"42","name":"Ada","exp":"20991231","sig":"x"}"#;
        assert_eq!(
            normalize(json),
            Ok(CredentialEnvelope::Compact(CompactPayload::Clear(
                json.as_bytes().to_vec()
            )))
        );
        assert_eq!(
            normalize(r#"{"other":1}"#),
            Err(NormalizationRejection::Unparseable)
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(normalize(""), Err(NormalizationRejection::Empty));
        assert_eq!(normalize("   \n"), Err(NormalizationRejection::Empty));
        assert_eq!(normalize("\"\""), Err(NormalizationRejection::Empty));
        assert_eq!(normalize("hello world"), Err(NormalizationRejection::Unparseable));
        assert_eq!(normalize("a|b"), Err(NormalizationRejection::Unparseable));
        assert_eq!(
            normalize("!!!|@@@|meta"),
            Err(NormalizationRejection::InvalidEncoding)
        );
        assert_eq!(normalize("https://x.example/?qr="), Err(NormalizationRejection::Unparseable));
    }

    #[test]
    fn test_lenient_base64() {
        assert_eq!(decode_base64_lenient("aGk"), Some(b"hi".to_vec()));
        assert_eq!(decode_base64_lenient("aG k="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64_lenient("-_8"), Some(vec![0xFB, 0xFF]));
        assert_eq!(decode_base64_lenient("a"), None);
        assert_eq!(decode_base64_lenient(""), None);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_total_and_deterministic(input in "\\PC*") {
            let first = normalize(&input);
            prop_assert_eq!(first, normalize(&input));
        }

        #[test]
        fn prop_pipes_everywhere_never_panic(input in "[A-Za-z0-9+/=|‖｜\"' ]{0,64}") {
            let _ = normalize(&input);
        }
    }
}
