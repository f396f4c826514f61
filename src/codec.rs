//! Ticket encoder and decoder.
//!
//! Encoding serializes the ticket, optionally appends a MAC, optionally
//! encrypts the whole blob, then renders it as hex or a URL token.
//! Decoding reverses the steps.
//!
//! The two failure channels are distinct: a missing or oversized input is a
//! caller error and returns `Err`, while anything wrong with the content
//! (bad encoding, failed decryption, MAC mismatch, malformed layout) is
//! treated as untrusted data and yields `Ok(None)` with no detail.

use crate::crypto::{TicketCrypto, MAC_LENGTH};
use crate::error::{Result, TicketError};
use crate::layout;
use crate::ticket::AuthTicket;
use crate::url_token;
use serde::{Deserialize, Serialize};

/// Longest encoded ticket accepted by [`decode`]
pub const MAX_TICKET_LENGTH: usize = 4096;

/// How a ticket is protected when serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    None,
    Encrypt,
    Validate,
    #[default]
    #[serde(alias = "all")]
    EncryptAndValidate,
}

impl ProtectionMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "encrypt" | "encryption" => Some(Self::Encrypt),
            "validate" | "validation" => Some(Self::Validate),
            "all" | "encryptandvalidate" | "encrypt-and-validate" | "encrypt_and_validate" => {
                Some(Self::EncryptAndValidate)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Encrypt => "encrypt",
            Self::Validate => "validate",
            Self::EncryptAndValidate => "encrypt_and_validate",
        }
    }

    pub fn encrypts(&self) -> bool {
        matches!(self, Self::Encrypt | Self::EncryptAndValidate)
    }

    pub fn validates(&self) -> bool {
        matches!(self, Self::Validate | Self::EncryptAndValidate)
    }
}

/// Text form of an encoded ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketEncoding {
    #[default]
    Hex,
    UrlToken,
}

impl TicketEncoding {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hex" => Some(Self::Hex),
            "token" | "urltoken" | "url-token" | "url_token" => Some(Self::UrlToken),
            _ => None,
        }
    }

    /// Guess the encoding of a string: even-length hex is hex, anything
    /// else is a URL token.
    pub fn detect(encoded: &str) -> Self {
        if encoded.len() % 2 == 0 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::Hex
        } else {
            Self::UrlToken
        }
    }
}

/// Encode a ticket. Returns `None` if a date cannot be serialized, the
/// crypto provider fails, or the result would be too long to decode.
pub fn encode<C: TicketCrypto + ?Sized>(
    ticket: &AuthTicket,
    protection: ProtectionMode,
    encoding: TicketEncoding,
    crypto: &C,
) -> Option<String> {
    let mut blob = layout::serialize(ticket)?;

    if protection.validates() {
        let mac = crypto.mac(&blob)?;
        blob.extend_from_slice(&mac);
    }

    if protection.encrypts() {
        blob = crypto.encrypt(&blob)?;
    }

    let encoded = match encoding {
        TicketEncoding::Hex => hex::encode(&blob),
        TicketEncoding::UrlToken => url_token::encode(&blob),
    };

    if encoded.is_empty() || encoded.len() > MAX_TICKET_LENGTH {
        return None;
    }
    Some(encoded)
}

/// Decode a ticket.
///
/// Returns `Err(TicketError::InvalidArgument)` for an empty input or one
/// longer than [`MAX_TICKET_LENGTH`], and `Ok(None)` for any ticket that
/// fails to decode, decrypt, validate or parse.
pub fn decode<C: TicketCrypto + ?Sized>(
    encoded: &str,
    protection: ProtectionMode,
    crypto: &C,
) -> Result<Option<AuthTicket>> {
    if encoded.is_empty() {
        return Err(TicketError::InvalidArgument(
            "encoded ticket is empty".to_string(),
        ));
    }
    let chars = encoded.chars().count();
    if chars > MAX_TICKET_LENGTH {
        return Err(TicketError::InvalidArgument(format!(
            "encoded ticket is {} chars, maximum is {}",
            chars, MAX_TICKET_LENGTH
        )));
    }

    Ok(unprotect(encoded, protection, crypto).and_then(|data| layout::parse(&data)))
}

fn unprotect<C: TicketCrypto + ?Sized>(
    encoded: &str,
    protection: ProtectionMode,
    crypto: &C,
) -> Option<Vec<u8>> {
    let mut blob = match TicketEncoding::detect(encoded) {
        TicketEncoding::Hex => hex::decode(encoded).ok()?,
        TicketEncoding::UrlToken => url_token::decode(encoded)?,
    };

    if protection.encrypts() {
        blob = crypto.decrypt(&blob)?;
    }

    if protection.validates() {
        // Undersized blobs are rejected the same way as a bad MAC
        if blob.len() < MAC_LENGTH {
            return None;
        }
        let split = blob.len() - MAC_LENGTH;
        let (data, mac) = blob.split_at(split);
        if !crypto.verify_mac(data, mac) {
            return None;
        }
        blob.truncate(split);
    }

    Some(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MachineKey;
    use crate::ticket::TICKET_VERSION;
    use chrono::{Duration, TimeZone, Utc};

    const ALL_MODES: [ProtectionMode; 4] = [
        ProtectionMode::None,
        ProtectionMode::Encrypt,
        ProtectionMode::Validate,
        ProtectionMode::EncryptAndValidate,
    ];

    /// Provider that always fails
    struct BrokenCrypto;

    impl TicketCrypto for BrokenCrypto {
        fn mac(&self, _data: &[u8]) -> Option<[u8; MAC_LENGTH]> {
            None
        }
        fn encrypt(&self, _data: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn decrypt(&self, _data: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    fn key() -> MachineKey {
        MachineKey::new(&[3u8; 40], &[5u8; 32]).unwrap()
    }

    fn sample() -> AuthTicket {
        let issue = Utc.with_ymd_and_hms(2024, 6, 15, 8, 30, 0).unwrap();
        AuthTicket::new(
            TICKET_VERSION,
            "bob@example.com",
            issue,
            issue + Duration::minutes(30),
            false,
            "{\"roles\":[\"editor\"]}",
            "/",
        )
    }

    #[test]
    fn test_roundtrip_every_mode_and_encoding() {
        let key = key();
        let ticket = sample();
        for mode in ALL_MODES {
            for encoding in [TicketEncoding::Hex, TicketEncoding::UrlToken] {
                let encoded = encode(&ticket, mode, encoding, &key).unwrap();
                let decoded = decode(&encoded, mode, &key).unwrap();
                assert_eq!(decoded, Some(ticket.clone()), "{:?} {:?}", mode, encoding);
            }
        }
    }

    #[test]
    fn test_hex_output_is_lowercase_hex() {
        let encoded = encode(&sample(), ProtectionMode::Validate, TicketEncoding::Hex, &key()).unwrap();
        assert_eq!(encoded.len() % 2, 0);
        assert!(encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
        assert_eq!(TicketEncoding::detect(&encoded), TicketEncoding::Hex);
    }

    #[test]
    fn test_uppercase_hex_decodes() {
        let key = key();
        let encoded = encode(&sample(), ProtectionMode::Validate, TicketEncoding::Hex, &key).unwrap();
        let upper = encoded.to_uppercase();
        assert_eq!(
            decode(&upper, ProtectionMode::Validate, &key).unwrap(),
            Some(sample())
        );
    }

    #[test]
    fn test_detect() {
        assert_eq!(TicketEncoding::detect("00ff"), TicketEncoding::Hex);
        assert_eq!(TicketEncoding::detect("ABcd"), TicketEncoding::Hex);
        assert_eq!(TicketEncoding::detect("00f"), TicketEncoding::UrlToken);
        assert_eq!(TicketEncoding::detect("00fg"), TicketEncoding::UrlToken);
        assert_eq!(TicketEncoding::detect("YWJj0"), TicketEncoding::UrlToken);
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let key = key();
        let encoded = encode(&sample(), ProtectionMode::Validate, TicketEncoding::Hex, &key).unwrap();
        let bytes = hex::decode(&encoded).unwrap();

        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut tampered = bytes.clone();
                tampered[i] ^= 1 << bit;
                let result = decode(&hex::encode(&tampered), ProtectionMode::Validate, &key);
                assert_eq!(result, Ok(None), "byte {} bit {}", i, bit);
            }
        }
    }

    #[test]
    fn test_encrypted_bit_flip_is_rejected() {
        let key = key();
        for mode in [ProtectionMode::Encrypt, ProtectionMode::EncryptAndValidate] {
            let encoded = encode(&sample(), mode, TicketEncoding::UrlToken, &key).unwrap();
            let bytes = url_token::decode(&encoded).unwrap();
            for i in 0..bytes.len() {
                let mut tampered = bytes.clone();
                tampered[i] ^= 0x80;
                let result = decode(&url_token::encode(&tampered), mode, &key);
                assert_eq!(result, Ok(None), "{:?} byte {}", mode, i);
            }
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let encoded = encode(
            &sample(),
            ProtectionMode::EncryptAndValidate,
            TicketEncoding::Hex,
            &key(),
        )
        .unwrap();
        let other = MachineKey::new(&[4u8; 40], &[5u8; 32]).unwrap();
        assert_eq!(
            decode(&encoded, ProtectionMode::EncryptAndValidate, &other),
            Ok(None)
        );
    }

    #[test]
    fn test_unvalidated_ticket_fails_validation() {
        let key = key();
        let encoded = encode(&sample(), ProtectionMode::None, TicketEncoding::Hex, &key).unwrap();
        assert_eq!(decode(&encoded, ProtectionMode::Validate, &key), Ok(None));
    }

    #[test]
    fn test_short_blob_is_silently_rejected() {
        let key = key();
        // Ten bytes: shorter than a MAC
        assert_eq!(
            decode("00112233445566778899", ProtectionMode::Validate, &key),
            Ok(None)
        );
    }

    #[test]
    fn test_garbage_is_silently_rejected() {
        let key = key();
        for mode in ALL_MODES {
            assert_eq!(decode("not a ticket", mode, &key), Ok(None));
            assert_eq!(decode("zz", mode, &key), Ok(None));
        }
    }

    #[test]
    fn test_empty_input_is_argument_error() {
        let err = decode("", ProtectionMode::EncryptAndValidate, &key()).unwrap_err();
        assert!(matches!(err, TicketError::InvalidArgument(_)));
    }

    #[test]
    fn test_oversized_input_is_argument_error() {
        let key = key();
        let at_limit = "a".repeat(MAX_TICKET_LENGTH);
        assert_eq!(decode(&at_limit, ProtectionMode::Validate, &key), Ok(None));

        let over = "a".repeat(MAX_TICKET_LENGTH + 1);
        let err = decode(&over, ProtectionMode::Validate, &key).unwrap_err();
        assert!(matches!(err, TicketError::InvalidArgument(_)));
    }

    #[test]
    fn test_length_limit_counts_chars() {
        let key = key();
        // 2100 chars but 4200 bytes of UTF-8
        let wide = "é".repeat(2100);
        assert_eq!(decode(&wide, ProtectionMode::Validate, &key), Ok(None));

        let err = decode(&"é".repeat(MAX_TICKET_LENGTH + 1), ProtectionMode::Validate, &key)
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidArgument(_)));
    }

    #[test]
    fn test_encode_failure_returns_none() {
        let ticket = sample();
        for mode in [
            ProtectionMode::Encrypt,
            ProtectionMode::Validate,
            ProtectionMode::EncryptAndValidate,
        ] {
            assert!(encode(&ticket, mode, TicketEncoding::Hex, &BrokenCrypto).is_none());
        }
        // No crypto needed, so the broken provider is never consulted
        assert!(encode(&ticket, ProtectionMode::None, TicketEncoding::Hex, &BrokenCrypto).is_some());
    }

    #[test]
    fn test_encode_too_long_returns_none() {
        let mut ticket = sample();
        ticket.user_data = "x".repeat(MAX_TICKET_LENGTH);
        assert!(encode(&ticket, ProtectionMode::None, TicketEncoding::Hex, &key()).is_none());
    }

    #[test]
    fn test_encode_rejects_unrepresentable_date() {
        let mut ticket = sample();
        ticket.issue_date = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();
        for mode in ALL_MODES {
            assert!(encode(&ticket, mode, TicketEncoding::Hex, &key()).is_none());
        }
    }

    #[test]
    fn test_protection_mode_from_str() {
        assert_eq!(ProtectionMode::from_str("All"), Some(ProtectionMode::EncryptAndValidate));
        assert_eq!(ProtectionMode::from_str("validation"), Some(ProtectionMode::Validate));
        assert_eq!(ProtectionMode::from_str("encrypt"), Some(ProtectionMode::Encrypt));
        assert_eq!(ProtectionMode::from_str("NONE"), Some(ProtectionMode::None));
        assert_eq!(ProtectionMode::from_str("sometimes"), None);
    }
}
