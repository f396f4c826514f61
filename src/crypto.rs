//! Keyed cryptography for ticket protection.
//!
//! The codec only talks to [`TicketCrypto`]. [`MachineKey`] is the site-key
//! implementation: HMAC-SHA1 for validation and AES-256-GCM for encryption.

use crate::error::{Result, TicketError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Length of the validation MAC appended to a ticket
pub const MAC_LENGTH: usize = 20;

const NONCE_LENGTH: usize = 12;
const MIN_VALIDATION_KEY_BYTES: usize = 20;
const MAX_VALIDATION_KEY_BYTES: usize = 64;
const MIN_DECRYPTION_KEY_BYTES: usize = 16;

type HmacSha1 = Hmac<Sha1>;

/// Provider of the keyed operations used to protect tickets.
///
/// Every operation reports failure as `None`; the codec turns that into an
/// encode failure or a rejected ticket.
pub trait TicketCrypto {
    fn mac(&self, data: &[u8]) -> Option<[u8; MAC_LENGTH]>;

    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>>;

    fn verify_mac(&self, data: &[u8], mac: &[u8]) -> bool {
        self.mac(data).is_some_and(|expected| expected.as_slice() == mac)
    }
}

/// Site-wide validation and decryption keys
#[derive(Clone)]
pub struct MachineKey {
    validation_key: Vec<u8>,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineKey")
            .field("validation_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl MachineKey {
    /// Build from raw key bytes. The AES key is the SHA-256 of the
    /// decryption key, so any decryption key of at least 16 bytes works.
    pub fn new(validation_key: &[u8], decryption_key: &[u8]) -> Result<Self> {
        if !(MIN_VALIDATION_KEY_BYTES..=MAX_VALIDATION_KEY_BYTES).contains(&validation_key.len()) {
            return Err(TicketError::InvalidKey(format!(
                "validation key must be {}-{} bytes, got {}",
                MIN_VALIDATION_KEY_BYTES,
                MAX_VALIDATION_KEY_BYTES,
                validation_key.len()
            )));
        }
        if decryption_key.len() < MIN_DECRYPTION_KEY_BYTES {
            return Err(TicketError::InvalidKey(format!(
                "decryption key must be at least {} bytes, got {}",
                MIN_DECRYPTION_KEY_BYTES,
                decryption_key.len()
            )));
        }

        let aes_key = Sha256::digest(decryption_key);
        let cipher = Aes256Gcm::new_from_slice(&aes_key)
            .map_err(|e| TicketError::InvalidKey(format!("failed to initialize cipher: {e}")))?;

        Ok(Self {
            validation_key: validation_key.to_vec(),
            cipher,
        })
    }

    /// Build from hex-encoded keys
    pub fn from_hex(validation_key: &str, decryption_key: &str) -> Result<Self> {
        let validation = hex::decode(validation_key.trim())
            .map_err(|e| TicketError::InvalidKey(format!("validation key is not hex: {e}")))?;
        let decryption = hex::decode(decryption_key.trim())
            .map_err(|e| TicketError::InvalidKey(format!("decryption key is not hex: {e}")))?;
        Self::new(&validation, &decryption)
    }

    /// Random keys that live as long as the process
    pub fn generate() -> Result<Self> {
        let (validation, decryption) = random_key_bytes();
        Self::new(&validation, &decryption)
    }
}

/// Fresh random keys as hex strings: (validation, decryption)
pub fn generate_hex_keys() -> (String, String) {
    let (validation, decryption) = random_key_bytes();
    (hex::encode(validation), hex::encode(decryption))
}

fn random_key_bytes() -> ([u8; 64], [u8; 32]) {
    let mut rng = rand::rng();
    let mut validation = [0u8; 64];
    rng.fill(&mut validation[..]);
    let decryption: [u8; 32] = rng.random();
    (validation, decryption)
}

impl TicketCrypto for MachineKey {
    fn mac(&self, data: &[u8]) -> Option<[u8; MAC_LENGTH]> {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.validation_key).ok()?;
        mac.update(data);
        let tag = mac.finalize().into_bytes();

        let mut out = [0u8; MAC_LENGTH];
        out.copy_from_slice(&tag);
        Some(out)
    }

    fn verify_mac(&self, data: &[u8], expected: &[u8]) -> bool {
        let Ok(mut mac) = <HmacSha1 as Mac>::new_from_slice(&self.validation_key) else {
            return false;
        };
        mac.update(data);
        mac.verify_slice(expected).is_ok()
    }

    /// Output is `nonce || ciphertext || tag`
    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, data).ok()?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Some(combined)
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < NONCE_LENGTH {
            return None;
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .ok()
    }
}
