//! Message codec
//!
//! Every body that crosses the relay is framed the same way: the native bytes
//! are base64 encoded to text, the text is sealed with AES-256-GCM under the
//! session key (`nonce || ciphertext || tag`), and the sealed bytes are base64
//! encoded again. The content hash is the MD5 hex digest of the inner text and
//! is only used for addressing and dedup.

use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 12;

/// Symmetric session key shared by all committee members
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Parse a hex-encoded 32-byte key
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| Error::InvalidConfig(format!("encryption key is not hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidConfig(format!("encryption key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(key))
    }

    /// Generate a fresh random key
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Seal plaintext and base64 encode it for the wire
pub fn encode(plaintext: &[u8], key: &EncryptionKey) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::Internal(format!("key init failed: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Internal(format!("encrypt failed: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Base64 decode and open a wire string
pub fn decode(wire: &str, key: &EncryptionKey) -> Result<Vec<u8>> {
    let sealed = STANDARD
        .decode(wire.trim())
        .map_err(|e| Error::Decrypt(format!("body is not base64: {e}")))?;
    if sealed.len() < NONCE_LEN {
        return Err(Error::Decrypt("body too short".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::Internal(format!("key init failed: {e}")))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Decrypt("authentication failed".into()))
}

/// MD5 hex digest used for relay addressing and dedup
pub fn content_hash(plaintext: &[u8]) -> String {
    hex::encode(Md5::digest(plaintext))
}

/// Relay-scoping id of one signing round: MD5 of the hex digest string
pub fn message_id(message_hex: &str) -> String {
    content_hash(message_hex.as_bytes())
}

/// Body of a native message ready for an envelope
pub struct SealedBody {
    pub body: String,
    pub hash: String,
}

/// Frame native bytes for the relay
pub fn seal(native: &[u8], key: &EncryptionKey) -> Result<SealedBody> {
    let text = STANDARD.encode(native);
    Ok(SealedBody {
        body: encode(text.as_bytes(), key)?,
        hash: content_hash(text.as_bytes()),
    })
}

/// Recover native bytes from a relay body
pub fn open(body: &str, key: &EncryptionKey) -> Result<Vec<u8>> {
    let text = decode(body, key)?;
    STANDARD
        .decode(&text)
        .map_err(|e| Error::Decrypt(format!("inner body is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_hex(&"11".repeat(32)).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = key();
        for plaintext in [&b""[..], b"a", b"hello relay", &[0u8, 255, 7, 0][..]] {
            let wire = encode(plaintext, &key).unwrap();
            assert_eq!(decode(&wire, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_bit_flip_rejected() {
        let key = key();
        let wire = encode(b"protocol message", &key).unwrap();
        let sealed = STANDARD.decode(&wire).unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                let result = decode(&STANDARD.encode(&tampered), &key);
                assert!(matches!(result, Err(Error::Decrypt(_))), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let wire = encode(b"payload", &key()).unwrap();
        let other = EncryptionKey::from_hex(&"22".repeat(32)).unwrap();
        assert!(matches!(decode(&wire, &other), Err(Error::Decrypt(_))));
    }

    #[test]
    fn test_key_parsing() {
        assert!(EncryptionKey::from_hex("zz").is_err());
        assert!(EncryptionKey::from_hex(&"11".repeat(16)).is_err());
        let key = EncryptionKey::random();
        assert_eq!(EncryptionKey::from_hex(&key.to_hex()).unwrap().to_hex(), key.to_hex());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn test_seal_open() {
        let key = key();
        let sealed = seal(&[1, 2, 3], &key).unwrap();
        assert_eq!(open(&sealed.body, &key).unwrap(), vec![1, 2, 3]);
        assert_eq!(sealed.hash, content_hash(STANDARD.encode([1, 2, 3]).as_bytes()));

        let again = seal(&[1, 2, 3], &key).unwrap();
        assert_eq!(sealed.hash, again.hash);
        assert_ne!(sealed.body, again.body);
    }
}
