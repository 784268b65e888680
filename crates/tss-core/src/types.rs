//! Core types shared by every ceremony

use crate::{Error, Result};
use k256::ecdsa;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use msg_relay::{RelayMessage as Envelope, SetupKey};

/// Opaque party identifier, unique within a session
pub type PartyId = String;

/// Session identifier (UUID string)
pub type SessionId = String;

/// Which ceremony a runner drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TssAction {
    Keygen,
    Reshare,
    Migrate,
    Sign,
}

impl std::fmt::Display for TssAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TssAction::Keygen => "keygen",
            TssAction::Reshare => "reshare",
            TssAction::Migrate => "migrate",
            TssAction::Sign => "sign",
        };
        f.write_str(name)
    }
}

/// Signature family produced by a native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// 65 bytes `r || s || v`
    Ecdsa,
    /// Raw signature bytes (EdDSA, Schnorr)
    Eddsa,
    /// Raw lattice signature bytes
    MlDsa,
}

/// Key share produced by keygen, reshare or migrate
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// Public key (hex)
    #[zeroize(skip)]
    pub public_key: String,

    /// Chain code (hex), only for ECDSA keys
    #[zeroize(skip)]
    pub chain_code: Option<String>,

    /// Native key share bytes
    #[serde(with = "hex_bytes")]
    pub share: Vec<u8>,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("public_key", &self.public_key)
            .field("chain_code", &self.chain_code)
            .field("share", &format_args!("<{} bytes>", self.share.len()))
            .finish()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// ECDSA signature (r, s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    /// R component
    pub r: [u8; 32],
    /// S component
    pub s: [u8; 32],
    /// Recovery ID
    pub recovery_id: u8,
    /// DER encoding of (r, s)
    pub der: Vec<u8>,
}

impl EcdsaSignature {
    /// Parse the 65-byte `r || s || v` output of a native ECDSA signing session
    pub fn from_native(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::Protocol(format!(
                "ECDSA signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);

        let sig = ecdsa::Signature::from_scalars(
            *k256::FieldBytes::from_slice(&r),
            *k256::FieldBytes::from_slice(&s),
        )
        .map_err(|e| Error::Protocol(format!("invalid ECDSA signature: {e}")))?;

        Ok(Self {
            r,
            s,
            recovery_id: bytes[64],
            der: sig.to_der().as_bytes().to_vec(),
        })
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }
}

/// Outcome of a signing ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signature {
    Ecdsa(EcdsaSignature),
    Raw(Vec<u8>),
}

impl Signature {
    /// Interpret native signing output according to the engine's scheme
    pub fn from_native(scheme: SignatureScheme, bytes: Vec<u8>) -> Result<Self> {
        match scheme {
            SignatureScheme::Ecdsa => EcdsaSignature::from_native(&bytes).map(Signature::Ecdsa),
            SignatureScheme::Eddsa | SignatureScheme::MlDsa => {
                if bytes.is_empty() {
                    return Err(Error::Protocol("empty signature".into()));
                }
                Ok(Signature::Raw(bytes))
            }
        }
    }

    /// Hex record published to the relay once a round is signed
    pub fn to_record(&self, message: &str) -> SignatureRecord {
        match self {
            Signature::Ecdsa(sig) => SignatureRecord {
                msg: message.to_string(),
                r: hex::encode(sig.r),
                s: hex::encode(sig.s),
                recovery_id: format!("{:02x}", sig.recovery_id),
                der_signature: hex::encode(&sig.der),
            },
            Signature::Raw(bytes) => SignatureRecord {
                msg: message.to_string(),
                r: String::new(),
                s: String::new(),
                recovery_id: String::new(),
                der_signature: hex::encode(bytes),
            },
        }
    }
}

/// Signature as exchanged with the relay's keysign endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub msg: String,
    pub r: String,
    pub s: String,
    pub recovery_id: String,
    pub der_signature: String,
}

/// External vault lookup of previously stored key shares
pub trait KeyShareStore: Send + Sync {
    /// Native share bytes stored under a public key (hex)
    fn key_share(&self, public_key: &str) -> Option<Vec<u8>>;
}

impl KeyShareStore for std::collections::HashMap<String, Vec<u8>> {
    fn key_share(&self, public_key: &str) -> Option<Vec<u8>> {
        self.get(public_key).cloned()
    }
}

/// Look a share up or fail with `KeyShareNotFound`
pub fn require_key_share(store: &dyn KeyShareStore, public_key: &str) -> Result<Vec<u8>> {
    store
        .key_share(public_key)
        .ok_or_else(|| Error::KeyShareNotFound(public_key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    #[test]
    fn test_ecdsa_from_native() {
        let key = SigningKey::from_bytes(&[7u8; 32].into()).unwrap();
        let (sig, recid) = key.sign_prehash_recoverable(&[1u8; 32]).unwrap();

        let mut native = sig.to_bytes().to_vec();
        native.push(recid.to_byte());

        let parsed = EcdsaSignature::from_native(&native).unwrap();
        assert_eq!(parsed.to_bytes().as_slice(), sig.to_bytes().as_slice());
        assert_eq!(parsed.recovery_id, recid.to_byte());
        assert_eq!(parsed.der, sig.to_der().as_bytes());

        let record = Signature::Ecdsa(parsed).to_record("0101");
        assert_eq!(record.recovery_id.len(), 2);
        assert_eq!(record.r.len(), 64);
    }

    #[test]
    fn test_ecdsa_wrong_length() {
        assert!(matches!(
            EcdsaSignature::from_native(&[0u8; 64]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_key_share_json_and_debug() {
        let share = KeyShare {
            public_key: "02ab".into(),
            chain_code: None,
            share: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&share).unwrap();
        assert!(json.contains("\"share\":\"010203\""));
        let back: KeyShare = serde_json::from_str(&json).unwrap();
        assert_eq!(back.share, vec![1, 2, 3]);
        assert!(!format!("{share:?}").contains("010203"));
    }

    #[test]
    fn test_missing_key_share() {
        let store = std::collections::HashMap::new();
        assert!(matches!(
            require_key_share(&store, "02ab"),
            Err(Error::KeyShareNotFound(_))
        ));
    }
}
