//! Native cryptographic capability
//!
//! The elliptic-curve and lattice MPC math lives in an external library. The
//! coordinator only sees it through these traits: build a setup blob, open a
//! session from it, pump messages in and out, and finish into a share or a
//! signature. One [`Engine`] implementation exists per algorithm family.

use crate::{Result, SignatureScheme};

/// A live ceremony inside the native library.
///
/// Calls are synchronous and non-blocking. The coordinator serializes every call
/// behind one lock because outbound reads and inbound writes interleave.
pub trait NativeSession: Send + 'static {
    /// Next queued outbound message, `None` when nothing is queued
    fn output_message(&mut self) -> Result<Option<Vec<u8>>>;

    /// Recipient at `index` of an outbound message.
    ///
    /// Recipients are contiguous from index 0; `None` ends the list.
    fn message_receiver(&self, message: &[u8], index: usize) -> Option<Vec<u8>>;

    /// Apply an inbound message, returns `true` once the ceremony is complete
    fn input_message(&mut self, message: &[u8]) -> Result<bool>;
}

/// A finished key share inside the native library
pub trait ShareHandle: Send + Sync {
    fn to_bytes(&self) -> Result<Vec<u8>>;
    fn public_key(&self) -> Result<Vec<u8>>;
    /// Chain code, for algorithms that derive child keys
    fn chain_code(&self) -> Result<Option<Vec<u8>>>;
    fn key_id(&self) -> Result<Vec<u8>>;
}

/// Parameters of a reshare setup message
pub struct ReshareSetup<'a, H> {
    /// Prior share of the initiator, absent for a newcomer
    pub share: Option<&'a H>,
    /// NUL-separated union committee
    pub party_ids: &'a [u8],
    pub old_indices: &'a [u8],
    pub new_indices: &'a [u8],
    pub threshold: usize,
}

/// Parameters of a signing setup message
pub struct SignSetup<'a> {
    pub key_id: &'a [u8],
    /// Derivation path with hardening marks removed, when the key derives
    pub chain_path: Option<&'a str>,
    pub message: &'a [u8],
    /// NUL-separated signing committee
    pub party_ids: &'a [u8],
}

/// Inputs of a key migration session
pub struct MigrateInput<'a> {
    pub public_key: &'a [u8],
    pub chain_code: &'a [u8],
    /// This party's contribution to the existing key
    pub local_secret: &'a [u8],
}

/// One native algorithm family (ECDSA, EdDSA/Schnorr, ML-DSA)
pub trait Engine: Send + Sync + 'static {
    type Session: NativeSession;
    type Share: ShareHandle;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Setup-message slot of this engine, so that several algorithms can
    /// exchange setup blobs within one session
    fn setup_namespace(&self) -> Option<&str> {
        None
    }

    fn signature_scheme(&self) -> SignatureScheme;

    fn share_from_bytes(&self, bytes: &[u8]) -> Result<Self::Share>;

    fn keygen_setup(&self, threshold: usize, party_ids: &[u8]) -> Result<Vec<u8>>;
    fn keygen_session(&self, setup: &[u8], local_party: &[u8]) -> Result<Self::Session>;
    fn keygen_finish(&self, session: &mut Self::Session) -> Result<Self::Share>;

    fn reshare_setup(&self, params: ReshareSetup<'_, Self::Share>) -> Result<Vec<u8>>;
    fn reshare_session(
        &self,
        setup: &[u8],
        local_party: &[u8],
        share: Option<&Self::Share>,
    ) -> Result<Self::Session>;
    fn reshare_finish(&self, session: &mut Self::Session) -> Result<Self::Share>;

    /// Migration sessions are built from a keygen setup and finish like keygen
    fn migrate_session(
        &self,
        setup: &[u8],
        local_party: &[u8],
        input: MigrateInput<'_>,
    ) -> Result<Self::Session>;

    fn sign_setup(&self, params: SignSetup<'_>) -> Result<Vec<u8>>;
    /// Digest committed to by a signing setup message
    fn decode_sign_message(&self, setup: &[u8]) -> Result<Vec<u8>>;
    fn sign_session(&self, setup: &[u8], local_party: &[u8], share: &Self::Share)
        -> Result<Self::Session>;
    fn sign_finish(&self, session: &mut Self::Session) -> Result<Vec<u8>>;
}

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(any(test, feature = "sim"))]
pub use sim::SimEngine;
