//! Relay transport
//!
//! Everything a ceremony needs from the message relay. The HTTP client lives in
//! `msg-relay-client`; [`MemoryTransport`] backs the in-process tests.

use crate::{Envelope, PartyId, Result, SetupKey};

pub use ::async_trait::async_trait;

/// Message relay seen from one party
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Register parties as present in a session
    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()>;

    /// Parties that have registered so far
    async fn participants(&self, session_id: &str) -> Result<Vec<PartyId>>;

    /// Fix the committee of a session
    async fn start_with_committee(&self, session_id: &str, committee: &[PartyId]) -> Result<()>;

    /// Committee fixed by the initiator
    async fn committee(&self, session_id: &str) -> Result<Vec<PartyId>>;

    /// Report parties as finished
    async fn mark_complete(&self, session_id: &str, parties: &[PartyId]) -> Result<()>;

    /// Parties that reported completion
    async fn completed_parties(&self, session_id: &str) -> Result<Vec<PartyId>>;

    /// Post an envelope, optionally scoped to one signing round
    async fn send_message(&self, message_id: Option<&str>, envelope: &Envelope) -> Result<()>;

    /// Envelopes waiting for `party`
    async fn messages(
        &self,
        session_id: &str,
        party: &str,
        message_id: Option<&str>,
    ) -> Result<Vec<Envelope>>;

    /// Acknowledge a processed envelope
    async fn delete_message(
        &self,
        session_id: &str,
        party: &str,
        hash: &str,
        message_id: Option<&str>,
    ) -> Result<()>;

    /// Store the encoded setup message
    async fn upload_setup(&self, session_id: &str, key: &SetupKey, body: &str) -> Result<()>;

    /// Encoded setup message, `None` until it has been uploaded
    async fn setup_message(&self, session_id: &str, key: &SetupKey) -> Result<Option<String>>;

    /// Publish the signature of one signing round
    async fn mark_keysign_complete(
        &self,
        session_id: &str,
        message_id: &str,
        signature: &str,
    ) -> Result<()>;

    /// Signature published for a signing round, `None` until available
    async fn keysign_result(&self, session_id: &str, message_id: &str) -> Result<Option<String>>;
}

/// In-memory transport for testing
pub mod memory;

pub use memory::MemoryTransport;
