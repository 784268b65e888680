//! In-memory transport implementation for testing

use super::{async_trait, MessageTransport};
use crate::{Envelope, PartyId, Result, SetupKey};
use msg_relay::{RelayError, RelayStore};

/// Transport over an in-process [`RelayStore`].
///
/// Clones share one store, so every party of a test holds its own clone.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    store: RelayStore,
}

impl MemoryTransport {
    /// Create a new in-memory transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport over an existing store
    pub fn with_store(store: RelayStore) -> Self {
        Self { store }
    }

    /// Underlying store, for assertions
    pub fn store(&self) -> &RelayStore {
        &self.store
    }
}

fn not_found_as_none(result: msg_relay::Result<String>) -> Result<Option<String>> {
    match result {
        Ok(body) => Ok(Some(body)),
        Err(RelayError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn start_session(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        // expired relay state goes before a new session opens
        self.store.cleanup();
        self.store.join(session_id, parties);
        Ok(())
    }

    async fn participants(&self, session_id: &str) -> Result<Vec<PartyId>> {
        Ok(self.store.participants(session_id))
    }

    async fn start_with_committee(&self, session_id: &str, committee: &[PartyId]) -> Result<()> {
        self.store.start(session_id, committee);
        Ok(())
    }

    async fn committee(&self, session_id: &str) -> Result<Vec<PartyId>> {
        Ok(self.store.committee(session_id)?)
    }

    async fn mark_complete(&self, session_id: &str, parties: &[PartyId]) -> Result<()> {
        self.store.mark_complete(session_id, parties);
        Ok(())
    }

    async fn completed_parties(&self, session_id: &str) -> Result<Vec<PartyId>> {
        Ok(self.store.completed(session_id))
    }

    async fn send_message(&self, message_id: Option<&str>, envelope: &Envelope) -> Result<()> {
        Ok(self.store.post_message(message_id, envelope.clone())?)
    }

    async fn messages(
        &self,
        session_id: &str,
        party: &str,
        message_id: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        Ok(self.store.messages(session_id, party, message_id))
    }

    async fn delete_message(
        &self,
        session_id: &str,
        party: &str,
        hash: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        Ok(self
            .store
            .delete_message(session_id, party, hash, message_id)?)
    }

    async fn upload_setup(&self, session_id: &str, key: &SetupKey, body: &str) -> Result<()> {
        self.store
            .put_setup_message(session_id, key, body.to_string());
        Ok(())
    }

    async fn setup_message(&self, session_id: &str, key: &SetupKey) -> Result<Option<String>> {
        not_found_as_none(self.store.setup_message(session_id, key))
    }

    async fn mark_keysign_complete(
        &self,
        session_id: &str,
        message_id: &str,
        signature: &str,
    ) -> Result<()> {
        self.store
            .put_keysign_result(session_id, message_id, signature.to_string());
        Ok(())
    }

    async fn keysign_result(&self, session_id: &str, message_id: &str) -> Result<Option<String>> {
        not_found_as_none(self.store.keysign_result(session_id, message_id))
    }
}

#[cfg(test)]
pub use flaky::{Fault, FlakyTransport};
