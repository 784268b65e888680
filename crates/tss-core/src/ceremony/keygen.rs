//! Distributed key generation

use super::{export_share, Ceremony};
use crate::committee::{serialize_parties, threshold};
use crate::native::Engine;
use crate::{KeyShare, PartyId, Result, TssAction};
use std::sync::Arc;
use tracing::info;

/// Fresh key generation over the session committee
pub struct Keygen<E> {
    engine: Arc<E>,
}

impl<E: Engine> Keygen<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

impl<E: Engine> Ceremony for Keygen<E> {
    type Session = E::Session;
    type Output = KeyShare;

    fn action(&self) -> TssAction {
        TssAction::Keygen
    }

    fn setup_namespace(&self) -> Option<&str> {
        self.engine.setup_namespace()
    }

    fn setup_message(&self, committee: &[PartyId]) -> Result<Vec<u8>> {
        self.engine
            .keygen_setup(threshold(committee.len()), &serialize_parties(committee))
    }

    fn session(&self, setup: &[u8], local_party: &str) -> Result<E::Session> {
        self.engine.keygen_session(setup, local_party.as_bytes())
    }

    fn finish(&self, session: &mut E::Session) -> Result<KeyShare> {
        let share = export_share(&self.engine.keygen_finish(session)?)?;
        info!(engine = self.engine.name(), public_key = %share.public_key, "Key generated");
        Ok(share)
    }
}
