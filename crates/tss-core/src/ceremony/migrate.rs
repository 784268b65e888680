//! Migration of an existing key into a fresh share set

use super::{export_share, Ceremony};
use crate::committee::{serialize_parties, threshold};
use crate::native::{Engine, MigrateInput};
use crate::{Error, KeyShare, PartyId, Result, TssAction};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Re-deal an existing key, keeping its public key and chain code.
///
/// Runs on a keygen setup message; each party contributes its part of the
/// existing secret.
pub struct Migrate<E> {
    engine: Arc<E>,
    public_key: Vec<u8>,
    chain_code: Vec<u8>,
    local_secret: Zeroizing<Vec<u8>>,
}

impl<E: Engine> Migrate<E> {
    /// `public_key` and `chain_code` are hex encoded
    pub fn new(engine: Arc<E>, public_key: &str, chain_code: &str, local_secret: Vec<u8>) -> Result<Self> {
        let decode = |name: &str, value: &str| {
            hex::decode(value).map_err(|e| Error::InvalidConfig(format!("{name} is not hex: {e}")))
        };
        Ok(Self {
            engine,
            public_key: decode("public key", public_key)?,
            chain_code: decode("chain code", chain_code)?,
            local_secret: Zeroizing::new(local_secret),
        })
    }
}

impl<E: Engine> Ceremony for Migrate<E> {
    type Session = E::Session;
    type Output = KeyShare;

    fn action(&self) -> TssAction {
        TssAction::Migrate
    }

    fn setup_namespace(&self) -> Option<&str> {
        self.engine.setup_namespace()
    }

    fn setup_message(&self, committee: &[PartyId]) -> Result<Vec<u8>> {
        self.engine
            .keygen_setup(threshold(committee.len()), &serialize_parties(committee))
    }

    fn session(&self, setup: &[u8], local_party: &str) -> Result<E::Session> {
        self.engine.migrate_session(
            setup,
            local_party.as_bytes(),
            MigrateInput {
                public_key: &self.public_key,
                chain_code: &self.chain_code,
                local_secret: &self.local_secret,
            },
        )
    }

    fn finish(&self, session: &mut E::Session) -> Result<KeyShare> {
        export_share(&self.engine.keygen_finish(session)?)
    }
}
