//! Key resharing to a new committee

use super::{export_share, Ceremony};
use crate::committee::{reshare_indices, serialize_parties, threshold, ReshareCommittee};
use crate::native::{Engine, ReshareSetup, ShareHandle};
use crate::{Error, KeyShare, KeyShareStore, PartyId, Result, SessionParams, TssAction};
use std::sync::Arc;
use tracing::info;

/// Move an existing key to a new committee.
///
/// The session runs over the union of both committees. Members of the old
/// committee contribute their prior share, newcomers join without one. A party
/// that only belongs to the old committee finishes with no share.
pub struct Reshare<E: Engine> {
    engine: Arc<E>,
    committee: ReshareCommittee,
    new_size: usize,
    local_is_new: bool,
    prior: Option<E::Share>,
}

impl<E: Engine> Reshare<E> {
    /// Look the prior share of `local_party` up by `public_key`
    pub fn new(
        engine: Arc<E>,
        store: &dyn KeyShareStore,
        public_key: &str,
        local_party: &str,
        old_committee: &[PartyId],
        new_committee: &[PartyId],
    ) -> Result<Self> {
        let committee = reshare_indices(old_committee, new_committee)?;
        let is_old = old_committee.iter().any(|p| p == local_party);

        let prior = match store.key_share(public_key) {
            Some(bytes) => Some(engine.share_from_bytes(&bytes)?),
            None if is_old => return Err(Error::KeyShareNotFound(public_key.to_string())),
            None => None,
        };
        if let Some(share) = &prior {
            if hex::encode(share.public_key()?) != public_key {
                return Err(Error::InvalidConfig(format!(
                    "stored share does not belong to {public_key}"
                )));
            }
        }

        Ok(Self {
            engine,
            committee,
            new_size: new_committee.len(),
            local_is_new: new_committee.iter().any(|p| p == local_party),
            prior,
        })
    }
}

impl<E: Engine> Ceremony for Reshare<E> {
    type Session = E::Session;
    type Output = Option<KeyShare>;

    fn action(&self) -> TssAction {
        TssAction::Reshare
    }

    fn setup_namespace(&self) -> Option<&str> {
        self.engine.setup_namespace()
    }

    fn committee(&self, _params: &SessionParams) -> Vec<PartyId> {
        self.committee.all_parties.clone()
    }

    fn setup_message(&self, committee: &[PartyId]) -> Result<Vec<u8>> {
        self.engine.reshare_setup(ReshareSetup {
            share: self.prior.as_ref(),
            party_ids: &serialize_parties(committee),
            old_indices: &self.committee.old_indices,
            new_indices: &self.committee.new_indices,
            threshold: threshold(self.new_size),
        })
    }

    fn session(&self, setup: &[u8], local_party: &str) -> Result<E::Session> {
        self.engine
            .reshare_session(setup, local_party.as_bytes(), self.prior.as_ref())
    }

    fn finish(&self, session: &mut E::Session) -> Result<Option<KeyShare>> {
        if !self.local_is_new {
            info!("Left the committee, no new share");
            return Ok(None);
        }
        let share = export_share(&self.engine.reshare_finish(session)?)?;
        info!(public_key = %share.public_key, "Key reshared");
        Ok(Some(share))
    }
}
