//! Ceremony definitions
//!
//! Keygen, reshare, migrate and sign differ only in how the setup message is
//! built and which native constructor and finalizer run. Each one implements
//! [`Ceremony`] and is driven by the same [`SessionRunner`](crate::SessionRunner).

mod keygen;
mod migrate;
mod reshare;
mod sign;

#[cfg(test)]
mod tests;

pub use keygen::Keygen;
pub use migrate::Migrate;
pub use reshare::Reshare;
pub use sign::{sign_messages, Sign};

use crate::native::{NativeSession, ShareHandle};
use crate::{KeyShare, PartyId, Result, SessionParams, TssAction};

/// One kind of ceremony, as seen by the runner
pub trait Ceremony: Send + Sync {
    type Session: NativeSession;
    type Output: Send;

    fn action(&self) -> TssAction;

    /// Setup-message slot namespace of the underlying engine
    fn setup_namespace(&self) -> Option<&str>;

    /// Signing-round scope for relay traffic
    fn message_id(&self) -> Option<&str> {
        None
    }

    /// Committee the session runs over
    fn committee(&self, params: &SessionParams) -> Vec<PartyId> {
        params.committee.clone()
    }

    /// Setup message authored by the initiator
    fn setup_message(&self, committee: &[PartyId]) -> Result<Vec<u8>>;

    /// Validate a decoded setup message before any session is built
    fn check_setup(&self, _setup: &[u8]) -> Result<()> {
        Ok(())
    }

    fn session(&self, setup: &[u8], local_party: &str) -> Result<Self::Session>;

    fn finish(&self, session: &mut Self::Session) -> Result<Self::Output>;

    /// Whether the runner waits for every party to report completion
    fn quorum_barrier(&self) -> bool {
        true
    }
}

/// Export a finished native share
fn export_share<H: ShareHandle>(share: &H) -> Result<KeyShare> {
    Ok(KeyShare {
        public_key: hex::encode(share.public_key()?),
        chain_code: share.chain_code()?.map(hex::encode),
        share: share.to_bytes()?,
    })
}
