//! Distributed signing

use super::Ceremony;
use crate::committee::serialize_parties;
use crate::native::{Engine, ShareHandle, SignSetup};
use crate::{
    codec, require_key_share, Error, KeyShareStore, PartyId, Result, SessionRunner, Signature,
    TssAction,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Sign one digest with a stored share.
///
/// All relay traffic of the round is scoped by the message id, the MD5 of the
/// hex digest.
pub struct Sign<E: Engine> {
    engine: Arc<E>,
    share: E::Share,
    message: Vec<u8>,
    message_hex: String,
    message_id: String,
    chain_path: Option<String>,
}

impl<E: Engine> Sign<E> {
    pub fn new(
        engine: Arc<E>,
        store: &dyn KeyShareStore,
        public_key: &str,
        message_hex: &str,
        chain_path: Option<&str>,
    ) -> Result<Self> {
        let share = engine.share_from_bytes(&require_key_share(store, public_key)?)?;
        let message = hex::decode(message_hex)
            .map_err(|e| Error::InvalidConfig(format!("message is not hex: {e}")))?;
        Ok(Self {
            engine,
            share,
            message,
            message_hex: message_hex.to_string(),
            message_id: codec::message_id(message_hex),
            chain_path: chain_path.map(|p| p.replace('\'', "")),
        })
    }
}

impl<E: Engine> Ceremony for Sign<E> {
    type Session = E::Session;
    type Output = Signature;

    fn action(&self) -> TssAction {
        TssAction::Sign
    }

    fn setup_namespace(&self) -> Option<&str> {
        self.engine.setup_namespace()
    }

    fn message_id(&self) -> Option<&str> {
        Some(&self.message_id)
    }

    fn setup_message(&self, committee: &[PartyId]) -> Result<Vec<u8>> {
        self.engine.sign_setup(SignSetup {
            key_id: &self.share.key_id()?,
            chain_path: self.chain_path.as_deref(),
            message: &self.message,
            party_ids: &serialize_parties(committee),
        })
    }

    fn check_setup(&self, setup: &[u8]) -> Result<()> {
        let committed = self.engine.decode_sign_message(setup)?;
        if committed != self.message {
            return Err(Error::MessageMismatch {
                expected: self.message_hex.clone(),
                actual: hex::encode(committed),
            });
        }
        Ok(())
    }

    fn session(&self, setup: &[u8], local_party: &str) -> Result<E::Session> {
        self.engine
            .sign_session(setup, local_party.as_bytes(), &self.share)
    }

    fn finish(&self, session: &mut E::Session) -> Result<Signature> {
        let native = self.engine.sign_finish(session)?;
        Signature::from_native(self.engine.signature_scheme(), native)
    }

    fn quorum_barrier(&self) -> bool {
        false
    }
}

/// Sign each digest in turn, one retried session per digest.
///
/// Every signature is published to the relay under its message id. The first
/// failing digest ends the run.
#[instrument(skip(engine, store, runner, messages))]
pub async fn sign_messages<E: Engine>(
    engine: Arc<E>,
    store: &dyn KeyShareStore,
    runner: &SessionRunner,
    public_key: &str,
    messages: &[String],
    chain_path: Option<&str>,
) -> Result<Vec<Signature>> {
    let mut signatures = Vec::with_capacity(messages.len());

    for message in messages {
        let ceremony = Sign::new(engine.clone(), store, public_key, message, chain_path)?;
        let signature = runner.run(&ceremony).await?;

        let record = serde_json::to_string(&signature.to_record(message))?;
        if let Err(e) = runner
            .transport()
            .mark_keysign_complete(&runner.params().session_id, &ceremony.message_id, &record)
            .await
        {
            warn!(message = %message, error = %e, "Failed to publish signature");
        }

        info!(message = %message, "Message signed");
        signatures.push(signature);
    }

    Ok(signatures)
}
