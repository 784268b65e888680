//! Retrying session runner

use super::{barrier, inbox, outbox, CeremonyConfig, Mailbox, PumpGuard, PumpState, SessionParams};
use crate::ceremony::Ceremony;
use crate::committee::validate_committee;
use crate::transport::MessageTransport;
use crate::{codec, Error, PartyId, Result, SetupKey};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Drives ceremonies for one party against one relay.
///
/// Every attempt starts from scratch: new setup exchange, new native session,
/// empty dedup set. Attempts are bounded by `max_attempts`.
pub struct SessionRunner {
    transport: Arc<dyn MessageTransport>,
    params: SessionParams,
    config: CeremonyConfig,
}

impl SessionRunner {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        params: SessionParams,
        config: CeremonyConfig,
    ) -> Self {
        Self {
            transport,
            params,
            config,
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn transport(&self) -> &dyn MessageTransport {
        self.transport.as_ref()
    }

    /// Run a ceremony to completion, retrying failed attempts
    #[instrument(skip_all, fields(
        session_id = %self.params.session_id,
        party = %self.params.local_party,
        action = %ceremony.action(),
    ))]
    pub async fn run<C: Ceremony>(&self, ceremony: &C) -> Result<C::Output> {
        if self.config.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        let committee = ceremony.committee(&self.params);
        validate_committee(&committee, &self.params.local_party)?;

        info!(
            committee = ?committee,
            initiator = self.params.initiator,
            message_id = ceremony.message_id(),
            "Starting ceremony"
        );

        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            match self.attempt(ceremony, &committee).await {
                Ok(output) => {
                    info!(attempt, "Ceremony succeeded");
                    return Ok(output);
                }
                Err(e) if !e.is_retryable() => {
                    error!(attempt, error = %e, "Ceremony failed");
                    return Err(Error::CeremonyFailed {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Ceremony attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| Error::Internal("no attempt ran".into()));
        error!(attempts = self.config.max_attempts, error = %source, "Ceremony failed");
        Err(Error::CeremonyFailed {
            attempts: self.config.max_attempts,
            source: Box::new(source),
        })
    }

    async fn attempt<C: Ceremony>(&self, ceremony: &C, committee: &[PartyId]) -> Result<C::Output> {
        let setup = self.exchange_setup(ceremony, committee).await?;
        ceremony.check_setup(&setup)?;

        let session = ceremony.session(&setup, &self.params.local_party)?;
        let state = Arc::new(Mutex::new(PumpState::new(session)));
        let mailbox = Arc::new(Mailbox {
            transport: self.transport.clone(),
            session_id: self.params.session_id.clone(),
            local_party: self.params.local_party.clone(),
            key: self.params.key.clone(),
            message_id: ceremony.message_id().map(str::to_string),
            committee_len: committee.len(),
        });

        // dropping the guard on any early return cancels the pump
        let outbox = PumpGuard::spawn(outbox::run(
            mailbox.clone(),
            state.clone(),
            self.config.clone(),
        ));

        inbox::run(&mailbox, &state, &self.config).await?;

        let output = {
            let mut state = state.lock().await;
            state.done = true;
            ceremony.finish(&mut state.session)?
        };

        if ceremony.quorum_barrier() {
            barrier::await_quorum(
                self.transport(),
                &self.params.session_id,
                &self.params.local_party,
                committee,
                &self.config,
            )
            .await?;
        }

        outbox.finish(self.config.completion_grace).await;
        Ok(output)
    }

    /// Upload the setup message, or download it when another party initiates
    async fn exchange_setup<C: Ceremony>(&self, ceremony: &C, committee: &[PartyId]) -> Result<Vec<u8>> {
        let key = SetupKey::new(ceremony.message_id(), ceremony.setup_namespace());
        let session_id = &self.params.session_id;

        if self.params.initiator {
            let setup = ceremony.setup_message(committee)?;
            let sealed = codec::seal(&setup, &self.params.key)?;
            self.transport.upload_setup(session_id, &key, &sealed.body).await?;
            debug!(hash = %sealed.hash, "Setup message uploaded");
            return Ok(setup);
        }

        for attempt in 1..=self.config.setup_fetch_retries {
            match self.transport.setup_message(session_id, &key).await {
                Ok(Some(body)) => {
                    debug!(attempt, "Setup message downloaded");
                    return codec::open(&body, &self.params.key);
                }
                Ok(None) => debug!(attempt, "Setup message not uploaded yet"),
                Err(e) => warn!(attempt, error = %e, "Failed to fetch setup message"),
            }
            tokio::time::sleep(self.config.setup_fetch_backoff).await;
        }

        Err(Error::Transport(format!(
            "setup message unavailable after {} attempts",
            self.config.setup_fetch_retries
        )))
    }
}
