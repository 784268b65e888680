//! Ceremony session driving
//!
//! One attempt of a ceremony runs two workers against the native session: the
//! outbox pump drains outbound messages to the relay and the inbox pump feeds
//! inbound messages back in. Both share [`PumpState`] behind one lock, which
//! also carries the `done` flag the inbox pump sets on completion.

mod barrier;
mod config;
mod inbox;
mod lobby;
mod outbox;
mod runner;

pub use barrier::await_quorum;
pub use config::{CeremonyConfig, SessionParams};
pub use lobby::{announce, wait_for_committee, wait_for_participants};
pub use runner::SessionRunner;

use crate::codec::EncryptionKey;
use crate::transport::MessageTransport;
use crate::{PartyId, SessionId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Native session plus the completion flag, always accessed under one lock
pub(crate) struct PumpState<S> {
    pub session: S,
    pub done: bool,
}

impl<S> PumpState<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            done: false,
        }
    }
}

/// Relay addressing shared by both pumps of an attempt
pub(crate) struct Mailbox {
    pub transport: Arc<dyn MessageTransport>,
    pub session_id: SessionId,
    pub local_party: PartyId,
    pub key: EncryptionKey,
    /// Signing-round scope
    pub message_id: Option<String>,
    /// Upper bound on the recipients of one outbound message
    pub committee_len: usize,
}

impl Mailbox {
    /// Key of an applied envelope in the dedup set
    pub fn dedup_key(&self, hash: &str) -> String {
        match &self.message_id {
            Some(id) => format!("{}-{}-{}-{}", self.session_id, self.local_party, id, hash),
            None => format!("{}-{}-{}", self.session_id, self.local_party, hash),
        }
    }
}

/// Background pump task, aborted when dropped
pub(crate) struct PumpGuard {
    handle: JoinHandle<()>,
}

impl PumpGuard {
    pub fn spawn<F>(pump: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(pump),
        }
    }

    /// Give the pump up to `grace` to exit on its own
    pub async fn finish(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            tracing::debug!("Outbox pump still running after grace period, aborting");
        }
    }
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        // no-op on a task that already finished
        self.handle.abort();
    }
}
