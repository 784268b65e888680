//! Ceremony timing and per-session parameters

use crate::codec::EncryptionKey;
use crate::{PartyId, Result, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing constants of one ceremony
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CeremonyConfig {
    /// Full attempts before the error is surfaced
    pub max_attempts: usize,
    /// Wall-clock budget of the inbox pump
    pub inbox_deadline: Duration,
    /// Sleep between empty inbox polls
    pub inbox_poll_interval: Duration,
    /// Sleep after a failed inbox poll
    pub inbox_error_backoff: Duration,
    /// Sleep while the native outbound queue is empty
    pub outbox_poll_interval: Duration,
    /// How long the outbox may keep draining once the ceremony is done
    pub completion_grace: Duration,
    pub quorum_poll_interval: Duration,
    pub quorum_max_polls: u32,
    /// Setup-message download attempts of a non-initiator
    pub setup_fetch_retries: u32,
    pub setup_fetch_backoff: Duration,
    /// Attempts per outbound envelope
    pub send_retries: u32,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            inbox_deadline: Duration::from_secs(60),
            inbox_poll_interval: Duration::from_millis(100),
            inbox_error_backoff: Duration::from_secs(1),
            outbox_poll_interval: Duration::from_millis(100),
            completion_grace: Duration::from_millis(500),
            quorum_poll_interval: Duration::from_secs(1),
            quorum_max_polls: 60,
            setup_fetch_retries: 10,
            setup_fetch_backoff: Duration::from_secs(1),
            send_retries: 5,
        }
    }
}

/// Inputs of one ceremony supplied by the caller
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Relay base URL
    pub server_url: String,
    pub session_id: SessionId,
    pub local_party: PartyId,
    /// Session committee in wire order
    pub committee: Vec<PartyId>,
    /// Symmetric key shared by the committee
    pub key: EncryptionKey,
    /// Whether this party authors the setup message
    pub initiator: bool,
}

impl SessionParams {
    /// Build parameters from a hex-encoded session key
    pub fn new(
        server_url: impl Into<String>,
        session_id: impl Into<SessionId>,
        local_party: impl Into<PartyId>,
        committee: Vec<PartyId>,
        hex_key: &str,
        initiator: bool,
    ) -> Result<Self> {
        Ok(Self {
            server_url: server_url.into(),
            session_id: session_id.into(),
            local_party: local_party.into(),
            committee,
            key: EncryptionKey::from_hex(hex_key)?,
            initiator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_defaults() {
        let config = CeremonyConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.inbox_deadline, Duration::from_secs(60));
        assert_eq!(config.quorum_max_polls, 60);
        assert_eq!(config.setup_fetch_retries, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CeremonyConfig = serde_json::from_str(r#"{"max_attempts":5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.completion_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_params_reject_bad_key() {
        let result = SessionParams::new("http://relay", "s", "a", vec![], "abcd", false);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
