//! Session assembly before a ceremony
//!
//! Every party announces itself, the initiator waits for the expected parties
//! and fixes the committee, the others wait for that committee.

use super::CeremonyConfig;
use crate::transport::MessageTransport;
use crate::{Error, PartyId, Result};
use tracing::{debug, info};

/// Register the local party in a session
pub async fn announce(transport: &dyn MessageTransport, session_id: &str, local_party: &str) -> Result<()> {
    transport
        .start_session(session_id, &[local_party.to_string()])
        .await
}

/// Wait until every expected party has joined, returns the participant list
pub async fn wait_for_participants(
    transport: &dyn MessageTransport,
    session_id: &str,
    expected: &[PartyId],
    config: &CeremonyConfig,
) -> Result<Vec<PartyId>> {
    let mut joined = Vec::new();
    for poll in 1..=config.quorum_max_polls {
        match transport.participants(session_id).await {
            Ok(participants) => {
                if expected.iter().all(|p| participants.contains(p)) {
                    info!(session_id, participants = ?participants, "All parties joined");
                    return Ok(participants);
                }
                joined = participants;
            }
            Err(e) => debug!(poll, error = %e, "Participants not available yet"),
        }
        tokio::time::sleep(config.quorum_poll_interval).await;
    }

    Err(Error::QuorumTimeout {
        polls: config.quorum_max_polls,
        missing: expected
            .iter()
            .filter(|p| !joined.contains(p))
            .cloned()
            .collect(),
    })
}

/// Wait for the initiator to fix the committee
pub async fn wait_for_committee(
    transport: &dyn MessageTransport,
    session_id: &str,
    config: &CeremonyConfig,
) -> Result<Vec<PartyId>> {
    for poll in 1..=config.quorum_max_polls {
        match transport.committee(session_id).await {
            Ok(committee) if !committee.is_empty() => {
                info!(session_id, committee = ?committee, "Committee fixed");
                return Ok(committee);
            }
            Ok(_) => debug!(poll, "Committee empty"),
            Err(e) => debug!(poll, error = %e, "Committee not available yet"),
        }
        tokio::time::sleep(config.quorum_poll_interval).await;
    }
    Err(Error::Transport(format!(
        "committee for session {session_id} not available"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lobby() {
        let transport = MemoryTransport::new();
        let config = CeremonyConfig {
            quorum_poll_interval: Duration::from_millis(5),
            quorum_max_polls: 20,
            ..Default::default()
        };
        let expected = vec!["a".to_string(), "b".to_string()];

        announce(&transport, "s1", "a").await.unwrap();
        assert!(matches!(
            wait_for_participants(&transport, "s1", &expected, &config).await,
            Err(Error::QuorumTimeout { .. })
        ));

        announce(&transport, "s1", "b").await.unwrap();
        let joined = wait_for_participants(&transport, "s1", &expected, &config)
            .await
            .unwrap();
        assert_eq!(joined, expected);

        transport.start_with_committee("s1", &joined).await.unwrap();
        assert_eq!(
            wait_for_committee(&transport, "s1", &config).await.unwrap(),
            expected
        );
    }
}
