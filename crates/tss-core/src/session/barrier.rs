//! Completion barrier

use super::CeremonyConfig;
use crate::transport::MessageTransport;
use crate::{Error, PartyId, Result};
use tracing::{debug, info, instrument, warn};

/// Report local completion, then wait until every committee member has.
#[instrument(skip(transport, committee, config))]
pub async fn await_quorum(
    transport: &dyn MessageTransport,
    session_id: &str,
    local_party: &str,
    committee: &[PartyId],
    config: &CeremonyConfig,
) -> Result<()> {
    transport
        .mark_complete(session_id, &[local_party.to_string()])
        .await?;

    let mut missing: Vec<PartyId> = committee.to_vec();
    for poll in 1..=config.quorum_max_polls {
        match transport.completed_parties(session_id).await {
            Ok(completed) => {
                missing = committee
                    .iter()
                    .filter(|p| !completed.contains(p))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    info!(polls = poll, "All parties completed");
                    return Ok(());
                }
                debug!(poll, missing = ?missing, "Waiting for parties to complete");
            }
            Err(e) => warn!(poll, error = %e, "Failed to query completed parties"),
        }
        tokio::time::sleep(config.quorum_poll_interval).await;
    }

    Err(Error::QuorumTimeout {
        polls: config.quorum_max_polls,
        missing,
    })
}
