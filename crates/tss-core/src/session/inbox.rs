//! Inbox pump

use super::{CeremonyConfig, Mailbox, PumpState};
use crate::codec;
use crate::native::NativeSession;
use crate::{Error, Result};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Feed inbound envelopes to the native session until it reports completion.
///
/// Envelopes are applied in ascending sequence order and at most once per
/// attempt. Decrypt and native input failures end the attempt.
pub(crate) async fn run<S: NativeSession>(
    mailbox: &Mailbox,
    state: &Mutex<PumpState<S>>,
    config: &CeremonyConfig,
) -> Result<()> {
    let deadline = Instant::now() + config.inbox_deadline;
    let mut applied: HashSet<String> = HashSet::new();

    loop {
        if Instant::now() >= deadline {
            return Err(Error::SessionTimeout(config.inbox_deadline));
        }

        let mut envelopes = match mailbox
            .transport
            .messages(
                &mailbox.session_id,
                &mailbox.local_party,
                mailbox.message_id.as_deref(),
            )
            .await
        {
            Ok(envelopes) => envelopes,
            Err(e) => {
                warn!(error = %e, "Failed to poll inbox");
                tokio::time::sleep(config.inbox_error_backoff).await;
                continue;
            }
        };

        if envelopes.is_empty() {
            tokio::time::sleep(config.inbox_poll_interval).await;
            continue;
        }

        envelopes.sort_by_key(|e| e.sequence_no);
        let mut fresh = 0usize;
        for envelope in envelopes {
            let key = mailbox.dedup_key(&envelope.hash);
            if !applied.contains(&key) {
                let native = codec::open(&envelope.body, &mailbox.key)?;
                let finished = state.lock().await.session.input_message(&native)?;
                debug!(from = %envelope.from, hash = %envelope.hash, seq = envelope.sequence_no, "Message applied");
                applied.insert(key);
                fresh += 1;

                if finished {
                    acknowledge(mailbox, &envelope.hash).await;
                    info!(party = %mailbox.local_party, applied = applied.len(), "Ceremony complete");
                    return Ok(());
                }
            }
            acknowledge(mailbox, &envelope.hash).await;
        }

        // only redelivered envelopes whose delete did not stick
        if fresh == 0 {
            tokio::time::sleep(config.inbox_poll_interval).await;
        }
    }
}

/// Best-effort delete; redelivery is harmless given dedup
async fn acknowledge(mailbox: &Mailbox, hash: &str) {
    if let Err(e) = mailbox
        .transport
        .delete_message(
            &mailbox.session_id,
            &mailbox.local_party,
            hash,
            mailbox.message_id.as_deref(),
        )
        .await
    {
        warn!(hash, error = %e, "Failed to delete message");
    }
}
