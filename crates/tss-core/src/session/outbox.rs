//! Outbox pump

use super::{CeremonyConfig, Mailbox, PumpState};
use crate::codec;
use crate::native::NativeSession;
use crate::Envelope;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Drain the native outbound queue to the relay.
///
/// Exits once the done flag and an empty queue are observed under the same lock.
pub(crate) async fn run<S: NativeSession>(
    mailbox: Arc<Mailbox>,
    state: Arc<Mutex<PumpState<S>>>,
    config: CeremonyConfig,
) {
    let mut sequence_no: u64 = 0;

    loop {
        let (next, done) = {
            let mut state = state.lock().await;
            let next = match state.session.output_message() {
                Ok(Some(message)) => {
                    let receivers = receivers(&state.session, &message, mailbox.committee_len);
                    Some((message, receivers))
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Native outbound read failed");
                    None
                }
            };
            (next, state.done)
        };

        let Some((message, receivers)) = next else {
            if done {
                debug!(party = %mailbox.local_party, "Outbox drained");
                return;
            }
            tokio::time::sleep(config.outbox_poll_interval).await;
            continue;
        };

        for receiver in receivers {
            send(&mailbox, &config, &message, receiver, sequence_no).await;
            sequence_no += 1;
        }
    }
}

/// Recipients of a message at committee indices `0..committee_len`; the list
/// ends at the first empty slot
fn receivers<S: NativeSession>(session: &S, message: &[u8], committee_len: usize) -> Vec<String> {
    let mut receivers = Vec::new();
    for index in 0..committee_len {
        let Some(receiver) = session.message_receiver(message, index) else {
            break;
        };
        if receiver.is_empty() {
            break;
        }
        match String::from_utf8(receiver) {
            Ok(receiver) => receivers.push(receiver),
            Err(e) => {
                warn!(error = %e, "Skipping non UTF-8 receiver");
                break;
            }
        }
    }
    receivers
}

async fn send(
    mailbox: &Mailbox,
    config: &CeremonyConfig,
    message: &[u8],
    receiver: String,
    sequence_no: u64,
) {
    let sealed = match codec::seal(message, &mailbox.key) {
        Ok(sealed) => sealed,
        Err(e) => {
            error!(error = %e, "Failed to seal outbound message");
            return;
        }
    };
    let envelope = Envelope {
        session_id: mailbox.session_id.clone(),
        from: mailbox.local_party.clone(),
        to: vec![receiver],
        body: sealed.body,
        hash: sealed.hash,
        sequence_no,
    };

    for attempt in 1..=config.send_retries.max(1) {
        match mailbox
            .transport
            .send_message(mailbox.message_id.as_deref(), &envelope)
            .await
        {
            Ok(()) => {
                debug!(to = ?envelope.to, hash = %envelope.hash, seq = sequence_no, "Message sent");
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Failed to send message");
                tokio::time::sleep(config.outbox_poll_interval).await;
            }
        }
    }
    error!(to = ?envelope.to, hash = %envelope.hash, "Giving up on outbound message");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptionKey;
    use crate::transport::{MemoryTransport, MessageTransport};
    use crate::Result;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Queued messages whose body is `to1,to2|payload`
    struct Scripted(VecDeque<Vec<u8>>);

    impl NativeSession for Scripted {
        fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }

        fn message_receiver(&self, message: &[u8], index: usize) -> Option<Vec<u8>> {
            let text = std::str::from_utf8(message).ok()?;
            let (to, _) = text.split_once('|')?;
            to.split(',').nth(index).map(|p| p.as_bytes().to_vec())
        }

        fn input_message(&mut self, _message: &[u8]) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_drains_queue_before_exit() {
        let transport = MemoryTransport::new();
        let key = EncryptionKey::random();
        let mailbox = Arc::new(Mailbox {
            transport: Arc::new(transport.clone()),
            session_id: "s1".into(),
            local_party: "a".into(),
            key: key.clone(),
            message_id: None,
            committee_len: 3,
        });

        let queue = VecDeque::from(vec![b"b,c|one".to_vec(), b"c|two".to_vec()]);
        let state = Arc::new(Mutex::new(PumpState {
            session: Scripted(queue),
            done: true,
        }));

        let config = CeremonyConfig {
            outbox_poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        tokio::time::timeout(Duration::from_secs(5), run(mailbox, state, config))
            .await
            .unwrap();

        let to_b = transport.messages("s1", "b", None).await.unwrap();
        let to_c = transport.messages("s1", "c", None).await.unwrap();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_c.len(), 2);
        assert_eq!(codec::open(&to_c[1].body, &key).unwrap(), b"c|two");
        assert!(to_c[0].sequence_no < to_c[1].sequence_no);
    }

    #[tokio::test]
    async fn test_waits_for_done_flag() {
        let transport = MemoryTransport::new();
        let mailbox = Arc::new(Mailbox {
            transport: Arc::new(transport),
            session_id: "s1".into(),
            local_party: "a".into(),
            key: EncryptionKey::random(),
            message_id: None,
            committee_len: 3,
        });
        let state = Arc::new(Mutex::new(PumpState::new(Scripted(VecDeque::new()))));
        let config = CeremonyConfig {
            outbox_poll_interval: Duration::from_millis(5),
            ..Default::default()
        };

        let handle = tokio::spawn(run(mailbox, state.clone(), config));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        state.lock().await.done = true;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    /// Claims a recipient at every index
    struct Chatty(Option<Vec<u8>>);

    impl NativeSession for Chatty {
        fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.take())
        }

        fn message_receiver(&self, _message: &[u8], index: usize) -> Option<Vec<u8>> {
            Some(format!("p{index}").into_bytes())
        }

        fn input_message(&mut self, _message: &[u8]) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_recipients_bounded_by_committee() {
        let transport = MemoryTransport::new();
        let mailbox = Arc::new(Mailbox {
            transport: Arc::new(transport.clone()),
            session_id: "s1".into(),
            local_party: "p0".into(),
            key: EncryptionKey::random(),
            message_id: None,
            committee_len: 2,
        });
        let state = Arc::new(Mutex::new(PumpState {
            session: Chatty(Some(b"round1".to_vec())),
            done: true,
        }));
        let config = CeremonyConfig {
            outbox_poll_interval: Duration::from_millis(5),
            ..Default::default()
        };

        tokio::time::timeout(Duration::from_secs(5), run(mailbox, state, config))
            .await
            .unwrap();

        assert_eq!(transport.messages("s1", "p0", None).await.unwrap().len(), 1);
        assert_eq!(transport.messages("s1", "p1", None).await.unwrap().len(), 1);
        assert!(transport.messages("s1", "p2", None).await.unwrap().is_empty());
    }
}
