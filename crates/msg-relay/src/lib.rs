//! Message Relay Library
//!
//! Bookkeeping model of the store-and-forward relay that MPC parties talk
//! through: session membership, per-recipient mailboxes ordered by sequence
//! number, setup-message slots, completion sets and published signatures.
//!
//! The relay is untrusted. It never sees plaintext, it only stores opaque
//! bodies keyed by the hashes the senders attach.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Wire envelope exchanged through the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Session identifier
    pub session_id: String,
    /// Sender party
    pub from: String,
    /// Recipient parties
    pub to: Vec<String>,
    /// Encrypted, base64 encoded body
    pub body: String,
    /// Content hash of the plaintext body
    pub hash: String,
    /// Sender-assigned ordering
    #[serde(rename = "sequence_no")]
    pub sequence_no: u64,
}

/// Addresses a setup-message slot.
///
/// `message_id` scopes a slot to one signing round, `namespace` keeps the
/// setup blobs of different algorithms in the same session apart.
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SetupKey {
    pub message_id: Option<String>,
    pub namespace: Option<String>,
}

impl SetupKey {
    pub fn new(message_id: Option<&str>, namespace: Option<&str>) -> Self {
        Self {
            message_id: message_id.map(str::to_string),
            namespace: namespace.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct MailboxKey {
    session_id: String,
    party: String,
    message_id: String,
}

impl MailboxKey {
    fn new(session_id: &str, party: &str, message_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.to_string(),
            party: party.to_string(),
            message_id: message_id.unwrap_or_default().to_string(),
        }
    }
}

/// Per-session bookkeeping
#[derive(Debug, Clone)]
struct SessionRecord {
    participants: Vec<String>,
    committee: Option<Vec<String>>,
    completed: Vec<String>,
    expires_at: DateTime<Utc>,
}

/// Stored value with its expiry
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

/// In-process relay store
#[derive(Clone)]
pub struct RelayStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
    mailboxes: Arc<DashMap<MailboxKey, Vec<Expiring<RelayMessage>>>>,
    setup_messages: Arc<DashMap<(String, SetupKey), Expiring<String>>>,
    keysign_results: Arc<DashMap<(String, String), Expiring<String>>>,
    /// Default TTL in seconds
    ttl_seconds: i64,
}

impl RelayStore {
    /// Create a new relay store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            mailboxes: Arc::new(DashMap::new()),
            setup_messages: Arc::new(DashMap::new()),
            keysign_results: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    fn expiry(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.ttl_seconds)
    }

    fn expiring<T>(&self, value: T) -> Expiring<T> {
        Expiring {
            value,
            expires_at: self.expiry(),
        }
    }

    fn session_mut(&self, session_id: &str) -> dashmap::mapref::one::RefMut<'_, String, SessionRecord> {
        let expires_at = self.expiry();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                participants: Vec::new(),
                committee: None,
                completed: Vec::new(),
                expires_at,
            })
    }

    /// Register parties as participants of a session
    pub fn join(&self, session_id: &str, parties: &[String]) {
        let mut session = self.session_mut(session_id);
        for party in parties {
            if !session.participants.contains(party) {
                session.participants.push(party.clone());
            }
        }
    }

    /// Parties that joined a session, in join order
    pub fn participants(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|s| s.participants.clone())
            .unwrap_or_default()
    }

    /// Fix the committee of a session
    pub fn start(&self, session_id: &str, committee: &[String]) {
        self.session_mut(session_id).committee = Some(committee.to_vec());
    }

    /// The committee of a started session
    pub fn committee(&self, session_id: &str) -> Result<Vec<String>> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.committee.clone())
            .ok_or_else(|| RelayError::NotFound(format!("committee for session {session_id}")))
    }

    /// Record parties as finished
    pub fn mark_complete(&self, session_id: &str, parties: &[String]) {
        let mut session = self.session_mut(session_id);
        for party in parties {
            if !session.completed.contains(party) {
                session.completed.push(party.clone());
            }
        }
    }

    /// Parties that reported completion
    pub fn completed(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|s| s.completed.clone())
            .unwrap_or_default()
    }

    /// Deliver a message into the mailbox of each recipient.
    ///
    /// A body already waiting in a mailbox under the same hash is not stored twice.
    pub fn post_message(&self, message_id: Option<&str>, message: RelayMessage) -> Result<()> {
        if message.to.is_empty() {
            return Err(RelayError::InvalidFormat("message has no recipients".into()));
        }
        if message.hash.is_empty() {
            return Err(RelayError::InvalidFormat("message has no hash".into()));
        }

        for party in &message.to {
            let key = MailboxKey::new(&message.session_id, party, message_id);
            let mut mailbox = self.mailboxes.entry(key).or_default();
            if mailbox.iter().any(|m| m.value.hash == message.hash) {
                continue;
            }
            mailbox.push(self.expiring(message.clone()));
        }

        debug!(
            session_id = %message.session_id,
            from = %message.from,
            to = ?message.to,
            seq = message.sequence_no,
            "Message stored"
        );
        Ok(())
    }

    /// Messages waiting for a party
    pub fn messages(&self, session_id: &str, party: &str, message_id: Option<&str>) -> Vec<RelayMessage> {
        self.mailboxes
            .get(&MailboxKey::new(session_id, party, message_id))
            .map(|mailbox| mailbox.iter().map(|m| m.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove a consumed message from a party's mailbox
    pub fn delete_message(
        &self,
        session_id: &str,
        party: &str,
        hash: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        let key = MailboxKey::new(session_id, party, message_id);
        let mut mailbox = self
            .mailboxes
            .get_mut(&key)
            .ok_or_else(|| RelayError::NotFound(format!("mailbox of {party}")))?;

        let before = mailbox.len();
        mailbox.retain(|m| m.value.hash != hash);
        if mailbox.len() == before {
            return Err(RelayError::NotFound(format!("message {hash}")));
        }
        Ok(())
    }

    /// Store a setup message, replacing any previous one in the same slot
    pub fn put_setup_message(&self, session_id: &str, key: &SetupKey, body: String) {
        self.setup_messages
            .insert((session_id.to_string(), key.clone()), self.expiring(body));
    }

    /// Fetch a setup message
    pub fn setup_message(&self, session_id: &str, key: &SetupKey) -> Result<String> {
        self.setup_messages
            .get(&(session_id.to_string(), key.clone()))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| RelayError::NotFound(format!("setup message for session {session_id}")))
    }

    /// Publish a finished signature for one signing round
    pub fn put_keysign_result(&self, session_id: &str, message_id: &str, body: String) {
        self.keysign_results
            .insert((session_id.to_string(), message_id.to_string()), self.expiring(body));
    }

    /// Fetch a published signature
    pub fn keysign_result(&self, session_id: &str, message_id: &str) -> Result<String> {
        self.keysign_results
            .get(&(session_id.to_string(), message_id.to_string()))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| RelayError::NotFound(format!("keysign result {message_id}")))
    }

    /// Remove expired sessions, messages, setup messages and signatures
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, s| s.expires_at > now);
        for mut mailbox in self.mailboxes.iter_mut() {
            mailbox.retain(|m| m.expires_at > now);
        }
        self.mailboxes.retain(|_, mailbox| !mailbox.is_empty());
        self.setup_messages.retain(|_, setup| setup.expires_at > now);
        self.keysign_results.retain(|_, result| result.expires_at > now);
        debug!(sessions = self.sessions.len(), "Expired relay state removed");
    }
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new(3600) // 1 hour default TTL
    }
}
