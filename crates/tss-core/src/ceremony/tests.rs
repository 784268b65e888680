//! End-to-end ceremonies over the in-memory relay

use super::*;
use crate::native::sim::{verify_signature, SimShare};
use crate::native::{Engine, MigrateInput, ReshareSetup, SignSetup, SimEngine};
use crate::transport::memory::{Fault, FlakyTransport};
use crate::transport::{MemoryTransport, MessageTransport};
use crate::{codec, CeremonyConfig, Error, SessionParams, SessionRunner, SetupKey, SignatureScheme};
use crate::{KeyShare, Signature};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "0f0e0d0c0b0a09080706050403020100000102030405060708090a0b0c0d0e0f";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> CeremonyConfig {
    CeremonyConfig {
        max_attempts: 3,
        inbox_deadline: Duration::from_secs(10),
        inbox_poll_interval: Duration::from_millis(10),
        inbox_error_backoff: Duration::from_millis(20),
        outbox_poll_interval: Duration::from_millis(10),
        completion_grace: Duration::from_millis(200),
        quorum_poll_interval: Duration::from_millis(20),
        quorum_max_polls: 250,
        setup_fetch_retries: 200,
        setup_fetch_backoff: Duration::from_millis(20),
        send_retries: 5,
    }
}

fn runner(transport: Arc<dyn MessageTransport>, session: &str, party: &str, committee: &[&str]) -> SessionRunner {
    let params = SessionParams::new(
        "memory://",
        session,
        party,
        committee.iter().map(|p| p.to_string()).collect(),
        KEY,
        party == committee[0],
    )
    .unwrap();
    SessionRunner::new(transport, params, fast_config())
}

fn shares_of(engine: &SimEngine, share: &KeyShare) -> SimShare {
    engine.share_from_bytes(&share.share).unwrap()
}

/// Keygen over `committee`, the first party initiates
async fn keygen(
    transport: &MemoryTransport,
    session: &str,
    committee: &[&'static str],
) -> HashMap<String, KeyShare> {
    init_tracing();
    let engine = Arc::new(SimEngine::new());
    let mut tasks = Vec::new();
    for &party in committee {
        let runner = runner(Arc::new(transport.clone()), session, party, committee);
        let ceremony = Keygen::new(engine.clone());
        tasks.push(tokio::spawn(async move {
            (party.to_string(), runner.run(&ceremony).await)
        }));
    }

    let mut shares = HashMap::new();
    for task in tasks {
        let (party, share) = task.await.unwrap();
        shares.insert(party, share.unwrap());
    }
    shares
}

fn store(share: &KeyShare) -> HashMap<String, Vec<u8>> {
    HashMap::from([(share.public_key.clone(), share.share.clone())])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keygen_two_of_two() {
    let transport = MemoryTransport::new();
    let shares = keygen(&transport, "keygen-2", &["alice", "bob"]).await;

    let engine = SimEngine::new();
    let alice = &shares["alice"];
    let bob = &shares["bob"];
    assert_eq!(alice.public_key, bob.public_key);
    assert_eq!(alice.chain_code, bob.chain_code);
    assert_ne!(alice.share, bob.share);

    for share in [alice, bob] {
        let native = shares_of(&engine, share);
        assert!(native.is_consistent());
        assert_eq!(native.threshold, 2);
    }

    let completed = transport.completed_parties("keygen-2").await.unwrap();
    assert_eq!(completed.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keygen_then_sign_with_subset() {
    let transport = MemoryTransport::new();
    let shares = keygen(&transport, "keygen-3", &["a", "b", "c"]).await;
    let public_key = shares["a"].public_key.clone();

    let engine = Arc::new(SimEngine::new());
    let messages = vec!["11".repeat(32), "22".repeat(32)];
    let signers = ["c", "a"];

    let mut tasks = Vec::new();
    for party in signers {
        let runner = runner(Arc::new(transport.clone()), "sign-3", party, &signers);
        let engine = engine.clone();
        let store = store(&shares[party]);
        let public_key = public_key.clone();
        let messages = messages.clone();
        tasks.push(tokio::spawn(async move {
            sign_messages(engine, &store, &runner, &public_key, &messages, Some("m/44'/0'/0'")).await
        }));
    }

    let public_key_bytes = hex::decode(&public_key).unwrap();
    for task in tasks {
        let signatures = task.await.unwrap().unwrap();
        assert_eq!(signatures.len(), 2);
        for (signature, message) in signatures.iter().zip(&messages) {
            let Signature::Raw(bytes) = signature else {
                panic!("expected raw signature");
            };
            verify_signature(&public_key_bytes, &hex::decode(message).unwrap(), bytes).unwrap();
        }
    }

    let record = transport
        .keysign_result("sign-3", &codec::message_id(&messages[1]))
        .await
        .unwrap()
        .unwrap();
    let record: crate::SignatureRecord = serde_json::from_str(&record).unwrap();
    assert_eq!(record.msg, messages[1]);
    assert_eq!(record.der_signature.len(), 130);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reshare_adds_party() {
    let transport = MemoryTransport::new();
    let old = keygen(&transport, "keygen-r", &["a", "b"]).await;
    let public_key = old["a"].public_key.clone();

    let engine = Arc::new(SimEngine::new());
    let old_committee = vec!["a".to_string(), "b".to_string()];
    let new_committee = vec!["a".to_string(), "b".to_string(), "c".to_string()];

    let mut tasks = Vec::new();
    for party in ["a", "b", "c"] {
        let store = old.get(party).map(store).unwrap_or_default();
        let ceremony = Reshare::new(
            engine.clone(),
            &store,
            &public_key,
            party,
            &old_committee,
            &new_committee,
        )
        .unwrap();
        let runner = runner(Arc::new(transport.clone()), "reshare-1", party, &["a", "b", "c"]);
        tasks.push(tokio::spawn(async move { runner.run(&ceremony).await }));
    }

    let mut new_shares = Vec::new();
    for task in tasks {
        let share = task.await.unwrap().unwrap().expect("every party is in the new committee");
        assert_eq!(share.public_key, public_key);
        assert_eq!(share.chain_code, old["a"].chain_code);
        let native = shares_of(&engine, &share);
        assert!(native.is_consistent());
        assert_eq!(native.threshold, 2);
        new_shares.push(share);
    }
    assert_ne!(new_shares[0].share, old["a"].share);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reshare_drops_party() {
    let transport = MemoryTransport::new();
    let old = keygen(&transport, "keygen-d", &["a", "b"]).await;
    let public_key = old["a"].public_key.clone();

    let engine = Arc::new(SimEngine::new());
    let old_committee = vec!["a".to_string(), "b".to_string()];
    let new_committee = vec!["b".to_string(), "c".to_string()];

    let mut tasks = Vec::new();
    for party in ["a", "b", "c"] {
        let store = old.get(party).map(store).unwrap_or_default();
        let ceremony = Reshare::new(
            engine.clone(),
            &store,
            &public_key,
            party,
            &old_committee,
            &new_committee,
        )
        .unwrap();
        let runner = runner(Arc::new(transport.clone()), "reshare-2", party, &["a", "b", "c"]);
        tasks.push(tokio::spawn(async move { (party, runner.run(&ceremony).await) }));
    }

    for task in tasks {
        let (party, result) = task.await.unwrap();
        let share = result.unwrap();
        if party == "a" {
            assert!(share.is_none());
        } else {
            assert_eq!(share.unwrap().public_key, public_key);
        }
    }
}

#[test]
fn test_reshare_old_member_needs_share() {
    let engine = Arc::new(SimEngine::new());
    let empty: HashMap<String, Vec<u8>> = HashMap::new();
    let result = Reshare::new(
        engine,
        &empty,
        "02ab",
        "a",
        &["a".to_string(), "b".to_string()],
        &["a".to_string(), "c".to_string()],
    );
    assert!(matches!(result, Err(Error::KeyShareNotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_migrate_keeps_public_key() {
    let transport = MemoryTransport::new();
    let engine = Arc::new(SimEngine::new());

    let secrets = [Scalar::random(&mut OsRng), Scalar::random(&mut OsRng)];
    let public_key = ProjectivePoint::GENERATOR * (secrets[0] + secrets[1]);
    let public_key_hex = hex::encode(public_key.to_affine().to_encoded_point(true).as_bytes());
    let chain_code = "05".repeat(32);

    let committee = ["a", "b"];
    let mut tasks = Vec::new();
    for (party, secret) in committee.iter().zip(secrets) {
        let ceremony = Migrate::new(
            engine.clone(),
            &public_key_hex,
            &chain_code,
            secret.to_bytes().to_vec(),
        )
        .unwrap();
        let runner = runner(Arc::new(transport.clone()), "migrate-1", party, &committee);
        tasks.push(tokio::spawn(async move { runner.run(&ceremony).await }));
    }

    for task in tasks {
        let share = task.await.unwrap().unwrap();
        assert_eq!(share.public_key, public_key_hex);
        assert_eq!(share.chain_code.as_deref(), Some(chain_code.as_str()));
        assert!(shares_of(&engine, &share).is_consistent());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_setup_upload_retried() {
    let relay = MemoryTransport::new();
    let flaky = Arc::new(FlakyTransport::new(relay.clone()).fail(Fault::UploadSetup, 2));
    let engine = Arc::new(SimEngine::new());
    let committee = ["a", "b"];

    let initiator = {
        let runner = runner(flaky.clone(), "retry-1", "a", &committee);
        let ceremony = Keygen::new(engine.clone());
        tokio::spawn(async move { runner.run(&ceremony).await })
    };
    let participant = {
        let runner = runner(Arc::new(relay.clone()), "retry-1", "b", &committee);
        let ceremony = Keygen::new(engine.clone());
        tokio::spawn(async move { runner.run(&ceremony).await })
    };

    let a = initiator.await.unwrap().unwrap();
    let b = participant.await.unwrap().unwrap();
    assert_eq!(a.public_key, b.public_key);
    assert_eq!(flaky.calls(Fault::UploadSetup), 3);
}

#[tokio::test]
async fn test_attempt_budget_exhausted() {
    let flaky = Arc::new(FlakyTransport::new(MemoryTransport::new()).fail(Fault::UploadSetup, 3));
    let runner = runner(flaky.clone(), "retry-2", "a", &["a", "b"]);
    let ceremony = Keygen::new(Arc::new(SimEngine::new()));

    let err = runner.run(&ceremony).await.unwrap_err();
    assert!(matches!(err, Error::CeremonyFailed { attempts: 3, .. }));
    assert!(matches!(err.root(), Error::Transport(_)));
    assert!(err.to_string().starts_with("ceremony failed after 3 attempts: "));
    assert_eq!(flaky.calls(Fault::UploadSetup), 3);
}

#[tokio::test]
async fn test_committee_without_local_party() {
    let runner = runner(Arc::new(MemoryTransport::new()), "bad", "a", &["b", "c"]);
    let err = runner
        .run(&Keygen::new(Arc::new(SimEngine::new())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

/// Sim engine that counts native signing sessions
#[derive(Default)]
struct CountingEngine {
    inner: SimEngine,
    sign_sessions: AtomicUsize,
}

impl Engine for CountingEngine {
    type Session = <SimEngine as Engine>::Session;
    type Share = SimShare;

    fn name(&self) -> &'static str {
        "counting"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        self.inner.signature_scheme()
    }

    fn share_from_bytes(&self, bytes: &[u8]) -> crate::Result<SimShare> {
        self.inner.share_from_bytes(bytes)
    }

    fn keygen_setup(&self, threshold: usize, party_ids: &[u8]) -> crate::Result<Vec<u8>> {
        self.inner.keygen_setup(threshold, party_ids)
    }

    fn keygen_session(&self, setup: &[u8], local: &[u8]) -> crate::Result<Self::Session> {
        self.inner.keygen_session(setup, local)
    }

    fn keygen_finish(&self, session: &mut Self::Session) -> crate::Result<SimShare> {
        self.inner.keygen_finish(session)
    }

    fn reshare_setup(&self, params: ReshareSetup<'_, SimShare>) -> crate::Result<Vec<u8>> {
        self.inner.reshare_setup(params)
    }

    fn reshare_session(
        &self,
        setup: &[u8],
        local: &[u8],
        share: Option<&SimShare>,
    ) -> crate::Result<Self::Session> {
        self.inner.reshare_session(setup, local, share)
    }

    fn reshare_finish(&self, session: &mut Self::Session) -> crate::Result<SimShare> {
        self.inner.reshare_finish(session)
    }

    fn migrate_session(
        &self,
        setup: &[u8],
        local: &[u8],
        input: MigrateInput<'_>,
    ) -> crate::Result<Self::Session> {
        self.inner.migrate_session(setup, local, input)
    }

    fn sign_setup(&self, params: SignSetup<'_>) -> crate::Result<Vec<u8>> {
        self.inner.sign_setup(params)
    }

    fn decode_sign_message(&self, setup: &[u8]) -> crate::Result<Vec<u8>> {
        self.inner.decode_sign_message(setup)
    }

    fn sign_session(&self, setup: &[u8], local: &[u8], share: &SimShare) -> crate::Result<Self::Session> {
        self.sign_sessions.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_session(setup, local, share)
    }

    fn sign_finish(&self, session: &mut Self::Session) -> crate::Result<Vec<u8>> {
        self.inner.sign_finish(session)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sign_message_mismatch() {
    let transport = MemoryTransport::new();
    let shares = keygen(&transport, "keygen-m", &["a", "b"]).await;
    let public_key = shares["b"].public_key.clone();

    let engine = Arc::new(CountingEngine::default());
    let requested = "d2".repeat(32);
    let committed = "d1".repeat(32);

    // initiator publishes a setup for D1 in the slot of D2
    let setup = engine
        .sign_setup(SignSetup {
            key_id: &hex::decode(&public_key).unwrap(),
            chain_path: None,
            message: &hex::decode(&committed).unwrap(),
            party_ids: &crate::committee::serialize_parties(&["a", "b"]),
        })
        .unwrap();
    let sealed = codec::seal(&setup, &codec::EncryptionKey::from_hex(KEY).unwrap()).unwrap();
    let slot = SetupKey::new(Some(&codec::message_id(&requested)), None);
    transport
        .upload_setup("sign-m", &slot, &sealed.body)
        .await
        .unwrap();

    let runner = runner(Arc::new(transport.clone()), "sign-m", "b", &["a", "b"]);
    let err = sign_messages(
        engine.clone(),
        &store(&shares["b"]),
        &runner,
        &public_key,
        &[requested.clone()],
        None,
    )
    .await
    .unwrap_err();

    match err.root() {
        Error::MessageMismatch { expected, actual } => {
            assert_eq!(expected, &requested);
            assert_eq!(actual, &committed);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err, Error::CeremonyFailed { attempts: 1, .. }));
    assert_eq!(engine.sign_sessions.load(Ordering::SeqCst), 0);
    assert!(transport
        .messages("sign-m", "a", Some(&codec::message_id(&requested)))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sign_without_share() {
    let engine = Arc::new(SimEngine::new());
    let empty: HashMap<String, Vec<u8>> = HashMap::new();
    let result = Sign::new(engine, &empty, "02ab", &"00".repeat(32), None);
    assert!(matches!(result, Err(Error::KeyShareNotFound(_))));
}
