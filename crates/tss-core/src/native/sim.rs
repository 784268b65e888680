//! Simulated native engine
//!
//! Stand-in for the external MPC library so the coordinator can be run end to
//! end. It does real secp256k1 arithmetic (Feldman VSS keygen, Lagrange-weighted
//! resharing, additive migration and a two-round threshold Schnorr signature)
//! but it is NOT production cryptography: there are no proofs of knowledge and
//! nonces are not bound to the message.
//!
//! Setup blobs, shares and protocol messages are JSON.

use super::{Engine, MigrateInput, NativeSession, ReshareSetup, ShareHandle, SignSetup};
use crate::committee::parse_parties;
use crate::{Error, Result, SignatureScheme};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

fn protocol(msg: impl Into<String>) -> Error {
    Error::Protocol(msg.into())
}

fn encode_point(point: &ProjectivePoint) -> String {
    hex::encode(point.to_affine().to_encoded_point(true).as_bytes())
}

fn decode_point(hex_point: &str) -> Result<ProjectivePoint> {
    let bytes = hex::decode(hex_point).map_err(|e| protocol(e.to_string()))?;
    let point = EncodedPoint::from_bytes(&bytes).map_err(|e| protocol(e.to_string()))?;
    let affine: AffinePoint = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&point))
        .ok_or_else(|| protocol("invalid curve point"))?;
    Ok(ProjectivePoint::from(affine))
}

fn encode_scalar(scalar: &Scalar) -> String {
    hex::encode(scalar.to_bytes())
}

fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| protocol("invalid scalar length"))?;
    Ok(<Scalar as Reduce<U256>>::reduce_bytes(&array.into()))
}

fn decode_scalar(hex_scalar: &str) -> Result<Scalar> {
    scalar_from_bytes(&hex::decode(hex_scalar).map_err(|e| protocol(e.to_string()))?)
}

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest.into())
}

fn random_instance() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Polynomial over the scalar field, constant term first
struct Polynomial(Vec<Scalar>);

impl Polynomial {
    fn random(constant: Scalar, threshold: usize) -> Self {
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(constant);
        for _ in 1..threshold {
            coefficients.push(Scalar::random(&mut OsRng));
        }
        Self(coefficients)
    }

    fn evaluate(&self, x: u64) -> Scalar {
        let x_scalar = Scalar::from(x);
        let mut result = Scalar::ZERO;
        let mut x_power = Scalar::ONE;
        for coef in &self.0 {
            result += *coef * x_power;
            x_power *= x_scalar;
        }
        result
    }

    fn commitments(&self) -> Vec<ProjectivePoint> {
        self.0
            .iter()
            .map(|coef| ProjectivePoint::GENERATOR * coef)
            .collect()
    }
}

fn evaluate_commitments(commitments: &[ProjectivePoint], x: u64) -> ProjectivePoint {
    let x_scalar = Scalar::from(x);
    let mut result = ProjectivePoint::IDENTITY;
    let mut x_power = Scalar::ONE;
    for commitment in commitments {
        result += *commitment * x_power;
        x_power *= x_scalar;
    }
    result
}

fn lagrange_coefficient(x: u64, xs: &[u64]) -> Result<Scalar> {
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for &j in xs {
        if j == x {
            continue;
        }
        numerator *= Scalar::from(j);
        denominator *= if j > x {
            Scalar::from(j - x)
        } else {
            -Scalar::from(x - j)
        };
    }
    let inverse = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| protocol("duplicate evaluation points"))?;
    Ok(numerator * inverse)
}

fn challenge(r: &ProjectivePoint, public_key: &ProjectivePoint, message: &[u8]) -> Scalar {
    hash_to_scalar(&[
        r.to_affine().to_encoded_point(true).as_bytes(),
        public_key.to_affine().to_encoded_point(true).as_bytes(),
        message,
    ])
}

/// Check a simulated signature (`R || s`, 65 bytes) against a public key
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != 65 {
        return Err(protocol("signature must be 65 bytes"));
    }
    let public_key = decode_point(&hex::encode(public_key))?;
    let r = decode_point(&hex::encode(&signature[..33]))?;
    let s = scalar_from_bytes(&signature[33..])?;
    let e = challenge(&r, &public_key, message);
    if ProjectivePoint::GENERATOR * s != r + public_key * e {
        return Err(protocol("signature does not verify"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SetupMessage {
    Keygen {
        instance: String,
        threshold: usize,
        parties: String,
    },
    Reshare {
        instance: String,
        threshold: usize,
        parties: String,
        old_indices: Vec<u8>,
        new_indices: Vec<u8>,
        public_key: String,
        chain_code: Option<String>,
    },
    Sign {
        instance: String,
        key_id: String,
        chain_path: Option<String>,
        message: String,
        parties: String,
    },
}

impl SetupMessage {
    fn decode(setup: &[u8]) -> Result<Self> {
        serde_json::from_slice(setup).map_err(|e| protocol(format!("malformed setup message: {e}")))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }
}

fn decode_parties(hex_parties: &str) -> Result<Vec<String>> {
    parse_parties(&hex::decode(hex_parties).map_err(|e| protocol(e.to_string()))?)
}

fn position(parties: &[String], party: &str) -> Result<usize> {
    parties
        .iter()
        .position(|p| p == party)
        .ok_or_else(|| protocol(format!("party {party} is not in the setup committee")))
}

/// Key share of the simulated engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimShare {
    /// Evaluation point of this share (committee position + 1)
    pub x: u64,
    pub threshold: usize,
    secret: String,
    pub public_key: String,
    /// Public share of every committee member, by evaluation point
    pub public_shares: BTreeMap<u64, String>,
    pub chain_code: Option<String>,
}

impl SimShare {
    fn secret(&self) -> Result<Scalar> {
        decode_scalar(&self.secret)
    }

    fn public_key_point(&self) -> Result<ProjectivePoint> {
        decode_point(&self.public_key)
    }

    /// Whether the secret matches the public share published for `x`
    pub fn is_consistent(&self) -> bool {
        let (Ok(secret), Some(public_share)) = (self.secret(), self.public_shares.get(&self.x))
        else {
            return false;
        };
        match decode_point(public_share) {
            Ok(point) => ProjectivePoint::GENERATOR * secret == point,
            Err(_) => false,
        }
    }

    fn build(
        x: u64,
        threshold: usize,
        secret: Scalar,
        commitments: &[ProjectivePoint],
        points: impl Iterator<Item = u64>,
        chain_code: Option<String>,
    ) -> Self {
        let public_shares = points
            .map(|p| (p, encode_point(&evaluate_commitments(commitments, p))))
            .collect();
        Self {
            x,
            threshold,
            secret: encode_scalar(&secret),
            public_key: encode_point(&commitments[0]),
            public_shares,
            chain_code,
        }
    }
}

impl ShareHandle for SimShare {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    fn public_key(&self) -> Result<Vec<u8>> {
        hex::decode(&self.public_key).map_err(|e| protocol(e.to_string()))
    }

    fn chain_code(&self) -> Result<Option<Vec<u8>>> {
        self.chain_code
            .as_deref()
            .map(|c| hex::decode(c).map_err(|e| protocol(e.to_string())))
            .transpose()
    }

    fn key_id(&self) -> Result<Vec<u8>> {
        self.public_key()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    instance: String,
    from: String,
    to: Vec<String>,
    payload: Payload,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Payload {
    Deal {
        x: u64,
        commitments: Vec<String>,
        share: Option<String>,
    },
    Ready,
    Nonce {
        x: u64,
        point: String,
    },
    Partial {
        z: String,
    },
}

type Outgoing = Vec<(Vec<String>, Payload)>;

struct Dealt {
    x: u64,
    commitments: Vec<ProjectivePoint>,
    share: Option<Scalar>,
}

impl Dealt {
    fn decode(x: u64, commitments: &[String], share: Option<&str>) -> Result<Self> {
        Ok(Self {
            x,
            commitments: commitments
                .iter()
                .map(|c| decode_point(c))
                .collect::<Result<_>>()?,
            share: share.map(decode_scalar).transpose()?,
        })
    }

    fn verify(&self, from: &str, at: u64) -> Result<Scalar> {
        let share = self
            .share
            .ok_or_else(|| protocol(format!("no share dealt by {from}")))?;
        if ProjectivePoint::GENERATOR * share != evaluate_commitments(&self.commitments, at) {
            return Err(protocol(format!(
                "share from {from} does not match commitment"
            )));
        }
        Ok(share)
    }
}

/// Keygen and migration: every party deals a Feldman-committed polynomial
struct DealRound {
    instance: String,
    parties: Vec<String>,
    threshold: usize,
    x: u64,
    polynomial: Polynomial,
    received: BTreeMap<String, Dealt>,
    expected_public_key: Option<ProjectivePoint>,
    chain_code: Option<String>,
}

impl DealRound {
    fn start(&self, local: &str) -> Outgoing {
        let commitments: Vec<String> = self.polynomial.commitments().iter().map(encode_point).collect();
        self.parties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.as_str() != local)
            .map(|(i, p)| {
                let share = self.polynomial.evaluate(i as u64 + 1);
                (
                    vec![p.clone()],
                    Payload::Deal {
                        x: self.x,
                        commitments: commitments.clone(),
                        share: Some(encode_scalar(&share)),
                    },
                )
            })
            .collect()
    }

    fn input(&mut self, from: &str, payload: Payload) -> Result<bool> {
        let Payload::Deal { x, commitments, share } = payload else {
            return Err(protocol("unexpected message in keygen"));
        };
        if commitments.len() != self.threshold {
            return Err(protocol(format!("party {from} committed to wrong degree")));
        }
        let dealt = Dealt::decode(x, &commitments, share.as_deref())?;
        dealt.verify(from, self.x)?;
        self.received.insert(from.to_string(), dealt);
        Ok(self.received.len() == self.parties.len() - 1)
    }

    fn finish(&self) -> Result<SimShare> {
        let mut secret = self.polynomial.evaluate(self.x);
        let mut commitments = self.polynomial.commitments();
        for dealt in self.received.values() {
            secret += dealt.verify("peer", self.x)?;
            for (acc, c) in commitments.iter_mut().zip(&dealt.commitments) {
                *acc += c;
            }
        }

        if let Some(expected) = self.expected_public_key {
            if commitments[0] != expected {
                return Err(protocol("migrated key does not match the existing public key"));
            }
        }

        let chain_code = self.chain_code.clone().or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(b"sim-chain-code");
            hasher.update(self.instance.as_bytes());
            hasher.update(commitments[0].to_affine().to_encoded_point(true).as_bytes());
            Some(hex::encode(hasher.finalize()))
        });

        Ok(SimShare::build(
            self.x,
            self.threshold,
            secret,
            &commitments,
            1..=self.parties.len() as u64,
            chain_code,
        ))
    }
}

/// Resharing: old members re-deal their share to the new committee
struct ReshareRound {
    others: Vec<String>,
    old_members: Vec<String>,
    new_members: Vec<String>,
    threshold: usize,
    public_key: ProjectivePoint,
    chain_code: Option<String>,
    /// Own deal when the local party belongs to the old committee
    own: Option<(u64, Polynomial)>,
    /// Evaluation point in the new committee
    new_x: Option<u64>,
    deals: BTreeMap<String, Dealt>,
    readies: Vec<String>,
}

impl ReshareRound {
    fn start(&self) -> Outgoing {
        let Some((old_x, polynomial)) = &self.own else {
            return vec![(self.others.clone(), Payload::Ready)];
        };
        let commitments: Vec<String> = polynomial.commitments().iter().map(encode_point).collect();
        self.others
            .iter()
            .map(|p| {
                let share = self
                    .new_members
                    .iter()
                    .position(|m| m == p)
                    .map(|i| encode_scalar(&polynomial.evaluate(i as u64 + 1)));
                (
                    vec![p.clone()],
                    Payload::Deal {
                        x: *old_x,
                        commitments: commitments.clone(),
                        share,
                    },
                )
            })
            .collect()
    }

    fn input(&mut self, from: &str, payload: Payload) -> Result<bool> {
        let is_old = self.old_members.iter().any(|m| m == from);
        match payload {
            Payload::Deal { x, commitments, share } if is_old => {
                if commitments.len() != self.threshold {
                    return Err(protocol(format!("party {from} committed to wrong degree")));
                }
                let dealt = Dealt::decode(x, &commitments, share.as_deref())?;
                if let Some(new_x) = self.new_x {
                    dealt.verify(from, new_x)?;
                }
                self.deals.insert(from.to_string(), dealt);
            }
            Payload::Ready if !is_old => self.readies.push(from.to_string()),
            _ => return Err(protocol(format!("unexpected reshare message from {from}"))),
        }

        let complete = self.deals.len() + self.readies.len() == self.others.len();
        if complete && self.new_x.is_some() {
            self.combined()?;
        }
        Ok(complete)
    }

    /// Lagrange-weighted sum of every dealer's polynomial, own deal included
    fn combined(&self) -> Result<(Scalar, Vec<ProjectivePoint>)> {
        let new_x = self.new_x.ok_or_else(|| protocol("local party is not in the new committee"))?;

        let mut dealers: Vec<(u64, Vec<ProjectivePoint>, Scalar)> = Vec::new();
        if let Some((old_x, polynomial)) = &self.own {
            dealers.push((*old_x, polynomial.commitments(), polynomial.evaluate(new_x)));
        }
        for (from, dealt) in &self.deals {
            dealers.push((dealt.x, dealt.commitments.clone(), dealt.verify(from, new_x)?));
        }

        let xs: Vec<u64> = dealers.iter().map(|(x, _, _)| *x).collect();
        let mut secret = Scalar::ZERO;
        let mut commitments = vec![ProjectivePoint::IDENTITY; self.threshold];
        for (x, dealer_commitments, share) in &dealers {
            let lambda = lagrange_coefficient(*x, &xs)?;
            secret += *share * lambda;
            for (acc, c) in commitments.iter_mut().zip(dealer_commitments) {
                *acc += *c * lambda;
            }
        }

        if commitments[0] != self.public_key {
            return Err(protocol("dealt commitments do not reconstruct the public key"));
        }
        Ok((secret, commitments))
    }

    fn finish(&self) -> Result<SimShare> {
        let (secret, commitments) = self.combined()?;
        let new_x = self.new_x.ok_or_else(|| protocol("local party is not in the new committee"))?;
        Ok(SimShare::build(
            new_x,
            self.threshold,
            secret,
            &commitments,
            1..=self.new_members.len() as u64,
            self.chain_code.clone(),
        ))
    }
}

/// Two-round threshold Schnorr signing
struct SignRound {
    others: Vec<String>,
    x: u64,
    secret: Scalar,
    public_key: ProjectivePoint,
    public_shares: BTreeMap<u64, String>,
    message: Vec<u8>,
    nonce: Scalar,
    nonces: BTreeMap<String, (u64, ProjectivePoint)>,
    partials: BTreeMap<String, Scalar>,
    own_partial: Option<Scalar>,
    signature: Option<Vec<u8>>,
}

impl SignRound {
    fn start(&self) -> Outgoing {
        vec![(
            self.others.clone(),
            Payload::Nonce {
                x: self.x,
                point: encode_point(&(ProjectivePoint::GENERATOR * self.nonce)),
            },
        )]
    }

    fn aggregate_nonce(&self) -> (ProjectivePoint, Vec<u64>) {
        let mut r = ProjectivePoint::GENERATOR * self.nonce;
        let mut xs = vec![self.x];
        for (x, point) in self.nonces.values() {
            r += point;
            xs.push(*x);
        }
        (r, xs)
    }

    fn input(&mut self, from: &str, payload: Payload) -> Result<(bool, Outgoing)> {
        if !self.others.iter().any(|p| p == from) {
            return Err(protocol(format!("{from} is not a signer")));
        }
        let mut outgoing = Vec::new();
        match payload {
            Payload::Nonce { x, point } => {
                if self.nonces.contains_key(from) {
                    return Err(protocol(format!("duplicate nonce from {from}")));
                }
                self.nonces.insert(from.to_string(), (x, decode_point(&point)?));
                if self.nonces.len() == self.others.len() {
                    let (r, xs) = self.aggregate_nonce();
                    let e = challenge(&r, &self.public_key, &self.message);
                    let lambda = lagrange_coefficient(self.x, &xs)?;
                    let z = self.nonce + e * lambda * self.secret;
                    self.own_partial = Some(z);
                    outgoing.push((self.others.clone(), Payload::Partial { z: encode_scalar(&z) }));
                }
            }
            Payload::Partial { z } => {
                if self.partials.contains_key(from) {
                    return Err(protocol(format!("duplicate partial signature from {from}")));
                }
                self.partials.insert(from.to_string(), decode_scalar(&z)?);
            }
            _ => return Err(protocol("unexpected message in signing")),
        }

        if self.own_partial.is_some() && self.partials.len() == self.others.len() {
            self.combine()?;
        }
        Ok((self.signature.is_some(), outgoing))
    }

    fn combine(&mut self) -> Result<()> {
        let (r, xs) = self.aggregate_nonce();
        let e = challenge(&r, &self.public_key, &self.message);

        let mut s = self.own_partial.ok_or_else(|| protocol("own partial missing"))?;
        for (from, z) in &self.partials {
            let (x, r_j) = self.nonces[from];
            let public_share = self
                .public_shares
                .get(&x)
                .ok_or_else(|| protocol(format!("no public share for {from}")))?;
            let lambda = lagrange_coefficient(x, &xs)?;
            if ProjectivePoint::GENERATOR * z != r_j + decode_point(public_share)? * (e * lambda) {
                return Err(protocol(format!("invalid partial signature from {from}")));
            }
            s += z;
        }

        if ProjectivePoint::GENERATOR * s != r + self.public_key * e {
            return Err(protocol("aggregate signature does not verify"));
        }

        let mut signature = r.to_affine().to_encoded_point(true).as_bytes().to_vec();
        signature.extend_from_slice(&s.to_bytes());
        self.signature = Some(signature);
        Ok(())
    }
}

enum Round {
    Deal(DealRound),
    Reshare(ReshareRound),
    Sign(SignRound),
}

/// Ceremony session of the simulated engine
pub struct SimSession {
    instance: String,
    local: String,
    outbox: VecDeque<Vec<u8>>,
    round: Round,
    complete: bool,
}

impl SimSession {
    fn new(instance: String, local: String, round: Round) -> Result<Self> {
        let outgoing = match &round {
            Round::Deal(r) => r.start(&local),
            Round::Reshare(r) => r.start(),
            Round::Sign(r) => r.start(),
        };
        let mut session = Self {
            instance,
            local,
            outbox: VecDeque::new(),
            round,
            complete: false,
        };
        session.queue(outgoing)?;
        Ok(session)
    }

    fn queue(&mut self, outgoing: Outgoing) -> Result<()> {
        for (to, payload) in outgoing {
            if to.is_empty() {
                continue;
            }
            let message = WireMessage {
                instance: self.instance.clone(),
                from: self.local.clone(),
                to,
                payload,
            };
            self.outbox.push_back(serde_json::to_vec(&message)?);
        }
        Ok(())
    }

    fn require_complete(&self) -> Result<()> {
        if !self.complete {
            return Err(protocol("session is not complete"));
        }
        Ok(())
    }
}

impl NativeSession for SimSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.outbox.pop_front())
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Option<Vec<u8>> {
        let message: WireMessage = serde_json::from_slice(message).ok()?;
        message.to.get(index).map(|p| p.as_bytes().to_vec())
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        let message: WireMessage = serde_json::from_slice(message)
            .map_err(|e| protocol(format!("malformed protocol message: {e}")))?;

        if message.instance != self.instance {
            debug!(
                from = %message.from,
                instance = %message.instance,
                "Ignoring message of another session instance"
            );
            return Ok(self.complete);
        }
        if !message.to.iter().any(|p| *p == self.local) {
            return Err(protocol(format!(
                "message from {} is not addressed to {}",
                message.from, self.local
            )));
        }
        if self.complete {
            return Ok(true);
        }

        let from = message.from.as_str();
        let complete = match &mut self.round {
            Round::Deal(round) => {
                if round.received.contains_key(from) || !round.parties.iter().any(|p| p == from) {
                    return Err(protocol(format!("unexpected deal from {from}")));
                }
                round.input(from, message.payload)?
            }
            Round::Reshare(round) => {
                if round.deals.contains_key(from) || round.readies.iter().any(|p| p == from) {
                    return Err(protocol(format!("duplicate reshare message from {from}")));
                }
                round.input(from, message.payload)?
            }
            Round::Sign(round) => {
                let (complete, outgoing) = round.input(from, message.payload)?;
                self.queue(outgoing)?;
                complete
            }
        };

        self.complete = complete;
        Ok(complete)
    }
}

/// Simulated engine
#[derive(Debug, Clone, Default)]
pub struct SimEngine {
    namespace: Option<String>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose setup messages live in their own relay slot
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
        }
    }
}

impl Engine for SimEngine {
    type Session = SimSession;
    type Share = SimShare;

    fn name(&self) -> &'static str {
        "sim-schnorr"
    }

    fn setup_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::Eddsa
    }

    fn share_from_bytes(&self, bytes: &[u8]) -> Result<SimShare> {
        serde_json::from_slice(bytes).map_err(|e| protocol(format!("malformed key share: {e}")))
    }

    fn keygen_setup(&self, threshold: usize, party_ids: &[u8]) -> Result<Vec<u8>> {
        let parties = parse_parties(party_ids)?;
        if threshold < 2 || threshold > parties.len() {
            return Err(protocol(format!(
                "threshold {threshold} invalid for {} parties",
                parties.len()
            )));
        }
        SetupMessage::Keygen {
            instance: random_instance(),
            threshold,
            parties: hex::encode(party_ids),
        }
        .encode()
    }

    fn keygen_session(&self, setup: &[u8], local_party: &[u8]) -> Result<SimSession> {
        deal_session(setup, local_party, Scalar::random(&mut OsRng), None, None)
    }

    fn keygen_finish(&self, session: &mut SimSession) -> Result<SimShare> {
        session.require_complete()?;
        match &session.round {
            Round::Deal(round) => round.finish(),
            _ => Err(protocol("not a keygen session")),
        }
    }

    fn reshare_setup(&self, params: ReshareSetup<'_, SimShare>) -> Result<Vec<u8>> {
        let share = params
            .share
            .ok_or_else(|| protocol("reshare setup requires the initiator's key share"))?;
        let parties = parse_parties(params.party_ids)?;
        if params
            .old_indices
            .iter()
            .chain(params.new_indices)
            .any(|i| *i as usize >= parties.len())
        {
            return Err(protocol("reshare index out of range"));
        }
        SetupMessage::Reshare {
            instance: random_instance(),
            threshold: params.threshold,
            parties: hex::encode(params.party_ids),
            old_indices: params.old_indices.to_vec(),
            new_indices: params.new_indices.to_vec(),
            public_key: share.public_key.clone(),
            chain_code: share.chain_code.clone(),
        }
        .encode()
    }

    fn reshare_session(
        &self,
        setup: &[u8],
        local_party: &[u8],
        share: Option<&SimShare>,
    ) -> Result<SimSession> {
        let SetupMessage::Reshare {
            instance,
            threshold,
            parties,
            old_indices,
            new_indices,
            public_key,
            chain_code,
        } = SetupMessage::decode(setup)?
        else {
            return Err(protocol("not a reshare setup message"));
        };
        let parties = decode_parties(&parties)?;
        let local = String::from_utf8(local_party.to_vec()).map_err(|e| protocol(e.to_string()))?;
        position(&parties, &local)?;

        let pick = |indices: &[u8]| -> Vec<String> {
            indices
                .iter()
                .filter_map(|i| parties.get(*i as usize).cloned())
                .collect()
        };
        let old_members = pick(&old_indices);
        let new_members = pick(&new_indices);
        let public_key_point = decode_point(&public_key)?;

        let own = if old_members.contains(&local) {
            let share = share
                .ok_or_else(|| protocol("old committee member has no key share"))?;
            if share.public_key != public_key {
                return Err(protocol("key share belongs to a different public key"));
            }
            Some((share.x, Polynomial::random(share.secret()?, threshold)))
        } else {
            None
        };

        let round = ReshareRound {
            others: parties.iter().filter(|p| **p != local).cloned().collect(),
            new_x: new_members
                .iter()
                .position(|m| *m == local)
                .map(|i| i as u64 + 1),
            old_members,
            new_members,
            threshold,
            public_key: public_key_point,
            chain_code,
            own,
            deals: BTreeMap::new(),
            readies: Vec::new(),
        };
        SimSession::new(instance, local, Round::Reshare(round))
    }

    fn reshare_finish(&self, session: &mut SimSession) -> Result<SimShare> {
        session.require_complete()?;
        match &session.round {
            Round::Reshare(round) => round.finish(),
            _ => Err(protocol("not a reshare session")),
        }
    }

    fn migrate_session(
        &self,
        setup: &[u8],
        local_party: &[u8],
        input: MigrateInput<'_>,
    ) -> Result<SimSession> {
        let contribution = scalar_from_bytes(input.local_secret)?;
        let expected = decode_point(&hex::encode(input.public_key))?;
        deal_session(
            setup,
            local_party,
            contribution,
            Some(expected),
            Some(hex::encode(input.chain_code)),
        )
    }

    fn sign_setup(&self, params: SignSetup<'_>) -> Result<Vec<u8>> {
        parse_parties(params.party_ids)?;
        SetupMessage::Sign {
            instance: random_instance(),
            key_id: hex::encode(params.key_id),
            chain_path: params.chain_path.map(str::to_string),
            message: hex::encode(params.message),
            parties: hex::encode(params.party_ids),
        }
        .encode()
    }

    fn decode_sign_message(&self, setup: &[u8]) -> Result<Vec<u8>> {
        match SetupMessage::decode(setup)? {
            SetupMessage::Sign { message, .. } => {
                hex::decode(message).map_err(|e| protocol(e.to_string()))
            }
            _ => Err(protocol("not a signing setup message")),
        }
    }

    fn sign_session(&self, setup: &[u8], local_party: &[u8], share: &SimShare) -> Result<SimSession> {
        let SetupMessage::Sign {
            instance,
            key_id,
            message,
            parties,
            ..
        } = SetupMessage::decode(setup)?
        else {
            return Err(protocol("not a signing setup message"));
        };
        if key_id != share.public_key {
            return Err(protocol("setup message is for a different key"));
        }
        let parties = decode_parties(&parties)?;
        if parties.len() < share.threshold {
            return Err(protocol(format!(
                "{} signers cannot meet threshold {}",
                parties.len(),
                share.threshold
            )));
        }
        let local = String::from_utf8(local_party.to_vec()).map_err(|e| protocol(e.to_string()))?;
        position(&parties, &local)?;

        let round = SignRound {
            others: parties.iter().filter(|p| **p != local).cloned().collect(),
            x: share.x,
            secret: share.secret()?,
            public_key: share.public_key_point()?,
            public_shares: share.public_shares.clone(),
            message: hex::decode(message).map_err(|e| protocol(e.to_string()))?,
            nonce: Scalar::random(&mut OsRng),
            nonces: BTreeMap::new(),
            partials: BTreeMap::new(),
            own_partial: None,
            signature: None,
        };
        SimSession::new(instance, local, Round::Sign(round))
    }

    fn sign_finish(&self, session: &mut SimSession) -> Result<Vec<u8>> {
        session.require_complete()?;
        match &session.round {
            Round::Sign(SignRound {
                signature: Some(signature),
                ..
            }) => Ok(signature.clone()),
            _ => Err(protocol("not a finished signing session")),
        }
    }
}

fn deal_session(
    setup: &[u8],
    local_party: &[u8],
    constant: Scalar,
    expected_public_key: Option<ProjectivePoint>,
    chain_code: Option<String>,
) -> Result<SimSession> {
    let SetupMessage::Keygen {
        instance,
        threshold,
        parties,
    } = SetupMessage::decode(setup)?
    else {
        return Err(protocol("not a keygen setup message"));
    };
    let parties = decode_parties(&parties)?;
    let local = String::from_utf8(local_party.to_vec()).map_err(|e| protocol(e.to_string()))?;
    let x = position(&parties, &local)? as u64 + 1;

    let round = DealRound {
        instance: instance.clone(),
        parties,
        threshold,
        x,
        polynomial: Polynomial::random(constant, threshold),
        received: BTreeMap::new(),
        expected_public_key,
        chain_code,
    };
    SimSession::new(instance, local, Round::Deal(round))
}
