//! Committee computation
//!
//! Threshold policy, the NUL-separated party list consumed by the native
//! libraries, and the union/index sets used by resharing.

use crate::{Error, PartyId, Result};

/// Signing threshold for a committee of `n` parties: `ceil(2n / 3)`.
pub fn threshold(n: usize) -> usize {
    (2 * n).div_ceil(3)
}

/// Encode party ids as UTF-8 joined by a single NUL byte, no trailing NUL.
pub fn serialize_parties<S: AsRef<str>>(parties: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, party) in parties.iter().enumerate() {
        if i > 0 {
            out.push(0);
        }
        out.extend_from_slice(party.as_ref().as_bytes());
    }
    out
}

/// Inverse of [`serialize_parties`].
pub fn parse_parties(bytes: &[u8]) -> Result<Vec<PartyId>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bytes
        .split(|b| *b == 0)
        .map(|id| {
            String::from_utf8(id.to_vec())
                .map_err(|e| Error::Deserialization(format!("party id is not UTF-8: {e}")))
        })
        .collect()
}

/// Union committee for a reshare, with index sets into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshareCommittee {
    /// Old committee followed by newcomers, first-seen order
    pub all_parties: Vec<PartyId>,
    /// Positions in `all_parties` of new committee members
    pub new_indices: Vec<u8>,
    /// Positions in `all_parties` of old committee members
    pub old_indices: Vec<u8>,
}

/// Compute the union of the old and new committees.
pub fn reshare_indices<S: AsRef<str>>(old: &[S], new: &[S]) -> Result<ReshareCommittee> {
    let mut all_parties: Vec<PartyId> = Vec::with_capacity(old.len() + new.len());
    for party in old.iter().chain(new.iter()) {
        let party = party.as_ref();
        if !all_parties.iter().any(|p| p == party) {
            all_parties.push(party.to_string());
        }
    }

    if all_parties.len() > u8::MAX as usize + 1 {
        return Err(Error::InvalidConfig(format!(
            "reshare committee of {} parties does not fit byte indices",
            all_parties.len()
        )));
    }

    let contains = |set: &[S], party: &str| set.iter().any(|p| p.as_ref() == party);

    let mut new_indices = Vec::new();
    let mut old_indices = Vec::new();
    for (idx, party) in all_parties.iter().enumerate() {
        if contains(old, party) {
            old_indices.push(idx as u8);
        }
        if contains(new, party) {
            new_indices.push(idx as u8);
        }
    }

    Ok(ReshareCommittee {
        all_parties,
        new_indices,
        old_indices,
    })
}

/// Check that a committee can run a ceremony with `local` in it.
pub fn validate_committee<S: AsRef<str>>(committee: &[S], local: &str) -> Result<()> {
    if committee.len() < 2 {
        return Err(Error::InvalidConfig(format!(
            "committee needs at least 2 parties, got {}",
            committee.len()
        )));
    }
    for (i, party) in committee.iter().enumerate() {
        let party = party.as_ref();
        if party.is_empty() || party.as_bytes().contains(&0) {
            return Err(Error::InvalidConfig(format!("invalid party id {party:?}")));
        }
        if committee[..i].iter().any(|p| p.as_ref() == party) {
            return Err(Error::InvalidConfig(format!("duplicate party id {party}")));
        }
    }
    if !committee.iter().any(|p| p.as_ref() == local) {
        return Err(Error::InvalidConfig(format!(
            "local party {local} is not a committee member"
        )));
    }
    Ok(())
}
