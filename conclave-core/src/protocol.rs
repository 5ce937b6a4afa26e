//! Wire types for the member↔member protocol: handshake and the Paxos
//! request/response frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Council member identifier, in `1..=15`.
///
/// The upper bound comes from the proposal number encoding, which packs the
/// proposer id into the low four bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(u8);

impl PeerId {
    pub const MAX: u8 = 0xF;

    /// Returns `None` outside `1..=15`.
    #[must_use]
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique, totally ordered proposal number: `(sequence << 4) | peer`.
///
/// Two distinct proposers can never generate the same number, and a higher
/// sequence always dominates regardless of peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber(u64);

impl ProposalNumber {
    #[must_use]
    pub fn new(sequence: u64, proposer: PeerId) -> Self {
        Self((sequence << 4) | u64::from(proposer.get() & 0xF))
    }

    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0 >> 4
    }

    /// Low four bits: the id of the peer that generated this number.
    #[must_use]
    pub const fn proposer(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A proposed value: an opaque, non-empty string such as a candidate name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(String);

impl Value {
    /// Returns `None` for the empty string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() { None } else { Some(Self(value)) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One frame on a member↔member session.
///
/// `Promise::accepted` is `Some` only when the responder has previously
/// accepted a proposal; `Reject::promised` carries the responder's current
/// promise so the proposer learns how high its next attempt must go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame in both directions on a new session.
    Handshake { sender: PeerId },
    /// Phase 1a: claim `number`.
    Prepare { number: ProposalNumber, sender: PeerId },
    /// Phase 1b: promise to reject anything below `number`.
    Promise {
        number: ProposalNumber,
        sender: PeerId,
        accepted: Option<(ProposalNumber, Value)>,
    },
    /// Phase 2a: bind `value` to `number`.
    Accept {
        number: ProposalNumber,
        value: Value,
        sender: PeerId,
    },
    /// Phase 2b: `value` was bound to `number`.
    Accepted {
        number: ProposalNumber,
        value: Value,
        sender: PeerId,
    },
    /// Refusal of a prepare or accept below the current promise.
    Reject { promised: ProposalNumber, sender: PeerId },
}

impl Frame {
    #[must_use]
    pub const fn sender(&self) -> PeerId {
        match self {
            Self::Handshake { sender }
            | Self::Prepare { sender, .. }
            | Self::Promise { sender, .. }
            | Self::Accept { sender, .. }
            | Self::Accepted { sender, .. }
            | Self::Reject { sender, .. } => *sender,
        }
    }

    /// True for the frames a proposer consumes (`Promise`/`Accepted`/`Reject`).
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(
            self,
            Self::Promise { .. } | Self::Accepted { .. } | Self::Reject { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_bounds() {
        assert!(PeerId::new(0).is_none());
        assert!(PeerId::new(1).is_some());
        assert!(PeerId::new(15).is_some());
        assert!(PeerId::new(16).is_none());
    }

    #[test]
    fn proposal_number_encoding() {
        let p = PeerId::new(3).unwrap();
        let n = ProposalNumber::new(2, p);
        assert_eq!(n.get(), 0x23);
        assert_eq!(n.sequence(), 2);
        assert_eq!(n.proposer(), 3);
    }

    #[test]
    fn proposal_numbers_totally_ordered() {
        let p1 = PeerId::new(1).unwrap();
        let p2 = PeerId::new(2).unwrap();
        // Same sequence: peer id breaks the tie.
        assert!(ProposalNumber::new(1, p2) > ProposalNumber::new(1, p1));
        // Higher sequence dominates any peer id.
        assert!(ProposalNumber::new(2, p1) > ProposalNumber::new(1, p2));
    }

    #[test]
    fn proposal_numbers_unique_across_peers() {
        let mut seen = std::collections::BTreeSet::new();
        for id in 1..=9 {
            for seq in 1..=10 {
                assert!(seen.insert(ProposalNumber::new(seq, PeerId::new(id).unwrap())));
            }
        }
    }

    #[test]
    fn value_rejects_empty() {
        assert!(Value::new("").is_none());
        assert_eq!(Value::new("Alice").unwrap().as_str(), "Alice");
    }
}
