//! Proposer-side state: proposal number generation and quorum tallies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use conclave_core::{PeerId, ProposalNumber, Value};
use tracing::trace;

/// Majority threshold for a council of `members` peers.
#[must_use]
pub const fn quorum(members: usize) -> usize {
    members / 2 + 1
}

/// Monotonic per-proposer sequence. The first proposal of a process gets
/// sequence 1, and every later attempt a strictly higher one.
#[derive(Debug, Default)]
pub struct ProposalSequence {
    next: AtomicU64,
}

impl ProposalSequence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, proposer: PeerId) -> ProposalNumber {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        ProposalNumber::new(sequence, proposer)
    }
}

/// Phase 1 tally: promises keyed by responder, with the highest previously
/// accepted pair tracked for value adoption.
#[derive(Debug)]
pub struct PrepareTally {
    quorum: usize,
    promises: BTreeMap<PeerId, Option<(ProposalNumber, Value)>>,
}

impl PrepareTally {
    #[must_use]
    pub fn new(members: usize) -> Self {
        Self {
            quorum: quorum(members),
            promises: BTreeMap::new(),
        }
    }

    /// Record a promise from `from`. A second promise from the same peer does
    /// not count twice.
    pub fn admit(&mut self, from: PeerId, accepted: Option<(ProposalNumber, Value)>) {
        self.promises.insert(from, accepted);
        trace!(%from, count = self.promises.len(), quorum = self.quorum, "promise admitted");
    }

    #[must_use]
    pub fn has_quorum(&self) -> bool {
        self.promises.len() >= self.quorum
    }

    #[must_use]
    pub fn promises(&self) -> usize {
        self.promises.len()
    }

    /// The value phase 2 must propose: the value of the highest-numbered
    /// accepted pair among the promises, or `own` when no promise carried one.
    #[must_use]
    pub fn winning_value(&self, own: Value) -> Value {
        self.promises
            .values()
            .filter_map(Option::as_ref)
            .max_by_key(|(number, _)| *number)
            .map_or(own, |(_, value)| value.clone())
    }
}

/// Phase 2 tally: the set of peers that accepted this proposal.
#[derive(Debug)]
pub struct AcceptTally {
    quorum: usize,
    accepts: BTreeSet<PeerId>,
}

impl AcceptTally {
    #[must_use]
    pub fn new(members: usize) -> Self {
        Self {
            quorum: quorum(members),
            accepts: BTreeSet::new(),
        }
    }

    pub fn admit(&mut self, from: PeerId) {
        self.accepts.insert(from);
        trace!(%from, count = self.accepts.len(), quorum = self.quorum, "acceptance admitted");
    }

    #[must_use]
    pub fn has_quorum(&self) -> bool {
        self.accepts.len() >= self.quorum
    }

    #[must_use]
    pub fn acceptances(&self) -> usize {
        self.accepts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u8) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn number(seq: u64, id: u8) -> ProposalNumber {
        ProposalNumber::new(seq, peer(id))
    }

    fn value(s: &str) -> Value {
        Value::new(s).unwrap()
    }

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
        assert_eq!(quorum(9), 5);
    }

    #[test]
    fn sequence_starts_at_one_and_increases() {
        let sequence = ProposalSequence::new();
        let first = sequence.next(peer(3));
        let second = sequence.next(peer(3));
        assert_eq!(first, number(1, 3));
        assert_eq!(second, number(2, 3));
        assert!(second > first);
        assert!(first.get() > 0);
    }

    #[test]
    fn prepare_tally_reaches_quorum() {
        let mut tally = PrepareTally::new(3);
        assert!(!tally.has_quorum());
        tally.admit(peer(1), None);
        assert!(!tally.has_quorum());
        tally.admit(peer(2), None);
        assert!(tally.has_quorum());
    }

    #[test]
    fn duplicate_promises_count_once() {
        let mut tally = PrepareTally::new(5);
        tally.admit(peer(1), None);
        tally.admit(peer(1), None);
        assert_eq!(tally.promises(), 1);
    }

    #[test]
    fn bare_promises_yield_own_value() {
        let mut tally = PrepareTally::new(3);
        tally.admit(peer(1), None);
        tally.admit(peer(2), None);
        assert_eq!(tally.winning_value(value("mine")), value("mine"));
    }

    #[test]
    fn highest_accepted_pair_wins() {
        let mut tally = PrepareTally::new(5);
        tally.admit(peer(1), Some((number(1, 1), value("older"))));
        tally.admit(peer(2), Some((number(3, 2), value("newest"))));
        tally.admit(peer(3), Some((number(2, 1), value("newer"))));
        assert_eq!(tally.winning_value(value("mine")), value("newest"));
    }

    #[test]
    fn accept_tally_reaches_quorum() {
        let mut tally = AcceptTally::new(3);
        tally.admit(peer(1));
        assert!(!tally.has_quorum());
        tally.admit(peer(2));
        assert!(tally.has_quorum());
        assert_eq!(tally.acceptances(), 2);
    }

    #[test]
    fn duplicate_acceptances_count_once() {
        let mut tally = AcceptTally::new(3);
        tally.admit(peer(1));
        tally.admit(peer(1));
        assert!(!tally.has_quorum());
    }
}
