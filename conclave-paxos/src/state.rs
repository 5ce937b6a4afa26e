//! Shared acceptor state.

use std::sync::{Arc, Mutex};

use conclave_core::{ProposalNumber, Value};
use tracing::trace;

use crate::acceptor::{AcceptOutcome, AcceptorCore, PrepareOutcome};

/// Mutex-guarded [`AcceptorCore`], cloneable across session handlers and the
/// proposer's self-vote.
///
/// Every transition happens under the lock, so concurrent `Prepare`/`Accept`
/// from different sessions serialize and the phase 1b/2b rules apply
/// atomically.
#[derive(Clone, Default)]
pub struct SharedAcceptorState {
    core: Arc<Mutex<AcceptorCore>>,
}

impl SharedAcceptorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with already-accepted state, as after an earlier run.
    #[must_use]
    pub fn with_accepted(number: ProposalNumber, value: Value) -> Self {
        let mut core = AcceptorCore::new();
        core.prepare(number);
        core.accept(number, value);
        Self {
            core: Arc::new(Mutex::new(core)),
        }
    }

    pub fn prepare(&self, number: ProposalNumber) -> PrepareOutcome {
        let outcome = self.core.lock().unwrap().prepare(number);
        trace!(%number, promised = matches!(outcome, PrepareOutcome::Promised { .. }), "prepare");
        outcome
    }

    pub fn accept(&self, number: ProposalNumber, value: Value) -> AcceptOutcome {
        let outcome = self.core.lock().unwrap().accept(number, value);
        trace!(%number, accepted = matches!(outcome, AcceptOutcome::Accepted), "accept");
        outcome
    }

    /// Point-in-time copy of `(promised, accepted)`.
    #[must_use]
    pub fn snapshot(&self) -> (Option<ProposalNumber>, Option<(ProposalNumber, Value)>) {
        let core = self.core.lock().unwrap();
        (core.promised(), core.accepted().cloned())
    }

    /// Administrative reset. Not used during a run.
    pub fn reset(&self) {
        self.core.lock().unwrap().reset();
    }
}

#[cfg(test)]
mod tests {
    use conclave_core::PeerId;

    use super::*;

    fn number(seq: u64, peer: u8) -> ProposalNumber {
        ProposalNumber::new(seq, PeerId::new(peer).unwrap())
    }

    #[test]
    fn clones_share_state() {
        let state = SharedAcceptorState::new();
        let other = state.clone();
        state.prepare(number(1, 1));
        assert_eq!(other.snapshot().0, Some(number(1, 1)));
    }

    #[test]
    fn seeded_state_reports_accepted_pair() {
        let v = Value::new("old").unwrap();
        let state = SharedAcceptorState::with_accepted(number(2, 2), v.clone());
        let (promised, accepted) = state.snapshot();
        assert_eq!(promised, Some(number(2, 2)));
        assert_eq!(accepted, Some((number(2, 2), v)));
    }
}
