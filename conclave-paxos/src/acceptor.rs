//! Pure acceptor state machine — no I/O, no async, no synchronization.

use conclave_core::{ProposalNumber, Value};

/// One member's Paxos state: the highest promise made and the last value
/// bound.
///
/// Invariants: `promised >= accepted number` whenever both exist, and an
/// accepted number is never stored without its value (the tuple binds them).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptorCore {
    promised: Option<ProposalNumber>,
    accepted: Option<(ProposalNumber, Value)>,
}

/// Result of a phase 1a `Prepare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The promise was made; carries the previously accepted pair, if any,
    /// so the proposer can adopt it.
    Promised {
        accepted: Option<(ProposalNumber, Value)>,
    },
    /// A promise at `promised` already dominates; the proposer learns how
    /// high it must go.
    Rejected { promised: ProposalNumber },
}

/// Result of a phase 2a `Accept`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    Rejected { promised: ProposalNumber },
}

impl AcceptorCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1b. Promises iff `number` is strictly above the current promise.
    pub fn prepare(&mut self, number: ProposalNumber) -> PrepareOutcome {
        match self.promised {
            Some(promised) if number <= promised => PrepareOutcome::Rejected { promised },
            _ => {
                self.promised = Some(number);
                PrepareOutcome::Promised {
                    accepted: self.accepted.clone(),
                }
            }
        }
    }

    /// Phase 2b. Accepts iff `number` is at least the current promise.
    ///
    /// `>=` rather than `>`: the proposer's own prepare already raised the
    /// promise to exactly `number`, and that accept must still succeed.
    pub fn accept(&mut self, number: ProposalNumber, value: Value) -> AcceptOutcome {
        match self.promised {
            Some(promised) if number < promised => AcceptOutcome::Rejected { promised },
            _ => {
                self.promised = Some(number);
                self.accepted = Some((number, value));
                AcceptOutcome::Accepted
            }
        }
    }

    #[must_use]
    pub fn promised(&self) -> Option<ProposalNumber> {
        self.promised
    }

    #[must_use]
    pub fn accepted(&self) -> Option<&(ProposalNumber, Value)> {
        self.accepted.as_ref()
    }

    /// Administrative reset to the initial state. Not used during a run.
    pub fn reset(&mut self) {
        self.promised = None;
        self.accepted = None;
    }
}
