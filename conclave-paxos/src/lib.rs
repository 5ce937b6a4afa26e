//! Single-decree Paxos for a fixed council.
//!
//! The state machines in this crate are pure: no I/O, no async, no clocks.
//! [`AcceptorCore`] holds one member's promised/accepted state and applies
//! the phase 1b/2b decision rules; [`PrepareTally`]/[`AcceptTally`] track a
//! proposer's progress toward quorum; [`SharedAcceptorState`] is the
//! mutex-guarded form every session handler and the local self-vote share.

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod proposer;
mod state;

pub use acceptor::{AcceptOutcome, AcceptorCore, PrepareOutcome};
pub use proposer::{AcceptTally, PrepareTally, ProposalSequence, quorum};
pub use state::SharedAcceptorState;
