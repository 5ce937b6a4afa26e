//! Shared types for conclave council members: wire protocol, framing codec,
//! and simulated response profiles.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod error;
pub mod profile;
pub mod protocol;

pub use codec::PostcardCodec;
pub use error::{Aborted, ProtocolViolation, TransportError};
pub use profile::{Profile, ResponseProfile};
pub use protocol::{Frame, PeerId, ProposalNumber, Value};

/// Codec used on every peer-to-peer session.
pub type FrameCodec = PostcardCodec<Frame>;
