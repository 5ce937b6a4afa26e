//! The proposal driver: one value through both Paxos phases.

use conclave_core::{Frame, Profile, ProposalNumber, Value};
use conclave_paxos::{
    AcceptOutcome, AcceptTally, PrepareOutcome, PrepareTally, ProposalSequence, quorum,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::node::NodeCtx;
use crate::registry::Reply;

/// Result of a single proposal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// A majority accepted; every peer that learns a value learns this one.
    Chosen(Value),
    /// Fewer than `⌊N/2⌋ + 1` peers answered a phase in time.
    LostQuorum,
    /// The node shut down mid-attempt.
    Aborted,
}

/// Drive one attempt. The caller holds the node's proposal lock, so this
/// attempt owns the reply router until it settles.
#[instrument(skip_all, fields(member = %ctx.id))]
pub(crate) async fn run(
    ctx: &NodeCtx,
    sequence: &ProposalSequence,
    value: Value,
) -> ProposalOutcome {
    if ctx.cancel.is_cancelled() {
        return ProposalOutcome::Aborted;
    }

    let number = sequence.next(ctx.id);
    debug!(%number, %value, "starting proposal");

    let mut replies = ctx.router.begin(number);
    let outcome = attempt(ctx, number, value, &mut replies).await;
    ctx.router.finish();
    outcome
}

async fn attempt(
    ctx: &NodeCtx,
    number: ProposalNumber,
    value: Value,
    replies: &mut mpsc::UnboundedReceiver<Reply>,
) -> ProposalOutcome {
    // Phase 1: collect promises. The self-vote goes straight through the
    // local acceptor state; it can still be refused if a rival proposal
    // already promised higher.
    let mut promises = PrepareTally::new(ctx.members);
    if let PrepareOutcome::Promised { accepted } = ctx.state.prepare(number) {
        promises.admit(ctx.id, accepted);
    }

    fan_out(
        ctx,
        Frame::Prepare {
            number,
            sender: ctx.id,
        },
    )
    .await;

    let deadline = collection_deadline(ctx.profile.as_ref());
    while !promises.has_quorum() {
        let reply = tokio::select! {
            () = ctx.cancel.cancelled() => return ProposalOutcome::Aborted,
            () = tokio::time::sleep_until(deadline) => break,
            reply = replies.recv() => reply,
        };
        match reply {
            Some((from, Frame::Promise { number: n, accepted, .. })) if n == number => {
                promises.admit(from, accepted);
            }
            Some((from, Frame::Reject { promised, .. })) => {
                debug!(%from, %promised, "prepare rejected by peer");
            }
            Some(_) => {}
            None => break,
        }
    }

    if !promises.has_quorum() {
        warn!(
            promises = promises.promises(),
            quorum = quorum(ctx.members),
            "did not receive majority of promises"
        );
        return ProposalOutcome::LostQuorum;
    }

    // A promise that carries a previously accepted value binds us to the
    // highest-numbered one of those instead of our own value.
    let chosen = promises.winning_value(value);

    // Phase 2: collect acceptances for the chosen value.
    let mut accepts = AcceptTally::new(ctx.members);
    if let AcceptOutcome::Accepted = ctx.state.accept(number, chosen.clone()) {
        accepts.admit(ctx.id);
    }

    fan_out(
        ctx,
        Frame::Accept {
            number,
            value: chosen.clone(),
            sender: ctx.id,
        },
    )
    .await;

    let deadline = collection_deadline(ctx.profile.as_ref());
    while !accepts.has_quorum() {
        let reply = tokio::select! {
            () = ctx.cancel.cancelled() => return ProposalOutcome::Aborted,
            () = tokio::time::sleep_until(deadline) => break,
            reply = replies.recv() => reply,
        };
        match reply {
            Some((from, Frame::Accepted { number: n, .. })) if n == number => {
                accepts.admit(from);
            }
            Some((from, Frame::Reject { promised, .. })) => {
                debug!(%from, %promised, "accept rejected by peer");
            }
            Some(_) => {}
            None => break,
        }
    }

    if !accepts.has_quorum() {
        warn!(
            acceptances = accepts.acceptances(),
            quorum = quorum(ctx.members),
            "did not receive majority of acceptances"
        );
        return ProposalOutcome::LostQuorum;
    }

    info!("consensus reached on {chosen}");
    ProposalOutcome::Chosen(chosen)
}

/// When to stop waiting for replies: every message gets its per-message
/// timeout counted from its send, and a fan-out task sleeps up to
/// `max_delay` before sending, so the window covers both.
fn collection_deadline(profile: &dyn Profile) -> Instant {
    Instant::now() + profile.max_delay() + profile.individual_timeout()
}

/// Send `frame` to every live session, each behind its own profile delay and
/// drop roll. Sends race the collection deadline; a failed or dropped send
/// just means one fewer reply.
async fn fan_out(ctx: &NodeCtx, frame: Frame) {
    for session in ctx.sessions.live().await {
        let frame = frame.clone();
        let profile = ctx.profile.clone();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(profile.delay()) => {}
            }
            if profile.should_drop() {
                warn!(to = %session.remote(), "request dropped by profile");
                return;
            }
            if let Err(e) = session.send(frame).await {
                warn!(to = %session.remote(), error = %e, "failed to send request");
            }
        });
    }
}
