//! The council member node: listener, outbound dialing, per-session
//! dispatch, acceptor handling, and shutdown.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use conclave_core::{Frame, PeerId, Profile, ProposalNumber, TransportError, Value};
use conclave_paxos::{AcceptOutcome, PrepareOutcome, ProposalSequence, SharedAcceptorState};
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::proposer::{self, ProposalOutcome};
use crate::registry::{ReplyRouter, SessionRegistry};
use crate::session::{self, FrameReader, Session};

/// Static configuration for one member.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: PeerId,
    /// Addressbook of the whole council, including this member.
    pub peers: BTreeMap<PeerId, SocketAddr>,
}

/// Handles shared by every task a node spawns.
///
/// Sessions and handlers capture this instead of the node itself, so nothing
/// long-lived holds a reference cycle back to [`PeerNode`].
#[derive(Clone)]
pub(crate) struct NodeCtx {
    pub(crate) id: PeerId,
    /// Configured council size, including this member.
    pub(crate) members: usize,
    pub(crate) state: SharedAcceptorState,
    pub(crate) profile: Arc<dyn Profile>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) router: ReplyRouter,
    pub(crate) cancel: CancellationToken,
}

/// One running council member.
pub struct PeerNode {
    ctx: NodeCtx,
    local_addr: SocketAddr,
    sequence: ProposalSequence,
    /// One proposal may be outstanding at a time; the reply router is keyed
    /// to it.
    propose_lock: Mutex<()>,
}

impl PeerNode {
    /// Start a member on an already-bound listener: spawns the accept loop
    /// and dials every other configured peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the listener's local address cannot be
    /// read.
    pub fn start(
        listener: TcpListener,
        config: NodeConfig,
        profile: Arc<dyn Profile>,
    ) -> Result<Arc<Self>, Report<TransportError>> {
        let local_addr = listener
            .local_addr()
            .change_context(TransportError)
            .attach("reading listener address")?;

        let ctx = NodeCtx {
            id: config.id,
            members: config.peers.len(),
            state: SharedAcceptorState::new(),
            profile,
            sessions: SessionRegistry::new(),
            router: ReplyRouter::new(),
            cancel: CancellationToken::new(),
        };

        tokio::spawn(run_listener(ctx.clone(), listener));
        for (peer, addr) in config.peers {
            if peer != ctx.id {
                tokio::spawn(dial(ctx.clone(), peer, addr));
            }
        }

        Ok(Arc::new(Self {
            ctx,
            local_addr,
            sequence: ProposalSequence::new(),
            propose_lock: Mutex::new(()),
        }))
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.ctx.id
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This member's acceptor state.
    #[must_use]
    pub fn acceptor(&self) -> &SharedAcceptorState {
        &self.ctx.state
    }

    /// Remote members with a registered live session.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.ctx.sessions.connected_peers().await
    }

    /// Drive one proposal for `value` through both phases.
    ///
    /// Returns [`ProposalOutcome::LostQuorum`] without retrying; a fresh call
    /// picks a strictly higher proposal number.
    pub async fn propose(&self, value: Value) -> ProposalOutcome {
        let _guard = self.propose_lock.lock().await;
        proposer::run(&self.ctx, &self.sequence, value).await
    }

    /// Stop accepting, tear down every session, and abort any outstanding
    /// proposal. Idempotent.
    pub async fn shutdown(&self) {
        if self.ctx.cancel.is_cancelled() {
            return;
        }
        info!(member = %self.ctx.id, "shutting down");
        self.ctx.cancel.cancel();
        self.ctx.sessions.close_all().await;
    }
}

#[instrument(skip_all, name = "listener", fields(member = %ctx.id))]
async fn run_listener(ctx: NodeCtx, listener: TcpListener) {
    loop {
        let incoming = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            incoming = listener.accept() => incoming,
        };
        match incoming {
            Ok((stream, addr)) => {
                debug!(%addr, "incoming connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match session::accept(stream, ctx.id).await {
                        Ok((session, reader)) => register(ctx, session, reader).await,
                        Err(e) => warn!(%addr, error = %e, "handshake failed"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    debug!("listener stopped");
}

async fn dial(ctx: NodeCtx, peer: PeerId, addr: SocketAddr) {
    match session::connect(addr, ctx.id).await {
        Ok((session, reader)) => register(ctx, session, reader).await,
        Err(e) => warn!(member = %ctx.id, %peer, %addr, error = %e, "failed to connect to member"),
    }
}

/// Register a freshly handshaken session and run its dispatch loop.
async fn register(ctx: NodeCtx, session: Session, reader: FrameReader) {
    info!(member = %ctx.id, remote = %session.remote(), "session established");
    ctx.sessions.insert(session.clone()).await;
    run_session(ctx, session, reader).await;
}

/// Sole reader of the session: requests go to the acceptor, replies to the
/// router. Ends on EOF, receive failure, shutdown, or a protocol violation.
#[instrument(skip_all, name = "session", fields(member = %ctx.id, remote = %session.remote()))]
async fn run_session(ctx: NodeCtx, session: Session, mut reader: FrameReader) {
    loop {
        let frame = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            frame = reader.next() => frame,
        };
        match frame {
            None => {
                debug!("connection closed by remote");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "receive failed");
                break;
            }
            Some(Ok(frame)) => {
                if !dispatch(&ctx, &session, frame) {
                    break;
                }
            }
        }
    }
    ctx.sessions.remove(session.remote(), session.id()).await;
    session.close().await;
}

/// Returns `false` when the session must close.
fn dispatch(ctx: &NodeCtx, session: &Session, frame: Frame) -> bool {
    match frame {
        Frame::Prepare { number, sender } => {
            tokio::spawn(handle_prepare(ctx.clone(), session.clone(), number, sender));
            true
        }
        Frame::Accept {
            number,
            value,
            sender,
        } => {
            tokio::spawn(handle_accept(
                ctx.clone(),
                session.clone(),
                number,
                value,
                sender,
            ));
            true
        }
        Frame::Handshake { sender } => {
            warn!(%sender, "unexpected handshake on established session");
            false
        }
        reply => {
            ctx.router.route(reply.sender(), reply);
            true
        }
    }
}

/// Phase 1b. The profile delay runs before the transition and the drop
/// decision after it: a dropped response never rolls back committed state.
async fn handle_prepare(ctx: NodeCtx, session: Session, number: ProposalNumber, sender: PeerId) {
    trace!(%number, %sender, "prepare received");
    tokio::select! {
        () = ctx.cancel.cancelled() => return,
        () = tokio::time::sleep(ctx.profile.delay()) => {}
    }

    let reply = match ctx.state.prepare(number) {
        PrepareOutcome::Promised { accepted } => {
            debug!(%number, "promised");
            Frame::Promise {
                number,
                sender: ctx.id,
                accepted,
            }
        }
        PrepareOutcome::Rejected { promised } => {
            debug!(%number, %promised, "prepare rejected");
            Frame::Reject {
                promised,
                sender: ctx.id,
            }
        }
    };

    if ctx.profile.should_drop() {
        warn!(%number, to = %sender, "response dropped by profile");
        return;
    }
    if let Err(e) = session.send(reply).await {
        warn!(to = %sender, error = %e, "failed to send response");
    }
}

/// Phase 2b, same delay/commit/drop discipline as [`handle_prepare`].
async fn handle_accept(
    ctx: NodeCtx,
    session: Session,
    number: ProposalNumber,
    value: Value,
    sender: PeerId,
) {
    trace!(%number, %sender, "accept received");
    tokio::select! {
        () = ctx.cancel.cancelled() => return,
        () = tokio::time::sleep(ctx.profile.delay()) => {}
    }

    let reply = match ctx.state.accept(number, value.clone()) {
        AcceptOutcome::Accepted => {
            debug!(%number, %value, "accepted");
            Frame::Accepted {
                number,
                value,
                sender: ctx.id,
            }
        }
        AcceptOutcome::Rejected { promised } => {
            debug!(%number, %promised, "accept rejected");
            Frame::Reject {
                promised,
                sender: ctx.id,
            }
        }
    };

    if ctx.profile.should_drop() {
        warn!(%number, to = %sender, "response dropped by profile");
        return;
    }
    if let Err(e) = session.send(reply).await {
        warn!(to = %sender, error = %e, "failed to send response");
    }
}
