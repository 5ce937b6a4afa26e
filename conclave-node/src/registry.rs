//! Session registry and reply routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conclave_core::{Frame, PeerId, ProposalNumber};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use crate::session::Session;

/// Live sessions keyed by remote member.
///
/// Insert on handshake, remove on session teardown. A later handshake for
/// the same remote replaces the entry; the superseded connection stays alive
/// until its own dispatch loop ends, so in-flight replies on it still land.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<PeerId, Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) {
        let replaced = self
            .inner
            .write()
            .await
            .insert(session.remote(), session.clone());
        if let Some(old) = replaced {
            debug!(remote = %session.remote(), old_id = old.id(), "session replaced");
        }
    }

    /// Remove `remote`'s entry, but only if it is still the same session.
    /// A replaced session tearing down must not evict its replacement.
    pub async fn remove(&self, remote: PeerId, session_id: u64) {
        let mut inner = self.inner.write().await;
        if inner.get(&remote).is_some_and(|s| s.id() == session_id) {
            inner.remove(&remote);
            debug!(%remote, "session removed");
        }
    }

    /// Snapshot of the live sessions, safe to fan out over while sessions
    /// come and go.
    pub async fn live(&self) -> Vec<Session> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.read().await.keys().copied().collect()
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Session> = self.inner.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

/// Reply frame forwarded to the proposal driver, tagged with the responder.
pub type Reply = (PeerId, Frame);

struct ActiveProposal {
    number: ProposalNumber,
    tx: mpsc::UnboundedSender<Reply>,
}

/// Routes inbound `Promise`/`Accepted`/`Reject` frames to the outstanding
/// proposal.
///
/// The dispatch loop is the sole reader of every session; request frames go
/// to the acceptor and reply frames come here, so an unrelated inbound
/// request can never be swallowed by a proposal waiting for its quorum.
/// Replies that arrive when nothing is outstanding are dropped.
#[derive(Clone, Default)]
pub struct ReplyRouter {
    active: Arc<Mutex<Option<ActiveProposal>>>,
}

impl ReplyRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the reply queue for `number`. Any previously outstanding queue
    /// is disconnected.
    pub fn begin(&self, number: ProposalNumber) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.active.lock().unwrap() = Some(ActiveProposal { number, tx });
        rx
    }

    /// Close the reply queue once the proposal settles.
    pub fn finish(&self) {
        *self.active.lock().unwrap() = None;
    }

    pub fn route(&self, from: PeerId, frame: Frame) {
        let guard = self.active.lock().unwrap();
        match guard.as_ref() {
            Some(active) => {
                trace!(%from, number = %active.number, "routing reply");
                let _ = active.tx.send((from, frame));
            }
            None => trace!(%from, "dropping stray reply, no outstanding proposal"),
        }
    }
}
