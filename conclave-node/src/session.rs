//! Framed TCP sessions between council members.
//!
//! A session splits one TCP stream into a write half shared by every sender
//! (proposer fan-out tasks and acceptor replies) and a read half owned
//! exclusively by the session's dispatch task. The async mutex around the
//! write half makes each `send` atomic with respect to concurrent senders;
//! frames from one sender reach the remote reader in send order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use conclave_core::{Frame, FrameCodec, PeerId, ProtocolViolation, TransportError};
use error_stack::{Report, ResultExt};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

/// Read half of a session, owned by its dispatch task.
pub type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Shareable write half of one member↔member link.
#[derive(Clone)]
pub struct Session {
    id: u64,
    remote: PeerId,
    writer: Arc<Mutex<FrameWriter>>,
}

impl Session {
    fn new(remote: PeerId, writer: FrameWriter) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Process-unique id, used to tell a session apart from its replacement
    /// under the same remote.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn remote(&self) -> PeerId {
        self.remote
    }

    /// Serialize and transmit one whole frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the frame cannot be written; the
    /// session is dead from then on.
    pub async fn send(&self, frame: Frame) -> Result<(), Report<TransportError>> {
        self.writer
            .lock()
            .await
            .send(frame)
            .await
            .change_context(TransportError)
    }

    /// Shut the write half down. Idempotent; the remote reader observes EOF.
    pub async fn close(&self) {
        let _ = self.writer.lock().await.close().await;
    }
}

/// Dial `addr` and perform the handshake.
///
/// # Errors
///
/// Returns [`TransportError`] on connect failure, a 5 s connect timeout, or
/// a failed handshake.
pub async fn connect(
    addr: SocketAddr,
    local: PeerId,
) -> Result<(Session, FrameReader), Report<TransportError>> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_elapsed| Report::new(TransportError).attach("connect timed out"))?
        .change_context(TransportError)
        .attach_with(|| format!("connecting to {addr}"))?;

    debug!(%addr, "connected");
    handshake(stream, local).await
}

/// Perform the handshake on an accepted connection.
///
/// # Errors
///
/// Returns [`TransportError`] if the exchange fails or the first inbound
/// frame is not a handshake.
pub async fn accept(
    stream: TcpStream,
    local: PeerId,
) -> Result<(Session, FrameReader), Report<TransportError>> {
    handshake(stream, local).await
}

/// Both sides announce themselves and expect the same; the remote id from
/// the received handshake keys the session.
async fn handshake(
    stream: TcpStream,
    local: PeerId,
) -> Result<(Session, FrameReader), Report<TransportError>> {
    let (read, write) = stream.into_split();
    let mut writer = FramedWrite::new(write, FrameCodec::new());
    let mut reader = FramedRead::new(read, FrameCodec::new());

    writer
        .send(Frame::Handshake { sender: local })
        .await
        .change_context(TransportError)?;

    let first = reader
        .next()
        .await
        .ok_or_else(|| Report::new(TransportError).attach("connection closed before handshake"))?
        .change_context(TransportError)?;

    let Frame::Handshake { sender: remote } = first else {
        return Err(Report::new(ProtocolViolation).change_context(TransportError));
    };

    Ok((Session::new(remote, writer), reader))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn peer(id: u8) -> PeerId {
        PeerId::new(id).unwrap()
    }

    #[tokio::test]
    async fn handshake_exchanges_ids() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream, peer(2)).await.unwrap()
        });

        let (session, _reader) = connect(addr, peer(1)).await.unwrap();
        let (server_session, _server_reader) = server.await.unwrap();

        assert_eq!(session.remote(), peer(2));
        assert_eq!(server_session.remote(), peer(1));
        assert_ne!(session.id(), server_session.id());
    }

    #[tokio::test]
    async fn non_handshake_first_frame_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream, peer(2)).await
        });

        // Speak the framing but lead with the wrong frame.
        let stream = TcpStream::connect(addr).await.unwrap();
        let (_read, write) = stream.into_split();
        let mut writer = FramedWrite::new(write, FrameCodec::new());
        writer
            .send(Frame::Prepare {
                number: conclave_core::ProposalNumber::new(1, peer(1)),
                sender: peer(1),
            })
            .await
            .unwrap();

        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn send_after_remote_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream, peer(2)).await.unwrap()
        });

        let (session, mut reader) = connect(addr, peer(1)).await.unwrap();
        let (server_session, server_reader) = server.await.unwrap();

        server_session.close().await;
        // Reader unblocks with EOF once the remote write half closes.
        assert!(reader.next().await.is_none());

        // Repeated close is fine.
        server_session.close().await;

        // The write half eventually errors once the peer is fully gone.
        drop(server_session);
        drop(server_reader);
        drop(reader);
        let mut failed = false;
        for _ in 0..20 {
            if session
                .send(Frame::Handshake { sender: peer(1) })
                .await
                .is_err()
            {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed);
    }
}
