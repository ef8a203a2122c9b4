// File:    connection.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Per-connection state machine: registration, frame routing and guaranteed cleanup.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use otp_core::WireError;
use otp_core::wire::{self, DataFrame};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::Broker;
use crate::config::RelayConfig;
use crate::registry::{PeerHandle, RegisterError};

/// How long a closing connection may spend flushing its last replies.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Time allowed between accept and the registration frame.
    pub registration_timeout: Duration,
    /// Longest accepted frame.
    pub max_frame_len: usize,
    /// Writes buffered for the peer before it is treated as not reading.
    pub outbox_capacity: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for ConnectionLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            registration_timeout: config.registration_timeout(),
            max_frame_len: config.max_frame_len,
            outbox_capacity: config.outbox_capacity.max(1),
        }
    }
}

/// Transport-level reasons a connection ends.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// One decoded inbound frame.
enum Frame {
    Line(String),
    NotUtf8,
    Eof,
}

async fn next_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_frame_len: usize,
) -> Result<Frame, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match wire::try_decode_line(buf, max_frame_len) {
            Ok(Some(line)) => return Ok(Frame::Line(line)),
            Ok(None) => {}
            Err(WireError::InvalidUtf8) => return Ok(Frame::NotUtf8),
            Err(e) => return Err(e.into()),
        }
        if reader.read_buf(buf).await? == 0 {
            if !buf.is_empty() {
                debug!("discarding {} unterminated byte(s) at EOF", buf.len());
            }
            return Ok(Frame::Eof);
        }
    }
}

/// Writes queued lines until every outbox handle is dropped, then closes
/// the write side.
async fn write_lines<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(4096);
    while let Some(line) = rx.recv().await {
        out.clear();
        wire::encode_line(&line, &mut out);
        while let Ok(more) = rx.try_recv() {
            wire::encode_line(&more, &mut out);
        }
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Releases the identifier when the connection's worker exits, whichever
/// path it takes.
struct Registration {
    broker: Arc<Broker>,
    id: String,
    conn: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broker.unregister_connection(&self.id, self.conn);
    }
}

/// Routes one frame. Returns `false` if a reply could not be queued
/// because the peer is not reading.
fn handle_frame(broker: &Broker, sender: &str, line: &str, peer: &PeerHandle) -> bool {
    let Ok(data) = DataFrame::parse(line) else {
        debug!("'{sender}' sent a malformed frame");
        return peer.send(wire::REPLY_INVALID_FORMAT.to_owned()).is_ok();
    };
    let recipient = data.peer.trim();
    broker
        .route(sender, recipient, data.payload)
        .reply(recipient)
        .is_none_or(|reply| peer.send(reply).is_ok())
}

async fn finish(peer: PeerHandle, mut writer_task: JoinHandle<std::io::Result<()>>, writer_done: bool) {
    drop(peer);
    if writer_done {
        return;
    }
    if tokio::time::timeout(FLUSH_GRACE, &mut writer_task).await.is_err() {
        writer_task.abort();
    }
}

/// Serves one peer connection until it closes.
///
/// The first frame must be the peer's identifier. After a successful
/// registration every frame is routed as `recipient|payload`; malformed
/// frames are answered and the connection stays open. A peer that lets its
/// outbox fill up is disconnected. The identifier is released when this
/// function returns.
pub async fn handle_connection<S>(stream: S, peer_addr: String, broker: Arc<Broker>, limits: ConnectionLimits)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (outbox, rx) = mpsc::channel::<String>(limits.outbox_capacity.max(1));
    let mut writer_task = tokio::spawn(write_lines(writer, rx));
    let mut buf = BytesMut::with_capacity(4096);
    let conn = Uuid::new_v4();
    let peer = PeerHandle::new(conn, outbox);

    // --- Registration phase (with timeout) ---
    let first = tokio::time::timeout(
        limits.registration_timeout,
        next_frame(&mut reader, &mut buf, limits.max_frame_len),
    )
    .await;
    let raw = match first {
        Ok(Ok(Frame::Line(line))) => line,
        Ok(Ok(Frame::NotUtf8)) => String::new(),
        Ok(Ok(Frame::Eof)) => {
            debug!("{peer_addr} closed before registering");
            return finish(peer, writer_task, false).await;
        }
        Ok(Err(e)) => {
            warn!("{peer_addr} failed before registering: {e}");
            return finish(peer, writer_task, false).await;
        }
        Err(_) => {
            warn!("{peer_addr} registration timed out");
            return finish(peer, writer_task, false).await;
        }
    };

    let id = match broker.register(&raw, peer.clone()) {
        Ok(id) => id,
        Err(e) => {
            let reply = match e {
                RegisterError::Invalid => wire::REPLY_INVALID_ID,
                RegisterError::AlreadyTaken => wire::REPLY_ID_TAKEN,
                RegisterError::Transport => {
                    warn!("{peer_addr} went away while registering");
                    return finish(peer, writer_task, false).await;
                }
            };
            info!("{peer_addr} refused: {e}");
            let _ = peer.send(reply.to_owned());
            return finish(peer, writer_task, false).await;
        }
    };
    info!("{peer_addr} is '{id}'");
    let registration = Registration {
        broker: Arc::clone(&broker),
        id,
        conn,
    };

    // --- Message loop ---
    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = next_frame(&mut reader, &mut buf, limits.max_frame_len) => match frame {
                Ok(Frame::Eof) => {
                    info!("'{}' disconnected", registration.id);
                    break;
                }
                Ok(Frame::Line(line)) => {
                    if !handle_frame(&broker, &registration.id, &line, &peer) {
                        warn!("'{}' is not reading its replies, closing", registration.id);
                        break;
                    }
                }
                Ok(Frame::NotUtf8) => {
                    debug!("'{}' sent a frame that is not UTF-8", registration.id);
                    if peer.send(wire::REPLY_INVALID_FORMAT.to_owned()).is_err() {
                        warn!("'{}' is not reading its replies, closing", registration.id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("'{}' dropped: {e}", registration.id);
                    break;
                }
            },
            result = &mut writer_task => {
                writer_done = true;
                match result {
                    Ok(Err(e)) => warn!("'{}' write failed: {e}", registration.id),
                    Ok(Ok(())) => debug!("'{}' writer finished", registration.id),
                    Err(e) => warn!("'{}' writer task failed: {e}", registration.id),
                }
                break;
            }
            () = peer.disconnected() => {
                warn!("'{}' disconnected for not reading", registration.id);
                break;
            }
        }
    }

    drop(registration);
    finish(peer, writer_task, writer_done).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RouteOutcome;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            registration_timeout: Duration::from_millis(200),
            max_frame_len: 64,
            outbox_capacity: 2,
        }
    }

    #[tokio::test]
    async fn registers_routes_and_releases() {
        let broker = Arc::new(Broker::default());
        let (client, server) = tokio::io::duplex(1024);
        let worker = tokio::spawn(handle_connection(
            server,
            "test".into(),
            Arc::clone(&broker),
            limits(),
        ));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"alice\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Connected successfully.");
        assert!(broker.is_registered("alice"));

        write.write_all(b"no delimiter\nalice|note to self\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Invalid message format.");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "alice|note to self");

        write.shutdown().await.unwrap();
        worker.await.unwrap();
        assert!(!broker.is_registered("alice"));
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let broker = Arc::new(Broker::default());
        let (client, server) = tokio::io::duplex(64);
        tokio::time::timeout(
            Duration::from_secs(5),
            handle_connection(server, "idle".into(), Arc::clone(&broker), limits()),
        )
        .await
        .unwrap();
        assert_eq!(broker.peer_count(), 0);
        drop(client);
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let broker = Arc::new(Broker::default());
        let (client, server) = tokio::io::duplex(1024);
        let worker = tokio::spawn(handle_connection(
            server,
            "big".into(),
            Arc::clone(&broker),
            limits(),
        ));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"bob\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Connected successfully.");
        write.write_all(&[b'x'; 100]).await.unwrap();

        worker.await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
        assert!(!broker.is_registered("bob"));
    }

    #[tokio::test]
    async fn invalid_utf8_identifier_is_refused() {
        let broker = Arc::new(Broker::default());
        let (client, server) = tokio::io::duplex(1024);
        let worker = tokio::spawn(handle_connection(
            server,
            "bin".into(),
            Arc::clone(&broker),
            limits(),
        ));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"\xff\xfe\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "Invalid userID. Connection closed."
        );
        worker.await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_that_never_reads_is_disconnected() {
        let broker = Arc::new(Broker::default());
        let (client, server) = tokio::io::duplex(64);
        let worker = tokio::spawn(handle_connection(
            server,
            "slow".into(),
            Arc::clone(&broker),
            limits(),
        ));

        let (_read, mut write) = tokio::io::split(client);
        write.write_all(b"bob\n").await.unwrap();
        for _ in 0..100 {
            if broker.is_registered("bob") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(broker.is_registered("bob"));

        let payload = "x".repeat(32);
        let delivered = (0..100)
            .take_while(|_| broker.route("alice", "bob", &payload) == RouteOutcome::Delivered)
            .count();
        assert!(delivered < 100, "an unread outbox must stop accepting mail");
        assert_eq!(broker.pending_len("bob"), 1);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(!broker.is_registered("bob"));
    }
}
