//! Per-connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Apply the absolute connection deadline
//! - Read exactly one message, hand it to the [`Handler`]
//! - Write the confirmation and close
//! - Track open connections for graceful shutdown
//!
//! ```text
//! Reading ──▶ Dispatching ──▶ Replying ──▶ Closed
//!    │                            ▲
//!    └──── decode failure ────────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::net::handler::Handler;
use crate::observability::metrics;
use crate::protocol::{decode, encode_confirmation, ConfirmationStatus, ProtocolError};

/// Default absolute deadline for one device connection.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Using relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Reading,
    Dispatching,
    Replying,
    Closed,
}

/// One accepted device connection.
pub struct Connection<R, W> {
    id: ConnectionId,
    peer: SocketAddr,
    reader: R,
    writer: W,
    deadline: Instant,
    state: ConnectionState,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a split stream. The deadline starts counting now.
    pub fn new(id: ConnectionId, peer: SocketAddr, reader: R, writer: W, deadline: Duration) -> Self {
        Self {
            id,
            peer,
            reader,
            writer,
            deadline: Instant::now() + deadline,
            state: ConnectionState::Reading,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Drive the connection to `Closed` and return the status sent to the device.
    ///
    /// The handler is awaited without a timeout; if it outlives the deadline
    /// the reply write fails and is only logged.
    pub async fn run<H: Handler>(mut self, handler: &H) -> ConfirmationStatus {
        tracing::info!(connection_id = %self.id, peer_addr = %self.peer, "New connection");

        let decoded = timeout_at(self.deadline, decode(&mut self.reader))
            .await
            .unwrap_or(Err(ProtocolError::DeadlineExceeded));

        let status = match decoded {
            Err(e) => {
                tracing::error!(connection_id = %self.id, error = %e, "Cannot get elements from connection");
                metrics::record_message("malformed");
                ConfirmationStatus::Rejected
            }
            Ok(message) => {
                tracing::info!(
                    connection_id = %self.id,
                    imei = %message.identifier(),
                    "Received data"
                );
                self.transition(ConnectionState::Dispatching);
                match handler.handle(&message).await {
                    Ok(()) => {
                        metrics::record_message("accepted");
                        ConfirmationStatus::Accepted
                    }
                    Err(e) => {
                        tracing::error!(connection_id = %self.id, error = %e, "Error handling message");
                        metrics::record_message("rejected");
                        ConfirmationStatus::Rejected
                    }
                }
            }
        };

        self.transition(ConnectionState::Replying);
        self.reply(status).await;
        self.transition(ConnectionState::Closed);
        status
    }

    async fn reply(&mut self, status: ConfirmationStatus) {
        tracing::info!(connection_id = %self.id, status = status.as_str(), "Write response");
        metrics::record_confirmation(status);

        let reply = encode_confirmation(status);
        let writer = &mut self.writer;
        let written = timeout_at(self.deadline, async move {
            writer.write_all(&reply).await?;
            writer.flush().await?;
            writer.shutdown().await
        })
        .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Cannot write confirmation");
            }
            Err(_) => {
                tracing::warn!(connection_id = %self.id, "Deadline exceeded writing confirmation");
            }
        }
    }
}

/// Tracks open connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The returned guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_connection_opened(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has closed, or the grace period ends.
    /// Returns `true` when all connections drained.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_connection_closed(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
