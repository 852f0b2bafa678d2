//! TCP listener for DirectIP connections.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Optionally strip a PROXY protocol header per connection
//! - Spawn one independent task per accepted connection
//! - Treat accept failures as fatal
//!
//! # Design Decisions
//! - No connection limit beyond the OS; every connection is bounded by its deadline
//! - A broken listening socket is not recovered; the process supervisor restarts us

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::handler::Handler;
use crate::net::proxy_protocol::strip_proxy_header;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {address:?}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },
    #[error("cannot open listening address: {0}")]
    Bind(std::io::Error),
    #[error("cannot accept: {0}")]
    Accept(std::io::Error),
}

/// Accepts device connections and hands each to a [`Connection`].
pub struct Listener {
    inner: TcpListener,
    proxy_protocol: bool,
    proxy_header_timeout: Duration,
    deadline: Duration,
    tracker: ConnectionTracker,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| ListenerError::Address {
                address: config.bind_address.clone(),
                source,
            })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            proxy_protocol = config.proxy_protocol,
            deadline_secs = config.connection_deadline_secs,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            proxy_protocol: config.proxy_protocol,
            proxy_header_timeout: Duration::from_secs(config.proxy_header_timeout_secs),
            deadline: Duration::from_secs(config.connection_deadline_secs),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Override the per-connection deadline (mainly for tests).
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Tracker shared with every spawned connection.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// Returns `Err` on the first accept failure; callers treat that as fatal.
    pub async fn run<H: Handler>(
        self,
        handler: Arc<H>,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), ListenerError> {
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.inner.accept() => accepted.map_err(|e| {
                    tracing::error!(error = %e, "Cannot accept");
                    ListenerError::Accept(e)
                })?,
                _ = shutdown.wait() => {
                    tracing::info!("Listener stopped accepting");
                    return Ok(());
                }
            };

            tracing::debug!(peer_addr = %peer, "Connection accepted");
            let guard = self.tracker.track();
            let handler = Arc::clone(&handler);
            let proxy_protocol = self.proxy_protocol;
            let proxy_header_timeout = self.proxy_header_timeout;
            let deadline = self.deadline;

            tokio::spawn(async move {
                let id = guard.id();
                if proxy_protocol {
                    serve_proxied(stream, peer, proxy_header_timeout, deadline, id, &*handler).await;
                } else {
                    let (reader, writer) = stream.into_split();
                    Connection::new(id, peer, reader, writer, deadline)
                        .run(&*handler)
                        .await;
                }
                drop(guard);
            });
        }
    }
}

async fn serve_proxied<H: Handler>(
    stream: TcpStream,
    peer: SocketAddr,
    header_timeout: Duration,
    deadline: Duration,
    id: crate::net::connection::ConnectionId,
    handler: &H,
) {
    let (reader, writer) = stream.into_split();
    match strip_proxy_header(reader, header_timeout).await {
        Ok((header, reader)) => {
            let source = header.and_then(|h| h.source).unwrap_or(peer);
            if source != peer {
                tracing::debug!(connection_id = %id, peer_addr = %peer, source_addr = %source, "PROXY header stripped");
            }
            Connection::new(id, source, reader, writer, deadline)
                .run(handler)
                .await;
        }
        Err(e) => {
            tracing::warn!(connection_id = %id, peer_addr = %peer, error = %e, "Cannot read PROXY header");
        }
    }
}
