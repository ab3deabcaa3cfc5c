//! TCP server endpoint for secret discovery clients.
//!
//! `SdsEndpoint` owns the listening socket and runs one task per accepted
//! connection. Shutdown stops accepting, cancels every live session, and
//! gives them a short grace period to close.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::connection::SdsConnection;
use crate::error::{Result, ServerError};
use crate::service::SecretDiscoveryService;

/// How long shutdown waits for open connections before aborting them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A listening endpoint that accepts secret discovery connections.
pub struct SdsEndpoint {
    listener: TcpListener,
}

impl SdsEndpoint {
    /// Bind a TCP listener to the given address.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;

        info!(%addr, "sds endpoint bound");

        Ok(Self { listener })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<SdsConnection<TcpStream>> {
        let (stream, peer) = self.listener.accept().await.map_err(ServerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not disable Nagle");
        }
        debug!(%peer, "accepted connection");
        Ok(SdsConnection::new(stream, peer))
    }

    /// Returns the local address this endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    pub async fn serve(self, service: SecretDiscoveryService, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
                accepted = self.accept() => {
                    let conn = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed");
                            if !accept_backoff(&shutdown).await {
                                break;
                            }
                            continue;
                        }
                    };
                    let peer = conn.peer_addr();
                    let service = service.clone();
                    let cancel = shutdown.child_token();
                    connections.spawn(
                        async move {
                            match conn.serve(&service, cancel).await {
                                Ok(()) => info!("connection closed"),
                                Err(e) => warn!(error = %e, "connection closed with error"),
                            }
                        }
                        .instrument(info_span!("connection", %peer)),
                    );
                }
            }
        }

        info!(open = connections.len(), "sds endpoint shutting down");
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(open = connections.len(), "aborting connections after grace period");
            connections.abort_all();
        }
    }
}

/// Wait out [`ACCEPT_BACKOFF`]. Returns `false` if shutdown began meanwhile.
///
/// Errors like running out of file descriptors persist until some
/// connection closes.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}
