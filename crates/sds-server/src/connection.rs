//! One accepted connection, from handshake to close.
//!
//! 1. Read the client's `Handshake`, check the protocol version and method.
//! 2. Reply with `HandshakeResponse`; a non-OK status ends the connection.
//! 3. Switch to discovery framing and run the requested method. A method
//!    that fails ends with one terminal status frame.

use std::net::SocketAddr;

use futures::{future, SinkExt, StreamExt};
use sds_proto::version;
use sds_proto::wire::{DiscoveryResponse, Handshake, HandshakeResponse, Method, RpcStatus, StreamFrame};
use sds_proto::ProtoError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, ServerError};
use crate::service::SecretDiscoveryService;
use crate::stream_io::{
    finish_with_status, handshake_transport, into_stream_transport, HandshakeTransport,
    StreamTransport,
};

/// An accepted connection that has not completed its handshake yet.
pub struct SdsConnection<T = TcpStream> {
    transport: HandshakeTransport<T>,
    peer: SocketAddr,
}

impl<T> SdsConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(io: T, peer: SocketAddr) -> Self {
        Self {
            transport: handshake_transport(io),
            peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Handshake and serve the requested method until the connection ends.
    ///
    /// Cancelling `cancel` before the handshake completes drops the
    /// connection; afterwards it closes a secrets stream cleanly.
    pub async fn serve(self, service: &SecretDiscoveryService, cancel: CancellationToken) -> Result<()> {
        let Self {
            mut transport,
            peer,
        } = self;

        let method = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            negotiated = negotiate(&mut transport) => match negotiated? {
                Some(method) => method,
                None => return Ok(()),
            },
        };
        info!(%peer, ?method, "handshake complete");

        let transport = into_stream_transport(transport);
        match method {
            Method::StreamSecrets => serve_stream(transport, service, cancel).await,
            Method::FetchSecrets => serve_fetch(transport, service).await,
            Method::DeltaSecrets => serve_delta(transport, service).await,
        }
    }
}

/// Run the server side of the handshake.
///
/// Returns `Ok(None)` if the peer left before sending a `Handshake`.
async fn negotiate<T>(transport: &mut HandshakeTransport<T>) -> Result<Option<Method>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = match transport.next().await {
        Some(Ok(handshake)) => handshake,
        Some(Err(e)) => return Err(ServerError::Handshake(format!("read: {e}"))),
        None => {
            debug!("peer closed before handshake");
            return Ok(None);
        }
    };

    let outcome = check_handshake(&handshake);
    let status = match &outcome {
        Ok(_) => RpcStatus::ok(),
        Err(err) => err.to_status(),
    };

    transport
        .send(HandshakeResponse {
            protocol_version: version::PROTOCOL_VERSION.to_string(),
            status: Some(status),
        })
        .await
        .map_err(ServerError::Send)?;

    outcome.map(Some)
}

fn check_handshake(handshake: &Handshake) -> Result<Method> {
    if !version::is_compatible(&handshake.protocol_version) {
        return Err(ServerError::Handshake(format!(
            "incompatible protocol version: {} (ours: {})",
            handshake.protocol_version,
            version::PROTOCOL_VERSION
        )));
    }

    Method::try_from(handshake.method).map_err(|_| ServerError::Unimplemented("requested method"))
}

async fn serve_stream<T>(
    transport: StreamTransport<T>,
    service: &SecretDiscoveryService,
    cancel: CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sink, inbound) = transport.split::<StreamFrame>();
    let mut responses = sink.with(|response: DiscoveryResponse| {
        future::ready(Ok::<_, ProtoError>(StreamFrame::from(response)))
    });

    let result = service.stream_secrets(inbound, &mut responses, cancel).await;

    if let Err(err) = &result {
        finish_with_status(&mut responses.into_inner(), err.to_status()).await;
    }
    result
}

async fn serve_fetch<T>(mut transport: StreamTransport<T>, service: &SecretDiscoveryService) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let request = match transport.next().await {
        Some(Ok(request)) => request,
        Some(Err(e)) => return Err(ServerError::Stream(e)),
        None => return Ok(()),
    };

    match service.fetch_secrets(&request) {
        Ok(response) => transport
            .send(StreamFrame::from(response))
            .await
            .map_err(ServerError::Send),
        Err(err) => {
            finish_with_status(&mut transport, err.to_status()).await;
            Err(err)
        }
    }
}

async fn serve_delta<T>(mut transport: StreamTransport<T>, service: &SecretDiscoveryService) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = service.delta_secrets() {
        finish_with_status(&mut transport, err.to_status()).await;
        return Err(err);
    }
    Ok(())
}
