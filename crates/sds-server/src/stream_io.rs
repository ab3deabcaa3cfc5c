//! Framed transports for the two phases of a connection.
//!
//! A connection starts with a [`HandshakeTransport`] (one `Handshake` in,
//! one `HandshakeResponse` out) and, once the method is agreed, switches
//! codecs in place to a [`StreamTransport`] without losing buffered bytes.

use futures::{Sink, SinkExt};
use sds_proto::codec::WireCodec;
use sds_proto::wire::{
    DiscoveryRequest, Handshake, HandshakeResponse, RpcStatus, StreamFrame,
};
use sds_proto::ProtoError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::debug;

pub type HandshakeTransport<T> = Framed<T, WireCodec<Handshake, HandshakeResponse>>;

pub type StreamTransport<T> = Framed<T, WireCodec<DiscoveryRequest, StreamFrame>>;

pub fn handshake_transport<T>(io: T) -> HandshakeTransport<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, WireCodec::new())
}

pub fn into_stream_transport<T>(transport: HandshakeTransport<T>) -> StreamTransport<T>
where
    T: AsyncRead + AsyncWrite,
{
    transport.map_codec(|_| WireCodec::new())
}

/// Send a terminal status and close the write side.
///
/// The connection is ending either way, so failures are only logged.
pub async fn finish_with_status<K>(sink: &mut K, status: RpcStatus)
where
    K: Sink<StreamFrame, Error = ProtoError> + Unpin,
{
    let code = status.code;
    if let Err(e) = sink.send(StreamFrame::from(status)).await {
        debug!(code, error = %e, "could not deliver terminal status");
        return;
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "close after terminal status failed");
    }
}
