//! Request Listener: drains one connection's inbound requests.
//!
//! The listener runs as its own task for the lifetime of a session and hands
//! each decoded request to the session through a channel of capacity one, so
//! it can read at most one request ahead of the session. When reading stops
//! it sends exactly one [`ListenerEvent::Closed`] and exits.

use std::io::ErrorKind;

use futures::{Stream, StreamExt};
use sds_proto::wire::DiscoveryRequest;
use sds_proto::ProtoError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ServerError;

/// Requests the listener may buffer ahead of the session.
pub const HANDOFF_CAPACITY: usize = 1;

/// What the listener hands to the session.
#[derive(Debug)]
pub enum ListenerEvent {
    Request(DiscoveryRequest),
    /// Reading has stopped. `None` for cancellation or a clean end of
    /// stream, `Some` for a read failure the session must report.
    Closed(Option<ServerError>),
}

/// Start a listener over `inbound`. Cancelling `cancel` stops it with a
/// benign close.
pub fn spawn<S>(inbound: S, cancel: CancellationToken) -> (mpsc::Receiver<ListenerEvent>, JoinHandle<()>)
where
    S: Stream<Item = Result<DiscoveryRequest, ProtoError>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let handle = tokio::spawn(run(inbound, tx, cancel));
    (rx, handle)
}

async fn run<S>(mut inbound: S, tx: mpsc::Sender<ListenerEvent>, cancel: CancellationToken)
where
    S: Stream<Item = Result<DiscoveryRequest, ProtoError>> + Unpin,
{
    let closed = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(request)) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    sent = tx.send(ListenerEvent::Request(request)) => {
                        if sent.is_err() {
                            // Session is gone; nobody to tell.
                            return;
                        }
                    }
                }
            }
            Some(Err(err)) => break Some(classify(err)),
            None => {
                debug!("inbound stream ended");
                break None;
            }
        }
    };

    let _ = tx.send(ListenerEvent::Closed(closed)).await;
}

/// Turn a read failure into the fatal error the session reports.
///
/// Peers end a stream by closing their write side, so a reset or abort
/// means the transport broke underneath the session.
pub fn classify(err: ProtoError) -> ServerError {
    if let Some(kind @ (ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe)) =
        err.io_kind()
    {
        warn!(?kind, "connection dropped by peer without closing the stream");
    }
    ServerError::Stream(err)
}
