//! Stream Session Manager: the per-connection secrets stream.
//!
//! A session alternates between waiting for the next request and answering
//! it. Acknowledgment bookkeeping lives in [`SessionState`], which is
//! threaded by value through each transition:
//!
//! ```text
//! AwaitingFirstRequest --serve--> AwaitingAck{nonce} --serve--> AwaitingAck{nonce'}
//!          |                              |
//!          +------------ close -----------+--> Closed
//! ```
//!
//! While a nonce is outstanding, only a request echoing that nonce is served;
//! anything else is a stale or duplicate acknowledgment and is dropped.
//! Every served request must name exactly the `ROOTCA` resource, and every
//! failure (validation, encoding, sending) ends the session.

use futures::{Sink, SinkExt, Stream};
use sds_proto::secret::build_secret;
use sds_proto::wire::{DiscoveryRequest, DiscoveryResponse, Node, ROOT_CA_RESOURCE_NAME};
use sds_proto::{ProtoError, TrustBundle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::listener::{self, ListenerEvent};

/// Where a session is in the acknowledgment cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing sent yet; the next request is served unconditionally.
    AwaitingFirstRequest,
    /// A response carrying `nonce` was sent and awaits acknowledgment.
    AwaitingAck { nonce: String },
    Closed,
}

/// Outcome of presenting a request to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Serve this request. A missing node has been filled in from the last
    /// one seen on this stream.
    Fresh(DiscoveryRequest),
    /// The request acknowledges a nonce other than the outstanding one.
    Stale { received: String, expected: String },
    /// The session has already closed.
    Closed,
}

/// Acknowledgment state of one stream. Never shared between connections.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    phase: SessionPhase,
    version_counter: u64,
    version_info: String,
    nonce_counter: u64,
    last_node: Option<Node>,
    last_request: Option<DiscoveryRequest>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let version_counter = 0;
        Self {
            phase: SessionPhase::AwaitingFirstRequest,
            version_counter,
            version_info: version_counter.to_string(),
            nonce_counter: 0,
            last_node: None,
            last_request: None,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Nonce of the last response sent, empty if none was sent.
    pub fn last_nonce(&self) -> &str {
        match &self.phase {
            SessionPhase::AwaitingAck { nonce } => nonce,
            SessionPhase::AwaitingFirstRequest | SessionPhase::Closed => "",
        }
    }

    pub fn version_counter(&self) -> u64 {
        self.version_counter
    }

    pub fn version_info(&self) -> &str {
        &self.version_info
    }

    pub fn last_node(&self) -> Option<&Node> {
        self.last_node.as_ref()
    }

    pub fn last_request(&self) -> Option<&DiscoveryRequest> {
        self.last_request.as_ref()
    }

    /// Decide whether `request` should be served.
    pub fn admit(&self, mut request: DiscoveryRequest) -> Admission {
        match &self.phase {
            SessionPhase::AwaitingFirstRequest => Admission::Fresh(request),
            SessionPhase::AwaitingAck { nonce } => {
                if request.response_nonce != *nonce {
                    return Admission::Stale {
                        received: request.response_nonce,
                        expected: nonce.clone(),
                    };
                }

                // Only one version exists, so a mismatch means the workload
                // failed to apply it. Serve it again anyway.
                if request.version_info != self.version_info {
                    warn!(
                        received = %request.version_info,
                        current = %self.version_info,
                        nonce = %nonce,
                        "acknowledgment for unexpected version"
                    );
                }

                if request.node.as_ref().map_or(true, Node::is_empty) {
                    request.node = self.last_node.clone();
                }
                Admission::Fresh(request)
            }
            SessionPhase::Closed => Admission::Closed,
        }
    }

    /// Build the response to an admitted, validated request.
    pub fn build_response(
        &self,
        request: &DiscoveryRequest,
        name: &str,
        bundle: &TrustBundle,
    ) -> Result<DiscoveryResponse> {
        let secret = build_secret(name, bundle).map_err(|source| ServerError::Serialization {
            name: name.to_string(),
            source,
        })?;

        Ok(DiscoveryResponse {
            version_info: self.version_info.clone(),
            resources: vec![secret],
            type_url: request.type_url.clone(),
            nonce: (self.nonce_counter + 1).to_string(),
        })
    }

    /// Record that the response to `request` carrying `nonce` was sent.
    pub fn record_sent(mut self, request: DiscoveryRequest, nonce: String) -> Self {
        if let Some(node) = request.node.as_ref().filter(|node| !node.is_empty()) {
            self.last_node = Some(node.clone());
        }
        self.nonce_counter += 1;
        self.phase = SessionPhase::AwaitingAck { nonce };
        self.last_request = Some(request);
        self
    }

    pub fn close(mut self) -> Self {
        self.phase = SessionPhase::Closed;
        self
    }
}

/// Check that a request names exactly the `ROOTCA` resource.
pub fn validate_resource_names(names: &[String]) -> Result<&str> {
    match names {
        [name] if name == ROOT_CA_RESOURCE_NAME => Ok(name.as_str()),
        [_] => Err(ServerError::Validation(format!(
            "workload is not allowed to request secrets other than {ROOT_CA_RESOURCE_NAME}"
        ))),
        [] => Err(ServerError::Validation(
            "workload must request exactly one secret".into(),
        )),
        _ => Err(ServerError::Validation(
            "workload is not allowed to request more than 1 secret".into(),
        )),
    }
}

/// Drives one secrets stream until it closes.
pub struct StreamSession {
    bundle: TrustBundle,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(bundle: TrustBundle, cancel: CancellationToken) -> Self {
        Self { bundle, cancel }
    }

    /// Serve `inbound` requests on `outbound` until the stream ends.
    ///
    /// Returns `Ok(())` when the peer finishes or the session is cancelled,
    /// and the fatal error otherwise.
    pub async fn run<S, K>(self, inbound: S, mut outbound: K) -> Result<()>
    where
        S: Stream<Item = std::result::Result<DiscoveryRequest, ProtoError>> + Send + Unpin + 'static,
        K: Sink<DiscoveryResponse, Error = ProtoError> + Unpin,
    {
        let listener_cancel = self.cancel.child_token();
        let _stop_listener = listener_cancel.clone().drop_guard();
        let (mut events, _listener) = listener::spawn(inbound, listener_cancel);

        let mut state = SessionState::new();
        loop {
            let request = match events.recv().await {
                Some(ListenerEvent::Request(request)) => request,
                Some(ListenerEvent::Closed(None)) => {
                    let state = state.close();
                    info!(last_nonce = %state.last_nonce(), "secrets stream closed");
                    return Ok(());
                }
                Some(ListenerEvent::Closed(Some(err))) => {
                    warn!(error = %err, "secrets stream failed");
                    return Err(err);
                }
                None => return Err(ServerError::ListenerGone),
            };

            state = self.serve(state, request, &mut outbound).await?;
        }
    }

    async fn serve<K>(
        &self,
        state: SessionState,
        request: DiscoveryRequest,
        outbound: &mut K,
    ) -> Result<SessionState>
    where
        K: Sink<DiscoveryResponse, Error = ProtoError> + Unpin,
    {
        debug!(
            resource_names = ?request.resource_names,
            version = %request.version_info,
            nonce = %request.response_nonce,
            "received request"
        );

        if let Some(detail) = &request.error_detail {
            warn!(
                resource_names = ?request.resource_names,
                code = detail.code,
                message = %detail.message,
                "workload reported an error"
            );
        }

        let request = match state.admit(request) {
            Admission::Fresh(request) => request,
            Admission::Stale { received, expected } => {
                debug!(%received, %expected, "unexpected nonce; ignoring request");
                return Ok(state);
            }
            Admission::Closed => return Ok(state),
        };

        let name = validate_resource_names(&request.resource_names)?;
        let response = state.build_response(&request, name, &self.bundle)?;
        let nonce = response.nonce.clone();

        debug!(
            version = %response.version_info,
            nonce = %nonce,
            resources = response.resources.len(),
            "sending response"
        );
        outbound.send(response).await.map_err(ServerError::Send)?;

        Ok(state.record_sent(request, nonce))
    }
}
