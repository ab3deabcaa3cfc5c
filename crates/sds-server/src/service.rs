//! The secret discovery service surface.
//!
//! Three operations mirror the upstream secret discovery service: the
//! bidirectional `StreamSecrets` call, which is the only one served, and the
//! unary `FetchSecrets` and incremental `DeltaSecrets` calls, which always
//! answer `UNIMPLEMENTED` and touch no state.

use futures::{Sink, Stream};
use sds_proto::wire::{DiscoveryRequest, DiscoveryResponse};
use sds_proto::{ProtoError, TrustBundle};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::session::StreamSession;

/// Serves the `ROOTCA` secret built from one immutable trust bundle.
#[derive(Debug, Clone)]
pub struct SecretDiscoveryService {
    bundle: TrustBundle,
}

impl SecretDiscoveryService {
    pub fn new(bundle: TrustBundle) -> Self {
        Self { bundle }
    }

    pub fn trust_bundle(&self) -> &TrustBundle {
        &self.bundle
    }

    /// Run a secrets stream until the peer closes it, `cancel` fires, or a
    /// fatal error occurs.
    pub async fn stream_secrets<S, K>(
        &self,
        inbound: S,
        outbound: K,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<DiscoveryRequest, ProtoError>> + Send + Unpin + 'static,
        K: Sink<DiscoveryResponse, Error = ProtoError> + Unpin,
    {
        StreamSession::new(self.bundle.clone(), cancel)
            .run(inbound, outbound)
            .await
    }

    pub fn fetch_secrets(&self, _request: &DiscoveryRequest) -> Result<DiscoveryResponse> {
        Err(ServerError::Unimplemented("FetchSecrets"))
    }

    pub fn delta_secrets(&self) -> Result<()> {
        Err(ServerError::Unimplemented("DeltaSecrets"))
    }
}

#[cfg(test)]
mod tests {
    use sds_proto::error::status;

    use super::*;

    #[test]
    fn fetch_and_delta_are_unimplemented() {
        let service = SecretDiscoveryService::new(TrustBundle::new("PEM"));

        let fetch = service
            .fetch_secrets(&DiscoveryRequest::default())
            .unwrap_err();
        assert_eq!(fetch.status_code(), status::UNIMPLEMENTED);
        assert_eq!(fetch.to_string(), "FetchSecrets is not implemented");

        let delta = service.delta_secrets().unwrap_err();
        assert_eq!(delta.status_code(), status::UNIMPLEMENTED);
        assert_eq!(delta.to_string(), "DeltaSecrets is not implemented");

        assert_eq!(service.trust_bundle().as_str(), "PEM");
    }
}
