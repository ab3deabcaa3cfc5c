//! Error types for the secret discovery server.

use sds_proto::error::status;
use sds_proto::wire::RpcStatus;
use thiserror::Error;

/// Errors that can occur in the server.
///
/// Everything past startup is fatal to one connection only: the session
/// stops, a terminal status is reported to the peer when the transport
/// still allows it, and the peer is expected to reconnect.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("endpoint bind failed: {0}")]
    Bind(String),

    #[error("connection accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("stream read failed: {0}")]
    Stream(#[source] sds_proto::ProtoError),

    #[error("{0}")]
    Validation(String),

    #[error("failed to serialize secret {name}: {source}")]
    Serialization {
        name: String,
        #[source]
        source: sds_proto::ProtoError,
    },

    #[error("failed to send response: {0}")]
    Send(#[source] sds_proto::ProtoError),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    #[error("request listener stopped without a close signal")]
    ListenerGone,
}

impl ServerError {
    /// The status code reported to the peer for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Validation(_) => status::INVALID_ARGUMENT,
            Self::Unimplemented(_) => status::UNIMPLEMENTED,
            Self::Handshake(_) => status::FAILED_PRECONDITION,
            Self::Stream(_) | Self::Send(_) | Self::Accept(_) => status::UNAVAILABLE,
            Self::Serialization { .. } | Self::ListenerGone => status::INTERNAL,
            Self::Config(_) | Self::Bind(_) => status::UNKNOWN,
        }
    }

    /// The status reported to the peer for this error.
    pub fn to_status(&self) -> RpcStatus {
        RpcStatus::new(self.status_code(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
