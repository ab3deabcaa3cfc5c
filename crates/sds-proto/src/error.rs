//! Error types for the SDS wire layer.
//!
//! Wire-visible failures are reported to peers as an [`RpcStatus`] carrying
//! one of the [`status`] codes. This module defines the Rust-native error type
//! used inside crate boundaries plus those numeric code constants.
//!
//! [`RpcStatus`]: crate::wire::RpcStatus

use thiserror::Error;

/// Errors that can occur within the `sds-proto` crate.
#[derive(Debug, Error)]
pub enum ProtoError {
    // --- Framing ---
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization ---
    #[error("protobuf encode error: {0}")]
    ProtobufEncode(#[from] prost::EncodeError),

    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
}

impl ProtoError {
    /// Returns the underlying I/O error kind, if this is a transport failure.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Result type alias using [`ProtoError`].
pub type Result<T> = std::result::Result<T, ProtoError>;

// =========================================================================
// Status codes
//
// Numbering follows `google.rpc.Code` so that statuses read the same way
// they would on a gRPC transport.
// =========================================================================

pub mod status {
    pub const OK: i32 = 0;
    pub const UNKNOWN: i32 = 2;
    pub const INVALID_ARGUMENT: i32 = 3;
    pub const FAILED_PRECONDITION: i32 = 9;
    pub const UNIMPLEMENTED: i32 = 12;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
}
