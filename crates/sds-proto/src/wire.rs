//! Protobuf message types carried on the wire.
//!
//! Discovery and secret messages mirror the Envoy xDS v3 definitions
//! (`envoy.service.discovery.v3`, `envoy.config.core.v3`,
//! `envoy.extensions.transport_sockets.tls.v3`) field-for-field for the
//! fields this server reads or writes, so the encoded payloads are
//! interchangeable with Envoy's. Unknown fields are skipped on decode.
//!
//! The handshake and [`StreamFrame`] messages are specific to this
//! transport and carry method selection and trailing status.

use prost_types::{Any, Struct};

/// Resource name of the only secret this server distributes.
pub const ROOT_CA_RESOURCE_NAME: &str = "ROOTCA";

/// Type URL of a packed [`Secret`].
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

// ---------------------------------------------------------------------------
// envoy.config.core.v3
// ---------------------------------------------------------------------------

/// Identity of the workload proxy that opened the stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub cluster: String,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<Struct>,
    #[prost(string, tag = "6")]
    pub user_agent_name: String,
}

impl Node {
    /// A node with no identifying fields set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Where a blob of configuration data comes from.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DataSource {
    #[prost(oneof = "data_source::Specifier", tags = "1, 2, 3")]
    pub specifier: Option<data_source::Specifier>,
}

pub mod data_source {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Specifier {
        #[prost(string, tag = "1")]
        Filename(String),
        #[prost(bytes = "vec", tag = "2")]
        InlineBytes(Vec<u8>),
        #[prost(string, tag = "3")]
        InlineString(String),
    }
}

impl DataSource {
    /// Returns the inline bytes, if this source carries them.
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match &self.specifier {
            Some(data_source::Specifier::InlineBytes(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// google.rpc
// ---------------------------------------------------------------------------

/// `google.rpc.Status`: used for NACK details and for transport statuses.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

impl RpcStatus {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(crate::error::status::OK, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == crate::error::status::OK
    }
}

// ---------------------------------------------------------------------------
// envoy.service.discovery.v3
// ---------------------------------------------------------------------------

/// A request (or ACK/NACK) sent by the workload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryRequest {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub response_nonce: String,
    #[prost(message, optional, tag = "6")]
    pub error_detail: Option<RpcStatus>,
}

/// A response pushed by the server.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryResponse {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Any>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
}

// ---------------------------------------------------------------------------
// envoy.extensions.transport_sockets.tls.v3
// ---------------------------------------------------------------------------

/// Which certificate authorities a TLS peer trusts.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateValidationContext {
    #[prost(message, optional, tag = "1")]
    pub trusted_ca: Option<DataSource>,
}

/// A named secret. Only the validation-context variant is modelled.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Secret {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "secret::Type", tags = "4")]
    pub r#type: Option<secret::Type>,
}

pub mod secret {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "4")]
        ValidationContext(super::CertificateValidationContext),
    }
}

impl Secret {
    /// Returns the validation context, if this is a validation-context secret.
    pub fn validation_context(&self) -> Option<&CertificateValidationContext> {
        match &self.r#type {
            Some(secret::Type::ValidationContext(ctx)) => Some(ctx),
            None => None,
        }
    }
}

impl prost::Name for Secret {
    const NAME: &'static str = "Secret";
    const PACKAGE: &'static str = "envoy.extensions.transport_sockets.tls.v3";

    fn type_url() -> String {
        SECRET_TYPE_URL.to_string()
    }
}

// ---------------------------------------------------------------------------
// Connection handshake and stream framing
// ---------------------------------------------------------------------------

/// Operation a connection is opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    StreamSecrets = 0,
    FetchSecrets = 1,
    DeltaSecrets = 2,
}

/// First message on every connection, sent by the client.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Handshake {
    #[prost(string, tag = "1")]
    pub protocol_version: String,
    #[prost(enumeration = "Method", tag = "2")]
    pub method: i32,
}

/// Server reply to [`Handshake`]. A non-OK status means the server will
/// close the connection without serving it.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HandshakeResponse {
    #[prost(string, tag = "1")]
    pub protocol_version: String,
    #[prost(message, optional, tag = "2")]
    pub status: Option<RpcStatus>,
}

/// Server-to-client frame once a secrets stream is established.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamFrame {
    #[prost(oneof = "stream_frame::Body", tags = "1, 2")]
    pub body: Option<stream_frame::Body>,
}

pub mod stream_frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Response(super::DiscoveryResponse),
        /// Terminal status; no frames follow it.
        #[prost(message, tag = "2")]
        Status(super::RpcStatus),
    }
}

impl From<DiscoveryResponse> for StreamFrame {
    fn from(response: DiscoveryResponse) -> Self {
        Self {
            body: Some(stream_frame::Body::Response(response)),
        }
    }
}

impl From<RpcStatus> for StreamFrame {
    fn from(status: RpcStatus) -> Self {
        Self {
            body: Some(stream_frame::Body::Status(status)),
        }
    }
}
