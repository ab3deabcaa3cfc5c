//! Shared protocol layer for the trust-bundle secret discovery server.
//!
//! - Envoy-compatible discovery and secret message types ([`wire`])
//! - Length-delimited protobuf framing ([`codec`])
//! - The immutable trust bundle ([`trust`]) and the secret built from it
//!   ([`secret`])
//! - Handshake protocol version ([`version`])

pub mod codec;
pub mod error;
pub mod secret;
pub mod trust;
pub mod version;
pub mod wire;

pub use error::ProtoError;
pub use trust::TrustBundle;
