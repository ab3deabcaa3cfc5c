//! Secret discovery server for a single trust bundle.
//!
//! Streams the `ROOTCA` validation-context secret to workloads over a
//! nonce-acknowledged discovery stream:
//!
//! - TCP endpoint and per-connection handshake ([`endpoint`], [`connection`])
//! - Request Listener feeding a capacity-one hand-off ([`listener`])
//! - Stream Session Manager and its acknowledgment state ([`session`])
//! - `StreamSecrets` / `FetchSecrets` / `DeltaSecrets` surface ([`service`])
//! - Environment configuration ([`config`])

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod service;
pub mod session;
pub mod stream_io;

pub use config::ServerConfig;
pub use connection::SdsConnection;
pub use endpoint::SdsEndpoint;
pub use error::ServerError;
pub use service::SecretDiscoveryService;
