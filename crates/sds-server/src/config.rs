//! Startup configuration read from the process environment.
//!
//! | variable | required | meaning |
//! |---|---|---|
//! | `TRUST_BUNDLE` | yes | PEM root bundle served as `ROOTCA` |
//! | `SDS_LISTEN_ADDR` | no | listen address, default `0.0.0.0:15012` |
//!
//! Log filtering is configured separately through `RUST_LOG`.

use std::net::{Ipv4Addr, SocketAddr};

use sds_proto::codec::MAX_MESSAGE_SIZE;
use sds_proto::secret::max_response_frame_len;
use sds_proto::TrustBundle;

use crate::error::{Result, ServerError};

pub const TRUST_BUNDLE_ENV: &str = "TRUST_BUNDLE";
pub const LISTEN_ADDR_ENV: &str = "SDS_LISTEN_ADDR";

/// Port the server listens on unless `SDS_LISTEN_ADDR` says otherwise.
pub const DEFAULT_PORT: u16 = 15012;

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub trust_bundle: TrustBundle,
    pub listen_addr: SocketAddr,
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let trust_bundle = lookup(TRUST_BUNDLE_ENV)
            .filter(|value| !value.is_empty())
            .map(TrustBundle::from)
            .ok_or_else(|| {
                ServerError::Config(format!("failed to find {TRUST_BUNDLE_ENV} environment variable"))
            })?;
        check_servable(&trust_bundle)?;

        let listen_addr = match lookup(LISTEN_ADDR_ENV) {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                ServerError::Config(format!("invalid {LISTEN_ADDR_ENV} {raw:?}: {e}"))
            })?,
            None => default_listen_addr(),
        };

        Ok(Self {
            trust_bundle,
            listen_addr,
        })
    }
}

/// Refuse a bundle whose `ROOTCA` response would not fit in one frame.
fn check_servable(bundle: &TrustBundle) -> Result<()> {
    let frame_len = max_response_frame_len(bundle)
        .map_err(|e| ServerError::Config(format!("cannot encode {TRUST_BUNDLE_ENV}: {e}")))?;
    if frame_len > MAX_MESSAGE_SIZE {
        return Err(ServerError::Config(format!(
            "{TRUST_BUNDLE_ENV} is too large to serve: {} bytes needs a {frame_len} byte response (max {MAX_MESSAGE_SIZE})",
            bundle.len()
        )));
    }
    Ok(())
}

pub fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}
