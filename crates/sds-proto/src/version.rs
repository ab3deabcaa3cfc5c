//! Handshake protocol version.
//!
//! The version covers the framing, the handshake and the `StreamFrame`
//! envelope, not the discovery messages themselves (those follow Envoy).
//! While the major version is 0 a minor bump is breaking.

use std::fmt;
use std::str::FromStr;

/// Version string this server sends in `HandshakeResponse`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

const CURRENT: ProtocolVersion = ProtocolVersion {
    major: 0,
    minor: 1,
    patch: 0,
};

/// A parsed `major.minor.patch` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn current() -> Self {
        CURRENT
    }

    /// Whether a peer speaking `self` can talk to a peer speaking `other`.
    pub fn compatible_with(&self, other: &ProtocolVersion) -> bool {
        if self.major == 0 {
            self.major == other.major && self.minor == other.minor
        } else {
            self.major == other.major
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let mut numbers = s.split('.').map(str::parse::<u32>);
        match (numbers.next(), numbers.next(), numbers.next(), numbers.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Ok(Self {
                major,
                minor,
                patch,
            }),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether a peer announcing `their_version` can talk to this server.
/// Unparsable versions never are.
pub fn is_compatible(their_version: &str) -> bool {
    their_version
        .parse::<ProtocolVersion>()
        .is_ok_and(|theirs| CURRENT.compatible_with(&theirs))
}
