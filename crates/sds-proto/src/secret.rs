//! Secret Builder: wraps the trust bundle in a validation-context secret.
//!
//! The bundle content becomes the secret's `trusted_ca` inline bytes
//! unchanged. Building is pure; the only failure is the protobuf encoder
//! refusing the payload.

use prost::Message;
use prost_types::Any;

use crate::error::Result;
use crate::trust::TrustBundle;
use crate::wire::{
    data_source, secret, CertificateValidationContext, DataSource, DiscoveryResponse, Secret,
    StreamFrame, ROOT_CA_RESOURCE_NAME, SECRET_TYPE_URL,
};

/// Build the typed secret named `name` that trusts `bundle`.
pub fn root_ca_secret(name: &str, bundle: &TrustBundle) -> Secret {
    Secret {
        name: name.to_string(),
        r#type: Some(secret::Type::ValidationContext(CertificateValidationContext {
            trusted_ca: Some(DataSource {
                specifier: Some(data_source::Specifier::InlineBytes(bundle.as_bytes().to_vec())),
            }),
        })),
    }
}

/// Build the secret and pack it for a discovery response.
pub fn build_secret(name: &str, bundle: &TrustBundle) -> Result<Any> {
    Ok(Any::from_msg(&root_ca_secret(name, bundle))?)
}

/// Encoded size of the largest stream frame that can carry `bundle`.
///
/// Counts the longest version and nonce a session can produce and the
/// standard secret type URL.
pub fn max_response_frame_len(bundle: &TrustBundle) -> Result<usize> {
    let response = DiscoveryResponse {
        version_info: u64::MAX.to_string(),
        resources: vec![build_secret(ROOT_CA_RESOURCE_NAME, bundle)?],
        type_url: SECRET_TYPE_URL.to_string(),
        nonce: u64::MAX.to_string(),
    };
    Ok(StreamFrame::from(response).encoded_len())
}
