//! Secret discovery server binary.
//!
//! Reads the trust bundle from `TRUST_BUNDLE`, listens on `SDS_LISTEN_ADDR`
//! (default `0.0.0.0:15012`) and serves until SIGINT or SIGTERM.

use sds_proto::TrustBundle;
use sds_server::{SdsEndpoint, SecretDiscoveryService, ServerConfig, ServerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };
    log_trust_bundle(&config.trust_bundle);

    let endpoint = SdsEndpoint::bind(config.listen_addr).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    info!("starting sds server");
    endpoint
        .serve(SecretDiscoveryService::new(config.trust_bundle), shutdown)
        .await;
    info!("sds server stopped");
    Ok(())
}

fn log_trust_bundle(bundle: &TrustBundle) {
    let summary = bundle.inspect();
    info!(
        bytes = bundle.len(),
        sha256 = %bundle.fingerprint(),
        certificates = summary.certificates.len(),
        "loaded trust bundle"
    );
    for cert in &summary.certificates {
        info!(subject = %cert.subject, not_after = %cert.not_after, ca = cert.is_ca, "trusted root");
    }
    if summary.certificates.is_empty() {
        warn!("trust bundle contains no decodable certificates; serving it verbatim");
    }
    if summary.undecodable > 0 {
        warn!(blocks = summary.undecodable, "trust bundle has PEM blocks that are not certificates");
    }
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to register SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for SIGINT");
                return;
            }
            info!("received SIGINT");
        }
    }
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C"),
        Err(e) => {
            error!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
    }
    shutdown.cancel();
}
