//! Integration tests: secrets streams over a loopback TCP endpoint.
//!
//! Each test binds an endpoint on 127.0.0.1:0, connects a minimal client
//! that speaks the handshake and discovery framing, and checks what comes
//! back on the wire.
//!
//! Run with `--nocapture` to see the server's log output:
//! ```sh
//! cargo test -p sds-server --test stream_secrets -- --nocapture
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sds_proto::codec::WireCodec;
use sds_proto::error::status;
use sds_proto::version::PROTOCOL_VERSION;
use sds_proto::wire::{
    stream_frame, DiscoveryRequest, DiscoveryResponse, Handshake, HandshakeResponse, Method,
    Node, RpcStatus, Secret, StreamFrame, SECRET_TYPE_URL,
};
use sds_proto::TrustBundle;
use sds_server::{SdsEndpoint, SecretDiscoveryService};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const BUNDLE: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBszCCAVmgAwIBAgIUB1Qj7ZPvmBzB0sd0L3z3j0SGo2cwCgYIKoZIzj0EAwIw\n\
-----END CERTIFICATE-----\n";

/// How long to wait for a frame that should arrive.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to watch for a frame that should not arrive.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Init tracing subscriber (idempotent across tests via try_init).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .try_init();
}

struct Server {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

async fn start_server() -> Server {
    init_tracing();
    let endpoint = SdsEndpoint::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("endpoint should bind");
    let addr = endpoint.local_addr().expect("should have local addr");
    let shutdown = CancellationToken::new();
    let service = SecretDiscoveryService::new(TrustBundle::new(BUNDLE));
    let task = tokio::spawn(endpoint.serve(service, shutdown.clone()));
    Server {
        addr,
        shutdown,
        task,
    }
}

struct Client {
    framed: Framed<TcpStream, WireCodec<StreamFrame, DiscoveryRequest>>,
}

impl Client {
    async fn open(addr: SocketAddr, method: Method) -> (Self, RpcStatus) {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut framed = Framed::new(stream, WireCodec::<HandshakeResponse, Handshake>::new());
        framed
            .send(Handshake {
                protocol_version: PROTOCOL_VERSION.into(),
                method: method as i32,
            })
            .await
            .expect("send handshake");
        let reply = tokio::time::timeout(FRAME_TIMEOUT, framed.next())
            .await
            .expect("handshake reply in time")
            .expect("handshake reply")
            .expect("decodable handshake reply");

        let client = Self {
            framed: framed.map_codec(|_| WireCodec::new()),
        };
        (client, reply.status.expect("status in handshake reply"))
    }

    async fn stream(addr: SocketAddr) -> Self {
        let (client, accepted) = Self::open(addr, Method::StreamSecrets).await;
        assert!(accepted.is_ok(), "stream handshake refused: {accepted:?}");
        client
    }

    async fn send(&mut self, request: DiscoveryRequest) {
        self.framed.send(request).await.expect("send request");
    }

    /// Next frame from the server, `None` once it closed the connection.
    async fn next_frame(&mut self) -> Option<StreamFrame> {
        tokio::time::timeout(FRAME_TIMEOUT, self.framed.next())
            .await
            .expect("server should answer or close in time")
            .map(|frame| frame.expect("decodable frame"))
    }

    async fn next_response(&mut self) -> DiscoveryResponse {
        match self.next_frame().await.and_then(|f| f.body) {
            Some(stream_frame::Body::Response(response)) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    async fn next_status(&mut self) -> RpcStatus {
        match self.next_frame().await.and_then(|f| f.body) {
            Some(stream_frame::Body::Status(terminal)) => terminal,
            other => panic!("expected terminal status, got {other:?}"),
        }
    }

    async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(QUIET_PERIOD, self.framed.next()).await;
        assert!(next.is_err(), "server should not have sent anything: {next:?}");
    }
}

fn request(names: &[&str], nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        resource_names: names.iter().map(|n| n.to_string()).collect(),
        type_url: SECRET_TYPE_URL.into(),
        response_nonce: nonce.into(),
        ..Default::default()
    }
}

fn trusted_ca_bytes(response: &DiscoveryResponse) -> Vec<u8> {
    assert_eq!(response.resources.len(), 1);
    let secret: Secret = response.resources[0].to_msg().expect("secret payload");
    assert_eq!(secret.name, "ROOTCA");
    secret
        .validation_context()
        .and_then(|ctx| ctx.trusted_ca.as_ref())
        .and_then(|ca| ca.inline_bytes())
        .expect("inline trusted CA")
        .to_vec()
}

// ---------------------------------------------------------------------------
// First request is served with the bundle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_request_receives_bundle() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    let mut first = request(&["ROOTCA"], "");
    first.node = Some(Node {
        id: "sidecar~10.0.0.7~web".into(),
        ..Default::default()
    });
    client.send(first).await;

    let response = client.next_response().await;
    assert_eq!(trusted_ca_bytes(&response), BUNDLE.as_bytes());
    assert_eq!(response.type_url, SECRET_TYPE_URL);
    assert_eq!(response.version_info, "0");
    assert!(!response.nonce.is_empty());

    server.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Invalid resource names end the stream with an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extra_resource_name_closes_with_error() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA", "OTHER"], "")).await;

    let ended = client.next_status().await;
    assert_eq!(ended.code, status::INVALID_ARGUMENT);
    assert!(ended.message.contains("more than 1 secret"));
    assert!(client.next_frame().await.is_none(), "connection is closed");

    server.shutdown.cancel();
}

#[tokio::test]
async fn unknown_resource_name_closes_with_error() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["default"], "")).await;

    let ended = client.next_status().await;
    assert_eq!(ended.code, status::INVALID_ARGUMENT);
    assert!(ended.message.contains("other than ROOTCA"));
    assert!(client.next_frame().await.is_none());

    server.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// End of stream is a clean close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn end_of_stream_closes_without_status() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA"], "")).await;
    client.next_response().await;

    // Half-close: the server sees end-of-stream on its read side.
    client.framed.close().await.expect("half-close");
    assert!(client.next_frame().await.is_none(), "no error status on clean close");

    server.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Acknowledgments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_ack_receives_second_response() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA"], "")).await;
    let first = client.next_response().await;

    let mut ack = request(&["ROOTCA"], &first.nonce);
    ack.version_info = first.version_info.clone();
    client.send(ack).await;
    let second = client.next_response().await;

    assert_eq!(trusted_ca_bytes(&second), BUNDLE.as_bytes());
    assert_ne!(second.nonce, first.nonce);

    server.shutdown.cancel();
}

#[tokio::test]
async fn stale_nonce_is_ignored() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA"], "")).await;
    let first = client.next_response().await;

    client.send(request(&["ROOTCA"], "not-a-nonce")).await;
    client.expect_silence().await;

    // A stale request is dropped before validation, so it cannot fail the
    // stream either.
    client.send(request(&["ROOTCA", "OTHER"], "not-a-nonce")).await;
    client.expect_silence().await;

    client.send(request(&["ROOTCA"], &first.nonce)).await;
    let second = client.next_response().await;
    assert_ne!(second.nonce, first.nonce);

    server.shutdown.cancel();
}

#[tokio::test]
async fn nack_is_answered_like_an_ack() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA"], "")).await;
    let first = client.next_response().await;

    let mut nack = request(&["ROOTCA"], &first.nonce);
    nack.error_detail = Some(RpcStatus::new(status::INVALID_ARGUMENT, "bad bundle"));
    client.send(nack).await;
    let second = client.next_response().await;
    assert_eq!(trusted_ca_bytes(&second), BUNDLE.as_bytes());

    server.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Unimplemented methods
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_secrets_is_unimplemented() {
    let server = start_server().await;
    let (mut client, handshake) = Client::open(server.addr, Method::FetchSecrets).await;
    assert!(handshake.is_ok());

    client.send(request(&["ROOTCA"], "")).await;
    let ended = client.next_status().await;
    assert_eq!(ended.code, status::UNIMPLEMENTED);
    assert_eq!(ended.message, "FetchSecrets is not implemented");
    assert!(client.next_frame().await.is_none());

    server.shutdown.cancel();
}

#[tokio::test]
async fn delta_secrets_is_unimplemented() {
    let server = start_server().await;
    let (mut client, handshake) = Client::open(server.addr, Method::DeltaSecrets).await;
    assert!(handshake.is_ok());

    let ended = client.next_status().await;
    assert_eq!(ended.code, status::UNIMPLEMENTED);
    assert_eq!(ended.message, "DeltaSecrets is not implemented");

    server.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Connections are independent; shutdown is clean
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connections_keep_separate_state() {
    let server = start_server().await;
    let mut a = Client::stream(server.addr).await;
    let mut b = Client::stream(server.addr).await;

    a.send(request(&["ROOTCA"], "")).await;
    let from_a = a.next_response().await;

    // B has sent nothing yet, so A's nonce means nothing to it and its
    // first request is served regardless.
    b.send(request(&["ROOTCA"], &from_a.nonce)).await;
    let from_b = b.next_response().await;

    assert_eq!(trusted_ca_bytes(&from_a), trusted_ca_bytes(&from_b));

    // A failing stream does not affect the other one.
    b.send(request(&["OTHER"], &from_b.nonce)).await;
    assert_eq!(b.next_status().await.code, status::INVALID_ARGUMENT);

    a.send(request(&["ROOTCA"], &from_a.nonce)).await;
    a.next_response().await;

    server.shutdown.cancel();
}

#[tokio::test]
async fn shutdown_closes_open_streams_cleanly() {
    let server = start_server().await;
    let mut client = Client::stream(server.addr).await;

    client.send(request(&["ROOTCA"], "")).await;
    client.next_response().await;

    server.shutdown.cancel();
    assert!(client.next_frame().await.is_none(), "no error status on shutdown");
    tokio::time::timeout(FRAME_TIMEOUT, server.task)
        .await
        .expect("server stops in time")
        .expect("server task");
}
