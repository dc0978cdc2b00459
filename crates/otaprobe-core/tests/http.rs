//! HttpTransport against local servers.

use mockito::{Matcher, Server};
use otaprobe_core::error::{MetadataError, NetworkError};
use otaprobe_core::metadata::METADATA_ENTRY;
use otaprobe_core::transport::PROTOBUF_CONTENT_TYPE;
use otaprobe_core::wire::MessageWriter;
use otaprobe_core::{
    Error, Fingerprint, HttpTransport, IntentCode, MetadataConfig, PackageKind, ProbeConfig,
    Prober, RequestEncoder, RetryPolicy, Transport, TransportConfig,
};
use pretty_assertions::assert_eq;
use reqwest::Url;
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const FINGERPRINT: &str = "brand/product/device:13/ID123/456:user/release-keys";

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new()
        .max_attempts(3)
        .backoff(Duration::from_millis(10), Duration::from_millis(20))
}

fn request() -> otaprobe_core::CheckinRequest {
    let fingerprint = Fingerprint::parse(FINGERPRINT).unwrap();
    RequestEncoder::default().build(&fingerprint, IntentCode::SoftwareUpdateCheck)
}

fn update_body() -> Vec<u8> {
    update_body_for("https://example.com/pkg.zip")
}

fn update_body_for(url: &str) -> Vec<u8> {
    let mut setting = MessageWriter::new();
    setting.string(1, "update_url").string(2, url);
    let mut w = MessageWriter::new();
    w.bool(1, true).message(5, &setting);
    w.finish().to_vec()
}

/// A stored-entry OTA zip with `payload_len` bytes of payload ahead of the metadata
fn ota_package(payload_len: usize, metadata: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("payload.bin", options).unwrap();
    writer.write_all(&vec![0u8; payload_len]).unwrap();
    writer.start_file(METADATA_ENTRY, options).unwrap();
    writer.write_all(metadata.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Accepts connections and never answers
async fn silent_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

#[tokio::test]
async fn test_posts_compressed_protobuf() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/checkin")
        .match_header("content-type", PROTOBUF_CONTENT_TYPE)
        .match_header("content-encoding", "gzip")
        .match_header(
            "user-agent",
            Matcher::Exact("Dalvik/2.1.0 (Linux; U; Android 13; device Build/ID123)".into()),
        )
        .with_status(200)
        .with_body(update_body())
        .create_async()
        .await;

    let transport = HttpTransport::new(TransportConfig::new().retry(fast_retries())).unwrap();
    let endpoint = Url::parse(&format!("{}/checkin", server.url())).unwrap();

    let response = transport.send(request(), &endpoint).await.unwrap();
    assert_eq!(response.into_bytes().to_vec(), update_body());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/checkin")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(TransportConfig::new().retry(fast_retries())).unwrap();
    let endpoint = Url::parse(&format!("{}/checkin", server.url())).unwrap();

    let err = transport.send(request(), &endpoint).await.unwrap_err();
    assert_eq!(err, NetworkError::ServerRejected { status: 500 });
    assert!(!err.is_transient());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_refused_connection_exhausts_retry_budget() {
    // Bind and release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/checkin")).unwrap();
    let transport = HttpTransport::new(TransportConfig::new().retry(fast_retries())).unwrap();

    let err = transport.send(request(), &endpoint).await.unwrap_err();
    assert!(
        matches!(err, NetworkError::Connection { attempts: 3, .. }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_silent_server_hits_overall_timeout() {
    let addr = silent_server().await;
    let config = TransportConfig::new()
        .timeout(Duration::from_millis(300))
        .attempt_timeout(Duration::from_secs(10))
        .retry(fast_retries());
    let transport = HttpTransport::new(config).unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/checkin")).unwrap();

    let err = transport.send(request(), &endpoint).await.unwrap_err();
    assert_eq!(
        err,
        NetworkError::Timeout {
            elapsed: Duration::from_millis(300)
        }
    );
}

#[tokio::test]
async fn test_attempt_timeouts_report_timeout() {
    let addr = silent_server().await;
    let config = TransportConfig::new()
        .timeout(Duration::from_secs(10))
        .attempt_timeout(Duration::from_millis(100))
        .retry(
            RetryPolicy::new()
                .max_attempts(2)
                .backoff(Duration::from_millis(10), Duration::from_millis(10)),
        );
    let transport = HttpTransport::new(config).unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/checkin")).unwrap();

    let err = transport.send(request(), &endpoint).await.unwrap_err();
    assert!(
        matches!(err, NetworkError::Timeout { elapsed } if elapsed < Duration::from_secs(10)),
        "unexpected error: {err:?}"
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_probe_over_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/checkin")
        .with_status(200)
        .with_body(update_body())
        .create_async()
        .await;

    let config = ProbeConfig::new()
        .endpoint(format!("{}/checkin", server.url()))
        .transport(TransportConfig::new().retry(fast_retries()));
    let transport = HttpTransport::new(config.transport.clone()).unwrap();
    let prober = Prober::new(&transport, &config).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    let package = resolution.package().unwrap();
    assert_eq!(package.url(), "https://example.com/pkg.zip");
    assert_eq!(package.kind(), &PackageKind::Full);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_probe_surfaces_rejection() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/checkin")
        .with_status(403)
        .create_async()
        .await;

    let config = ProbeConfig::new().endpoint(format!("{}/checkin", server.url()));
    let transport = HttpTransport::new(config.transport.clone()).unwrap();
    let prober = Prober::new(&transport, &config).unwrap();

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Network(NetworkError::ServerRejected { status: 403 })
    ));
}

#[tokio::test]
async fn test_probe_reads_package_metadata() {
    let target = "brand/product/device:14/UP1A/789:user/release-keys";
    let mut server = Server::new_async().await;
    let package_url = format!("{}/pkg.zip", server.url());

    let checkin = server
        .mock("POST", "/checkin")
        .with_status(200)
        .with_body(update_body_for(&package_url))
        .create_async()
        .await;
    let head = server
        .mock("GET", "/pkg.zip")
        .match_header("range", "bytes=0-65535")
        .with_status(206)
        .with_body(ota_package(
            1024,
            &format!("post-build={target}\npost-sdk-level=34\npre-build={FINGERPRINT}\n"),
        ))
        .expect(1)
        .create_async()
        .await;

    let config = ProbeConfig::new()
        .endpoint(format!("{}/checkin", server.url()))
        .metadata(MetadataConfig {
            enabled: true,
            window_bytes: 64 * 1024,
        });
    let transport = HttpTransport::new(config.transport.clone()).unwrap();
    let prober = Prober::new(&transport, &config).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    let package = resolution.package().unwrap();
    assert!(package.kind().is_incremental());
    assert_eq!(package.target().map(Fingerprint::as_str), Some(target));
    assert_eq!(package.metadata().unwrap().post_sdk_level, Some(34));

    checkin.assert_async().await;
    head.assert_async().await;
}

#[tokio::test]
async fn test_metadata_window_caps_download() {
    let mut server = Server::new_async().await;
    // Ignores the range and sends everything
    let _mock = server
        .mock("GET", "/pkg.zip")
        .with_status(200)
        .with_body(ota_package(256 * 1024, "post-build=a/b/c:14/X/1:user/release-keys"))
        .create_async()
        .await;

    let transport = HttpTransport::new(TransportConfig::new()).unwrap();
    let url = Url::parse(&format!("{}/pkg.zip", server.url())).unwrap();

    assert_eq!(transport.fetch_metadata(&url, 16 * 1024).await.unwrap(), None);
    assert!(transport
        .fetch_metadata(&url, 1024 * 1024)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_missing_package_is_metadata_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/pkg.zip")
        .with_status(404)
        .create_async()
        .await;

    let transport = HttpTransport::new(TransportConfig::new()).unwrap();
    let url = Url::parse(&format!("{}/pkg.zip", server.url())).unwrap();

    assert_eq!(
        transport.fetch_metadata(&url, 1024).await.unwrap_err(),
        MetadataError::Network(NetworkError::ServerRejected { status: 404 })
    );
}
