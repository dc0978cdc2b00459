//! Pipeline tests against an in-process transport.

use async_trait::async_trait;
use bytes::Bytes;
use otaprobe_core::error::{
    MetadataError, NetworkError, ParseError, ProtocolError, ResolutionError,
};
use otaprobe_core::wire::MessageWriter;
use otaprobe_core::{
    CheckinRequest, CheckinResponse, Error, Fingerprint, IntentCode, MetadataConfig, OtaMetadata,
    PackageKind, ProbeConfig, Prober, RequestEncoder, Resolution, Transport,
};
use pretty_assertions::assert_eq;
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const FINGERPRINT: &str = "brand/product/device:13/ID123/456:user/release-keys";

/// Answers every request with a canned body and counts calls
struct MockTransport {
    body: Bytes,
    delay: Option<Duration>,
    calls: AtomicUsize,
    user_agents: Mutex<Vec<String>>,
    metadata: Option<String>,
    metadata_requests: Mutex<Vec<(String, u64)>>,
}

impl MockTransport {
    fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            delay: None,
            calls: AtomicUsize::new(0),
            user_agents: Mutex::new(Vec::new()),
            metadata: None,
            metadata_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_metadata(body: impl Into<Bytes>, metadata: &str) -> Self {
        Self {
            metadata: Some(metadata.to_string()),
            ..Self::new(body)
        }
    }

    fn slow(body: impl Into<Bytes>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(body)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: CheckinRequest,
        _endpoint: &Url,
    ) -> Result<CheckinResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.user_agents
            .lock()
            .unwrap()
            .push(request.user_agent().to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(CheckinResponse::new(self.body.clone()))
    }

    async fn fetch_metadata(
        &self,
        url: &Url,
        window: u64,
    ) -> Result<Option<OtaMetadata>, MetadataError> {
        self.metadata_requests
            .lock()
            .unwrap()
            .push((url.to_string(), window));
        match self.metadata.as_deref() {
            Some("unreachable") => Err(NetworkError::ServerRejected { status: 404 }.into()),
            Some(text) => Ok(Some(OtaMetadata::parse(text))),
            None => Ok(None),
        }
    }
}

fn response(settings: &[(&str, &str)]) -> Bytes {
    let mut w = MessageWriter::new();
    w.bool(1, true).int64(3, 1_700_000_000_000);
    for (name, value) in settings {
        let mut setting = MessageWriter::new();
        setting.string(1, name).string(2, value);
        w.message(5, &setting);
    }
    w.fixed64(7, 0xDEAD_BEEF);
    w.finish()
}

#[tokio::test]
async fn test_incremental_update_scenario() {
    let transport = MockTransport::new(response(&[
        ("update_url", "https://example.com/pkg.zip"),
        ("update_size", "104857600"),
        ("update_checksum", "abc123"),
        ("update_source_fingerprint", FINGERPRINT),
    ]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    let package = resolution.package().expect("package offered");

    assert_eq!(package.url(), "https://example.com/pkg.zip");
    assert_eq!(package.size(), Some(104_857_600));
    assert_eq!(package.checksum(), Some("abc123"));
    assert_eq!(
        package.kind(),
        &PackageKind::Incremental {
            source: Fingerprint::parse(FINGERPRINT).unwrap()
        }
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_malformed_fingerprint_never_reaches_transport() {
    let transport = MockTransport::new(response(&[]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let err = prober.probe("not-a-fingerprint").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(ParseError::MalformedFingerprint { .. })
    ));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_no_update_is_not_an_error() {
    let transport = MockTransport::new(response(&[("update_title", "stale")]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    assert_eq!(
        prober.probe(FINGERPRINT).await.unwrap(),
        Resolution::NoUpdateAvailable
    );
}

#[tokio::test]
async fn test_source_mismatch_is_inconsistent_metadata() {
    let other = "brand/product/device:13/ID122/400:user/release-keys";
    let transport = MockTransport::new(response(&[
        ("update_url", "https://example.com/pkg.zip"),
        ("update_source_fingerprint", other),
    ]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    match err {
        Error::Resolution(ResolutionError::InconsistentMetadata { expected, found }) => {
            assert_eq!(expected, FINGERPRINT);
            assert_eq!(found, other);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_truncated_response_is_protocol_error() {
    let mut body = response(&[("update_url", "https://example.com/pkg.zip")]).to_vec();
    body.truncate(body.len() - 3);
    let transport = MockTransport::new(body);
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Truncated { .. })));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unsupported_wire_type_is_protocol_error() {
    let transport = MockTransport::new(vec![0x08u8, 0x01, 0x0E]);
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::UnsupportedWireType { wire_type: 6, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_drops_slow_exchange() {
    let transport = MockTransport::slow(response(&[]), Duration::from_secs(60));
    let prober = Prober::new(&transport, &ProbeConfig::default())
        .unwrap()
        .with_deadline(Duration::from_secs(2));

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Network(NetworkError::Timeout { elapsed }) if elapsed == Duration::from_secs(2)
    ));
    assert!(err.is_transient());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_model_reaches_user_agent() {
    let transport = MockTransport::new(response(&[]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();
    let fingerprint = Fingerprint::parse(FINGERPRINT).unwrap();

    prober
        .probe_fingerprint(&fingerprint, Some("X6871"))
        .await
        .unwrap();

    let agents = transport.user_agents.lock().unwrap();
    assert_eq!(
        *agents,
        vec!["Dalvik/2.1.0 (Linux; U; Android 13; X6871 Build/ID123)".to_string()]
    );
}

#[tokio::test]
async fn test_concurrent_probes_share_transport() {
    let transport = MockTransport::new(response(&[("update_url", "https://example.com/full.zip")]));
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let fingerprints = [
        FINGERPRINT,
        "brand/product/device:13/ID123/457:user/release-keys",
        "brand/product/device:14/ID200/1:user/release-keys",
    ];
    let results = probe_all(&prober, &fingerprints).await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(Resolution::is_update)));
    assert_eq!(transport.calls(), fingerprints.len());
}

async fn probe_all(
    prober: &Prober<'_, MockTransport>,
    fingerprints: &[&str],
) -> Vec<otaprobe_core::Result<Resolution>> {
    let (a, b, c) = tokio::join!(
        prober.probe(fingerprints[0]),
        prober.probe(fingerprints[1]),
        prober.probe(fingerprints[2]),
    );
    vec![a, b, c]
}

#[test]
fn test_encoding_is_byte_identical_across_encoders() {
    let fingerprint = Fingerprint::parse(FINGERPRINT).unwrap();
    let a = RequestEncoder::default().build(&fingerprint, IntentCode::SoftwareUpdateCheck);
    let b = RequestEncoder::default().build(&fingerprint, IntentCode::SoftwareUpdateCheck);
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_invalid_config_rejected_up_front() {
    let transport = MockTransport::new(response(&[]));
    let mut config = ProbeConfig::default();
    config.fields.response.setting = config.fields.response.digest;

    assert!(matches!(
        Prober::new(&transport, &config),
        Err(Error::InvalidConfig(_))
    ));
}

fn metadata_config() -> ProbeConfig {
    ProbeConfig::new().metadata(MetadataConfig {
        enabled: true,
        window_bytes: 4096,
    })
}

#[tokio::test]
async fn test_package_metadata_sets_source_and_target() {
    let target = "brand/product/device:14/UP1A/789:user/release-keys";
    let transport = MockTransport::with_metadata(
        response(&[("update_url", "https://example.com/pkg.zip")]),
        &format!("post-build={target}\npost-security-patch-level=2024-11-05\npre-build={FINGERPRINT}\n"),
    );
    let prober = Prober::new(&transport, &metadata_config()).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    let package = resolution.package().unwrap();
    assert_eq!(package.source().map(Fingerprint::as_str), Some(FINGERPRINT));
    assert_eq!(package.target().map(Fingerprint::as_str), Some(target));
    assert_eq!(
        package.metadata().unwrap().post_security_patch_level.as_deref(),
        Some("2024-11-05")
    );
    assert_eq!(
        *transport.metadata_requests.lock().unwrap(),
        vec![("https://example.com/pkg.zip".to_string(), 4096)]
    );
}

#[tokio::test]
async fn test_package_metadata_is_opt_in() {
    let transport = MockTransport::with_metadata(
        response(&[("update_url", "https://example.com/pkg.zip")]),
        "post-build=brand/product/device:14/UP1A/789:user/release-keys",
    );
    let prober = Prober::new(&transport, &ProbeConfig::default()).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    assert_eq!(resolution.package().unwrap().target(), None);
    assert!(transport.metadata_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_package_metadata_for_other_build_is_rejected() {
    let other = "brand/product/device:13/ID122/400:user/release-keys";
    let transport = MockTransport::with_metadata(
        response(&[("update_url", "https://example.com/pkg.zip")]),
        &format!("pre-build={other}"),
    );
    let prober = Prober::new(&transport, &metadata_config()).unwrap();

    let err = prober.probe(FINGERPRINT).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Resolution(ResolutionError::InconsistentMetadata { .. })
    ));
}

#[tokio::test]
async fn test_failed_metadata_lookup_keeps_package() {
    let transport = MockTransport::with_metadata(
        response(&[("update_url", "https://example.com/pkg.zip")]),
        "unreachable",
    );
    let prober = Prober::new(&transport, &metadata_config()).unwrap();

    let resolution = prober.probe(FINGERPRINT).await.unwrap();
    let package = resolution.package().unwrap();
    assert_eq!(package.kind(), &PackageKind::Full);
    assert_eq!(package.metadata(), None);
}
