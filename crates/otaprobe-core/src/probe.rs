//! End-to-end probe pipeline: parse, encode, send, decode, resolve.

use crate::config::ProbeConfig;
use crate::error::{NetworkError, Result};
use crate::fingerprint::Fingerprint;
use crate::metadata::{MetadataConfig, METADATA_ENTRY};
use crate::request::{IntentCode, RequestEncoder};
use crate::resolver::{OtaPackage, Resolution, Resolver};
use crate::response::ResponseDecoder;
use crate::transport::Transport;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Runs probes against a caller-owned transport.
///
/// A prober holds no mutable state, so one instance can drive any number of
/// concurrent probes; they share only whatever the transport shares.
///
/// # Example
///
/// ```no_run
/// use otaprobe_core::{HttpTransport, ProbeConfig, Prober};
///
/// # async fn run() -> otaprobe_core::Result<()> {
/// let config = ProbeConfig::default();
/// let transport = HttpTransport::new(config.transport.clone())?;
/// let prober = Prober::new(&transport, &config)?;
///
/// let resolution = prober
///     .probe("google/husky/husky:14/AP1A.240305.019/11445699:user/release-keys")
///     .await?;
/// if let Some(package) = resolution.package() {
///     println!("{}", package.url());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Prober<'a, T: Transport + ?Sized> {
    transport: &'a T,
    endpoint: Url,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    resolver: Resolver,
    metadata: MetadataConfig,
    deadline: Option<Duration>,
    intent: IntentCode,
}

impl<'a, T: Transport + ?Sized> Prober<'a, T> {
    /// Creates a prober after validating `config`
    pub fn new(transport: &'a T, config: &ProbeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            endpoint: config.endpoint_url()?,
            encoder: RequestEncoder::new(config.fields.clone(), config.request.clone()),
            decoder: ResponseDecoder::new(&config.fields),
            resolver: Resolver::new(config.keys.clone()),
            metadata: config.metadata.clone(),
            deadline: None,
            intent: IntentCode::default(),
        })
    }

    /// Bounds each probe's network exchange; the request is dropped when it expires
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the intent sent with every request
    pub fn with_intent(mut self, intent: IntentCode) -> Self {
        self.intent = intent;
        self
    }

    /// Probes a raw fingerprint. Malformed input fails before anything is sent.
    pub async fn probe(&self, raw: &str) -> Result<Resolution> {
        let fingerprint = Fingerprint::parse(raw)?;
        self.probe_fingerprint(&fingerprint, None).await
    }

    /// Probes a parsed fingerprint, reporting `model` in the user-agent when given
    pub async fn probe_fingerprint(
        &self,
        fingerprint: &Fingerprint,
        model: Option<&str>,
    ) -> Result<Resolution> {
        let request = self.encoder.build_with_model(fingerprint, self.intent, model);
        debug!(
            "Probing {} ({} byte request)",
            fingerprint,
            request.payload().len()
        );

        let exchange = self.transport.send(request, &self.endpoint);
        let response = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, exchange)
                .await
                .map_err(|_| NetworkError::Timeout { elapsed: deadline })??,
            None => exchange.await?,
        };

        let decoded = self.decoder.decode(response)?;
        match self.resolver.resolve(&decoded, fingerprint)? {
            Resolution::Update(package) if self.metadata.enabled => {
                Ok(Resolution::Update(self.enrich(package, fingerprint).await?))
            }
            resolution => Ok(resolution),
        }
    }

    /// Reads metadata from the offered package. Lookup failures leave the
    /// package as resolved; metadata naming another source build does not.
    async fn enrich(&self, mut package: OtaPackage, fingerprint: &Fingerprint) -> Result<OtaPackage> {
        let url = match Url::parse(package.url()) {
            Ok(url) => url,
            Err(e) => {
                debug!("Not fetching metadata for '{}': {}", package.url(), e);
                return Ok(package);
            }
        };

        match self
            .transport
            .fetch_metadata(&url, self.metadata.window_bytes)
            .await
        {
            Ok(Some(metadata)) => package.apply_metadata(metadata, fingerprint)?,
            Ok(None) => debug!(
                "No {} within the first {} bytes of {}",
                METADATA_ENTRY, self.metadata.window_bytes, url
            ),
            Err(e) => debug!("Metadata lookup for {} failed: {}", url, e),
        }
        Ok(package)
    }
}
