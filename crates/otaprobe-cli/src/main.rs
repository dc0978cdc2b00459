//! otaprobe - Ask Google's checkin service whether an Android build has a pending OTA update
//!
//! Probes a single fingerprint or every device described by YAML configs and
//! prints the offered package, if any.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use config::DeviceConfig;
use futures::stream::{self, StreamExt};
use otaprobe_core::{
    Fingerprint, HttpTransport, OtaPackage, ProbeConfig, Prober, Resolution, RetryPolicy,
    TransportConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Ask Google's checkin service whether an Android build has a pending OTA update
#[derive(Parser, Debug)]
#[command(name = "otaprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Model name reported in the user-agent and output (fingerprint mode)
    #[arg(long)]
    model: Option<String>,

    /// Override the incremental version of every probed build
    #[arg(short, long)]
    incremental: Option<String>,

    /// Overall timeout per probe in seconds, retries included
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Attempts per probe for connection-level failures
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Maximum number of probes in flight
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Read build metadata from the head of every offered package
    #[arg(long)]
    metadata: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single device config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a directory of device configs (*.yml, *.yaml)
    #[arg(short = 'd', long)]
    config_dir: Option<PathBuf>,

    /// Raw build fingerprint to probe
    #[arg(short, long)]
    fingerprint: Option<String>,
}

/// Output format for probe results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON array, one object per probe
    Json,
}

/// One build to probe
#[derive(Debug)]
struct Target {
    model: String,
    variant: Option<String>,
    fingerprint: Fingerprint,
    checkin: Option<ProbeConfig>,
}

/// A finished probe
struct Outcome<'a> {
    target: &'a Target,
    result: otaprobe_core::Result<Resolution>,
}

#[derive(Serialize)]
struct Report<'a> {
    device: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<&'a str>,
    fingerprint: &'a Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'static str>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<&'a OtaPackage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crosses_major_version: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a Outcome<'a>> for Report<'a> {
    fn from(outcome: &'a Outcome<'a>) -> Self {
        let target = outcome.target;
        let (status, package, error) = match &outcome.result {
            Ok(Resolution::Update(pkg)) => ("update", Some(pkg), None),
            Ok(Resolution::NoUpdateAvailable) => ("no_update", None, None),
            Err(e) => ("error", None, Some(e.to_string())),
        };
        Report {
            device: &target.model,
            variant: target.variant.as_deref(),
            fingerprint: &target.fingerprint,
            region: target.fingerprint.region_name(),
            status,
            package,
            crosses_major_version: package.and_then(|p| p.crosses_major_version(&target.fingerprint)),
            error,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let targets = collect_targets(&cli)?;
    if targets.is_empty() {
        bail!("No device configs found");
    }
    info!("Probing {} build(s)", targets.len());

    let base = probe_config(&cli);
    let transport =
        HttpTransport::new(base.transport.clone()).context("Failed to set up HTTP transport")?;

    let outcomes: Vec<Outcome<'_>> = stream::iter(&targets)
        .map(|target| run_probe(&transport, &base, target))
        .buffered(cli.concurrency.max(1))
        .collect()
        .await;

    match cli.format {
        OutputFormat::Text => {
            for outcome in &outcomes {
                print!("{}", render_text(outcome));
            }
        }
        OutputFormat::Json => {
            let reports: Vec<Report<'_>> = outcomes.iter().map(Report::from).collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{} of {} probe(s) failed", failed, outcomes.len());
    }
    Ok(())
}

/// Probe settings shared by every target, from the command line
fn probe_config(cli: &Cli) -> ProbeConfig {
    let transport = TransportConfig::new()
        .timeout(Duration::from_secs(cli.timeout))
        .retry(RetryPolicy::new().max_attempts(cli.retries));
    let mut config = ProbeConfig::new().transport(transport);
    config.metadata.enabled = cli.metadata;
    config
}

/// Whether a device's `checkin:` section sets transport values, which the shared transport ignores
fn overrides_transport(checkin: &ProbeConfig) -> bool {
    checkin.transport != TransportConfig::default()
}

/// Resolves the input mode into the list of builds to probe
fn collect_targets(cli: &Cli) -> Result<Vec<Target>> {
    if let Some(ref raw) = cli.input.fingerprint {
        let fingerprint = Fingerprint::parse(raw).context("Invalid --fingerprint")?;
        let fingerprint = match cli.incremental {
            Some(ref incremental) => with_incremental(&fingerprint, incremental)?,
            None => fingerprint,
        };
        let model = cli
            .model
            .clone()
            .unwrap_or_else(|| fingerprint.device().to_string());
        return Ok(vec![Target {
            model,
            variant: None,
            fingerprint,
            checkin: None,
        }]);
    }

    let configs = if let Some(ref path) = cli.input.config {
        DeviceConfig::load(path)?
    } else if let Some(ref dir) = cli.input.config_dir {
        DeviceConfig::load_dir(dir)?
    } else {
        bail!("One of --config, --config-dir or --fingerprint must be specified")
    };

    configs
        .into_iter()
        .map(|mut config| -> Result<Target> {
            if let Some(ref incremental) = cli.incremental {
                debug!("Overriding incremental for {}: {}", config.label(), incremental);
                config.incremental = incremental.clone();
            }
            let fingerprint = config.fingerprint().with_context(|| {
                format!("Invalid fingerprint in {}", config.source.display())
            })?;
            if config.checkin.as_ref().is_some_and(overrides_transport) {
                warn!(
                    "{}: checkin.transport in {} is ignored; use --timeout and --retries",
                    config.label(),
                    config.source.display()
                );
            }
            if let Some(ref mut checkin) = config.checkin {
                checkin.metadata.enabled |= cli.metadata;
            }
            Ok(Target {
                model: config.model,
                variant: config.variant,
                fingerprint,
                checkin: config.checkin,
            })
        })
        .collect()
}

/// Replaces the incremental segment, keeping build type and tags
fn with_incremental(fingerprint: &Fingerprint, incremental: &str) -> Result<Fingerprint> {
    let raw = format!(
        "{}/{}/{}:{}/{}/{}:{}/{}",
        fingerprint.brand(),
        fingerprint.product(),
        fingerprint.device(),
        fingerprint.release(),
        fingerprint.build_id(),
        incremental,
        fingerprint.build_type(),
        fingerprint.tags()
    );
    Fingerprint::parse(&raw).context("Invalid --incremental")
}

async fn run_probe<'a>(
    transport: &HttpTransport,
    base: &ProbeConfig,
    target: &'a Target,
) -> Outcome<'a> {
    let config = target.checkin.as_ref().unwrap_or(base);
    let result = match Prober::new(transport, config) {
        Ok(prober) => {
            prober
                .probe_fingerprint(&target.fingerprint, Some(&target.model))
                .await
        }
        Err(e) => Err(e),
    };

    match &result {
        Ok(Resolution::Update(pkg)) => info!("{}: update found ({})", target.model, pkg.url()),
        Ok(Resolution::NoUpdateAvailable) => info!("{}: no update", target.model),
        Err(e) if e.is_transient() => warn!("{}: {} (transient)", target.model, e),
        Err(e) => warn!("{}: {}", target.model, e),
    }

    Outcome { target, result }
}

fn render_text(outcome: &Outcome<'_>) -> String {
    let target = outcome.target;
    let mut out = match &target.variant {
        Some(variant) => format!("{} ({})\n", target.model, variant),
        None => format!("{}\n", target.model),
    };
    out.push_str(&format!("  Fingerprint: {}\n", target.fingerprint));
    if let Some(region) = target.fingerprint.region_name() {
        out.push_str(&format!("  Region:      {}\n", region));
    }

    match &outcome.result {
        Ok(Resolution::Update(pkg)) => {
            if let Some(title) = pkg.title() {
                out.push_str(&format!("  Title:       {}\n", title));
            }
            out.push_str(&format!("  Kind:        {}\n", pkg.kind().name()));
            if let Some(target_fp) = pkg.target() {
                out.push_str(&format!("  Target:      {}\n", target_fp));
            }
            if pkg.crosses_major_version(&target.fingerprint) == Some(true) {
                out.push_str("  Note:        major version upgrade\n");
            }
            if let Some(meta) = pkg.metadata() {
                if let Some(ref patch) = meta.post_security_patch_level {
                    out.push_str(&format!("  Patch level: {}\n", patch));
                }
                if let Some(sdk) = meta.post_sdk_level {
                    out.push_str(&format!("  SDK level:   {}\n", sdk));
                }
            }
            if let Some(size) = pkg.size() {
                out.push_str(&format!("  Size:        {} ({} bytes)\n", human_size(size), size));
            }
            if let Some(checksum) = pkg.checksum() {
                out.push_str(&format!("  Checksum:    {}\n", checksum));
            }
            out.push_str(&format!("  URL:         {}\n", pkg.url()));
            if let Some(description) = pkg.description() {
                out.push_str("  Changelog:\n");
                for line in description.lines().filter(|l| !l.trim().is_empty()) {
                    out.push_str(&format!("    {}\n", line.trim()));
                }
            }
        }
        Ok(Resolution::NoUpdateAvailable) => out.push_str("  No update available\n"),
        Err(e) => out.push_str(&format!("  Error:       {}\n", e)),
    }
    out
}

/// Formats a byte count with binary units
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
