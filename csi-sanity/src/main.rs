use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use csi_sanity::config::{load_parameters, load_secrets};
use csi_sanity::{Outcome, PluginClients, SanityConfig, ScenarioRunner, SuiteReport, node_suite};
use libcsi::backend::mock::{MockConfig, MockPlugin};
use libcsi::transport::client::CsiClient;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Check a CSI plugin against the node-service contract
#[derive(Parser, Debug)]
#[command(name = "csi-sanity", version)]
struct Cli {
    /// Address of the plugin's QUIC endpoint
    #[arg(
        long,
        env = "CSI_SANITY_ENDPOINT",
        value_name = "ADDR",
        required_unless_present = "self_test"
    )]
    endpoint: Option<SocketAddr>,

    /// TLS server name, must match the plugin certificate
    #[arg(long, env = "CSI_SANITY_SERVER_NAME", default_value = "localhost")]
    server_name: String,

    /// PEM file with the CA that signed the plugin certificate
    #[arg(
        long,
        env = "CSI_SANITY_CA_CERT",
        value_name = "FILE",
        required_unless_present = "self_test"
    )]
    ca_cert: Option<PathBuf>,

    /// Directory the plugin stages volumes at
    #[arg(
        long,
        env = "CSI_SANITY_STAGING_PATH",
        value_name = "DIR",
        default_value = "/tmp/csi-staging"
    )]
    staging_path: String,

    /// Directory the plugin publishes volumes at
    #[arg(
        long,
        env = "CSI_SANITY_TARGET_PATH",
        value_name = "DIR",
        default_value = "/tmp/csi-mount"
    )]
    target_path: String,

    /// YAML file with per-call secrets
    #[arg(long, env = "CSI_SANITY_SECRETS", value_name = "FILE")]
    secrets: Option<PathBuf>,

    /// YAML file with parameters passed to every CreateVolume
    #[arg(long, env = "CSI_SANITY_TEST_VOLUME_PARAMETERS", value_name = "FILE")]
    test_volume_parameters: Option<PathBuf>,

    /// Deadline for each call, e.g. "10s" or "1m"
    #[arg(
        long,
        env = "CSI_SANITY_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    timeout: Duration,

    /// Only run scenarios whose name contains this string
    #[arg(long, env = "CSI_SANITY_FOCUS", value_name = "PATTERN")]
    focus: Option<String>,

    /// Run the suite against the built-in mock plugin
    #[arg(long)]
    self_test: bool,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn client_tls(ca_cert: &Path) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let certs = CertificateDer::pem_file_iter(ca_cert)
        .with_context(|| format!("Failed to read CA certificate: {}", ca_cert.display()))?;
    for cert in certs {
        let cert = cert
            .with_context(|| format!("Failed to parse CA certificate: {}", ca_cert.display()))?;
        roots.add(cert).context("Invalid CA certificate")?;
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .context("TLS 1.3 is unavailable")?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

async fn load_config(cli: &Cli) -> Result<SanityConfig> {
    let mut config = SanityConfig::new(&cli.staging_path, &cli.target_path);
    if let Some(path) = &cli.secrets {
        config.secrets = load_secrets(path).await?;
    }
    if let Some(path) = &cli.test_volume_parameters {
        config.test_volume_parameters = load_parameters(path).await?;
    }
    Ok(config)
}

fn print_report(report: &SuiteReport) {
    for scenario in &report.scenarios {
        let label = scenario.outcome.label();
        match &scenario.outcome {
            Outcome::Passed => println!("{label}  {}", scenario.name),
            Outcome::Failed(e) => println!("{label}  {} [{}] {e}", scenario.name, e.kind()),
            Outcome::Skipped(reason) => println!("{label}  {} ({reason})", scenario.name),
        }
        for failure in &scenario.teardown {
            println!("      teardown: {failure}");
        }
    }
    println!(
        "\n{} passed, {} failed, {} skipped",
        report.passed(),
        report.failed(),
        report.skipped()
    );
    if report.leaked() > 0 {
        println!("{} resource(s) could not be released", report.leaked());
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Arc::new(load_config(&cli).await?);

    let mut suite = node_suite();
    if let Some(focus) = &cli.focus {
        suite.retain(|s| s.name().contains(focus.as_str()));
        if suite.is_empty() {
            bail!("No scenario matches '{focus}'");
        }
    }

    let mut client = None;
    let plugin = if cli.self_test {
        info!("running against the built-in mock plugin");
        PluginClients::from_plugin(Arc::new(MockPlugin::new(MockConfig::default())))
    } else {
        let (Some(endpoint), Some(ca_cert)) = (cli.endpoint, cli.ca_cert.as_deref()) else {
            bail!("--endpoint and --ca-cert are required unless --self-test is set");
        };
        let tls = client_tls(ca_cert)?;
        let connected = Arc::new(
            CsiClient::connect(endpoint, &cli.server_name, tls, cli.timeout)
                .await
                .with_context(|| format!("Failed to connect to plugin at {endpoint}"))?,
        );
        client = Some(Arc::clone(&connected));
        PluginClients::from_plugin(connected)
    };

    config
        .create_mount_locations()
        .await
        .context("Failed to prepare mount locations")?;

    let runner = ScenarioRunner::new(plugin, Arc::clone(&config));
    info!(run = runner.run_token(), scenarios = suite.len(), "starting suite");
    let report = runner.run_all(&suite).await;

    config.remove_mount_locations().await;
    if let Some(client) = client {
        client.close();
    }

    print_report(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
