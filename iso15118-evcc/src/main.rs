//! `start-evcc`: the EVCC entry point (spec §6, §14).
//!
//! Discovers a SECC via SDP, connects over plain TCP or TLS according to
//! the SECC's response, and drives one charging session with
//! [`iso15118::evcc::EvccEngine`] to completion. Exit codes follow spec §6:
//! `0` clean termination, `1` configuration error, `2` transport/PKI
//! startup failure, `3` unhandled internal error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpStream, UdpSocket};

use iso15118::config::Config;
use iso15118::controller::simulated::SimulatedEvccController;
use iso15118::message::Dialect;
use iso15118::security::{RootKind, TrustStore};
use iso15118::transport::{sdp, stream::tls};

#[derive(Parser, Debug)]
#[command(name = "start-evcc")]
#[command(about = "ISO 15118 EVCC: electric-vehicle session controller", long_about = None)]
struct Args {
    /// Network interface bound for SDP and HLC (overrides `NETWORK_INTERFACE`).
    #[arg(long)]
    network_interface: Option<String>,

    /// Filesystem root of certificates and keys (overrides `PKI_PATH`).
    #[arg(long)]
    pki_path: Option<PathBuf>,

    /// Diagnostic verbosity (overrides `LOG_LEVEL`).
    #[arg(long)]
    log_level: Option<String>,

    /// EV identity string advertised in `SessionSetupReq`.
    #[arg(long, default_value = "EVCC-DE-ISO15118RS-001")]
    evcc_id: String,

    /// Starting state of charge, as a fraction in `[0, 1]`.
    #[arg(long, default_value_t = 0.3)]
    start_soc: f64,

    /// Target state of charge, as a fraction in `[0, 1]`.
    #[arg(long, default_value_t = 0.8)]
    target_soc: f64,

    /// Application-layer dialect to negotiate.
    #[arg(long, value_enum, default_value_t = CliDialect::Di20)]
    dialect: CliDialect,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliDialect {
    Di2,
    Di20,
}

impl From<CliDialect> for Dialect {
    fn from(d: CliDialect) -> Self {
        match d {
            CliDialect::Di2 => Dialect::Di2,
            CliDialect::Di20 => Dialect::Di20,
        }
    }
}

/// Exit codes per spec §6.
const CONFIG_ERROR: i32 = 1;
const STARTUP_ERROR: i32 = 2;
const INTERNAL_ERROR: i32 = 3;

/// One error with the exit code spec §6 attaches to its kind.
#[derive(Debug)]
struct CliError {
    code: i32,
    detail: String,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.detail)
    }
}
impl std::error::Error for CliError {}

fn config_err(detail: impl std::fmt::Display) -> CliError {
    CliError { code: CONFIG_ERROR, detail: detail.to_string() }
}
fn startup_err(detail: impl std::fmt::Display) -> CliError {
    CliError { code: STARTUP_ERROR, detail: detail.to_string() }
}
fn internal_err(detail: impl std::fmt::Display) -> CliError {
    CliError { code: INTERNAL_ERROR, detail: detail.to_string() }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("start-evcc: {e}");
            std::process::exit(e.code);
        }
    }
}

async fn run() -> Result<(), CliError> {
    let args = Args::parse();
    let mut config = Config::from_env().map_err(config_err)?;
    if let Some(iface) = args.network_interface {
        config.network_interface = Some(iface);
    }
    if let Some(path) = args.pki_path {
        config.pki_path = path;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if !(0.0..=1.0).contains(&args.start_soc) || !(0.0..=1.0).contains(&args.target_soc) {
        return Err(config_err("--start-soc and --target-soc must lie in [0, 1]"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    tracing::info!(
        pki_path = %config.pki_path.display(),
        use_tls = config.evcc_use_tls,
        "starting EVCC"
    );

    let trust_store = TrustStore::load_from_disk(&config.pki_path)
        .map_err(|e| startup_err(format!("loading PKI trust store: {e}")))?;

    if !config.evcc_controller_sim {
        tracing::warn!("no real EV controller is available in this build; using the simulator");
    }
    let controller = Arc::new(SimulatedEvccController::new(args.evcc_id, args.start_soc, args.target_soc));

    let discovery_socket = UdpSocket::bind("[::]:0")
        .await
        .map_err(|e| startup_err(format!("binding SDP discovery socket: {e}")))?;
    let desired_security =
        if config.evcc_use_tls { sdp::SecurityOption::Tls } else { sdp::SecurityOption::NoTls };
    let request = sdp::SdpRequest { security: desired_security, transport: sdp::TransportOption::Tcp };

    tracing::info!(?desired_security, "broadcasting SDPRequest");
    let response = sdp::evcc_discover(&discovery_socket, request)
        .await
        .map_err(|e| startup_err(format!("SDP discovery failed: {e}")))?;

    let (endpoint, use_tls) = match response {
        sdp::SdpResponse::Endpoint { addr, security } => {
            let tls = security == sdp::SecurityOption::Tls;
            if config.evcc_enforce_tls && !tls {
                return Err(startup_err("EVCC_ENFORCE_TLS is set but the SECC offered only plain TCP"));
            }
            (addr, tls)
        }
        sdp::SdpResponse::Refused => {
            return Err(startup_err("SECC refused the requested security option"));
        }
    };
    tracing::info!(%endpoint, use_tls, "SECC discovered");

    let tcp = TcpStream::connect(std::net::SocketAddr::V6(endpoint))
        .await
        .map_err(|e| startup_err(format!("connecting to SECC at {endpoint}: {e}")))?;

    let dialect: Dialect = args.dialect.into();

    let outcome = if use_tls {
        let connector = build_tls_connector(&config, &trust_store).map_err(startup_err)?;
        let server_name = rustls::pki_types::ServerName::IpAddress((*endpoint.ip()).into());
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| startup_err(format!("TLS handshake with SECC failed: {e}")))?;
        iso15118::evcc::EvccEngine::new(tls_stream, dialect, controller).run(true).await
    } else {
        iso15118::evcc::EvccEngine::new(tcp, dialect, controller).run(false).await
    };

    match outcome {
        Ok(reason) => {
            tracing::info!(?reason, "EVCC session ended");
            Ok(())
        }
        Err(e) => {
            iso15118::error::Diagnostic::new(None, "unknown", &e).emit();
            Err(internal_err(e))
        }
    }
}

/// Build the EVCC-side TLS connector, trusting the `V2gRoot` anchor set
/// (spec §4.7) and presenting the OEM provisioning certificate as client
/// identity when one is on disk, falling back to server-only TLS otherwise.
fn build_tls_connector(config: &Config, trust_store: &TrustStore) -> Result<tokio_rustls::TlsConnector, iso15118::Error> {
    let v2g_anchors = trust_store.anchors(RootKind::V2gRoot);
    let roots = if v2g_anchors.is_empty() {
        let mut store = rustls::RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        store
    } else {
        tls::root_store_from_anchors(v2g_anchors)?
    };

    let cert_path = config.pki_path.join("evcc").join("cert.pem");
    let key_path = config.pki_path.join("evcc").join("key.pem");
    let identity = if cert_path.is_file() && key_path.is_file() {
        Some(tls::load_identity(&cert_path, &key_path)?)
    } else {
        None
    };

    let client_config = tls::evcc_client_config(roots, identity)?;
    Ok(tokio_rustls::TlsConnector::from(client_config))
}
