//! `start-secc`: the SECC entry point (spec §6, §14).
//!
//! Responds to SDP discovery requests on the IPv6 multicast group, then
//! accepts HLC connections on a plain-TCP and (when a TLS identity is
//! configured) a TLS listener, running one [`iso15118::secc::SeccEngine`]
//! per accepted connection. Exit codes follow spec §6: `0` clean
//! termination, `1` configuration error, `2` transport/PKI startup
//! failure, `3` unhandled internal error.

use std::net::SocketAddrV6;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use iso15118::config::Config;
use iso15118::controller::simulated::SimulatedSeccController;
use iso15118::security::{RootKind, TrustStore};
use iso15118::session::SessionStore;
use iso15118::transport::{sdp, stream::tls};

#[derive(Parser, Debug)]
#[command(name = "start-secc")]
#[command(about = "ISO 15118 SECC: charging-station session controller", long_about = None)]
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

    /// EVSE identity string advertised in `SessionSetupRes`.
    #[arg(long, default_value = "EVSE-DE-ISO15118RS-001")]
    evse_id: String,
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

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("start-secc: {e}");
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

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    tracing::info!(
        pki_path = %config.pki_path.display(),
        enforce_tls = config.secc_enforce_tls,
        "starting SECC"
    );

    let trust_store = Arc::new(
        TrustStore::load_from_disk(&config.pki_path)
            .map_err(|e| startup_err(format!("loading PKI trust store: {e}")))?,
    );

    let session_store = build_session_store(&config).await;

    if !config.secc_controller_sim {
        tracing::warn!("no real EVSE controller is available in this build; using the simulator");
    }
    let controller = Arc::new(SimulatedSeccController::new(args.evse_id));

    let plain_listener = TcpListener::bind("[::]:0")
        .await
        .map_err(|e| startup_err(format!("binding plain TCP listener: {e}")))?;
    let plain_port = plain_listener.local_addr().map_err(|e| startup_err(e))?.port();

    let tls_identity = load_tls_identity(&config, &trust_store).map_err(startup_err)?;
    let tls_listener = if tls_identity.is_some() {
        Some(
            TcpListener::bind("[::]:0")
                .await
                .map_err(|e| startup_err(format!("binding TLS listener: {e}")))?,
        )
    } else {
        None
    };
    let tls_port = match &tls_listener {
        Some(l) => Some(l.local_addr().map_err(|e| startup_err(e))?.port()),
        None => None,
    };
    if config.secc_enforce_tls && tls_port.is_none() {
        return Err(config_err(
            "SECC_ENFORCE_TLS is set but no EVSE TLS identity was found under PKI_PATH/evse/",
        ));
    }

    let link_local = sdp::resolve_link_local_address(config.network_interface.as_deref())
        .map_err(startup_err)?;
    let multicast_socket = sdp::bind_multicast_socket(&config)
        .map_err(|e| startup_err(format!("binding SDP multicast socket: {e}")))?;

    tracing::info!(%link_local, plain_port, ?tls_port, "listening");

    let sdp_task = tokio::spawn(run_sdp_responder(
        multicast_socket,
        config.clone(),
        link_local,
        plain_port,
        tls_port,
    ));
    let plain_task = tokio::spawn(accept_plain(
        plain_listener,
        controller.clone(),
        trust_store.clone(),
        session_store.clone(),
    ));
    let tls_task = tls_listener.map(|listener| {
        tokio::spawn(accept_tls(
            listener,
            tls_identity.expect("listener implies identity"),
            controller.clone(),
            trust_store.clone(),
            session_store.clone(),
        ))
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = sdp_task => {
            result.map_err(|e| CliError { code: INTERNAL_ERROR, detail: e.to_string() })?;
        }
        result = plain_task => {
            result.map_err(|e| CliError { code: INTERNAL_ERROR, detail: e.to_string() })?;
        }
    }
    if let Some(t) = tls_task {
        t.abort();
    }
    Ok(())
}

#[cfg(feature = "session-mirror")]
async fn build_session_store(config: &Config) -> SessionStore {
    if let Some(redis) = &config.redis {
        match iso15118::session::SessionMirror::connect(redis).await {
            Ok(mirror) => return SessionStore::with_mirror(mirror),
            Err(e) => tracing::warn!(error = %e, "session mirror unreachable at startup; continuing without it"),
        }
    }
    SessionStore::new()
}

#[cfg(not(feature = "session-mirror"))]
async fn build_session_store(_config: &Config) -> SessionStore {
    SessionStore::new()
}

struct TlsIdentity {
    acceptor: tokio_rustls::TlsAcceptor,
}

fn load_tls_identity(config: &Config, trust_store: &TrustStore) -> Result<Option<TlsIdentity>, iso15118::Error> {
    let cert_path = config.pki_path.join("evse").join("cert.pem");
    let key_path = config.pki_path.join("evse").join("key.pem");
    if !cert_path.is_file() || !key_path.is_file() {
        return Ok(None);
    }
    let (chain, key) = tls::load_identity(&cert_path, &key_path)?;
    let contract_anchors = trust_store.anchors(RootKind::ContractRoot);
    let oem_anchors = trust_store.anchors(RootKind::OemRoot);
    let client_roots = if contract_anchors.is_empty() && oem_anchors.is_empty() {
        None
    } else {
        let mut all = Vec::new();
        all.extend_from_slice(contract_anchors);
        all.extend_from_slice(oem_anchors);
        Some(tls::root_store_from_anchors(&all)?)
    };
    let server_config = tls::secc_server_config(chain, key, client_roots)?;
    Ok(Some(TlsIdentity { acceptor: tokio_rustls::TlsAcceptor::from(server_config) }))
}

async fn run_sdp_responder(
    socket: tokio::net::UdpSocket,
    config: Config,
    link_local: std::net::Ipv6Addr,
    plain_port: u16,
    tls_port: Option<u16>,
) -> Result<(), iso15118::Error> {
    let mut buf = [0u8; 64];
    loop {
        let (len, from) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| iso15118::Error::Transport(format!("SDP recv failed: {e}")))?;
        let request = match sdp::decode_incoming_request(&buf[..len]) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed SDP request");
                continue;
            }
        };
        let response = if config.secc_enforce_tls {
            let port = tls_port.unwrap_or(plain_port);
            sdp::secc_respond(&request, true, SocketAddrV6::new(link_local, port, 0, 0))
        } else {
            match (request.security, tls_port) {
                (sdp::SecurityOption::Tls, Some(port)) => {
                    sdp::secc_respond(&request, false, SocketAddrV6::new(link_local, port, 0, 0))
                }
                _ => sdp::secc_respond(&request, false, SocketAddrV6::new(link_local, plain_port, 0, 0)),
            }
        };
        let bytes = sdp::encode_outgoing_response(response);
        if let Err(e) = socket.send_to(&bytes, from).await {
            tracing::warn!(error = %e, "SDP response send failed");
        }
    }
}

async fn accept_plain(
    listener: TcpListener,
    controller: Arc<SimulatedSeccController>,
    trust_store: Arc<TrustStore>,
    store: SessionStore,
) -> Result<(), iso15118::Error> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| iso15118::Error::Transport(format!("plain TCP accept failed: {e}")))?;
        tracing::debug!(%peer, "accepted plain TCP connection");
        let controller = controller.clone();
        let trust_store = trust_store.clone();
        let store = store.clone();
        tokio::spawn(async move {
            run_session(stream, controller, trust_store, store).await;
        });
    }
}

async fn accept_tls(
    listener: TcpListener,
    identity: TlsIdentity,
    controller: Arc<SimulatedSeccController>,
    trust_store: Arc<TrustStore>,
    store: SessionStore,
) -> Result<(), iso15118::Error> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "TLS accept failed");
                continue;
            }
        };
        let acceptor = identity.acceptor.clone();
        let controller = controller.clone();
        let trust_store = trust_store.clone();
        let store = store.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    tracing::debug!(%peer, "accepted TLS connection");
                    run_session(tls_stream, controller, trust_store, store).await;
                }
                Err(e) => tracing::warn!(%peer, error = %e, "TLS handshake failed"),
            }
        });
    }
}

async fn run_session<S>(
    stream: S,
    controller: Arc<SimulatedSeccController>,
    trust_store: Arc<TrustStore>,
    store: SessionStore,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let engine = iso15118::secc::SeccEngine::new(stream, controller, trust_store, store);
    match engine.run().await {
        Ok(reason) => tracing::info!(?reason, "SECC session ended"),
        Err(e) => iso15118::error::Diagnostic::new(None, "unknown", &e).emit(),
    }
}
