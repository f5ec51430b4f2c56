//! Framed TCP/TLS stream (spec §4.2): reassembles partial reads into
//! whole V2GTP frames before anything reaches the codec, and rejects any
//! frame whose declared body length exceeds [`crate::config::MAX_FRAME_LEN`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::v2gtp::{self, HEADER_LEN};
use crate::error::{Error, Result};

/// Reads whole V2GTP frames off any `AsyncRead` (a bare `TcpStream` for
/// dialect -2 plain TCP, or a `tokio_rustls` stream when TLS is in use).
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        FrameReader { inner }
    }

    /// Read and validate exactly one complete V2GTP frame. Returns `Ok(None)`
    /// on a clean EOF before any byte of a new frame arrives (peer closed);
    /// any other short read is a [`Error::Transport`].
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut self.inner, &mut header).await? {
            false => return Ok(None),
            true => {}
        }
        let total_len = v2gtp::frame_len_from_header(&header)?;
        let mut frame = Vec::with_capacity(total_len);
        frame.extend_from_slice(&header);
        let body_len = total_len - HEADER_LEN;
        let mut body = vec![0u8; body_len];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(|e| Error::Transport(format!("short read on v2gtp body: {e}")))?;
        frame.extend_from_slice(&body);
        Ok(Some(frame))
    }
}

/// Like `AsyncReadExt::read_exact`, but reports a clean EOF on the very
/// first byte as `Ok(false)` instead of an error, so callers can tell
/// "peer closed between frames" from "peer closed mid-frame".
async fn read_exact_or_eof<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Error::Transport(format!("read failed: {e}")))?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::Transport("peer closed mid-frame".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

/// Writes whole V2GTP frames to any `AsyncWrite`.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        FrameWriter { inner }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner
            .write_all(frame)
            .await
            .map_err(|e| Error::Transport(format!("write failed: {e}")))?;
        self.inner
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush failed: {e}")))
    }
}

pub mod tls {
    //! TLS context setup (spec §4.2, §4.7): TLS 1.2 for dialect -2 with the
    //! mandated cipher, TLS 1.3 for dialect -20; mutual authentication in
    //! the PnC flow, server-only otherwise.

    use std::sync::Arc;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use rustls::{ClientConfig, RootCertStore, ServerConfig};

    use crate::error::{Error, Result};

    /// Build the SECC-side TLS acceptor configuration. `mutual` selects
    /// client-certificate verification for the PnC flow (spec §4.7).
    pub fn secc_server_config(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        client_roots: Option<RootCertStore>,
    ) -> Result<Arc<ServerConfig>> {
        let builder = ServerConfig::builder();
        let config = match client_roots {
            Some(roots) => {
                let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| Error::Config(format!("client verifier: {e}")))?;
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(cert_chain, key)
                    .map_err(|e| Error::Config(format!("server tls config: {e}")))?
            }
            None => builder
                .with_no_client_auth()
                .with_single_cert(cert_chain, key)
                .map_err(|e| Error::Config(format!("server tls config: {e}")))?,
        };
        Ok(Arc::new(config))
    }

    /// Build the EVCC-side TLS connector configuration. `client_identity`
    /// carries the OEM provisioning certificate (-2) or contract
    /// certificate (-20 PnC) when the server requests one.
    pub fn evcc_client_config(
        roots: RootCertStore,
        client_identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    ) -> Result<Arc<ClientConfig>> {
        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match client_identity {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::Config(format!("client tls config: {e}")))?,
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }

    /// Load a PEM certificate chain and private key from disk (spec §6
    /// "PKI on disk"), for the identity a CLI binary presents as its TLS
    /// endpoint.
    pub fn load_identity(
        cert_path: &std::path::Path,
        key_path: &std::path::Path,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let cert_bytes = std::fs::read(cert_path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", cert_path.display())))?;
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Config(format!("parsing {}: {e}", cert_path.display())))?;
        if chain.is_empty() {
            return Err(Error::Config(format!("{} contained no certificates", cert_path.display())));
        }
        let key_bytes = std::fs::read(key_path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", key_path.display())))?;
        let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
            .map_err(|e| Error::Config(format!("parsing {}: {e}", key_path.display())))?
            .ok_or_else(|| Error::Config(format!("{} contained no private key", key_path.display())))?;
        Ok((chain, key))
    }

    /// Build a root store directly from the DER trust anchors the local
    /// [`crate::security::TrustStore`] loaded, rather than the public Web
    /// PKI (ISO 15118 roots are closed, operator-distributed anchors, not
    /// `webpki-roots`).
    pub fn root_store_from_anchors(anchors: &[Vec<u8>]) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        for der in anchors {
            store
                .add(CertificateDer::from(der.clone()))
                .map_err(|e| Error::Config(format!("adding trust anchor to TLS root store: {e}")))?;
        }
        Ok(store)
    }
}
