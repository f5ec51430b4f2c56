//! Error taxonomy shared by every component of the stack (spec §7).
//!
//! Every variant here maps to exactly one of the seven error kinds the
//! protocol distinguishes. Session-fatal variants carry enough context for
//! the single structured diagnostic record a failure emits (`session_id`,
//! `state`, `kind`, `detail`) -- callers attach `session_id`/`state` via
//! `tracing` span fields rather than stuffing them into the error itself.

use std::net::AddrParseError;

use thiserror::Error;

/// The error taxonomy of spec §7. No variant is retried transparently by
/// the core; SDP retrying is the sole exception and is implemented as an
/// explicit loop in [`crate::transport::sdp`], not via error recovery here.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed environment or missing PKI material. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// EXI/V2GTP bitstream malformed or violates the schema grammar.
    /// Session-fatal: close the connection, send no response.
    #[error("codec error: {0}")]
    Codec(String),

    /// Unexpected message, bad session id, or illegal state transition.
    /// The session responds with the appropriate `FAILED_*` code, then
    /// closes.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Certificate chain, signature, or revocation check failed.
    #[error("security error: {0}")]
    Security(#[from] crate::security::SecurityError),

    /// A request/ongoing/performance timer expired before its paired
    /// response arrived.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Socket or TLS failure after the session was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The abstract controller (battery, tariff, authorization oracle)
    /// reported a fault.
    #[error("controller error: {0}")]
    Controller(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The single structured diagnostic record emitted on session failure
/// (spec §7). Never includes a stack trace or raw `Debug` dump -- just the
/// four named fields.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub session_id: Option<String>,
    pub state: String,
    pub kind: &'static str,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(session_id: Option<String>, state: impl Into<String>, err: &Error) -> Self {
        Diagnostic {
            session_id,
            state: state.into(),
            kind: err.kind_name(),
            detail: err.to_string(),
        }
    }

    /// Emit this diagnostic as one structured `tracing::error!` record.
    pub fn emit(&self) {
        tracing::error!(
            session_id = self.session_id.as_deref().unwrap_or("unassigned"),
            state = %self.state,
            kind = self.kind,
            detail = %self.detail,
            "session failure"
        );
    }
}

impl Error {
    /// Stable short name for the error kind, used in diagnostics and in
    /// choosing the `FAILED_*` response code family.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Codec(_) => "CodecError",
            Error::Protocol(_) => "ProtocolError",
            Error::Security(_) => "SecurityError",
            Error::Timeout(_) => "Timeout",
            Error::Transport(_) => "TransportError",
            Error::Controller(_) => "ControllerError",
        }
    }
}
