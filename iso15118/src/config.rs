//! Global configuration -- single source of truth for protocol constants
//! and process-scoped settings (spec §6, §12).
//!
//! Mirrors the split the teacher draws in its own `config` module: compile
//! time protocol constants that must never drift live alongside a small
//! immutable runtime record built once from the environment at startup and
//! injected into the engines. There are no mutable globals here.

use std::env;
use std::net::Ipv6Addr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Dialect;

// =======================================================================
// Protocol-fixed constants (ISO 15118-2 / -20, never configurable)
// =======================================================================

/// SDP multicast group: IPv6 all-nodes link-scoped (spec §6).
pub const SDP_MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Fixed UDP port for SDP requests/responses.
pub const SDP_PORT: u16 = 15118;

/// Hop limit used for the SDP multicast datagram.
pub const SDP_HOP_LIMIT: u32 = 255;

/// Initial SDP retry backoff.
pub const SDP_RETRY_INITIAL: Duration = Duration::from_millis(250);

/// Absolute cap on SDP retry backoff.
pub const SDP_RETRY_MAX: Duration = Duration::from_secs(4);

/// Absolute cap on the number of SDP retries before `SDPFailure`.
pub const SDP_RETRY_LIMIT: u32 = 50;

/// V2GTP header: fixed protocol version byte.
pub const V2GTP_VERSION: u8 = 0x01;

/// V2GTP header: fixed inverse-version byte (`!VERSION`).
pub const V2GTP_INVERSE_VERSION: u8 = 0xFE;

/// Dialect-specific timer durations (spec §4.5, §5).
#[derive(Debug, Clone, Copy)]
pub struct DialectTimers {
    pub sequence_timeout: Duration,
    pub ongoing_timeout: Duration,
    pub performance_timeout: Duration,
}

impl DialectTimers {
    pub const fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            // ISO 15118-2 Table 6/7.
            Dialect::Di2 => DialectTimers {
                sequence_timeout: Duration::from_secs(40),
                ongoing_timeout: Duration::from_secs(60),
                performance_timeout: Duration::from_millis(4500),
            },
            // ISO 15118-20 carries the same sequence/performance budget for
            // the common message set; ongoing is extended for the longer
            // DC loop.
            Dialect::Di20 => DialectTimers {
                sequence_timeout: Duration::from_secs(40),
                ongoing_timeout: Duration::from_secs(120),
                performance_timeout: Duration::from_millis(4500),
            },
        }
    }
}

/// Maximum V2GTP frame body length per dialect; exceeding this is a
/// protocol error that closes the connection (spec §4.2, Open Questions).
pub const MAX_FRAME_LEN: u32 = 16 * 1024;

// =======================================================================
// Runtime configuration (env-derived, built once at startup)
// =======================================================================

/// Process-scoped, immutable configuration built once at startup from the
/// environment keys in spec §6 and injected by reference into every
/// engine. Never read from the environment again after construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// `NETWORK_INTERFACE` -- interface bound for SDP and HLC.
    pub network_interface: Option<String>,
    /// `SECC_CONTROLLER_SIM` -- use the simulator controller on the EVSE side.
    pub secc_controller_sim: bool,
    /// `SECC_ENFORCE_TLS` -- refuse SDPs requesting plain TCP.
    pub secc_enforce_tls: bool,
    /// `EVCC_CONTROLLER_SIM` -- use the simulator controller on the EV side.
    pub evcc_controller_sim: bool,
    /// `EVCC_USE_TLS` -- request TLS in the EVCC's SDPRequest.
    pub evcc_use_tls: bool,
    /// `EVCC_ENFORCE_TLS` -- reject any SECC endpoint that is not TLS.
    pub evcc_enforce_tls: bool,
    /// `PKI_PATH` -- filesystem root of certificates and keys.
    pub pki_path: std::path::PathBuf,
    /// `REDIS_HOST`/`REDIS_PORT` -- optional external session-mirror endpoint.
    pub redis: Option<RedisEndpoint>,
    /// `LOG_LEVEL` -- diagnostic verbosity, passed to the tracing subscriber.
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Build configuration from the process environment. Called exactly
    /// once, at startup, by each CLI entry point.
    pub fn from_env() -> Result<Self> {
        let pki_path = env::var("PKI_PATH").unwrap_or_else(|_| "./pki".to_string());
        let redis = match (env::var("REDIS_HOST").ok(), env::var("REDIS_PORT").ok()) {
            (Some(host), port) => {
                let port = port
                    .map(|p| p.parse::<u16>())
                    .transpose()
                    .map_err(|e| Error::Config(format!("REDIS_PORT: {e}")))?
                    .unwrap_or(6379);
                Some(RedisEndpoint { host, port })
            }
            (None, _) => None,
        };

        Ok(Config {
            network_interface: env::var("NETWORK_INTERFACE").ok(),
            secc_controller_sim: env_bool("SECC_CONTROLLER_SIM"),
            secc_enforce_tls: env_bool("SECC_ENFORCE_TLS"),
            evcc_controller_sim: env_bool("EVCC_CONTROLLER_SIM"),
            evcc_use_tls: env_bool("EVCC_USE_TLS"),
            evcc_enforce_tls: env_bool("EVCC_ENFORCE_TLS"),
            pki_path: std::path::PathBuf::from(pki_path),
            redis,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn env_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_timers_differ_for_ongoing() {
        let d2 = DialectTimers::for_dialect(Dialect::Di2);
        let d20 = DialectTimers::for_dialect(Dialect::Di20);
        assert_eq!(d2.sequence_timeout, d20.sequence_timeout);
        assert_ne!(d2.ongoing_timeout, d20.ongoing_timeout);
    }

    #[test]
    fn env_bool_parses_common_truthy_values() {
        std::env::set_var("ISO15118_TEST_BOOL", "true");
        assert!(env_bool("ISO15118_TEST_BOOL"));
        std::env::set_var("ISO15118_TEST_BOOL", "0");
        assert!(!env_bool("ISO15118_TEST_BOOL"));
        std::env::remove_var("ISO15118_TEST_BOOL");
    }
}
