//! SDP (SECC Discovery Protocol) engine (spec §4.3, §6).
//!
//! EVCC broadcasts an [`SdpRequest`] on the IPv6 all-nodes link-scoped
//! multicast group and retries with capped backoff until a response
//! arrives or the retry budget is exhausted. SECC answers every
//! well-formed request, replying with a refusal payload rather than
//! silently dropping it when policy forbids the requested security.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::{Config, SDP_HOP_LIMIT, SDP_MULTICAST_ADDR, SDP_PORT, SDP_RETRY_INITIAL, SDP_RETRY_LIMIT, SDP_RETRY_MAX};
use crate::error::{Error, Result};

/// Security option requested in an [`SdpRequest`] / offered in an
/// [`SdpResponse`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOption {
    Tls,
    NoTls,
}

/// Transport option requested; ISO 15118 names only TCP today (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOption {
    Tcp,
}

/// Fixed-size EVCC -> SECC discovery datagram (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpRequest {
    pub security: SecurityOption,
    pub transport: TransportOption,
}

/// SECC -> EVCC discovery reply: either the TCP endpoint to connect to, or
/// a refusal when the requested security does not meet local policy
/// (spec §4.3 "it never silently drops").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpResponse {
    Endpoint { addr: SocketAddrV6, security: SecurityOption },
    Refused,
}

const REQUEST_BODY_LEN: usize = 2;
const RESPONSE_BODY_LEN: usize = 1 + 16 + 2 + 1;

fn encode_request(req: SdpRequest) -> Vec<u8> {
    let security = match req.security {
        SecurityOption::Tls => 1u8,
        SecurityOption::NoTls => 0u8,
    };
    let transport = match req.transport {
        TransportOption::Tcp => 0u8,
    };
    crate::codec::v2gtp::frame(
        crate::codec::v2gtp::PAYLOAD_TYPE_SDP_REQUEST,
        &[security, transport],
    )
}

fn decode_request(bytes: &[u8]) -> Result<SdpRequest> {
    let (payload_type, body) = crate::codec::v2gtp::unframe(bytes)?;
    if payload_type != crate::codec::v2gtp::PAYLOAD_TYPE_SDP_REQUEST {
        return Err(Error::Codec(format!("not an SDP request: {payload_type:#06x}")));
    }
    if body.len() != REQUEST_BODY_LEN {
        return Err(Error::Codec(format!("bad SDP request length {}", body.len())));
    }
    let security = if body[0] == 1 { SecurityOption::Tls } else { SecurityOption::NoTls };
    Ok(SdpRequest { security, transport: TransportOption::Tcp })
}

fn encode_response(res: SdpResponse) -> Vec<u8> {
    let mut body = Vec::with_capacity(RESPONSE_BODY_LEN);
    match res {
        SdpResponse::Endpoint { addr, security } => {
            body.push(0);
            body.extend_from_slice(&addr.ip().octets());
            body.extend_from_slice(&addr.port().to_be_bytes());
            body.push(match security {
                SecurityOption::Tls => 1,
                SecurityOption::NoTls => 0,
            });
        }
        SdpResponse::Refused => {
            body.push(1);
            body.extend(std::iter::repeat(0u8).take(RESPONSE_BODY_LEN - 1));
        }
    }
    crate::codec::v2gtp::frame(crate::codec::v2gtp::PAYLOAD_TYPE_SDP_RESPONSE, &body)
}

fn decode_response(bytes: &[u8]) -> Result<SdpResponse> {
    let (payload_type, body) = crate::codec::v2gtp::unframe(bytes)?;
    if payload_type != crate::codec::v2gtp::PAYLOAD_TYPE_SDP_RESPONSE {
        return Err(Error::Codec(format!("not an SDP response: {payload_type:#06x}")));
    }
    if body.len() != RESPONSE_BODY_LEN {
        return Err(Error::Codec(format!("bad SDP response length {}", body.len())));
    }
    if body[0] == 1 {
        return Ok(SdpResponse::Refused);
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&body[1..17]);
    let port = u16::from_be_bytes([body[17], body[18]]);
    let security = if body[19] == 1 { SecurityOption::Tls } else { SecurityOption::NoTls };
    Ok(SdpResponse::Endpoint { addr: SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0), security })
}

/// Build and bind the IPv6 multicast UDP socket used for SDP, joining the
/// all-nodes link-scoped group and setting the mandated hop limit (spec §6).
pub fn bind_multicast_socket(config: &Config) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::Transport(format!("socket() failed: {e}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::Transport(format!("SO_REUSEADDR failed: {e}")))?;
    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, SDP_PORT, 0, 0);
    socket
        .bind(&bind_addr.into())
        .map_err(|e| Error::Transport(format!("bind failed: {e}")))?;

    let interface_index = config
        .network_interface
        .as_deref()
        .and_then(interface_index_by_name)
        .unwrap_or(0);
    socket
        .join_multicast_v6(&SDP_MULTICAST_ADDR, interface_index)
        .map_err(|e| Error::Transport(format!("join_multicast_v6 failed: {e}")))?;
    socket
        .set_multicast_hops_v6(SDP_HOP_LIMIT)
        .map_err(|e| Error::Transport(format!("set_multicast_hops_v6 failed: {e}")))?;
    socket
        .set_unicast_hops_v6(SDP_HOP_LIMIT)
        .map_err(|e| Error::Transport(format!("set_unicast_hops_v6 failed: {e}")))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| Error::Transport(format!("set_nonblocking failed: {e}")))?;
    UdpSocket::from_std(socket.into())
        .map_err(|e| Error::Transport(format!("tokio UdpSocket::from_std failed: {e}")))
}

/// Best-effort resolution of the link-local IPv6 address to advertise in
/// an [`SdpResponse`] (spec §6 "interface bound for SDP and HLC"). Prefers
/// the named interface's link-local (`fe80::/10`) address; falls back to
/// any link-local address on the host, then loopback for single-host
/// testing without a real link-local network.
pub fn resolve_link_local_address(interface: Option<&str>) -> Result<Ipv6Addr> {
    let netifas = local_ip_address::list_afinet_netifas()
        .map_err(|e| Error::Transport(format!("enumerating network interfaces: {e}")))?;

    let is_link_local = |ip: &std::net::IpAddr| matches!(ip, std::net::IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80);

    if let Some(name) = interface {
        if let Some((_, addr)) = netifas.iter().find(|(n, ip)| n == name && is_link_local(ip)) {
            if let std::net::IpAddr::V6(v6) = addr {
                return Ok(*v6);
            }
        }
    }
    if let Some((_, addr)) = netifas.iter().find(|(_, ip)| is_link_local(ip)) {
        if let std::net::IpAddr::V6(v6) = addr {
            return Ok(*v6);
        }
    }
    Ok(Ipv6Addr::LOCALHOST)
}

fn interface_index_by_name(name: &str) -> Option<u32> {
    // Best-effort: platform-specific resolution is left to the caller's OS;
    // interface 0 (any) is used when the name cannot be resolved.
    #[cfg(unix)]
    {
        use std::ffi::CString;
        let c_name = CString::new(name).ok()?;
        // SAFETY: if_nametoindex is a pure libc lookup with no side effects
        // beyond reading the kernel's interface table.
        let idx = unsafe { libc_if_nametoindex(c_name.as_ptr()) };
        if idx == 0 {
            None
        } else {
            Some(idx)
        }
    }
    #[cfg(not(unix))]
    {
        let _ = name;
        None
    }
}

#[cfg(unix)]
extern "C" {
    #[link_name = "if_nametoindex"]
    fn libc_if_nametoindex(ifname: *const std::os::raw::c_char) -> u32;
}

/// EVCC side: broadcast [`SdpRequest`] and retry with capped backoff (spec
/// §4.3: initial 250ms, capped backoff, 50 retries absolute) until a
/// response arrives or the budget is exhausted (`SDPFailure`).
pub async fn evcc_discover(socket: &UdpSocket, desired: SdpRequest) -> Result<SdpResponse> {
    let dest = SocketAddr::from(SocketAddrV6::new(SDP_MULTICAST_ADDR, SDP_PORT, 0, 0));
    let mut backoff = SDP_RETRY_INITIAL;
    let datagram = encode_request(desired);

    for attempt in 0..SDP_RETRY_LIMIT {
        socket
            .send_to(&datagram, dest)
            .await
            .map_err(|e| Error::Transport(format!("SDP send failed: {e}")))?;
        tracing::debug!(attempt, "sent SDPRequest");

        let mut buf = [0u8; 64];
        match timeout(backoff, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _from))) => {
                return decode_response(&buf[..len]);
            }
            Ok(Err(e)) => return Err(Error::Transport(format!("SDP recv failed: {e}"))),
            Err(_elapsed) => {
                backoff = std::cmp::min(backoff * 2, SDP_RETRY_MAX);
                continue;
            }
        }
    }
    Err(Error::Transport("SDPFailure: exhausted retry budget".to_string()))
}

/// SECC side: respond to one well-formed SDP request with `endpoint`, or
/// with [`SdpResponse::Refused`] if `enforce_tls` is set and the request
/// asked for plain TCP (spec §4.3).
pub fn secc_respond(req: &SdpRequest, enforce_tls: bool, endpoint: SocketAddrV6) -> SdpResponse {
    if enforce_tls && req.security == SecurityOption::NoTls {
        return SdpResponse::Refused;
    }
    SdpResponse::Endpoint { addr: endpoint, security: req.security }
}

/// Decode a raw datagram received on the SECC's multicast socket.
pub fn decode_incoming_request(bytes: &[u8]) -> Result<SdpRequest> {
    decode_request(bytes)
}

/// Encode a response for sending back to the requester's unicast address.
pub fn encode_outgoing_response(res: SdpResponse) -> Vec<u8> {
    encode_response(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = SdpRequest { security: SecurityOption::Tls, transport: TransportOption::Tcp };
        let bytes = encode_request(req);
        assert_eq!(decode_request(&bytes).unwrap(), req);
    }

    #[test]
    fn response_round_trips_endpoint() {
        let addr = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 61851, 0, 0);
        let res = SdpResponse::Endpoint { addr, security: SecurityOption::NoTls };
        let bytes = encode_response(res);
        assert_eq!(decode_response(&bytes).unwrap(), res);
    }

    #[test]
    fn response_round_trips_refused() {
        let bytes = encode_response(SdpResponse::Refused);
        assert_eq!(decode_response(&bytes).unwrap(), SdpResponse::Refused);
    }

    #[test]
    fn secc_refuses_plain_tcp_when_tls_enforced() {
        let req = SdpRequest { security: SecurityOption::NoTls, transport: TransportOption::Tcp };
        let endpoint = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 61851, 0, 0);
        assert_eq!(secc_respond(&req, true, endpoint), SdpResponse::Refused);
    }

    #[test]
    fn secc_grants_when_tls_not_enforced() {
        let req = SdpRequest { security: SecurityOption::NoTls, transport: TransportOption::Tcp };
        let endpoint = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 61851, 0, 0);
        assert!(matches!(secc_respond(&req, false, endpoint), SdpResponse::Endpoint { .. }));
    }
}
