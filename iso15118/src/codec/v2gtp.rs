//! V2GTP framing (spec §3 "V2GTP frame", §6).
//!
//! Header: `0x01 | 0xFE | payload_type(2B) | length(4B)`, all big-endian;
//! body is the EXI bitstream. Partial reads must be reassembled by the
//! transport before reaching [`unframe`] -- this module only validates and
//! slices a buffer that is already a complete frame.

use crate::config::{MAX_FRAME_LEN, V2GTP_INVERSE_VERSION, V2GTP_VERSION};
use crate::error::{Error, Result};

/// Fixed header length: version + inverse-version + payload-type + length.
pub const HEADER_LEN: usize = 1 + 1 + 2 + 4;

/// SDP request payload-type (spec §6).
pub const PAYLOAD_TYPE_SDP_REQUEST: u16 = 0x8001;
/// SDP response payload-type (spec §6).
pub const PAYLOAD_TYPE_SDP_RESPONSE: u16 = 0x8002;

/// Wrap `body` in a V2GTP frame for `payload_type`.
pub fn frame(payload_type: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(V2GTP_VERSION);
    out.push(V2GTP_INVERSE_VERSION);
    out.extend_from_slice(&payload_type.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Validate and unwrap a complete V2GTP frame, returning its payload-type
/// and body slice. Rejects version/inverse-version mismatch, a length
/// field that disagrees with the actual body, and a body exceeding
/// [`MAX_FRAME_LEN`] (spec §4.2 "a frame exceeding the per-dialect maximum
/// length is a protocol error").
pub fn unframe(bytes: &[u8]) -> Result<(u16, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Codec(format!(
            "frame shorter than header: {} bytes",
            bytes.len()
        )));
    }
    let version = bytes[0];
    let inverse = bytes[1];
    if version != V2GTP_VERSION || inverse != V2GTP_INVERSE_VERSION {
        return Err(Error::Codec(format!(
            "bad v2gtp version/inverse pair: {version:#04x}/{inverse:#04x}"
        )));
    }
    let payload_type = u16::from_be_bytes([bytes[2], bytes[3]]);
    let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if length > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "frame body length {length} exceeds maximum {MAX_FRAME_LEN}"
        )));
    }
    let body = &bytes[HEADER_LEN..];
    if body.len() as u32 != length {
        return Err(Error::Codec(format!(
            "v2gtp length field {length} does not match body of {} bytes",
            body.len()
        )));
    }
    Ok((payload_type, body))
}

/// Read the length a complete frame needs once its header is available,
/// so a transport can know how many more bytes to read before calling
/// [`unframe`] (spec §4.2 "partial reads MUST be reassembled").
pub fn frame_len_from_header(header: &[u8; HEADER_LEN]) -> Result<usize> {
    if header[0] != V2GTP_VERSION || header[1] != V2GTP_INVERSE_VERSION {
        return Err(Error::Codec(format!(
            "bad v2gtp version/inverse pair: {:#04x}/{:#04x}",
            header[0], header[1]
        )));
    }
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if length > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "frame body length {length} exceeds maximum {MAX_FRAME_LEN}"
        )));
    }
    Ok(HEADER_LEN + length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let body = b"hello exi bitstream";
        let framed = frame(0x8101, body);
        let (payload_type, out_body) = unframe(&framed).expect("unframe");
        assert_eq!(payload_type, 0x8101);
        assert_eq!(out_body, body);
    }

    #[test]
    fn rejects_bad_version() {
        let mut framed = frame(0x8101, b"x");
        framed[0] = 0x02;
        assert!(unframe(&framed).is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut framed = frame(0x8101, b"abcd");
        framed[7] = 0xFF; // corrupt length field
        assert!(unframe(&framed).is_err());
    }

    #[test]
    fn rejects_oversized_frame() {
        let header_only_len = (MAX_FRAME_LEN + 1).to_be_bytes();
        let mut bytes = vec![V2GTP_VERSION, V2GTP_INVERSE_VERSION, 0x81, 0x01];
        bytes.extend_from_slice(&header_only_len);
        assert!(unframe(&bytes).is_err());
    }
}
