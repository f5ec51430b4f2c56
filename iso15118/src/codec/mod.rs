//! Wire codec (spec §4.1): typed [`Message`](crate::message::Message) <->
//! EXI bitstream <-> framed V2GTP datagram.
//!
//! This is the single place schema/dialect compatibility is enforced, so
//! the EVCC/SECC state machines can treat messages as plain typed records
//! (spec §4.1 Rationale). `encode`/`decode` are the only entry points;
//! [`v2gtp`] and [`exi`] are kept public so transports and tests can work
//! at the framing or bitstream layer directly when needed (loopback tests,
//! fuzzing).

pub mod exi;
pub mod v2gtp;

use crate::error::{Error, Result};
use crate::message::{Dialect, Message};

/// Serialize `message` to EXI against `dialect`'s grammar and wrap the
/// result in a V2GTP frame with the matching payload-type (spec §4.1).
pub fn encode(message: &Message, dialect: Dialect) -> Result<Vec<u8>> {
    if message.dialect != dialect {
        return Err(Error::Codec(format!(
            "message dialect {:?} does not match requested {dialect:?}",
            message.dialect
        )));
    }
    let body = exi::encode_message(message)?;
    Ok(v2gtp::frame(dialect.payload_type(), &body))
}

/// Unframe a V2GTP datagram and EXI-decode its body against the dialect
/// named by the payload-type (spec §4.1). Rejects version/length mismatch
/// and unknown payload-types before attempting EXI decode.
pub fn decode(bytes: &[u8]) -> Result<(Dialect, Message)> {
    let (payload_type, body) = v2gtp::unframe(bytes)?;
    let dialect = Dialect::from_payload_type(payload_type).ok_or_else(|| {
        Error::Codec(format!("unknown v2gtp payload-type {payload_type:#06x}"))
    })?;
    let message = exi::decode_message(dialect, body)?;
    Ok((dialect, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::*;

    fn sample_message(dialect: Dialect) -> Message {
        Message {
            dialect,
            session_id: Some(SessionId([1, 2, 3, 4, 5, 6, 7, 8])),
            direction: Direction::Request,
            kind: MessageKind::CurrentDemand,
            body: Body::CurrentDemandReq {
                target_current: Power::new(160, -1),
            },
        }
    }

    #[test]
    fn round_trips_through_v2gtp_and_exi() {
        for dialect in [Dialect::Di2, Dialect::Di20] {
            let msg = sample_message(dialect);
            let bytes = encode(&msg, dialect).expect("encode");
            let (decoded_dialect, decoded) = decode(&bytes).expect("decode");
            assert_eq!(decoded_dialect, dialect);
            assert_eq!(decoded.kind(), msg.kind());
            assert_eq!(decoded.session_id, msg.session_id);
        }
    }

    #[test]
    fn rejects_dialect_mismatch_on_encode() {
        let msg = sample_message(Dialect::Di2);
        assert!(encode(&msg, Dialect::Di20).is_err());
    }
}
