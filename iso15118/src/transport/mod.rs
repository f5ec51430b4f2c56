//! Transport layer (spec §4.2): delivers V2GTP frames across the network.
//!
//! Two channels, matching spec §4.2/§6:
//! - [`sdp`] -- IPv6 link-local UDP multicast bootstrap exchange.
//! - [`stream`] -- the TCP (optionally TLS) byte stream carrying framed
//!   V2GTP datagrams for the HLC session itself.
//!
//! Reads/writes on the stream are always whole V2GTP frames; partial reads
//! are reassembled here before anything reaches the codec (spec §4.2).

pub mod sdp;
pub mod stream;

pub use stream::{tls, FrameReader, FrameWriter};
