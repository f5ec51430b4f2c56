//! ISO 15118 high-level communication core.
//!
//! This crate is the shared engine both CLI binaries (`iso15118-secc`,
//! `iso15118-evcc`) link against: the wire [`codec`], [`transport`], SDP
//! bootstrap, [`security`]/PKI, the [`router`], and the EVCC/SECC
//! [`evcc`]/[`secc`] session state machines. The physical world (battery,
//! tariff, authorization oracle) is reached only through the abstract
//! [`controller`] traits; this crate ships a deterministic
//! [`controller::simulated`] pair as the sole in-tree implementation.
//!
//! See the crate's `config` module for the environment-derived
//! [`config::Config`] every engine is constructed from, and `error` for
//! the shared [`error::Error`] taxonomy every fallible operation returns.

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod evcc;
pub mod message;
pub mod router;
pub mod secc;
pub mod security;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
