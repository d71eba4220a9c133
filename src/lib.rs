//! A client-side SSH-2 wire-protocol engine over a message-oriented byte
//! transport: version exchange, key-exchange (curve25519-sha256 or
//! diffie-hellman-group14-sha256), publickey-certificate authentication,
//! and a single interactive session channel with a pseudo-terminal.
//!
//! The engine is *sans-io*: it owns no socket and spawns no task. It is
//! driven by inbound byte chunks, caller API calls and a clock tick, and
//! produces outbound byte chunks plus delivered events, in the style of
//! `quinn-proto`. See [`client::Connection`] for the entry point.

mod auth;
mod channel;
mod codec;
mod connection;
mod constants;
mod crypto;
mod error;
mod kex;
mod msg;
mod transport_cipher;

pub mod client;

pub use auth::{Credentials, Signer};
pub use client::{ConnectOptions, Connection, Transport, TransportError};
pub use connection::{Event, Phase};
pub use error::{Error, Result};
