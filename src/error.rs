//! Collection of error handling types and aliases.

use thiserror::Error;

/// The error types that can occur when driving a [`crate::client::Connection`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// No common key-exchange algorithm between client and server.
    #[error("unable to negotiate a common kex algorithm, server offered: {0}")]
    NoCommonKex(String),

    /// No common cipher algorithm between client and server.
    #[error("unable to negotiate a common cipher algorithm, server offered: {0}")]
    NoCommonCipher(String),

    /// No common MAC algorithm between client and server.
    #[error("unable to negotiate a common mac algorithm, server offered: {0}")]
    NoCommonMac(String),

    /// The server's KEXINIT payload was structurally invalid.
    #[error("malformed KEXINIT payload from server")]
    MalformedKexInit,

    /// The key-exchange round-trip did not complete within the configured timeout.
    #[error("key-exchange timed out")]
    KexTimeout,

    /// Generic key-exchange failure (bad ephemeral public, bad signature, ...).
    #[error("key-exchange failed: {0}")]
    KexError(String),

    /// `USERAUTH_FAILURE` was received from the server.
    #[error("authentication failed: {}", if *received_pk_ok {
        "server rejected the signature"
    } else {
        "server rejected the public key"
    })]
    AuthError {
        /// Whether the server had already replied `PK_OK` for this key
        /// before rejecting it (distinguishes "bad key" from "bad signature").
        received_pk_ok: bool,
    },

    /// Inbound MAC verification failed; this is always fatal, never retried.
    #[error("MAC verification failed")]
    MacVerification,

    /// A structural protocol error (bad lengths, bad padding, ...).
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A pure decoder hit a structural error that cannot be `NeedMore`.
    #[error("failed to parse a wire value: {0}")]
    Parse(&'static str),

    /// The server refused to open the session channel.
    #[error("channel open failed: {0}")]
    Channel(String),

    /// The underlying byte transport closed unexpectedly.
    #[error("the underlying transport closed unexpectedly")]
    TransportClosed,

    /// The underlying byte transport refused to send (not ready / already closed).
    #[error("the underlying transport is not ready to send")]
    TransportNotReady,

    /// Failure while signing the authentication request with the caller-supplied signer.
    #[error(transparent)]
    Signature(#[from] signature::Error),
}

/// A handy [`std::result::Result`] type alias bounding the [`Error`] enum as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
