//! Client-side authentication sub-machine: service request, then
//! publickey-with-certificate sign-and-present, then success/failure
//! handling.

use crate::error::{Error, Result};
use crate::msg::{self, UserauthFailure};

/// The recognized SSH public-key type tags this client can present.
const KNOWN_KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-ed25519-cert-v01@openssh.com",
];

/// A caller-supplied Ed25519 signing handle. PEM loading and signature
/// production live entirely on the caller's side of this trait: the
/// engine never sees key bytes, only signatures.
pub trait Signer {
    fn sign(&self, data: &[u8]) -> std::result::Result<Vec<u8>, signature::Error>;
}

/// Username, certificate, and signing handle for publickey auth.
pub struct Credentials {
    username: String,
    key_type: String,
    cert_blob: Vec<u8>,
    signer: Box<dyn Signer + Send>,
}

impl Credentials {
    /// Validate `username` is non-empty and `key_type` is a recognized
    /// tag, at construction rather than at use.
    pub fn new(
        username: impl Into<String>,
        key_type: impl Into<String>,
        cert_blob: Vec<u8>,
        signer: Box<dyn Signer + Send>,
    ) -> Result<Self> {
        let username = username.into();
        let key_type = key_type.into();

        if username.is_empty() {
            return Err(Error::Protocol("username must not be empty"));
        }
        if !KNOWN_KEY_TYPES.contains(&key_type.as_str()) {
            return Err(Error::Protocol("unrecognized public-key type"));
        }

        Ok(Self {
            username,
            key_type,
            cert_blob,
            signer,
        })
    }

    fn sig_alg(&self) -> &str {
        if self.key_type.starts_with("ssh-ed25519") {
            "ssh-ed25519"
        } else {
            &self.key_type
        }
    }
}

/// Phase of the auth sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ServiceRequested,
    AwaitingPkOk,
    Signed,
    Complete,
    Failed,
}

/// The auth sub-machine. Holds `received_pk_ok` alongside the phase
/// rather than folding it into the phase enum, since it is an
/// orthogonal flag used only for error-message disambiguation.
pub struct Auth {
    phase: Phase,
    received_pk_ok: bool,
    credentials: Credentials,
}

impl Auth {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            phase: Phase::Init,
            received_pk_ok: false,
            credentials,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Build the `SSH_MSG_SERVICE_REQUEST("ssh-userauth")` payload sent
    /// once KEX completes.
    pub fn start_service_request(&mut self) -> Vec<u8> {
        self.phase = Phase::ServiceRequested;
        msg::build_service_request("ssh-userauth")
    }

    /// Called on `SSH_MSG_SERVICE_ACCEPT("ssh-userauth")`: sign and send
    /// the publickey request with the signature already attached,
    /// skipping the PK_OK round trip a query-form request would need.
    pub fn on_service_accepted(&mut self, session_id: &[u8]) -> Result<Vec<u8>> {
        self.phase = Phase::AwaitingPkOk;
        self.sign_and_build_request(session_id)
    }

    fn sign_and_build_request(&mut self, session_id: &[u8]) -> Result<Vec<u8>> {
        let signed_data = msg::build_publickey_signed_data(
            session_id,
            &self.credentials.username,
            &self.credentials.key_type,
            &self.credentials.cert_blob,
        );

        let signature = self.credentials.signer.sign(&signed_data)?;

        Ok(msg::build_userauth_publickey_request(
            &self.credentials.username,
            &self.credentials.key_type,
            &self.credentials.cert_blob,
            self.credentials.sig_alg(),
            &signature,
        ))
    }

    /// Called when `SSH_MSG_USERAUTH_PK_OK` arrives: the server treated
    /// our first, already-signed request as the query form. Re-sign and
    /// resend.
    pub fn on_pk_ok(&mut self, session_id: &[u8]) -> Result<Vec<u8>> {
        self.received_pk_ok = true;
        self.phase = Phase::Signed;
        self.sign_and_build_request(session_id)
    }

    pub fn on_success(&mut self) {
        self.phase = Phase::Complete;
    }

    pub fn on_failure(&mut self, failure: &UserauthFailure) -> Error {
        let _ = &failure.continue_with;
        self.phase = Phase::Failed;

        Error::AuthError {
            received_pk_ok: self.received_pk_ok,
        }
    }
}
