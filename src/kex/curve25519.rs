//! `curve25519-sha256` / `curve25519-sha256@libssh.org` key-exchange.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::codec::write_bytes;
use crate::crypto::sha256;
use crate::error::{Error, Result};

/// An in-flight X25519 ephemeral keypair, held for the lifetime of one
/// key-exchange: the private key handle plus its 32-byte public `qc`.
pub struct Ephemeral {
    secret: EphemeralSecret,
    pub public: [u8; 32],
}

impl Ephemeral {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        Self {
            secret,
            public: *public.as_bytes(),
        }
    }

    /// Consume the ephemeral secret to compute the shared secret with
    /// the peer's public value.
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<[u8; 32]> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| Error::KexError("peer ephemeral public is not 32 bytes".into()))?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));

        Ok(*shared.as_bytes())
    }
}

/// Build the `epk` portion of the exchange-hash transcript for curve25519:
/// `string(q_c) || string(q_s)`.
pub fn epk(q_c: &[u8; 32], q_s: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_bytes(&mut out, q_c);
    write_bytes(&mut out, q_s);
    out
}

/// Compute the exchange hash for a completed curve25519 exchange.
#[allow(clippy::too_many_arguments)]
pub fn exchange_hash(
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    k_s: &[u8],
    q_c: &[u8; 32],
    q_s: &[u8],
    shared_secret: &[u8; 32],
) -> [u8; 32] {
    let transcript = super::exchange_hash_transcript(
        v_c,
        v_s,
        i_c,
        i_s,
        k_s,
        &epk(q_c, q_s),
        shared_secret,
    );

    sha256(&[&transcript])
}
