//! Key-exchange algorithms: ephemeral keypair generation, shared-secret
//! computation, exchange-hash assembly and session-key derivation.

pub mod curve25519;
pub mod dh14;
pub mod keys;

use crate::codec::{write_bytes, write_string};
use crate::error::{Error, Result};
use crate::msg::KexInitLists;

/// The negotiated key-exchange algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Curve25519Sha256,
    Curve25519Sha256Libssh,
    DiffieHellmanGroup14Sha256,
}

impl Algorithm {
    fn name(self) -> &'static str {
        match self {
            Self::Curve25519Sha256 => "curve25519-sha256",
            Self::Curve25519Sha256Libssh => "curve25519-sha256@libssh.org",
            Self::DiffieHellmanGroup14Sha256 => "diffie-hellman-group14-sha256",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "curve25519-sha256" => Some(Self::Curve25519Sha256),
            "curve25519-sha256@libssh.org" => Some(Self::Curve25519Sha256Libssh),
            "diffie-hellman-group14-sha256" => Some(Self::DiffieHellmanGroup14Sha256),
            _ => None,
        }
    }

    pub fn is_curve25519(self) -> bool {
        matches!(self, Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh)
    }
}

/// The negotiated triple of algorithms for one key-exchange.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub kex: Algorithm,
    pub cipher_client_to_server: &'static str,
    pub cipher_server_to_client: &'static str,
    pub mac_client_to_server: &'static str,
    pub mac_server_to_client: &'static str,
}

const PREFERRED_KEX: &[&str] = &[
    "curve25519-sha256",
    "curve25519-sha256@libssh.org",
    "diffie-hellman-group14-sha256",
];
const PREFERRED_CIPHER: &[&str] = &["aes128-ctr"];
const PREFERRED_MAC: &[&str] = &["hmac-sha2-256-etm@openssh.com", "hmac-sha2-256"];

fn first_few(offered: &[String]) -> String {
    offered.iter().take(4).cloned().collect::<Vec<_>>().join(",")
}

/// Negotiate kex/cipher/mac independently, first-match from our
/// preference intersected with the server's advertisement.
pub fn negotiate(client: &KexInitLists, server: &KexInitLists) -> Result<Negotiated> {
    let kex_name = crate::msg::negotiate(PREFERRED_KEX, &server.kex_algorithms)
        .ok_or_else(|| Error::NoCommonKex(first_few(&server.kex_algorithms)))?;
    let kex = Algorithm::parse(kex_name).expect("negotiated name is one we proposed");

    let cipher_c2s = crate::msg::negotiate(PREFERRED_CIPHER, &server.encryption_client_to_server)
        .ok_or_else(|| Error::NoCommonCipher(first_few(&server.encryption_client_to_server)))?;
    let cipher_s2c = crate::msg::negotiate(PREFERRED_CIPHER, &server.encryption_server_to_client)
        .ok_or_else(|| Error::NoCommonCipher(first_few(&server.encryption_server_to_client)))?;

    let mac_c2s = crate::msg::negotiate(PREFERRED_MAC, &server.mac_client_to_server)
        .ok_or_else(|| Error::NoCommonMac(first_few(&server.mac_client_to_server)))?;
    let mac_s2c = crate::msg::negotiate(PREFERRED_MAC, &server.mac_server_to_client)
        .ok_or_else(|| Error::NoCommonMac(first_few(&server.mac_server_to_client)))?;

    let _ = client;

    Ok(Negotiated {
        kex,
        cipher_client_to_server: cipher_c2s,
        cipher_server_to_client: cipher_s2c,
        mac_client_to_server: mac_c2s,
        mac_server_to_client: mac_s2c,
    })
}

/// Assemble the canonical transcript that gets SHA-256'd into the
/// exchange hash `H`: everything up to and including `mpint(K)`, with
/// `epk` already framed by the caller
/// (`string(q_c) || string(q_s)` for curve25519, `mpint(e) || mpint(f)`
/// for DH group-14).
pub fn exchange_hash_transcript(
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    k_s: &[u8],
    epk: &[u8],
    k_magnitude: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_string(&mut out, v_c);
    write_string(&mut out, v_s);
    write_bytes(&mut out, i_c);
    write_bytes(&mut out, i_s);
    write_bytes(&mut out, k_s);
    out.extend_from_slice(epk);
    crate::codec::write_mpint_from_magnitude(&mut out, k_magnitude);

    out
}
