//! RFC 4253 §7.2 key derivation (one-block form: sufficient since all
//! six derived values here fit in a single SHA-256 output).

use secrecy::SecretBox;

use crate::codec::write_mpint_from_magnitude;
use crate::crypto::sha256;

/// The six session keys/IVs derived from a single key-exchange.
pub struct SessionKeys {
    pub client_to_server_iv: SecretBox<[u8; 16]>,
    pub server_to_client_iv: SecretBox<[u8; 16]>,
    pub client_to_server_key: SecretBox<[u8; 16]>,
    pub server_to_client_key: SecretBox<[u8; 16]>,
    pub client_to_server_mac: SecretBox<[u8; 32]>,
    pub server_to_client_mac: SecretBox<[u8; 32]>,
}

fn derive16(k_mpint: &[u8], h: &[u8], letter: u8, session_id: &[u8]) -> [u8; 16] {
    let digest = sha256(&[k_mpint, h, &[letter], session_id]);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn derive32(k_mpint: &[u8], h: &[u8], letter: u8, session_id: &[u8]) -> [u8; 32] {
    sha256(&[k_mpint, h, &[letter], session_id])
}

/// Derive all six session keys from the shared secret magnitude `k`
/// (big-endian, as produced by the X25519 or DH group-14 exchange),
/// the exchange hash `h`, and the (possibly just-established) `session_id`.
pub fn derive(k: &[u8], h: &[u8], session_id: &[u8]) -> SessionKeys {
    let mut k_mpint = Vec::new();
    write_mpint_from_magnitude(&mut k_mpint, k);

    SessionKeys {
        client_to_server_iv: SecretBox::new(Box::new(derive16(&k_mpint, h, b'A', session_id))),
        server_to_client_iv: SecretBox::new(Box::new(derive16(&k_mpint, h, b'B', session_id))),
        client_to_server_key: SecretBox::new(Box::new(derive16(&k_mpint, h, b'C', session_id))),
        server_to_client_key: SecretBox::new(Box::new(derive16(&k_mpint, h, b'D', session_id))),
        client_to_server_mac: SecretBox::new(Box::new(derive32(&k_mpint, h, b'E', session_id))),
        server_to_client_mac: SecretBox::new(Box::new(derive32(&k_mpint, h, b'F', session_id))),
    }
}
