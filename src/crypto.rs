//! Thin adapter over the cryptographic primitives the protocol needs.
//!
//! The primitives themselves (SHA-256, AES-128-CTR, HMAC-SHA-256,
//! X25519, modular exponentiation) are external collaborators — provided
//! here by `sha2`, `aes`+`ctr`, `hmac`, `x25519-dalek` and `num-bigint`
//! respectively, wrapping the RustCrypto traits behind small enums. This
//! module is the seam: nothing above it reaches for a crypto crate
//! directly.

use digest::Digest;
use hmac::Mac;
use num_bigint::BigUint;
use sha2::Sha256;

use crate::error::{Error, Result};

/// SHA-256 over the concatenation of the given byte slices.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }

    hasher.finalize().into()
}

/// HMAC-SHA-256 signature over `seq || data`.
pub fn hmac_sha256_sign(key: &[u8], seq: u32, data: &[u8]) -> [u8; 32] {
    let mut mac =
        hmac::Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&seq.to_be_bytes());
    mac.update(data);

    mac.finalize().into_bytes().into()
}

/// Constant-time HMAC-SHA-256 verification over `seq || data`.
///
/// Uses [`hmac::Mac::verify_slice`], which performs the comparison via
/// [`subtle::ConstantTimeEq`] internally and never short-circuits on
/// the first mismatching byte.
pub fn hmac_sha256_verify(key: &[u8], seq: u32, data: &[u8], tag: &[u8]) -> Result<()> {
    let mut mac =
        hmac::Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&seq.to_be_bytes());
    mac.update(data);

    mac.verify_slice(tag).map_err(|_| Error::MacVerification)
}

/// Stateful AES-128-CTR keystream, continuing the counter across calls
/// so that successive packets are encrypted/decrypted with the correct
/// offset into the keystream.
#[derive(Clone)]
pub struct Aes128Ctr {
    inner: ctr::Ctr128BE<aes::Aes128>,
}

impl Aes128Ctr {
    /// Construct a new keystream from a 16-byte key and a 16-byte IV
    /// (used directly as the initial counter block).
    pub fn new(key: &[u8], iv: &[u8]) -> Self {
        use cipher::KeyIvInit;

        Self {
            inner: ctr::Ctr128BE::<aes::Aes128>::new(key.into(), iv.into()),
        }
    }

    /// XOR `buffer` in place with the next `buffer.len()` keystream bytes,
    /// advancing the counter state.
    pub fn apply(&mut self, buffer: &mut [u8]) {
        use cipher::StreamCipher;

        self.inner
            .apply_keystream(buffer);
    }

    /// Clone the current keystream state, to let a caller peek ahead
    /// (e.g. decrypting the first block to read a length field) without
    /// disturbing the real counter position.
    pub fn clone_state(&self) -> Self {
        self.clone()
    }
}

/// RFC 3526 MODP group 14 (2048-bit) prime, in hex.
const GROUP14_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
    "129024E088A67CC74020BBEA63B139B22514A08798E3404",
    "DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C",
    "245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406",
    "B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE",
    "45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD",
    "24CF5F83655D23DCA3AD961C62F356208552BB9ED529077",
    "096966D670C354E4ABC9804F1746C08CA18217C32905E46",
    "2E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF",
    "06F4C52C9DE2BCBF6955817183995497CEA956AE515D225",
    "6378255FFFFFFFFFFFFFFFFF"
);

const GROUP14_GENERATOR: u64 = 2;

/// DH group-14 prime and generator (RFC 3526), for `diffie-hellman-group14-sha256`.
pub struct Group14 {
    pub prime: BigUint,
    pub generator: BigUint,
}

impl Group14 {
    pub fn new() -> Self {
        Self {
            prime: BigUint::parse_bytes(GROUP14_PRIME_HEX.as_bytes(), 16)
                .expect("hard-coded group-14 prime is valid hex"),
            generator: BigUint::from(GROUP14_GENERATOR),
        }
    }

    /// `base^exp mod self.prime`.
    pub fn mod_pow(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        base.modpow(exp, &self.prime)
    }
}

impl Default for Group14 {
    fn default() -> Self {
        Self::new()
    }
}
