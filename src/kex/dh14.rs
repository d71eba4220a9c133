//! `diffie-hellman-group14-sha256` key-exchange (RFC 3526 MODP group 14).

use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;

use crate::crypto::Group14;
use crate::crypto::sha256;
use crate::error::{Error, Result};

/// An in-flight DH group-14 keypair: the private integer plus its
/// public `e`.
pub struct Ephemeral {
    group: Group14,
    x: BigUint,
    pub e: BigUint,
}

impl Ephemeral {
    /// Generate a private exponent `x` uniformly in `[2, p-2]` and its
    /// public `e = g^x mod p`, regenerating if `e` lands outside
    /// `(1, p-1)`.
    pub fn generate() -> Self {
        let group = Group14::new();
        let lower = BigUint::from(2u32);
        let upper = &group.prime - BigUint::from(2u32);

        loop {
            let x = OsRng.gen_biguint_range(&lower, &upper);
            let e = group.mod_pow(&group.generator, &x);

            if e > BigUint::from(1u32) && e < &group.prime - BigUint::from(1u32) {
                return Self { group, x, e };
            }
        }
    }

    /// Consume the private exponent to compute the shared secret `K = f^x mod p`.
    pub fn shared_secret(self, f: &BigUint) -> Result<BigUint> {
        if f <= &BigUint::from(1u32) || f >= &(&self.group.prime - BigUint::from(1u32)) {
            return Err(Error::KexError("peer DH public value out of range".into()));
        }

        Ok(self.group.mod_pow(f, &self.x))
    }
}

/// Build the `epk` portion of the exchange-hash transcript for DH group-14:
/// `mpint(e) || mpint(f)`.
pub fn epk(e: &BigUint, f: &BigUint) -> Vec<u8> {
    let mut out = Vec::new();
    crate::codec::write_mpint_from_magnitude(&mut out, &e.to_bytes_be());
    crate::codec::write_mpint_from_magnitude(&mut out, &f.to_bytes_be());
    out
}

/// Compute the exchange hash for a completed DH group-14 exchange.
#[allow(clippy::too_many_arguments)]
pub fn exchange_hash(
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    k_s: &[u8],
    e: &BigUint,
    f: &BigUint,
    shared_secret: &BigUint,
) -> [u8; 32] {
    let transcript = super::exchange_hash_transcript(
        v_c,
        v_s,
        i_c,
        i_s,
        k_s,
        &epk(e, f),
        &shared_secret.to_bytes_be(),
    );

    sha256(&[&transcript])
}
