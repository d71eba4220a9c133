//! Stateful per-direction transport cipher: AES-128-CTR with
//! HMAC-SHA-256, in both encrypt-then-MAC and MAC-then-encrypt framing.

use secrecy::ExposeSecret;

use crate::constants::{HMAC_SHA256_SIZE, MAX_PACKET_SIZE, MIN_ALIGN, MIN_PADDING};
use crate::crypto::{hmac_sha256_sign, hmac_sha256_verify, Aes128Ctr};
use crate::error::{Error, Result};
use crate::kex::keys::SessionKeys;

/// Whether a direction uses encrypt-then-MAC or MAC-then-encrypt framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    EncryptThenMac,
    MacThenEncrypt,
}

/// One direction (outbound or inbound) of the transport cipher.
pub struct Direction {
    cipher: Aes128Ctr,
    mac_key: secrecy::SecretBox<[u8; 32]>,
    seq: u32,
    mode: MacMode,
}

impl Direction {
    fn new(key: &[u8; 16], iv: &[u8; 16], mac_key: secrecy::SecretBox<[u8; 32]>, mode: MacMode, seq: u32) -> Self {
        Self {
            cipher: Aes128Ctr::new(key, iv),
            mac_key,
            seq,
            mode,
        }
    }
}

/// A pair of directional ciphers, constructed once after the first
/// successful key-exchange and never replaced for the life of the
/// session. Rekeying is out of scope.
pub struct TransportCipher {
    outbound: Direction,
    inbound: Direction,
}

impl TransportCipher {
    /// Construct the transport cipher from derived keys and the
    /// negotiated MAC mode, with both sequence numbers initialized to
    /// [`crate::constants::INITIAL_SEQ_AFTER_HANDSHAKE`].
    pub fn new(keys: SessionKeys, mode: MacMode) -> Self {
        let seq = crate::constants::INITIAL_SEQ_AFTER_HANDSHAKE;

        Self {
            outbound: Direction::new(
                keys.client_to_server_key.expose_secret(),
                keys.client_to_server_iv.expose_secret(),
                keys.client_to_server_mac,
                mode,
                seq,
            ),
            inbound: Direction::new(
                keys.server_to_client_key.expose_secret(),
                keys.server_to_client_iv.expose_secret(),
                keys.server_to_client_mac,
                mode,
                seq,
            ),
        }
    }

    fn padding_length(mode: MacMode, payload_len: usize) -> usize {
        const BLOCK: usize = crate::constants::AES_BLOCK_SIZE;
        let align = BLOCK.max(MIN_ALIGN);

        let l = match mode {
            MacMode::EncryptThenMac => 1 + payload_len,
            MacMode::MacThenEncrypt => 5 + payload_len,
        };

        MIN_PADDING + (align - (l + MIN_PADDING) % align) % align
    }

    /// Encrypt and frame one outbound packet, returning the bytes to
    /// write to the transport.
    pub fn encrypt(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let padding_length = Self::padding_length(self.outbound.mode, payload.len());
        let packet_length = 1 + payload.len() + padding_length;

        let mut plaintext = Vec::with_capacity(4 + packet_length);
        plaintext.extend_from_slice(&(packet_length as u32).to_be_bytes());
        plaintext.push(padding_length as u8);
        plaintext.extend_from_slice(payload);

        let mut padding = vec![0u8; padding_length];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut padding);
        plaintext.extend_from_slice(&padding);

        let seq = self.outbound.seq;
        let out = match self.outbound.mode {
            MacMode::MacThenEncrypt => {
                let mac = hmac_sha256_sign(
                    self.outbound.mac_key.expose_secret(),
                    seq,
                    &plaintext,
                );

                let mut ciphertext = plaintext;
                self.outbound.cipher.apply(&mut ciphertext);

                ciphertext.extend_from_slice(&mac);
                ciphertext
            }
            MacMode::EncryptThenMac => {
                let length = plaintext[..4].to_vec();
                let mut inner = plaintext[4..].to_vec();
                self.outbound.cipher.apply(&mut inner);

                let mut framed = length;
                framed.extend_from_slice(&inner);

                let mac = hmac_sha256_sign(self.outbound.mac_key.expose_secret(), seq, &framed);
                framed.extend_from_slice(&mac);
                framed
            }
        };

        self.outbound.seq = self.outbound.seq.wrapping_add(1);

        Ok(out)
    }

    /// Attempt to decrypt and extract one inbound packet from the front
    /// of `buf`. Returns `Ok(None)` ("NeedMore") when there are not yet
    /// enough bytes to make progress — the inbound sequence number is
    /// *not* advanced in that case.
    pub fn decrypt(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        match self.inbound.mode {
            MacMode::EncryptThenMac => self.decrypt_etm(buf),
            MacMode::MacThenEncrypt => self.decrypt_mte(buf),
        }
    }

    fn decrypt_etm(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        if buf.len() < 4 + HMAC_SHA256_SIZE {
            return Ok(None);
        }

        let packet_length = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        if !(5..=MAX_PACKET_SIZE).contains(&packet_length) {
            return Err(Error::Protocol("packet_length out of range"));
        }

        let total = 4 + packet_length + HMAC_SHA256_SIZE;
        if buf.len() < total {
            return Ok(None);
        }

        let length = &buf[..4];
        let ciphertext_inner = &buf[4..4 + packet_length];
        let mac = &buf[4 + packet_length..total];

        let mut signed = Vec::with_capacity(4 + packet_length);
        signed.extend_from_slice(length);
        signed.extend_from_slice(ciphertext_inner);

        hmac_sha256_verify(self.inbound.mac_key.expose_secret(), self.inbound.seq, &signed, mac)?;

        let mut inner = ciphertext_inner.to_vec();
        self.inbound.cipher.apply(&mut inner);

        let padding_length = inner[0] as usize;
        if !(MIN_PADDING..=255).contains(&padding_length) || padding_length + 1 > inner.len() {
            return Err(Error::Protocol("invalid padding length"));
        }

        let payload = inner[1..inner.len() - padding_length].to_vec();

        self.inbound.seq = self.inbound.seq.wrapping_add(1);

        Ok(Some((payload, total)))
    }

    fn decrypt_mte(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        const BLOCK: usize = crate::constants::AES_BLOCK_SIZE;

        if buf.len() < BLOCK + HMAC_SHA256_SIZE {
            return Ok(None);
        }

        // Peek the packet length by decrypting only the first block,
        // against a scratch copy of the cipher state so we don't
        // advance the real keystream until we know we have the whole
        // packet.
        let mut probe = self.inbound.cipher.clone_state();
        let mut first_block = buf[..BLOCK].to_vec();
        probe.apply(&mut first_block);

        let packet_length = u32::from_be_bytes(first_block[..4].try_into().unwrap()) as usize;
        if !(5..=MAX_PACKET_SIZE).contains(&packet_length) {
            return Err(Error::Protocol("packet_length out of range"));
        }

        let total = 4 + packet_length + HMAC_SHA256_SIZE;
        if buf.len() < total {
            return Ok(None);
        }

        let ciphertext_packet = &buf[..4 + packet_length];
        let mac = &buf[4 + packet_length..total];

        let mut plaintext = ciphertext_packet.to_vec();
        self.inbound.cipher.apply(&mut plaintext);

        hmac_sha256_verify(self.inbound.mac_key.expose_secret(), self.inbound.seq, &plaintext, mac)?;

        let padding_length = plaintext[4] as usize;
        if !(MIN_PADDING..=255).contains(&padding_length)
            || padding_length > packet_length.saturating_sub(1)
        {
            return Err(Error::Protocol("invalid padding length"));
        }

        let payload = plaintext[5..5 + packet_length - 1 - padding_length].to_vec();

        self.inbound.seq = self.inbound.seq.wrapping_add(1);

        Ok(Some((payload, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use secrecy::SecretBox;

    fn keys(seed: u8) -> SessionKeys {
        SessionKeys {
            client_to_server_iv: SecretBox::new(Box::new([seed; 16])),
            server_to_client_iv: SecretBox::new(Box::new([seed.wrapping_add(1); 16])),
            client_to_server_key: SecretBox::new(Box::new([seed.wrapping_add(2); 16])),
            server_to_client_key: SecretBox::new(Box::new([seed.wrapping_add(3); 16])),
            client_to_server_mac: SecretBox::new(Box::new([seed.wrapping_add(4); 32])),
            server_to_client_mac: SecretBox::new(Box::new([seed.wrapping_add(5); 32])),
        }
    }

    /// `TransportCipher::new` always wires `outbound = client_to_server_*`
    /// and `inbound = server_to_client_*`, i.e. it always builds the
    /// *client*-side endpoint. To get the peer endpoint for a round-trip
    /// test, swap the two directions' key material before constructing it.
    fn swapped(keys: SessionKeys) -> SessionKeys {
        SessionKeys {
            client_to_server_iv: keys.server_to_client_iv,
            server_to_client_iv: keys.client_to_server_iv,
            client_to_server_key: keys.server_to_client_key,
            server_to_client_key: keys.client_to_server_key,
            client_to_server_mac: keys.server_to_client_mac,
            server_to_client_mac: keys.client_to_server_mac,
        }
    }

    fn mirror_pair(mode: MacMode) -> (TransportCipher, TransportCipher) {
        let client = TransportCipher::new(keys(9), mode);
        let server = TransportCipher::new(swapped(keys(9)), mode);

        (client, server)
    }

    #[rstest]
    #[case(MacMode::EncryptThenMac)]
    #[case(MacMode::MacThenEncrypt)]
    fn round_trip_in_order(#[case] mode: MacMode) {
        let (mut client, mut server) = mirror_pair(mode);

        for payload in [&b"hello"[..], &b""[..], &vec![0xABu8; 512][..]] {
            let framed = client.encrypt(payload).unwrap();
            let (decrypted, consumed) = server.decrypt(&framed).unwrap().unwrap();

            assert_eq!(decrypted, payload);
            assert_eq!(consumed, framed.len());
        }
    }

    #[rstest]
    #[case(MacMode::EncryptThenMac)]
    #[case(MacMode::MacThenEncrypt)]
    fn tampered_mac_is_rejected(#[case] mode: MacMode) {
        let (mut client, mut server) = mirror_pair(mode);

        let mut framed = client.encrypt(b"hello").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 1;

        let result = server.decrypt(&framed);
        assert!(matches!(result, Err(Error::MacVerification)));
    }

    #[rstest]
    #[case(MacMode::EncryptThenMac)]
    #[case(MacMode::MacThenEncrypt)]
    fn tampered_ciphertext_is_rejected(#[case] mode: MacMode) {
        let (mut client, mut server) = mirror_pair(mode);

        let mut framed = client.encrypt(b"hello world").unwrap();
        framed[6] ^= 1;

        let result = server.decrypt(&framed);
        assert!(matches!(result, Err(Error::MacVerification)));
    }

    #[test]
    fn truncated_buffer_yields_need_more_without_advancing_seq() {
        let (mut client, mut server) = mirror_pair(MacMode::EncryptThenMac);

        let framed = client.encrypt(b"hello").unwrap();
        let result = server.decrypt(&framed[..framed.len() - 1]).unwrap();
        assert!(result.is_none());

        // seq must still be at its initial value; decrypting the full
        // packet afterwards must succeed.
        let (payload, _) = server.decrypt(&framed).unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }
}
