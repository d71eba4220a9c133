//! Full end-to-end handshake, driving the real client engine against a
//! hand-written stub server built from the same primitive crates
//! (curve25519 KEX, AES-128-CTR, HMAC-SHA-256-ETM), with both sides fed
//! each other's outbound bytes directly in this test's own loop. No
//! network, no async runtime.

use cipher::{KeyIvInit, StreamCipher};
use hmac::Mac;
use sha2::{Digest, Sha256};

use ssh_wire::{ConnectOptions, Connection, Credentials, Phase, Signer, Transport, TransportError};

// ---- minimal big-endian wire primitives, independent of the crate's own
// (private) codec, so this test exercises the wire format rather than
// re-using the implementation under test. ----

fn wu32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn wbytes(out: &mut Vec<u8>, v: &[u8]) {
    wu32(out, v.len() as u32);
    out.extend_from_slice(v);
}

fn wstr(out: &mut Vec<u8>, v: &str) {
    wbytes(out, v.as_bytes());
}

fn ru32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_be_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

fn rbytes<'a>(buf: &'a [u8], off: &mut usize) -> &'a [u8] {
    let len = ru32(buf, off) as usize;
    let v = &buf[*off..*off + len];
    *off += len;
    v
}

fn write_mpint(out: &mut Vec<u8>, magnitude: &[u8]) {
    let first_nonzero = magnitude.iter().position(|&b| b != 0);
    let trimmed = match first_nonzero {
        Some(i) => &magnitude[i..],
        None => &[][..],
    };

    if trimmed.is_empty() {
        wu32(out, 0);
    } else if trimmed[0] & 0x80 != 0 {
        wu32(out, trimmed.len() as u32 + 1);
        out.push(0);
        out.extend_from_slice(trimmed);
    } else {
        wu32(out, trimmed.len() as u32);
        out.extend_from_slice(trimmed);
    }
}

fn build_plain_packet(payload: &[u8]) -> Vec<u8> {
    const BLOCK: usize = 16;
    const MIN_PADDING: usize = 4;

    let l = 5 + payload.len();
    let padding_len = MIN_PADDING + (BLOCK - (l + MIN_PADDING) % BLOCK) % BLOCK;
    let packet_len = 1 + payload.len() + padding_len;

    let mut out = Vec::new();
    wu32(&mut out, packet_len as u32);
    out.push(padding_len as u8);
    out.extend_from_slice(payload);
    out.extend(std::iter::repeat(0u8).take(padding_len));
    out
}

fn parse_plain_packet(buf: &[u8]) -> Option<(Vec<u8>, usize)> {
    if buf.len() < 5 {
        return None;
    }
    let packet_len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + packet_len {
        return None;
    }
    let padding_len = buf[4] as usize;
    let payload_len = packet_len - 1 - padding_len;
    let payload = buf[5..5 + payload_len].to_vec();
    Some((payload, 4 + packet_len))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn exchange_hash(
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    k_s: &[u8],
    q_c: &[u8; 32],
    q_s: &[u8; 32],
    shared: &[u8; 32],
) -> [u8; 32] {
    let mut t = Vec::new();
    wstr(&mut t, v_c);
    wstr(&mut t, v_s);
    wbytes(&mut t, i_c);
    wbytes(&mut t, i_s);
    wbytes(&mut t, k_s);
    wbytes(&mut t, q_c);
    wbytes(&mut t, q_s);
    write_mpint(&mut t, shared);

    let mut hasher = Sha256::new();
    hasher.update(&t);
    hasher.finalize().into()
}

fn derive16(k_mpint: &[u8], h: &[u8], letter: u8, session_id: &[u8]) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(k_mpint);
    hasher.update(h);
    hasher.update([letter]);
    hasher.update(session_id);
    let digest: [u8; 32] = hasher.finalize().into();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn derive32(k_mpint: &[u8], h: &[u8], letter: u8, session_id: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(k_mpint);
    hasher.update(h);
    hasher.update([letter]);
    hasher.update(session_id);
    hasher.finalize().into()
}

fn build_server_kexinit(cookie: &[u8; 16]) -> Vec<u8> {
    let mut out = vec![20u8];
    out.extend_from_slice(cookie);

    const KEX: &str = "curve25519-sha256,curve25519-sha256@libssh.org,diffie-hellman-group14-sha256";
    const HOST_KEY: &str = "ssh-ed25519";
    const CIPHER: &str = "aes128-ctr";
    const MAC: &str = "hmac-sha2-256-etm@openssh.com,hmac-sha2-256";
    const COMPRESSION: &str = "none";

    for list in [KEX, HOST_KEY, CIPHER, CIPHER, MAC, MAC, COMPRESSION, COMPRESSION, "", ""] {
        wstr(&mut out, list);
    }

    out.push(0); // first_kex_packet_follows
    wu32(&mut out, 0); // reserved
    out
}

/// One direction's AES-128-CTR + HMAC-SHA-256 ETM framing, mirroring
/// the wire format the client speaks (RFC 4253 §6, encrypt-then-mac).
struct CipherHalf {
    keystream: ctr::Ctr128BE<aes::Aes128>,
    mac_key: [u8; 32],
    seq: u32,
}

impl CipherHalf {
    fn new(key: &[u8], iv: &[u8], mac_key: [u8; 32]) -> Self {
        Self {
            keystream: ctr::Ctr128BE::<aes::Aes128>::new(key.into(), iv.into()),
            mac_key,
            seq: 3,
        }
    }

    fn encrypt(&mut self, payload: &[u8]) -> Vec<u8> {
        const BLOCK: usize = 16;
        const MIN_PADDING: usize = 4;

        let padding_len = MIN_PADDING + (BLOCK - (1 + payload.len() + MIN_PADDING) % BLOCK) % BLOCK;
        let packet_len = 1 + payload.len() + padding_len;

        let mut plaintext = Vec::new();
        plaintext.push(padding_len as u8);
        plaintext.extend_from_slice(payload);
        plaintext.extend(std::iter::repeat(0u8).take(padding_len));

        let mut length = Vec::new();
        wu32(&mut length, packet_len as u32);

        let mut inner = plaintext;
        self.keystream.apply_keystream(&mut inner);

        let mut framed = length;
        framed.extend_from_slice(&inner);

        let mut mac = hmac::Hmac::<Sha256>::new_from_slice(&self.mac_key).unwrap();
        mac.update(&self.seq.to_be_bytes());
        mac.update(&framed);
        let tag = mac.finalize().into_bytes();

        framed.extend_from_slice(&tag);
        self.seq = self.seq.wrapping_add(1);
        framed
    }

    fn decrypt(&mut self, buf: &[u8]) -> Option<(Vec<u8>, usize)> {
        if buf.len() < 4 + 32 {
            return None;
        }
        let packet_len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        let total = 4 + packet_len + 32;
        if buf.len() < total {
            return None;
        }

        let length = &buf[..4];
        let ciphertext_inner = &buf[4..4 + packet_len];
        let tag = &buf[4 + packet_len..total];

        let mut mac = hmac::Hmac::<Sha256>::new_from_slice(&self.mac_key).unwrap();
        mac.update(&self.seq.to_be_bytes());
        mac.update(length);
        mac.update(ciphertext_inner);
        mac.verify_slice(tag).expect("mac verifies in this controlled test");

        let mut inner = ciphertext_inner.to_vec();
        self.keystream.apply_keystream(&mut inner);

        let padding_len = inner[0] as usize;
        let payload = inner[1..inner.len() - padding_len].to_vec();
        self.seq = self.seq.wrapping_add(1);
        Some((payload, total))
    }
}

/// A permissive SSH server: accepts whatever publickey it's shown,
/// opens the one channel it's asked to, and writes a fixed line of
/// output once the shell request succeeds.
struct StubServer {
    v_c: Option<String>,
    v_s: String,
    ident_buf: Vec<u8>,
    pending: Vec<u8>,
    client_kexinit_raw: Option<Vec<u8>>,
    server_kexinit_raw: Vec<u8>,
    inbound: Option<CipherHalf>,
    outbound: Option<CipherHalf>,
    inbound_encrypted: bool,
    client_channel: Option<u32>,
    window_adjust_seen: Option<u32>,
}

const SERVER_CHANNEL_ID: u32 = 42;

impl StubServer {
    fn new() -> (Self, Vec<u8>) {
        let v_s = "SSH-2.0-teststub".to_string();
        let mut cookie = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut cookie);
        let server_kexinit_raw = build_server_kexinit(&cookie);

        let mut out = Vec::new();
        out.extend_from_slice(format!("{v_s}\r\n").as_bytes());
        out.extend_from_slice(&build_plain_packet(&server_kexinit_raw));

        (
            Self {
                v_c: None,
                v_s,
                ident_buf: Vec::new(),
                pending: Vec::new(),
                client_kexinit_raw: None,
                server_kexinit_raw,
                inbound: None,
                outbound: None,
                inbound_encrypted: false,
                client_channel: None,
                window_adjust_seen: None,
            },
            out,
        )
    }

    fn receive(&mut self, chunk: &[u8]) -> Vec<u8> {
        if self.v_c.is_none() {
            self.ident_buf.extend_from_slice(chunk);

            let Some(pos) = find_subslice(&self.ident_buf, b"SSH-") else {
                return Vec::new();
            };
            let rest = &self.ident_buf[pos..];
            let Some(eol) = rest.iter().position(|&b| b == b'\n') else {
                return Vec::new();
            };
            let line_end = if eol > 0 && rest[eol - 1] == b'\r' { eol - 1 } else { eol };

            self.v_c = Some(String::from_utf8_lossy(&rest[..line_end]).into_owned());
            self.pending = rest[eol + 1..].to_vec();
        } else {
            self.pending.extend_from_slice(chunk);
        }

        let mut out = Vec::new();
        loop {
            let next = if self.inbound_encrypted {
                self.inbound.as_mut().unwrap().decrypt(&self.pending)
            } else {
                parse_plain_packet(&self.pending)
            };

            let Some((payload, consumed)) = next else {
                break;
            };
            self.pending.drain(..consumed);
            out.extend(self.dispatch(&payload));
        }

        out
    }

    fn send_encrypted(&mut self, payload: &[u8]) -> Vec<u8> {
        self.outbound.as_mut().unwrap().encrypt(payload)
    }

    fn dispatch(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();

        match payload[0] {
            20 => {
                // client's SSH_MSG_KEXINIT, cached verbatim for the exchange hash.
                self.client_kexinit_raw = Some(payload.to_vec());
            }
            30 => {
                // SSH_MSG_KEX_ECDH_INIT: byte(30) || string(q_c)
                let mut off = 1;
                let q_c_bytes = rbytes(payload, &mut off).to_vec();
                let mut q_c = [0u8; 32];
                q_c.copy_from_slice(&q_c_bytes);

                let secret = x25519_dalek::EphemeralSecret::random_from_rng(rand::rngs::OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                let q_s = *public.as_bytes();

                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(q_c));
                let shared_bytes = *shared.as_bytes();

                let k_s = b"stub-host-key-blob".to_vec();

                let i_c = self
                    .client_kexinit_raw
                    .clone()
                    .expect("client KEXINIT arrives before KEX_ECDH_INIT");
                let v_c = self.v_c.clone().expect("ident line arrives before KEXINIT");

                let h = exchange_hash(&v_c, &self.v_s, &i_c, &self.server_kexinit_raw, &k_s, &q_c, &q_s, &shared_bytes);

                let mut k_mpint = Vec::new();
                write_mpint(&mut k_mpint, &shared_bytes);

                let c2s_iv = derive16(&k_mpint, &h, b'A', &h);
                let s2c_iv = derive16(&k_mpint, &h, b'B', &h);
                let c2s_key = derive16(&k_mpint, &h, b'C', &h);
                let s2c_key = derive16(&k_mpint, &h, b'D', &h);
                let c2s_mac = derive32(&k_mpint, &h, b'E', &h);
                let s2c_mac = derive32(&k_mpint, &h, b'F', &h);

                self.inbound = Some(CipherHalf::new(&c2s_key, &c2s_iv, c2s_mac));
                self.outbound = Some(CipherHalf::new(&s2c_key, &s2c_iv, s2c_mac));

                // SSH_MSG_KEX_ECDH_REPLY: byte(31) || string(k_s) || string(q_s) || string(sig)
                let mut reply = vec![31u8];
                wbytes(&mut reply, &k_s);
                wbytes(&mut reply, &q_s);
                wbytes(&mut reply, b"stub-signature"); // never verified by this client
                out.extend(build_plain_packet(&reply));

                out.extend(build_plain_packet(&[21u8])); // SSH_MSG_NEWKEYS
            }
            21 => {
                // client's SSH_MSG_NEWKEYS: its next packet is encrypted.
                self.inbound_encrypted = true;
            }
            5 => {
                // SSH_MSG_SERVICE_REQUEST
                let mut off = 1;
                let name = rbytes(payload, &mut off).to_vec();

                let mut reply = vec![6u8]; // SSH_MSG_SERVICE_ACCEPT
                wbytes(&mut reply, &name);
                out.extend(self.send_encrypted(&reply));
            }
            50 => {
                // SSH_MSG_USERAUTH_REQUEST: accept unconditionally (a real
                // server role is out of scope for this client engine).
                out.extend(self.send_encrypted(&[52u8])); // SSH_MSG_USERAUTH_SUCCESS
            }
            90 => {
                // SSH_MSG_CHANNEL_OPEN: byte || string("session") || u32(local_id) || u32(window) || u32(max_packet)
                let mut off = 1;
                let _name = rbytes(payload, &mut off);
                let local_id = ru32(payload, &mut off);
                self.client_channel = Some(local_id);

                let mut reply = vec![91u8]; // SSH_MSG_CHANNEL_OPEN_CONFIRMATION
                wu32(&mut reply, local_id);
                wu32(&mut reply, SERVER_CHANNEL_ID);
                wu32(&mut reply, 0x8000);
                wu32(&mut reply, 0x2000);
                out.extend(self.send_encrypted(&reply));
            }
            98 => {
                // SSH_MSG_CHANNEL_REQUEST
                let mut off = 1;
                let _channel_id = ru32(payload, &mut off);
                let request_name = String::from_utf8(rbytes(payload, &mut off).to_vec()).unwrap();
                let want_reply = payload.get(off).copied().unwrap_or(0) != 0;

                let client_channel = self.client_channel.expect("channel opened before any request");

                if want_reply {
                    let mut reply = vec![99u8]; // SSH_MSG_CHANNEL_SUCCESS
                    wu32(&mut reply, client_channel);
                    out.extend(self.send_encrypted(&reply));
                }

                if request_name == "shell" {
                    let mut data = vec![94u8]; // SSH_MSG_CHANNEL_DATA
                    wu32(&mut data, client_channel);
                    wbytes(&mut data, b"hello");
                    out.extend(self.send_encrypted(&data));
                }
            }
            93 => {
                // SSH_MSG_CHANNEL_WINDOW_ADJUST
                let mut off = 1;
                let _channel_id = ru32(payload, &mut off);
                let n = ru32(payload, &mut off);
                self.window_adjust_seen = Some(n);
            }
            _ => {}
        }

        out
    }
}

struct RecordingTransport {
    outbox: std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl Transport for RecordingTransport {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
        self.outbox.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn ready(&self) -> bool {
        true
    }
}

struct NoopSigner;

impl Signer for NoopSigner {
    fn sign(&self, _data: &[u8]) -> std::result::Result<Vec<u8>, signature::Error> {
        Ok(vec![0u8; 64])
    }
}

#[test]
fn full_handshake_reaches_shell_and_delivers_data() {
    let credentials = Credentials::new("alice", "ssh-ed25519", vec![1, 2, 3], Box::new(NoopSigner)).unwrap();

    let client_outbox = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let transport = RecordingTransport {
        outbox: client_outbox.clone(),
    };

    let mut client = Connection::connect(transport, credentials, ConnectOptions::default()).unwrap();

    let received_data = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received_data.clone();
    client.on_data(move |chunk| received_clone.lock().unwrap().push(chunk));

    let pty_denied = std::sync::Arc::new(std::sync::Mutex::new(false));
    let pty_denied_clone = pty_denied.clone();
    client.on_pty_denied(move || *pty_denied_clone.lock().unwrap() = true);

    let host_key_seen = std::sync::Arc::new(std::sync::Mutex::new(None));
    let host_key_clone = host_key_seen.clone();
    client.on_host_key(move |key| *host_key_clone.lock().unwrap() = Some(key.to_vec()));

    let (mut server, server_initial) = StubServer::new();

    let mut to_server: Vec<Vec<u8>> = std::mem::take(&mut *client_outbox.lock().unwrap());
    let mut to_client: Vec<Vec<u8>> = vec![server_initial];

    for _ in 0..50 {
        if to_client.is_empty() && to_server.is_empty() {
            break;
        }

        for chunk in to_client.drain(..) {
            client.receive(&chunk);
        }
        to_server.extend(std::mem::take(&mut *client_outbox.lock().unwrap()));

        for chunk in to_server.drain(..) {
            let reply = server.receive(&chunk);
            if !reply.is_empty() {
                to_client.push(reply);
            }
        }
    }

    assert_eq!(client.phase(), Phase::Active);
    assert_eq!(*received_data.lock().unwrap(), vec![b"hello".to_vec()]);
    assert_eq!(server.window_adjust_seen, Some(5));
    assert!(!*pty_denied.lock().unwrap());
    assert_eq!(
        host_key_seen.lock().unwrap().as_deref(),
        Some(&b"stub-host-key-blob"[..])
    );
}
