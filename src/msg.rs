//! SSH message-type constants (RFC 4250 §4.1) and typed payload
//! encode/decode helpers for the subset of messages this client sends
//! or must understand (RFC 4252/4253/4254).

use crate::codec::{
    read_bytes, read_string, read_u32, write_bytes, write_name_list, write_string, write_u32,
};
use crate::error::{Error, Result};

// Transport layer generic (RFC 4253 §12)
pub const DISCONNECT: u8 = 1;
pub const IGNORE: u8 = 2;
pub const UNIMPLEMENTED: u8 = 3;
pub const DEBUG: u8 = 4;
pub const SERVICE_REQUEST: u8 = 5;
pub const SERVICE_ACCEPT: u8 = 6;
pub const EXT_INFO: u8 = 7;

// Transport layer kex (RFC 4253 §12)
pub const KEXINIT: u8 = 20;
pub const NEWKEYS: u8 = 21;

// Key-exchange method specific (RFC 4253 §8, RFC 5656/8731)
pub const KEXDH_INIT: u8 = 30;
pub const KEXDH_REPLY: u8 = 31;
pub const KEX_ECDH_INIT: u8 = 30;
pub const KEX_ECDH_REPLY: u8 = 31;

// User auth (RFC 4252 §6)
pub const USERAUTH_REQUEST: u8 = 50;
pub const USERAUTH_FAILURE: u8 = 51;
pub const USERAUTH_SUCCESS: u8 = 52;
pub const USERAUTH_PK_OK: u8 = 60;

// Connection protocol global (RFC 4254 §4)
pub const GLOBAL_REQUEST: u8 = 80;
pub const REQUEST_SUCCESS: u8 = 81;
pub const REQUEST_FAILURE: u8 = 82;

// Connection protocol channel (RFC 4254 §5/6)
pub const CHANNEL_OPEN: u8 = 90;
pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub const CHANNEL_OPEN_FAILURE: u8 = 92;
pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
pub const CHANNEL_DATA: u8 = 94;
pub const CHANNEL_EXTENDED_DATA: u8 = 95;
pub const CHANNEL_EOF: u8 = 96;
pub const CHANNEL_CLOSE: u8 = 97;
pub const CHANNEL_REQUEST: u8 = 98;
pub const CHANNEL_SUCCESS: u8 = 99;
pub const CHANNEL_FAILURE: u8 = 100;

/// Disconnect reason codes we care about (RFC 4253 §11.1); others pass
/// through as their raw `u32`.
pub mod disconnect_reason {
    pub const PROTOCOL_ERROR: u32 = 2;
    pub const SERVICE_NOT_AVAILABLE: u32 = 7;
}

/// A server KEXINIT, parsed into its ten algorithm name-lists plus the cookie.
#[derive(Debug, Clone)]
pub struct KexInitLists {
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub server_host_key_algorithms: Vec<String>,
    pub encryption_client_to_server: Vec<String>,
    pub encryption_server_to_client: Vec<String>,
    pub mac_client_to_server: Vec<String>,
    pub mac_server_to_client: Vec<String>,
    pub compression_client_to_server: Vec<String>,
    pub compression_server_to_client: Vec<String>,
    /// Raw payload bytes as received, message-type byte included, needed
    /// verbatim as `I_S`/`I_C` input to the exchange hash.
    pub raw: Vec<u8>,
}

fn split_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(String::from).collect()
    }
}

/// Parse a `SSH_MSG_KEXINIT` payload (message-type byte included).
pub fn parse_kexinit(payload: &[u8]) -> Result<KexInitLists> {
    if payload.is_empty() || payload[0] != KEXINIT {
        return Err(Error::MalformedKexInit);
    }

    let mut offset = 1;
    if payload.len() < offset + 16 {
        return Err(Error::MalformedKexInit);
    }
    let mut cookie = [0u8; 16];
    cookie.copy_from_slice(&payload[offset..offset + 16]);
    offset += 16;

    let mut lists = Vec::with_capacity(10);
    for _ in 0..10 {
        let (s, consumed) =
            read_string(&payload[offset..]).map_err(|_| Error::MalformedKexInit)?;
        lists.push(split_list(&s));
        offset += consumed;
    }

    // first_kex_packet_follows (1 byte) + reserved (4 bytes)
    if payload.len() < offset + 1 + 4 {
        return Err(Error::MalformedKexInit);
    }

    Ok(KexInitLists {
        cookie,
        kex_algorithms: lists[0].clone(),
        server_host_key_algorithms: lists[1].clone(),
        encryption_client_to_server: lists[2].clone(),
        encryption_server_to_client: lists[3].clone(),
        mac_client_to_server: lists[4].clone(),
        mac_server_to_client: lists[5].clone(),
        compression_client_to_server: lists[6].clone(),
        compression_server_to_client: lists[7].clone(),
        raw: payload.to_vec(),
    })
}

/// Build a client `SSH_MSG_KEXINIT` payload with the given cookie and
/// this client's preferred algorithm lists.
pub fn build_kexinit(cookie: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(KEXINIT);
    out.extend_from_slice(cookie);

    const KEX: &[&str] = &[
        "curve25519-sha256",
        "curve25519-sha256@libssh.org",
        "diffie-hellman-group14-sha256",
    ];
    const HOST_KEY: &[&str] = &["ssh-ed25519"];
    const CIPHER: &[&str] = &["aes128-ctr"];
    const MAC: &[&str] = &["hmac-sha2-256-etm@openssh.com", "hmac-sha2-256"];
    const COMPRESSION: &[&str] = &["none"];
    const EMPTY: &[&str] = &[];

    for list in [
        KEX,
        HOST_KEY,
        CIPHER,
        CIPHER,
        MAC,
        MAC,
        COMPRESSION,
        COMPRESSION,
        EMPTY,
        EMPTY,
    ] {
        write_name_list(&mut out, list);
    }

    out.push(0); // first_kex_packet_follows
    write_u32(&mut out, 0); // reserved

    out
}

/// First-match negotiation: the first entry in `preferred` that also
/// appears in `offered`.
pub fn negotiate<'a>(preferred: &[&'a str], offered: &[String]) -> Option<&'a str> {
    preferred
        .iter()
        .copied()
        .find(|p| offered.iter().any(|o| o == p))
}

/// `SSH_MSG_KEX_ECDH_INIT` / `SSH_MSG_KEXDH_INIT` payload for curve25519: `byte(30) || string(q_c)`.
pub fn build_kex_ecdh_init(q_c: &[u8; 32]) -> Vec<u8> {
    let mut out = vec![KEX_ECDH_INIT];
    write_bytes(&mut out, q_c);
    out
}

/// `SSH_MSG_KEXDH_INIT` payload for DH group-14: `byte(30) || mpint(e)`.
pub fn build_kexdh_init(e: &[u8]) -> Vec<u8> {
    let mut out = vec![KEXDH_INIT];
    crate::codec::write_mpint_from_magnitude(&mut out, e);
    out
}

/// A parsed `KEX_ECDH_REPLY`/`KEXDH_REPLY`: `byte(31) || string(k_s) || <epk> || string(signature)`.
pub struct KexReply {
    pub k_s: Vec<u8>,
    /// The remote ephemeral public value: 32-byte string for X25519, mpint bytes for DH.
    pub f_or_q_s: Vec<u8>,
    pub signature: Vec<u8>,
}

pub fn parse_kex_reply(payload: &[u8]) -> Result<KexReply> {
    if payload.is_empty() || payload[0] != KEXDH_REPLY {
        return Err(Error::Protocol("expected KEX reply"));
    }

    let mut offset = 1;
    let (k_s, consumed) = read_bytes(&payload[offset..])?;
    let k_s = k_s.to_vec();
    offset += consumed;

    let (f_or_q_s, consumed) = read_bytes(&payload[offset..])?;
    let f_or_q_s = f_or_q_s.to_vec();
    offset += consumed;

    let (signature, _consumed) = read_bytes(&payload[offset..])?;
    let signature = signature.to_vec();

    Ok(KexReply {
        k_s,
        f_or_q_s,
        signature,
    })
}

pub fn build_newkeys() -> Vec<u8> {
    vec![NEWKEYS]
}

pub fn build_service_request(service_name: &str) -> Vec<u8> {
    let mut out = vec![SERVICE_REQUEST];
    write_string(&mut out, service_name);
    out
}

/// Parsed `SSH_MSG_SERVICE_ACCEPT`.
pub fn parse_service_accept(payload: &[u8]) -> Result<String> {
    if payload.is_empty() || payload[0] != SERVICE_ACCEPT {
        return Err(Error::Protocol("expected SERVICE_ACCEPT"));
    }

    let (name, _) = read_string(&payload[1..])?;
    Ok(name)
}

/// Build `SSH_MSG_USERAUTH_REQUEST` for the `publickey` method with the
/// signature already attached.
#[allow(clippy::too_many_arguments)]
pub fn build_userauth_publickey_request(
    username: &str,
    key_type: &str,
    cert_blob: &[u8],
    sig_alg: &str,
    signature: &[u8],
) -> Vec<u8> {
    let mut out = vec![USERAUTH_REQUEST];
    write_string(&mut out, username);
    write_string(&mut out, "ssh-connection");
    write_string(&mut out, "publickey");
    out.push(1); // has-signature flag
    write_string(&mut out, key_type);
    write_bytes(&mut out, cert_blob);

    let mut sig_blob = Vec::new();
    write_string(&mut sig_blob, sig_alg);
    write_bytes(&mut sig_blob, signature);
    write_bytes(&mut out, &sig_blob);

    out
}

/// Build the data that gets signed for a publickey auth request:
/// `string(sessionId) || byte(50) || string(username) ||
/// string("ssh-connection") || string("publickey") || byte(1) ||
/// string(keyType) || string(certBlob)`.
pub fn build_publickey_signed_data(
    session_id: &[u8],
    username: &str,
    key_type: &str,
    cert_blob: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_bytes(&mut out, session_id);
    out.push(USERAUTH_REQUEST);
    write_string(&mut out, username);
    write_string(&mut out, "ssh-connection");
    write_string(&mut out, "publickey");
    out.push(1);
    write_string(&mut out, key_type);
    write_bytes(&mut out, cert_blob);

    out
}

/// Parsed `SSH_MSG_USERAUTH_FAILURE`.
pub struct UserauthFailure {
    pub continue_with: Vec<String>,
    pub partial_success: bool,
}

pub fn parse_userauth_failure(payload: &[u8]) -> Result<UserauthFailure> {
    if payload.is_empty() || payload[0] != USERAUTH_FAILURE {
        return Err(Error::Protocol("expected USERAUTH_FAILURE"));
    }

    let (list, consumed) = read_string(&payload[1..])?;
    let partial_success = payload
        .get(1 + consumed)
        .copied()
        .map(|b| b != 0)
        .unwrap_or(false);

    Ok(UserauthFailure {
        continue_with: split_list(&list),
        partial_success,
    })
}

pub fn build_channel_open(local_id: u32, initial_window: u32, max_packet: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_OPEN];
    write_string(&mut out, "session");
    write_u32(&mut out, local_id);
    write_u32(&mut out, initial_window);
    write_u32(&mut out, max_packet);
    out
}

/// Parsed `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`.
pub struct ChannelOpenConfirmation {
    pub recipient_channel: u32,
    pub sender_channel: u32,
    pub initial_window: u32,
    pub max_packet: u32,
}

pub fn parse_channel_open_confirmation(payload: &[u8]) -> Result<ChannelOpenConfirmation> {
    if payload.is_empty() || payload[0] != CHANNEL_OPEN_CONFIRMATION {
        return Err(Error::Protocol("expected CHANNEL_OPEN_CONFIRMATION"));
    }

    let (recipient_channel, o1) = read_u32(&payload[1..])?;
    let (sender_channel, o2) = read_u32(&payload[1 + o1..])?;
    let (initial_window, o3) = read_u32(&payload[1 + o1 + o2..])?;
    let (max_packet, _o4) = read_u32(&payload[1 + o1 + o2 + o3..])?;

    Ok(ChannelOpenConfirmation {
        recipient_channel,
        sender_channel,
        initial_window,
        max_packet,
    })
}

pub fn build_pty_request(channel_id: u32, term: &str, cols: u32, rows: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_REQUEST];
    write_u32(&mut out, channel_id);
    write_string(&mut out, "pty-req");
    out.push(1); // want_reply
    write_string(&mut out, term);
    write_u32(&mut out, cols);
    write_u32(&mut out, rows);
    write_u32(&mut out, 0); // width, pixels
    write_u32(&mut out, 0); // height, pixels
    write_bytes(&mut out, &[0]); // empty terminal modes, RFC 4254 §8
    out
}

pub fn build_shell_request(channel_id: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_REQUEST];
    write_u32(&mut out, channel_id);
    write_string(&mut out, "shell");
    out.push(1); // want_reply
    out
}

pub fn build_window_change_request(channel_id: u32, cols: u32, rows: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_REQUEST];
    write_u32(&mut out, channel_id);
    write_string(&mut out, "window-change");
    out.push(0); // want_reply
    write_u32(&mut out, cols);
    write_u32(&mut out, rows);
    write_u32(&mut out, 0);
    write_u32(&mut out, 0);
    out
}

pub fn build_channel_data(channel_id: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![CHANNEL_DATA];
    write_u32(&mut out, channel_id);
    write_bytes(&mut out, data);
    out
}

pub fn build_window_adjust(channel_id: u32, bytes_to_add: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_WINDOW_ADJUST];
    write_u32(&mut out, channel_id);
    write_u32(&mut out, bytes_to_add);
    out
}

pub fn build_channel_close(channel_id: u32) -> Vec<u8> {
    let mut out = vec![CHANNEL_CLOSE];
    write_u32(&mut out, channel_id);
    out
}

/// Parsed `SSH_MSG_CHANNEL_OPEN_FAILURE`.
pub struct ChannelOpenFailure {
    pub reason_code: u32,
    pub description: String,
}

pub fn parse_channel_open_failure(payload: &[u8]) -> Result<ChannelOpenFailure> {
    if payload.is_empty() || payload[0] != CHANNEL_OPEN_FAILURE {
        return Err(Error::Protocol("expected CHANNEL_OPEN_FAILURE"));
    }

    let (_recipient_channel, o1) = read_u32(&payload[1..])?;
    let (reason_code, o2) = read_u32(&payload[1 + o1..])?;
    let (description, _) =
        read_string(&payload[1 + o1 + o2..]).unwrap_or((String::new(), 0));

    Ok(ChannelOpenFailure {
        reason_code,
        description,
    })
}

/// Parsed `SSH_MSG_CHANNEL_DATA`/`SSH_MSG_CHANNEL_EXTENDED_DATA` (extended
/// data type code is ignored: both streams are merged into one).
pub fn parse_channel_data(payload: &[u8]) -> Result<(u32, Vec<u8>)> {
    let is_extended = payload.first() == Some(&CHANNEL_EXTENDED_DATA);
    let mut offset = 1;

    let (channel_id, consumed) = read_u32(&payload[offset..])?;
    offset += consumed;

    if is_extended {
        let (_data_type_code, consumed) = read_u32(&payload[offset..])?;
        offset += consumed;
    }

    let (data, _) = read_bytes(&payload[offset..])?;
    Ok((channel_id, data.to_vec()))
}

pub fn build_global_request_success() -> Vec<u8> {
    vec![REQUEST_SUCCESS]
}

pub fn build_global_request_failure() -> Vec<u8> {
    vec![REQUEST_FAILURE]
}

/// Parsed `SSH_MSG_GLOBAL_REQUEST`.
pub struct GlobalRequest {
    pub name: String,
    pub want_reply: bool,
}

pub fn parse_global_request(payload: &[u8]) -> Result<GlobalRequest> {
    if payload.is_empty() || payload[0] != GLOBAL_REQUEST {
        return Err(Error::Protocol("expected GLOBAL_REQUEST"));
    }

    let (name, consumed) = read_string(&payload[1..])?;
    let want_reply = payload.get(1 + consumed).copied().unwrap_or(0) != 0;

    Ok(GlobalRequest { name, want_reply })
}

/// Parsed `SSH_MSG_DISCONNECT`.
pub struct Disconnect {
    pub reason: u32,
    pub description: String,
}

pub fn parse_disconnect(payload: &[u8]) -> Result<Disconnect> {
    if payload.is_empty() || payload[0] != DISCONNECT {
        return Err(Error::Protocol("expected DISCONNECT"));
    }

    let (reason, consumed) = read_u32(&payload[1..])?;
    let (description, _) = read_string(&payload[1 + consumed..]).unwrap_or((String::new(), 0));

    Ok(Disconnect {
        reason,
        description,
    })
}
