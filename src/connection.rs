//! The global connection state machine: version-line exchange, packet
//! accumulation pre/post encryption, message dispatch, coordination of
//! the KEX/auth/channel sub-machines, and the fatal-error trap. The
//! dispatch loop and sequence-number bookkeeping are adapted from a
//! pull-based `AsyncRead` stream to a push-based byte-chunk engine.

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::auth::{Auth, Credentials};
use crate::channel::Channel;
use crate::codec::{self, build_packet};
use crate::error::{Error, Result};
use crate::kex::{self, curve25519, dh14, keys, Negotiated};
use crate::msg;
use crate::transport_cipher::{MacMode, TransportCipher};

/// Global connection phase. Monotonic: never revisits a lower phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    IdentExchange,
    Kex,
    Auth,
    ChannelOpen,
    Active,
    Closed,
    Error,
}

enum Ephemeral {
    Curve25519(curve25519::Ephemeral),
    Dh14(dh14::Ephemeral),
}

#[derive(Default)]
enum KexPhase {
    #[default]
    Init,
    Negotiating,
    Exchanging,
    Complete,
}

#[derive(Default)]
struct Kex {
    phase: KexPhase,
    client_kexinit_raw: Vec<u8>,
    server_kexinit_raw: Vec<u8>,
    negotiated: Option<Negotiated>,
    ephemeral: Option<Ephemeral>,
}

/// A delivered event the boundary API surfaces to the caller.
pub enum Event {
    Data(Vec<u8>),
    PtyDenied,
    /// The server's host-key blob as received, once per session: the
    /// engine hashes it but never authenticates it, so this is the seam
    /// a caller wires a known-hosts check to.
    HostKey(Vec<u8>),
    Error(Error),
}

/// Outbound bytes plus delivered events produced by driving the engine
/// one step.
#[derive(Default)]
pub struct Outcome {
    pub outbound: Vec<Vec<u8>>,
    pub events: Vec<Event>,
}

impl Outcome {
    fn send(&mut self, bytes: Vec<u8>) {
        self.outbound.push(bytes);
    }
}

/// The sans-io SSH client engine: owns every protocol sub-machine,
/// consumes inbound byte chunks, and produces outbound byte chunks plus
/// delivered events. Holds no socket.
pub struct Connection {
    phase: Phase,
    fatal: Option<String>,

    ident_buf: Vec<u8>,
    server_version: Option<String>,
    pending: Vec<u8>,

    kex: Kex,
    session_id: Option<Vec<u8>>,
    cipher: Option<TransportCipher>,
    outbound_encrypted: bool,
    inbound_encrypted: bool,
    kex_deadline: Option<Instant>,
    kex_timeout: Duration,

    auth: Auth,
    channel: Channel,
    client_id_tag: String,
}

impl Connection {
    /// Construct the engine and the client identification line to write
    /// to the transport immediately.
    pub fn new(
        credentials: Credentials,
        cols: u32,
        rows: u32,
        client_id_tag: impl Into<String>,
        kex_timeout_ms: u64,
    ) -> (Self, Vec<u8>) {
        let client_id_tag = client_id_tag.into();
        let ident_line = format!("SSH-2.0-{client_id_tag}\r\n");

        let connection = Self {
            phase: Phase::IdentExchange,
            fatal: None,
            ident_buf: Vec::new(),
            server_version: None,
            pending: Vec::new(),
            kex: Kex::default(),
            session_id: None,
            cipher: None,
            outbound_encrypted: false,
            inbound_encrypted: false,
            kex_deadline: None,
            kex_timeout: Duration::from_millis(kex_timeout_ms),
            auth: Auth::new(credentials),
            channel: Channel::new(cols, rows),
            client_id_tag,
        };

        (connection, ident_line.into_bytes())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn fail(&mut self, outcome: &mut Outcome, error: Error) {
        if self.phase == Phase::Error {
            return;
        }

        tracing::debug!(%error, "connection entering fatal error state");
        self.fatal = Some(error.to_string());
        self.phase = Phase::Error;
        outcome.events.push(Event::Error(error));
    }

    /// Drive the KEX timeout clock — a single cancellable timer.
    pub fn tick(&mut self, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();

        if let Some(deadline) = self.kex_deadline {
            if now >= deadline && self.phase != Phase::Error {
                self.fail(&mut outcome, Error::KexTimeout);
            }
        }

        outcome
    }

    /// Feed a chunk of inbound bytes from the transport.
    pub fn receive(&mut self, chunk: &[u8]) -> Outcome {
        let mut outcome = Outcome::default();

        if self.phase == Phase::Error {
            return outcome;
        }

        if self.server_version.is_none() {
            self.ident_buf.extend_from_slice(chunk);
            if !self.extract_version(&mut outcome) {
                return outcome;
            }
        } else {
            self.pending.extend_from_slice(chunk);
        }

        self.drain(&mut outcome);

        outcome
    }

    /// Search the accumulated pre-version buffer for `"SSH-"` then a
    /// line terminator. Returns `false` while still waiting on more
    /// bytes.
    fn extract_version(&mut self, outcome: &mut Outcome) -> bool {
        let Some(start) = find_subslice(&self.ident_buf, b"SSH-") else {
            return false;
        };

        let rest = &self.ident_buf[start..];
        let Some(eol) = rest.iter().position(|&b| b == b'\n') else {
            return false;
        };

        let line_end = if eol > 0 && rest[eol - 1] == b'\r' {
            eol - 1
        } else {
            eol
        };

        let version = String::from_utf8_lossy(&rest[..line_end]).into_owned();
        let residual = rest[eol + 1..].to_vec();

        tracing::debug!(server_version = %version, "received server identification line");

        self.server_version = Some(version);
        self.ident_buf.clear();
        self.pending = residual;

        let _ = outcome;
        true
    }

    /// Drain as many full packets as are available, dispatching each.
    /// Re-entrancy-guarded implicitly: this is the only call path that
    /// consumes `self.pending`, and it runs to completion synchronously,
    /// so only one drain pass proceeds at a time.
    fn drain(&mut self, outcome: &mut Outcome) {
        loop {
            if self.phase == Phase::Error {
                break;
            }

            let next = if self.inbound_encrypted {
                let Some(cipher) = self.cipher.as_mut() else {
                    break;
                };
                match cipher.decrypt(&self.pending) {
                    Ok(Some((payload, consumed))) => Some((payload, consumed)),
                    Ok(None) => None,
                    Err(error) => {
                        self.fail(outcome, error);
                        break;
                    }
                }
            } else {
                match codec::parse_packet(&self.pending) {
                    Ok(parsed) => Some((parsed.payload.to_vec(), parsed.consumed)),
                    Err(codec::NeedMore) => None,
                }
            };

            let Some((payload, consumed)) = next else {
                break;
            };

            self.pending.drain(..consumed);
            self.dispatch(&payload, outcome);
        }
    }

    fn dispatch(&mut self, payload: &[u8], outcome: &mut Outcome) {
        let Some(&msg_type) = payload.first() else {
            return;
        };

        let result = match msg_type {
            msg::DISCONNECT => self.on_disconnect(payload),
            msg::IGNORE | msg::DEBUG => Ok(()),
            msg::UNIMPLEMENTED => {
                tracing::debug!("server rejected a sequence with UNIMPLEMENTED");
                Ok(())
            }
            msg::EXT_INFO => Ok(()),
            msg::GLOBAL_REQUEST => self.on_global_request(payload, outcome),
            msg::KEXINIT => self.on_kexinit(payload, outcome),
            msg::KEXDH_REPLY => self.on_kex_reply(payload, outcome),
            msg::NEWKEYS => self.on_newkeys(outcome),
            msg::SERVICE_ACCEPT => self.on_service_accept(payload, outcome),
            msg::USERAUTH_PK_OK => self.on_userauth_pk_ok(outcome),
            msg::USERAUTH_FAILURE => self.on_userauth_failure(payload, outcome),
            msg::USERAUTH_SUCCESS => self.on_userauth_success(outcome),
            msg::CHANNEL_OPEN_CONFIRMATION => self.on_channel_open_confirmation(payload, outcome),
            msg::CHANNEL_OPEN_FAILURE => self.on_channel_open_failure(payload),
            msg::CHANNEL_SUCCESS => self.on_channel_request_reply(true, outcome),
            msg::CHANNEL_FAILURE => self.on_channel_request_reply(false, outcome),
            msg::CHANNEL_DATA | msg::CHANNEL_EXTENDED_DATA => self.on_channel_data(payload, outcome),
            msg::CHANNEL_WINDOW_ADJUST => self.on_channel_window_adjust(payload),
            msg::CHANNEL_EOF => Ok(()),
            msg::CHANNEL_CLOSE => self.on_channel_close(outcome),
            _ => {
                tracing::debug!(msg_type, "ignoring unhandled message type");
                Ok(())
            }
        };

        if let Err(error) = result {
            self.fail(outcome, error);
        }
    }

    fn on_disconnect(&mut self, payload: &[u8]) -> Result<()> {
        let disconnect = msg::parse_disconnect(payload)?;
        tracing::debug!(
            reason = disconnect.reason,
            description = %disconnect.description,
            "server sent SSH_MSG_DISCONNECT"
        );

        Err(Error::Protocol("server disconnected"))
    }

    fn on_global_request(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let request = msg::parse_global_request(payload)?;
        if request.want_reply {
            let reply = if request.name == "keepalive@openssh.com" {
                msg::build_global_request_success()
            } else {
                msg::build_global_request_failure()
            };
            self.send(outcome, reply);
        }

        Ok(())
    }

    fn on_kexinit(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let server_lists = msg::parse_kexinit(payload)?;
        let client_raw = self.kex.client_kexinit_raw_or_build();
        let client_lists = msg::parse_kexinit(&client_raw)?;

        let negotiated = kex::negotiate(&client_lists, &server_lists)?;
        tracing::debug!(
            kex = ?negotiated.kex,
            cipher_c2s = negotiated.cipher_client_to_server,
            mac_c2s = negotiated.mac_client_to_server,
            "negotiated algorithm triple"
        );

        self.kex.server_kexinit_raw = payload.to_vec();
        self.kex.negotiated = Some(negotiated);
        self.kex.phase = KexPhase::Negotiating;

        self.send(outcome, client_raw);

        let kex_init_payload = if negotiated.kex.is_curve25519() {
            let ephemeral = curve25519::Ephemeral::generate();
            let out = msg::build_kex_ecdh_init(&ephemeral.public);
            self.kex.ephemeral = Some(Ephemeral::Curve25519(ephemeral));
            out
        } else {
            let ephemeral = dh14::Ephemeral::generate();
            let out = msg::build_kexdh_init(&ephemeral.e.to_bytes_be());
            self.kex.ephemeral = Some(Ephemeral::Dh14(ephemeral));
            out
        };
        self.send(outcome, kex_init_payload);

        self.kex.phase = KexPhase::Exchanging;
        self.phase = Phase::Kex;
        self.kex_deadline = Some(Instant::now() + self.kex_timeout);

        Ok(())
    }

    fn on_kex_reply(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let reply = msg::parse_kex_reply(payload)?;
        let negotiated = self
            .kex
            .negotiated
            .ok_or(Error::KexError("KEX reply before negotiation".into()))?;

        let v_c = format!("SSH-2.0-{}", self.client_id_tag);
        let v_s = self
            .server_version
            .clone()
            .ok_or(Error::KexError("KEX reply before ident exchange".into()))?;

        let ephemeral = self
            .kex
            .ephemeral
            .take()
            .ok_or(Error::KexError("KEX reply without a pending ephemeral".into()))?;

        outcome.events.push(Event::HostKey(reply.k_s.clone()));

        let (shared_secret, h) = match ephemeral {
            Ephemeral::Curve25519(ephemeral) => {
                let q_c = ephemeral.public;
                let q_s = reply.f_or_q_s.clone();
                let shared = ephemeral.diffie_hellman(&q_s)?;
                let h = curve25519::exchange_hash(
                    &v_c,
                    &v_s,
                    &self.kex.client_kexinit_raw,
                    &self.kex.server_kexinit_raw,
                    &reply.k_s,
                    &q_c,
                    &q_s,
                    &shared,
                );
                (shared.to_vec(), h)
            }
            Ephemeral::Dh14(ephemeral) => {
                let e = ephemeral.e.clone();
                let f = num_bigint::BigUint::from_bytes_be(&reply.f_or_q_s);
                let shared = ephemeral.shared_secret(&f)?;
                let h = dh14::exchange_hash(
                    &v_c,
                    &v_s,
                    &self.kex.client_kexinit_raw,
                    &self.kex.server_kexinit_raw,
                    &reply.k_s,
                    &e,
                    &f,
                    &shared,
                );
                (shared.to_bytes_be(), h)
            }
        };

        let session_id = self.session_id.get_or_insert_with(|| h.to_vec()).clone();
        let session_keys = keys::derive(&shared_secret, &h, &session_id);

        // The preferred MAC list offers the same ETM/non-ETM pair for
        // both directions, so a server that supports ETM at all picks it
        // for both; one `MacMode` covers the single session this client
        // ever negotiates (per-direction divergence is a corpus of one
        // server doing something unusual, outside this client's scope).
        let mode = if negotiated.mac_client_to_server.ends_with("-etm@openssh.com") {
            MacMode::EncryptThenMac
        } else {
            MacMode::MacThenEncrypt
        };

        self.cipher = Some(TransportCipher::new(session_keys, mode));
        self.kex.phase = KexPhase::Complete;
        self.kex_deadline = None;

        self.send(outcome, msg::build_newkeys());
        self.outbound_encrypted = true;

        Ok(())
    }

    fn on_newkeys(&mut self, outcome: &mut Outcome) -> Result<()> {
        self.inbound_encrypted = true;
        self.phase = Phase::Auth;

        let payload = self.auth.start_service_request();
        self.send(outcome, payload);

        Ok(())
    }

    fn on_service_accept(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let service = msg::parse_service_accept(payload)?;
        if service != "ssh-userauth" {
            return Err(Error::Protocol("unexpected SERVICE_ACCEPT"));
        }

        let session_id = self
            .session_id
            .clone()
            .ok_or(Error::Protocol("SERVICE_ACCEPT before session id was set"))?;

        let payload = self.auth.on_service_accepted(&session_id)?;
        self.send(outcome, payload);

        Ok(())
    }

    fn on_userauth_pk_ok(&mut self, outcome: &mut Outcome) -> Result<()> {
        let session_id = self
            .session_id
            .clone()
            .ok_or(Error::Protocol("PK_OK before session id was set"))?;

        let payload = self.auth.on_pk_ok(&session_id)?;
        self.send(outcome, payload);

        Ok(())
    }

    fn on_userauth_failure(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let failure = msg::parse_userauth_failure(payload)?;
        let error = self.auth.on_failure(&failure);

        self.fail(outcome, error);
        Ok(())
    }

    fn on_userauth_success(&mut self, outcome: &mut Outcome) -> Result<()> {
        self.auth.on_success();
        self.phase = Phase::ChannelOpen;

        let payload = self.channel.open();
        self.send(outcome, payload);

        Ok(())
    }

    fn on_channel_open_confirmation(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let confirmation = msg::parse_channel_open_confirmation(payload)?;
        let payload = self.channel.on_open_confirmation(&confirmation);
        self.send(outcome, payload);

        Ok(())
    }

    fn on_channel_open_failure(&mut self, payload: &[u8]) -> Result<()> {
        let failure = msg::parse_channel_open_failure(payload)?;
        let reason = match failure.reason_code {
            1 => "administratively prohibited",
            2 => "connect failed",
            3 => "unknown channel type",
            4 => "resource shortage",
            _ => "channel open refused by server",
        };

        Err(Error::Channel(if failure.description.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}: {}", failure.description)
        }))
    }

    fn on_channel_close(&mut self, outcome: &mut Outcome) -> Result<()> {
        if self.channel.remote_id() != 0 {
            let payload = msg::build_channel_close(self.channel.remote_id());
            self.send(outcome, payload);
        }

        self.channel.close();
        self.phase = Phase::Closed;

        Ok(())
    }

    fn on_channel_request_reply(&mut self, granted: bool, outcome: &mut Outcome) -> Result<()> {
        match self.channel.phase() {
            crate::channel::Phase::PtyRequested => {
                let (shell_request, denied) = self.channel.on_pty_reply(granted);
                if denied {
                    outcome.events.push(Event::PtyDenied);
                }
                self.send(outcome, shell_request);
            }
            crate::channel::Phase::ShellRequested => {
                self.channel.on_shell_reply();
                self.phase = Phase::Active;
            }
            _ => {}
        }

        Ok(())
    }

    fn on_channel_data(&mut self, payload: &[u8], outcome: &mut Outcome) -> Result<()> {
        let (_channel_id, data) = msg::parse_channel_data(payload)?;
        let (data, adjust) = self.channel.on_data(data);

        self.send(outcome, adjust);
        outcome.events.push(Event::Data(data));

        Ok(())
    }

    fn on_channel_window_adjust(&mut self, payload: &[u8]) -> Result<()> {
        let (_channel_id, o1) = codec::read_u32(&payload[1..])?;
        let (bytes_to_add, _) = codec::read_u32(&payload[1 + o1..])?;
        self.channel.on_window_adjust(bytes_to_add);

        Ok(())
    }

    /// Frame (if pre-encryption) or encrypt (if post-NEWKEYS) and queue
    /// one outbound payload.
    fn send(&mut self, outcome: &mut Outcome, payload: Vec<u8>) {
        let bytes = if self.outbound_encrypted {
            match self.cipher.as_mut().expect("cipher set once outbound_encrypted").encrypt(&payload) {
                Ok(bytes) => bytes,
                Err(error) => {
                    self.fail(outcome, error);
                    return;
                }
            }
        } else {
            build_packet(&payload, false)
        };

        outcome.send(bytes);
    }

    /// Caller write to the shell. No-op before `shell` is live.
    pub fn write(&mut self, data: &[u8]) -> Outcome {
        let mut outcome = Outcome::default();

        if self.phase == Phase::Error {
            return outcome;
        }

        if let Some(payload) = self.channel.write(data) {
            self.send(&mut outcome, payload);
        }

        outcome
    }

    pub fn resize(&mut self, cols: u32, rows: u32) -> Outcome {
        let mut outcome = Outcome::default();

        if self.phase == Phase::Error {
            return outcome;
        }

        if let Some(payload) = self.channel.resize(cols, rows) {
            self.send(&mut outcome, payload);
        }

        outcome
    }

    pub fn close(&mut self) {
        self.channel.close();
        self.phase = Phase::Closed;
    }

    /// Report that the underlying byte transport closed. `clean`
    /// distinguishes a graceful close — treated the same as a
    /// server-initiated end of session, the same outcome as
    /// `SSH_MSG_CHANNEL_CLOSE` — from an abrupt one, which is fatal like
    /// any other transport failure and delivered via `Event::Error`.
    pub fn on_transport_closed(&mut self, clean: bool) -> Outcome {
        let mut outcome = Outcome::default();

        if self.phase == Phase::Closed || self.phase == Phase::Error {
            return outcome;
        }

        if clean {
            tracing::debug!("transport closed cleanly; ending session");
            self.channel.close();
            self.phase = Phase::Closed;
        } else {
            self.fail(&mut outcome, Error::TransportClosed);
        }

        outcome
    }
}

impl Kex {
    /// Lazily build and cache this client's own KEXINIT payload the
    /// first time it is needed (once per session: called exactly once,
    /// from the first `SSH_MSG_KEXINIT` dispatch).
    fn client_kexinit_raw_or_build(&mut self) -> Vec<u8> {
        if self.client_kexinit_raw.is_empty() {
            let mut cookie = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut cookie);
            self.client_kexinit_raw = msg::build_kexinit(&cookie);
        }

        self.client_kexinit_raw.clone()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
