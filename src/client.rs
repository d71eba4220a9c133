//! The public boundary API: `Connection` wraps the sans-io engine in
//! `connection` around a caller-supplied [`Transport`], turning its
//! `Outcome`s into transport writes and callback deliveries. Adapted
//! from an owned `AsyncRead + AsyncWrite` stream entry point to a
//! caller-driven push transport.

use std::time::Instant;

use crate::auth::Credentials;
use crate::connection::{self, Event};
use crate::constants::{CLIENT_ID_TAG, DEFAULT_COLS, DEFAULT_ROWS, KEX_TIMEOUT_MS};
use crate::error::Result;

/// The byte transport this client is driven over: message-oriented,
/// `send` + a readiness flag. PEM loading, socket/WebSocket plumbing and
/// framing-alignment guarantees are the caller's responsibility — this
/// trait is the seam.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError>;
    fn ready(&self) -> bool;
}

/// Transport-level send failure (distinct from protocol [`crate::Error`]).
#[derive(Debug, thiserror::Error)]
#[error("the transport refused to send")]
pub struct TransportError;

/// Caller-facing connect options.
pub struct ConnectOptions {
    pub cols: u32,
    pub rows: u32,
    pub kex_timeout_ms: u64,
    /// The `<tag>` in the `SSH-2.0-<tag>` identification line this
    /// client sends. Defaults to this crate's own tag; callers
    /// embedding the engine under their own product name may want to
    /// override it.
    pub client_id_tag: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            kex_timeout_ms: KEX_TIMEOUT_MS,
            client_id_tag: CLIENT_ID_TAG.to_string(),
        }
    }
}

type DataCallback = Box<dyn FnMut(Vec<u8>) + Send>;
type ErrorCallback = Box<dyn FnMut(&crate::Error) + Send>;
type PtyDeniedCallback = Box<dyn FnMut() + Send>;
type HostKeyCallback = Box<dyn FnMut(&[u8]) + Send>;

/// A driven SSH-2 client session: owns the sans-io engine and a
/// caller-supplied [`Transport`], and fans the engine's `Outcome`s out
/// to transport writes and registered callbacks.
pub struct Connection<T: Transport> {
    transport: T,
    engine: connection::Connection,
    buffered_data: Vec<Vec<u8>>,

    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
    on_pty_denied: Option<PtyDeniedCallback>,
    on_host_key: Option<HostKeyCallback>,
}

impl<T: Transport> Connection<T> {
    /// Start the handshake: writes the client identification line
    /// immediately and returns once construction completes — this
    /// resolves when construction completes, not when the shell is
    /// ready.
    pub fn connect(mut transport: T, credentials: Credentials, options: ConnectOptions) -> Result<Self> {
        let (engine, ident_line) = connection::Connection::new(
            credentials,
            options.cols,
            options.rows,
            options.client_id_tag,
            options.kex_timeout_ms,
        );

        if transport.ready() {
            transport.send(&ident_line).map_err(|_| crate::Error::TransportNotReady)?;
        } else {
            return Err(crate::Error::TransportNotReady);
        }

        Ok(Self {
            transport,
            engine,
            buffered_data: Vec::new(),
            on_data: None,
            on_error: None,
            on_pty_denied: None,
            on_host_key: None,
        })
    }

    /// Register the single subscriber for merged stdout/stderr bytes.
    /// Any bytes buffered before registration are delivered immediately.
    pub fn on_data(&mut self, mut callback: impl FnMut(Vec<u8>) + Send + 'static) {
        for chunk in self.buffered_data.drain(..) {
            callback(chunk);
        }

        self.on_data = Some(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl FnMut(&crate::Error) + Send + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    pub fn on_pty_denied(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_pty_denied = Some(Box::new(callback));
    }

    /// Register an inspection callback for the server's host-key blob,
    /// delivered once per session right after the key-exchange reply
    /// arrives. The engine itself never authenticates this key — a
    /// caller wanting known-hosts verification hooks in here and closes
    /// the connection on mismatch.
    pub fn on_host_key(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.on_host_key = Some(Box::new(callback));
    }

    /// Feed a chunk of inbound bytes received from the transport.
    pub fn receive(&mut self, chunk: &[u8]) {
        let outcome = self.engine.receive(chunk);
        self.apply(outcome);
    }

    /// Drive the KEX timeout clock.
    pub fn tick(&mut self, now: Instant) {
        let outcome = self.engine.tick(now);
        self.apply(outcome);
    }

    /// Write bytes to the remote shell. No-op before `shell` is live.
    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        let outcome = self.engine.write(data.as_ref());
        self.apply(outcome);
    }

    /// Send a window-change request.
    pub fn resize(&mut self, cols: u32, rows: u32) {
        let outcome = self.engine.resize(cols, rows);
        self.apply(outcome);
    }

    /// Close the underlying transport.
    pub fn close(&mut self) {
        self.engine.close();
    }

    /// Report that the underlying transport closed. `clean` distinguishes
    /// a graceful close — delivered as a silent, server-initiated end of
    /// session, same as `close()` — from an abrupt one, which is fatal
    /// and delivered via `on_error` as [`crate::Error::TransportClosed`].
    /// Callers driving a socket or stream transport call this from
    /// whatever read loop observes the transport end, instead of just
    /// breaking out of it.
    pub fn on_transport_closed(&mut self, clean: bool) {
        let outcome = self.engine.on_transport_closed(clean);
        self.apply(outcome);
    }

    pub fn phase(&self) -> connection::Phase {
        self.engine.phase()
    }

    fn apply(&mut self, outcome: connection::Outcome) {
        for bytes in outcome.outbound {
            if self.transport.send(&bytes).is_err() {
                let failure = self.engine.on_transport_closed(false);
                self.apply(failure);
                return;
            }
        }

        for event in outcome.events {
            match event {
                Event::Data(data) => match &mut self.on_data {
                    Some(callback) => callback(data),
                    None => self.buffered_data.push(data),
                },
                Event::PtyDenied => {
                    if let Some(callback) = &mut self.on_pty_denied {
                        callback();
                    }
                }
                Event::HostKey(key) => {
                    if let Some(callback) = &mut self.on_host_key {
                        callback(&key);
                    }
                }
                Event::Error(error) => self.deliver_error(&error),
            }
        }
    }

    fn deliver_error(&mut self, error: &crate::Error) {
        tracing::debug!(%error, "delivering fatal error to caller");
        if let Some(callback) = &mut self.on_error {
            callback(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingTransport {
        sent: Vec<Vec<u8>>,
        ready: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn ready(&self) -> bool {
            self.ready
        }
    }

    struct NoopSigner;
    impl crate::auth::Signer for NoopSigner {
        fn sign(&self, _data: &[u8]) -> std::result::Result<Vec<u8>, signature::Error> {
            Ok(vec![0u8; 64])
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("alice", "ssh-ed25519", vec![1, 2, 3], Box::new(NoopSigner)).unwrap()
    }

    #[test]
    fn connect_writes_the_identification_line_immediately() {
        let transport = RecordingTransport {
            sent: Vec::new(),
            ready: true,
        };

        let connection = Connection::connect(transport, credentials(), ConnectOptions::default()).unwrap();
        assert_eq!(connection.transport.sent.len(), 1);
        assert!(String::from_utf8(connection.transport.sent[0].clone())
            .unwrap()
            .starts_with("SSH-2.0-"));
    }

    #[test]
    fn connect_fails_when_transport_is_not_ready() {
        let transport = RecordingTransport {
            sent: Vec::new(),
            ready: false,
        };

        let result = Connection::connect(transport, credentials(), ConnectOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn data_before_subscription_is_buffered_then_delivered_on_registration() {
        let transport = RecordingTransport {
            sent: Vec::new(),
            ready: true,
        };

        let mut connection =
            Connection::connect(transport, credentials(), ConnectOptions::default()).unwrap();

        connection.apply(connection::Outcome {
            outbound: Vec::new(),
            events: vec![Event::Data(b"hi".to_vec())],
        });

        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        connection.on_data(move |chunk| received_clone.lock().unwrap().push(chunk));

        assert_eq!(*received.lock().unwrap(), vec![b"hi".to_vec()]);
    }

    #[test]
    fn clean_transport_close_ends_session_without_invoking_on_error() {
        let transport = RecordingTransport {
            sent: Vec::new(),
            ready: true,
        };

        let mut connection =
            Connection::connect(transport, credentials(), ConnectOptions::default()).unwrap();

        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        connection.on_error(move |_| called_clone.store(true, std::sync::atomic::Ordering::SeqCst));

        connection.on_transport_closed(true);

        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(connection.phase(), connection::Phase::Closed);
    }

    #[test]
    fn unclean_transport_close_delivers_a_fatal_error() {
        let transport = RecordingTransport {
            sent: Vec::new(),
            ready: true,
        };

        let mut connection =
            Connection::connect(transport, credentials(), ConnectOptions::default()).unwrap();

        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        connection.on_error(move |error| received_clone.lock().unwrap().push(error.to_string()));

        connection.on_transport_closed(false);

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(connection.phase(), connection::Phase::Error);
    }
}
