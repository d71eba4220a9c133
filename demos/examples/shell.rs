use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::eyre;
use ed25519_dalek::{Signer as _, SigningKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use ssh_wire::{ConnectOptions, Connection, Credentials, Signer, Transport, TransportError};

/// A `ssh-wire` client example: connects to a real SSH server, requests
/// a PTY and an interactive shell, and pipes stdin/stdout through it.
#[derive(Debug, Parser)]
pub struct Args {
    /// The `host:port` of the server to connect to.
    address: String,

    /// The username to authenticate as.
    #[arg(short, long, default_value = "demo")]
    user: String,
}

/// Bridges the sans-io engine's synchronous `send` to an async socket
/// write, via a channel drained by a dedicated writer task.
struct SocketTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Transport for SocketTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx.send(bytes.to_vec()).map_err(|_| TransportError)
    }

    fn ready(&self) -> bool {
        !self.tx.is_closed()
    }
}

struct Ed25519Signer(SigningKey);

impl Signer for Ed25519Signer {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, signature::Error> {
        Ok(self.0.sign(data).to_bytes().to_vec())
    }
}

/// `string("ssh-ed25519") || string(pubkey)`, the wire form of an
/// Ed25519 public key (RFC 4253 §6.6). This demo presents a bare key
/// rather than an OpenSSH certificate, so the blob doubles as the
/// certificate field.
fn public_key_blob(pubkey: &[u8; 32]) -> Vec<u8> {
    fn write_string(out: &mut Vec<u8>, value: &[u8]) {
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
    }

    let mut out = Vec::new();
    write_string(&mut out, b"ssh-ed25519");
    write_string(&mut out, pubkey);
    out
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // A fresh key every run, since this demo has no known-hosts store
    // or persistent identity to load from (those are the caller's job,
    // same as the engine treats host-key verification as the caller's
    // job via `on_host_key`).
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let cert_blob = public_key_blob(signing_key.verifying_key().as_bytes());
    let credentials = Credentials::new(args.user, "ssh-ed25519", cert_blob, Box::new(Ed25519Signer(signing_key)))
        .map_err(|error| eyre::eyre!("{error}"))?;

    let stream = TcpStream::connect(&args.address).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let transport = SocketTransport { tx };
    let connection = Connection::connect(transport, credentials, ConnectOptions::default())?;
    let connection = Arc::new(Mutex::new(connection));

    {
        let mut guard = connection.lock().await;
        guard.on_data(|chunk| {
            use std::io::Write;
            let _ = std::io::stdout().write_all(&chunk);
            let _ = std::io::stdout().flush();
        });
        guard.on_pty_denied(|| tracing::warn!("server denied the PTY request"));
        guard.on_host_key(|key| tracing::info!(len = key.len(), "received server host key"));
        guard.on_error(|error| tracing::error!(%error, "connection failed"));
    }

    let stdin_connection = connection.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                // Local input ending isn't the transport closing; it just
                // means there is nothing left to send, so end the session
                // the same way an interactive user hitting Ctrl-D would.
                Ok(0) | Err(_) => {
                    stdin_connection.lock().await.close();
                    break;
                }
                Ok(n) => stdin_connection.lock().await.write(&buf[..n]),
            }
        }
    });

    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            result = read_half.read(&mut buf) => {
                match result {
                    // `Ok(0)` is the peer's clean TCP half-close; any `Err`
                    // is an abrupt, unclean failure of the transport itself.
                    Ok(0) => {
                        connection.lock().await.on_transport_closed(true);
                        break;
                    }
                    Err(_) => {
                        connection.lock().await.on_transport_closed(false);
                        break;
                    }
                    Ok(n) => connection.lock().await.receive(&buf[..n]),
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                connection.lock().await.tick(Instant::now());
            }
        }
    }

    Ok(())
}
