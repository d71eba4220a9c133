//! Named constants for the protocol, so none of the magic numbers of the
//! wire format end up as bare literals scattered through the
//! implementation.

/// Minimum padding length for a binary packet (RFC 4253 §6).
pub const MIN_PADDING: usize = 4;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Output size of HMAC-SHA-256, in bytes.
pub const HMAC_SHA256_SIZE: usize = 32;

/// Maximum payload size of a single packet.
pub const MAX_PACKET_SIZE: usize = 35000;

/// Initial per-direction channel flow-control window.
pub const DEFAULT_WINDOW_SIZE: u32 = 0x8000;

/// Maximum size of a single `CHANNEL_DATA` payload we advertise.
pub const CHANNEL_MAX_PACKET: u32 = 0x2000;

/// Default terminal width, in columns.
pub const DEFAULT_COLS: u32 = 80;

/// Default terminal height, in rows.
pub const DEFAULT_ROWS: u32 = 24;

/// Default terminal type string sent with `pty-req`.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Milliseconds allowed for a key-exchange round-trip before it is
/// considered timed out.
pub const KEX_TIMEOUT_MS: u64 = 8000;

/// The minimum alignment for the encrypted unit, regardless of block size.
pub const MIN_ALIGN: usize = 8;

/// Sequence number of the first packet exchanged in each direction
/// *after* the handshake: client ident line, KEXINIT, KEX_*_INIT and
/// NEWKEYS occupy sequence numbers 0, 1 and 2 on each side (the ident
/// line itself is not a binary packet and does not consume a sequence
/// number), so the first encrypted packet in each direction starts at 3.
pub const INITIAL_SEQ_AFTER_HANDSHAKE: u32 = 3;

/// Client identification tag, sent as `SSH-2.0-<tag>`.
pub const CLIENT_ID_TAG: &str = "ssh-wire_0.1";
