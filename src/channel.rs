//! Single-session channel sub-machine: open, PTY request, shell request,
//! data transfer, window accounting, resize. Window accounting uses an
//! immediate per-byte adjust discipline, with no batching or threshold.

use crate::constants::{CHANNEL_MAX_PACKET, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_TERM, DEFAULT_WINDOW_SIZE};
use crate::msg;

/// Phase of the channel sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Opening,
    Open,
    PtyRequested,
    ShellRequested,
    Active,
    Closed,
}

/// The single session channel this client ever opens. `local_id` is
/// always 0; `remote_id` uses `0` as the core's sentinel
/// for "not yet confirmed" (a real remote id of 0 cannot occur on an
/// otherwise-empty session, since RFC 4254 channel ids are assigned by
/// each side independently starting from whatever value it chooses —
/// this client always proposes local id 0, so remote_id==0 unambiguously
/// means "unconfirmed" here).
pub struct Channel {
    phase: Phase,
    local_id: u32,
    remote_id: u32,
    local_window: u32,
    remote_window: u32,
    pty_sent: bool,
    shell_sent: bool,
    cols: u32,
    rows: u32,
    term: String,
}

impl Channel {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            phase: Phase::Init,
            local_id: 0,
            remote_id: 0,
            local_window: DEFAULT_WINDOW_SIZE,
            remote_window: 0,
            pty_sent: false,
            shell_sent: false,
            cols,
            rows,
            term: DEFAULT_TERM.to_string(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Called on `SSH_MSG_USERAUTH_SUCCESS`: open the session channel.
    pub fn open(&mut self) -> Vec<u8> {
        self.phase = Phase::Opening;
        msg::build_channel_open(self.local_id, self.local_window, CHANNEL_MAX_PACKET)
    }

    /// Called on `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`: record the remote
    /// channel id and window, then immediately request a PTY.
    pub fn on_open_confirmation(&mut self, confirmation: &msg::ChannelOpenConfirmation) -> Vec<u8> {
        self.remote_id = confirmation.sender_channel;
        self.remote_window = confirmation.initial_window;
        self.phase = Phase::Open;
        self.pty_sent = true;
        self.phase = Phase::PtyRequested;

        msg::build_pty_request(self.remote_id, &self.term, self.cols, self.rows)
    }

    /// Called on the `pty-req` reply (`CHANNEL_SUCCESS` or
    /// `CHANNEL_FAILURE`): either way, send `shell` next. Returns
    /// `(shell_request, pty_denied)`.
    pub fn on_pty_reply(&mut self, granted: bool) -> (Vec<u8>, bool) {
        self.shell_sent = true;
        self.phase = Phase::ShellRequested;

        (msg::build_shell_request(self.remote_id), !granted)
    }

    /// Called on the `shell` reply. The channel becomes active
    /// regardless of success/failure reported by the server: once shell
    /// is sent, the channel is active.
    pub fn on_shell_reply(&mut self) {
        self.phase = Phase::Active;
    }

    /// Inbound `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload: consumes
    /// from the local window and returns `(data, window_adjust)` — the
    /// adjust message restoring exactly what was consumed, to be sent
    /// before any other outbound payload on the channel.
    pub fn on_data(&mut self, data: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
        // Every received byte is returned to the peer immediately, so
        // the local window never actually depletes.
        let adjust = msg::build_window_adjust(self.remote_id, data.len() as u32);
        (data, adjust)
    }

    /// Outbound `write`: no-op before `shell` has been sent. Input is
    /// buffered at the caller's discretion until then.
    pub fn write(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if !self.shell_sent {
            return None;
        }

        Some(msg::build_channel_data(self.remote_id, data))
    }

    /// Outbound resize: no-op before the channel is confirmed, signaled
    /// by `remote_id == 0`.
    pub fn resize(&mut self, cols: u32, rows: u32) -> Option<Vec<u8>> {
        if self.remote_id == 0 {
            return None;
        }

        self.cols = cols;
        self.rows = rows;

        Some(msg::build_window_change_request(self.remote_id, cols, rows))
    }

    /// Inbound window adjust: extend our outstanding remote window.
    pub fn on_window_adjust(&mut self, bytes_to_add: u32) {
        self.remote_window = self.remote_window.saturating_add(bytes_to_add);
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_noop_before_confirmation() {
        let mut channel = Channel::new(DEFAULT_COLS, DEFAULT_ROWS);
        assert!(channel.resize(100, 40).is_none());
    }

    #[test]
    fn write_is_noop_before_shell() {
        let mut channel = Channel::new(DEFAULT_COLS, DEFAULT_ROWS);
        channel.open();
        channel.on_open_confirmation(&msg::ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window: DEFAULT_WINDOW_SIZE,
            max_packet: CHANNEL_MAX_PACKET,
        });

        assert!(channel.write(b"hi").is_none());
    }

    #[test]
    fn full_open_flow_tracks_remote_id_and_becomes_active() {
        let mut channel = Channel::new(DEFAULT_COLS, DEFAULT_ROWS);
        channel.open();
        channel.on_open_confirmation(&msg::ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window: DEFAULT_WINDOW_SIZE,
            max_packet: CHANNEL_MAX_PACKET,
        });
        assert_eq!(channel.phase(), Phase::PtyRequested);

        let (shell_req, denied) = channel.on_pty_reply(true);
        assert!(!denied);
        assert_eq!(shell_req[0], msg::CHANNEL_REQUEST);

        channel.on_shell_reply();
        assert_eq!(channel.phase(), Phase::Active);

        assert!(channel.write(b"hi").is_some());
        assert!(channel.resize(100, 40).is_some());
    }

    #[test]
    fn pty_denial_still_sends_shell() {
        let mut channel = Channel::new(DEFAULT_COLS, DEFAULT_ROWS);
        channel.open();
        channel.on_open_confirmation(&msg::ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window: DEFAULT_WINDOW_SIZE,
            max_packet: CHANNEL_MAX_PACKET,
        });

        let (shell_req, denied) = channel.on_pty_reply(false);
        assert!(denied);
        assert_eq!(shell_req[0], msg::CHANNEL_REQUEST);
    }

    #[test]
    fn data_delivery_emits_equal_length_window_adjust() {
        let mut channel = Channel::new(DEFAULT_COLS, DEFAULT_ROWS);
        channel.open();
        channel.on_open_confirmation(&msg::ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window: DEFAULT_WINDOW_SIZE,
            max_packet: CHANNEL_MAX_PACKET,
        });

        let (data, adjust) = channel.on_data(b"hello".to_vec());
        assert_eq!(data, b"hello");

        let (_, o1) = crate::codec::read_u32(&adjust[1..]).unwrap();
        let (n, _) = crate::codec::read_u32(&adjust[1 + o1..]).unwrap();
        assert_eq!(n, 5);
    }
}
