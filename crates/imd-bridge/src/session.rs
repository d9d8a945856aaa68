// session.rs — the connection-lifetime state machine.
//
// Generalizes myq2's `SV_ConnectionlessPacket`/`cl_state_t` client
// lifecycle (connect -> primed -> spawned, with a listen loop that retries
// on a timer) to IMD's LISTENING/HANDSHAKING/CONNECTED/PAUSED/TERMINATING
// states. Kept free of actual socket I/O beyond the accept/handshake
// handshake exchange itself so the transition logic is unit-testable
// without a live connection; the frame emission cadence and steering
// application live in `frame.rs`/`steering.rs`.

use std::time::Duration;

use imd_wire::{
    codec, ClientEndpoint, ListenEndpoint, MessageType, ProtocolVersion, SessionFlags, HEADER_SIZE,
};

use crate::error::{BridgeError, BridgeResult};

/// How long a single blocking accept attempt waits before the caller is
/// expected to retry.
pub const ACCEPT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// How long the handshake step waits for the client's `GO`/`KILL` reply
/// before the connection attempt is abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Rank 0 is blocked (or, in `nowait` mode, polling) on accept.
    Listening,
    /// `nowait` mode with no client connected yet; the run proceeds
    /// unattended and checks for a pending connection once per step.
    Inactive,
    /// A connection was accepted; the version handshake is in flight.
    Handshaking,
    /// Handshake completed with `GO`; frames are emitted at `trate`.
    Connected,
    /// Client asked to suspend emission; the connection stays open.
    Paused,
    /// `KILL` was received or the host is shutting down; every rank must
    /// observe this via `collective::broadcast_flag` before exit.
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Nothing changed (e.g. a redundant v3 PAUSE/RESUME — both are
    /// idempotent while already in the target state).
    None,
    Paused,
    Resumed,
    Disconnected,
    Killed,
    TrateChanged(u32),
}

/// The session state machine for one connection attempt. One `Session` is
/// reused across repeated `LISTENING` -> `CONNECTED` -> `LISTENING` cycles
/// for the lifetime of the run: disconnect returns to listening rather
/// than tearing the whole bridge down.
pub struct Session {
    state: SessionState,
    version: ProtocolVersion,
    trate: u32,
    nowait: bool,
    banner_shown: bool,
}

impl Session {
    pub fn new(version: ProtocolVersion, trate: u32, nowait: bool) -> Self {
        Self {
            state: if nowait { SessionState::Inactive } else { SessionState::Listening },
            version,
            trate,
            nowait,
            banner_shown: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn trate(&self) -> u32 {
        self.trate
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Connected | SessionState::Paused)
    }

    /// Whether a step counter lands on an emission boundary: every
    /// `trate`-th step while `CONNECTED`.
    pub fn should_emit(&self, step: u64) -> bool {
        self.state == SessionState::Connected && step % self.trate as u64 == 0
    }

    /// Log the one-time banner for a fresh listen attempt: shown when the
    /// bridge starts waiting for a client, not on every retry within that
    /// wait.
    fn announce_listen_attempt(&mut self, port: u16) {
        if !self.banner_shown {
            log::info!("IMD bridge ready, waiting for connection on port {}", port);
            self.banner_shown = true;
        }
    }

    /// Non-blocking accept attempt used by `nowait` polling while
    /// `INACTIVE`. Returns the accepted client, if any, without blocking
    /// the calling step.
    pub fn poll_accept(&mut self, listener: &ListenEndpoint, port: u16) -> BridgeResult<Option<ClientEndpoint>> {
        debug_assert!(self.nowait);
        self.announce_listen_attempt(port);
        let client = listener.try_accept().map_err(BridgeError::Bind)?;
        if client.is_some() {
            self.state = SessionState::Handshaking;
        }
        Ok(client)
    }

    /// Blocking accept loop: waits up to [`ACCEPT_RETRY_INTERVAL`] per
    /// attempt, retrying indefinitely until a client connects. Meant to be
    /// called from a dedicated accept thread/step when `nowait`
    /// is false; each retry re-enters this function rather than looping
    /// internally forever, so callers can interleave shutdown checks.
    pub fn blocking_accept_attempt(&mut self, listener: &ListenEndpoint, port: u16) -> BridgeResult<Option<ClientEndpoint>> {
        debug_assert!(!self.nowait);
        self.announce_listen_attempt(port);
        let client = listener
            .accept_with_timeout(ACCEPT_RETRY_INTERVAL)
            .map_err(BridgeError::Bind)?;
        if client.is_some() {
            self.state = SessionState::Handshaking;
        }
        Ok(client)
    }

    /// Run the version handshake on a freshly accepted client: send the
    /// HANDSHAKE header (v3: followed by a `SESSIONINFO` block echoing the
    /// negotiated sub-block flags), then wait for `GO`. `KILL` during the
    /// handshake is honored as an immediate terminate request; anything
    /// else, or a timeout, drops the connection and returns the bridge to
    /// `LISTENING`/`INACTIVE`.
    pub fn handshake(&mut self, client: &mut ClientEndpoint, flags: SessionFlags) -> BridgeResult<()> {
        debug_assert_eq!(self.state, SessionState::Handshaking);

        let mut buf = Vec::new();
        codec::write_handshake_header(&mut buf, self.version);
        if self.version == ProtocolVersion::V3 {
            codec::write_header(&mut buf, MessageType::SessionInfo, 7);
            codec::encode_session_info(&mut buf, flags);
        }
        client.write_all(&buf)?;

        if !client.selread(HANDSHAKE_TIMEOUT)? {
            self.fail_handshake();
            return Err(BridgeError::Handshake("timed out waiting for GO".into()));
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        client.read_exact(&mut header_buf)?;
        let header = codec::read_header(&header_buf)?;

        match MessageType::from_i32(header.msg_type) {
            Some(MessageType::Go) => {
                self.state = SessionState::Connected;
                self.banner_shown = false;
                Ok(())
            }
            Some(MessageType::Kill) => {
                self.state = SessionState::Terminating;
                Err(BridgeError::Killed)
            }
            other => {
                self.fail_handshake();
                Err(BridgeError::Handshake(format!(
                    "expected GO or KILL, got {:?}",
                    other
                )))
            }
        }
    }

    fn fail_handshake(&mut self) {
        self.state = if self.nowait { SessionState::Inactive } else { SessionState::Listening };
        self.banner_shown = false;
    }

    /// Client disconnected (EOF / DISCONNECT message) while `CONNECTED` or
    /// `PAUSED`. Returns to listening, preserving tag-index ordering for
    /// the next connection.
    pub fn on_disconnect(&mut self) -> SessionEvent {
        self.state = if self.nowait { SessionState::Inactive } else { SessionState::Listening };
        self.banner_shown = false;
        SessionEvent::Disconnected
    }

    /// `KILL` received while connected: collective-fatal, every rank must
    /// observe `TERMINATING`.
    pub fn on_kill(&mut self) -> SessionEvent {
        self.state = SessionState::Terminating;
        SessionEvent::Killed
    }

    /// `PAUSE` message. v2 toggles (a second PAUSE resumes); v3 PAUSE is
    /// idempotent while already paused.
    pub fn on_pause(&mut self) -> SessionEvent {
        match self.version {
            ProtocolVersion::V2 => {
                if self.state == SessionState::Paused {
                    self.state = SessionState::Connected;
                    SessionEvent::Resumed
                } else if self.state == SessionState::Connected {
                    self.state = SessionState::Paused;
                    SessionEvent::Paused
                } else {
                    SessionEvent::None
                }
            }
            ProtocolVersion::V3 => {
                if self.state == SessionState::Connected {
                    self.state = SessionState::Paused;
                    SessionEvent::Paused
                } else {
                    SessionEvent::None
                }
            }
        }
    }

    /// `RESUME` message (v3 only; v2 clients never send this — they toggle
    /// via a second `PAUSE`). Idempotent while already running.
    pub fn on_resume(&mut self) -> SessionEvent {
        if self.state == SessionState::Paused {
            self.state = SessionState::Connected;
            SessionEvent::Resumed
        } else {
            SessionEvent::None
        }
    }

    /// `TRATE` message: change the emission cadence, taking effect on the
    /// next step boundary check. A non-positive rate is invalid and is
    /// ignored outright — the current rate is left unchanged rather than
    /// being coerced to 1.
    pub fn on_trate(&mut self, new_rate: i32) -> SessionEvent {
        if new_rate < 1 {
            return SessionEvent::None;
        }
        self.trate = new_rate as u32;
        SessionEvent::TrateChanged(self.trate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_pause_toggles() {
        let mut s = Session::new(ProtocolVersion::V2, 1, false);
        s.state = SessionState::Connected;
        assert_eq!(s.on_pause(), SessionEvent::Paused);
        assert_eq!(s.state(), SessionState::Paused);
        assert_eq!(s.on_pause(), SessionEvent::Resumed);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn v3_pause_and_resume_are_idempotent() {
        let mut s = Session::new(ProtocolVersion::V3, 1, false);
        s.state = SessionState::Connected;
        assert_eq!(s.on_pause(), SessionEvent::Paused);
        // A second PAUSE while already paused is a no-op.
        assert_eq!(s.on_pause(), SessionEvent::None);
        assert_eq!(s.state(), SessionState::Paused);
        assert_eq!(s.on_resume(), SessionEvent::Resumed);
        // RESUME while already running is a no-op.
        assert_eq!(s.on_resume(), SessionEvent::None);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn emission_cadence_follows_trate_only_while_connected() {
        let mut s = Session::new(ProtocolVersion::V3, 4, false);
        s.state = SessionState::Connected;
        assert!(s.should_emit(0));
        assert!(!s.should_emit(1));
        assert!(!s.should_emit(2));
        assert!(!s.should_emit(3));
        assert!(s.should_emit(4));

        s.state = SessionState::Paused;
        assert!(!s.should_emit(4));
    }

    #[test]
    fn disconnect_returns_to_listening_when_blocking() {
        let mut s = Session::new(ProtocolVersion::V2, 1, false);
        s.state = SessionState::Connected;
        assert_eq!(s.on_disconnect(), SessionEvent::Disconnected);
        assert_eq!(s.state(), SessionState::Listening);
    }

    #[test]
    fn disconnect_returns_to_inactive_when_nowait() {
        let mut s = Session::new(ProtocolVersion::V2, 1, true);
        s.state = SessionState::Connected;
        assert_eq!(s.on_disconnect(), SessionEvent::Disconnected);
        assert_eq!(s.state(), SessionState::Inactive);
    }

    #[test]
    fn kill_transitions_to_terminating_from_any_connected_state() {
        let mut s = Session::new(ProtocolVersion::V3, 1, false);
        s.state = SessionState::Paused;
        assert_eq!(s.on_kill(), SessionEvent::Killed);
        assert_eq!(s.state(), SessionState::Terminating);
    }

    #[test]
    fn non_positive_trate_is_ignored_not_clamped() {
        let mut s = Session::new(ProtocolVersion::V2, 5, false);
        assert_eq!(s.on_trate(0), SessionEvent::None);
        assert_eq!(s.trate(), 5);
        assert_eq!(s.on_trate(-3), SessionEvent::None);
        assert_eq!(s.trate(), 5);
        assert_eq!(s.on_trate(4), SessionEvent::TrateChanged(4));
        assert_eq!(s.trate(), 4);
    }
}
