use std::fmt;

use tracing::trace;

/// Websocket close status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    /// Reserved code for a connection that dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);

    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 == Self::NORMAL.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionRefused,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Connect,
    Opened,
    Closed(CloseCode),
    Failed(TransportErrorKind),
    RetryElapsed,
    Stop,
}

/// Side effects requested by a transition, executed by the stream driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    OpenTransport,
    AttachListeners,
    DetachListeners,
    ScheduleReconnect,
    CloseTransport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: ConnectionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies `event` and returns the commands the transition requires.
    /// Events the current state does not handle leave it untouched.
    pub fn on_event(&mut self, event: ConnectionEvent) -> Vec<Command> {
        let Some((next, commands)) = transition(self.state, event) else {
            trace!(state = ?self.state, ?event, "event ignored");
            return Vec::new();
        };
        trace!(from = ?self.state, to = ?next, ?event, "stream state transition");
        self.state = next;
        commands
    }
}

fn transition(
    state: ConnectionState,
    event: ConnectionEvent,
) -> Option<(ConnectionState, Vec<Command>)> {
    use Command::{
        AttachListeners, CloseTransport, DetachListeners, OpenTransport, ScheduleReconnect,
    };
    use ConnectionEvent::{Closed, Connect, Failed, Opened, RetryElapsed, Stop};
    use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting, Stopped};

    Some(match (state, event) {
        (Stopped, _) => return None,
        (_, Stop) => (Stopped, vec![DetachListeners, CloseTransport]),

        (Disconnected, Connect) => (Connecting, vec![OpenTransport]),

        (Connecting, Opened) => (Connected, vec![AttachListeners]),
        (Connecting, Closed(_) | Failed(_)) => (Reconnecting, vec![ScheduleReconnect]),

        (Connected, Closed(code)) if code.is_normal() => (Disconnected, vec![DetachListeners]),
        (Connected, Closed(_) | Failed(TransportErrorKind::ConnectionRefused)) => {
            (Reconnecting, vec![DetachListeners, ScheduleReconnect])
        }

        (Reconnecting, RetryElapsed) => (Connecting, vec![OpenTransport]),

        _ => return None,
    })
}
