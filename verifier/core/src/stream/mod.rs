//! Self-healing push channel client.
//!
//! A single driver task owns the live connection and feeds everything it
//! observes into [`StateMachine`]. Abnormal closes and refused connections
//! are retried after a fixed delay with the same channel token. At most one
//! message callback is registered at a time and it only fires while the
//! connection is open and [`ReconnectingStreamClient::start`] was called.

pub mod engine_io;
pub mod socketio;
pub mod state_machine;
pub mod transport;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use platform_http_client::ChannelToken;
use serde_json::Value;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

pub use self::{
    socketio::SocketIoTransport,
    state_machine::{CloseCode, ConnectionState, TransportErrorKind},
    transport::{Inbound, StreamConnection, StreamTransport, TransportError},
};
use self::state_machine::{Command, ConnectionEvent, StateMachine};

type MessageCallback = Box<dyn FnMut(Value) + Send>;

struct Shared {
    machine: StateMachine,
    callback: Option<MessageCallback>,
    started: bool,
    attached: bool,
}

impl Shared {
    /// Runs a transition, applying listener commands in place and returning
    /// the ones that need the connection.
    fn apply(&mut self, event: ConnectionEvent) -> VecDeque<Command> {
        let mut io = VecDeque::new();
        for command in self.machine.on_event(event) {
            match command {
                Command::AttachListeners => self.attached = self.started,
                Command::DetachListeners => self.attached = false,
                Command::OpenTransport | Command::ScheduleReconnect | Command::CloseTransport => {
                    io.push_back(command);
                }
            }
        }
        io
    }
}

pub struct ReconnectingStreamClient {
    transport: Arc<dyn StreamTransport>,
    reconnect_interval: Duration,
    shared: Arc<Mutex<Shared>>,
    stop_tx: watch::Sender<bool>,
}

impl ReconnectingStreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>, reconnect_interval: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            transport,
            reconnect_interval,
            shared: Arc::new(Mutex::new(Shared {
                machine: StateMachine::new(),
                callback: None,
                started: false,
                attached: false,
            })),
            stop_tx,
        }
    }

    /// Opens the channel in the background. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self, token: ChannelToken) {
        let commands = lock(&self.shared).apply(ConnectionEvent::Connect);
        if commands.is_empty() {
            warn!("push channel client already connecting or stopped");
            return;
        }
        info!("connecting to push channel");
        let driver = Driver {
            transport: Arc::clone(&self.transport),
            token,
            reconnect_interval: self.reconnect_interval,
            shared: Arc::clone(&self.shared),
            stop_rx: self.stop_tx.subscribe(),
            connection: None,
        };
        tokio::spawn(driver.run(commands));
    }

    /// Registers the message callback, replacing any previous one.
    pub fn on_message<F>(&self, callback: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        let mut shared = lock(&self.shared);
        if shared.machine.state() == ConnectionState::Stopped {
            warn!("ignoring callback for a stopped push channel client");
            return;
        }
        shared.callback = Some(Box::new(callback));
    }

    /// Activates message delivery. Has no effect before [`Self::connect`].
    pub fn start(&self) {
        let mut shared = lock(&self.shared);
        match shared.machine.state() {
            ConnectionState::Disconnected | ConnectionState::Stopped => {
                warn!("push channel client is not connected, cannot start listening");
            }
            state => {
                shared.started = true;
                shared.attached = state == ConnectionState::Connected;
                debug!(?state, "listening for push messages");
            }
        }
    }

    /// Detaches the callback and closes the connection. Safe to call more
    /// than once and from inside the message callback.
    pub fn stop(&self) {
        let mut shared = lock(&self.shared);
        if shared.machine.state() == ConnectionState::Stopped {
            return;
        }
        shared.apply(ConnectionEvent::Stop);
        shared.started = false;
        shared.callback = None;
        drop(shared);
        info!("stopping push channel client");
        self.stop_tx.send_replace(true);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).machine.state()
    }
}

impl Drop for ReconnectingStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Driver {
    transport: Arc<dyn StreamTransport>,
    token: ChannelToken,
    reconnect_interval: Duration,
    shared: Arc<Mutex<Shared>>,
    stop_rx: watch::Receiver<bool>,
    connection: Option<Box<dyn StreamConnection>>,
}

impl Driver {
    async fn run(mut self, mut commands: VecDeque<Command>) {
        loop {
            let event = match commands.pop_front() {
                Some(Command::OpenTransport) => {
                    let opened = tokio::select! {
                        biased;
                        () = stopped(&mut self.stop_rx) => break,
                        opened = self.transport.open(&self.token) => opened,
                    };
                    match opened {
                        Ok(connection) => {
                            info!("push channel connected");
                            self.connection = Some(connection);
                            ConnectionEvent::Opened
                        }
                        Err(error) => {
                            warn!(%error, "push channel connection failed");
                            ConnectionEvent::Failed(error.kind)
                        }
                    }
                }
                Some(Command::ScheduleReconnect) => {
                    debug!(delay = ?self.reconnect_interval, "reconnecting push channel");
                    tokio::select! {
                        biased;
                        () = stopped(&mut self.stop_rx) => break,
                        () = sleep(self.reconnect_interval) => ConnectionEvent::RetryElapsed,
                    }
                }
                Some(Command::CloseTransport) => break,
                Some(Command::AttachListeners | Command::DetachListeners) => continue,
                None => {
                    let Some(connection) = self.connection.as_mut() else {
                        break;
                    };
                    let inbound = tokio::select! {
                        biased;
                        () = stopped(&mut self.stop_rx) => break,
                        inbound = connection.next_event() => inbound,
                    };
                    match inbound {
                        Inbound::Message(payload) => {
                            self.deliver(payload);
                            continue;
                        }
                        Inbound::Closed(code) => {
                            if code.is_normal() {
                                info!("push channel closed");
                            } else {
                                warn!(%code, "push channel closed abnormally");
                            }
                            self.connection = None;
                            ConnectionEvent::Closed(code)
                        }
                        Inbound::Failed(kind) => {
                            warn!(?kind, "error on push channel connection");
                            ConnectionEvent::Failed(kind)
                        }
                    }
                }
            };

            let next = lock(&self.shared).apply(event);
            if matches!(event, ConnectionEvent::Closed(_) | ConnectionEvent::Failed(_))
                && next.contains(&Command::ScheduleReconnect)
            {
                // A failed connection may still be half open.
                if let Some(mut connection) = self.connection.take() {
                    connection.close().await;
                }
            }
            commands.extend(next);
        }

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        debug!("push channel driver finished");
    }

    fn deliver(&self, payload: Value) {
        let callback = {
            let mut shared = lock(&self.shared);
            if !shared.attached {
                debug!("no active listener, dropping push message");
                return;
            }
            shared.callback.take()
        };
        let Some(mut callback) = callback else {
            debug!("no message callback registered, dropping push message");
            return;
        };

        callback(payload);

        let mut shared = lock(&self.shared);
        if shared.callback.is_none() && shared.machine.state() != ConnectionState::Stopped {
            shared.callback = Some(callback);
        }
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    // A dropped client counts as stopped.
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}
