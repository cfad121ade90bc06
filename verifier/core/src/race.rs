use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::{sleep_until, Instant},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RaceError {
    #[error("no event within {0:?}")]
    Timeout(Duration),
    #[error("event source went away before emitting")]
    Abandoned,
}

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

/// Resolves a pending [`EventRace`] with a value. Only the first call on any
/// clone has an effect, and only before the race's deadline.
pub struct Emitter<T> {
    slot: Slot<T>,
    deadline: Instant,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            deadline: self.deadline,
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<T> Emitter<T> {
    /// Returns `true` if this call resolved the race.
    pub fn emit(&self, value: T) -> bool {
        // An event landing on the deadline itself counts as late.
        if Instant::now() >= self.deadline {
            close(&self.slot);
            return false;
        }
        let sender = self
            .slot
            .lock()
            .map_or(None, |mut slot| slot.take());
        sender.is_some_and(|sender| sender.send(value).is_ok())
    }
}

fn close<T>(slot: &Slot<T>) {
    if let Ok(mut slot) = slot.lock() {
        slot.take();
    }
}

type Cancel = Box<dyn FnOnce() + Send>;

/// An armed race between an external event and a deadline.
///
/// The registration runs and the deadline starts when the race is armed, so
/// the caller can trigger the awaited event before polling the outcome. If the
/// deadline wins, or the race is dropped unresolved, the registration's
/// cancel hook runs exactly once and later emits are discarded.
pub struct EventRace<T> {
    receiver: oneshot::Receiver<T>,
    slot: Weak<Mutex<Option<oneshot::Sender<T>>>>,
    cancel: Option<Cancel>,
    deadline: Instant,
    timeout: Duration,
}

impl<T> EventRace<T> {
    pub fn arm<R, C>(timeout: Duration, register: R) -> Self
    where
        R: FnOnce(Emitter<T>) -> C,
        C: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(sender)));
        let weak_slot = Arc::downgrade(&slot);
        let deadline = Instant::now() + timeout;
        let cancel = register(Emitter { slot, deadline });
        Self {
            receiver,
            slot: weak_slot,
            cancel: Some(Box::new(cancel)),
            deadline,
            timeout,
        }
    }

    pub async fn resolve(mut self) -> Result<T, RaceError> {
        let outcome = match self.receiver.try_recv() {
            // Emitted in time, possibly long before this call.
            Ok(value) => Ok(value),
            Err(TryRecvError::Empty | TryRecvError::Closed) => tokio::select! {
                biased;
                () = sleep_until(self.deadline) => Err(RaceError::Timeout(self.timeout)),
                received = &mut self.receiver => received.map_err(|_| RaceError::Abandoned),
            },
        };

        match &outcome {
            Ok(_) => {
                debug!("event won the race");
                self.cancel.take();
            }
            Err(error) => {
                debug!(%error, "event lost the race, tearing down registration");
                self.teardown();
            }
        }
        outcome
    }

    fn teardown(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            close(&slot);
        }
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for EventRace<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Waits for whichever comes first: the event `register` arranges to emit, or
/// `timeout`.
pub async fn race<T, R, C>(timeout: Duration, register: R) -> Result<T, RaceError>
where
    R: FnOnce(Emitter<T>) -> C,
    C: FnOnce() + Send + 'static,
{
    EventRace::arm(timeout, register).resolve().await
}
