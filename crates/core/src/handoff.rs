//! Queue with synchronous insert and asynchronous take.
//!
//! A value inserted while a consumer is parked goes straight to the oldest
//! parked consumer. Otherwise it is buffered. Both waiters and the buffer are
//! served first-in first-out.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::oneshot;

/// Errors surfaced to consumers of a [`HandoffQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("queue was destroyed")]
    Destroyed,
}

struct Inner<T> {
    buffer: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
    destroyed: bool,
}

/// Single-process handoff queue used to move CAPTCHA tokens to runners.
pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("HandoffQueue")
            .field("buffered", &inner.buffer.len())
            .field("waiters", &inner.waiters.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                waiters: VecDeque::new(),
                destroyed: false,
            }),
        }
    }

    /// Hand `value` to the oldest parked consumer, or buffer it.
    ///
    /// Fails only after [`destroy`](Self::destroy).
    pub fn insert(&self, value: T) -> Result<(), HandoffError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return Err(HandoffError::Destroyed);
        }

        let mut value = value;
        while let Some(waiter) = inner.waiters.pop_front() {
            // A dropped or cancelled request hands the value back.
            match waiter.send(value) {
                Ok(()) => return Ok(()),
                Err(returned) => value = returned,
            }
        }

        inner.buffer.push_back(value);
        Ok(())
    }

    /// Take the next value, parking the caller if nothing is buffered.
    pub fn take(&self) -> TakeRequest<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return TakeRequest {
                state: TakeState::Failed(HandoffError::Destroyed),
            };
        }

        if let Some(value) = inner.buffer.pop_front() {
            return TakeRequest {
                state: TakeState::Ready(value),
            };
        }

        let (tx, rx) = oneshot::channel();
        inner.waiters.push_back(tx);
        TakeRequest {
            state: TakeState::Waiting(rx),
        }
    }

    /// Drop every buffered value. Parked consumers keep waiting.
    pub fn clear(&self) {
        self.inner.lock().unwrap().buffer.clear();
    }

    /// Fail every parked consumer, clear the buffer and refuse further inserts.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.destroyed = true;
        inner.buffer.clear();
        // Dropping the senders wakes each receiver with a closed error.
        inner.waiters.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().unwrap().destroyed
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of consumers still parked.
    pub fn waiting(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .waiters
            .iter()
            .filter(|w| !w.is_closed())
            .count()
    }
}

enum TakeState<T> {
    Ready(T),
    Waiting(oneshot::Receiver<T>),
    Failed(HandoffError),
    Finished,
}

/// Observable state of a [`TakeRequest`].
#[derive(Debug, PartialEq, Eq)]
pub enum TakeStatus<T> {
    Pending,
    Fulfilled(T),
    Failed(HandoffError),
}

/// An outstanding `take()` that can be polled, awaited or cancelled.
pub struct TakeRequest<T> {
    state: TakeState<T>,
}

impl<T> std::fmt::Debug for TakeRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            TakeState::Ready(_) => "ready",
            TakeState::Waiting(_) => "waiting",
            TakeState::Failed(_) => "failed",
            TakeState::Finished => "finished",
        };
        f.debug_struct("TakeRequest").field("state", &state).finish()
    }
}

impl<T> TakeRequest<T> {
    /// Check for a value without suspending.
    ///
    /// Once a value or an error has been returned, later calls report
    /// `Failed(Destroyed)`.
    pub fn try_take(&mut self) -> TakeStatus<T> {
        match std::mem::replace(&mut self.state, TakeState::Finished) {
            TakeState::Ready(value) => TakeStatus::Fulfilled(value),
            TakeState::Failed(e) => TakeStatus::Failed(e),
            TakeState::Finished => TakeStatus::Failed(HandoffError::Destroyed),
            TakeState::Waiting(mut rx) => match rx.try_recv() {
                Ok(value) => TakeStatus::Fulfilled(value),
                Err(oneshot::error::TryRecvError::Empty) => {
                    self.state = TakeState::Waiting(rx);
                    TakeStatus::Pending
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    TakeStatus::Failed(HandoffError::Destroyed)
                }
            },
        }
    }

    /// Wait until a value is inserted or the queue is destroyed.
    pub async fn wait(self) -> Result<T, HandoffError> {
        match self.state {
            TakeState::Ready(value) => Ok(value),
            TakeState::Failed(e) => Err(e),
            TakeState::Finished => Err(HandoffError::Destroyed),
            TakeState::Waiting(rx) => rx.await.map_err(|_| HandoffError::Destroyed),
        }
    }

    /// Withdraw the request.
    ///
    /// Returns a value that was already handed over, so the caller can put
    /// it back instead of losing it.
    pub fn cancel(self) -> Option<T> {
        match self.state {
            TakeState::Ready(value) => Some(value),
            TakeState::Waiting(mut rx) => {
                rx.close();
                rx.try_recv().ok()
            }
            TakeState::Failed(_) | TakeState::Finished => None,
        }
    }
}
