//! Generic driver loop for the runner state machines.
//!
//! A handler performs one step and returns a [`Transition`]. The driver
//! emits its message (deduplicated by the context), stashes any ban for the
//! next swap, advances the state and applies the requested pause.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use crate::context::RunnerContext;
use crate::events::RunnerKind;
use crate::proxy::BanLevel;
use crate::task::DelayKind;

/// A failure no handler knew how to classify. The driver moves to the
/// error state.
#[derive(Debug, Error)]
#[error("unexpected failure in {state}: {reason}")]
pub struct RunnerError {
    pub state: String,
    pub reason: String,
}

impl RunnerError {
    pub fn new(state: impl Debug, reason: impl Into<String>) -> Self {
        Self {
            state: format!("{:?}", state),
            reason: reason.into(),
        }
    }
}

/// How long to wait before the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// The task's configured delay of this kind, read at sleep time.
    Delay(DelayKind),
    Fixed(Duration),
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    pub message: Option<String>,
    pub pause: Option<Pause>,
    pub ban: BanLevel,
}

impl<S> Transition<S> {
    pub fn to(next: S) -> Self {
        Self {
            next,
            message: None,
            pause: None,
            ban: BanLevel::None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn pause(mut self, pause: Pause) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn ban(mut self, ban: BanLevel) -> Self {
        self.ban = ban;
        self
    }
}

/// Where the machine is and how it got there.
#[derive(Debug, Clone)]
pub struct Cursor<S> {
    pub current: S,
    /// The last state before `current`.
    pub previous: Option<S>,
    /// Every distinct state entered, in order.
    pub history: Vec<S>,
    /// Strongest ban seen since the last successful swap.
    pub pending_ban: BanLevel,
}

impl<S: Copy + PartialEq> Cursor<S> {
    pub fn new(start: S) -> Self {
        Self {
            current: start,
            previous: None,
            history: vec![start],
            pending_ban: BanLevel::None,
        }
    }

    /// Move to `next`. Staying put records nothing.
    pub fn advance(&mut self, next: S) {
        if next == self.current {
            return;
        }
        self.previous = Some(self.current);
        self.current = next;
        self.history.push(next);
    }

    pub fn stash_ban(&mut self, ban: BanLevel) {
        self.pending_ban = self.pending_ban.max(ban);
    }
}

/// A runner state machine.
#[async_trait]
pub trait StateMachine: Send {
    type State: Copy + Eq + Hash + Debug + Send + Sync;

    const ABORT: Self::State;
    const ERROR: Self::State;
    const SWAP: Self::State;

    fn context(&self) -> &RunnerContext;

    fn is_terminal(state: Self::State) -> bool;

    fn state_name(state: Self::State) -> &'static str;

    /// Generic final message for a terminal state.
    fn final_message(state: Self::State) -> &'static str;

    async fn step(
        &mut self,
        cursor: &mut Cursor<Self::State>,
    ) -> Result<Transition<Self::State>, RunnerError>;

    /// Release runner-held resources. Runs before the final status goes out.
    async fn finish(&mut self, _state: Self::State) {}
}

/// Run `machine` from `start` until it reaches a terminal state.
pub async fn drive<M: StateMachine>(machine: &mut M, start: M::State) -> Cursor<M::State> {
    let mut cursor = Cursor::new(start);

    loop {
        let ctx = machine.context();
        if ctx.is_aborted() && !M::is_terminal(cursor.current) {
            cursor.advance(M::ABORT);
        }
        if M::is_terminal(cursor.current) {
            break;
        }
        if cursor.current != M::SWAP && machine.context().take_force_swap() {
            debug!(
                "Runner {} forced to swap from {}",
                machine.context().runner_id(),
                M::state_name(cursor.current)
            );
            cursor.advance(M::SWAP);
        }

        let transition = match machine.step(&mut cursor).await {
            Ok(t) => t,
            Err(e) => {
                error!("Runner {}: {}", machine.context().runner_id(), e);
                Transition::to(M::ERROR).message(format!("Unexpected error: {}", e.reason))
            }
        };

        let ctx = machine.context();
        if let Some(message) = &transition.message {
            ctx.emit_status(message);
        }
        cursor.stash_ban(transition.ban);

        let from = cursor.current;
        cursor.advance(transition.next);
        if from != cursor.current {
            let runner = match ctx.kind() {
                RunnerKind::Task => "task",
                RunnerKind::Monitor => "monitor",
            };
            crate::metrics::STATE_TRANSITIONS
                .with_label_values(&[runner, M::state_name(cursor.current)])
                .inc();
        }

        if M::is_terminal(cursor.current) {
            continue;
        }
        if let Some(pause) = transition.pause {
            let duration = match pause {
                Pause::Delay(kind) => ctx.delay_for(kind),
                Pause::Fixed(d) => d,
            };
            ctx.delay(duration).await;
        }
    }

    machine.finish(cursor.current).await;
    let ctx = machine.context();
    ctx.emit_final(M::final_message(cursor.current));
    ctx.link().finished(M::state_name(cursor.current));
    cursor
}
